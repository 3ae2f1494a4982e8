//! Codecs for the small JSON documents embedded in queue and subscription
//! attributes.
//!
//! Only the fields the broker interprets get a typed form (`RedrivePolicy`,
//! `FilterPolicy`); everything else round-trips as validated opaque text.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("Invalid {document} JSON: {reason}")]
    Malformed {
        document: &'static str,
        reason: String,
    },
    #[error("{0}")]
    Invalid(String),
}

fn parse_document(document: &'static str, s: &str) -> Result<Value, PolicyError> {
    serde_json::from_str(s).map_err(|e| PolicyError::Malformed {
        document,
        reason: e.to_string(),
    })
}

/// Checks that an opaque policy document (e.g. `Policy`, `DeliveryPolicy`)
/// is a JSON object. The text itself is stored untouched.
pub fn validate_opaque(document: &'static str, s: &str) -> Result<(), PolicyError> {
    match parse_document(document, s)? {
        Value::Object(_) => Ok(()),
        _ => Err(PolicyError::Invalid(format!("{document} must be a JSON object"))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedrivePolicy {
    pub dead_letter_target_arn: String,
    pub max_receive_count: u32,
}

impl RedrivePolicy {
    pub fn from_json(s: &str) -> Result<Self, PolicyError> {
        let v = parse_document("RedrivePolicy", s)?;
        let arn = v
            .get("deadLetterTargetArn")
            .and_then(|v| v.as_str())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                PolicyError::Invalid("RedrivePolicy must contain deadLetterTargetArn".into())
            })?
            .to_string();
        // Clients send the count both as a number and as a quoted string.
        let max_count = v
            .get("maxReceiveCount")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| {
                PolicyError::Invalid("RedrivePolicy must contain maxReceiveCount".into())
            })?;
        if !(1..=1000).contains(&max_count) {
            return Err(PolicyError::Invalid(
                "maxReceiveCount must be between 1 and 1000".into(),
            ));
        }
        Ok(RedrivePolicy {
            dead_letter_target_arn: arn,
            max_receive_count: max_count as u32,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "deadLetterTargetArn": self.dead_letter_target_arn,
            "maxReceiveCount": self.max_receive_count,
        })
        .to_string()
    }

    /// Name of the dead-letter queue, taken from the last ARN segment.
    pub fn target_queue_name(&self) -> &str {
        self.dead_letter_target_arn
            .rsplit(':')
            .next()
            .unwrap_or_default()
    }
}

/// Advisory only: stored and echoed back, never enforced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedriveAllowPolicy {
    pub redrive_permission: String,
    pub source_queue_arns: Option<Vec<String>>,
}

impl RedriveAllowPolicy {
    pub fn from_json(s: &str) -> Result<Self, PolicyError> {
        let v = parse_document("RedriveAllowPolicy", s)?;
        let perm = v
            .get("redrivePermission")
            .and_then(|v| v.as_str())
            .unwrap_or("allowAll")
            .to_string();
        if !matches!(perm.as_str(), "allowAll" | "denyAll" | "byQueue") {
            return Err(PolicyError::Invalid(format!(
                "Unknown redrivePermission: {perm}"
            )));
        }
        let arns = v.get("sourceQueueArns").and_then(|v| {
            v.as_array().map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
        });
        Ok(RedriveAllowPolicy {
            redrive_permission: perm,
            source_queue_arns: arns,
        })
    }

    pub fn to_json(&self) -> String {
        let mut m = serde_json::Map::new();
        m.insert(
            "redrivePermission".into(),
            Value::String(self.redrive_permission.clone()),
        );
        if let Some(ref arns) = self.source_queue_arns {
            m.insert(
                "sourceQueueArns".into(),
                Value::Array(arns.iter().cloned().map(Value::String).collect()),
            );
        }
        Value::Object(m).to_string()
    }
}

/// Values accepted for one filter key. Entries written as JSON numbers are
/// kept apart so only they take part in numeric comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptedValues {
    strings: BTreeSet<String>,
    numbers: BTreeSet<String>,
}

impl AcceptedValues {
    /// Exact membership against every accepted entry's text.
    pub fn contains(&self, value: &str) -> bool {
        self.strings.contains(value) || self.numbers.contains(value)
    }

    /// Numeric equality against the entries that were JSON numbers.
    pub fn contains_number(&self, value: f64) -> bool {
        self.numbers
            .iter()
            .filter_map(|n| n.parse::<f64>().ok())
            .any(|n| n == value)
    }
}

/// Subscription filter: attribute name to the set of accepted values.
///
/// The original document text is kept so `GetSubscriptionAttributes` returns
/// exactly what the client set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPolicy {
    raw: String,
    rules: BTreeMap<String, AcceptedValues>,
}

impl FilterPolicy {
    pub fn from_json(s: &str) -> Result<Self, PolicyError> {
        let v = parse_document("FilterPolicy", s)?;
        let obj = v
            .as_object()
            .ok_or_else(|| PolicyError::Invalid("FilterPolicy must be a JSON object".into()))?;

        let mut rules = BTreeMap::new();
        for (name, accepted) in obj {
            let values = accepted.as_array().ok_or_else(|| {
                PolicyError::Invalid(format!(
                    "FilterPolicy rule for {name} must be an array of values"
                ))
            })?;
            let mut set = AcceptedValues::default();
            for value in values {
                match value {
                    Value::String(s) => {
                        set.strings.insert(s.clone());
                    }
                    Value::Number(n) => {
                        set.numbers.insert(n.to_string());
                    }
                    other => {
                        return Err(PolicyError::Invalid(format!(
                            "Unsupported FilterPolicy value for {name}: {other}"
                        )));
                    }
                }
            }
            rules.insert(name.clone(), set);
        }

        Ok(FilterPolicy {
            raw: s.to_string(),
            rules,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn rules(&self) -> &BTreeMap<String, AcceptedValues> {
        &self.rules
    }
}
