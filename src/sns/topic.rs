use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use super::error::SnsError;
use super::types::SubscriptionEntry;
use crate::policy::{self, FilterPolicy};

/// Delivery protocols the broker can fan out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Sqs,
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Sqs => "sqs",
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl FromStr for Protocol {
    type Err = SnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqs" => Ok(Protocol::Sqs),
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(SnsError::InvalidParameter(format!(
                "Invalid parameter: Protocol. Unsupported protocol: {other}"
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Topic {
    pub name: String,
    pub arn: String,
    pub owner: String,
    pub display_name: String,
    pub policy: Option<String>,
    pub delivery_policy: Option<String>,
    pub subscriptions: Vec<Subscription>,
}

impl Topic {
    pub fn new(name: String, arn: String, owner: String) -> Self {
        Topic {
            name,
            arn,
            owner,
            display_name: String::new(),
            policy: None,
            delivery_policy: None,
            subscriptions: Vec::new(),
        }
    }

    pub fn attributes(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("TopicArn".into(), self.arn.clone());
        m.insert("DisplayName".into(), self.display_name.clone());
        m.insert("Owner".into(), self.owner.clone());
        m.insert(
            "SubscriptionsConfirmed".into(),
            self.subscriptions.len().to_string(),
        );
        m.insert("SubscriptionsPending".into(), "0".into());
        m.insert("SubscriptionsDeleted".into(), "0".into());
        if let Some(ref p) = self.policy {
            m.insert("Policy".into(), p.clone());
        }
        if let Some(ref dp) = self.delivery_policy {
            m.insert("DeliveryPolicy".into(), dp.clone());
        }
        m
    }

    pub fn set_attribute(&mut self, name: &str, value: String) -> Result<(), SnsError> {
        match name {
            "DisplayName" => self.display_name = value,
            "Policy" | "DeliveryPolicy" => {
                let doc = if value.is_empty() {
                    None
                } else {
                    policy::validate_opaque(
                        if name == "Policy" { "Policy" } else { "DeliveryPolicy" },
                        &value,
                    )?;
                    Some(value)
                };
                if name == "Policy" {
                    self.policy = doc;
                } else {
                    self.delivery_policy = doc;
                }
            }
            _ => {
                return Err(SnsError::InvalidParameter(format!(
                    "Invalid parameter: AttributeName {name}"
                )));
            }
        }
        Ok(())
    }

    pub fn find_subscription(&self, protocol: Protocol, endpoint: &str) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.protocol == protocol && s.endpoint == endpoint)
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub arn: String,
    pub topic_arn: String,
    pub protocol: Protocol,
    /// Queue ARN for `sqs`, target URL otherwise.
    pub endpoint: String,
    pub owner: String,
    pub raw_message_delivery: bool,
    pub filter_policy: Option<FilterPolicy>,
}

impl Subscription {
    pub fn new(topic_arn: &str, protocol: Protocol, endpoint: String, owner: String) -> Self {
        Subscription {
            arn: format!("{}:{}", topic_arn, Uuid::new_v4()),
            topic_arn: topic_arn.to_string(),
            protocol,
            endpoint,
            owner,
            raw_message_delivery: false,
            filter_policy: None,
        }
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) -> Result<(), SnsError> {
        match name {
            "RawMessageDelivery" => {
                self.raw_message_delivery = value.eq_ignore_ascii_case("true");
            }
            "FilterPolicy" => {
                self.filter_policy = if value.is_empty() {
                    None
                } else {
                    Some(FilterPolicy::from_json(value)?)
                };
            }
            // Only attribute-scoped filtering is evaluated.
            "FilterPolicyScope" if value == "MessageAttributes" => {}
            _ => {
                return Err(SnsError::InvalidParameter(format!(
                    "Invalid parameter: Attributes Reason: Unsupported attribute {name}={value}"
                )));
            }
        }
        Ok(())
    }

    pub fn attributes(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("SubscriptionArn".into(), self.arn.clone());
        m.insert("TopicArn".into(), self.topic_arn.clone());
        m.insert("Protocol".into(), self.protocol.to_string());
        m.insert("Endpoint".into(), self.endpoint.clone());
        m.insert("Owner".into(), self.owner.clone());
        m.insert("ConfirmationWasAuthenticated".into(), "true".into());
        m.insert("PendingConfirmation".into(), "false".into());
        m.insert(
            "RawMessageDelivery".into(),
            self.raw_message_delivery.to_string(),
        );
        if let Some(ref fp) = self.filter_policy {
            m.insert("FilterPolicy".into(), fp.as_str().to_string());
            m.insert("FilterPolicyScope".into(), "MessageAttributes".into());
        }
        m
    }

    pub fn entry(&self) -> SubscriptionEntry {
        SubscriptionEntry {
            subscription_arn: self.arn.clone(),
            owner: self.owner.clone(),
            protocol: self.protocol.to_string(),
            endpoint: self.endpoint.clone(),
            topic_arn: self.topic_arn.clone(),
        }
    }
}
