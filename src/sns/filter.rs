//! Subscription filter evaluation over message attributes.

use std::collections::HashMap;

use serde_json::Value;

use super::types::MessageAttributeValue;
use crate::policy::{AcceptedValues, FilterPolicy};

/// Decides whether a message with `attrs` should reach a subscription.
///
/// No policy matches everything. Otherwise every policy key must name an
/// attribute whose value is among the accepted ones.
pub fn matches(policy: Option<&FilterPolicy>, attrs: &HashMap<String, MessageAttributeValue>) -> bool {
    let Some(policy) = policy else {
        return true;
    };
    policy.rules().iter().all(|(name, accepted)| {
        attrs
            .get(name)
            .map(|attr| attribute_matches(attr, accepted))
            .unwrap_or(false)
    })
}

fn attribute_matches(attr: &MessageAttributeValue, accepted: &AcceptedValues) -> bool {
    let Some(value) = attr.string_value.as_deref() else {
        return false;
    };
    if attr.data_type.starts_with("String.Array") {
        return match serde_json::from_str::<Value>(value) {
            Ok(Value::Array(items)) => items.iter().any(|item| match item {
                Value::String(s) => accepted.contains(s),
                Value::Number(n) => n.as_f64().is_some_and(|n| accepted.contains_number(n)),
                _ => false,
            }),
            _ => false,
        };
    }
    if accepted.contains(value) {
        return true;
    }
    // Only Number attributes against numeric policy entries compare by value.
    attr.data_type.starts_with("Number")
        && value
            .parse::<f64>()
            .is_ok_and(|n| accepted.contains_number(n))
}
