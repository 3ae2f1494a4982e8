//! Rendering and dispatch of published messages to subscriptions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::Engine;
use chrono::{SecondsFormat, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use super::topic::{Protocol, Subscription};
use super::types::MessageAttributeValue;
use crate::config::Environment;
use crate::sqs::{SqsError, SqsState};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("queue delivery failed: {0}")]
    Queue(#[from] SqsError),
    #[error("http delivery failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint answered with status {0}")]
    Status(reqwest::StatusCode),
}

/// A message accepted by a topic, before per-subscription rendering.
#[derive(Debug, Clone)]
pub struct Notification {
    pub message_id: String,
    pub topic_arn: String,
    pub subject: Option<String>,
    pub message: String,
    pub attributes: HashMap<String, MessageAttributeValue>,
    pub timestamp: String,
}

impl Notification {
    pub fn new(
        message_id: String,
        topic_arn: String,
        subject: Option<String>,
        message: String,
        attributes: HashMap<String, MessageAttributeValue>,
    ) -> Self {
        Notification {
            message_id,
            topic_arn,
            subject,
            message,
            attributes,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Serialize)]
struct EnvelopeAttribute<'a> {
    #[serde(rename = "Type")]
    data_type: &'a str,
    #[serde(rename = "Value")]
    value: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope<'a> {
    #[serde(rename = "Type")]
    kind: &'static str,
    message_id: &'a str,
    topic_arn: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    message: &'a str,
    timestamp: &'a str,
    signature_version: &'static str,
    signature: String,
    #[serde(rename = "SigningCertURL")]
    signing_cert_url: String,
    #[serde(rename = "UnsubscribeURL")]
    unsubscribe_url: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    message_attributes: BTreeMap<&'a str, EnvelopeAttribute<'a>>,
}

/// Emulated signature: base64 SHA-256 over the canonical notification
/// fields. Stable for a given notification but not verifiable.
fn emulated_signature(n: &Notification) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in [
        ("Message", Some(n.message.as_str())),
        ("MessageId", Some(n.message_id.as_str())),
        ("Subject", n.subject.as_deref()),
        ("Timestamp", Some(n.timestamp.as_str())),
        ("TopicArn", Some(n.topic_arn.as_str())),
        ("Type", Some("Notification")),
    ] {
        if let Some(value) = value {
            hasher.update(key.as_bytes());
            hasher.update(b"\n");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
    }
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Renders the JSON notification envelope for an enveloped delivery.
pub fn render_envelope(n: &Notification, subscription_arn: &str, env: &Environment) -> String {
    let base = env.sns_base_url();
    let message_attributes = n
        .attributes
        .iter()
        .map(|(name, attr)| {
            let value = if attr.is_binary() {
                attr.binary_value.as_deref()
            } else {
                attr.string_value.as_deref()
            };
            (
                name.as_str(),
                EnvelopeAttribute {
                    data_type: &attr.data_type,
                    value: value.unwrap_or_default(),
                },
            )
        })
        .collect();

    let envelope = Envelope {
        kind: "Notification",
        message_id: &n.message_id,
        topic_arn: &n.topic_arn,
        subject: n.subject.as_deref(),
        message: &n.message,
        timestamp: &n.timestamp,
        signature_version: "1",
        signature: emulated_signature(n),
        signing_cert_url: format!("{base}/SimpleNotificationService-local.pem"),
        unsubscribe_url: format!(
            "{base}/?Action=Unsubscribe&SubscriptionArn={}",
            utf8_percent_encode(subscription_arn, NON_ALPHANUMERIC)
        ),
        message_attributes,
    };
    // Serializing a struct of strings and string maps cannot fail.
    serde_json::to_string(&envelope).unwrap_or_default()
}

/// Performs the per-protocol send for one subscription.
pub struct Dispatcher {
    sqs: Arc<SqsState>,
    client: Client,
}

impl Dispatcher {
    pub fn new(sqs: Arc<SqsState>, env: &Environment) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(env.delivery_timeout)
            .build()
            .map_err(DeliveryError::Http)?;
        Ok(Dispatcher { sqs, client })
    }

    pub async fn deliver(&self, sub: &Subscription, n: &Notification) -> Result<(), DeliveryError> {
        let payload = if sub.raw_message_delivery {
            n.message.clone()
        } else {
            render_envelope(n, &sub.arn, self.sqs.env())
        };

        match sub.protocol {
            Protocol::Sqs => {
                let attributes = if sub.raw_message_delivery {
                    n.attributes.clone()
                } else {
                    HashMap::new()
                };
                let resp = self.sqs.send_to_arn(&sub.endpoint, payload, attributes).await?;
                debug!(subscription = %sub.arn, queue = %sub.endpoint,
                    message_id = %resp.message_id, "Delivered to queue");
            }
            Protocol::Http | Protocol::Https => {
                let mut request = self
                    .client
                    .post(&sub.endpoint)
                    .header("content-type", "text/plain; charset=UTF-8")
                    .header("x-amz-sns-message-type", "Notification")
                    .header("x-amz-sns-message-id", &n.message_id)
                    .header("x-amz-sns-topic-arn", &n.topic_arn)
                    .header("x-amz-sns-subscription-arn", &sub.arn);
                if sub.raw_message_delivery {
                    request = request.header("x-amz-sns-rawdelivery", "true");
                }
                let response = request.body(payload).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(DeliveryError::Status(status));
                }
                debug!(subscription = %sub.arn, endpoint = %sub.endpoint,
                    status = status.as_u16(), "Delivered to endpoint");
            }
        }
        Ok(())
    }
}
