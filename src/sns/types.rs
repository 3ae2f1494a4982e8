use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::batch::{BatchEntry, BatchOutcome};
pub use crate::sqs::types::MessageAttributeValue;

// --- CreateTopic ---

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct CreateTopicRequest {
    pub name: String,
    #[serde(default)]
    pub attributes: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateTopicResponse {
    pub topic_arn: String,
}

// --- DeleteTopic ---

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteTopicRequest {
    pub topic_arn: String,
}

// --- ListTopics ---

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ListTopicsRequest {
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListTopicsResponse {
    pub topics: Vec<TopicArnEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopicArnEntry {
    pub topic_arn: String,
}

// --- GetTopicAttributes ---

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GetTopicAttributesRequest {
    pub topic_arn: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetTopicAttributesResponse {
    pub attributes: HashMap<String, String>,
}

// --- SetTopicAttributes ---

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct SetTopicAttributesRequest {
    pub topic_arn: String,
    pub attribute_name: String,
    #[serde(default)]
    pub attribute_value: Option<String>,
}

// --- Subscribe ---

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct SubscribeRequest {
    pub topic_arn: String,
    pub protocol: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub attributes: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscribeResponse {
    pub subscription_arn: String,
}

// --- Unsubscribe ---

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct UnsubscribeRequest {
    pub subscription_arn: String,
}

// --- ListSubscriptions / ListSubscriptionsByTopic ---

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ListSubscriptionsRequest {
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ListSubscriptionsByTopicRequest {
    pub topic_arn: String,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListSubscriptionsResponse {
    pub subscriptions: Vec<SubscriptionEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SubscriptionEntry {
    pub subscription_arn: String,
    pub owner: String,
    pub protocol: String,
    pub endpoint: String,
    pub topic_arn: String,
}

// --- GetSubscriptionAttributes ---

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GetSubscriptionAttributesRequest {
    pub subscription_arn: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetSubscriptionAttributesResponse {
    pub attributes: HashMap<String, String>,
}

// --- SetSubscriptionAttributes ---

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct SetSubscriptionAttributesRequest {
    pub subscription_arn: String,
    pub attribute_name: String,
    #[serde(default)]
    pub attribute_value: Option<String>,
}

// --- Publish ---

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct PublishRequest {
    #[serde(default)]
    pub topic_arn: Option<String>,
    #[serde(default)]
    pub target_arn: Option<String>,
    pub message: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message_attributes: Option<HashMap<String, MessageAttributeValue>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublishResponse {
    pub message_id: String,
}

// --- PublishBatch ---

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct PublishBatchRequest {
    pub topic_arn: String,
    pub publish_batch_request_entries: Vec<PublishBatchEntry>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct PublishBatchEntry {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message_attributes: Option<HashMap<String, MessageAttributeValue>>,
}

impl BatchEntry for PublishBatchEntry {
    fn entry_id(&self) -> &str {
        &self.id
    }
}

pub type PublishBatchResponse = BatchOutcome<PublishBatchResultEntry>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublishBatchResultEntry {
    pub id: String,
    pub message_id: String,
}
