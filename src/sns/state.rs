use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::delivery::{DeliveryError, Dispatcher, Notification};
use super::error::SnsError;
use super::filter;
use super::topic::{Protocol, Subscription, Topic};
use super::types::*;
use crate::batch::{validate_entries, BatchOutcome};
use crate::config::Environment;
use crate::sqs::SqsState;

const MAX_MESSAGE_BYTES: usize = 262144;
const PAGE_SIZE: usize = 100;

#[derive(Default)]
struct SnsStateInner {
    topics: HashMap<String, Topic>,
}

impl SnsStateInner {
    fn topic(&self, arn: &str) -> Result<&Topic, SnsError> {
        self.topics
            .get(SnsState::topic_name(arn))
            .filter(|t| t.arn == arn)
            .ok_or_else(SnsError::topic_not_found)
    }

    fn topic_mut(&mut self, arn: &str) -> Result<&mut Topic, SnsError> {
        self.topics
            .get_mut(SnsState::topic_name(arn))
            .filter(|t| t.arn == arn)
            .ok_or_else(SnsError::topic_not_found)
    }

    fn subscription_mut(&mut self, arn: &str) -> Result<&mut Subscription, SnsError> {
        self.topics
            .values_mut()
            .flat_map(|t| t.subscriptions.iter_mut())
            .find(|s| s.arn == arn)
            .ok_or_else(SnsError::subscription_not_found)
    }
}

/// The topic registry and publish engine. Queue deliveries go through the
/// shared queue registry by ARN.
pub struct SnsState {
    inner: RwLock<SnsStateInner>,
    env: Arc<Environment>,
    dispatcher: Dispatcher,
}

impl SnsState {
    pub fn new(env: Arc<Environment>, sqs: Arc<SqsState>) -> Result<Self, DeliveryError> {
        let dispatcher = Dispatcher::new(sqs, &env)?;
        Ok(SnsState {
            inner: RwLock::new(SnsStateInner::default()),
            env,
            dispatcher,
        })
    }

    fn topic_name(arn: &str) -> &str {
        arn.rsplit(':').next().unwrap_or(arn)
    }

    fn validate_message(message: &str) -> Result<(), SnsError> {
        if message.is_empty() {
            return Err(SnsError::InvalidParameter(
                "Invalid parameter: Empty message".into(),
            ));
        }
        if message.len() > MAX_MESSAGE_BYTES {
            return Err(SnsError::InvalidParameter(format!(
                "Invalid parameter: Message too long. Must be at most {MAX_MESSAGE_BYTES} bytes"
            )));
        }
        Ok(())
    }

    fn page<T: Clone>(items: &[T], next_token: Option<&str>) -> Result<(Vec<T>, Option<String>), SnsError> {
        let start = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| SnsError::InvalidParameter("Invalid parameter: NextToken".into()))?,
            None => 0,
        };
        let end = (start + PAGE_SIZE).min(items.len());
        let page = items.get(start..end).unwrap_or_default().to_vec();
        let next = (end < items.len()).then(|| end.to_string());
        Ok((page, next))
    }

    // --- Topic operations ---

    pub async fn create_topic(
        &self,
        req: CreateTopicRequest,
    ) -> Result<CreateTopicResponse, SnsError> {
        if req.name.is_empty()
            || req.name.len() > 256
            || !req
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SnsError::InvalidParameter(
                "Invalid parameter: Topic Name".into(),
            ));
        }

        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.topics.get(&req.name) {
            return Ok(CreateTopicResponse {
                topic_arn: existing.arn.clone(),
            });
        }

        let arn = self.env.topic_arn(&req.name);
        let mut topic = Topic::new(req.name.clone(), arn.clone(), self.env.account_id.clone());
        for (key, value) in req.attributes.unwrap_or_default() {
            topic.set_attribute(&key, value)?;
        }

        info!(topic = %req.name, "Topic created");
        inner.topics.insert(req.name, topic);
        Ok(CreateTopicResponse { topic_arn: arn })
    }

    pub async fn delete_topic(&self, req: DeleteTopicRequest) -> Result<(), SnsError> {
        let mut inner = self.inner.write().await;
        let name = inner.topic(&req.topic_arn)?.name.clone();
        inner.topics.remove(&name);
        info!(topic = %name, "Topic deleted");
        Ok(())
    }

    pub async fn list_topics(
        &self,
        req: ListTopicsRequest,
    ) -> Result<ListTopicsResponse, SnsError> {
        let inner = self.inner.read().await;
        let mut arns: Vec<String> = inner.topics.values().map(|t| t.arn.clone()).collect();
        arns.sort();

        let (page, next_token) = Self::page(&arns, req.next_token.as_deref())?;
        Ok(ListTopicsResponse {
            topics: page
                .into_iter()
                .map(|topic_arn| TopicArnEntry { topic_arn })
                .collect(),
            next_token,
        })
    }

    pub async fn get_topic_attributes(
        &self,
        req: GetTopicAttributesRequest,
    ) -> Result<GetTopicAttributesResponse, SnsError> {
        let inner = self.inner.read().await;
        Ok(GetTopicAttributesResponse {
            attributes: inner.topic(&req.topic_arn)?.attributes(),
        })
    }

    pub async fn set_topic_attributes(
        &self,
        req: SetTopicAttributesRequest,
    ) -> Result<(), SnsError> {
        let mut inner = self.inner.write().await;
        inner
            .topic_mut(&req.topic_arn)?
            .set_attribute(&req.attribute_name, req.attribute_value.unwrap_or_default())
    }

    // --- Subscription operations ---

    pub async fn subscribe(
        &self,
        req: SubscribeRequest,
    ) -> Result<SubscribeResponse, SnsError> {
        let protocol: Protocol = req.protocol.parse()?;
        let endpoint = req
            .endpoint
            .filter(|e| !e.is_empty())
            .ok_or_else(|| SnsError::InvalidParameter("Invalid parameter: Endpoint".into()))?;
        let endpoint = match protocol {
            Protocol::Sqs => self.env.queue_arn_for_endpoint(&endpoint),
            Protocol::Http | Protocol::Https => {
                if !endpoint.starts_with(&format!("{protocol}://")) {
                    return Err(SnsError::InvalidParameter(format!(
                        "Invalid parameter: Endpoint must match the {protocol} protocol"
                    )));
                }
                endpoint
            }
        };

        let mut inner = self.inner.write().await;
        let topic = inner.topic_mut(&req.topic_arn)?;

        if let Some(existing) = topic.find_subscription(protocol, &endpoint) {
            return Ok(SubscribeResponse {
                subscription_arn: existing.arn.clone(),
            });
        }

        let mut sub = Subscription::new(&topic.arn, protocol, endpoint, self.env.account_id.clone());
        for (key, value) in req.attributes.unwrap_or_default() {
            sub.set_attribute(&key, &value)?;
        }

        info!(topic = %topic.name, subscription = %sub.arn, protocol = %protocol,
            endpoint = %sub.endpoint, "Subscription created");
        let arn = sub.arn.clone();
        topic.subscriptions.push(sub);
        Ok(SubscribeResponse {
            subscription_arn: arn,
        })
    }

    pub async fn unsubscribe(&self, req: UnsubscribeRequest) -> Result<(), SnsError> {
        let mut inner = self.inner.write().await;
        for topic in inner.topics.values_mut() {
            if let Some(pos) = topic
                .subscriptions
                .iter()
                .position(|s| s.arn == req.subscription_arn)
            {
                topic.subscriptions.remove(pos);
                info!(topic = %topic.name, subscription = %req.subscription_arn,
                    "Subscription removed");
                return Ok(());
            }
        }
        Err(SnsError::subscription_not_found())
    }

    pub async fn list_subscriptions(
        &self,
        req: ListSubscriptionsRequest,
    ) -> Result<ListSubscriptionsResponse, SnsError> {
        let inner = self.inner.read().await;
        let mut topics: Vec<&Topic> = inner.topics.values().collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        let entries: Vec<SubscriptionEntry> = topics
            .iter()
            .flat_map(|t| t.subscriptions.iter().map(Subscription::entry))
            .collect();

        let (subscriptions, next_token) = Self::page(&entries, req.next_token.as_deref())?;
        Ok(ListSubscriptionsResponse {
            subscriptions,
            next_token,
        })
    }

    pub async fn list_subscriptions_by_topic(
        &self,
        req: ListSubscriptionsByTopicRequest,
    ) -> Result<ListSubscriptionsResponse, SnsError> {
        let inner = self.inner.read().await;
        let entries: Vec<SubscriptionEntry> = inner
            .topic(&req.topic_arn)?
            .subscriptions
            .iter()
            .map(Subscription::entry)
            .collect();

        let (subscriptions, next_token) = Self::page(&entries, req.next_token.as_deref())?;
        Ok(ListSubscriptionsResponse {
            subscriptions,
            next_token,
        })
    }

    pub async fn get_subscription_attributes(
        &self,
        req: GetSubscriptionAttributesRequest,
    ) -> Result<GetSubscriptionAttributesResponse, SnsError> {
        let inner = self.inner.read().await;
        inner
            .topics
            .values()
            .flat_map(|t| t.subscriptions.iter())
            .find(|s| s.arn == req.subscription_arn)
            .map(|s| GetSubscriptionAttributesResponse {
                attributes: s.attributes(),
            })
            .ok_or_else(SnsError::subscription_not_found)
    }

    pub async fn set_subscription_attributes(
        &self,
        req: SetSubscriptionAttributesRequest,
    ) -> Result<(), SnsError> {
        let mut inner = self.inner.write().await;
        let sub = inner.subscription_mut(&req.subscription_arn)?;
        sub.set_attribute(
            &req.attribute_name,
            req.attribute_value.as_deref().unwrap_or_default(),
        )
    }

    // --- Publish ---

    /// Snapshot of a topic's subscriptions so that delivery runs without
    /// holding the registry lock.
    async fn subscriptions_of(&self, topic_arn: &str) -> Result<Vec<Subscription>, SnsError> {
        let inner = self.inner.read().await;
        Ok(inner.topic(topic_arn)?.subscriptions.clone())
    }

    async fn fan_out(&self, subscriptions: &[Subscription], notification: &Notification) -> usize {
        let mut delivered = 0;
        for sub in subscriptions
            .iter()
            .filter(|s| filter::matches(s.filter_policy.as_ref(), &notification.attributes))
        {
            match self.dispatcher.deliver(sub, notification).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(subscription = %sub.arn, endpoint = %sub.endpoint,
                        message_id = %notification.message_id, error = %e, "Delivery failed");
                }
            }
        }
        delivered
    }

    pub async fn publish(&self, req: PublishRequest) -> Result<PublishResponse, SnsError> {
        let topic_arn = req
            .topic_arn
            .or(req.target_arn)
            .ok_or_else(|| SnsError::InvalidParameter("Invalid parameter: TopicArn".into()))?;
        Self::validate_message(&req.message)?;
        let subscriptions = self.subscriptions_of(&topic_arn).await?;

        let notification = Notification::new(
            Uuid::new_v4().to_string(),
            topic_arn,
            req.subject,
            req.message,
            req.message_attributes.unwrap_or_default(),
        );
        let delivered = self.fan_out(&subscriptions, &notification).await;
        info!(topic = %notification.topic_arn, message_id = %notification.message_id,
            delivered, "Message published");

        Ok(PublishResponse {
            message_id: notification.message_id,
        })
    }

    pub async fn publish_batch(
        &self,
        req: PublishBatchRequest,
    ) -> Result<PublishBatchResponse, SnsError> {
        validate_entries(&req.publish_batch_request_entries)?;
        let subscriptions = self.subscriptions_of(&req.topic_arn).await?;

        let mut outcome = BatchOutcome::default();
        for entry in req.publish_batch_request_entries {
            if let Err(e) = Self::validate_message(&entry.message) {
                outcome.fail(entry.id, e.code(), e.message());
                continue;
            }
            let notification = Notification::new(
                Uuid::new_v4().to_string(),
                req.topic_arn.clone(),
                entry.subject,
                entry.message,
                entry.message_attributes.unwrap_or_default(),
            );
            let delivered = self.fan_out(&subscriptions, &notification).await;
            info!(topic = %req.topic_arn, message_id = %notification.message_id,
                delivered, "Batch entry published");
            outcome.succeed(PublishBatchResultEntry {
                id: entry.id,
                message_id: notification.message_id,
            });
        }

        Ok(outcome)
    }

    /// Drops every topic and subscription.
    pub async fn clear(&self) {
        self.inner.write().await.topics.clear();
    }
}
