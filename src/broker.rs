//! The broker: both registries, the environment they were built for, and
//! the seeds they are reset to.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::{Environment, Seeds};
use crate::sns::delivery::DeliveryError;
use crate::sns::types::{CreateTopicRequest, SubscribeRequest};
use crate::sns::{self, SnsError, SnsState};
use crate::sqs::types::CreateQueueRequest;
use crate::sqs::{self, SqsError, SqsState};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to build delivery client: {0}")]
    Client(#[from] DeliveryError),
    #[error("invalid queue seed {name}: {source}")]
    QueueSeed { name: String, source: SqsError },
    #[error("invalid topic seed {name}: {source}")]
    TopicSeed { name: String, source: SnsError },
}

pub struct Broker {
    env: Arc<Environment>,
    seeds: Seeds,
    sqs: Arc<SqsState>,
    sns: Arc<SnsState>,
}

impl Broker {
    /// Builds both registries and applies `seeds`.
    pub async fn new(env: Environment, seeds: Seeds) -> Result<Self, BrokerError> {
        let env = Arc::new(env);
        let sqs = Arc::new(SqsState::new(env.clone()));
        let sns = Arc::new(SnsState::new(env.clone(), sqs.clone())?);
        let broker = Broker {
            env,
            seeds,
            sqs,
            sns,
        };
        broker.apply_seeds().await?;
        Ok(broker)
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn sqs(&self) -> Arc<SqsState> {
        self.sqs.clone()
    }

    pub fn sns(&self) -> Arc<SnsState> {
        self.sns.clone()
    }

    pub fn sqs_router(&self) -> Router {
        sqs::server::create_router(self.sqs())
    }

    pub fn sns_router(&self) -> Router {
        sns::server::create_router(self.sns())
    }

    /// Clears every queue, topic and subscription, then re-applies the seeds.
    pub async fn reset(&self) -> Result<(), BrokerError> {
        self.sns.clear().await;
        self.sqs.clear().await;
        self.apply_seeds().await?;
        info!("Broker reset to seeded state");
        Ok(())
    }

    async fn apply_seeds(&self) -> Result<(), BrokerError> {
        for seed in &self.seeds.queues {
            let req = CreateQueueRequest {
                queue_name: seed.name.clone(),
                attributes: (!seed.attributes.is_empty()).then(|| seed.attributes.clone()),
            };
            self.sqs
                .create_queue(req)
                .await
                .map_err(|source| BrokerError::QueueSeed {
                    name: seed.name.clone(),
                    source,
                })?;
        }

        for seed in &self.seeds.topics {
            let topic_err = |source| BrokerError::TopicSeed {
                name: seed.name.clone(),
                source,
            };
            let topic_arn = self
                .sns
                .create_topic(CreateTopicRequest {
                    name: seed.name.clone(),
                    attributes: None,
                })
                .await
                .map_err(topic_err)?
                .topic_arn;

            for sub in &seed.subscriptions {
                let mut attributes = HashMap::new();
                attributes.insert("RawMessageDelivery".to_string(), sub.raw.to_string());
                if let Some(ref fp) = sub.filter_policy {
                    attributes.insert("FilterPolicy".to_string(), fp.clone());
                }
                self.sns
                    .subscribe(SubscribeRequest {
                        topic_arn: topic_arn.clone(),
                        protocol: sub.protocol.clone(),
                        endpoint: Some(sub.endpoint.clone()),
                        attributes: Some(attributes),
                    })
                    .await
                    .map_err(topic_err)?;
            }
        }

        debug!(
            queues = self.seeds.queues.len(),
            topics = self.seeds.topics.len(),
            "Seeds applied"
        );
        Ok(())
    }

    /// Starts the background task that expires visibility windows, performs
    /// redrive and prunes dedup entries even when no client is polling.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let sqs = self.sqs.clone();
        let every = self.env.sweep_interval;
        tokio::spawn(async move {
            info!(interval_ms = every.as_millis() as u64, "Starting visibility sweeper");
            let mut interval = time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                sqs.sweep().await;
            }
        })
    }
}
