use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::SqsError;
use super::queue::{DedupSettings, DlqRedrive, Queue, QueueAttributes};
use super::types::*;
use crate::batch::{validate_entries, BatchOutcome, BatchResultEntry};
use crate::config::Environment;

/// Upper bound on a single long-poll sleep between registry checks.
const LONG_POLL_SLICE: Duration = Duration::from_millis(100);
const MAX_WAIT_TIME_SECONDS: i32 = 20;

struct QueueEntry {
    queue: Queue,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct SqsStateInner {
    queues: HashMap<String, QueueEntry>,
}

impl SqsStateInner {
    fn queue_mut(&mut self, name: &str) -> Result<&mut QueueEntry, SqsError> {
        self.queues.get_mut(name).ok_or_else(SqsError::queue_not_found)
    }

    fn queue(&self, name: &str) -> Result<&QueueEntry, SqsError> {
        self.queues.get(name).ok_or_else(SqsError::queue_not_found)
    }

    /// Ends expired visibility windows on every queue and relocates
    /// exhausted messages to their dead-letter queues.
    fn reclaim_all(&mut self) {
        let mut redrives: Vec<(String, DlqRedrive)> = Vec::new();
        for (name, entry) in self.queues.iter_mut() {
            let inflight_before = entry.queue.inflight_count();
            let moved = entry.queue.reclaim_expired();
            if entry.queue.inflight_count() < inflight_before {
                entry.notify.notify_waiters();
            }
            redrives.extend(moved.into_iter().map(|r| (name.clone(), r)));
        }
        for (source, redrive) in redrives {
            self.route_redrive(&source, redrive);
        }
    }

    fn route_redrive(&mut self, source: &str, redrive: DlqRedrive) {
        let message_id = redrive.message.message_id.clone();
        if let Some(dlq) = self.queues.get_mut(&redrive.dlq_name) {
            info!(source = %source, dlq = %redrive.dlq_name, message_id = %message_id,
                "Message moved to dead-letter queue");
            dlq.queue.accept_redriven(redrive.message);
            dlq.notify.notify_waiters();
        } else if let Some(src) = self.queues.get_mut(source) {
            warn!(source = %source, dlq = %redrive.dlq_name, message_id = %message_id,
                "Dead-letter queue does not exist, keeping message in source queue");
            src.queue.messages.push_back(redrive.message);
        }
    }
}

/// The queue registry. One lock guards every queue so that receives on the
/// same queue never hand out the same message twice.
pub struct SqsState {
    inner: RwLock<SqsStateInner>,
    env: Arc<Environment>,
}

impl SqsState {
    pub fn new(env: Arc<Environment>) -> Self {
        SqsState {
            inner: RwLock::new(SqsStateInner::default()),
            env,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    fn dedup_settings(&self) -> DedupSettings {
        DedupSettings {
            enabled: self.env.deduplication,
            window: self.env.dedup_window,
        }
    }

    fn resolve_queue_name(queue_url: &str) -> Result<String, SqsError> {
        queue_url
            .split('/')
            .last()
            .filter(|s| !s.is_empty())
            .map(String::from)
            .ok_or_else(SqsError::queue_not_found)
    }

    fn validate_queue_name(name: &str, is_fifo: bool) -> Result<(), SqsError> {
        if name.is_empty() || name.len() > 80 {
            return Err(SqsError::InvalidParameterValue(
                "Queue name must be 1-80 characters".into(),
            ));
        }
        let stem = name.strip_suffix(".fifo").unwrap_or(name);
        let valid = stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SqsError::InvalidParameterValue(
                "Queue name can only contain alphanumeric characters, hyphens, and underscores"
                    .into(),
            ));
        }
        if is_fifo && !name.ends_with(".fifo") {
            return Err(SqsError::InvalidParameterValue(
                "FIFO queue name must end with .fifo".into(),
            ));
        }
        Ok(())
    }

    pub async fn create_queue(
        &self,
        req: CreateQueueRequest,
    ) -> Result<CreateQueueResponse, SqsError> {
        let mut inner = self.inner.write().await;

        let requested_fifo = req
            .attributes
            .as_ref()
            .and_then(|a| a.get("FifoQueue"))
            .map(|v| v == "true")
            .unwrap_or(false);
        let is_fifo = requested_fifo || req.queue_name.ends_with(".fifo");

        Self::validate_queue_name(&req.queue_name, requested_fifo)?;

        if let Some(entry) = inner.queues.get(&req.queue_name) {
            if let Some(ref attrs) = req.attributes {
                let mut requested = QueueAttributes {
                    fifo_queue: is_fifo,
                    ..QueueAttributes::default()
                };
                requested.apply(attrs)?;
                let existing = &entry.queue.attributes;
                if attrs
                    .keys()
                    .any(|key| !existing.same_attribute(&requested, key))
                {
                    return Err(SqsError::QueueAlreadyExists(format!(
                        "A queue named {} already exists with different attributes",
                        req.queue_name
                    )));
                }
            }
            return Ok(CreateQueueResponse {
                queue_url: entry.queue.url.clone(),
            });
        }

        let url = self.env.queue_url(&req.queue_name);
        let arn = self.env.queue_arn(&req.queue_name);

        let mut attributes = QueueAttributes {
            fifo_queue: is_fifo,
            ..QueueAttributes::default()
        };
        if let Some(mut attrs) = req.attributes {
            attrs.remove("FifoQueue");
            attributes.apply(&attrs)?;
        }

        let queue = Queue::new(req.queue_name.clone(), arn, url.clone(), attributes);
        info!(queue = %req.queue_name, fifo = is_fifo, "Queue created");
        inner.queues.insert(
            req.queue_name,
            QueueEntry {
                queue,
                notify: Arc::new(Notify::new()),
            },
        );

        Ok(CreateQueueResponse { queue_url: url })
    }

    pub async fn delete_queue(&self, req: DeleteQueueRequest) -> Result<(), SqsError> {
        let name = Self::resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.write().await;
        let entry = inner
            .queues
            .remove(&name)
            .ok_or_else(SqsError::queue_not_found)?;
        // Wake long-pollers so they observe the deletion.
        entry.notify.notify_waiters();
        info!(queue = %name, "Queue deleted");
        Ok(())
    }

    pub async fn get_queue_url(
        &self,
        req: GetQueueUrlRequest,
    ) -> Result<GetQueueUrlResponse, SqsError> {
        let inner = self.inner.read().await;
        inner.queue(&req.queue_name).map(|e| GetQueueUrlResponse {
            queue_url: e.queue.url.clone(),
        })
    }

    pub async fn list_queues(
        &self,
        req: ListQueuesRequest,
    ) -> Result<ListQueuesResponse, SqsError> {
        let max = match req.max_results {
            Some(m) if !(1..=1000).contains(&m) => {
                return Err(SqsError::InvalidParameterValue(
                    "MaxResults must be between 1 and 1000".into(),
                ));
            }
            Some(m) => m as usize,
            None => 1000,
        };
        let inner = self.inner.read().await;

        let mut names: Vec<&String> = inner.queues.keys().collect();
        names.sort();

        if let Some(ref prefix) = req.queue_name_prefix {
            names.retain(|n| n.starts_with(prefix));
        }

        let start = if let Some(ref token) = req.next_token {
            names
                .iter()
                .position(|n| n.as_str() > token.as_str())
                .unwrap_or(names.len())
        } else {
            0
        };

        let page: Vec<&String> = names[start..].iter().take(max).copied().collect();
        let next_token = if req.max_results.is_some() && start + max < names.len() {
            page.last().map(|n| (*n).clone())
        } else {
            None
        };

        Ok(ListQueuesResponse {
            queue_urls: page
                .into_iter()
                .map(|n| inner.queues[n].queue.url.clone())
                .collect(),
            next_token,
        })
    }

    pub async fn get_queue_attributes(
        &self,
        req: GetQueueAttributesRequest,
    ) -> Result<GetQueueAttributesResponse, SqsError> {
        let name = Self::resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.write().await;
        inner.reclaim_all();
        let entry = inner.queue(&name)?;
        Ok(GetQueueAttributesResponse {
            attributes: entry.queue.get_attributes(&req.attribute_names),
        })
    }

    pub async fn set_queue_attributes(
        &self,
        req: SetQueueAttributesRequest,
    ) -> Result<(), SqsError> {
        let name = Self::resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.write().await;
        let entry = inner.queue_mut(&name)?;
        entry.queue.set_attributes(&req.attributes)?;
        info!(queue = %name, "Queue attributes updated");
        Ok(())
    }

    pub async fn purge_queue(&self, req: PurgeQueueRequest) -> Result<(), SqsError> {
        let name = Self::resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.write().await;
        inner.queue_mut(&name)?.queue.purge();
        info!(queue = %name, "Queue purged");
        Ok(())
    }

    pub async fn send_message(
        &self,
        req: SendMessageRequest,
    ) -> Result<SendMessageResponse, SqsError> {
        let name = Self::resolve_queue_name(&req.queue_url)?;
        let dedup = self.dedup_settings();
        let mut inner = self.inner.write().await;
        let entry = inner.queue_mut(&name)?;
        let resp = entry.queue.send_message(
            req.message_body,
            req.delay_seconds,
            req.message_attributes,
            req.message_deduplication_id,
            req.message_group_id,
            dedup,
        )?;
        entry.notify.notify_waiters();
        debug!(queue = %name, message_id = %resp.message_id, "Message sent");
        Ok(resp)
    }

    pub async fn send_message_batch(
        &self,
        req: SendMessageBatchRequest,
    ) -> Result<SendMessageBatchResponse, SqsError> {
        validate_entries(&req.entries)?;

        let name = Self::resolve_queue_name(&req.queue_url)?;
        let dedup = self.dedup_settings();
        let mut inner = self.inner.write().await;
        let entry = inner.queue_mut(&name)?;

        let mut outcome = BatchOutcome::default();
        for e in req.entries {
            match entry.queue.send_message(
                e.message_body,
                e.delay_seconds,
                e.message_attributes,
                e.message_deduplication_id,
                e.message_group_id,
                dedup,
            ) {
                Ok(resp) => outcome.succeed(SendMessageBatchResultEntry {
                    id: e.id,
                    message_id: resp.message_id,
                    md5_of_message_body: resp.md5_of_message_body,
                    md5_of_message_attributes: resp.md5_of_message_attributes,
                    sequence_number: resp.sequence_number,
                }),
                Err(err) => outcome.fail(e.id, err.code(), err.message()),
            }
        }

        if !outcome.successful.is_empty() {
            entry.notify.notify_waiters();
        }
        debug!(queue = %name, sent = outcome.successful.len(), failed = outcome.failed.len(),
            "Message batch sent");

        Ok(outcome)
    }

    pub async fn receive_message(
        &self,
        req: ReceiveMessageRequest,
    ) -> Result<ReceiveMessageResponse, SqsError> {
        let name = Self::resolve_queue_name(&req.queue_url)?;
        let max_count = match req.max_number_of_messages {
            Some(n) if !(1..=10).contains(&n) => {
                return Err(SqsError::InvalidParameterValue(
                    "MaxNumberOfMessages must be between 1 and 10".into(),
                ));
            }
            Some(n) => n as usize,
            None => 1,
        };
        if let Some(w) = req.wait_time_seconds {
            if !(0..=MAX_WAIT_TIME_SECONDS).contains(&w) {
                return Err(SqsError::InvalidParameterValue(format!(
                    "WaitTimeSeconds must be between 0 and {MAX_WAIT_TIME_SECONDS}"
                )));
            }
        }

        let mut deadline: Option<Instant> = None;
        loop {
            let mut inner = self.inner.write().await;
            inner.reclaim_all();
            let entry = inner.queue_mut(&name)?;
            let results =
                entry
                    .queue
                    .receive_messages(max_count, req.visibility_timeout, &self.env.account_id)?;
            if !results.is_empty() {
                return Ok(ReceiveMessageResponse {
                    messages: filter_receive_results(
                        results,
                        &req.attribute_names,
                        &req.message_attribute_names,
                    ),
                });
            }

            let deadline = *deadline.get_or_insert_with(|| {
                let wait = req
                    .wait_time_seconds
                    .map(|w| w as u64)
                    .unwrap_or(entry.queue.attributes.receive_message_wait_time_seconds as u64);
                Instant::now() + Duration::from_secs(wait)
            });
            let now = Instant::now();
            if now >= deadline {
                return Ok(ReceiveMessageResponse {
                    messages: Vec::new(),
                });
            }

            // Register for the wake-up before the lock is released so a send
            // that lands in between is not missed.
            let notify = entry.notify.clone();
            let notified = notify.notified();
            drop(inner);

            let slice = (deadline - now).min(LONG_POLL_SLICE);
            let _ = tokio::time::timeout(slice, notified).await;
        }
    }

    pub async fn delete_message(&self, req: DeleteMessageRequest) -> Result<(), SqsError> {
        let name = Self::resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.write().await;
        inner.reclaim_all();
        inner.queue_mut(&name)?.queue.delete_message(&req.receipt_handle)
    }

    pub async fn delete_message_batch(
        &self,
        req: DeleteMessageBatchRequest,
    ) -> Result<DeleteMessageBatchResponse, SqsError> {
        validate_entries(&req.entries)?;

        let name = Self::resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.write().await;
        inner.reclaim_all();
        let entry = inner.queue_mut(&name)?;

        let mut outcome = BatchOutcome::default();
        for e in req.entries {
            match entry.queue.delete_message(&e.receipt_handle) {
                Ok(()) => outcome.succeed(BatchResultEntry { id: e.id }),
                Err(err) => outcome.fail(e.id, err.code(), err.message()),
            }
        }

        Ok(outcome)
    }

    pub async fn change_message_visibility(
        &self,
        req: ChangeMessageVisibilityRequest,
    ) -> Result<(), SqsError> {
        let name = Self::resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.write().await;
        inner.reclaim_all();
        let entry = inner.queue_mut(&name)?;
        entry
            .queue
            .change_message_visibility(&req.receipt_handle, req.visibility_timeout)?;
        if req.visibility_timeout == 0 {
            entry.notify.notify_waiters();
        }
        Ok(())
    }

    pub async fn change_message_visibility_batch(
        &self,
        req: ChangeMessageVisibilityBatchRequest,
    ) -> Result<ChangeMessageVisibilityBatchResponse, SqsError> {
        validate_entries(&req.entries)?;

        let name = Self::resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.write().await;
        inner.reclaim_all();
        let entry = inner.queue_mut(&name)?;

        let mut outcome = BatchOutcome::default();
        for e in req.entries {
            match entry
                .queue
                .change_message_visibility(&e.receipt_handle, e.visibility_timeout)
            {
                Ok(()) => {
                    outcome.succeed(BatchResultEntry { id: e.id })
                }
                Err(err) => outcome.fail(e.id, err.code(), err.message()),
            }
        }
        entry.notify.notify_waiters();

        Ok(outcome)
    }

    pub async fn list_dead_letter_source_queues(
        &self,
        req: ListDeadLetterSourceQueuesRequest,
    ) -> Result<ListDeadLetterSourceQueuesResponse, SqsError> {
        let name = Self::resolve_queue_name(&req.queue_url)?;
        let inner = self.inner.read().await;
        let target_arn = inner.queue(&name)?.queue.arn.clone();

        let mut source_urls: Vec<String> = inner
            .queues
            .values()
            .filter(|e| {
                e.queue
                    .attributes
                    .redrive_policy
                    .as_ref()
                    .map(|rp| rp.dead_letter_target_arn == target_arn)
                    .unwrap_or(false)
            })
            .map(|e| e.queue.url.clone())
            .collect();
        source_urls.sort();

        Ok(ListDeadLetterSourceQueuesResponse {
            queue_urls: source_urls,
        })
    }

    /// Appends a message addressed by queue ARN. Used by topic fan-out.
    pub async fn send_to_arn(
        &self,
        queue_arn: &str,
        body: String,
        attributes: HashMap<String, MessageAttributeValue>,
    ) -> Result<SendMessageResponse, SqsError> {
        let name = queue_arn
            .rsplit(':')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(SqsError::queue_not_found)?;
        let dedup = self.dedup_settings();
        let mut inner = self.inner.write().await;
        let entry = inner.queue_mut(name)?;
        if entry.queue.arn != queue_arn {
            return Err(SqsError::queue_not_found());
        }
        let attributes = (!attributes.is_empty()).then_some(attributes);
        let resp = entry
            .queue
            .send_message(body, None, attributes, None, None, dedup)?;
        entry.notify.notify_waiters();
        Ok(resp)
    }

    /// Background maintenance: visibility reclaim, redrive, dedup pruning.
    pub async fn sweep(&self) {
        let window = self.env.dedup_window;
        let mut inner = self.inner.write().await;
        inner.reclaim_all();
        for entry in inner.queues.values_mut() {
            entry.queue.prune_dedup_index(window);
        }
    }

    /// Drops every queue.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        for (_, entry) in inner.queues.drain() {
            entry.notify.notify_waiters();
        }
    }
}

fn filter_receive_results(
    results: Vec<ReceiveMessageResult>,
    attr_names: &Option<Vec<String>>,
    msg_attr_names: &Option<Vec<String>>,
) -> Vec<ReceiveMessageResult> {
    let wants_all = |names: &[String]| names.iter().any(|n| n == "All" || n == ".*");
    results
        .into_iter()
        .map(|mut r| {
            match attr_names {
                Some(names) if wants_all(names) => {}
                Some(names) => r.attributes.retain(|k, _| names.contains(k)),
                None => r.attributes.clear(),
            }

            match msg_attr_names {
                Some(names) if wants_all(names) => {}
                Some(names) => r.message_attributes.retain(|k, _| {
                    names.contains(k)
                        || names.iter().any(|n| {
                            n.strip_suffix(".*")
                                .map(|prefix| k.starts_with(prefix))
                                .unwrap_or(false)
                        })
                }),
                None => r.message_attributes.clear(),
            }

            r
        })
        .collect()
}
