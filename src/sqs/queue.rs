use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::error::SqsError;
use super::types::{MessageAttributeValue, ReceiveMessageResult, SendMessageResponse};
use crate::policy::{self, RedriveAllowPolicy, RedrivePolicy};

const MAX_VISIBILITY_TIMEOUT: i32 = 43200;
const MAX_DELAY_SECONDS: i32 = 900;

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

pub(crate) fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// MD5 over the length-prefixed encoding of the attributes sorted by name,
/// matching what SDK clients verify.
pub fn compute_md5_of_attributes(attrs: &HashMap<String, MessageAttributeValue>) -> Option<String> {
    if attrs.is_empty() {
        return None;
    }
    let mut keys: Vec<&String> = attrs.keys().collect();
    keys.sort();

    let mut buf: Vec<u8> = Vec::new();
    let put = |buf: &mut Vec<u8>, bytes: &[u8]| {
        buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(bytes);
    };
    for key in keys {
        let attr = &attrs[key];
        put(&mut buf, key.as_bytes());
        put(&mut buf, attr.data_type.as_bytes());

        // Transport type: 1 for String/Number, 2 for Binary
        if attr.is_binary() {
            buf.push(2);
            if let Some(ref bv) = attr.binary_value {
                let decoded =
                    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, bv)
                        .unwrap_or_default();
                put(&mut buf, &decoded);
            }
        } else {
            buf.push(1);
            if let Some(ref sv) = attr.string_value {
                put(&mut buf, sv.as_bytes());
            }
        }
    }

    Some(md5_hex(&buf))
}

fn validate_message_attributes(
    attrs: &HashMap<String, MessageAttributeValue>,
) -> Result<(), SqsError> {
    for (name, attr) in attrs {
        let base = attr.data_type.split('.').next().unwrap_or_default();
        let has_value = match base {
            "String" | "Number" => attr.string_value.is_some(),
            "Binary" => attr.binary_value.is_some(),
            _ => {
                return Err(SqsError::InvalidParameterValue(format!(
                    "The message attribute '{name}' has an invalid message attribute type {}",
                    attr.data_type
                )));
            }
        };
        if !has_value {
            return Err(SqsError::InvalidParameterValue(format!(
                "The message attribute '{name}' must contain a non-empty value of type {base}"
            )));
        }
        if let Some(ref bv) = attr.binary_value {
            if base64::Engine::decode(&base64::engine::general_purpose::STANDARD, bv).is_err() {
                return Err(SqsError::InvalidParameterValue(format!(
                    "The message attribute '{name}' has a BinaryValue that is not valid base64"
                )));
            }
        }
    }
    Ok(())
}

fn parse_bounded(name: &str, value: &str, range: std::ops::RangeInclusive<u32>) -> Result<u32, SqsError> {
    let v: u32 = value
        .parse()
        .map_err(|_| SqsError::InvalidAttributeValue(format!("Invalid {name}: {value}")))?;
    if !range.contains(&v) {
        return Err(SqsError::InvalidAttributeValue(format!(
            "{name} must be between {} and {}",
            range.start(),
            range.end()
        )));
    }
    Ok(v)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAttributes {
    pub visibility_timeout: u32,
    pub message_retention_period: u32,
    pub delay_seconds: u32,
    pub maximum_message_size: u32,
    pub receive_message_wait_time_seconds: u32,
    pub redrive_policy: Option<RedrivePolicy>,
    pub redrive_allow_policy: Option<RedriveAllowPolicy>,
    pub policy: Option<String>,
    pub fifo_queue: bool,
    pub content_based_deduplication: bool,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        QueueAttributes {
            visibility_timeout: 30,
            message_retention_period: 345600,
            delay_seconds: 0,
            maximum_message_size: 262144,
            receive_message_wait_time_seconds: 0,
            redrive_policy: None,
            redrive_allow_policy: None,
            policy: None,
            fifo_queue: false,
            content_based_deduplication: false,
        }
    }
}

impl QueueAttributes {
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("VisibilityTimeout".into(), self.visibility_timeout.to_string());
        m.insert("MessageRetentionPeriod".into(), self.message_retention_period.to_string());
        m.insert("DelaySeconds".into(), self.delay_seconds.to_string());
        m.insert("MaximumMessageSize".into(), self.maximum_message_size.to_string());
        m.insert(
            "ReceiveMessageWaitTimeSeconds".into(),
            self.receive_message_wait_time_seconds.to_string(),
        );
        if let Some(ref rp) = self.redrive_policy {
            m.insert("RedrivePolicy".into(), rp.to_json());
        }
        if let Some(ref rap) = self.redrive_allow_policy {
            m.insert("RedriveAllowPolicy".into(), rap.to_json());
        }
        if let Some(ref p) = self.policy {
            m.insert("Policy".into(), p.clone());
        }
        if self.fifo_queue {
            m.insert("FifoQueue".into(), "true".into());
            m.insert(
                "ContentBasedDeduplication".into(),
                self.content_based_deduplication.to_string(),
            );
        }
        m
    }

    /// Whether the attribute called `name` holds the same typed value in both.
    /// Unknown names never differ.
    pub fn same_attribute(&self, other: &QueueAttributes, name: &str) -> bool {
        match name {
            "VisibilityTimeout" => self.visibility_timeout == other.visibility_timeout,
            "MessageRetentionPeriod" => {
                self.message_retention_period == other.message_retention_period
            }
            "DelaySeconds" => self.delay_seconds == other.delay_seconds,
            "MaximumMessageSize" => self.maximum_message_size == other.maximum_message_size,
            "ReceiveMessageWaitTimeSeconds" => {
                self.receive_message_wait_time_seconds == other.receive_message_wait_time_seconds
            }
            "RedrivePolicy" => self.redrive_policy == other.redrive_policy,
            "RedriveAllowPolicy" => self.redrive_allow_policy == other.redrive_allow_policy,
            "Policy" => self.policy == other.policy,
            "FifoQueue" => self.fifo_queue == other.fifo_queue,
            "ContentBasedDeduplication" => {
                self.content_based_deduplication == other.content_based_deduplication
            }
            _ => true,
        }
    }

    /// Applies writable attributes. Names the broker does not know are skipped.
    pub fn apply(&mut self, attrs: &HashMap<String, String>) -> Result<(), SqsError> {
        for (key, value) in attrs {
            match key.as_str() {
                "VisibilityTimeout" => {
                    self.visibility_timeout = parse_bounded(key, value, 0..=43200)?;
                }
                "MessageRetentionPeriod" => {
                    self.message_retention_period = parse_bounded(key, value, 60..=1209600)?;
                }
                "DelaySeconds" => {
                    self.delay_seconds = parse_bounded(key, value, 0..=900)?;
                }
                "MaximumMessageSize" => {
                    self.maximum_message_size = parse_bounded(key, value, 1024..=262144)?;
                }
                "ReceiveMessageWaitTimeSeconds" => {
                    self.receive_message_wait_time_seconds = parse_bounded(key, value, 0..=20)?;
                }
                "RedrivePolicy" => {
                    self.redrive_policy = if value.is_empty() {
                        None
                    } else {
                        Some(RedrivePolicy::from_json(value)?)
                    };
                }
                "RedriveAllowPolicy" => {
                    self.redrive_allow_policy = if value.is_empty() {
                        None
                    } else {
                        Some(RedriveAllowPolicy::from_json(value)?)
                    };
                }
                "Policy" => {
                    self.policy = if value.is_empty() {
                        None
                    } else {
                        policy::validate_opaque("Policy", value)?;
                        Some(value.clone())
                    };
                }
                "FifoQueue" => {
                    self.fifo_queue = value == "true";
                }
                "ContentBasedDeduplication" => {
                    self.content_based_deduplication = value == "true";
                }
                _ => {
                    debug!(attribute = %key, "Ignoring unknown queue attribute");
                }
            }
        }
        Ok(())
    }
}

/// Deduplication settings handed down from the process environment.
#[derive(Debug, Clone, Copy)]
pub struct DedupSettings {
    pub enabled: bool,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: String,
    pub body: String,
    pub md5_of_body: String,
    pub message_attributes: HashMap<String, MessageAttributeValue>,
    pub md5_of_message_attributes: Option<String>,
    pub sent_timestamp: u64,
    pub enqueued_at: Instant,
    pub receive_count: u32,
    pub first_receive_timestamp: Option<u64>,
    /// Present only while a delivery is outstanding.
    pub receipt_handle: Option<String>,
    /// Hidden until this instant; `None` means visible now. Set by delays as
    /// well as by receives.
    pub visible_at: Option<Instant>,
    pub message_group_id: Option<String>,
    pub dedup_id: Option<String>,
    pub sequence_number: Option<String>,
}

impl Message {
    pub fn is_visible(&self, now: Instant) -> bool {
        self.visible_at.map_or(true, |at| at <= now)
    }

    pub fn is_inflight(&self) -> bool {
        self.receipt_handle.is_some()
    }

    fn is_delayed(&self, now: Instant) -> bool {
        !self.is_inflight() && !self.is_visible(now)
    }
}

/// A message whose receive count used up its redrive allowance, on its way
/// to the dead-letter queue named by `dlq_name`.
#[derive(Debug)]
pub struct DlqRedrive {
    pub message: Message,
    pub dlq_name: String,
}

pub struct Queue {
    pub name: String,
    pub arn: String,
    pub url: String,
    pub attributes: QueueAttributes,
    pub messages: VecDeque<Message>,
    pub created_at: u64,
    pub last_modified: u64,
    dedup_index: HashMap<String, (SendMessageResponse, Instant)>,
    sequence_counter: u64,
}

impl Queue {
    pub fn new(name: String, arn: String, url: String, attributes: QueueAttributes) -> Self {
        let now = now_secs();
        Queue {
            name,
            arn,
            url,
            attributes,
            messages: VecDeque::new(),
            created_at: now,
            last_modified: now,
            dedup_index: HashMap::new(),
            sequence_counter: 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_message(
        &mut self,
        body: String,
        delay_seconds: Option<i32>,
        msg_attrs: Option<HashMap<String, MessageAttributeValue>>,
        dedup_id: Option<String>,
        group_id: Option<String>,
        dedup: DedupSettings,
    ) -> Result<SendMessageResponse, SqsError> {
        if body.is_empty() {
            return Err(SqsError::InvalidParameterValue(
                "The request must contain the parameter MessageBody.".into(),
            ));
        }
        if body.len() > self.attributes.maximum_message_size as usize {
            return Err(SqsError::InvalidParameterValue(format!(
                "One or more parameters are invalid. Reason: Message must be shorter than {} bytes.",
                self.attributes.maximum_message_size
            )));
        }
        if let Some(delay) = delay_seconds {
            if !(0..=MAX_DELAY_SECONDS).contains(&delay) {
                return Err(SqsError::InvalidParameterValue(format!(
                    "DelaySeconds must be between 0 and {MAX_DELAY_SECONDS}"
                )));
            }
        }
        let msg_attrs = msg_attrs.unwrap_or_default();
        validate_message_attributes(&msg_attrs)?;

        let effective_dedup_id = if self.attributes.fifo_queue && dedup.enabled {
            dedup_id.or_else(|| {
                self.attributes
                    .content_based_deduplication
                    .then(|| sha256_hex(body.as_bytes()))
            })
        } else {
            None
        };

        self.prune_dedup_index(dedup.window);
        if let Some(ref did) = effective_dedup_id {
            if let Some((prev_response, _)) = self.dedup_index.get(did) {
                debug!(queue = %self.name, dedup_id = %did, message_id = %prev_response.message_id,
                    "Duplicate send discarded");
                return Ok(prev_response.clone());
            }
        }

        let delay = delay_seconds
            .map(|d| d as u64)
            .unwrap_or(self.attributes.delay_seconds as u64);
        let now = Instant::now();
        let message_id = Uuid::new_v4().to_string();
        let md5_of_body = md5_hex(body.as_bytes());
        let md5_of_msg_attrs = compute_md5_of_attributes(&msg_attrs);

        let sequence_number = if self.attributes.fifo_queue {
            self.sequence_counter += 1;
            Some(format!("{:020}", self.sequence_counter))
        } else {
            None
        };

        self.messages.push_back(Message {
            message_id: message_id.clone(),
            body,
            md5_of_body: md5_of_body.clone(),
            message_attributes: msg_attrs,
            md5_of_message_attributes: md5_of_msg_attrs.clone(),
            sent_timestamp: now_millis(),
            enqueued_at: now,
            receive_count: 0,
            first_receive_timestamp: None,
            receipt_handle: None,
            visible_at: (delay > 0).then(|| now + Duration::from_secs(delay)),
            message_group_id: group_id,
            dedup_id: effective_dedup_id.clone(),
            sequence_number: sequence_number.clone(),
        });

        let response = SendMessageResponse {
            message_id,
            md5_of_message_body: md5_of_body,
            md5_of_message_attributes: md5_of_msg_attrs,
            sequence_number,
        };

        if let Some(did) = effective_dedup_id {
            self.dedup_index.insert(did, (response.clone(), now));
        }

        Ok(response)
    }

    /// Ends every visibility window that has run out and drops messages past
    /// their retention period. Messages that used up their redrive allowance
    /// are removed and handed back for relocation.
    pub fn reclaim_expired(&mut self) -> Vec<DlqRedrive> {
        let now = Instant::now();
        let retention = Duration::from_secs(self.attributes.message_retention_period as u64);
        let redrive = self.attributes.redrive_policy.clone();
        let mut redrives = Vec::new();
        let mut kept = VecDeque::with_capacity(self.messages.len());

        for mut msg in self.messages.drain(..) {
            if msg.is_inflight() && msg.is_visible(now) {
                msg.receipt_handle = None;
                msg.visible_at = None;
                if let Some(ref rp) = redrive {
                    if msg.receive_count >= rp.max_receive_count {
                        redrives.push(DlqRedrive {
                            message: msg,
                            dlq_name: rp.target_queue_name().to_string(),
                        });
                        continue;
                    }
                }
                debug!(queue = %self.name, message_id = %msg.message_id, "Visibility timeout expired");
            }
            if !msg.is_inflight() && now.duration_since(msg.enqueued_at) > retention {
                debug!(queue = %self.name, message_id = %msg.message_id, "Message retention expired");
                continue;
            }
            kept.push_back(msg);
        }

        self.messages = kept;
        redrives
    }

    /// Delivers up to `max_count` visible messages. Callers reclaim expired
    /// visibility windows first so redrive can reach the dead-letter queue.
    pub fn receive_messages(
        &mut self,
        max_count: usize,
        visibility_timeout: Option<i32>,
        sender_id: &str,
    ) -> Result<Vec<ReceiveMessageResult>, SqsError> {
        let vis_timeout = match visibility_timeout {
            Some(v) if !(0..=MAX_VISIBILITY_TIMEOUT).contains(&v) => {
                return Err(SqsError::InvalidParameterValue(format!(
                    "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}"
                )));
            }
            Some(v) => v as u64,
            None => self.attributes.visibility_timeout as u64,
        };
        let now = Instant::now();
        let now_ms = now_millis();
        let mut results = Vec::new();

        for msg in self.messages.iter_mut() {
            if results.len() >= max_count {
                break;
            }
            if msg.is_inflight() || !msg.is_visible(now) {
                continue;
            }

            msg.receive_count += 1;
            let first_receive = *msg.first_receive_timestamp.get_or_insert(now_ms);
            let receipt_handle = Uuid::new_v4().to_string();
            msg.receipt_handle = Some(receipt_handle.clone());
            msg.visible_at = Some(now + Duration::from_secs(vis_timeout));

            let mut sys_attrs = HashMap::new();
            sys_attrs.insert("SenderId".into(), sender_id.to_string());
            sys_attrs.insert("SentTimestamp".into(), msg.sent_timestamp.to_string());
            sys_attrs.insert("ApproximateReceiveCount".into(), msg.receive_count.to_string());
            sys_attrs.insert(
                "ApproximateFirstReceiveTimestamp".into(),
                first_receive.to_string(),
            );
            if let Some(ref did) = msg.dedup_id {
                sys_attrs.insert("MessageDeduplicationId".into(), did.clone());
            }
            if let Some(ref gid) = msg.message_group_id {
                sys_attrs.insert("MessageGroupId".into(), gid.clone());
            }
            if let Some(ref seq) = msg.sequence_number {
                sys_attrs.insert("SequenceNumber".into(), seq.clone());
            }

            debug!(queue = %self.name, message_id = %msg.message_id,
                receive_count = msg.receive_count, "Message received");

            results.push(ReceiveMessageResult {
                message_id: msg.message_id.clone(),
                receipt_handle,
                body: msg.body.clone(),
                md5_of_body: msg.md5_of_body.clone(),
                md5_of_message_attributes: msg.md5_of_message_attributes.clone(),
                attributes: sys_attrs,
                message_attributes: msg.message_attributes.clone(),
            });
        }

        Ok(results)
    }

    fn inflight_position(&self, receipt_handle: &str) -> Option<usize> {
        let now = Instant::now();
        self.messages.iter().position(|m| {
            m.receipt_handle.as_deref() == Some(receipt_handle) && !m.is_visible(now)
        })
    }

    pub fn delete_message(&mut self, receipt_handle: &str) -> Result<(), SqsError> {
        let idx = self.inflight_position(receipt_handle).ok_or_else(|| {
            SqsError::ReceiptHandleIsInvalid(format!(
                "The receipt handle \"{receipt_handle}\" is not valid: message not found."
            ))
        })?;
        if let Some(msg) = self.messages.remove(idx) {
            debug!(queue = %self.name, message_id = %msg.message_id, "Message deleted");
        }
        Ok(())
    }

    pub fn change_message_visibility(
        &mut self,
        receipt_handle: &str,
        timeout: i32,
    ) -> Result<(), SqsError> {
        if !(0..=MAX_VISIBILITY_TIMEOUT).contains(&timeout) {
            return Err(SqsError::InvalidParameterValue(format!(
                "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}"
            )));
        }
        let idx = self.inflight_position(receipt_handle).ok_or_else(|| {
            SqsError::MessageNotInflight("The message is not in flight.".into())
        })?;
        let msg = &mut self.messages[idx];
        if timeout == 0 {
            msg.receipt_handle = None;
            msg.visible_at = None;
        } else {
            msg.visible_at = Some(Instant::now() + Duration::from_secs(timeout as u64));
        }
        Ok(())
    }

    /// Accepts a message relocated from a source queue's redrive.
    pub fn accept_redriven(&mut self, mut msg: Message) {
        msg.receive_count = 0;
        msg.first_receive_timestamp = None;
        msg.receipt_handle = None;
        msg.visible_at = None;
        self.messages.push_back(msg);
    }

    pub fn purge(&mut self) {
        self.messages.clear();
        self.dedup_index.clear();
    }

    pub fn get_attributes(&self, names: &Option<Vec<String>>) -> HashMap<String, String> {
        let all = match names {
            None => true,
            Some(names) => names.is_empty() || names.iter().any(|n| n == "All"),
        };
        let include = |attr_name: &str| -> bool {
            all || names
                .as_ref()
                .map(|n| n.iter().any(|x| x == attr_name))
                .unwrap_or(false)
        };

        let mut result: HashMap<String, String> = self
            .attributes
            .to_map()
            .into_iter()
            .filter(|(k, _)| include(k))
            .collect();

        let now = Instant::now();
        let inflight = self.inflight_count();
        let delayed = self.messages.iter().filter(|m| m.is_delayed(now)).count();
        let computed = [
            ("QueueArn", self.arn.clone()),
            ("CreatedTimestamp", self.created_at.to_string()),
            ("LastModifiedTimestamp", self.last_modified.to_string()),
            (
                "ApproximateNumberOfMessages",
                (self.messages.len() - delayed).to_string(),
            ),
            ("ApproximateNumberOfMessagesNotVisible", inflight.to_string()),
            ("ApproximateNumberOfMessagesDelayed", delayed.to_string()),
        ];
        for (name, value) in computed {
            if include(name) {
                result.insert(name.into(), value);
            }
        }

        result
    }

    pub fn set_attributes(&mut self, attrs: &HashMap<String, String>) -> Result<(), SqsError> {
        if let Some(v) = attrs.get("FifoQueue") {
            if (v == "true") != self.attributes.fifo_queue {
                return Err(SqsError::InvalidAttributeName(
                    "FifoQueue cannot be changed after creation".into(),
                ));
            }
        }
        // Validate against a copy so a bad value leaves the queue untouched.
        let mut updated = self.attributes.clone();
        updated.apply(attrs)?;
        self.attributes = updated;
        self.last_modified = now_secs();
        Ok(())
    }

    pub fn prune_dedup_index(&mut self, window: Duration) {
        self.dedup_index
            .retain(|_, (_, ts)| ts.elapsed() < window);
    }

    pub fn inflight_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_inflight()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEDUP: DedupSettings = DedupSettings {
        enabled: true,
        window: Duration::from_secs(300),
    };

    fn queue(name: &str) -> Queue {
        let mut attributes = QueueAttributes::default();
        attributes.fifo_queue = name.ends_with(".fifo");
        Queue::new(
            name.to_string(),
            format!("arn:aws:sqs:us-east-1:000000000000:{name}"),
            format!("http://localhost:9324/000000000000/{name}"),
            attributes,
        )
    }

    fn send(q: &mut Queue, body: &str) -> SendMessageResponse {
        q.send_message(body.to_string(), None, None, None, None, DEDUP)
            .unwrap()
    }

    #[test]
    fn md5_matches_known_digest() {
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
        let mut attrs = HashMap::new();
        attrs.insert("a".to_string(), MessageAttributeValue::string("b"));
        assert!(compute_md5_of_attributes(&attrs).is_some());
        assert!(compute_md5_of_attributes(&HashMap::new()).is_none());
    }

    #[test]
    fn rejects_oversized_and_empty_bodies() {
        let mut q = queue("q");
        q.attributes.maximum_message_size = 1024;
        let big = "x".repeat(1025);
        assert!(matches!(
            q.send_message(big, None, None, None, None, DEDUP),
            Err(SqsError::InvalidParameterValue(_))
        ));
        assert!(q
            .send_message(String::new(), None, None, None, None, DEDUP)
            .is_err());
        assert!(q.messages.is_empty());
    }

    #[test]
    fn rejects_attribute_without_value() {
        let mut q = queue("q");
        let mut attrs = HashMap::new();
        attrs.insert(
            "n".to_string(),
            MessageAttributeValue {
                data_type: "Number".into(),
                string_value: None,
                binary_value: None,
            },
        );
        assert!(q
            .send_message("x".into(), None, Some(attrs), None, None, DEDUP)
            .is_err());
    }

    #[test]
    fn rejects_binary_attribute_that_is_not_base64() {
        let mut q = queue("q");
        let binary = |value: &str| {
            HashMap::from([(
                "blob".to_string(),
                MessageAttributeValue {
                    data_type: "Binary".into(),
                    string_value: None,
                    binary_value: Some(value.to_string()),
                },
            )])
        };
        assert!(matches!(
            q.send_message("x".into(), None, Some(binary("not base64!")), None, None, DEDUP),
            Err(SqsError::InvalidParameterValue(_))
        ));
        assert!(q.messages.is_empty());
        assert!(q
            .send_message("x".into(), None, Some(binary("aGVsbG8=")), None, None, DEDUP)
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn received_message_is_hidden_until_timeout() {
        let mut q = queue("q");
        q.attributes.visibility_timeout = 5;
        send(&mut q, "hello");

        let first = q.receive_messages(10, None, "acct").unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].attributes["ApproximateReceiveCount"], "1");
        assert!(q.receive_messages(10, None, "acct").unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(q.reclaim_expired().is_empty());
        let second = q.receive_messages(10, None, "acct").unwrap();
        assert_eq!(second.len(), 1);
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);
        assert_eq!(second[0].attributes["ApproximateReceiveCount"], "2");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_receipt_handle_cannot_delete() {
        let mut q = queue("q");
        q.attributes.visibility_timeout = 1;
        send(&mut q, "hello");
        let handle = q.receive_messages(1, None, "acct").unwrap()[0]
            .receipt_handle
            .clone();

        tokio::time::advance(Duration::from_secs(2)).await;
        q.reclaim_expired();
        assert!(matches!(
            q.delete_message(&handle),
            Err(SqsError::ReceiptHandleIsInvalid(_))
        ));

        let fresh = q.receive_messages(1, None, "acct").unwrap()[0]
            .receipt_handle
            .clone();
        q.delete_message(&fresh).unwrap();
        assert!(q.messages.is_empty());
        assert!(q.delete_message(&fresh).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_message_counts_as_delayed() {
        let mut q = queue("q");
        q.send_message("later".into(), Some(10), None, None, None, DEDUP)
            .unwrap();
        let attrs = q.get_attributes(&None);
        assert_eq!(attrs["ApproximateNumberOfMessagesDelayed"], "1");
        assert_eq!(attrs["ApproximateNumberOfMessages"], "0");
        assert!(q.receive_messages(1, None, "acct").unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(q.receive_messages(1, None, "acct").unwrap().len(), 1);
    }

    #[test]
    fn fifo_dedup_returns_first_message_id() {
        let mut q = queue("orders.fifo");
        let first = q
            .send_message("a".into(), None, None, Some("d1".into()), Some("g".into()), DEDUP)
            .unwrap();
        let second = q
            .send_message("b".into(), None, None, Some("d1".into()), Some("g".into()), DEDUP)
            .unwrap();
        assert_eq!(first.message_id, second.message_id);
        assert_eq!(q.messages.len(), 1);

        q.purge();
        let third = q
            .send_message("c".into(), None, None, Some("d1".into()), Some("g".into()), DEDUP)
            .unwrap();
        assert_ne!(third.message_id, first.message_id);
    }

    #[test]
    fn dedup_is_off_when_disabled() {
        let mut q = queue("orders.fifo");
        let off = DedupSettings {
            enabled: false,
            ..DEDUP
        };
        q.send_message("a".into(), None, None, Some("d1".into()), None, off)
            .unwrap();
        q.send_message("a".into(), None, None, Some("d1".into()), None, off)
            .unwrap();
        assert_eq!(q.messages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_message_is_handed_to_redrive() {
        let mut q = queue("q");
        q.attributes.visibility_timeout = 1;
        q.attributes.redrive_policy = Some(RedrivePolicy {
            dead_letter_target_arn: "arn:aws:sqs:us-east-1:000000000000:dlq".into(),
            max_receive_count: 2,
        });
        send(&mut q, "poison");

        for _ in 0..2 {
            assert_eq!(q.receive_messages(1, None, "acct").unwrap().len(), 1);
            tokio::time::advance(Duration::from_secs(2)).await;
            let redrives = q.reclaim_expired();
            if !redrives.is_empty() {
                assert_eq!(redrives[0].dlq_name, "dlq");
                assert_eq!(redrives[0].message.receive_count, 2);
                assert!(q.messages.is_empty());
                return;
            }
        }
        panic!("message was never redriven");
    }

    #[test]
    fn unknown_attributes_are_ignored_but_bad_values_rejected() {
        let mut q = queue("q");
        let mut attrs = HashMap::new();
        attrs.insert("NotARealAttribute".to_string(), "1".to_string());
        attrs.insert("VisibilityTimeout".to_string(), "45".to_string());
        q.set_attributes(&attrs).unwrap();
        assert_eq!(q.attributes.visibility_timeout, 45);

        let mut bad = HashMap::new();
        bad.insert("VisibilityTimeout".to_string(), "99999".to_string());
        bad.insert("DelaySeconds".to_string(), "5".to_string());
        assert!(q.set_attributes(&bad).is_err());
        assert_eq!(q.attributes.delay_seconds, 0);
    }
}
