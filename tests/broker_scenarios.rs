//! End-to-end scenarios against the broker's SQS and SNS registries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use inmemory_messaging::config::{QueueSeed, SubscriptionSeed, TopicSeed};
use inmemory_messaging::sns::types::*;
use inmemory_messaging::sns::SnsError;
use inmemory_messaging::sqs::types::*;
use inmemory_messaging::sqs::{SqsError, SqsState};
use inmemory_messaging::{Broker, Environment, ErrorKind, Seeds};

async fn broker() -> Broker {
    Broker::new(Environment::default(), Seeds::default())
        .await
        .expect("broker should start")
}

async fn create_queue(sqs: &SqsState, name: &str, attrs: &[(&str, &str)]) -> String {
    let attributes = (!attrs.is_empty()).then(|| {
        attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    });
    sqs.create_queue(CreateQueueRequest {
        queue_name: name.to_string(),
        attributes,
    })
    .await
    .expect("queue should be created")
    .queue_url
}

async fn send(sqs: &SqsState, queue_url: &str, body: &str) -> SendMessageResponse {
    sqs.send_message(SendMessageRequest {
        queue_url: queue_url.to_string(),
        message_body: body.to_string(),
        ..Default::default()
    })
    .await
    .expect("send should succeed")
}

async fn receive(sqs: &SqsState, queue_url: &str, max: i32) -> Vec<ReceiveMessageResult> {
    sqs.receive_message(ReceiveMessageRequest {
        queue_url: queue_url.to_string(),
        max_number_of_messages: Some(max),
        attribute_names: Some(vec!["All".into()]),
        message_attribute_names: Some(vec!["All".into()]),
        ..Default::default()
    })
    .await
    .expect("receive should succeed")
    .messages
}

async fn attribute(sqs: &SqsState, queue_url: &str, name: &str) -> String {
    let resp = sqs
        .get_queue_attributes(GetQueueAttributesRequest {
            queue_url: queue_url.to_string(),
            attribute_names: Some(vec![name.to_string()]),
        })
        .await
        .expect("attributes should be readable");
    resp.attributes[name].clone()
}

async fn topic_with_queue(
    broker: &Broker,
    topic: &str,
    queue: &str,
    sub_attrs: &[(&str, &str)],
) -> (String, String) {
    let queue_url = create_queue(&broker.sqs(), queue, &[]).await;
    let topic_arn = broker
        .sns()
        .create_topic(CreateTopicRequest {
            name: topic.to_string(),
            attributes: None,
        })
        .await
        .unwrap()
        .topic_arn;
    broker
        .sns()
        .subscribe(SubscribeRequest {
            topic_arn: topic_arn.clone(),
            protocol: "sqs".into(),
            endpoint: Some(broker.env().queue_arn(queue)),
            attributes: Some(
                sub_attrs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        })
        .await
        .unwrap();
    (topic_arn, queue_url)
}

#[tokio::test]
async fn test_send_receive_delete() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let url = create_queue(&sqs, "q1", &[]).await;

    let sent = send(&sqs, &url, "hello").await;
    assert_eq!(sent.md5_of_message_body, "5d41402abc4b2a76b9719d911017c592");

    let msgs = receive(&sqs, &url, 1).await;
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].body, "hello");
    assert_eq!(msgs[0].message_id, sent.message_id);
    assert_eq!(msgs[0].attributes["ApproximateReceiveCount"], "1");

    // In flight, still counted until deleted.
    assert_eq!(attribute(&sqs, &url, "ApproximateNumberOfMessages").await, "1");
    assert_eq!(
        attribute(&sqs, &url, "ApproximateNumberOfMessagesNotVisible").await,
        "1"
    );

    sqs.delete_message(DeleteMessageRequest {
        queue_url: url.clone(),
        receipt_handle: msgs[0].receipt_handle.clone(),
    })
    .await
    .unwrap();
    assert_eq!(attribute(&sqs, &url, "ApproximateNumberOfMessages").await, "0");

    let err = sqs
        .delete_message(DeleteMessageRequest {
            queue_url: url,
            receipt_handle: msgs[0].receipt_handle.clone(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_inflight_messages_are_not_redelivered() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let url = create_queue(&sqs, "q1", &[]).await;
    send(&sqs, &url, "a").await;
    send(&sqs, &url, "b").await;

    let first = receive(&sqs, &url, 1).await;
    let second = receive(&sqs, &url, 10).await;
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_ne!(first[0].message_id, second[0].message_id);
    assert!(receive(&sqs, &url, 10).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_receivers_get_disjoint_messages() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let url = create_queue(&sqs, "q1", &[]).await;
    for i in 0..10 {
        send(&sqs, &url, &format!("m{i}")).await;
    }

    let receivers: Vec<_> = (0..5)
        .map(|_| {
            let sqs = Arc::clone(&sqs);
            let url = url.clone();
            tokio::spawn(async move { receive(&sqs, &url, 3).await })
        })
        .collect();

    let mut ids = Vec::new();
    for receiver in receivers {
        ids.extend(receiver.await.unwrap().into_iter().map(|m| m.message_id));
    }
    assert_eq!(ids.len(), 10);
    let distinct: std::collections::HashSet<_> = ids.iter().collect();
    assert_eq!(distinct.len(), ids.len());
}

#[tokio::test]
async fn test_receive_rejects_out_of_range_max() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let url = create_queue(&sqs, "q1", &[]).await;

    for max in [0, 11] {
        let err = sqs
            .receive_message(ReceiveMessageRequest {
                queue_url: url.clone(),
                max_number_of_messages: Some(max),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SqsError::InvalidParameterValue(_)));
    }
}

#[tokio::test]
async fn test_missing_queue_is_not_found() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let url = broker.env().queue_url("nope");

    let err = sqs
        .send_message(SendMessageRequest {
            queue_url: url.clone(),
            message_body: "x".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = sqs
        .delete_queue(DeleteQueueRequest { queue_url: url })
        .await
        .unwrap_err();
    assert_eq!(err, SqsError::queue_not_found());
}

#[tokio::test]
async fn test_create_queue_is_idempotent_unless_attributes_differ() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let a = create_queue(&sqs, "q1", &[("VisibilityTimeout", "10")]).await;
    let b = create_queue(&sqs, "q1", &[("VisibilityTimeout", "10")]).await;
    assert_eq!(a, b);

    let err = sqs
        .create_queue(CreateQueueRequest {
            queue_name: "q1".into(),
            attributes: Some(HashMap::from([(
                "VisibilityTimeout".to_string(),
                "20".to_string(),
            )])),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_create_queue_compares_redrive_policy_by_value() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let dlq_arn = broker.env().queue_arn("dlq");
    let quoted = format!(r#"{{"deadLetterTargetArn":"{dlq_arn}","maxReceiveCount":"3"}}"#);
    let reordered = format!(r#"{{ "maxReceiveCount": 3, "deadLetterTargetArn": "{dlq_arn}" }}"#);

    let a = create_queue(&sqs, "src", &[("RedrivePolicy", &quoted)]).await;
    let b = create_queue(&sqs, "src", &[("RedrivePolicy", &quoted)]).await;
    let c = create_queue(&sqs, "src", &[("RedrivePolicy", &reordered)]).await;
    assert_eq!(a, b);
    assert_eq!(a, c);

    let changed = format!(r#"{{"deadLetterTargetArn":"{dlq_arn}","maxReceiveCount":4}}"#);
    let err = sqs
        .create_queue(CreateQueueRequest {
            queue_name: "src".into(),
            attributes: Some(HashMap::from([("RedrivePolicy".to_string(), changed)])),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SqsError::QueueAlreadyExists(_)));
}

#[tokio::test]
async fn test_set_then_get_all_attributes() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let dlq = create_queue(&sqs, "q1-dlq", &[]).await;
    let url = create_queue(&sqs, "q1", &[]).await;
    let dlq_arn = broker.env().queue_arn("q1-dlq");

    let redrive = format!(r#"{{"deadLetterTargetArn":"{dlq_arn}","maxReceiveCount":3}}"#);
    sqs.set_queue_attributes(SetQueueAttributesRequest {
        queue_url: url.clone(),
        attributes: HashMap::from([
            ("VisibilityTimeout".to_string(), "45".to_string()),
            ("DelaySeconds".to_string(), "2".to_string()),
            ("RedrivePolicy".to_string(), redrive.clone()),
        ]),
    })
    .await
    .unwrap();

    let attrs = sqs
        .get_queue_attributes(GetQueueAttributesRequest {
            queue_url: url.clone(),
            attribute_names: Some(vec!["All".into()]),
        })
        .await
        .unwrap()
        .attributes;
    assert_eq!(attrs["VisibilityTimeout"], "45");
    assert_eq!(attrs["DelaySeconds"], "2");
    assert_eq!(attrs["QueueArn"], broker.env().queue_arn("q1"));
    let stored: serde_json::Value = serde_json::from_str(&attrs["RedrivePolicy"]).unwrap();
    let expected: serde_json::Value = serde_json::from_str(&redrive).unwrap();
    assert_eq!(stored, expected);

    let sources = sqs
        .list_dead_letter_source_queues(ListDeadLetterSourceQueuesRequest { queue_url: dlq })
        .await
        .unwrap();
    assert_eq!(sources.queue_urls, vec![url.clone()]);

    let err = sqs
        .set_queue_attributes(SetQueueAttributesRequest {
            queue_url: url,
            attributes: HashMap::from([("VisibilityTimeout".to_string(), "-1".to_string())]),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_message_moves_to_dead_letter_queue() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let dlq = create_queue(&sqs, "work-dlq", &[]).await;
    let redrive = format!(
        r#"{{"deadLetterTargetArn":"{}","maxReceiveCount":"2"}}"#,
        broker.env().queue_arn("work-dlq")
    );
    let url = create_queue(
        &sqs,
        "work",
        &[("VisibilityTimeout", "5"), ("RedrivePolicy", &redrive)],
    )
    .await;
    let sent = send(&sqs, &url, "poison").await;

    for attempt in 1..=2 {
        let msgs = receive(&sqs, &url, 1).await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].attributes["ApproximateReceiveCount"], attempt.to_string());
        tokio::time::advance(Duration::from_secs(6)).await;
    }

    assert!(receive(&sqs, &url, 10).await.is_empty());
    assert_eq!(attribute(&sqs, &url, "ApproximateNumberOfMessages").await, "0");

    let dead = receive(&sqs, &dlq, 10).await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].message_id, sent.message_id);
    assert_eq!(dead[0].body, "poison");
    assert_eq!(dead[0].attributes["ApproximateReceiveCount"], "1");
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_moves_exhausted_message_without_client_activity() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let dlq = create_queue(&sqs, "idle-dlq", &[]).await;
    let redrive = format!(
        r#"{{"deadLetterTargetArn":"{}","maxReceiveCount":1}}"#,
        broker.env().queue_arn("idle-dlq")
    );
    let url = create_queue(
        &sqs,
        "idle",
        &[("VisibilityTimeout", "5"), ("RedrivePolicy", &redrive)],
    )
    .await;
    let sent = send(&sqs, &url, "abandoned").await;
    assert_eq!(receive(&sqs, &url, 1).await.len(), 1);

    let sweeper = broker.spawn_sweeper();
    tokio::time::sleep(Duration::from_secs(7)).await;
    sweeper.abort();

    let dead = receive(&sqs, &dlq, 10).await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].message_id, sent.message_id);
    assert_eq!(attribute(&sqs, &url, "ApproximateNumberOfMessages").await, "0");
}

#[tokio::test(start_paused = true)]
async fn test_redrive_without_dead_letter_queue_keeps_message() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let redrive = format!(
        r#"{{"deadLetterTargetArn":"{}","maxReceiveCount":1}}"#,
        broker.env().queue_arn("missing-dlq")
    );
    let url = create_queue(
        &sqs,
        "work",
        &[("VisibilityTimeout", "5"), ("RedrivePolicy", &redrive)],
    )
    .await;
    send(&sqs, &url, "stuck").await;

    assert_eq!(receive(&sqs, &url, 1).await.len(), 1);
    tokio::time::advance(Duration::from_secs(6)).await;

    let again = receive(&sqs, &url, 1).await;
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].body, "stuck");
}

#[tokio::test(start_paused = true)]
async fn test_change_visibility_to_zero_releases_message() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let url = create_queue(&sqs, "q1", &[]).await;
    send(&sqs, &url, "retry-me").await;

    let msgs = receive(&sqs, &url, 1).await;
    sqs.change_message_visibility(ChangeMessageVisibilityRequest {
        queue_url: url.clone(),
        receipt_handle: msgs[0].receipt_handle.clone(),
        visibility_timeout: 0,
    })
    .await
    .unwrap();

    let again = receive(&sqs, &url, 1).await;
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].attributes["ApproximateReceiveCount"], "2");

    let err = sqs
        .change_message_visibility(ChangeMessageVisibilityRequest {
            queue_url: url,
            receipt_handle: msgs[0].receipt_handle.clone(),
            visibility_timeout: 30,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SqsError::MessageNotInflight(_)));
}

#[tokio::test]
async fn test_fifo_deduplication_returns_first_message_id() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let url = create_queue(&sqs, "jobs.fifo", &[]).await;

    let send_dedup = |body: &str| SendMessageRequest {
        queue_url: url.clone(),
        message_body: body.to_string(),
        message_group_id: Some("g".into()),
        message_deduplication_id: Some("d1".into()),
        ..Default::default()
    };
    let first = sqs.send_message(send_dedup("one")).await.unwrap();
    let second = sqs.send_message(send_dedup("two")).await.unwrap();
    assert_eq!(first.message_id, second.message_id);
    assert!(first.sequence_number.is_some());

    let msgs = receive(&sqs, &url, 10).await;
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].body, "one");
}

#[tokio::test(start_paused = true)]
async fn test_deduplication_window_expires() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let url = create_queue(&sqs, "jobs.fifo", &[]).await;

    let request = || SendMessageRequest {
        queue_url: url.clone(),
        message_body: "same".into(),
        message_group_id: Some("g".into()),
        message_deduplication_id: Some("d1".into()),
        ..Default::default()
    };
    let first = sqs.send_message(request()).await.unwrap();
    tokio::time::advance(broker.env().dedup_window + Duration::from_secs(1)).await;
    let second = sqs.send_message(request()).await.unwrap();
    assert_ne!(first.message_id, second.message_id);
    assert_eq!(receive(&sqs, &url, 10).await.len(), 2);
}

#[tokio::test]
async fn test_deduplication_can_be_disabled() {
    let env = Environment {
        deduplication: false,
        ..Environment::default()
    };
    let broker = Broker::new(env, Seeds::default()).await.unwrap();
    let sqs = broker.sqs();
    let url = create_queue(&sqs, "jobs.fifo", &[]).await;

    for _ in 0..2 {
        sqs.send_message(SendMessageRequest {
            queue_url: url.clone(),
            message_body: "same".into(),
            message_deduplication_id: Some("d1".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    }
    assert_eq!(receive(&sqs, &url, 10).await.len(), 2);
}

#[tokio::test]
async fn test_send_batch_with_too_many_entries_applies_nothing() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let url = create_queue(&sqs, "q1", &[]).await;

    let entries: Vec<SendMessageBatchEntry> = (0..11)
        .map(|i| SendMessageBatchEntry {
            id: format!("m{i}"),
            message_body: format!("body {i}"),
            ..Default::default()
        })
        .collect();
    let err = sqs
        .send_message_batch(SendMessageBatchRequest {
            queue_url: url.clone(),
            entries,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SqsError::TooManyEntriesInBatchRequest(_)));
    assert_eq!(attribute(&sqs, &url, "ApproximateNumberOfMessages").await, "0");
}

#[tokio::test]
async fn test_send_batch_reports_per_entry_failures() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let url = create_queue(&sqs, "q1", &[]).await;

    let resp = sqs
        .send_message_batch(SendMessageBatchRequest {
            queue_url: url.clone(),
            entries: vec![
                SendMessageBatchEntry {
                    id: "ok".into(),
                    message_body: "fine".into(),
                    ..Default::default()
                },
                SendMessageBatchEntry {
                    id: "bad".into(),
                    message_body: "late".into(),
                    delay_seconds: Some(901),
                    ..Default::default()
                },
            ],
        })
        .await
        .unwrap();
    assert_eq!(resp.successful.len(), 1);
    assert_eq!(resp.successful[0].id, "ok");
    assert_eq!(resp.failed.len(), 1);
    assert_eq!(resp.failed[0].id, "bad");
    assert!(resp.failed[0].sender_fault);

    let msgs = receive(&sqs, &url, 10).await;
    let deleted = sqs
        .delete_message_batch(DeleteMessageBatchRequest {
            queue_url: url,
            entries: vec![
                DeleteMessageBatchEntry {
                    id: "a".into(),
                    receipt_handle: msgs[0].receipt_handle.clone(),
                },
                DeleteMessageBatchEntry {
                    id: "b".into(),
                    receipt_handle: "stale".into(),
                },
            ],
        })
        .await
        .unwrap();
    assert_eq!(deleted.successful.len(), 1);
    assert_eq!(deleted.failed[0].id, "b");
}

#[tokio::test]
async fn test_long_poll_wakes_on_send() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let url = create_queue(&sqs, "q1", &[]).await;

    let poller = {
        let sqs = Arc::clone(&sqs);
        let url = url.clone();
        tokio::spawn(async move {
            sqs.receive_message(ReceiveMessageRequest {
                queue_url: url,
                wait_time_seconds: Some(10),
                ..Default::default()
            })
            .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    send(&sqs, &url, "wake").await;

    let resp = tokio::time::timeout(Duration::from_secs(2), poller)
        .await
        .expect("long poll should return promptly")
        .unwrap()
        .unwrap();
    assert_eq!(resp.messages.len(), 1);
    assert_eq!(resp.messages[0].body, "wake");
}

#[tokio::test(start_paused = true)]
async fn test_long_poll_times_out_empty() {
    let broker = broker().await;
    let sqs = broker.sqs();
    let url = create_queue(&sqs, "q1", &[]).await;

    let started = tokio::time::Instant::now();
    let resp = sqs
        .receive_message(ReceiveMessageRequest {
            queue_url: url,
            wait_time_seconds: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(resp.messages.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_list_queues_by_prefix_with_pagination() {
    let broker = broker().await;
    let sqs = broker.sqs();
    for name in ["orders-a", "orders-b", "orders-c", "payments"] {
        create_queue(&sqs, name, &[]).await;
    }

    let page = sqs
        .list_queues(ListQueuesRequest {
            queue_name_prefix: Some("orders".into()),
            max_results: Some(2),
            next_token: None,
        })
        .await
        .unwrap();
    assert_eq!(page.queue_urls.len(), 2);
    assert!(page.next_token.is_some());

    let rest = sqs
        .list_queues(ListQueuesRequest {
            queue_name_prefix: Some("orders".into()),
            max_results: Some(2),
            next_token: page.next_token,
        })
        .await
        .unwrap();
    assert_eq!(rest.queue_urls, vec![broker.env().queue_url("orders-c")]);
    assert!(rest.next_token.is_none());
}

#[tokio::test]
async fn test_publish_wraps_message_in_envelope() {
    let broker = broker().await;
    let (topic_arn, url) = topic_with_queue(&broker, "events", "inbox", &[]).await;

    let published = broker
        .sns()
        .publish(PublishRequest {
            topic_arn: Some(topic_arn.clone()),
            subject: Some("s".into()),
            message: r#"{"a":1}"#.into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let msgs = receive(&broker.sqs(), &url, 10).await;
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].message_attributes.is_empty());
    let envelope: serde_json::Value = serde_json::from_str(&msgs[0].body).unwrap();
    assert_eq!(envelope["Type"], "Notification");
    assert_eq!(envelope["MessageId"], published.message_id.as_str());
    assert_eq!(envelope["TopicArn"], topic_arn.as_str());
    assert_eq!(envelope["Subject"], "s");
    assert_eq!(envelope["Message"], r#"{"a":1}"#);
    assert!(envelope["UnsubscribeURL"]
        .as_str()
        .unwrap()
        .starts_with(&broker.env().sns_base_url()));
}

#[tokio::test]
async fn test_raw_delivery_carries_message_attributes() {
    let broker = broker().await;
    let (topic_arn, url) =
        topic_with_queue(&broker, "events", "inbox", &[("RawMessageDelivery", "true")]).await;

    broker
        .sns()
        .publish(PublishRequest {
            topic_arn: Some(topic_arn),
            message: "plain".into(),
            message_attributes: Some(HashMap::from([(
                "foo".to_string(),
                MessageAttributeValue::string("bar"),
            )])),
            ..Default::default()
        })
        .await
        .unwrap();

    let msgs = receive(&broker.sqs(), &url, 10).await;
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].body, "plain");
    assert_eq!(
        msgs[0].message_attributes["foo"].string_value.as_deref(),
        Some("bar")
    );
}

#[tokio::test]
async fn test_filter_policy_selects_subscriptions() {
    let broker = broker().await;
    let (topic_arn, url) = topic_with_queue(
        &broker,
        "events",
        "inbox",
        &[("FilterPolicy", r#"{"foo":["bar"]}"#)],
    )
    .await;

    let publish = |value: Option<&str>| PublishRequest {
        topic_arn: Some(topic_arn.clone()),
        message: "m".into(),
        message_attributes: value
            .map(|v| HashMap::from([("foo".to_string(), MessageAttributeValue::string(v))])),
        ..Default::default()
    };
    broker.sns().publish(publish(Some("baz"))).await.unwrap();
    broker.sns().publish(publish(None)).await.unwrap();
    assert!(receive(&broker.sqs(), &url, 10).await.is_empty());

    broker.sns().publish(publish(Some("bar"))).await.unwrap();
    assert_eq!(receive(&broker.sqs(), &url, 10).await.len(), 1);
}

#[tokio::test]
async fn test_publish_batch_with_duplicate_ids_delivers_nothing() {
    let broker = broker().await;
    let (topic_arn, url) = topic_with_queue(&broker, "events", "inbox", &[]).await;

    let entry = |id: &str| PublishBatchEntry {
        id: id.to_string(),
        message: "m".into(),
        ..Default::default()
    };
    let err = broker
        .sns()
        .publish_batch(PublishBatchRequest {
            topic_arn: topic_arn.clone(),
            publish_batch_request_entries: vec![entry("1"), entry("1")],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SnsError::BatchEntryIdsNotDistinct(_)));
    assert!(receive(&broker.sqs(), &url, 10).await.is_empty());

    let ok = broker
        .sns()
        .publish_batch(PublishBatchRequest {
            topic_arn,
            publish_batch_request_entries: vec![entry("1"), entry("2")],
        })
        .await
        .unwrap();
    assert_eq!(ok.successful.len(), 2);
    assert_eq!(receive(&broker.sqs(), &url, 10).await.len(), 2);
}

#[tokio::test]
async fn test_publish_to_missing_topic_is_not_found() {
    let broker = broker().await;
    let err = broker
        .sns()
        .publish(PublishRequest {
            topic_arn: Some(broker.env().topic_arn("ghost")),
            message: "m".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_publish_survives_deleted_subscriber_queue() {
    let broker = broker().await;
    let (topic_arn, url) = topic_with_queue(&broker, "events", "inbox", &[]).await;
    broker
        .sqs()
        .delete_queue(DeleteQueueRequest { queue_url: url })
        .await
        .unwrap();

    let resp = broker
        .sns()
        .publish(PublishRequest {
            topic_arn: Some(topic_arn),
            message: "m".into(),
            ..Default::default()
        })
        .await;
    assert!(resp.is_ok());
}

#[tokio::test]
async fn test_subscribe_is_idempotent_and_unsubscribe_removes() {
    let broker = broker().await;
    let (topic_arn, _) = topic_with_queue(&broker, "events", "inbox", &[]).await;
    let sns = broker.sns();

    let again = sns
        .subscribe(SubscribeRequest {
            topic_arn: topic_arn.clone(),
            protocol: "sqs".into(),
            endpoint: Some(broker.env().queue_url("inbox")),
            attributes: None,
        })
        .await
        .unwrap();
    let listed = sns
        .list_subscriptions_by_topic(ListSubscriptionsByTopicRequest {
            topic_arn: topic_arn.clone(),
            next_token: None,
        })
        .await
        .unwrap();
    assert_eq!(listed.subscriptions.len(), 1);
    assert_eq!(listed.subscriptions[0].subscription_arn, again.subscription_arn);
    assert!(again.subscription_arn.starts_with(&format!("{topic_arn}:")));

    let err = sns
        .subscribe(SubscribeRequest {
            topic_arn: topic_arn.clone(),
            protocol: "email".into(),
            endpoint: Some("a@example.com".into()),
            attributes: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SnsError::InvalidParameter(_)));

    sns.unsubscribe(UnsubscribeRequest {
        subscription_arn: again.subscription_arn.clone(),
    })
    .await
    .unwrap();
    let err = sns
        .unsubscribe(UnsubscribeRequest {
            subscription_arn: again.subscription_arn,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_topic_and_subscription_attributes() {
    let broker = broker().await;
    let (topic_arn, _) = topic_with_queue(&broker, "events", "inbox", &[]).await;
    let sns = broker.sns();

    sns.set_topic_attributes(SetTopicAttributesRequest {
        topic_arn: topic_arn.clone(),
        attribute_name: "DisplayName".into(),
        attribute_value: Some("Events".into()),
    })
    .await
    .unwrap();
    let attrs = sns
        .get_topic_attributes(GetTopicAttributesRequest {
            topic_arn: topic_arn.clone(),
        })
        .await
        .unwrap()
        .attributes;
    assert_eq!(attrs["DisplayName"], "Events");
    assert_eq!(attrs["TopicArn"], topic_arn);
    assert_eq!(attrs["SubscriptionsConfirmed"], "1");

    let sub_arn = sns
        .list_subscriptions(ListSubscriptionsRequest { next_token: None })
        .await
        .unwrap()
        .subscriptions[0]
        .subscription_arn
        .clone();
    sns.set_subscription_attributes(SetSubscriptionAttributesRequest {
        subscription_arn: sub_arn.clone(),
        attribute_name: "RawMessageDelivery".into(),
        attribute_value: Some("true".into()),
    })
    .await
    .unwrap();
    let err = sns
        .set_subscription_attributes(SetSubscriptionAttributesRequest {
            subscription_arn: sub_arn.clone(),
            attribute_name: "FilterPolicy".into(),
            attribute_value: Some("not json".into()),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let attrs = sns
        .get_subscription_attributes(GetSubscriptionAttributesRequest {
            subscription_arn: sub_arn,
        })
        .await
        .unwrap()
        .attributes;
    assert_eq!(attrs["RawMessageDelivery"], "true");
    assert_eq!(attrs["Protocol"], "sqs");
}

#[tokio::test]
async fn test_reset_restores_seeded_state() {
    let seeds = Seeds {
        queues: vec![QueueSeed {
            name: "seeded".into(),
            attributes: HashMap::from([("VisibilityTimeout".to_string(), "7".to_string())]),
        }],
        topics: vec![TopicSeed {
            name: "seeded-topic".into(),
            subscriptions: vec![SubscriptionSeed {
                protocol: "sqs".into(),
                endpoint: "seeded".into(),
                raw: true,
                filter_policy: None,
            }],
        }],
    };
    let broker = Broker::new(Environment::default(), seeds).await.unwrap();
    let sqs = broker.sqs();
    let seeded_url = broker.env().queue_url("seeded");
    assert_eq!(attribute(&sqs, &seeded_url, "VisibilityTimeout").await, "7");

    create_queue(&sqs, "scratch", &[]).await;
    send(&sqs, &seeded_url, "leftover").await;
    broker.reset().await.unwrap();

    let queues = sqs.list_queues(ListQueuesRequest::default()).await.unwrap();
    assert_eq!(queues.queue_urls, vec![seeded_url.clone()]);
    assert_eq!(attribute(&sqs, &seeded_url, "ApproximateNumberOfMessages").await, "0");

    broker
        .sns()
        .publish(PublishRequest {
            topic_arn: Some(broker.env().topic_arn("seeded-topic")),
            message: "after reset".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let msgs = receive(&sqs, &seeded_url, 10).await;
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].body, "after reset");
}

#[tokio::test]
async fn test_invalid_seed_fails_startup() {
    let seeds = Seeds {
        queues: vec![QueueSeed {
            name: "bad name".into(),
            attributes: HashMap::new(),
        }],
        topics: Vec::new(),
    };
    let err = Broker::new(Environment::default(), seeds).await.err();
    assert!(matches!(
        err,
        Some(inmemory_messaging::BrokerError::QueueSeed { .. })
    ));
}
