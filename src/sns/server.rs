use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tracing::debug;
use uuid::Uuid;

use crate::error::xml_escape;
use crate::sns::error::SnsError;
use crate::sns::state::SnsState;
use crate::sns::types::*;

const NS: &str = "http://sns.amazonaws.com/doc/2010-03-31/";

// ── form parsing helpers ───────────────────────────────────────────────

type Params = HashMap<String, String>;

fn parse_form(body: &str) -> Params {
    form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect()
}

fn param(params: &Params, key: &str) -> Option<String> {
    params.get(key).cloned()
}

fn require(params: &Params, key: &str) -> Result<String, SnsError> {
    param(params, key)
        .ok_or_else(|| SnsError::InvalidParameter(format!("Missing required parameter: {key}")))
}

/// `Prefix.entry.N.key` / `Prefix.entry.N.value`
fn parse_attributes(params: &Params, prefix: &str) -> Option<HashMap<String, String>> {
    let mut map = HashMap::new();
    for i in 1.. {
        let k = format!("{prefix}.entry.{i}.key");
        let v = format!("{prefix}.entry.{i}.value");
        match (params.get(&k), params.get(&v)) {
            (Some(key), Some(val)) => {
                map.insert(key.clone(), val.clone());
            }
            _ => break,
        }
    }
    (!map.is_empty()).then_some(map)
}

/// `Prefix.entry.N.Name` / `Prefix.entry.N.Value.{DataType,StringValue,BinaryValue}`
fn parse_message_attributes(
    params: &Params,
    prefix: &str,
) -> Option<HashMap<String, MessageAttributeValue>> {
    let mut map = HashMap::new();
    for i in 1.. {
        let base = format!("{prefix}.entry.{i}");
        let Some(name) = params.get(&format!("{base}.Name")) else {
            break;
        };
        let value = MessageAttributeValue {
            data_type: param(params, &format!("{base}.Value.DataType")).unwrap_or_default(),
            string_value: param(params, &format!("{base}.Value.StringValue")),
            binary_value: param(params, &format!("{base}.Value.BinaryValue")),
        };
        map.insert(name.clone(), value);
    }
    (!map.is_empty()).then_some(map)
}

/// `Prefix.member.N.Id`, `.Message`, `.Subject`, `.MessageAttributes...`
fn parse_batch_entries(params: &Params, prefix: &str) -> Vec<PublishBatchEntry> {
    let mut entries = Vec::new();
    for i in 1.. {
        let base = format!("{prefix}.member.{i}");
        let id = params.get(&format!("{base}.Id"));
        let message = params.get(&format!("{base}.Message"));
        if id.is_none() && message.is_none() {
            break;
        }
        entries.push(PublishBatchEntry {
            id: id.cloned().unwrap_or_default(),
            message: message.cloned().unwrap_or_default(),
            subject: param(params, &format!("{base}.Subject")),
            message_attributes: parse_message_attributes(
                params,
                &format!("{base}.MessageAttributes"),
            ),
        });
    }
    entries
}

// ── XML response helpers ───────────────────────────────────────────────

fn xml_ok(action: &str, result_body: &str) -> Response {
    let xml = format!(
        r#"<{action}Response xmlns="{NS}">
  <{action}Result>
{result_body}
  </{action}Result>
  <ResponseMetadata>
    <RequestId>{rid}</RequestId>
  </ResponseMetadata>
</{action}Response>"#,
        rid = Uuid::new_v4(),
    );
    (
        axum::http::StatusCode::OK,
        [("content-type", "text/xml")],
        xml,
    )
        .into_response()
}

fn xml_empty(action: &str) -> Response {
    let xml = format!(
        r#"<{action}Response xmlns="{NS}">
  <ResponseMetadata>
    <RequestId>{rid}</RequestId>
  </ResponseMetadata>
</{action}Response>"#,
        rid = Uuid::new_v4(),
    );
    (
        axum::http::StatusCode::OK,
        [("content-type", "text/xml")],
        xml,
    )
        .into_response()
}

fn attributes_xml(attrs: &HashMap<String, String>) -> String {
    let mut xml = String::from("    <Attributes>\n");
    let mut keys: Vec<&String> = attrs.keys().collect();
    keys.sort();
    for key in keys {
        xml.push_str(&format!(
            "      <entry><key>{}</key><value>{}</value></entry>\n",
            xml_escape(key),
            xml_escape(&attrs[key]),
        ));
    }
    xml.push_str("    </Attributes>");
    xml
}

fn next_token_xml(body: &mut String, next_token: Option<&str>) {
    if let Some(token) = next_token {
        body.push_str(&format!(
            "\n    <NextToken>{}</NextToken>",
            xml_escape(token)
        ));
    }
}

// ── dispatch ───────────────────────────────────────────────────────────

async fn handle_request(
    State(state): State<Arc<SnsState>>,
    body: String,
) -> Result<Response, SnsError> {
    dispatch(state, parse_form(&body)).await
}

/// GET form, used by the `UnsubscribeURL` handed out in notifications.
/// Only `Unsubscribe` is served here.
async fn handle_query(
    State(state): State<Arc<SnsState>>,
    RawQuery(query): RawQuery,
) -> Result<Response, SnsError> {
    let params = parse_form(query.as_deref().unwrap_or_default());
    match params.get("Action").map(String::as_str) {
        Some("Unsubscribe") => handle_unsubscribe(state, params).await,
        Some(other) => Err(SnsError::InvalidAction(format!(
            "{other} is not available over GET"
        ))),
        None => Err(SnsError::InvalidAction("Missing Action parameter".into())),
    }
}

async fn dispatch(state: Arc<SnsState>, params: Params) -> Result<Response, SnsError> {
    let action = param(&params, "Action")
        .ok_or_else(|| SnsError::InvalidAction("Missing Action parameter".into()))?;
    debug!(action = %action, "SNS request");

    match action.as_str() {
        "CreateTopic" => handle_create_topic(state, params).await,
        "DeleteTopic" => handle_delete_topic(state, params).await,
        "ListTopics" => handle_list_topics(state, params).await,
        "GetTopicAttributes" => handle_get_topic_attributes(state, params).await,
        "SetTopicAttributes" => handle_set_topic_attributes(state, params).await,
        "Subscribe" => handle_subscribe(state, params).await,
        "Unsubscribe" => handle_unsubscribe(state, params).await,
        "ListSubscriptions" => handle_list_subscriptions(state, params).await,
        "ListSubscriptionsByTopic" => handle_list_subscriptions_by_topic(state, params).await,
        "GetSubscriptionAttributes" => {
            handle_get_subscription_attributes(state, params).await
        }
        "SetSubscriptionAttributes" => {
            handle_set_subscription_attributes(state, params).await
        }
        "Publish" => handle_publish(state, params).await,
        "PublishBatch" => handle_publish_batch(state, params).await,
        _ => Err(SnsError::InvalidAction(format!(
            "Unknown action: {action}"
        ))),
    }
}

// ── action handlers ────────────────────────────────────────────────────

async fn handle_create_topic(
    state: Arc<SnsState>,
    params: Params,
) -> Result<Response, SnsError> {
    let req = CreateTopicRequest {
        name: require(&params, "Name")?,
        attributes: parse_attributes(&params, "Attributes"),
    };
    let resp = state.create_topic(req).await?;
    Ok(xml_ok(
        "CreateTopic",
        &format!("    <TopicArn>{}</TopicArn>", xml_escape(&resp.topic_arn)),
    ))
}

async fn handle_delete_topic(
    state: Arc<SnsState>,
    params: Params,
) -> Result<Response, SnsError> {
    let topic_arn = require(&params, "TopicArn")?;
    state
        .delete_topic(DeleteTopicRequest { topic_arn })
        .await?;
    Ok(xml_empty("DeleteTopic"))
}

async fn handle_list_topics(
    state: Arc<SnsState>,
    params: Params,
) -> Result<Response, SnsError> {
    let req = ListTopicsRequest {
        next_token: param(&params, "NextToken"),
    };
    let resp = state.list_topics(req).await?;
    let mut body = String::from("    <Topics>\n");
    for t in &resp.topics {
        body.push_str(&format!(
            "      <member><TopicArn>{}</TopicArn></member>\n",
            xml_escape(&t.topic_arn)
        ));
    }
    body.push_str("    </Topics>");
    next_token_xml(&mut body, resp.next_token.as_deref());
    Ok(xml_ok("ListTopics", &body))
}

async fn handle_get_topic_attributes(
    state: Arc<SnsState>,
    params: Params,
) -> Result<Response, SnsError> {
    let topic_arn = require(&params, "TopicArn")?;
    let resp = state
        .get_topic_attributes(GetTopicAttributesRequest { topic_arn })
        .await?;
    Ok(xml_ok("GetTopicAttributes", &attributes_xml(&resp.attributes)))
}

async fn handle_set_topic_attributes(
    state: Arc<SnsState>,
    params: Params,
) -> Result<Response, SnsError> {
    let req = SetTopicAttributesRequest {
        topic_arn: require(&params, "TopicArn")?,
        attribute_name: require(&params, "AttributeName")?,
        attribute_value: param(&params, "AttributeValue"),
    };
    state.set_topic_attributes(req).await?;
    Ok(xml_empty("SetTopicAttributes"))
}

async fn handle_subscribe(
    state: Arc<SnsState>,
    params: Params,
) -> Result<Response, SnsError> {
    let req = SubscribeRequest {
        topic_arn: require(&params, "TopicArn")?,
        protocol: require(&params, "Protocol")?,
        endpoint: param(&params, "Endpoint"),
        attributes: parse_attributes(&params, "Attributes"),
    };
    let resp = state.subscribe(req).await?;
    Ok(xml_ok(
        "Subscribe",
        &format!(
            "    <SubscriptionArn>{}</SubscriptionArn>",
            xml_escape(&resp.subscription_arn)
        ),
    ))
}

async fn handle_unsubscribe(
    state: Arc<SnsState>,
    params: Params,
) -> Result<Response, SnsError> {
    let req = UnsubscribeRequest {
        subscription_arn: require(&params, "SubscriptionArn")?,
    };
    state.unsubscribe(req).await?;
    Ok(xml_empty("Unsubscribe"))
}

async fn handle_list_subscriptions(
    state: Arc<SnsState>,
    params: Params,
) -> Result<Response, SnsError> {
    let req = ListSubscriptionsRequest {
        next_token: param(&params, "NextToken"),
    };
    let resp = state.list_subscriptions(req).await?;
    Ok(xml_ok(
        "ListSubscriptions",
        &subscriptions_xml(&resp.subscriptions, resp.next_token.as_deref()),
    ))
}

async fn handle_list_subscriptions_by_topic(
    state: Arc<SnsState>,
    params: Params,
) -> Result<Response, SnsError> {
    let req = ListSubscriptionsByTopicRequest {
        topic_arn: require(&params, "TopicArn")?,
        next_token: param(&params, "NextToken"),
    };
    let resp = state.list_subscriptions_by_topic(req).await?;
    Ok(xml_ok(
        "ListSubscriptionsByTopic",
        &subscriptions_xml(&resp.subscriptions, resp.next_token.as_deref()),
    ))
}

fn subscriptions_xml(subs: &[SubscriptionEntry], next_token: Option<&str>) -> String {
    let mut body = String::from("    <Subscriptions>\n");
    for s in subs {
        body.push_str(&format!(
            "      <member>\n        <TopicArn>{}</TopicArn>\n        <Protocol>{}</Protocol>\n        <SubscriptionArn>{}</SubscriptionArn>\n        <Owner>{}</Owner>\n        <Endpoint>{}</Endpoint>\n      </member>\n",
            xml_escape(&s.topic_arn),
            xml_escape(&s.protocol),
            xml_escape(&s.subscription_arn),
            xml_escape(&s.owner),
            xml_escape(&s.endpoint),
        ));
    }
    body.push_str("    </Subscriptions>");
    next_token_xml(&mut body, next_token);
    body
}

async fn handle_get_subscription_attributes(
    state: Arc<SnsState>,
    params: Params,
) -> Result<Response, SnsError> {
    let req = GetSubscriptionAttributesRequest {
        subscription_arn: require(&params, "SubscriptionArn")?,
    };
    let resp = state.get_subscription_attributes(req).await?;
    Ok(xml_ok(
        "GetSubscriptionAttributes",
        &attributes_xml(&resp.attributes),
    ))
}

async fn handle_set_subscription_attributes(
    state: Arc<SnsState>,
    params: Params,
) -> Result<Response, SnsError> {
    let req = SetSubscriptionAttributesRequest {
        subscription_arn: require(&params, "SubscriptionArn")?,
        attribute_name: require(&params, "AttributeName")?,
        attribute_value: param(&params, "AttributeValue"),
    };
    state.set_subscription_attributes(req).await?;
    Ok(xml_empty("SetSubscriptionAttributes"))
}

async fn handle_publish(
    state: Arc<SnsState>,
    params: Params,
) -> Result<Response, SnsError> {
    let req = PublishRequest {
        topic_arn: param(&params, "TopicArn"),
        target_arn: param(&params, "TargetArn"),
        message: require(&params, "Message")?,
        subject: param(&params, "Subject"),
        message_attributes: parse_message_attributes(&params, "MessageAttributes"),
    };
    let resp = state.publish(req).await?;
    Ok(xml_ok(
        "Publish",
        &format!("    <MessageId>{}</MessageId>", xml_escape(&resp.message_id)),
    ))
}

async fn handle_publish_batch(
    state: Arc<SnsState>,
    params: Params,
) -> Result<Response, SnsError> {
    let req = PublishBatchRequest {
        topic_arn: require(&params, "TopicArn")?,
        publish_batch_request_entries: parse_batch_entries(&params, "PublishBatchRequestEntries"),
    };
    let resp = state.publish_batch(req).await?;

    let mut body = String::from("    <Successful>\n");
    for s in &resp.successful {
        body.push_str(&format!(
            "      <member>\n        <Id>{}</Id>\n        <MessageId>{}</MessageId>\n      </member>\n",
            xml_escape(&s.id),
            xml_escape(&s.message_id),
        ));
    }
    body.push_str("    </Successful>\n    <Failed>\n");
    for f in &resp.failed {
        body.push_str(&format!(
            "      <member>\n        <Id>{}</Id>\n        <Code>{}</Code>\n        <Message>{}</Message>\n        <SenderFault>{}</SenderFault>\n      </member>\n",
            xml_escape(&f.id),
            xml_escape(&f.code),
            xml_escape(&f.message),
            f.sender_fault,
        ));
    }
    body.push_str("    </Failed>");

    Ok(xml_ok("PublishBatch", &body))
}

// ── router ─────────────────────────────────────────────────────────────

pub fn create_router(state: Arc<SnsState>) -> Router {
    Router::new()
        .route("/", post(handle_request).get(handle_query))
        .with_state(state)
}
