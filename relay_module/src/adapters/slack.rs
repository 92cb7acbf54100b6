//! Slack adapter for the team-chat side of the relay.
//!
//! - Events API payload parsing and classification (handshake, bot echo,
//!   human message)
//! - `SlackClient` posting messages and thread replies via `chat.postMessage`

use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";

/// URL verification handshake sent when the events endpoint is registered.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackUrlVerification {
    #[serde(rename = "type")]
    pub kind: String,
    pub challenge: String,
}

/// Outer envelope of an Events API callback.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackEventWrapper {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub team_id: Option<String>,
    pub event_id: Option<String>,
    pub event: Option<SlackMessageEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackMessageEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: Option<String>,
    pub channel: Option<String>,
    pub user: Option<String>,
    pub text: Option<String>,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub bot_id: Option<String>,
}

/// A human-authored message that may belong to a relayed thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackThreadMessage {
    pub channel: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub user: Option<String>,
    pub text: String,
}

impl SlackThreadMessage {
    /// Thread parent when replying, otherwise the message itself (which may be
    /// a thread root).
    pub fn lookup_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackPayload {
    UrlVerification { challenge: String },
    BotMessage,
    HumanMessage(SlackThreadMessage),
    Ignored(&'static str),
}

/// Returns the handshake when the body is a `url_verification` request.
pub fn is_url_verification(body: &[u8]) -> Option<SlackUrlVerification> {
    let verification: SlackUrlVerification = serde_json::from_slice(body).ok()?;
    (verification.kind == "url_verification").then_some(verification)
}

/// Sorts a Slack payload into the shapes the relay cares about.
///
/// `bot_user_id` is this app's own user id; messages from it are treated like
/// any other bot echo.
pub fn classify_slack_payload(
    body: &[u8],
    bot_user_id: Option<&str>,
) -> Result<SlackPayload, serde_json::Error> {
    if let Some(verification) = is_url_verification(body) {
        return Ok(SlackPayload::UrlVerification {
            challenge: verification.challenge,
        });
    }

    let wrapper: SlackEventWrapper = serde_json::from_slice(body)?;
    let Some(event) = wrapper.event else {
        return Ok(SlackPayload::Ignored("no_event"));
    };
    Ok(classify_event(event, bot_user_id))
}

/// Message subtypes that still carry text a person wrote in the thread.
const HUMAN_CONTENT_SUBTYPES: &[&str] = &["thread_broadcast", "file_share", "me_message"];

fn classify_event(event: SlackMessageEvent, bot_user_id: Option<&str>) -> SlackPayload {
    if event.kind != "message" {
        return SlackPayload::Ignored("not_message");
    }
    if is_bot_message(&event, bot_user_id) {
        return SlackPayload::BotMessage;
    }
    if event
        .subtype
        .as_deref()
        .is_some_and(|subtype| !HUMAN_CONTENT_SUBTYPES.contains(&subtype))
    {
        // edits, deletions, joins and the like
        return SlackPayload::Ignored("message_subtype");
    }

    let text = event.text.unwrap_or_default();
    if text.trim().is_empty() {
        return SlackPayload::Ignored("empty_text");
    }
    let (Some(channel), Some(ts)) = (non_empty(event.channel), non_empty(event.ts)) else {
        return SlackPayload::Ignored("missing_channel_or_ts");
    };

    SlackPayload::HumanMessage(SlackThreadMessage {
        channel,
        ts,
        thread_ts: non_empty(event.thread_ts),
        user: event.user,
        text,
    })
}

fn is_bot_message(event: &SlackMessageEvent, bot_user_id: Option<&str>) -> bool {
    if event.bot_id.as_deref().is_some_and(|value| !value.is_empty()) {
        return true;
    }
    if event.subtype.as_deref() == Some("bot_message") {
        return true;
    }
    match (bot_user_id, event.user.as_deref()) {
        (Some(bot), Some(user)) => !bot.is_empty() && bot == user,
        _ => false,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum SlackApiError {
    #[error("slack request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("slack returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("slack api error: {0}")]
    Api(String),
    #[error("slack response had no message timestamp")]
    MissingTimestamp,
}

#[derive(Debug, Serialize)]
struct SlackPostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SlackPostMessageResponse {
    ok: bool,
    error: Option<String>,
    channel: Option<String>,
    ts: Option<String>,
    message: Option<SlackPostedMessage>,
}

#[derive(Debug, Deserialize)]
struct SlackPostedMessage {
    ts: Option<String>,
    thread_ts: Option<String>,
}

/// A successful `chat.postMessage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackPostResult {
    /// Channel id resolved by Slack; may differ from a `#name` we posted to.
    pub channel: Option<String>,
    /// The post's own timestamp.
    pub ts: String,
    /// Thread the post was attached to, for replies.
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SlackClient {
    client: Client,
    api_base: String,
    bot_token: String,
}

impl SlackClient {
    pub fn new(client: Client, api_base: impl Into<String>, bot_token: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        }
    }

    /// Posts `text` to `channel`, as a reply when `thread_ts` is given.
    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<SlackPostResult, SlackApiError> {
        let request = SlackPostMessageRequest {
            channel,
            text,
            thread_ts,
        };
        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SlackApiError::Status { status, body });
        }

        let api_response: SlackPostMessageResponse = response.json().await?;
        if !api_response.ok {
            return Err(SlackApiError::Api(
                api_response
                    .error
                    .unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }

        let message_ts = api_response.message.as_ref().and_then(|m| m.ts.clone());
        let ts = message_ts
            .or(api_response.ts)
            .ok_or(SlackApiError::MissingTimestamp)?;
        let thread_ts = api_response
            .message
            .and_then(|m| m.thread_ts)
            .or_else(|| thread_ts.map(str::to_string));

        Ok(SlackPostResult {
            channel: api_response.channel,
            ts,
            thread_ts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn classify(payload: serde_json::Value) -> SlackPayload {
        classify_slack_payload(payload.to_string().as_bytes(), Some("UBOT")).expect("classify")
    }

    #[test]
    fn url_verification_is_detected() {
        let payload = classify(json!({
            "token": "legacy",
            "type": "url_verification",
            "challenge": "abc123"
        }));
        assert_eq!(
            payload,
            SlackPayload::UrlVerification {
                challenge: "abc123".to_string()
            }
        );
    }

    #[test]
    fn bot_messages_are_flagged() {
        let by_bot_id = classify(json!({
            "type": "event_callback",
            "event": {"type": "message", "channel": "C1", "ts": "1.0", "text": "hi", "bot_id": "B1"}
        }));
        assert_eq!(by_bot_id, SlackPayload::BotMessage);

        let by_user = classify(json!({
            "type": "event_callback",
            "event": {"type": "message", "channel": "C1", "ts": "1.0", "text": "hi", "user": "UBOT"}
        }));
        assert_eq!(by_user, SlackPayload::BotMessage);
    }

    #[test]
    fn threaded_reply_uses_parent_for_lookup() {
        let payload = classify(json!({
            "type": "event_callback",
            "event": {
                "type": "message",
                "channel": "C1",
                "user": "U1",
                "text": "On it",
                "ts": "200.2",
                "thread_ts": "100.1"
            }
        }));
        let SlackPayload::HumanMessage(message) = payload else {
            panic!("expected human message");
        };
        assert_eq!(message.lookup_ts(), "100.1");
        assert_eq!(message.text, "On it");
    }

    #[test]
    fn root_message_uses_own_ts_for_lookup() {
        let payload = classify(json!({
            "type": "event_callback",
            "event": {"type": "message", "channel": "C1", "user": "U1", "text": "hey", "ts": "300.3"}
        }));
        let SlackPayload::HumanMessage(message) = payload else {
            panic!("expected human message");
        };
        assert_eq!(message.lookup_ts(), "300.3");
    }

    #[test]
    fn broadcast_and_file_share_replies_are_human() {
        for subtype in ["thread_broadcast", "file_share"] {
            let payload = classify(json!({
                "type": "event_callback",
                "event": {
                    "type": "message",
                    "subtype": subtype,
                    "channel": "C1",
                    "user": "U1",
                    "ts": "2.0",
                    "thread_ts": "1.0",
                    "text": "reply also sent to channel"
                }
            }));
            let SlackPayload::HumanMessage(message) = payload else {
                panic!("expected human message for {subtype}, got {payload:?}");
            };
            assert_eq!(message.lookup_ts(), "1.0");
        }

        let deleted = classify(json!({
            "type": "event_callback",
            "event": {"type": "message", "subtype": "message_deleted", "channel": "C1", "ts": "1.0", "text": "gone"}
        }));
        assert_eq!(deleted, SlackPayload::Ignored("message_subtype"));

        let joined = classify(json!({
            "type": "event_callback",
            "event": {"type": "message", "subtype": "channel_join", "channel": "C1", "user": "U1", "ts": "1.0", "text": "<@U1> has joined"}
        }));
        assert_eq!(joined, SlackPayload::Ignored("message_subtype"));
    }

    #[test]
    fn edits_and_non_messages_are_ignored() {
        let edit = classify(json!({
            "type": "event_callback",
            "event": {"type": "message", "subtype": "message_changed", "channel": "C1", "ts": "1.0"}
        }));
        assert_eq!(edit, SlackPayload::Ignored("message_subtype"));

        let reaction = classify(json!({
            "type": "event_callback",
            "event": {"type": "reaction_added", "user": "U1"}
        }));
        assert_eq!(reaction, SlackPayload::Ignored("not_message"));

        let empty = classify(json!({
            "type": "event_callback",
            "event": {"type": "message", "channel": "C1", "user": "U1", "ts": "1.0", "text": "  "}
        }));
        assert_eq!(empty, SlackPayload::Ignored("empty_text"));
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(classify_slack_payload(b"not json", None).is_err());
    }

    #[tokio::test]
    async fn post_message_returns_timestamps() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat.postMessage")
            .match_header("authorization", "Bearer xoxb-test")
            .match_body(Matcher::Json(json!({
                "channel": "#support",
                "text": "*Ana*: Help!",
                "thread_ts": "100.1"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"ok":true,"channel":"C123","ts":"200.2","message":{"ts":"200.2","thread_ts":"100.1"}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let client = SlackClient::new(Client::new(), server.url(), "xoxb-test");
        let result = client
            .post_message("#support", "*Ana*: Help!", Some("100.1"))
            .await
            .expect("post");

        assert_eq!(result.channel.as_deref(), Some("C123"));
        assert_eq!(result.ts, "200.2");
        assert_eq!(result.thread_ts.as_deref(), Some("100.1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn post_message_surfaces_api_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat.postMessage")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"error":"channel_not_found"}"#)
            .create_async()
            .await;

        let client = SlackClient::new(Client::new(), server.url(), "xoxb-test");
        let err = client
            .post_message("#missing", "hi", None)
            .await
            .expect_err("should fail");
        assert!(matches!(err, SlackApiError::Api(ref code) if code == "channel_not_found"));
    }

    #[tokio::test]
    async fn post_message_surfaces_http_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat.postMessage")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let client = SlackClient::new(Client::new(), server.url(), "xoxb-test");
        let err = client
            .post_message("C1", "hi", None)
            .await
            .expect_err("should fail");
        assert!(matches!(err, SlackApiError::Status { status: 503, .. }));
    }
}
