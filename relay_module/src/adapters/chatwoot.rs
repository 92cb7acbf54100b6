//! Chatwoot adapter for the support-inbox side of the relay.
//!
//! - Webhook payload types for `message_created` events
//! - `ChatwootClient` for conversation lookups and posting messages

use std::fmt;
use std::str::FromStr;

use reqwest::Client;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::correlation::ConversationRef;
use crate::ids::{optional_string_or_number, string_or_number, value_to_id};

pub const DEFAULT_CHATWOOT_BASE_URL: &str = "https://app.chatwoot.com";

/// Webhook body posted by Chatwoot for conversation and message events.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatwootWebhookEvent {
    pub event: Option<String>,
    #[serde(default, deserialize_with = "message_type")]
    pub message_type: Option<String>,
    pub content: Option<String>,
    pub conversation: Option<ChatwootConversation>,
    pub sender: Option<ChatwootContact>,
    pub inbox: Option<ChatwootInbox>,
    pub account: Option<ChatwootAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatwootConversation {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub account_id: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub inbox_id: Option<String>,
    #[serde(default, deserialize_with = "attribute_map")]
    pub custom_attributes: Map<String, Value>,
    pub meta: Option<ChatwootConversationMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatwootConversationMeta {
    pub sender: Option<ChatwootContact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatwootContact {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "attribute_map")]
    pub custom_attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatwootInbox {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatwootAccount {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

impl ChatwootWebhookEvent {
    pub fn is_incoming_message(&self) -> bool {
        self.event.as_deref() == Some("message_created")
            && self.message_type.as_deref() == Some("incoming")
    }

    /// Message text, if any survives trimming.
    pub fn text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn sender_name(&self) -> Option<&str> {
        self.sender
            .as_ref()
            .and_then(|sender| sender.name.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account
            .as_ref()
            .map(|account| account.id.as_str())
            .or_else(|| {
                self.conversation
                    .as_ref()
                    .and_then(|conversation| conversation.account_id.as_deref())
            })
    }

    pub fn inbox_id(&self) -> Option<&str> {
        self.inbox.as_ref().map(|inbox| inbox.id.as_str()).or_else(|| {
            self.conversation
                .as_ref()
                .and_then(|conversation| conversation.inbox_id.as_deref())
        })
    }

    /// Looks `name` up on the conversation first, then on the sender. The
    /// attribute moved between the two over time, so both are checked.
    pub fn attribute(&self, name: &str) -> Option<String> {
        let from_conversation = self
            .conversation
            .as_ref()
            .and_then(|conversation| conversation.attribute(name));
        from_conversation.or_else(|| {
            self.sender
                .as_ref()
                .and_then(|sender| attribute_value(&sender.custom_attributes, name))
        })
    }

    /// Conversation reference carried by this event, without folder.
    pub fn conversation_ref(&self) -> Option<ConversationRef> {
        let conversation = self.conversation.as_ref()?;
        Some(ConversationRef {
            account_id: self.account_id().map(str::to_string),
            conversation_id: conversation.id.clone(),
            folder_id: None,
        })
    }
}

impl ChatwootConversation {
    /// Attribute from the conversation or its embedded contact.
    pub fn attribute(&self, name: &str) -> Option<String> {
        attribute_value(&self.custom_attributes, name).or_else(|| {
            self.meta
                .as_ref()
                .and_then(|meta| meta.sender.as_ref())
                .and_then(|sender| attribute_value(&sender.custom_attributes, name))
        })
    }
}

fn attribute_value(attributes: &Map<String, Value>, name: &str) -> Option<String> {
    attributes.get(name).and_then(value_to_id)
}

fn attribute_map<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    })
}

/// Chatwoot has sent `message_type` both as a name and as its enum ordinal.
fn message_type<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(value)) => Some(value.trim().to_ascii_lowercase()),
        Some(Value::Number(value)) => match value.as_u64() {
            Some(0) => Some("incoming".to_string()),
            Some(1) => Some("outgoing".to_string()),
            Some(2) => Some("activity".to_string()),
            Some(3) => Some("template".to_string()),
            _ => None,
        },
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatwootMessageType {
    Incoming,
    Outgoing,
}

impl fmt::Display for ChatwootMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatwootMessageType::Incoming => write!(f, "incoming"),
            ChatwootMessageType::Outgoing => write!(f, "outgoing"),
        }
    }
}

impl FromStr for ChatwootMessageType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "incoming" => Ok(ChatwootMessageType::Incoming),
            "outgoing" => Ok(ChatwootMessageType::Outgoing),
            other => Err(format!("unknown chatwoot message type: {}", other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatwootApiError {
    #[error("chatwoot request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chatwoot returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Serialize)]
struct ChatwootCreateMessageRequest<'a> {
    content: &'a str,
    message_type: ChatwootMessageType,
}

#[derive(Debug, Clone)]
pub struct ChatwootClient {
    client: Client,
    base_url: String,
    api_token: String,
}

impl ChatwootClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        }
    }

    /// Account-scoped path when the account is known, the legacy unscoped
    /// path otherwise.
    fn conversation_url(&self, account_id: Option<&str>, conversation_id: &str) -> String {
        match account_id {
            Some(account_id) => format!(
                "{}/api/v1/accounts/{}/conversations/{}",
                self.base_url, account_id, conversation_id
            ),
            None => format!("{}/api/v1/conversations/{}", self.base_url, conversation_id),
        }
    }

    /// Current conversation detail, including custom attributes that may not
    /// have been present on an earlier webhook.
    pub async fn fetch_conversation(
        &self,
        account_id: &str,
        conversation_id: &str,
    ) -> Result<ChatwootConversation, ChatwootApiError> {
        let response = self
            .client
            .get(self.conversation_url(Some(account_id), conversation_id))
            .header("api_access_token", &self.api_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatwootApiError::Status { status, body });
        }
        Ok(response.json().await?)
    }

    pub async fn create_message(
        &self,
        conversation: &ConversationRef,
        content: &str,
        message_type: ChatwootMessageType,
    ) -> Result<(), ChatwootApiError> {
        let url = format!(
            "{}/messages",
            self.conversation_url(
                conversation.account_id.as_deref(),
                &conversation.conversation_id
            )
        );
        let response = self
            .client
            .post(url)
            .header("api_access_token", &self.api_token)
            .json(&ChatwootCreateMessageRequest {
                content,
                message_type,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatwootApiError::Status { status, body });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn incoming_event() -> ChatwootWebhookEvent {
        serde_json::from_value(json!({
            "event": "message_created",
            "message_type": "incoming",
            "content": "  Help!  ",
            "account": {"id": 3, "name": "Acme"},
            "inbox": {"id": 71647, "name": "Support"},
            "sender": {"id": 5, "name": "Ana", "custom_attributes": {"slack_channel": "#vip"}},
            "conversation": {
                "id": 42,
                "inbox_id": 71647,
                "custom_attributes": {"slack_channel": "#support", "folder_id": 9},
                "meta": {"sender": {"name": "Ana", "custom_attributes": {}}}
            }
        }))
        .expect("event")
    }

    #[test]
    fn parses_incoming_message() {
        let event = incoming_event();
        assert!(event.is_incoming_message());
        assert_eq!(event.text(), Some("Help!"));
        assert_eq!(event.sender_name(), Some("Ana"));
        assert_eq!(event.account_id(), Some("3"));
        assert_eq!(event.inbox_id(), Some("71647"));

        let conversation = event.conversation_ref().expect("conversation");
        assert_eq!(conversation.conversation_id, "42");
        assert_eq!(conversation.account_id.as_deref(), Some("3"));
    }

    #[test]
    fn conversation_attribute_wins_over_sender() {
        let event = incoming_event();
        assert_eq!(event.attribute("slack_channel").as_deref(), Some("#support"));
        assert_eq!(event.attribute("folder_id").as_deref(), Some("9"));
    }

    #[test]
    fn sender_attribute_is_used_when_conversation_lacks_it() {
        let event: ChatwootWebhookEvent = serde_json::from_value(json!({
            "event": "message_created",
            "message_type": "incoming",
            "content": "hi",
            "sender": {"name": "Ana", "custom_attributes": {"slack_channel": "#vip"}},
            "conversation": {"id": "42", "custom_attributes": null}
        }))
        .expect("event");
        assert_eq!(event.attribute("slack_channel").as_deref(), Some("#vip"));
    }

    #[test]
    fn numeric_message_type_is_understood() {
        let event: ChatwootWebhookEvent = serde_json::from_value(json!({
            "event": "message_created",
            "message_type": 0,
            "content": "hi",
            "conversation": {"id": 1}
        }))
        .expect("event");
        assert!(event.is_incoming_message());

        let outgoing: ChatwootWebhookEvent = serde_json::from_value(json!({
            "event": "message_created",
            "message_type": "outgoing",
            "content": "hi",
            "conversation": {"id": 1}
        }))
        .expect("event");
        assert!(!outgoing.is_incoming_message());
    }

    #[test]
    fn message_type_parses_from_config_values() {
        assert_eq!(
            "Outgoing".parse::<ChatwootMessageType>(),
            Ok(ChatwootMessageType::Outgoing)
        );
        assert!("private".parse::<ChatwootMessageType>().is_err());
    }

    #[tokio::test]
    async fn create_message_uses_account_scoped_path() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/accounts/3/conversations/42/messages")
            .match_header("api_access_token", "cw-token")
            .match_body(Matcher::Json(json!({
                "content": "On it",
                "message_type": "outgoing"
            })))
            .with_status(200)
            .with_body(r#"{"id":1}"#)
            .expect(1)
            .create_async()
            .await;

        let client = ChatwootClient::new(Client::new(), server.url(), "cw-token");
        client
            .create_message(
                &ConversationRef::new("42").with_account("3"),
                "On it",
                ChatwootMessageType::Outgoing,
            )
            .await
            .expect("create");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn create_message_without_account_uses_legacy_path() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/conversations/42/messages")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let client = ChatwootClient::new(Client::new(), server.url(), "cw-token");
        client
            .create_message(&ConversationRef::new("42"), "hi", ChatwootMessageType::Incoming)
            .await
            .expect("create");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_conversation_reports_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/accounts/3/conversations/42")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;

        let client = ChatwootClient::new(Client::new(), server.url(), "cw-token");
        let err = client
            .fetch_conversation("3", "42")
            .await
            .expect_err("should fail");
        assert!(matches!(err, ChatwootApiError::Status { status: 404, .. }));
    }
}
