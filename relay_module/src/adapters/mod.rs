//! Platform adapters for the two ends of the relay.
//!
//! Each adapter owns the webhook payload types of its platform and a small
//! async HTTP client for the calls the relay makes back into it.

pub mod chatwoot;
pub mod slack;

pub use chatwoot::{
    ChatwootApiError, ChatwootClient, ChatwootConversation, ChatwootMessageType,
    ChatwootWebhookEvent,
};
pub use slack::{
    classify_slack_payload, is_url_verification, SlackApiError, SlackClient, SlackPayload,
    SlackPostResult, SlackThreadMessage,
};
