use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::chatwoot::ChatwootApiError;
use crate::adapters::slack::{SlackPayload, SlackThreadMessage};
use crate::correlation::ConversationRef;

use super::RelayState;

/// A Slack reply ready to be written back to its Chatwoot conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatwootRelayJob {
    pub conversation: ConversationRef,
    pub text: String,
    pub channel: String,
    pub thread_ts: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackEventDecision {
    /// Handshake; answer with the token and do nothing else.
    Challenge(String),
    Ignored(&'static str),
    Unmapped,
    StoreFailed,
    Relay(ChatwootRelayJob),
}

impl SlackEventDecision {
    pub fn status(&self) -> &'static str {
        match self {
            SlackEventDecision::Challenge(_) => "challenge",
            SlackEventDecision::Ignored(_) => "ignored",
            SlackEventDecision::Unmapped => "unmapped",
            SlackEventDecision::StoreFailed => "store_failed",
            SlackEventDecision::Relay(_) => "accepted",
        }
    }
}

/// Decides what a classified Slack payload means for the relay. Only human
/// messages touch the mapping store.
pub async fn resolve_slack_event(state: &RelayState, payload: SlackPayload) -> SlackEventDecision {
    match payload {
        SlackPayload::UrlVerification { challenge } => SlackEventDecision::Challenge(challenge),
        SlackPayload::BotMessage => {
            debug!("ignoring slack bot message");
            SlackEventDecision::Ignored("bot_message")
        }
        SlackPayload::Ignored(reason) => {
            debug!("ignoring slack event: {}", reason);
            SlackEventDecision::Ignored(reason)
        }
        SlackPayload::HumanMessage(message) => resolve_thread_message(state, message).await,
    }
}

async fn resolve_thread_message(state: &RelayState, message: SlackThreadMessage) -> SlackEventDecision {
    let lookup_ts = message.lookup_ts().to_string();
    let record = match state
        .correlations
        .conversation_for(&message.channel, &lookup_ts)
        .await
    {
        Ok(record) => record,
        Err(err) => {
            error!(
                "mapping lookup failed key={}:{}: {}",
                message.channel, lookup_ts, err
            );
            return SlackEventDecision::StoreFailed;
        }
    };

    let Some(record) = record else {
        if message.thread_ts.is_some() {
            warn!(
                "no conversation mapped for slack thread {}:{}",
                message.channel, lookup_ts
            );
        } else {
            debug!(
                "slack message {}:{} is not a relayed thread",
                message.channel, lookup_ts
            );
        }
        return SlackEventDecision::Unmapped;
    };

    SlackEventDecision::Relay(ChatwootRelayJob {
        conversation: record.conversation(),
        text: message.text,
        channel: message.channel,
        thread_ts: lookup_ts,
    })
}

/// Writes a Slack reply to Chatwoot. Failures are logged and returned, never
/// retried.
pub async fn relay_to_chatwoot(
    state: &RelayState,
    job: &ChatwootRelayJob,
) -> Result<(), ChatwootApiError> {
    let result = state
        .chatwoot
        .create_message(
            &job.conversation,
            &job.text,
            state.config.chatwoot_reply_message_type,
        )
        .await;
    match &result {
        Ok(()) => info!(
            "relayed slack thread {}:{} to chatwoot conversation={}",
            job.channel, job.thread_ts, job.conversation.conversation_id
        ),
        Err(err) => error!(
            "chatwoot relay failed conversation={} account={:?}: {}",
            job.conversation.conversation_id, job.conversation.account_id, err
        ),
    }
    result
}

/// Runs the relay detached from the webhook request that triggered it.
pub fn spawn_chatwoot_relay(state: Arc<RelayState>, job: ChatwootRelayJob) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _ = relay_to_chatwoot(&state, &job).await;
    })
}
