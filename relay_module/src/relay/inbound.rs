use tracing::{debug, error, info, warn};

use crate::adapters::chatwoot::{ChatwootConversation, ChatwootWebhookEvent};
use crate::correlation::{ConversationRef, StoredConversation, ThreadRef};

use super::RelayState;

const DEFAULT_SENDER_NAME: &str = "Customer";

/// Where a destination channel came from, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSource {
    /// Custom attribute on the webhook's conversation or sender
    EventAttribute,
    /// Custom attribute found by re-reading the conversation from Chatwoot
    RecoveredConversation,
    InboxDefault,
    GlobalDefault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub channel: String,
    pub folder_id: Option<String>,
    pub source: ChannelSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Ignored(&'static str),
    NoChannel,
    StoreFailed,
    PostFailed,
    Posted {
        channel: String,
        thread_ts: String,
        message_ts: String,
        started_thread: bool,
    },
}

impl InboundOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            InboundOutcome::Ignored(_) => "ignored",
            InboundOutcome::NoChannel => "no_channel",
            InboundOutcome::StoreFailed => "store_failed",
            InboundOutcome::PostFailed => "post_failed",
            InboundOutcome::Posted {
                started_thread: true,
                ..
            } => "thread_started",
            InboundOutcome::Posted { .. } => "thread_reply",
        }
    }
}

/// Relays one Chatwoot webhook event into Slack.
///
/// The first successful post for a conversation becomes the thread root and
/// is recorded as the forward mapping; every later event replies in that
/// thread. Two deliveries racing on the same new conversation can both see
/// no thread and both start one. The forward write is first-wins, so later
/// events reply to one of them, while reverse entries keep both resolvable.
pub async fn relay_inbound_event(state: &RelayState, event: &ChatwootWebhookEvent) -> InboundOutcome {
    if !event.is_incoming_message() {
        debug!(
            "chatwoot event skipped event={:?} message_type={:?}",
            event.event, event.message_type
        );
        return InboundOutcome::Ignored("not_incoming_message");
    }
    let Some(text) = event.text() else {
        info!("chatwoot message has no content; skipping");
        return InboundOutcome::Ignored("empty_content");
    };
    let Some(conversation) = event.conversation_ref() else {
        warn!("chatwoot message has no conversation; skipping");
        return InboundOutcome::Ignored("missing_conversation");
    };

    let Some(destination) = resolve_destination(state, event).await else {
        warn!(
            "no slack channel for conversation={} inbox={:?}; message not relayed",
            conversation.conversation_id,
            event.inbox_id()
        );
        return InboundOutcome::NoChannel;
    };
    let conversation = ConversationRef {
        folder_id: destination.folder_id.clone(),
        ..conversation
    };

    let existing_thread = match state.correlations.thread_for(&conversation).await {
        Ok(thread_ts) => thread_ts,
        Err(err) => {
            error!(
                "mapping lookup failed key={}: {}",
                conversation.forward_key(),
                err
            );
            return InboundOutcome::StoreFailed;
        }
    };
    let started_thread = existing_thread.is_none();

    let body = compose_message(state, &conversation, event.sender_name(), text, started_thread);
    let posted = match state
        .slack
        .post_message(&destination.channel, &body, existing_thread.as_deref())
        .await
    {
        Ok(posted) => posted,
        Err(err) => {
            error!(
                "slack post failed channel={} conversation={}: {}",
                destination.channel, conversation.conversation_id, err
            );
            return InboundOutcome::PostFailed;
        }
    };

    let thread_ts = match existing_thread {
        Some(existing) => posted.thread_ts.clone().unwrap_or(existing),
        None => posted.ts.clone(),
    };

    if started_thread {
        match state
            .correlations
            .record_first_thread(&conversation, &posted.ts)
            .await
        {
            Ok(true) => info!(
                "thread started key={} thread_ts={}",
                conversation.forward_key(),
                posted.ts
            ),
            Ok(false) => warn!(
                "forward mapping key={} was set by a concurrent delivery; keeping existing entry",
                conversation.forward_key()
            ),
            Err(err) => error!(
                "failed to record forward mapping key={}: {}",
                conversation.forward_key(),
                err
            ),
        }
    }

    // Slack events name channels by id, so the id Slack resolved is recorded
    // alongside the configured name when the two differ.
    let record_channel = posted
        .channel
        .clone()
        .unwrap_or_else(|| destination.channel.clone());
    let record = StoredConversation::new(&conversation, &record_channel);
    let mut channels = vec![destination.channel.clone()];
    if record_channel != destination.channel {
        channels.push(record_channel);
    }
    for channel in channels {
        let thread = ThreadRef {
            channel,
            thread_ts: Some(thread_ts.clone()),
        };
        if let Err(err) = state.correlations.record_reverse(&thread, &record).await {
            error!(
                "failed to record reverse mapping key={:?}: {}",
                thread.reverse_key(),
                err
            );
        }
    }

    info!(
        "relayed chatwoot conversation={} to slack channel={} thread_ts={} new_thread={}",
        conversation.conversation_id, destination.channel, thread_ts, started_thread
    );
    InboundOutcome::Posted {
        channel: destination.channel,
        thread_ts,
        message_ts: posted.ts,
        started_thread,
    }
}

/// Picks the Slack channel for an event.
///
/// Order: custom attribute on the event, the same attribute on a fresh read
/// of the conversation (the attribute can land after the first message
/// webhook fires), the inbox's static channel, the global default.
pub async fn resolve_destination(
    state: &RelayState,
    event: &ChatwootWebhookEvent,
) -> Option<Destination> {
    let config = &state.config;
    let folder_id = event.attribute(&config.folder_attribute);

    if let Some(channel) = event.attribute(&config.channel_attribute) {
        return Some(Destination {
            channel,
            folder_id,
            source: ChannelSource::EventAttribute,
        });
    }

    if let Some(recovered) = recover_conversation(state, event).await {
        if let Some(channel) = recovered.attribute(&config.channel_attribute) {
            info!(
                "recovered slack channel={} for conversation={} from chatwoot",
                channel, recovered.id
            );
            return Some(Destination {
                channel,
                folder_id: folder_id.or_else(|| recovered.attribute(&config.folder_attribute)),
                source: ChannelSource::RecoveredConversation,
            });
        }
    }

    if let Some(channel) = config.inbox_channel(event.inbox_id()) {
        return Some(Destination {
            channel: channel.to_string(),
            folder_id,
            source: ChannelSource::InboxDefault,
        });
    }

    config
        .slack_default_channel
        .clone()
        .map(|channel| Destination {
            channel,
            folder_id,
            source: ChannelSource::GlobalDefault,
        })
}

async fn recover_conversation(
    state: &RelayState,
    event: &ChatwootWebhookEvent,
) -> Option<ChatwootConversation> {
    let conversation_id = event.conversation.as_ref()?.id.as_str();
    let Some(account_id) = event.account_id() else {
        debug!(
            "no account id on event; cannot re-read conversation={}",
            conversation_id
        );
        return None;
    };
    match state
        .chatwoot
        .fetch_conversation(account_id, conversation_id)
        .await
    {
        Ok(conversation) => Some(conversation),
        Err(err) => {
            warn!(
                "chatwoot conversation fetch failed account={} conversation={}: {}",
                account_id, conversation_id, err
            );
            None
        }
    }
}

fn compose_message(
    state: &RelayState,
    conversation: &ConversationRef,
    sender_name: Option<&str>,
    text: &str,
    started_thread: bool,
) -> String {
    let body = format!("*{}*: {}", sender_name.unwrap_or(DEFAULT_SENDER_NAME), text);
    if started_thread && state.config.mark_thread_parent {
        format!(
            ":speech_balloon: New conversation #{}\n{}",
            conversation.conversation_id, body
        )
    } else {
        body
    }
}
