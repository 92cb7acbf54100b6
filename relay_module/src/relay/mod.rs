//! Both relay directions over one shared correlation store.
//!
//! Neither direction ever reports a downstream failure to the webhook that
//! triggered it: both platforms redeliver on error, which would duplicate
//! relayed messages. Every recoverable condition ends as a log line plus an
//! outcome value the gateway turns into a 200 acknowledgment.

mod inbound;
mod outbound;

use std::sync::Arc;

use reqwest::Client;

use crate::adapters::chatwoot::ChatwootClient;
use crate::adapters::slack::SlackClient;
use crate::config::RelayConfig;
use crate::correlation::CorrelationStore;
use crate::mapping_store::MappingStore;

pub use inbound::{
    relay_inbound_event, resolve_destination, ChannelSource, Destination, InboundOutcome,
};
pub use outbound::{
    relay_to_chatwoot, resolve_slack_event, spawn_chatwoot_relay, ChatwootRelayJob,
    SlackEventDecision,
};

pub struct RelayState {
    pub config: RelayConfig,
    pub correlations: CorrelationStore,
    pub slack: SlackClient,
    pub chatwoot: ChatwootClient,
}

impl RelayState {
    pub fn new(config: RelayConfig, store: Arc<dyn MappingStore>) -> Self {
        // No timeouts beyond reqwest's own defaults.
        let client = Client::new();
        let correlations = CorrelationStore::new(store, config.legacy_account_id.clone());
        let slack = SlackClient::new(
            client.clone(),
            config.slack_api_base.clone(),
            config.slack_bot_token.clone(),
        );
        let chatwoot = ChatwootClient::new(
            client,
            config.chatwoot_base_url.clone(),
            config.chatwoot_api_token.clone(),
        );
        Self {
            config,
            correlations,
            slack,
            chatwoot,
        }
    }
}
