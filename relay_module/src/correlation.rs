//! Conversation ↔ thread correlation on top of a `MappingStore`.
//!
//! Two projections are kept for one logical pair:
//! - forward: `conv:{conversationId}:thread` (or
//!   `folder:{folderId}:conv:{conversationId}:thread`) → root thread timestamp
//! - reverse: `{channel}:{threadTimestamp}` → serialized conversation record
//!
//! Reverse values written before the structured record existed hold a bare
//! conversation id. Both shapes decode through `StoredConversation::decode`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ids::{optional_string_or_number, string_or_number};
use crate::mapping_store::{MappingStore, MappingStoreError};

/// Account assumed for reverse entries that only stored a conversation id.
pub const DEFAULT_LEGACY_ACCOUNT_ID: &str = "1";

/// A support-inbox conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRef {
    pub account_id: Option<String>,
    pub conversation_id: String,
    pub folder_id: Option<String>,
}

impl ConversationRef {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            account_id: None,
            conversation_id: conversation_id.into(),
            folder_id: None,
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    /// Key of the forward mapping entry for this conversation.
    pub fn forward_key(&self) -> String {
        match self
            .folder_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(folder_id) => format!("folder:{}:conv:{}:thread", folder_id, self.conversation_id),
            None => format!("conv:{}:thread", self.conversation_id),
        }
    }
}

/// A chat thread. `thread_ts` stays empty until the first post succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRef {
    pub channel: String,
    pub thread_ts: Option<String>,
}

impl ThreadRef {
    /// Key of the reverse mapping entry, once the thread exists.
    pub fn reverse_key(&self) -> Option<String> {
        self.thread_ts
            .as_deref()
            .map(|thread_ts| reverse_key(&self.channel, thread_ts))
    }
}

pub fn reverse_key(channel: &str, thread_ts: &str) -> String {
    format!("{}:{}", channel, thread_ts)
}

/// Reverse mapping value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredConversation {
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub account_id: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub conversation_id: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

impl StoredConversation {
    pub fn new(conversation: &ConversationRef, channel: &str) -> Self {
        Self {
            account_id: conversation.account_id.clone(),
            conversation_id: conversation.conversation_id.clone(),
            folder_id: conversation.folder_id.clone(),
            channel: Some(channel.to_string()),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Structured record first, bare conversation id second. Returns `None`
    /// for a blank value or a JSON object that is not a valid record.
    pub fn decode(raw: &str, legacy_account_id: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_str::<StoredConversation>(trimmed) {
            Ok(record) => return Some(record),
            Err(err) if trimmed.starts_with('{') => {
                warn!("undecodable conversation record {}: {}", trimmed, err);
                return None;
            }
            Err(_) => {}
        }
        Some(Self {
            account_id: Some(legacy_account_id.to_string()),
            conversation_id: trimmed.trim_matches('"').to_string(),
            folder_id: None,
            channel: None,
        })
    }

    pub fn conversation(&self) -> ConversationRef {
        ConversationRef {
            account_id: self.account_id.clone(),
            conversation_id: self.conversation_id.clone(),
            folder_id: self.folder_id.clone(),
        }
    }
}

/// Typed access to both mapping projections.
#[derive(Clone)]
pub struct CorrelationStore {
    store: Arc<dyn MappingStore>,
    legacy_account_id: String,
}

impl CorrelationStore {
    pub fn new(store: Arc<dyn MappingStore>, legacy_account_id: impl Into<String>) -> Self {
        Self {
            store,
            legacy_account_id: legacy_account_id.into(),
        }
    }

    /// Root thread timestamp for a conversation. `None` means no thread yet.
    pub async fn thread_for(
        &self,
        conversation: &ConversationRef,
    ) -> Result<Option<String>, MappingStoreError> {
        let value = self.store.get(&conversation.forward_key()).await?;
        Ok(value
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()))
    }

    /// Records the thread a conversation started. Never overwrites an existing
    /// entry; returns `false` when another delivery got there first.
    pub async fn record_first_thread(
        &self,
        conversation: &ConversationRef,
        thread_ts: &str,
    ) -> Result<bool, MappingStoreError> {
        self.store
            .set_if_absent(&conversation.forward_key(), thread_ts)
            .await
    }

    pub async fn record_reverse(
        &self,
        thread: &ThreadRef,
        record: &StoredConversation,
    ) -> Result<(), MappingStoreError> {
        let Some(key) = thread.reverse_key() else {
            return Ok(());
        };
        let value = record.encode()?;
        self.store.set(&key, &value).await
    }

    pub async fn conversation_for(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Option<StoredConversation>, MappingStoreError> {
        let raw = self.store.get(&reverse_key(channel, thread_ts)).await?;
        Ok(raw.and_then(|raw| StoredConversation::decode(&raw, &self.legacy_account_id)))
    }
}
