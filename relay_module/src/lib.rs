pub mod adapters;
pub mod config;
pub mod correlation;
pub mod gateway;
pub mod mapping_store;
pub mod relay;
pub mod verify;

pub(crate) mod ids;

pub use config::{RelayConfig, RelayConfigError};
pub use correlation::{ConversationRef, CorrelationStore, StoredConversation, ThreadRef};
pub use mapping_store::{InMemoryMappingStore, MappingStore, MappingStoreError};
pub use relay::{InboundOutcome, RelayState, SlackEventDecision};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
