#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use relay_module::{
    InMemoryMappingStore, MappingStore, MappingStoreError, RelayConfig, RelayState,
};

pub fn relay_state(
    server_url: &str,
    store: Arc<InMemoryMappingStore>,
    configure: impl FnOnce(&mut RelayConfig),
) -> Arc<RelayState> {
    relay_state_with_store(server_url, store, configure)
}

pub fn relay_state_with_store(
    server_url: &str,
    store: Arc<dyn MappingStore>,
    configure: impl FnOnce(&mut RelayConfig),
) -> Arc<RelayState> {
    let mut config = RelayConfig::new("xoxb-test", "cw-token");
    config.slack_api_base = server_url.to_string();
    config.chatwoot_base_url = server_url.to_string();
    configure(&mut config);
    Arc::new(RelayState::new(config, store))
}

/// Store whose every call fails, standing in for an unreachable backend.
pub struct UnavailableMappingStore;

#[async_trait]
impl MappingStore for UnavailableMappingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, MappingStoreError> {
        Err(MappingStoreError::LockPoisoned)
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), MappingStoreError> {
        Err(MappingStoreError::LockPoisoned)
    }

    async fn set_if_absent(&self, _key: &str, _value: &str) -> Result<bool, MappingStoreError> {
        Err(MappingStoreError::LockPoisoned)
    }
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

pub async fn body_status(response: Response) -> String {
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).expect("json body");
    body["status"].as_str().unwrap_or_default().to_string()
}

/// Relays to Chatwoot run detached, so tests poll the mock instead of awaiting.
pub async fn wait_until_matched(mock: &mockito::Mock) -> bool {
    for _ in 0..100 {
        if mock.matched_async().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub fn slack_post_ok(channel_id: &str, ts: &str, thread_ts: Option<&str>) -> String {
    let message = match thread_ts {
        Some(thread_ts) => serde_json::json!({"ts": ts, "thread_ts": thread_ts}),
        None => serde_json::json!({"ts": ts}),
    };
    serde_json::json!({"ok": true, "channel": channel_id, "ts": ts, "message": message}).to_string()
}
