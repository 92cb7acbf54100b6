//! Relay configuration.
//!
//! Values come from the environment (after loading `.env`), plus an optional
//! TOML file for the per-inbox channel defaults:
//!
//! ```toml
//! [inboxes]
//! 71647 = "#support"
//! ```

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::adapters::chatwoot::{ChatwootMessageType, DEFAULT_CHATWOOT_BASE_URL};
use crate::adapters::slack::DEFAULT_SLACK_API_BASE;
use crate::correlation::DEFAULT_LEGACY_ACCOUNT_ID;
use crate::mapping_store::MappingStoreBackend;

pub const DEFAULT_RELAY_BODY_MAX_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_CHANNEL_ATTRIBUTE: &str = "slack_channel";
pub const DEFAULT_FOLDER_ATTRIBUTE: &str = "folder_id";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, thiserror::Error)]
pub enum RelayConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("failed to read relay config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse relay config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Default)]
pub struct RelayConfigFile {
    /// Chatwoot inbox id → Slack channel used when a conversation names none.
    #[serde(default)]
    pub inboxes: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub mapping_store: MappingStoreBackend,
    pub slack_api_base: String,
    pub slack_bot_token: String,
    /// Enables request signature checks on the Slack events endpoint
    pub slack_signing_secret: Option<String>,
    /// Our own bot user; its messages are never relayed back
    pub slack_bot_user_id: Option<String>,
    /// Last-resort destination when neither the conversation nor its inbox names one
    pub slack_default_channel: Option<String>,
    /// Prefix the first post of a conversation with a thread header line
    pub mark_thread_parent: bool,
    pub chatwoot_base_url: String,
    pub chatwoot_api_token: String,
    /// `message_type` of agent replies written back to Chatwoot
    pub chatwoot_reply_message_type: ChatwootMessageType,
    pub legacy_account_id: String,
    pub channel_attribute: String,
    pub folder_attribute: String,
    pub inbox_channels: HashMap<String, String>,
}

impl RelayConfig {
    /// Defaults for everything except the two platform credentials.
    pub fn new(slack_bot_token: impl Into<String>, chatwoot_api_token: impl Into<String>) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9200,
            max_body_bytes: DEFAULT_RELAY_BODY_MAX_BYTES,
            mapping_store: MappingStoreBackend::Redis {
                url: DEFAULT_REDIS_URL.to_string(),
            },
            slack_api_base: DEFAULT_SLACK_API_BASE.to_string(),
            slack_bot_token: slack_bot_token.into(),
            slack_signing_secret: None,
            slack_bot_user_id: None,
            slack_default_channel: None,
            mark_thread_parent: false,
            chatwoot_base_url: DEFAULT_CHATWOOT_BASE_URL.to_string(),
            chatwoot_api_token: chatwoot_api_token.into(),
            chatwoot_reply_message_type: ChatwootMessageType::Outgoing,
            legacy_account_id: DEFAULT_LEGACY_ACCOUNT_ID.to_string(),
            channel_attribute: DEFAULT_CHANNEL_ATTRIBUTE.to_string(),
            folder_attribute: DEFAULT_FOLDER_ATTRIBUTE.to_string(),
            inbox_channels: HashMap::new(),
        }
    }

    pub fn from_env() -> Result<Self, RelayConfigError> {
        dotenvy::dotenv().ok();

        let slack_bot_token =
            env_value("SLACK_BOT_TOKEN").ok_or(RelayConfigError::Missing("SLACK_BOT_TOKEN"))?;
        let chatwoot_api_token = env_value("CHATWOOT_API_TOKEN")
            .ok_or(RelayConfigError::Missing("CHATWOOT_API_TOKEN"))?;
        let mut config = Self::new(slack_bot_token, chatwoot_api_token);

        if let Some(host) = env_value("RELAY_HOST") {
            config.host = host;
        }
        if let Some(port) = env_value("RELAY_PORT") {
            config.port = port.parse().map_err(|_| RelayConfigError::Invalid {
                key: "RELAY_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(max) = env_value("RELAY_MAX_BODY_BYTES") {
            config.max_body_bytes = max
                .parse::<usize>()
                .ok()
                .filter(|value| *value > 0)
                .ok_or(RelayConfigError::Invalid {
                    key: "RELAY_MAX_BODY_BYTES",
                    value: max.clone(),
                })?;
        }

        config.mapping_store = resolve_mapping_store_backend()?;

        if let Some(base) = env_value("SLACK_API_BASE") {
            config.slack_api_base = base;
        }
        config.slack_signing_secret = env_value("SLACK_SIGNING_SECRET");
        config.slack_bot_user_id = env_value("SLACK_BOT_USER_ID");
        config.slack_default_channel = env_value("SLACK_DEFAULT_CHANNEL");
        config.mark_thread_parent = env_value("SLACK_MARK_THREAD_PARENT")
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        if let Some(base) = env_value("CHATWOOT_BASE_URL") {
            config.chatwoot_base_url = base;
        }
        if let Some(message_type) = env_value("CHATWOOT_REPLY_MESSAGE_TYPE") {
            config.chatwoot_reply_message_type =
                message_type.parse().map_err(|_| RelayConfigError::Invalid {
                    key: "CHATWOOT_REPLY_MESSAGE_TYPE",
                    value: message_type.clone(),
                })?;
        }
        if let Some(account_id) = env_value("CHATWOOT_LEGACY_ACCOUNT_ID") {
            config.legacy_account_id = account_id;
        }
        if let Some(attribute) = env_value("CHANNEL_ATTRIBUTE") {
            config.channel_attribute = attribute;
        }
        if let Some(attribute) = env_value("FOLDER_ATTRIBUTE") {
            config.folder_attribute = attribute;
        }

        if let Some(path) = resolve_relay_config_path() {
            config.inbox_channels = load_relay_config(&path)?.inboxes;
        }

        Ok(config)
    }

    /// Static channel configured for an inbox.
    pub fn inbox_channel(&self, inbox_id: Option<&str>) -> Option<&str> {
        inbox_id
            .and_then(|inbox_id| self.inbox_channels.get(inbox_id))
            .map(|channel| channel.trim())
            .filter(|channel| !channel.is_empty())
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn resolve_mapping_store_backend() -> Result<MappingStoreBackend, RelayConfigError> {
    let backend = env_value("MAPPING_STORE_BACKEND").unwrap_or_else(|| "redis".to_string());
    match backend.to_ascii_lowercase().as_str() {
        "redis" => Ok(MappingStoreBackend::Redis {
            url: env_value("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
        }),
        "memory" => Ok(MappingStoreBackend::Memory),
        _ => Err(RelayConfigError::Invalid {
            key: "MAPPING_STORE_BACKEND",
            value: backend,
        }),
    }
}

/// `RELAY_CONFIG_PATH`, else `relay.toml` in the working directory if present.
pub fn resolve_relay_config_path() -> Option<PathBuf> {
    if let Some(path) = env_value("RELAY_CONFIG_PATH") {
        return Some(PathBuf::from(path));
    }
    let direct = env::current_dir().ok()?.join("relay.toml");
    direct.exists().then_some(direct)
}

pub fn load_relay_config(path: &Path) -> Result<RelayConfigFile, RelayConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| RelayConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<RelayConfigFile>(&content).map_err(|source| RelayConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const KEYS: &[&str] = &[
        "SLACK_BOT_TOKEN",
        "CHATWOOT_API_TOKEN",
        "RELAY_PORT",
        "RELAY_CONFIG_PATH",
        "MAPPING_STORE_BACKEND",
        "REDIS_URL",
        "CHATWOOT_REPLY_MESSAGE_TYPE",
        "SLACK_MARK_THREAD_PARENT",
        "SLACK_DEFAULT_CHANNEL",
    ];

    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn clear() -> Self {
            let saved = KEYS
                .iter()
                .map(|key| {
                    let original = env::var(key).ok();
                    env::remove_var(key);
                    (*key, original)
                })
                .collect();
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, original) in &self.saved {
                match original {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    #[serial]
    fn missing_tokens_are_rejected() {
        let _guard = EnvGuard::clear();
        let err = RelayConfig::from_env().expect_err("should fail");
        assert!(matches!(err, RelayConfigError::Missing("SLACK_BOT_TOKEN")));
    }

    #[test]
    #[serial]
    fn loads_env_and_inbox_file() {
        let _guard = EnvGuard::clear();
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("relay.toml");
        std::fs::write(&path, "[inboxes]\n71647 = \"#support\"\n").expect("write");

        env::set_var("SLACK_BOT_TOKEN", "xoxb-test");
        env::set_var("CHATWOOT_API_TOKEN", "cw-token");
        env::set_var("RELAY_PORT", "9300");
        env::set_var("RELAY_CONFIG_PATH", &path);
        env::set_var("MAPPING_STORE_BACKEND", "memory");
        env::set_var("CHATWOOT_REPLY_MESSAGE_TYPE", "incoming");
        env::set_var("SLACK_MARK_THREAD_PARENT", "true");

        let config = RelayConfig::from_env().expect("config");
        assert_eq!(config.port, 9300);
        assert_eq!(config.mapping_store, MappingStoreBackend::Memory);
        assert_eq!(
            config.chatwoot_reply_message_type,
            ChatwootMessageType::Incoming
        );
        assert!(config.mark_thread_parent);
        assert_eq!(config.inbox_channel(Some("71647")), Some("#support"));
        assert_eq!(config.inbox_channel(Some("1")), None);
    }

    #[test]
    #[serial]
    fn invalid_backend_is_rejected() {
        let _guard = EnvGuard::clear();
        env::set_var("MAPPING_STORE_BACKEND", "memcached");
        let err = resolve_mapping_store_backend().expect_err("should fail");
        assert!(matches!(
            err,
            RelayConfigError::Invalid {
                key: "MAPPING_STORE_BACKEND",
                ..
            }
        ));
    }

    #[test]
    fn blank_inbox_channel_is_ignored() {
        let mut config = RelayConfig::new("xoxb", "cw");
        config
            .inbox_channels
            .insert("5".to_string(), "#billing".to_string());
        config.inbox_channels.insert("6".to_string(), "  ".to_string());
        assert_eq!(config.inbox_channel(Some("5")), Some("#billing"));
        assert_eq!(config.inbox_channel(Some("6")), None);
        assert_eq!(config.inbox_channel(None), None);
    }
}
