use anyhow::{anyhow, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::transport::DEFAULT_EVENT;

/// Channel names and texts one chat screen works with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Channel our messages are published on
    pub publish_channel: String,
    /// Channel the peer publishes on
    pub subscribe_channel: String,
    pub event_name: String,
    /// Title of the notification shown for incoming messages
    pub notification_title: String,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            publish_channel: "chatterbox-a".to_string(),
            subscribe_channel: "chatterbox-b".to_string(),
            event_name: DEFAULT_EVENT.to_string(),
            notification_title: "New Message".to_string(),
        }
    }
}

impl ChannelSettings {
    /// The same settings seen from the other end of the conversation
    pub fn crossed(&self) -> Self {
        Self {
            publish_channel: self.subscribe_channel.clone(),
            subscribe_channel: self.publish_channel.clone(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    pub channels: ChannelSettings,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            client_id: "me".to_string(),
            database_path: None,
            channels: ChannelSettings::default(),
        }
    }
}

impl ChatConfig {
    /// Load from `path`, or from the default location when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let file = File::open(&path)?;
        let config: ChatConfig = serde_json::from_reader(file)
            .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;
        info!("Loaded config for {} from {}", config.client_id, path.display());
        Ok(config)
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(file, self)?;

        info!("Config saved to {}", path.display());
        Ok(())
    }

    /// Environment variables win over the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(client_id) = env::var("CHATTERBOX_CLIENT_ID") {
            self.client_id = client_id;
        }
        if let Ok(channel) = env::var("CHATTERBOX_PUB_CHANNEL") {
            self.channels.publish_channel = channel;
        }
        if let Ok(channel) = env::var("CHATTERBOX_SUB_CHANNEL") {
            self.channels.subscribe_channel = channel;
        }
        if let Ok(db) = env::var("CHATTERBOX_DB") {
            self.database_path = Some(PathBuf::from(db));
        }
    }
}

pub fn config_dir() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("chatterbox");
    Ok(dir)
}

fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_channel_settings() {
        let config = ChatConfig::default();
        assert_eq!(config.channels.event_name, "default");
        assert_eq!(config.channels.notification_title, "New Message");
        assert_ne!(config.channels.publish_channel, config.channels.subscribe_channel);
    }

    #[test]
    fn test_crossed_swaps_channels() {
        let settings = ChannelSettings::default();
        let peer = settings.crossed();
        assert_eq!(peer.publish_channel, settings.subscribe_channel);
        assert_eq!(peer.subscribe_channel, settings.publish_channel);
        assert_eq!(peer.event_name, settings.event_name);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = ChatConfig::default();
        config.client_id = "tester".to_string();
        config.channels.publish_channel = "outbox".to_string();
        config.save(Some(path.as_path())).unwrap();

        let loaded = ChatConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_gives_defaults_and_partial_file_fills_in() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            ChatConfig::load(Some(dir.path().join("absent.json").as_path())).unwrap(),
            ChatConfig::default()
        );

        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "channels": { "subscribe_channel": "inbox" } }"#).unwrap();
        let loaded = ChatConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(loaded.client_id, "me");
        assert_eq!(loaded.channels.subscribe_channel, "inbox");
        assert_eq!(loaded.channels.event_name, "default");
    }
}
