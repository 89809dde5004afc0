//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use walletlink_lib::{AppMetadata, RelayProtocolOptions};

use crate::{EngineError, Result};

/// Settings shared by the pairing and session engines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Whether this peer acts as controller (typically the wallet).
    #[serde(default)]
    pub controller: bool,

    /// Metadata announced to peers.
    #[serde(default)]
    pub metadata: AppMetadata,

    #[serde(default)]
    pub relay: RelayProtocolOptions,

    /// Lifetime of a settled pairing, in seconds.
    #[serde(default = "default_pairing_ttl")]
    pub pairing_ttl_secs: u64,

    /// Lifetime of a settled session, in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Lifetime of an unanswered proposal, in seconds.
    #[serde(default = "default_proposal_ttl")]
    pub proposal_ttl_secs: u64,

    /// How often the expiry sweeper runs, in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Draws from the topic generator before giving up on a unique topic.
    #[serde(default = "default_max_topic_attempts")]
    pub max_topic_attempts: u32,

    /// Buffered events per subscriber before slow receivers start lagging.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_pairing_ttl() -> u64 {
    30 * 24 * 60 * 60 // 30 days
}

fn default_session_ttl() -> u64 {
    7 * 24 * 60 * 60 // 7 days
}

fn default_proposal_ttl() -> u64 {
    5 * 60
}

fn default_sweep_interval() -> u64 {
    30_000
}

fn default_max_topic_attempts() -> u32 {
    16
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            controller: false,
            metadata: AppMetadata::default(),
            relay: RelayProtocolOptions::default(),
            pairing_ttl_secs: default_pairing_ttl(),
            session_ttl_secs: default_session_ttl(),
            proposal_ttl_secs: default_proposal_ttl(),
            sweep_interval_ms: default_sweep_interval(),
            max_topic_attempts: default_max_topic_attempts(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    /// Configuration for the controller side (wallet).
    pub fn controller(metadata: AppMetadata) -> Self {
        Self {
            controller: true,
            metadata,
            ..Default::default()
        }
    }

    /// Configuration for the non-controller side (dapp).
    pub fn dapp(metadata: AppMetadata) -> Self {
        Self {
            controller: false,
            metadata,
            ..Default::default()
        }
    }

    pub fn with_controller(mut self, controller: bool) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_metadata(mut self, metadata: AppMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_relay(mut self, relay: RelayProtocolOptions) -> Self {
        self.relay = relay;
        self
    }

    pub fn with_pairing_ttl(mut self, secs: u64) -> Self {
        self.pairing_ttl_secs = secs;
        self
    }

    pub fn with_session_ttl(mut self, secs: u64) -> Self {
        self.session_ttl_secs = secs;
        self
    }

    pub fn with_proposal_ttl(mut self, secs: u64) -> Self {
        self.proposal_ttl_secs = secs;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_topic_attempts(mut self, attempts: u32) -> Self {
        self.max_topic_attempts = attempts;
        self
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Parse a JSON document; absent fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::Storage(format!("reading {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_topic_attempts == 0 {
            return Err(EngineError::Malformed(
                "max_topic_attempts must be at least 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(EngineError::Malformed(
                "event_capacity must be at least 1".into(),
            ));
        }
        if self.relay.protocol.is_empty() {
            return Err(EngineError::Malformed("relay protocol is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert!(!config.controller);
        assert_eq!(config.pairing_ttl_secs, 2_592_000);
        assert_eq!(config.session_ttl_secs, 604_800);
        assert_eq!(config.proposal_ttl_secs, 300);
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.relay.protocol, "waku");
    }

    #[test]
    fn json_fills_in_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"controller": true, "metadata": {"name": "Wallet"}, "session_ttl_secs": 60}"#,
        )
        .unwrap();
        assert!(config.controller);
        assert_eq!(config.metadata.name, "Wallet");
        assert_eq!(config.session_ttl_secs, 60);
        assert_eq!(config.pairing_ttl_secs, 2_592_000);
    }

    #[test]
    fn rejects_zero_attempts() {
        assert!(EngineConfig::from_json_str(r#"{"max_topic_attempts": 0}"#).is_err());
        assert!(EngineConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"proposal_ttl_secs": 10}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.proposal_ttl_secs, 10);

        assert!(EngineConfig::load(dir.path().join("missing.json")).is_err());
    }
}
