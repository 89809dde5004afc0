use std::sync::Arc;

use walletlink_lib::crypto;
use walletlink_lib::{JsonRpcPayload, KeyManagementService, Topic};

use crate::{EngineError, Result};

/// Turns JSON-RPC payloads into relay messages and back.
///
/// A topic with a bound secret carries sealed envelopes; a topic without one
/// (a pairing proposal topic) carries plain JSON.
pub(crate) struct EnvelopeCodec {
    kms: Arc<dyn KeyManagementService>,
}

impl EnvelopeCodec {
    pub(crate) fn new(kms: Arc<dyn KeyManagementService>) -> Self {
        Self { kms }
    }

    pub(crate) async fn encode(&self, topic: &Topic, payload: &JsonRpcPayload) -> Result<String> {
        let json = serde_json::to_string(payload)?;
        match self.kms.get_secret(topic).await? {
            Some(secret) => Ok(crypto::seal(&secret, json.as_bytes())?),
            None => Ok(json),
        }
    }

    pub(crate) async fn decode(&self, topic: &Topic, message: &str) -> Result<JsonRpcPayload> {
        let json = match self.kms.get_secret(topic).await? {
            Some(secret) => {
                let plain = crypto::open(&secret, message)?;
                String::from_utf8(plain)
                    .map_err(|_| EngineError::Malformed("envelope is not UTF-8".into()))?
            }
            None => message.to_string(),
        };
        Ok(serde_json::from_str(&json)?)
    }
}
