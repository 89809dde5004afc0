//! Proposal and request parameter payloads.
//!
//! These are the `params` bodies of the JSON-RPC methods listed in
//! [`crate::jsonrpc::methods`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reason::Reason;
use crate::uri::ConnectionUri;
use crate::{AppMetadata, Permissions, PublicKey, RelayProtocolOptions, Topic};

/// Identity of the peer that opened a proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposer {
    pub public_key: PublicKey,
    pub controller: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AppMetadata>,
}

/// Points a session proposal at the pairing that delivered it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalSignal {
    pub method: String,
    pub topic: Topic,
}

impl ProposalSignal {
    pub const PAIRING: &'static str = "pairing";

    pub fn pairing(topic: Topic) -> Self {
        Self {
            method: Self::PAIRING.to_string(),
            topic,
        }
    }
}

/// Offer to establish a pairing or a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub topic: Topic,
    pub relay: RelayProtocolOptions,
    pub proposer: Proposer,
    pub permissions: Permissions,
    /// Lifetime of the settled sequence, in seconds.
    pub ttl: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<ProposalSignal>,
}

impl Proposal {
    /// Reconstruct a pairing proposal from its connection URI.
    pub fn from_uri(uri: &ConnectionUri, ttl: u64) -> Self {
        Self {
            topic: uri.topic.clone(),
            relay: uri.relay.clone(),
            proposer: Proposer {
                public_key: uri.public_key.clone(),
                controller: uri.controller,
                metadata: None,
            },
            permissions: Permissions::pairing(),
            ttl,
            signal: None,
        }
    }

    pub fn to_uri(&self) -> ConnectionUri {
        ConnectionUri::new(
            self.topic.clone(),
            self.proposer.public_key.clone(),
            self.proposer.controller,
            self.relay.clone(),
        )
    }
}

/// Identity of the peer answering a proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Responder {
    pub public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AppMetadata>,
}

/// Params of `wc_pairingApprove` and `wc_sessionApprove`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveParams {
    pub relay: RelayProtocolOptions,
    pub responder: Responder,
    /// Unix seconds at which the settled sequence expires.
    pub expiry: i64,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub accounts: BTreeSet<String>,
}

/// Params of `wc_pairingReject`, `wc_sessionReject` and the delete methods.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonParams {
    pub reason: Reason,
}

/// Params of `wc_pairingUpdate` and `wc_sessionUpdate`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AppMetadata>,
}

/// Params of `wc_sessionUpgrade`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeParams {
    pub permissions: Permissions,
}

/// A JSON-RPC method call embedded in a payload request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestArguments {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RequestArguments {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Params of `wc_pairingPayload`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairingPayloadParams {
    pub request: RequestArguments,
}

/// Params of `wc_sessionPayload`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayloadParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    pub request: RequestArguments,
}

/// Params of `wc_sessionNotification`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Notification {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn proposal_from_uri_uses_pairing_permissions() {
        let uri = ConnectionUri::new(
            Topic::new("t0"),
            PublicKey::from_bytes(&[1; 32]),
            false,
            RelayProtocolOptions::default(),
        );
        let proposal = Proposal::from_uri(&uri, 60);
        assert_eq!(proposal.permissions, Permissions::pairing());
        assert_eq!(proposal.to_uri(), uri);
    }

    #[test]
    fn proposer_uses_camel_case() {
        let proposer = Proposer {
            public_key: PublicKey::new("aa"),
            controller: true,
            metadata: None,
        };
        let json = serde_json::to_value(&proposer).unwrap();
        assert_eq!(json, json!({"publicKey": "aa", "controller": true}));
    }

    #[test]
    fn notification_type_field() {
        let n: Notification =
            serde_json::from_value(json!({"type": "chainChanged", "data": 137})).unwrap();
        assert_eq!(n.kind, "chainChanged");
        assert_eq!(n.data, json!(137));
    }

    #[test]
    fn session_payload_chain_is_optional() {
        let params: SessionPayloadParams =
            serde_json::from_value(json!({"request": {"method": "eth_sign", "params": []}}))
                .unwrap();
        assert!(params.chain_id.is_none());
        assert_eq!(params.request.method, "eth_sign");
    }
}
