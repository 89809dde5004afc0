//! Sequence records: the persisted state of one pairing or session.
//!
//! A sequence is either **pending** on its proposal topic or **settled** on
//! the topic derived from the peers' shared secret. The responder records
//! both while it waits for the proposer to acknowledge.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use walletlink_lib::protocol::Proposal;
use walletlink_lib::{AppMetadata, Permissions, PublicKey, RelayProtocolOptions, Topic};

use crate::{EngineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceKind {
    Pairing,
    Session,
}

impl SequenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pairing => "pairing",
            Self::Session => "session",
        }
    }
}

impl std::fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AppMetadata>,
}

impl Participant {
    pub fn new(public_key: PublicKey, metadata: Option<AppMetadata>) -> Self {
        Self {
            public_key,
            metadata,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PendingStatus {
    /// We opened the proposal and wait for an answer.
    Proposed,
    /// We answered the proposal and wait for the acknowledgement.
    Responded,
}

/// Where a responded proposal settled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOutcome {
    pub settled_topic: Topic,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSequence {
    pub status: PendingStatus,
    pub proposal: Proposal,
    #[serde(rename = "self")]
    pub self_participant: Participant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PendingOutcome>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettledStatus {
    /// Responder side before the proposer acknowledged.
    PreSettled,
    Acknowledged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledSequence {
    pub status: SettledStatus,
    #[serde(rename = "self")]
    pub self_participant: Participant,
    pub peer: Participant,
    /// Public key of the peer allowed to update and upgrade.
    pub controller: PublicKey,
    pub permissions: Permissions,
    #[serde(default)]
    pub accounts: BTreeSet<String>,
}

impl SettledSequence {
    pub fn is_controller(&self) -> bool {
        self.controller == self.self_participant.public_key
    }

    pub fn peer_is_controller(&self) -> bool {
        self.controller == self.peer.public_key
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceState {
    Pending(PendingSequence),
    Settled(SettledSequence),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub topic: Topic,
    pub kind: SequenceKind,
    pub relay: RelayProtocolOptions,
    /// Unix seconds after which the sweeper removes the sequence.
    pub expiry: i64,
    pub state: SequenceState,
}

impl Sequence {
    pub fn pending(
        kind: SequenceKind,
        topic: Topic,
        expiry: i64,
        pending: PendingSequence,
    ) -> Self {
        Self {
            relay: pending.proposal.relay.clone(),
            topic,
            kind,
            expiry,
            state: SequenceState::Pending(pending),
        }
    }

    pub fn settled(
        kind: SequenceKind,
        topic: Topic,
        relay: RelayProtocolOptions,
        expiry: i64,
        settled: SettledSequence,
    ) -> Self {
        Self {
            topic,
            kind,
            relay,
            expiry,
            state: SequenceState::Settled(settled),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry <= now
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.state, SequenceState::Settled(_))
    }

    pub fn as_pending(&self) -> Option<&PendingSequence> {
        match &self.state {
            SequenceState::Pending(p) => Some(p),
            SequenceState::Settled(_) => None,
        }
    }

    pub fn as_settled(&self) -> Option<&SettledSequence> {
        match &self.state {
            SequenceState::Settled(s) => Some(s),
            SequenceState::Pending(_) => None,
        }
    }

    pub fn as_settled_mut(&mut self) -> Option<&mut SettledSequence> {
        match &mut self.state {
            SequenceState::Settled(s) => Some(s),
            SequenceState::Pending(_) => None,
        }
    }

    /// Settled state, or `NotFound` when the topic is still pending.
    pub fn settled_state(&self) -> Result<&SettledSequence> {
        self.as_settled()
            .ok_or_else(|| EngineError::not_found(self.kind.as_str(), &self.topic))
    }

    /// Our own participant record, whichever state we are in.
    pub fn self_participant(&self) -> &Participant {
        match &self.state {
            SequenceState::Pending(p) => &p.self_participant,
            SequenceState::Settled(s) => &s.self_participant,
        }
    }
}
