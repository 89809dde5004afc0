//! Sequence lifecycle shared by the pairing and session engines.
//!
//! Every mutating method here expects the caller to hold the engine's serial
//! lock (see [`Sequences::lock`]), so one engine applies at most one state
//! transition at a time. Network waits happen after the lock is released.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use walletlink_lib::crypto::derive_topic;
use walletlink_lib::protocol::{ApproveParams, Proposal, Responder};
use walletlink_lib::{
    now_secs, AppMetadata, JsonRpcRequest, KeyManagementService, PublicKey, SharedSecret, Topic,
    TopicGenerator,
};

use crate::rpc::{ResponseWaiter, RpcChannel};
use crate::sequence::{
    Participant, PendingOutcome, PendingSequence, PendingStatus, Sequence, SequenceKind,
    SequenceState, SettledSequence, SettledStatus,
};
use crate::storage::SequenceStore;
use crate::subscriber::Subscriber;
use crate::{EngineError, Result};

pub(crate) struct Sequences {
    kind: SequenceKind,
    store: Arc<dyn SequenceStore>,
    kms: Arc<dyn KeyManagementService>,
    subscriber: Arc<Subscriber>,
    rpc: Arc<RpcChannel>,
    topics: Arc<dyn TopicGenerator>,
    max_topic_attempts: u32,
    serial: Mutex<()>,
}

impl Sequences {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kind: SequenceKind,
        store: Arc<dyn SequenceStore>,
        kms: Arc<dyn KeyManagementService>,
        subscriber: Arc<Subscriber>,
        rpc: Arc<RpcChannel>,
        topics: Arc<dyn TopicGenerator>,
        max_topic_attempts: u32,
    ) -> Self {
        Self {
            kind,
            store,
            kms,
            subscriber,
            rpc,
            topics,
            max_topic_attempts,
            serial: Mutex::new(()),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.serial.lock().await
    }

    pub(crate) fn kms(&self) -> &Arc<dyn KeyManagementService> {
        &self.kms
    }

    pub(crate) fn rpc(&self) -> &Arc<RpcChannel> {
        &self.rpc
    }

    pub(crate) async fn get(&self, topic: &Topic) -> Result<Option<Sequence>> {
        self.store.get(topic).await
    }

    pub(crate) async fn list(&self) -> Result<Vec<Sequence>> {
        self.store.get_all().await
    }

    pub(crate) async fn require(&self, topic: &Topic) -> Result<Sequence> {
        self.store
            .get(topic)
            .await?
            .ok_or_else(|| EngineError::not_found(self.kind.as_str(), topic))
    }

    pub(crate) async fn require_settled(&self, topic: &Topic) -> Result<Sequence> {
        let sequence = self.require(topic).await?;
        sequence.settled_state()?;
        Ok(sequence)
    }

    pub(crate) async fn secret(&self, topic: &Topic) -> Result<SharedSecret> {
        self.kms
            .get_secret(topic)
            .await?
            .ok_or_else(|| EngineError::Crypto(format!("no secret bound to {}", topic)))
    }

    /// Draw a topic not used by any stored sequence.
    pub(crate) async fn new_topic(&self) -> Result<Topic> {
        for _ in 0..self.max_topic_attempts {
            let Some(topic) = self.topics.generate() else {
                break;
            };
            if !self.store.has(&topic).await? && !self.kms.has_secret(&topic).await? {
                return Ok(topic);
            }
            debug!(%topic, "generated topic already in use");
        }
        Err(EngineError::TopicExhausted {
            attempts: self.max_topic_attempts,
        })
    }

    /// Persist a new sequence and follow its topic.
    pub(crate) async fn insert(&self, sequence: &Sequence) -> Result<()> {
        self.store.set(sequence).await?;
        self.subscriber.subscribe(&sequence.topic, self.kind).await
    }

    pub(crate) async fn save(&self, sequence: &Sequence) -> Result<()> {
        self.store.set(sequence).await
    }

    /// Remove a sequence from the store and stop following its topic.
    ///
    /// Returns `None` when the topic was already gone, which makes every
    /// terminal transition happen at most once.
    async fn remove(&self, topic: &Topic) -> Result<Option<Sequence>> {
        let Some(sequence) = self.store.delete(topic).await? else {
            return Ok(None);
        };
        if let Err(e) = self.subscriber.unsubscribe(topic).await {
            warn!(%topic, error = %e, "unsubscribe failed");
        }
        let cancelled = self.rpc.cancel_topic(topic);
        if cancelled > 0 {
            debug!(%topic, cancelled, "cancelled outstanding requests");
        }
        Ok(Some(sequence))
    }

    /// Wipe the key material a sequence owns.
    async fn purge(&self, sequence: &Sequence) {
        if let Err(e) = self.kms.delete_secret(&sequence.topic).await {
            warn!(topic = %sequence.topic, error = %e, "failed to delete secret");
        }
        let key = &sequence.self_participant().public_key;
        if let Err(e) = self.kms.delete_private_key(key).await {
            warn!(topic = %sequence.topic, error = %e, "failed to delete private key");
        }
    }

    /// End a sequence: remove it, stop following it and purge its keys.
    ///
    /// A responded proposal takes its not-yet-acknowledged settled sequence
    /// down with it.
    pub(crate) async fn terminate(&self, topic: &Topic) -> Result<Option<Sequence>> {
        self.end(topic, None).await
    }

    /// Like [`terminate`](Self::terminate), but a settled sequence first sends
    /// `method` to the peer. The message is sealed with the topic secret, so it
    /// goes out after the sequence left the store and before the purge.
    pub(crate) async fn terminate_notifying(
        &self,
        topic: &Topic,
        method: &str,
        params: Value,
    ) -> Result<Option<Sequence>> {
        self.end(topic, Some((method, params))).await
    }

    async fn end(&self, topic: &Topic, farewell: Option<(&str, Value)>) -> Result<Option<Sequence>> {
        let Some(sequence) = self.remove(topic).await? else {
            return Ok(None);
        };

        if let Some((method, params)) = farewell {
            if sequence.is_settled() {
                if let Err(e) = self.rpc.notify(topic, method, params).await {
                    warn!(%topic, method, error = %e, "peer not told about termination");
                }
            }
        }
        self.purge(&sequence).await;

        if let SequenceState::Pending(PendingSequence {
            outcome: Some(outcome),
            ..
        }) = &sequence.state
        {
            let presettled = self
                .get(&outcome.settled_topic)
                .await?
                .and_then(|s| s.as_settled().map(|st| st.status))
                == Some(SettledStatus::PreSettled);
            if presettled {
                if let Some(settled) = self.remove(&outcome.settled_topic).await? {
                    self.purge(&settled).await;
                }
            }
        }

        debug!(%topic, kind = %self.kind, "sequence terminated");
        Ok(Some(sequence))
    }

    /// The pending sequence we opened on `topic`, if it still waits for an answer.
    pub(crate) async fn open_pending(&self, topic: &Topic) -> Result<PendingSequence> {
        match self.require(topic).await?.state {
            SequenceState::Pending(pending) if pending.status == PendingStatus::Proposed => {
                Ok(pending)
            }
            _ => Err(EngineError::not_found(self.kind.as_str(), topic)),
        }
    }

    /// Drop a pending sequence that has settled. Its private key lives on in
    /// the settled sequence; only the proposal topic binding goes.
    pub(crate) async fn retire_pending(&self, topic: &Topic) -> Result<()> {
        if self.remove(topic).await?.is_some() {
            self.kms.delete_secret(topic).await?;
        }
        Ok(())
    }

    /// Proposer side: open a pending sequence on a fresh topic.
    pub(crate) async fn open_proposal(&self, proposal: Proposal, expiry: i64) -> Result<Sequence> {
        let me = Participant::new(
            proposal.proposer.public_key.clone(),
            proposal.proposer.metadata.clone(),
        );
        let sequence = Sequence::pending(
            self.kind,
            proposal.topic.clone(),
            expiry,
            PendingSequence {
                status: PendingStatus::Proposed,
                proposal,
                self_participant: me,
                outcome: None,
            },
        );
        self.insert(&sequence).await?;
        Ok(sequence)
    }

    /// Responder side: agree on a secret, record the pending and pre-settled
    /// sequences and send the approval on the proposal topic.
    pub(crate) async fn respond_to_proposal(
        &self,
        proposal: &Proposal,
        metadata: Option<AppMetadata>,
        accounts: BTreeSet<String>,
        pending_ttl_secs: u64,
        approve_method: &str,
    ) -> Result<(Topic, ResponseWaiter)> {
        if self.store.has(&proposal.topic).await? {
            return Err(EngineError::AlreadyExists(proposal.topic.to_string()));
        }

        let self_key = self.kms.generate_key_pair().await?;
        let agreement = match self
            .kms
            .perform_key_agreement(&self_key, &proposal.proposer.public_key)
            .await
        {
            Ok(agreement) => agreement,
            Err(e) => {
                self.discard_key(&self_key).await;
                return Err(EngineError::Crypto(e.to_string()));
            }
        };

        let settled_topic = derive_topic(&agreement.shared_secret);
        if self.store.has(&settled_topic).await? {
            self.discard_key(&self_key).await;
            return Err(EngineError::AlreadyExists(settled_topic.to_string()));
        }

        let now = now_secs();
        let expiry = now + proposal.ttl as i64;
        let me = Participant::new(self_key.clone(), metadata.clone());

        let pending = Sequence::pending(
            self.kind,
            proposal.topic.clone(),
            now + pending_ttl_secs as i64,
            PendingSequence {
                status: PendingStatus::Responded,
                proposal: proposal.clone(),
                self_participant: me.clone(),
                outcome: Some(PendingOutcome {
                    settled_topic: settled_topic.clone(),
                }),
            },
        );
        let settled = Sequence::settled(
            self.kind,
            settled_topic.clone(),
            proposal.relay.clone(),
            expiry,
            SettledSequence {
                status: SettledStatus::PreSettled,
                self_participant: me,
                peer: Participant::new(
                    proposal.proposer.public_key.clone(),
                    proposal.proposer.metadata.clone(),
                ),
                controller: self_key.clone(),
                permissions: proposal.permissions.clone(),
                accounts: accounts.clone(),
            },
        );

        let params = ApproveParams {
            relay: proposal.relay.clone(),
            responder: Responder {
                public_key: self_key.clone(),
                metadata,
            },
            expiry,
            accounts,
        };

        let sent = async {
            self.kms
                .set_secret(&settled_topic, &agreement.shared_secret)
                .await?;
            self.insert(&pending).await?;
            self.insert(&settled).await?;
            let params = serde_json::to_value(&params)?;
            self.rpc.request(&proposal.topic, approve_method, params).await
        }
        .await;

        match sent {
            Ok(waiter) => Ok((settled_topic, waiter)),
            Err(e) => {
                warn!(topic = %proposal.topic, error = %e, "approval failed, rolling back");
                self.terminate(&proposal.topic).await?;
                self.remove(&settled_topic).await?;
                if let Err(e) = self.kms.delete_secret(&settled_topic).await {
                    warn!(topic = %settled_topic, error = %e, "failed to delete secret");
                }
                self.discard_key(&self_key).await;
                Err(e)
            }
        }
    }

    /// Proposer side: handle the responder's approval on `topic`. Settles,
    /// answers on the proposal topic and retires it. The settled sequence is
    /// acknowledged right away; no further round trip follows.
    pub(crate) async fn complete_proposal(
        &self,
        topic: &Topic,
        request: &JsonRpcRequest,
    ) -> Result<Sequence> {
        let pending = self.open_pending(topic).await?;
        let params: ApproveParams = request.parse_params()?;
        let settled = self.settle_proposal(&pending, &params).await?;

        if let Err(e) = self.rpc.respond_ok(topic, request.id, Value::Bool(true)).await {
            warn!(%topic, error = %e, "approval answer not delivered");
        }
        self.retire_pending(topic).await?;
        Ok(settled)
    }

    async fn settle_proposal(
        &self,
        pending: &PendingSequence,
        params: &ApproveParams,
    ) -> Result<Sequence> {
        let agreement = self
            .kms
            .perform_key_agreement(
                &pending.self_participant.public_key,
                &params.responder.public_key,
            )
            .await?;
        let settled_topic = derive_topic(&agreement.shared_secret);
        if self.store.has(&settled_topic).await? {
            return Err(EngineError::AlreadyExists(settled_topic.to_string()));
        }

        let controller = if pending.proposal.proposer.controller {
            pending.self_participant.public_key.clone()
        } else {
            params.responder.public_key.clone()
        };

        let settled = Sequence::settled(
            self.kind,
            settled_topic.clone(),
            params.relay.clone(),
            params.expiry,
            SettledSequence {
                status: SettledStatus::Acknowledged,
                self_participant: pending.self_participant.clone(),
                peer: Participant::new(
                    params.responder.public_key.clone(),
                    params.responder.metadata.clone(),
                ),
                controller,
                permissions: pending.proposal.permissions.clone(),
                accounts: params.accounts.clone(),
            },
        );

        self.kms
            .set_secret(&settled_topic, &agreement.shared_secret)
            .await?;
        self.insert(&settled).await?;
        Ok(settled)
    }

    /// Responder side: the proposer acknowledged. Promote the pre-settled
    /// sequence and retire the proposal. Returns the settled sequence.
    pub(crate) async fn acknowledge(&self, pending_topic: &Topic) -> Result<Sequence> {
        let pending = self.require(pending_topic).await?;
        let settled_topic = match &pending.state {
            SequenceState::Pending(PendingSequence {
                status: PendingStatus::Responded,
                outcome: Some(outcome),
                ..
            }) => outcome.settled_topic.clone(),
            _ => {
                return Err(EngineError::not_found(self.kind.as_str(), pending_topic));
            }
        };

        let mut settled = self.require(&settled_topic).await?;
        if let Some(state) = settled.as_settled_mut() {
            state.status = SettledStatus::Acknowledged;
        }
        self.save(&settled).await?;
        self.retire_pending(pending_topic).await?;
        Ok(settled)
    }

    /// Sequences whose expiry has passed.
    pub(crate) async fn expired(&self, now: i64) -> Result<Vec<Sequence>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.is_expired(now))
            .collect())
    }

    /// Force relay subscriptions for every stored sequence.
    pub(crate) async fn resubscribe_all(&self) -> Result<usize> {
        let sequences = self.list().await?;
        for sequence in &sequences {
            self.subscriber
                .resubscribe(&sequence.topic, self.kind)
                .await?;
        }
        Ok(sequences.len())
    }

    async fn discard_key(&self, key: &PublicKey) {
        if let Err(e) = self.kms.delete_private_key(key).await {
            warn!(public_key = %key, error = %e, "failed to delete private key");
        }
    }
}
