//! Pairing engine.
//!
//! A pairing is the long-lived encrypted channel two peers establish by
//! exchanging a connection URI. Sessions are proposed over it.
//!
//! The proposer publishes a URI and waits on the plaintext proposal topic.
//! The responder (a controller) agrees on a secret, records the settled
//! pairing as pre-settled and sends `wc_pairingApprove`. The proposer settles
//! and answers; on that answer the responder promotes the pairing and pushes
//! its metadata with `wc_pairingUpdate`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use walletlink_lib::jsonrpc::methods;
use walletlink_lib::protocol::{
    PairingPayloadParams, Proposal, ProposalSignal, Proposer, ReasonParams, RequestArguments,
    UpdateParams,
};
use walletlink_lib::uri::parse_uri;
use walletlink_lib::{
    now_secs, AppMetadata, ConnectionUri, JsonRpcRequest, JsonRpcResponse, Permissions, Reason,
    ReasonCode, SharedSecret, Topic,
};

use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventBus};
use crate::registry::Sequences;
use crate::rpc::PendingRequest;
use crate::sequence::Sequence;
use crate::storage::SequenceStore;
use crate::subscriber::InboundHandler;
use crate::{EngineError, Result};

/// Negotiates and maintains pairings.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PairingEngine {
    pub(crate) inner: Arc<PairingInner>,
}

pub(crate) struct PairingInner {
    config: Arc<EngineConfig>,
    sequences: Sequences,
    /// Session store of the same client; proposal topics must not collide with it.
    sessions: Arc<dyn SequenceStore>,
    /// Session proposals received and not yet answered, with their expiry.
    incoming: Mutex<HashMap<Topic, i64>>,
    events: EventBus,
    this: Weak<PairingInner>,
}

/// Methods the sender does not expect an answer to.
fn is_one_way(method: &str) -> bool {
    matches!(method, methods::PAIRING_REJECT | methods::PAIRING_DELETE)
}

fn refuse(code: ReasonCode, message: impl Into<String>) -> EngineError {
    EngineError::Rejected(Reason::with_message(code, message))
}

impl PairingEngine {
    pub(crate) fn new(
        config: Arc<EngineConfig>,
        sequences: Sequences,
        sessions: Arc<dyn SequenceStore>,
        events: EventBus,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| PairingInner {
            config,
            sequences,
            sessions,
            incoming: Mutex::new(HashMap::new()),
            events,
            this: this.clone(),
        });
        Self { inner }
    }

    /// Open a pairing proposal and return the URI to hand to the peer.
    pub async fn propose(&self) -> Result<ConnectionUri> {
        let inner = &self.inner;
        let config = &inner.config;
        let _guard = inner.sequences.lock().await;

        let topic = inner.sequences.new_topic().await?;
        let kms = inner.sequences.kms();
        let public_key = kms.generate_key_pair().await?;

        let proposal = Proposal {
            topic: topic.clone(),
            relay: config.relay.clone(),
            proposer: Proposer {
                public_key,
                controller: config.controller,
                metadata: Some(config.metadata.clone()),
            },
            permissions: Permissions::pairing(),
            ttl: config.pairing_ttl_secs,
            signal: None,
        };
        let uri = proposal.to_uri();

        let expiry = now_secs() + config.proposal_ttl_secs as i64;
        if let Err(e) = inner.sequences.open_proposal(proposal, expiry).await {
            if let Err(e) = kms.delete_private_key(&uri.public_key).await {
                warn!(%topic, error = %e, "failed to delete private key");
            }
            return Err(e);
        }

        info!(%topic, "pairing proposed");
        inner
            .events
            .publish(EngineEvent::PairingProposed { topic });
        Ok(uri)
    }

    /// Approve a pairing from its connection URI string.
    ///
    /// Returns the pre-settled pairing. It is promoted once the proposer
    /// answers, signalled by [`EngineEvent::PairingAcknowledged`].
    pub async fn approve(&self, uri: &str) -> Result<Sequence> {
        let uri = parse_uri(uri)?;
        self.approve_uri(&uri).await
    }

    pub async fn approve_uri(&self, uri: &ConnectionUri) -> Result<Sequence> {
        let inner = &self.inner;
        let config = &inner.config;
        if !config.controller {
            return Err(EngineError::Unauthorized(
                "only a controller can approve a pairing".into(),
            ));
        }
        if uri.controller {
            return Err(EngineError::Unauthorized(
                "proposer already claims the controller role".into(),
            ));
        }

        let proposal = Proposal::from_uri(uri, config.pairing_ttl_secs);
        let _guard = inner.sequences.lock().await;
        if inner.topic_in_use(&proposal.topic).await? {
            return Err(EngineError::AlreadyExists(proposal.topic.to_string()));
        }
        let (settled_topic, _answer) = inner
            .sequences
            .respond_to_proposal(
                &proposal,
                Some(config.metadata.clone()),
                BTreeSet::new(),
                config.proposal_ttl_secs,
                methods::PAIRING_APPROVE,
            )
            .await?;

        debug!(proposal = %uri.topic, topic = %settled_topic, "pairing approved, awaiting acknowledgement");
        inner.sequences.require(&settled_topic).await
    }

    /// Decline a pairing URI. Nothing is stored on our side.
    pub async fn reject(&self, uri: &str, reason: Reason) -> Result<()> {
        let uri = parse_uri(uri)?;
        let params = serde_json::to_value(ReasonParams { reason })?;
        self.inner
            .sequences
            .rpc()
            .notify(&uri.topic, methods::PAIRING_REJECT, params)
            .await?;
        info!(topic = %uri.topic, "pairing rejected");
        Ok(())
    }

    /// Push new metadata to the peer. Controller only.
    pub async fn update(&self, topic: &Topic, metadata: AppMetadata) -> Result<()> {
        let inner = &self.inner;
        let answer = {
            let _guard = inner.sequences.lock().await;
            let sequence = inner.sequences.require_settled(topic).await?;
            if !sequence.settled_state()?.is_controller() {
                return Err(EngineError::Unauthorized(
                    "only the controller can update a pairing".into(),
                ));
            }
            let params = serde_json::to_value(UpdateParams {
                accounts: None,
                metadata: Some(metadata.clone()),
            })?;
            inner
                .sequences
                .rpc()
                .request(topic, methods::PAIRING_UPDATE, params)
                .await?
        };
        answer.wait().await?;

        let _guard = inner.sequences.lock().await;
        if let Some(mut sequence) = inner.sequences.get(topic).await? {
            if let Some(state) = sequence.as_settled_mut() {
                state.self_participant.metadata = Some(metadata);
            }
            inner.sequences.save(&sequence).await?;
        }
        Ok(())
    }

    /// Round-trip a ping to the peer on a settled pairing.
    pub async fn ping(&self, topic: &Topic) -> Result<()> {
        let inner = &self.inner;
        let answer = {
            let _guard = inner.sequences.lock().await;
            inner.sequences.require_settled(topic).await?;
            inner
                .sequences
                .rpc()
                .request(topic, methods::PAIRING_PING, json!({}))
                .await?
        };
        answer.wait().await?;
        Ok(())
    }

    /// Delete a pairing. Deleting an unknown or already deleted topic succeeds.
    pub async fn delete(&self, topic: &Topic, reason: Reason) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.sequences.lock().await;
        let params = serde_json::to_value(ReasonParams {
            reason: reason.clone(),
        })?;
        if inner
            .sequences
            .terminate_notifying(topic, methods::PAIRING_DELETE, params)
            .await?
            .is_some()
        {
            info!(%topic, "pairing deleted");
            inner.events.publish(EngineEvent::PairingDeleted {
                topic: topic.clone(),
                reason,
            });
        }
        Ok(())
    }

    /// Send a payload request over a settled pairing and wait for the answer.
    pub async fn send_payload(&self, topic: &Topic, request: RequestArguments) -> Result<Value> {
        let inner = &self.inner;
        let answer = {
            let _guard = inner.sequences.lock().await;
            inner.sequences.require_settled(topic).await?;
            let params = serde_json::to_value(PairingPayloadParams { request })?;
            inner
                .sequences
                .rpc()
                .request(topic, methods::PAIRING_PAYLOAD, params)
                .await?
        };
        answer.wait().await
    }

    pub async fn get(&self, topic: &Topic) -> Result<Option<Sequence>> {
        self.inner.sequences.get(topic).await
    }

    /// Every stored pairing, pending or settled.
    pub async fn list(&self) -> Result<Vec<Sequence>> {
        self.inner.sequences.list().await
    }

    pub async fn settled(&self) -> Result<Vec<Sequence>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(Sequence::is_settled)
            .collect())
    }

    /// Remove pairings whose expiry is at or before `now` (unix seconds).
    ///
    /// Session proposals left unanswered past their expiry lose the secret
    /// bound to their topic; they are not reported.
    pub async fn sweep_expired(&self, now: i64) -> Result<Vec<Topic>> {
        let inner = &self.inner;
        let _guard = inner.sequences.lock().await;
        inner.drop_stale_proposals(now).await;

        let mut expired = Vec::new();
        for sequence in inner.sequences.expired(now).await? {
            if inner.sequences.terminate(&sequence.topic).await?.is_some() {
                info!(topic = %sequence.topic, "pairing expired");
                inner.events.publish(EngineEvent::PairingExpired {
                    topic: sequence.topic.clone(),
                });
                expired.push(sequence.topic);
            }
        }
        Ok(expired)
    }

    /// Subscribe every stored pairing topic again.
    pub async fn resubscribe(&self) -> Result<usize> {
        self.inner.sequences.resubscribe_all().await
    }

    /// Secret of a settled pairing, used to carry session proposals.
    pub(crate) async fn secret(&self, topic: &Topic) -> Result<SharedSecret> {
        let inner = &self.inner;
        let _guard = inner.sequences.lock().await;
        inner.sequences.require_settled(topic).await?;
        inner.sequences.secret(topic).await
    }

    /// Take an unanswered session proposal off the books. `None` when it was
    /// never received here, already answered or swept.
    pub(crate) fn claim_proposal(&self, topic: &Topic) -> Option<i64> {
        self.inner.incoming().remove(topic)
    }

    /// Put back a proposal whose answer could not be sent.
    pub(crate) fn restore_proposal(&self, topic: Topic, expiry: i64) {
        self.inner.incoming().insert(topic, expiry);
    }
}

impl PairingInner {
    fn incoming(&self) -> MutexGuard<'_, HashMap<Topic, i64>> {
        self.incoming.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether `topic` already carries a pairing, a session, a secret or an
    /// unanswered proposal on this side.
    async fn topic_in_use(&self, topic: &Topic) -> Result<bool> {
        let awaiting_answer = self.incoming().contains_key(topic);
        Ok(awaiting_answer
            || self.sequences.get(topic).await?.is_some()
            || self.sessions.has(topic).await?
            || self.sequences.kms().has_secret(topic).await?)
    }

    async fn drop_stale_proposals(&self, now: i64) {
        let stale: Vec<Topic> = {
            let mut incoming = self.incoming();
            let stale = incoming
                .iter()
                .filter(|(_, expiry)| **expiry <= now)
                .map(|(topic, _)| topic.clone())
                .collect::<Vec<_>>();
            for topic in &stale {
                incoming.remove(topic);
            }
            stale
        };
        for topic in stale {
            match self.sequences.kms().delete_secret(&topic).await {
                Ok(_) => info!(%topic, "unanswered session proposal dropped"),
                Err(e) => warn!(%topic, error = %e, "failed to delete secret"),
            }
        }
    }

    async fn handle_request(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        match request.method.as_str() {
            methods::PAIRING_APPROVE => self.on_approve(topic, request).await,
            methods::PAIRING_REJECT => self.on_reject(topic, request).await,
            methods::PAIRING_UPDATE => self.on_update(topic, request).await,
            methods::PAIRING_PAYLOAD => self.on_payload(topic, request).await,
            methods::PAIRING_PING => self.on_ping(topic, request).await,
            methods::PAIRING_DELETE => self.on_delete(topic, request).await,
            other => {
                warn!(%topic, method = other, "unknown pairing method ignored");
                Ok(())
            }
        }
    }

    async fn on_approve(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        let _guard = self.sequences.lock().await;
        let settled = self.sequences.complete_proposal(topic, request).await?;
        let peer = settled.settled_state()?.peer.clone();

        info!(topic = %settled.topic, proposal = %topic, "pairing settled");
        self.events.publish(EngineEvent::PairingApproved {
            topic: settled.topic.clone(),
            proposal_topic: topic.clone(),
            peer,
        });
        Ok(())
    }

    async fn on_reject(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        let _guard = self.sequences.lock().await;
        self.sequences.open_pending(topic).await?;
        let params: ReasonParams = request.parse_params()?;
        if self.sequences.terminate(topic).await?.is_some() {
            info!(%topic, reason = %params.reason, "pairing rejected by peer");
            self.events.publish(EngineEvent::PairingRejected {
                topic: topic.clone(),
                reason: params.reason,
            });
        }
        Ok(())
    }

    async fn on_update(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        let _guard = self.sequences.lock().await;
        let mut sequence = self.sequences.require_settled(topic).await?;
        if !sequence.settled_state()?.peer_is_controller() {
            return Err(refuse(
                ReasonCode::UnauthorizedUpdateRequest,
                "peer is not the controller",
            ));
        }
        let params: UpdateParams = request.parse_params()?;
        let metadata = params
            .metadata
            .ok_or_else(|| EngineError::Malformed("pairing update without metadata".into()))?;

        if let Some(state) = sequence.as_settled_mut() {
            state.peer.metadata = Some(metadata.clone());
        }
        self.sequences.save(&sequence).await?;
        self.sequences
            .rpc()
            .respond_ok(topic, request.id, Value::Bool(true))
            .await?;

        debug!(%topic, peer = %metadata.name, "pairing peer metadata updated");
        self.events.publish(EngineEvent::PairingUpdated {
            topic: topic.clone(),
            metadata,
        });
        Ok(())
    }

    /// A session proposal travelling over the pairing. The pairing secret is
    /// bound to the proposal topic so the session handshake runs sealed.
    async fn on_payload(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        let _guard = self.sequences.lock().await;
        self.sequences.require_settled(topic).await?;
        let params: PairingPayloadParams = request.parse_params()?;
        if params.request.method != methods::SESSION_PROPOSE {
            return Err(refuse(
                ReasonCode::UnknownJsonRpcMethod,
                format!("unsupported pairing payload {}", params.request.method),
            ));
        }

        let proposal: Proposal = serde_json::from_value(params.request.params)?;
        match &proposal.signal {
            Some(signal) if signal.method == ProposalSignal::PAIRING && &signal.topic == topic => {}
            _ => {
                return Err(refuse(
                    ReasonCode::MissingOrInvalid,
                    "session proposal does not point at this pairing",
                ));
            }
        }

        if self.topic_in_use(&proposal.topic).await? {
            return Err(refuse(
                ReasonCode::MissingOrInvalid,
                format!("session proposal topic {} already in use", proposal.topic),
            ));
        }

        let secret = self.sequences.secret(topic).await?;
        let kms = self.sequences.kms();
        kms.set_secret(&proposal.topic, &secret).await?;
        let expiry = now_secs() + self.config.proposal_ttl_secs as i64;
        self.incoming().insert(proposal.topic.clone(), expiry);
        if let Err(e) = self
            .sequences
            .rpc()
            .respond_ok(topic, request.id, Value::Bool(true))
            .await
        {
            self.incoming().remove(&proposal.topic);
            if let Err(e) = kms.delete_secret(&proposal.topic).await {
                warn!(topic = %proposal.topic, error = %e, "failed to delete secret");
            }
            return Err(e);
        }

        info!(pairing = %topic, topic = %proposal.topic, "session proposal received");
        self.events.publish(EngineEvent::SessionProposal {
            topic: proposal.topic.clone(),
            pairing_topic: topic.clone(),
            proposal,
        });
        Ok(())
    }

    async fn on_ping(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        let _guard = self.sequences.lock().await;
        self.sequences.require_settled(topic).await?;
        self.sequences
            .rpc()
            .respond_ok(topic, request.id, Value::Bool(true))
            .await
    }

    async fn on_delete(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        let _guard = self.sequences.lock().await;
        let params: ReasonParams = request.parse_params()?;
        if self.sequences.terminate(topic).await?.is_some() {
            info!(%topic, reason = %params.reason, "pairing deleted by peer");
            self.events.publish(EngineEvent::PairingDeleted {
                topic: topic.clone(),
                reason: params.reason,
            });
        }
        Ok(())
    }

    /// Responder side: the proposer answered our approval.
    async fn on_approve_answer(&self, topic: &Topic, outcome: &Result<Value>) {
        let _guard = self.sequences.lock().await;
        match outcome {
            Ok(_) => match self.sequences.acknowledge(topic).await {
                Ok(settled) => {
                    info!(topic = %settled.topic, "pairing acknowledged");
                    self.events.publish(EngineEvent::PairingAcknowledged {
                        topic: settled.topic.clone(),
                    });
                    self.spawn_metadata_update(settled.topic);
                }
                Err(e) => warn!(%topic, error = %e, "could not promote pairing"),
            },
            Err(e) => {
                let reason = e.reason();
                match self.sequences.terminate(topic).await {
                    Ok(Some(_)) => {
                        info!(%topic, %reason, "pairing approval refused");
                        self.events.publish(EngineEvent::PairingRejected {
                            topic: topic.clone(),
                            reason,
                        });
                    }
                    Ok(None) => {}
                    Err(e) => warn!(%topic, error = %e, "could not drop refused pairing"),
                }
            }
        }
    }

    fn spawn_metadata_update(&self, topic: Topic) {
        let Some(inner) = self.this.upgrade() else {
            return;
        };
        let metadata = self.config.metadata.clone();
        tokio::spawn(async move {
            let engine = PairingEngine { inner };
            if let Err(e) = engine.update(&topic, metadata).await {
                debug!(%topic, error = %e, "metadata update not delivered");
            }
        });
    }
}

#[async_trait]
impl InboundHandler for PairingInner {
    async fn on_request(&self, topic: Topic, request: JsonRpcRequest) {
        let Err(e) = self.handle_request(&topic, &request).await else {
            return;
        };
        if is_one_way(&request.method) {
            warn!(%topic, method = %request.method, error = %e, "dropping pairing message");
            return;
        }
        warn!(%topic, method = %request.method, error = %e, "refusing pairing request");
        if let Err(e) = self
            .sequences
            .rpc()
            .respond_err(&topic, request.id, &e.reason())
            .await
        {
            warn!(%topic, error = %e, "refusal not delivered");
        }
    }

    async fn on_response(&self, topic: Topic, pending: PendingRequest, response: JsonRpcResponse) {
        let outcome = response.into_result().map_err(EngineError::Rejected);
        if pending.method == methods::PAIRING_APPROVE {
            self.on_approve_answer(&topic, &outcome).await;
        }
        pending.complete(outcome);
    }

    async fn resubscribe(&self) {
        match self.sequences.resubscribe_all().await {
            Ok(count) => debug!(count, "pairing topics resubscribed"),
            Err(e) => warn!(error = %e, "pairing resubscription failed"),
        }
    }
}
