//! Session engine.
//!
//! Sessions are negotiated over a settled pairing. The proposer binds the
//! pairing secret to a fresh proposal topic and delivers the proposal as a
//! `wc_pairingPayload`; the rest of the handshake runs sealed on that topic.
//! The proposer settles as soon as it receives the approval and answers it;
//! the responder promotes its pre-settled session on that answer.
//!
//! Settled sessions carry permissions (chains, methods, notification types)
//! and the accounts the wallet exposed. Every outbound call is checked against
//! them before anything reaches the relay.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use walletlink_lib::caip;
use walletlink_lib::jsonrpc::methods;
use walletlink_lib::protocol::{
    Notification, Proposal, ProposalSignal, Proposer, ReasonParams, RequestArguments,
    SessionPayloadParams, UpdateParams, UpgradeParams,
};
use walletlink_lib::{
    now_secs, JsonRpcRequest, JsonRpcResponse, Permissions, Reason, ReasonCode,
    RelayProtocolOptions, Topic,
};

use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventBus};
use crate::pairing::PairingEngine;
use crate::registry::Sequences;
use crate::rpc::PendingRequest;
use crate::sequence::Sequence;
use crate::subscriber::InboundHandler;
use crate::{EngineError, Result};

/// An application JSON-RPC call to run on the peer.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRequest {
    pub topic: Topic,
    /// Target chain; must be one of the session's chains when set.
    pub chain_id: Option<String>,
    pub request: RequestArguments,
}

impl SessionRequest {
    pub fn new(topic: Topic, request: RequestArguments) -> Self {
        Self {
            topic,
            chain_id: None,
            request,
        }
    }

    pub fn on_chain(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = Some(chain_id.into());
        self
    }
}

/// Negotiates and drives sessions.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionEngine {
    pub(crate) inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    config: Arc<EngineConfig>,
    sequences: Sequences,
    events: EventBus,
    pairing: PairingEngine,
}

fn is_one_way(method: &str) -> bool {
    matches!(method, methods::SESSION_REJECT | methods::SESSION_DELETE)
}

fn refuse(code: ReasonCode, message: impl Into<String>) -> EngineError {
    EngineError::Rejected(Reason::with_message(code, message))
}

/// Accounts must be well-formed CAIP-10 identifiers on a granted chain.
fn check_accounts(accounts: &BTreeSet<String>, permissions: &Permissions) -> Result<()> {
    for account in accounts {
        caip::validate_account_id(account)?;
        let chain = caip::chain_of_account(account).unwrap_or_default();
        if !permissions.allows_chain(chain) {
            return Err(EngineError::NotPermitted(format!(
                "account {} is on chain {} outside the session",
                account, chain
            )));
        }
    }
    Ok(())
}

impl SessionEngine {
    pub(crate) fn new(
        config: Arc<EngineConfig>,
        sequences: Sequences,
        events: EventBus,
        pairing: PairingEngine,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                sequences,
                events,
                pairing,
            }),
        }
    }

    /// Propose a session over a settled pairing.
    ///
    /// Resolves once the peer received the proposal. Its decision arrives as
    /// [`EngineEvent::SessionApproved`] or [`EngineEvent::SessionRejected`].
    pub async fn propose(
        &self,
        pairing_topic: &Topic,
        permissions: Permissions,
        relay: Option<RelayProtocolOptions>,
    ) -> Result<Proposal> {
        permissions.validate()?;
        let inner = &self.inner;
        let config = &inner.config;
        let secret = inner.pairing.secret(pairing_topic).await?;

        let proposal = {
            let _guard = inner.sequences.lock().await;
            let topic = inner.sequences.new_topic().await?;
            let kms = inner.sequences.kms();
            let public_key = kms.generate_key_pair().await?;

            let proposal = Proposal {
                topic: topic.clone(),
                relay: relay.unwrap_or_else(|| config.relay.clone()),
                proposer: Proposer {
                    public_key: public_key.clone(),
                    controller: config.controller,
                    metadata: Some(config.metadata.clone()),
                },
                permissions,
                ttl: config.session_ttl_secs,
                signal: Some(ProposalSignal::pairing(pairing_topic.clone())),
            };

            let expiry = now_secs() + config.proposal_ttl_secs as i64;
            let opened = async {
                kms.set_secret(&topic, &secret).await?;
                inner.sequences.open_proposal(proposal.clone(), expiry).await
            }
            .await;
            if let Err(e) = opened {
                if let Err(e) = kms.delete_secret(&topic).await {
                    warn!(%topic, error = %e, "failed to delete secret");
                }
                if let Err(e) = kms.delete_private_key(&public_key).await {
                    warn!(%topic, error = %e, "failed to delete private key");
                }
                return Err(e);
            }
            proposal
        };

        let carried = RequestArguments::new(methods::SESSION_PROPOSE, serde_json::to_value(&proposal)?);
        if let Err(e) = inner.pairing.send_payload(pairing_topic, carried).await {
            warn!(topic = %proposal.topic, error = %e, "session proposal not delivered");
            let _guard = inner.sequences.lock().await;
            inner.sequences.terminate(&proposal.topic).await?;
            return Err(e);
        }

        info!(topic = %proposal.topic, pairing = %pairing_topic, "session proposed");
        Ok(proposal)
    }

    /// Approve a session proposal, binding `accounts` to the session.
    ///
    /// Returns the pre-settled session; [`EngineEvent::SessionAcknowledged`]
    /// follows once the proposer answers.
    pub async fn approve<I, S>(&self, proposal: &Proposal, accounts: I) -> Result<Sequence>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inner = &self.inner;
        let config = &inner.config;
        if !config.controller {
            return Err(EngineError::Unauthorized(
                "only a controller can approve a session".into(),
            ));
        }
        if proposal.proposer.controller {
            return Err(EngineError::Unauthorized(
                "proposer already claims the controller role".into(),
            ));
        }
        proposal.permissions.validate()?;
        let accounts: BTreeSet<String> = accounts.into_iter().map(Into::into).collect();
        check_accounts(&accounts, &proposal.permissions)?;

        let _guard = inner.sequences.lock().await;
        let expiry = inner
            .pairing
            .claim_proposal(&proposal.topic)
            .ok_or_else(|| EngineError::not_found("session proposal", &proposal.topic))?;
        let responded = inner
            .sequences
            .respond_to_proposal(
                proposal,
                Some(config.metadata.clone()),
                accounts,
                config.proposal_ttl_secs,
                methods::SESSION_APPROVE,
            )
            .await;
        let (settled_topic, _answer) = match responded {
            Ok(responded) => responded,
            Err(e) => {
                inner.pairing.restore_proposal(proposal.topic.clone(), expiry);
                return Err(e);
            }
        };

        debug!(proposal = %proposal.topic, topic = %settled_topic, "session approved, awaiting acknowledgement");
        inner.sequences.require(&settled_topic).await
    }

    /// Decline a session proposal. Nothing is stored on our side.
    ///
    /// The proposal's secret is dropped even when the rejection cannot be
    /// delivered; the delivery error is still returned.
    pub async fn reject(&self, proposal: &Proposal, reason: Reason) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.sequences.lock().await;
        if inner.pairing.claim_proposal(&proposal.topic).is_none() {
            return Err(EngineError::not_found("session proposal", &proposal.topic));
        }
        let kms = inner.sequences.kms();
        let sent = match serde_json::to_value(ReasonParams { reason }) {
            Ok(params) => {
                inner
                    .sequences
                    .rpc()
                    .notify(&proposal.topic, methods::SESSION_REJECT, params)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = kms.delete_secret(&proposal.topic).await {
            warn!(topic = %proposal.topic, error = %e, "failed to delete secret");
        }
        match &sent {
            Ok(()) => info!(topic = %proposal.topic, "session rejected"),
            Err(e) => warn!(topic = %proposal.topic, error = %e, "rejection not delivered"),
        }
        sent
    }

    /// Replace the session's accounts. Controller only.
    pub async fn update<I, S>(&self, topic: &Topic, accounts: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inner = &self.inner;
        let accounts: BTreeSet<String> = accounts.into_iter().map(Into::into).collect();
        let answer = {
            let _guard = inner.sequences.lock().await;
            let sequence = inner.sequences.require_settled(topic).await?;
            let state = sequence.settled_state()?;
            if !state.is_controller() {
                return Err(EngineError::Unauthorized(
                    "only the controller can update a session".into(),
                ));
            }
            check_accounts(&accounts, &state.permissions)?;
            let params = serde_json::to_value(UpdateParams {
                accounts: Some(accounts.clone()),
                metadata: None,
            })?;
            inner
                .sequences
                .rpc()
                .request(topic, methods::SESSION_UPDATE, params)
                .await?
        };
        answer.wait().await?;

        let _guard = inner.sequences.lock().await;
        if let Some(mut sequence) = inner.sequences.get(topic).await? {
            if let Some(state) = sequence.as_settled_mut() {
                state.accounts = accounts;
            }
            inner.sequences.save(&sequence).await?;
        }
        Ok(())
    }

    /// Grant additional permissions. Controller only; nothing is ever removed.
    ///
    /// Returns the merged permission set.
    pub async fn upgrade(&self, topic: &Topic, permissions: Permissions) -> Result<Permissions> {
        let inner = &self.inner;
        let answer = {
            let _guard = inner.sequences.lock().await;
            let sequence = inner.sequences.require_settled(topic).await?;
            if !sequence.settled_state()?.is_controller() {
                return Err(EngineError::Unauthorized(
                    "only the controller can upgrade a session".into(),
                ));
            }
            permissions.validate()?;
            let params = serde_json::to_value(UpgradeParams {
                permissions: permissions.clone(),
            })?;
            inner
                .sequences
                .rpc()
                .request(topic, methods::SESSION_UPGRADE, params)
                .await?
        };
        answer.wait().await?;

        let _guard = inner.sequences.lock().await;
        let mut sequence = inner.sequences.require_settled(topic).await?;
        let merged = match sequence.as_settled_mut() {
            Some(state) => {
                state.permissions.merge(&permissions);
                state.permissions.clone()
            }
            None => return Err(EngineError::not_found("session", topic)),
        };
        inner.sequences.save(&sequence).await?;
        Ok(merged)
    }

    /// Run a JSON-RPC call on the peer and wait for its result.
    ///
    /// The method (and chain, when given) must be granted; otherwise nothing
    /// is sent. A refusal from the peer comes back as [`EngineError::Rejected`].
    pub async fn request(&self, request: SessionRequest) -> Result<Value> {
        let inner = &self.inner;
        let answer = {
            let _guard = inner.sequences.lock().await;
            let sequence = inner.sequences.require_settled(&request.topic).await?;
            let permissions = &sequence.settled_state()?.permissions;
            if !permissions.allows_method(&request.request.method) {
                return Err(EngineError::NotPermitted(format!(
                    "method {} is not granted",
                    request.request.method
                )));
            }
            if let Some(chain) = &request.chain_id {
                if !permissions.allows_chain(chain) {
                    return Err(EngineError::NotPermitted(format!(
                        "chain {} is not granted",
                        chain
                    )));
                }
            }
            let params = serde_json::to_value(SessionPayloadParams {
                chain_id: request.chain_id,
                request: request.request,
            })?;
            inner
                .sequences
                .rpc()
                .request(&request.topic, methods::SESSION_PAYLOAD, params)
                .await?
        };
        answer.wait().await
    }

    /// Answer a [`EngineEvent::PayloadRequest`].
    pub async fn respond(&self, topic: &Topic, response: JsonRpcResponse) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.sequences.lock().await;
        inner.sequences.require_settled(topic).await?;
        inner.sequences.rpc().respond(topic, response).await
    }

    /// Send a notification. The controller may send any type; the other side
    /// only the types it was granted.
    pub async fn notify(&self, topic: &Topic, notification: Notification) -> Result<()> {
        let inner = &self.inner;
        let answer = {
            let _guard = inner.sequences.lock().await;
            let sequence = inner.sequences.require_settled(topic).await?;
            let state = sequence.settled_state()?;
            if !state.is_controller() && !state.permissions.allows_notification(&notification.kind)
            {
                return Err(EngineError::NotPermitted(format!(
                    "notification type {} is not granted",
                    notification.kind
                )));
            }
            let params = serde_json::to_value(&notification)?;
            inner
                .sequences
                .rpc()
                .request(topic, methods::SESSION_NOTIFICATION, params)
                .await?
        };
        answer.wait().await?;
        Ok(())
    }

    pub async fn ping(&self, topic: &Topic) -> Result<()> {
        let inner = &self.inner;
        let answer = {
            let _guard = inner.sequences.lock().await;
            inner.sequences.require_settled(topic).await?;
            inner
                .sequences
                .rpc()
                .request(topic, methods::SESSION_PING, json!({}))
                .await?
        };
        answer.wait().await?;
        Ok(())
    }

    /// Delete a session: local state goes first, then the peer is told.
    /// Deleting an unknown or already deleted topic succeeds.
    pub async fn delete(&self, topic: &Topic, reason: Reason) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.sequences.lock().await;
        let params = serde_json::to_value(ReasonParams {
            reason: reason.clone(),
        })?;
        if inner
            .sequences
            .terminate_notifying(topic, methods::SESSION_DELETE, params)
            .await?
            .is_some()
        {
            info!(%topic, "session deleted");
            inner.events.publish(EngineEvent::SessionDeleted {
                topic: topic.clone(),
                reason,
            });
        }
        Ok(())
    }

    pub async fn get(&self, topic: &Topic) -> Result<Option<Sequence>> {
        self.inner.sequences.get(topic).await
    }

    /// Every stored session, pending or settled.
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

    /// Remove sessions whose expiry is at or before `now` (unix seconds).
    pub async fn sweep_expired(&self, now: i64) -> Result<Vec<Topic>> {
        let inner = &self.inner;
        let _guard = inner.sequences.lock().await;
        let mut expired = Vec::new();
        for sequence in inner.sequences.expired(now).await? {
            if inner.sequences.terminate(&sequence.topic).await?.is_some() {
                info!(topic = %sequence.topic, "session expired");
                inner.events.publish(EngineEvent::SessionExpired {
                    topic: sequence.topic.clone(),
                });
                expired.push(sequence.topic);
            }
        }
        Ok(expired)
    }

    /// Subscribe every stored session topic again.
    pub async fn resubscribe(&self) -> Result<usize> {
        self.inner.sequences.resubscribe_all().await
    }
}

impl SessionInner {
    async fn handle_request(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        match request.method.as_str() {
            methods::SESSION_APPROVE => self.on_approve(topic, request).await,
            methods::SESSION_REJECT => self.on_reject(topic, request).await,
            methods::SESSION_UPDATE => self.on_update(topic, request).await,
            methods::SESSION_UPGRADE => self.on_upgrade(topic, request).await,
            methods::SESSION_PAYLOAD => self.on_payload(topic, request).await,
            methods::SESSION_NOTIFICATION => self.on_notification(topic, request).await,
            methods::SESSION_PING => self.on_ping(topic, request).await,
            methods::SESSION_DELETE => self.on_delete(topic, request).await,
            other => {
                warn!(%topic, method = other, "unknown session method ignored");
                Ok(())
            }
        }
    }

    async fn on_approve(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        let _guard = self.sequences.lock().await;
        let settled = self.sequences.complete_proposal(topic, request).await?;
        let state = settled.settled_state()?;

        info!(topic = %settled.topic, proposal = %topic, "session settled");
        self.events.publish(EngineEvent::SessionApproved {
            topic: settled.topic.clone(),
            proposal_topic: topic.clone(),
            peer: state.peer.clone(),
            accounts: state.accounts.clone(),
            permissions: state.permissions.clone(),
        });
        Ok(())
    }

    async fn on_reject(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        let _guard = self.sequences.lock().await;
        self.sequences.open_pending(topic).await?;
        let params: ReasonParams = request.parse_params()?;
        if self.sequences.terminate(topic).await?.is_some() {
            info!(%topic, reason = %params.reason, "session rejected by peer");
            self.events.publish(EngineEvent::SessionRejected {
                topic: topic.clone(),
                reason: params.reason,
            });
        }
        Ok(())
    }

    async fn on_update(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        let _guard = self.sequences.lock().await;
        let mut sequence = self.sequences.require_settled(topic).await?;
        let state = sequence.settled_state()?;
        if !state.peer_is_controller() {
            return Err(refuse(
                ReasonCode::UnauthorizedUpdateRequest,
                "peer is not the controller",
            ));
        }
        let params: UpdateParams = request.parse_params()?;
        let accounts = params
            .accounts
            .ok_or_else(|| EngineError::Malformed("session update without accounts".into()))?;
        match check_accounts(&accounts, &state.permissions) {
            Err(EngineError::NotPermitted(msg)) => {
                return Err(refuse(ReasonCode::UnauthorizedTargetChain, msg));
            }
            other => other?,
        }

        if let Some(state) = sequence.as_settled_mut() {
            state.accounts = accounts.clone();
        }
        self.sequences.save(&sequence).await?;
        self.sequences
            .rpc()
            .respond_ok(topic, request.id, Value::Bool(true))
            .await?;

        debug!(%topic, accounts = accounts.len(), "session accounts updated");
        self.events.publish(EngineEvent::SessionUpdated {
            topic: topic.clone(),
            accounts,
        });
        Ok(())
    }

    async fn on_upgrade(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        let _guard = self.sequences.lock().await;
        let mut sequence = self.sequences.require_settled(topic).await?;
        if !sequence.settled_state()?.peer_is_controller() {
            return Err(refuse(
                ReasonCode::UnauthorizedUpgradeRequest,
                "peer is not the controller",
            ));
        }
        let params: UpgradeParams = request.parse_params()?;
        params.permissions.validate()?;

        let merged = match sequence.as_settled_mut() {
            Some(state) => {
                state.permissions.merge(&params.permissions);
                state.permissions.clone()
            }
            None => return Err(EngineError::not_found("session", topic)),
        };
        self.sequences.save(&sequence).await?;
        self.sequences
            .rpc()
            .respond_ok(topic, request.id, Value::Bool(true))
            .await?;

        debug!(%topic, "session permissions upgraded");
        self.events.publish(EngineEvent::SessionUpgraded {
            topic: topic.clone(),
            permissions: merged,
        });
        Ok(())
    }

    /// Surfaced to the application, which answers through `SessionEngine::respond`.
    async fn on_payload(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        let _guard = self.sequences.lock().await;
        let sequence = self.sequences.require_settled(topic).await?;
        let permissions = &sequence.settled_state()?.permissions;
        let params: SessionPayloadParams = request.parse_params()?;

        if !permissions.allows_method(&params.request.method) {
            return Err(refuse(
                ReasonCode::UnauthorizedJsonRpcMethod,
                format!("method {} is not granted", params.request.method),
            ));
        }
        if let Some(chain) = &params.chain_id {
            if !permissions.allows_chain(chain) {
                return Err(refuse(
                    ReasonCode::UnauthorizedTargetChain,
                    format!("chain {} is not granted", chain),
                ));
            }
        }

        debug!(%topic, id = request.id, method = %params.request.method, "payload request received");
        self.events.publish(EngineEvent::PayloadRequest {
            topic: topic.clone(),
            id: request.id,
            chain_id: params.chain_id,
            request: params.request,
        });
        Ok(())
    }

    async fn on_notification(&self, topic: &Topic, request: &JsonRpcRequest) -> Result<()> {
        let _guard = self.sequences.lock().await;
        let sequence = self.sequences.require_settled(topic).await?;
        let state = sequence.settled_state()?;
        let notification: Notification = request.parse_params()?;
        if !state.peer_is_controller() && !state.permissions.allows_notification(&notification.kind)
        {
            return Err(refuse(
                ReasonCode::UnauthorizedNotificationType,
                format!("notification type {} is not granted", notification.kind),
            ));
        }
        self.sequences
            .rpc()
            .respond_ok(topic, request.id, Value::Bool(true))
            .await?;

        self.events.publish(EngineEvent::NotificationReceived {
            topic: topic.clone(),
            notification,
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
            info!(%topic, reason = %params.reason, "session deleted by peer");
            self.events.publish(EngineEvent::SessionDeleted {
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
                    info!(topic = %settled.topic, "session acknowledged");
                    self.events.publish(EngineEvent::SessionAcknowledged {
                        topic: settled.topic,
                    });
                }
                Err(e) => warn!(%topic, error = %e, "could not promote session"),
            },
            Err(e) => {
                let reason = e.reason();
                match self.sequences.terminate(topic).await {
                    Ok(Some(_)) => {
                        info!(%topic, %reason, "session approval refused");
                        self.events.publish(EngineEvent::SessionRejected {
                            topic: topic.clone(),
                            reason,
                        });
                    }
                    Ok(None) => {}
                    Err(e) => warn!(%topic, error = %e, "could not drop refused session"),
                }
            }
        }
    }
}

#[async_trait]
impl InboundHandler for SessionInner {
    async fn on_request(&self, topic: Topic, request: JsonRpcRequest) {
        let Err(e) = self.handle_request(&topic, &request).await else {
            return;
        };
        if is_one_way(&request.method) {
            warn!(%topic, method = %request.method, error = %e, "dropping session message");
            return;
        }
        warn!(%topic, method = %request.method, error = %e, "refusing session request");
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
        match pending.method.as_str() {
            methods::SESSION_APPROVE => {
                let outcome = response.into_result().map_err(EngineError::Rejected);
                self.on_approve_answer(&topic, &outcome).await;
                pending.complete(outcome);
            }
            methods::SESSION_PAYLOAD => {
                self.events.publish(EngineEvent::PayloadResponse {
                    topic,
                    response: response.clone(),
                });
                pending.complete(response.into_result().map_err(EngineError::Rejected));
            }
            _ => pending.complete(response.into_result().map_err(EngineError::Rejected)),
        }
    }

    async fn resubscribe(&self) {
        match self.sequences.resubscribe_all().await {
            Ok(count) => debug!(count, "session topics resubscribed"),
            Err(e) => warn!(error = %e, "session resubscription failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permissions() -> Permissions {
        Permissions::new(["eip155:1"], ["eth_sign"])
    }

    #[test]
    fn accounts_must_be_caip10_on_granted_chains() {
        let ok: BTreeSet<String> = ["eip155:1:0xabc".to_string()].into();
        assert!(check_accounts(&ok, &permissions()).is_ok());

        let malformed: BTreeSet<String> = ["0xabc".to_string()].into();
        assert!(matches!(
            check_accounts(&malformed, &permissions()),
            Err(EngineError::Malformed(_))
        ));

        let other_chain: BTreeSet<String> = ["eip155:137:0xabc".to_string()].into();
        assert!(matches!(
            check_accounts(&other_chain, &permissions()),
            Err(EngineError::NotPermitted(_))
        ));
    }

    #[test]
    fn session_request_builder() {
        let request = SessionRequest::new(
            Topic::new("t"),
            RequestArguments::new("eth_sign", json!(["0xabc", "0xdead"])),
        )
        .on_chain("eip155:1");
        assert_eq!(request.chain_id.as_deref(), Some("eip155:1"));
    }

    mod refusals {
        use std::sync::Arc;
        use std::time::Duration;

        use walletlink_lib::test_utils::MemoryRelayNetwork;
        use walletlink_lib::{AppMetadata, InMemoryKeyManagement};

        use super::*;
        use crate::client::WalletLinkClient;
        use crate::events::EventReceiver;

        const ACCOUNT: &str = "eip155:1:0xabc";

        /// A dapp and a wallet sharing a settled pairing and session.
        struct Linked {
            _network: Arc<MemoryRelayNetwork>,
            dapp: WalletLinkClient,
            wallet: WalletLinkClient,
            pairing: Topic,
            session: Topic,
        }

        async fn next(
            events: &mut EventReceiver,
            matches: impl Fn(&EngineEvent) -> bool,
        ) -> EngineEvent {
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let event = events.recv().await.unwrap();
                    if matches(&event) {
                        return event;
                    }
                }
            })
            .await
            .unwrap()
        }

        async fn client(
            network: &Arc<MemoryRelayNetwork>,
            name: &str,
            config: EngineConfig,
        ) -> (WalletLinkClient, EventReceiver) {
            let (relay, relay_events) = network.connect(name);
            let client =
                WalletLinkClient::new(config, relay, Arc::new(InMemoryKeyManagement::new()))
                    .unwrap();
            let events = client.events();
            client.start(relay_events).await.unwrap();
            (client, events)
        }

        async fn linked() -> Linked {
            let network = MemoryRelayNetwork::new();
            let (dapp, mut dapp_events) =
                client(&network, "dapp", EngineConfig::dapp(AppMetadata::new("Dapp"))).await;
            let (wallet, mut wallet_events) = client(
                &network,
                "wallet",
                EngineConfig::controller(AppMetadata::new("Wallet")),
            )
            .await;

            let uri = dapp.pairing().propose().await.unwrap();
            wallet.pairing().approve(&uri.to_string()).await.unwrap();
            let pairing = match next(&mut dapp_events, |e| {
                matches!(e, EngineEvent::PairingApproved { .. })
            })
            .await
            {
                EngineEvent::PairingApproved { topic, .. } => topic,
                other => panic!("unexpected event {:?}", other),
            };
            next(&mut wallet_events, |e| {
                matches!(e, EngineEvent::PairingAcknowledged { .. })
            })
            .await;

            let granted = permissions().with_notifications(["accountsChanged"]);
            dapp.session().propose(&pairing, granted, None).await.unwrap();
            let proposal = match next(&mut wallet_events, |e| {
                matches!(e, EngineEvent::SessionProposal { .. })
            })
            .await
            {
                EngineEvent::SessionProposal { proposal, .. } => proposal,
                other => panic!("unexpected event {:?}", other),
            };
            wallet.session().approve(&proposal, [ACCOUNT]).await.unwrap();
            let session = match next(&mut dapp_events, |e| {
                matches!(e, EngineEvent::SessionApproved { .. })
            })
            .await
            {
                EngineEvent::SessionApproved { topic, .. } => topic,
                other => panic!("unexpected event {:?}", other),
            };
            next(&mut wallet_events, |e| {
                matches!(e, EngineEvent::SessionAcknowledged { .. })
            })
            .await;

            Linked {
                _network: network,
                dapp,
                wallet,
                pairing,
                session,
            }
        }

        /// Send `method` straight through the client's channel, skipping the
        /// outbound checks, and return the peer's answer.
        async fn send_raw(
            from: &WalletLinkClient,
            topic: &Topic,
            method: &str,
            params: Value,
        ) -> Result<Value> {
            from.session()
                .inner
                .sequences
                .rpc()
                .request(topic, method, params)
                .await?
                .wait()
                .await
        }

        fn refusal_code(outcome: Result<Value>) -> i64 {
            match outcome {
                Err(EngineError::Rejected(reason)) => reason.code,
                other => panic!("expected a refusal, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn update_from_non_controller_is_refused() {
            let link = linked().await;
            let params = serde_json::to_value(UpdateParams {
                accounts: Some(["eip155:1:0xdef".to_string()].into()),
                metadata: None,
            })
            .unwrap();
            let outcome =
                send_raw(&link.dapp, &link.session, methods::SESSION_UPDATE, params).await;
            assert_eq!(
                refusal_code(outcome),
                ReasonCode::UnauthorizedUpdateRequest as i64
            );

            let stored = link.wallet.session().get(&link.session).await.unwrap().unwrap();
            let accounts = &stored.settled_state().unwrap().accounts;
            assert!(accounts.contains(ACCOUNT) && accounts.len() == 1);
        }

        #[tokio::test]
        async fn update_onto_ungranted_chain_is_refused() {
            let link = linked().await;
            let params = serde_json::to_value(UpdateParams {
                accounts: Some(["eip155:137:0xabc".to_string()].into()),
                metadata: None,
            })
            .unwrap();
            let outcome =
                send_raw(&link.wallet, &link.session, methods::SESSION_UPDATE, params).await;
            assert_eq!(
                refusal_code(outcome),
                ReasonCode::UnauthorizedTargetChain as i64
            );
        }

        #[tokio::test]
        async fn upgrade_from_non_controller_is_refused() {
            let link = linked().await;
            let params = serde_json::to_value(UpgradeParams {
                permissions: Permissions::new(["eip155:137"], ["eth_sendTransaction"]),
            })
            .unwrap();
            let outcome =
                send_raw(&link.dapp, &link.session, methods::SESSION_UPGRADE, params).await;
            assert_eq!(
                refusal_code(outcome),
                ReasonCode::UnauthorizedUpgradeRequest as i64
            );

            let stored = link.wallet.session().get(&link.session).await.unwrap().unwrap();
            assert!(!stored
                .settled_state()
                .unwrap()
                .permissions
                .allows_chain("eip155:137"));
        }

        #[tokio::test]
        async fn notification_type_must_be_granted() {
            let link = linked().await;
            let params =
                serde_json::to_value(Notification::new("chainChanged", json!(["eip155:137"])))
                    .unwrap();
            let outcome = send_raw(
                &link.dapp,
                &link.session,
                methods::SESSION_NOTIFICATION,
                params,
            )
            .await;
            assert_eq!(
                refusal_code(outcome),
                ReasonCode::UnauthorizedNotificationType as i64
            );

            let params =
                serde_json::to_value(Notification::new("accountsChanged", json!([ACCOUNT])))
                    .unwrap();
            send_raw(
                &link.dapp,
                &link.session,
                methods::SESSION_NOTIFICATION,
                params,
            )
            .await
            .unwrap();
        }

        #[tokio::test]
        async fn payload_method_must_be_granted() {
            let link = linked().await;
            let params = serde_json::to_value(SessionPayloadParams {
                chain_id: None,
                request: RequestArguments::new("eth_sendTransaction", json!([])),
            })
            .unwrap();
            let outcome =
                send_raw(&link.dapp, &link.session, methods::SESSION_PAYLOAD, params).await;
            assert_eq!(
                refusal_code(outcome),
                ReasonCode::UnauthorizedJsonRpcMethod as i64
            );
        }

        #[tokio::test]
        async fn payload_chain_must_be_granted() {
            let link = linked().await;
            let params = serde_json::to_value(SessionPayloadParams {
                chain_id: Some("eip155:137".to_string()),
                request: RequestArguments::new("eth_sign", json!([ACCOUNT, "0xdead"])),
            })
            .unwrap();
            let outcome =
                send_raw(&link.dapp, &link.session, methods::SESSION_PAYLOAD, params).await;
            assert_eq!(
                refusal_code(outcome),
                ReasonCode::UnauthorizedTargetChain as i64
            );
        }

        #[tokio::test]
        async fn pairing_update_from_non_controller_is_refused() {
            let link = linked().await;
            let params = serde_json::to_value(UpdateParams {
                accounts: None,
                metadata: Some(AppMetadata::new("Impostor")),
            })
            .unwrap();
            let outcome =
                send_raw(&link.dapp, &link.pairing, methods::PAIRING_UPDATE, params).await;
            assert_eq!(
                refusal_code(outcome),
                ReasonCode::UnauthorizedUpdateRequest as i64
            );
        }
    }
}
