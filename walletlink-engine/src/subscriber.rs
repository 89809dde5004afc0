//! Relay subscriptions and inbound dispatch.
//!
//! The subscriber owns the mapping from topics to the engine that handles
//! them. Inbound requests are routed by method family (`wc_pairing*` or
//! `wc_session*`); responses are routed by the method of the request they
//! answer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use walletlink_lib::jsonrpc::methods;
use walletlink_lib::{JsonRpcPayload, JsonRpcRequest, JsonRpcResponse, RelayEvent, RelayTransport, Topic};

use crate::rpc::{PendingRequest, RpcChannel};
use crate::sequence::SequenceKind;
use crate::{EngineError, Result};

/// Engine-side entry points for inbound traffic.
#[async_trait]
pub(crate) trait InboundHandler: Send + Sync {
    async fn on_request(&self, topic: Topic, request: JsonRpcRequest);

    async fn on_response(&self, topic: Topic, pending: PendingRequest, response: JsonRpcResponse);

    /// Re-establish relay subscriptions for every stored sequence.
    async fn resubscribe(&self);
}

fn kind_for_method(method: &str) -> Option<SequenceKind> {
    if method.starts_with(methods::PAIRING_PREFIX) {
        Some(SequenceKind::Pairing)
    } else if method.starts_with(methods::SESSION_PREFIX) {
        Some(SequenceKind::Session)
    } else {
        None
    }
}

pub(crate) struct Subscriber {
    relay: Arc<dyn RelayTransport>,
    rpc: Arc<RpcChannel>,
    topics: Mutex<HashMap<Topic, SequenceKind>>,
    handlers: RwLock<HashMap<SequenceKind, Weak<dyn InboundHandler>>>,
}

impl Subscriber {
    pub(crate) fn new(relay: Arc<dyn RelayTransport>, rpc: Arc<RpcChannel>) -> Self {
        Self {
            relay,
            rpc,
            topics: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<Topic, SequenceKind>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn register(&self, kind: SequenceKind, handler: Weak<dyn InboundHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, handler);
    }

    fn handler(&self, kind: SequenceKind) -> Option<Arc<dyn InboundHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .and_then(Weak::upgrade)
    }

    /// Subscribe once; repeated calls for a tracked topic do nothing.
    pub(crate) async fn subscribe(&self, topic: &Topic, kind: SequenceKind) -> Result<()> {
        {
            let mut topics = self.topics();
            if topics.contains_key(topic) {
                return Ok(());
            }
            topics.insert(topic.clone(), kind);
        }

        if let Err(e) = self.relay.subscribe(topic).await {
            self.topics().remove(topic);
            return Err(EngineError::Transport(e.to_string()));
        }
        debug!(%topic, %kind, "subscribed");
        Ok(())
    }

    /// Subscribe even if the topic is already tracked (after a reconnect or restart).
    pub(crate) async fn resubscribe(&self, topic: &Topic, kind: SequenceKind) -> Result<()> {
        self.topics().insert(topic.clone(), kind);
        self.relay
            .subscribe(topic)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))
    }

    pub(crate) async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        if self.topics().remove(topic).is_none() {
            return Ok(());
        }
        self.relay
            .unsubscribe(topic)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        debug!(%topic, "unsubscribed");
        Ok(())
    }

    pub(crate) fn is_subscribed(&self, topic: &Topic) -> bool {
        self.topics().contains_key(topic)
    }

    pub(crate) async fn handle_event(&self, event: RelayEvent) {
        match event {
            RelayEvent::Message { topic, message } => self.dispatch(topic, &message).await,
            RelayEvent::Reconnected => {
                info!("relay reconnected, restoring subscriptions");
                for kind in [SequenceKind::Pairing, SequenceKind::Session] {
                    if let Some(handler) = self.handler(kind) {
                        handler.resubscribe().await;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, topic: Topic, message: &str) {
        if !self.is_subscribed(&topic) {
            debug!(%topic, "message for a topic we no longer follow; discarded");
            return;
        }

        let payload = match self.rpc.decode(&topic, message).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%topic, error = %e, "undecodable message dropped");
                return;
            }
        };

        match payload {
            JsonRpcPayload::Request(request) => {
                let Some(kind) = kind_for_method(&request.method) else {
                    warn!(%topic, method = %request.method, "unknown method ignored");
                    return;
                };
                match self.handler(kind) {
                    Some(handler) => handler.on_request(topic, request).await,
                    None => warn!(%topic, %kind, "no engine registered"),
                }
            }
            JsonRpcPayload::Response(response) => {
                let Some(pending) = self.rpc.take(&topic, response.id) else {
                    debug!(%topic, id = response.id, "response without outstanding request; discarded");
                    return;
                };
                let Some(kind) = kind_for_method(&pending.method) else {
                    return;
                };
                match self.handler(kind) {
                    Some(handler) => handler.on_response(topic, pending, response).await,
                    None => warn!(%topic, %kind, "no engine registered"),
                }
            }
        }
    }
}
