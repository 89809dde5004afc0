//! JSON-RPC over the relay, with request/response correlation.
//!
//! Outstanding requests are keyed by `(topic, id)`. A response is matched to
//! its request by the inbound dispatcher; a response that matches nothing is
//! dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::oneshot;
use walletlink_lib::{
    JsonRpcPayload, JsonRpcRequest, JsonRpcResponse, KeyManagementService, Reason,
    RelayTransport, Topic,
};

use crate::codec::EnvelopeCodec;
use crate::{EngineError, Result};

/// A request we sent and still expect an answer to.
pub(crate) struct PendingRequest {
    pub(crate) method: String,
    sender: oneshot::Sender<Result<Value>>,
}

impl PendingRequest {
    pub(crate) fn complete(self, outcome: Result<Value>) {
        // the caller may have stopped waiting
        let _ = self.sender.send(outcome);
    }
}

/// Handle for the eventual answer to a request.
pub(crate) struct ResponseWaiter {
    topic: Topic,
    method: String,
    receiver: oneshot::Receiver<Result<Value>>,
}

impl ResponseWaiter {
    pub(crate) async fn wait(self) -> Result<Value> {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::Cancelled(format!(
                "{} on {} was abandoned",
                self.method, self.topic
            ))),
        }
    }
}

pub(crate) struct RpcChannel {
    relay: Arc<dyn RelayTransport>,
    codec: EnvelopeCodec,
    pending: Mutex<HashMap<(Topic, u64), PendingRequest>>,
}

impl RpcChannel {
    pub(crate) fn new(relay: Arc<dyn RelayTransport>, kms: Arc<dyn KeyManagementService>) -> Self {
        Self {
            relay,
            codec: EnvelopeCodec::new(kms),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<(Topic, u64), PendingRequest>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn publish(&self, topic: &Topic, payload: &JsonRpcPayload) -> Result<()> {
        let message = self.codec.encode(topic, payload).await?;
        self.relay
            .publish(topic, &message)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))
    }

    pub(crate) async fn decode(&self, topic: &Topic, message: &str) -> Result<JsonRpcPayload> {
        self.codec.decode(topic, message).await
    }

    /// Publish a request and register for its response.
    pub(crate) async fn request(
        &self,
        topic: &Topic,
        method: &str,
        params: Value,
    ) -> Result<ResponseWaiter> {
        let request = JsonRpcRequest::new(method, params);
        let key = (topic.clone(), request.id);
        let (sender, receiver) = oneshot::channel();

        self.pending().insert(
            key.clone(),
            PendingRequest {
                method: method.to_string(),
                sender,
            },
        );

        tracing::debug!(%topic, method, id = request.id, "sending request");
        if let Err(e) = self.publish(topic, &request.into()).await {
            self.pending().remove(&key);
            return Err(e);
        }

        Ok(ResponseWaiter {
            topic: topic.clone(),
            method: method.to_string(),
            receiver,
        })
    }

    /// Publish a request without waiting for an answer.
    pub(crate) async fn notify(&self, topic: &Topic, method: &str, params: Value) -> Result<()> {
        let request = JsonRpcRequest::new(method, params);
        tracing::debug!(%topic, method, id = request.id, "sending one-way request");
        self.publish(topic, &request.into()).await
    }

    pub(crate) async fn respond(&self, topic: &Topic, response: JsonRpcResponse) -> Result<()> {
        self.publish(topic, &response.into()).await
    }

    pub(crate) async fn respond_ok(&self, topic: &Topic, id: u64, result: Value) -> Result<()> {
        self.respond(topic, JsonRpcResponse::success(id, result)).await
    }

    pub(crate) async fn respond_err(&self, topic: &Topic, id: u64, reason: &Reason) -> Result<()> {
        tracing::debug!(%topic, id, code = reason.code, "refusing request");
        self.respond(topic, JsonRpcResponse::failure(id, reason)).await
    }

    /// Claim the outstanding request a response answers.
    pub(crate) fn take(&self, topic: &Topic, id: u64) -> Option<PendingRequest> {
        self.pending().remove(&(topic.clone(), id))
    }

    /// Drop every outstanding request on a topic; their waiters see `Cancelled`.
    pub(crate) fn cancel_topic(&self, topic: &Topic) -> usize {
        let mut pending = self.pending();
        let before = pending.len();
        pending.retain(|(t, _), _| t != topic);
        before - pending.len()
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use walletlink_lib::test_utils::MemoryRelayNetwork;
    use walletlink_lib::{InMemoryKeyManagement, RelayEvent};

    #[tokio::test]
    async fn request_is_answered_through_take() {
        let network = MemoryRelayNetwork::new();
        let (relay, _rx) = network.connect("a");
        let (peer, mut peer_rx) = network.connect("b");
        let topic = Topic::new("t");
        peer.subscribe(&topic).await.unwrap();

        let rpc = RpcChannel::new(relay, Arc::new(InMemoryKeyManagement::new()));
        let waiter = rpc.request(&topic, "wc_pairingPing", json!({})).await.unwrap();
        assert_eq!(rpc.pending_count(), 1);

        let id = match peer_rx.recv().await {
            Some(RelayEvent::Message { message, .. }) => {
                match serde_json::from_str::<JsonRpcPayload>(&message).unwrap() {
                    JsonRpcPayload::Request(req) => req.id,
                    other => panic!("expected request, got {:?}", other),
                }
            }
            other => panic!("expected message, got {:?}", other),
        };

        let pending = rpc.take(&topic, id).unwrap();
        assert_eq!(pending.method, "wc_pairingPing");
        pending.complete(Ok(json!(true)));
        assert_eq!(waiter.wait().await.unwrap(), json!(true));
        assert!(rpc.take(&topic, id).is_none());
    }

    #[tokio::test]
    async fn cancelled_topics_release_waiters() {
        let network = MemoryRelayNetwork::new();
        let (relay, _rx) = network.connect("a");
        let rpc = RpcChannel::new(relay, Arc::new(InMemoryKeyManagement::new()));
        let topic = Topic::new("t");

        let waiter = rpc.request(&topic, "wc_sessionPing", json!({})).await.unwrap();
        assert_eq!(rpc.cancel_topic(&topic), 1);
        assert!(matches!(waiter.wait().await, Err(EngineError::Cancelled(_))));
    }

    #[tokio::test]
    async fn failed_publish_leaves_nothing_pending() {
        let network = MemoryRelayNetwork::new();
        let (relay, _rx) = network.connect("a");
        network.set_fail_publishes(true);
        let rpc = RpcChannel::new(relay, Arc::new(InMemoryKeyManagement::new()));

        let err = rpc
            .request(&Topic::new("t"), "wc_sessionPing", json!({}))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Transport(_)));
        assert_eq!(rpc.pending_count(), 0);
    }
}
