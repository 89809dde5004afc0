//! Engine events, fanned out to the application over a broadcast channel.
//!
//! Every event names the topic it concerns. Events for one topic are
//! published in the order the engine processed them.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use walletlink_lib::protocol::{Notification, Proposal, RequestArguments};
use walletlink_lib::{AppMetadata, JsonRpcResponse, Permissions, Reason, Topic};

use crate::sequence::Participant;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// We published a pairing proposal.
    PairingProposed { topic: Topic },
    /// Proposer side: the responder approved and the pairing is settled.
    PairingApproved {
        topic: Topic,
        proposal_topic: Topic,
        peer: Participant,
    },
    /// Responder side: the proposer acknowledged our approval.
    PairingAcknowledged { topic: Topic },
    PairingUpdated { topic: Topic, metadata: AppMetadata },
    PairingRejected { topic: Topic, reason: Reason },
    PairingDeleted { topic: Topic, reason: Reason },
    PairingExpired { topic: Topic },
    /// A session proposal arrived over a pairing.
    SessionProposal {
        topic: Topic,
        pairing_topic: Topic,
        proposal: Proposal,
    },
    /// Proposer side: the responder approved and the session is settled.
    SessionApproved {
        topic: Topic,
        proposal_topic: Topic,
        peer: Participant,
        accounts: BTreeSet<String>,
        permissions: Permissions,
    },
    /// Responder side: the proposer acknowledged our approval.
    SessionAcknowledged { topic: Topic },
    SessionRejected { topic: Topic, reason: Reason },
    SessionUpdated {
        topic: Topic,
        accounts: BTreeSet<String>,
    },
    SessionUpgraded {
        topic: Topic,
        permissions: Permissions,
    },
    SessionDeleted { topic: Topic, reason: Reason },
    SessionExpired { topic: Topic },
    NotificationReceived {
        topic: Topic,
        notification: Notification,
    },
    /// The peer asked us to execute a JSON-RPC call; answer with `SessionEngine::respond`.
    PayloadRequest {
        topic: Topic,
        id: u64,
        chain_id: Option<String>,
        request: RequestArguments,
    },
    /// The peer answered one of our payload requests.
    PayloadResponse {
        topic: Topic,
        response: JsonRpcResponse,
    },
}

impl EngineEvent {
    pub fn topic(&self) -> &Topic {
        match self {
            Self::PairingProposed { topic }
            | Self::PairingApproved { topic, .. }
            | Self::PairingAcknowledged { topic }
            | Self::PairingUpdated { topic, .. }
            | Self::PairingRejected { topic, .. }
            | Self::PairingDeleted { topic, .. }
            | Self::PairingExpired { topic }
            | Self::SessionProposal { topic, .. }
            | Self::SessionApproved { topic, .. }
            | Self::SessionAcknowledged { topic }
            | Self::SessionRejected { topic, .. }
            | Self::SessionUpdated { topic, .. }
            | Self::SessionUpgraded { topic, .. }
            | Self::SessionDeleted { topic, .. }
            | Self::SessionExpired { topic }
            | Self::NotificationReceived { topic, .. }
            | Self::PayloadRequest { topic, .. }
            | Self::PayloadResponse { topic, .. } => topic,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PairingProposed { .. } => "pairing_proposed",
            Self::PairingApproved { .. } => "pairing_approved",
            Self::PairingAcknowledged { .. } => "pairing_acknowledged",
            Self::PairingUpdated { .. } => "pairing_updated",
            Self::PairingRejected { .. } => "pairing_rejected",
            Self::PairingDeleted { .. } => "pairing_deleted",
            Self::PairingExpired { .. } => "pairing_expired",
            Self::SessionProposal { .. } => "session_proposal",
            Self::SessionApproved { .. } => "session_approved",
            Self::SessionAcknowledged { .. } => "session_acknowledged",
            Self::SessionRejected { .. } => "session_rejected",
            Self::SessionUpdated { .. } => "session_updated",
            Self::SessionUpgraded { .. } => "session_upgraded",
            Self::SessionDeleted { .. } => "session_deleted",
            Self::SessionExpired { .. } => "session_expired",
            Self::NotificationReceived { .. } => "notification_received",
            Self::PayloadRequest { .. } => "payload_request",
            Self::PayloadResponse { .. } => "payload_response",
        }
    }
}

/// Event bus for publishing engine events to any number of listeners.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<EngineEvent>>,
}

impl EventBus {
    /// Capacity determines how many events can be buffered before slow
    /// receivers start dropping the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: EngineEvent) {
        debug!(event = event.name(), topic = %event.topic(), "publishing event");

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("no subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to events for a single topic.
    pub fn subscribe_topic(&self, topic: Topic) -> TopicEventReceiver {
        TopicEventReceiver {
            receiver: self.sender.subscribe(),
            topic,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("event bus is closed")]
    Closed,

    #[error("no events available")]
    Empty,

    #[error("receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<EngineEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<EngineEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<EngineEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver that skips events for other topics.
pub struct TopicEventReceiver {
    receiver: broadcast::Receiver<EngineEvent>,
    topic: Topic,
}

impl TopicEventReceiver {
    pub async fn recv(&mut self) -> Result<EngineEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.topic() == &self.topic {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(EngineEvent::PairingExpired {
            topic: Topic::new("t"),
        });

        assert_eq!(a.recv().await.unwrap().name(), "pairing_expired");
        assert_eq!(b.recv().await.unwrap().topic(), &Topic::new("t"));
        assert_eq!(a.try_recv().unwrap_err(), EventBusError::Empty);
    }

    #[tokio::test]
    async fn topic_receiver_filters() {
        let bus = EventBus::new(8);
        let mut only_b = bus.subscribe_topic(Topic::new("b"));

        bus.publish(EngineEvent::SessionExpired {
            topic: Topic::new("a"),
        });
        bus.publish(EngineEvent::SessionAcknowledged {
            topic: Topic::new("b"),
        });

        match only_b.recv().await.unwrap() {
            EngineEvent::SessionAcknowledged { topic } => assert_eq!(topic.as_str(), "b"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new(1);
        bus.publish(EngineEvent::PairingProposed {
            topic: Topic::new("t"),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = EngineEvent::SessionUpdated {
            topic: Topic::new("t"),
            accounts: ["eip155:1:0xabc".to_string()].into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_updated");
        assert_eq!(json["topic"], "t");
    }
}
