//! In-process relay network for E2E testing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{LinkError, RelayEvent, RelayTransport, Result, Topic};

/// A message as seen by the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Name of the publishing client.
    pub from: String,
    pub topic: Topic,
    pub message: String,
}

struct Client {
    sender: mpsc::UnboundedSender<RelayEvent>,
    subscriptions: HashSet<Topic>,
}

#[derive(Default)]
struct NetworkState {
    clients: HashMap<String, Client>,
    /// Messages published while nobody else was listening, handed to the next subscriber.
    mailbox: HashMap<Topic, VecDeque<(String, String)>>,
    published: Vec<PublishedMessage>,
}

/// A simulated relay shared by any number of named clients.
///
/// Publishing delivers to every other client subscribed to the topic. A
/// message with no listener is held until someone subscribes, the way a
/// relay caches messages for offline peers.
pub struct MemoryRelayNetwork {
    state: Mutex<NetworkState>,
    fail_publishes: AtomicBool,
}

impl MemoryRelayNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(NetworkState::default()),
            fail_publishes: AtomicBool::new(false),
        })
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a client. Connecting an existing name replaces its connection.
    pub fn connect(
        self: &Arc<Self>,
        name: &str,
    ) -> (Arc<MemoryRelay>, mpsc::UnboundedReceiver<RelayEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state().clients.insert(
            name.to_string(),
            Client {
                sender,
                subscriptions: HashSet::new(),
            },
        );
        let relay = Arc::new(MemoryRelay {
            name: name.to_string(),
            network: Arc::clone(self),
        });
        (relay, receiver)
    }

    /// Drop a client and all of its subscriptions.
    pub fn disconnect(&self, name: &str) {
        self.state().clients.remove(name);
    }

    /// Wipe a client's subscriptions and tell it the connection was restored.
    pub fn simulate_reconnect(&self, name: &str) {
        let mut state = self.state();
        if let Some(client) = state.clients.get_mut(name) {
            client.subscriptions.clear();
            let _ = client.sender.send(RelayEvent::Reconnected);
        }
    }

    /// Make every subsequent publish fail.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Every message accepted by the network, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    pub fn published_count(&self) -> usize {
        self.state().published.len()
    }

    pub fn published_on(&self, topic: &Topic) -> Vec<PublishedMessage> {
        self.state()
            .published
            .iter()
            .filter(|m| &m.topic == topic)
            .cloned()
            .collect()
    }

    /// Topics a client is currently subscribed to.
    pub fn subscriptions(&self, name: &str) -> HashSet<Topic> {
        self.state()
            .clients
            .get(name)
            .map(|c| c.subscriptions.clone())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, name: &str, topic: &Topic) -> bool {
        self.state()
            .clients
            .get(name)
            .is_some_and(|c| c.subscriptions.contains(topic))
    }

    fn publish(&self, from: &str, topic: &Topic, message: &str) -> Result<()> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(LinkError::transport("relay unavailable"));
        }

        let mut state = self.state();
        state.published.push(PublishedMessage {
            from: from.to_string(),
            topic: topic.clone(),
            message: message.to_string(),
        });

        let mut delivered = false;
        for (name, client) in state.clients.iter() {
            if name != from && client.subscriptions.contains(topic) {
                let _ = client.sender.send(RelayEvent::Message {
                    topic: topic.clone(),
                    message: message.to_string(),
                });
                delivered = true;
            }
        }

        if !delivered {
            state
                .mailbox
                .entry(topic.clone())
                .or_default()
                .push_back((from.to_string(), message.to_string()));
        }
        Ok(())
    }

    fn subscribe(&self, name: &str, topic: &Topic) -> Result<()> {
        let mut state = self.state();
        let NetworkState {
            clients, mailbox, ..
        } = &mut *state;

        let client = clients
            .get_mut(name)
            .ok_or_else(|| LinkError::transport(format!("client '{}' is not connected", name)))?;
        client.subscriptions.insert(topic.clone());

        if let Some(queue) = mailbox.get_mut(topic) {
            let mut kept = VecDeque::new();
            while let Some((from, message)) = queue.pop_front() {
                if from == name {
                    kept.push_back((from, message));
                } else {
                    let _ = client.sender.send(RelayEvent::Message {
                        topic: topic.clone(),
                        message,
                    });
                }
            }
            *queue = kept;
        }
        Ok(())
    }

    fn unsubscribe(&self, name: &str, topic: &Topic) {
        if let Some(client) = self.state().clients.get_mut(name) {
            client.subscriptions.remove(topic);
        }
    }
}

/// One client's handle onto a [`MemoryRelayNetwork`].
pub struct MemoryRelay {
    name: String,
    network: Arc<MemoryRelayNetwork>,
}

impl MemoryRelay {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl RelayTransport for MemoryRelay {
    async fn publish(&self, topic: &Topic, message: &str) -> Result<()> {
        self.network.publish(&self.name, topic, message)
    }

    async fn subscribe(&self, topic: &Topic) -> Result<()> {
        self.network.subscribe(&self.name, topic)
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        self.network.unsubscribe(&self.name, topic);
        Ok(())
    }
}
