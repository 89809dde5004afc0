//! One relay connection, one key store, both engines.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walletlink_lib::{
    now_secs, KeyManagementService, RandomTopicGenerator, RelayEvent, RelayTransport, Topic,
    TopicGenerator,
};

use crate::config::EngineConfig;
use crate::events::{EventBus, EventReceiver};
use crate::pairing::PairingEngine;
use crate::registry::Sequences;
use crate::rpc::RpcChannel;
use crate::sequence::SequenceKind;
use crate::session::SessionEngine;
use crate::storage::{InMemorySequenceStore, SequenceStore};
use crate::subscriber::{InboundHandler, Subscriber};
use crate::Result;

/// Pairing and session engines sharing a relay, a key store and an event bus.
///
/// After [`start`](Self::start) the client dispatches inbound relay traffic
/// and sweeps expired sequences in the background. Dropping the client stops
/// both tasks.
pub struct WalletLinkClient {
    config: Arc<EngineConfig>,
    pairing: PairingEngine,
    session: SessionEngine,
    subscriber: Arc<Subscriber>,
    events: EventBus,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

pub struct WalletLinkClientBuilder {
    config: EngineConfig,
    relay: Arc<dyn RelayTransport>,
    kms: Arc<dyn KeyManagementService>,
    pairing_store: Option<Arc<dyn SequenceStore>>,
    session_store: Option<Arc<dyn SequenceStore>>,
    topics: Option<Arc<dyn TopicGenerator>>,
}

impl WalletLinkClientBuilder {
    /// Defaults to an in-memory store.
    pub fn with_pairing_store(mut self, store: Arc<dyn SequenceStore>) -> Self {
        self.pairing_store = Some(store);
        self
    }

    /// Defaults to an in-memory store.
    pub fn with_session_store(mut self, store: Arc<dyn SequenceStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Defaults to [`RandomTopicGenerator`].
    pub fn with_topic_generator(mut self, topics: Arc<dyn TopicGenerator>) -> Self {
        self.topics = Some(topics);
        self
    }

    pub fn build(self) -> Result<WalletLinkClient> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let kms = self.kms;
        let rpc = Arc::new(RpcChannel::new(self.relay.clone(), kms.clone()));
        let subscriber = Arc::new(Subscriber::new(self.relay, rpc.clone()));
        let topics = self
            .topics
            .unwrap_or_else(|| Arc::new(RandomTopicGenerator) as Arc<dyn TopicGenerator>);
        let events = EventBus::new(config.event_capacity);

        let in_memory = || Arc::new(InMemorySequenceStore::new()) as Arc<dyn SequenceStore>;
        let pairing_store = self.pairing_store.unwrap_or_else(in_memory);
        let session_store = self.session_store.unwrap_or_else(in_memory);

        let sequences = |kind: SequenceKind, store: Arc<dyn SequenceStore>| {
            Sequences::new(
                kind,
                store,
                kms.clone(),
                subscriber.clone(),
                rpc.clone(),
                topics.clone(),
                config.max_topic_attempts,
            )
        };

        let pairing = PairingEngine::new(
            config.clone(),
            sequences(SequenceKind::Pairing, pairing_store),
            session_store.clone(),
            events.clone(),
        );
        let session = SessionEngine::new(
            config.clone(),
            sequences(SequenceKind::Session, session_store),
            events.clone(),
            pairing.clone(),
        );

        let handler: Arc<dyn InboundHandler> = pairing.inner.clone();
        subscriber.register(SequenceKind::Pairing, Arc::downgrade(&handler));
        let handler: Arc<dyn InboundHandler> = session.inner.clone();
        subscriber.register(SequenceKind::Session, Arc::downgrade(&handler));

        Ok(WalletLinkClient {
            config,
            pairing,
            session,
            subscriber,
            events,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

impl WalletLinkClient {
    pub fn builder(
        config: EngineConfig,
        relay: Arc<dyn RelayTransport>,
        kms: Arc<dyn KeyManagementService>,
    ) -> WalletLinkClientBuilder {
        WalletLinkClientBuilder {
            config,
            relay,
            kms,
            pairing_store: None,
            session_store: None,
            topics: None,
        }
    }

    /// Client with in-memory stores and random topics.
    pub fn new(
        config: EngineConfig,
        relay: Arc<dyn RelayTransport>,
        kms: Arc<dyn KeyManagementService>,
    ) -> Result<Self> {
        Self::builder(config, relay, kms).build()
    }

    /// Resubscribe every stored topic, then start dispatching `relay_events`
    /// and sweeping expired sequences.
    pub async fn start(&self, mut relay_events: mpsc::UnboundedReceiver<RelayEvent>) -> Result<()> {
        let pairings = self.pairing.resubscribe().await?;
        let sessions = self.session.resubscribe().await?;
        info!(pairings, sessions, "walletlink client started");

        let subscriber = self.subscriber.clone();
        let inbound = tokio::spawn(async move {
            while let Some(event) = relay_events.recv().await {
                subscriber.handle_event(event).await;
            }
            debug!("relay event stream closed");
        });

        let pairing = self.pairing.clone();
        let session = self.session.clone();
        let period = self.config.sweep_interval();
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep(&pairing, &session, now_secs()).await;
            }
        });

        self.tasks().extend([inbound, sweeper]);
        Ok(())
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pairing(&self) -> &PairingEngine {
        &self.pairing
    }

    pub fn session(&self) -> &SessionEngine {
        &self.session
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A new receiver for every event either engine publishes.
    pub fn events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    /// Run one expiry sweep over both engines now.
    pub async fn sweep_expired(&self, now: i64) -> Result<Vec<Topic>> {
        let mut expired = self.session.sweep_expired(now).await?;
        expired.extend(self.pairing.sweep_expired(now).await?);
        Ok(expired)
    }

    /// Stop the background tasks. Stored sequences are left untouched.
    pub fn shutdown(&self) {
        for task in self.tasks().drain(..) {
            task.abort();
        }
    }
}

impl Drop for WalletLinkClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn sweep(pairing: &PairingEngine, session: &SessionEngine, now: i64) {
    if let Err(e) = session.sweep_expired(now).await {
        warn!(error = %e, "session sweep failed");
    }
    if let Err(e) = pairing.sweep_expired(now).await {
        warn!(error = %e, "pairing sweep failed");
    }
}
