//! Shared harness for walletlink-engine integration tests: a dapp and a
//! wallet client talking over one in-memory relay network.

use std::sync::Arc;
use std::time::Duration;

use walletlink_engine::events::EventReceiver;
use walletlink_engine::{EngineConfig, EngineEvent, WalletLinkClient, WalletLinkClientBuilder};
use walletlink_lib::protocol::Proposal;
use walletlink_lib::test_utils::MemoryRelayNetwork;
use walletlink_lib::{AppMetadata, InMemoryKeyManagement, Permissions, Topic};

pub const DAPP: &str = "dapp";
pub const WALLET: &str = "wallet";

#[allow(dead_code)]
pub struct Peer {
    pub name: String,
    pub client: WalletLinkClient,
    pub kms: Arc<InMemoryKeyManagement>,
    pub events: EventReceiver,
}

#[allow(dead_code)]
impl Peer {
    pub async fn next(&mut self, matches: impl FnMut(&EngineEvent) -> bool) -> EngineEvent {
        wait_for(&mut self.events, matches).await
    }
}

pub fn dapp_config() -> EngineConfig {
    EngineConfig::dapp(AppMetadata::new("Test Dapp").with_url("https://dapp.example"))
}

pub fn wallet_config() -> EngineConfig {
    EngineConfig::controller(AppMetadata::new("Test Wallet").with_url("https://wallet.example"))
}

pub fn eth_permissions() -> Permissions {
    Permissions::new(["eip155:1"], ["eth_sign"])
}

pub const ACCOUNT: &str = "eip155:1:0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb";

/// Connect `name` to the network and start a client on it.
#[allow(dead_code)]
pub async fn start_peer(
    network: &Arc<MemoryRelayNetwork>,
    name: &str,
    config: EngineConfig,
    kms: Arc<InMemoryKeyManagement>,
    configure: impl FnOnce(WalletLinkClientBuilder) -> WalletLinkClientBuilder,
) -> Peer {
    let (relay, relay_events) = network.connect(name);
    let client = configure(WalletLinkClient::builder(config, relay, kms.clone()))
        .build()
        .unwrap();
    let events = client.events();
    client.start(relay_events).await.unwrap();
    Peer {
        name: name.to_string(),
        client,
        kms,
        events,
    }
}

#[allow(dead_code)]
pub struct TestNetwork {
    pub network: Arc<MemoryRelayNetwork>,
    pub dapp: Peer,
    pub wallet: Peer,
}

#[allow(dead_code)]
impl TestNetwork {
    pub async fn new() -> Self {
        Self::with(dapp_config(), wallet_config()).await
    }

    pub async fn with(dapp: EngineConfig, wallet: EngineConfig) -> Self {
        let network = MemoryRelayNetwork::new();
        let dapp = start_peer(
            &network,
            DAPP,
            dapp,
            Arc::new(InMemoryKeyManagement::new()),
            |b| b,
        )
        .await;
        let wallet = start_peer(
            &network,
            WALLET,
            wallet,
            Arc::new(InMemoryKeyManagement::new()),
            |b| b,
        )
        .await;
        Self {
            network,
            dapp,
            wallet,
        }
    }

    /// Run the pairing handshake to completion and return the pairing topic.
    pub async fn pair(&mut self) -> Topic {
        let uri = self.dapp.client.pairing().propose().await.unwrap();
        self.wallet
            .client
            .pairing()
            .approve(&uri.to_string())
            .await
            .unwrap();

        let topic = match self
            .dapp
            .next(|e| matches!(e, EngineEvent::PairingApproved { .. }))
            .await
        {
            EngineEvent::PairingApproved { topic, .. } => topic,
            other => panic!("unexpected event {:?}", other),
        };
        self.wallet
            .next(|e| matches!(e, EngineEvent::PairingAcknowledged { .. }))
            .await;
        // the wallet pushes its metadata once acknowledged
        self.dapp
            .next(|e| matches!(e, EngineEvent::PairingUpdated { .. }))
            .await;
        topic
    }

    /// Propose a session from the dapp and return the proposal as the wallet saw it.
    pub async fn propose_session(&mut self, pairing: &Topic, permissions: Permissions) -> Proposal {
        self.dapp
            .client
            .session()
            .propose(pairing, permissions, None)
            .await
            .unwrap();
        match self
            .wallet
            .next(|e| matches!(e, EngineEvent::SessionProposal { .. }))
            .await
        {
            EngineEvent::SessionProposal { proposal, .. } => proposal,
            other => panic!("unexpected event {:?}", other),
        }
    }

    /// Pair, propose and approve a session. Returns `(pairing, session)` topics.
    pub async fn session(&mut self, permissions: Permissions) -> (Topic, Topic) {
        let pairing = self.pair().await;
        let proposal = self.propose_session(&pairing, permissions).await;
        self.wallet
            .client
            .session()
            .approve(&proposal, [ACCOUNT])
            .await
            .unwrap();

        let topic = match self
            .dapp
            .next(|e| matches!(e, EngineEvent::SessionApproved { .. }))
            .await
        {
            EngineEvent::SessionApproved { topic, .. } => topic,
            other => panic!("unexpected event {:?}", other),
        };
        self.wallet
            .next(|e| matches!(e, EngineEvent::SessionAcknowledged { .. }))
            .await;
        (pairing, topic)
    }
}

/// Next event satisfying `matches`, skipping the rest. Panics after five seconds.
pub async fn wait_for(
    events: &mut EventReceiver,
    mut matches: impl FnMut(&EngineEvent) -> bool,
) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event bus closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `check` until it holds. Panics after five seconds.
#[allow(dead_code)]
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held")
}
