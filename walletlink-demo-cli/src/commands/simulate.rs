//! Two in-process peers running the whole protocol over the in-memory relay

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use tracing::info;
use walletlink_engine::events::EventReceiver;
use walletlink_engine::{
    EngineConfig, EngineEvent, FileSequenceStore, SessionRequest, WalletLinkClient,
};
use walletlink_lib::protocol::{Notification, RequestArguments};
use walletlink_lib::test_utils::MemoryRelayNetwork;
use walletlink_lib::{
    AppMetadata, InMemoryKeyManagement, JsonRpcResponse, Permissions, Reason, Topic,
};

use crate::ui;

pub const DEFAULT_ADDRESS: &str = "0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb";

const STEP_TIMEOUT: Duration = Duration::from_secs(5);
const NOTIFICATION: &str = "accountsChanged";

pub struct SimulateOptions {
    pub chain: String,
    pub method: String,
    pub address: String,
    /// Persist each peer's sequences under `<dir>/dapp` and `<dir>/wallet`.
    pub storage_dir: Option<PathBuf>,
    pub keep: bool,
    pub show_qr: bool,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            chain: "eip155:1".to_string(),
            method: "eth_sign".to_string(),
            address: DEFAULT_ADDRESS.to_string(),
            storage_dir: None,
            keep: false,
            show_qr: false,
        }
    }
}

/// What a finished simulation produced.
#[derive(Debug)]
pub struct SimulationReport {
    pub pairing: Topic,
    pub session: Topic,
    pub result: Value,
    pub deleted: bool,
}

struct Peer {
    label: &'static str,
    client: WalletLinkClient,
    events: EventReceiver,
}

impl Peer {
    async fn start(
        network: &Arc<MemoryRelayNetwork>,
        label: &'static str,
        config: EngineConfig,
        store_dir: Option<&Path>,
    ) -> Result<Self> {
        let (relay, relay_events) = network.connect(label);
        let mut builder =
            WalletLinkClient::builder(config, relay, Arc::new(InMemoryKeyManagement::new()));
        if let Some(dir) = store_dir {
            let dir = dir.join(label);
            builder = builder
                .with_pairing_store(Arc::new(FileSequenceStore::new(dir.join("pairings"))?))
                .with_session_store(Arc::new(FileSequenceStore::new(dir.join("sessions"))?));
        }
        let client = builder.build()?;
        let events = client.events();
        client.start(relay_events).await?;
        Ok(Self {
            label,
            client,
            events,
        })
    }

    /// Wait for the next event accepted by `matches` and print it.
    async fn await_event(
        &mut self,
        what: &str,
        matches: impl Fn(&EngineEvent) -> bool,
    ) -> Result<EngineEvent> {
        let label = self.label;
        let events = &mut self.events;
        let event = tokio::time::timeout(STEP_TIMEOUT, async {
            loop {
                let event = events.recv().await?;
                if matches(&event) {
                    return Ok::<_, anyhow::Error>(event);
                }
            }
        })
        .await
        .map_err(|_| anyhow!("{} never saw {}", label, what))??;

        ui::event(label, &event);
        Ok(event)
    }
}

/// Pair, open a session, call a method, push a notification and disconnect.
pub async fn run(options: SimulateOptions, verbose: bool) -> Result<SimulationReport> {
    let account = format!("{}:{}", options.chain, options.address);

    let network = MemoryRelayNetwork::new();
    let store_dir = options.storage_dir.as_deref();
    let mut dapp = Peer::start(
        &network,
        "dapp",
        EngineConfig::dapp(
            AppMetadata::new("Demo Dapp")
                .with_description("WalletLink demo application")
                .with_url("https://dapp.example"),
        ),
        store_dir,
    )
    .await?;
    let mut wallet = Peer::start(
        &network,
        "wallet",
        EngineConfig::controller(
            AppMetadata::new("Demo Wallet").with_url("https://wallet.example"),
        ),
        store_dir,
    )
    .await?;
    info!(persist = store_dir.is_some(), "peers connected");

    ui::header("Pairing");
    let uri = dapp.client.pairing().propose().await?;
    ui::key_value("URI", &uri.to_string());
    if options.show_qr {
        ui::qr_code(&uri.to_string())?;
    }

    wallet.client.pairing().approve(&uri.to_string()).await?;
    let pairing = match dapp
        .await_event("the pairing approval", |e| {
            matches!(
                e,
                EngineEvent::PairingApproved { .. } | EngineEvent::PairingRejected { .. }
            )
        })
        .await?
    {
        EngineEvent::PairingApproved { topic, peer, .. } => {
            if verbose {
                if let Some(metadata) = &peer.metadata {
                    ui::key_value("Wallet", &metadata.name);
                }
            }
            topic
        }
        EngineEvent::PairingRejected { reason, .. } => bail!("pairing rejected: {}", reason),
        other => bail!("unexpected event {}", other.name()),
    };
    wallet
        .await_event("the pairing acknowledgement", |e| {
            matches!(e, EngineEvent::PairingAcknowledged { .. })
        })
        .await?;
    dapp.await_event("the wallet metadata", |e| {
        matches!(e, EngineEvent::PairingUpdated { .. })
    })
    .await?;
    ui::success(&format!("Paired on {}", ui::short(pairing.as_str())));

    ui::header("Session");
    let permissions = Permissions::new([options.chain.as_str()], [options.method.as_str()])
        .with_notifications([NOTIFICATION]);
    dapp.client
        .session()
        .propose(&pairing, permissions, None)
        .await?;
    let proposal = match wallet
        .await_event("the session proposal", |e| {
            matches!(e, EngineEvent::SessionProposal { .. })
        })
        .await?
    {
        EngineEvent::SessionProposal { proposal, .. } => proposal,
        other => bail!("unexpected event {}", other.name()),
    };
    wallet
        .client
        .session()
        .approve(&proposal, [account.as_str()])
        .await?;
    let session = match dapp
        .await_event("the session approval", |e| {
            matches!(
                e,
                EngineEvent::SessionApproved { .. } | EngineEvent::SessionRejected { .. }
            )
        })
        .await?
    {
        EngineEvent::SessionApproved {
            topic, accounts, ..
        } => {
            for account in &accounts {
                ui::key_value("Account", account);
            }
            topic
        }
        EngineEvent::SessionRejected { reason, .. } => bail!("session rejected: {}", reason),
        other => bail!("unexpected event {}", other.name()),
    };
    wallet
        .await_event("the session acknowledgement", |e| {
            matches!(e, EngineEvent::SessionAcknowledged { .. })
        })
        .await?;
    ui::success(&format!("Session open on {}", ui::short(session.as_str())));

    ui::header("Request");
    let request = SessionRequest::new(
        session.clone(),
        RequestArguments::new(options.method.clone(), json!([account, "0xdeadbeef"])),
    )
    .on_chain(options.chain.clone());
    let engine = dapp.client.session().clone();
    let pending = tokio::spawn(async move { engine.request(request).await });

    let id = match wallet
        .await_event("the payload request", |e| {
            matches!(e, EngineEvent::PayloadRequest { .. })
        })
        .await?
    {
        EngineEvent::PayloadRequest { id, request, .. } => {
            ui::key_value("Method", &request.method);
            id
        }
        other => bail!("unexpected event {}", other.name()),
    };
    // a canned signature stands in for the wallet's signer
    wallet
        .client
        .session()
        .respond(&session, JsonRpcResponse::success(id, json!("0x5369676e6564")))
        .await?;
    let result = pending.await.context("request task failed")??;
    ui::key_value("Result", &result.to_string());

    ui::header("Notification");
    wallet
        .client
        .session()
        .notify(&session, Notification::new(NOTIFICATION, json!([account])))
        .await?;
    dapp.await_event("the notification", |e| {
        matches!(e, EngineEvent::NotificationReceived { .. })
    })
    .await?;

    if options.keep {
        ui::separator();
        ui::info("Leaving the pairing and session in place");
    } else {
        ui::header("Disconnect");
        dapp.client
            .session()
            .delete(&session, Reason::user_disconnected())
            .await?;
        wallet
            .await_event("the session deletion", |e| {
                matches!(e, EngineEvent::SessionDeleted { .. })
            })
            .await?;
        dapp.client
            .pairing()
            .delete(&pairing, Reason::user_disconnected())
            .await?;
        wallet
            .await_event("the pairing deletion", |e| {
                matches!(e, EngineEvent::PairingDeleted { .. })
            })
            .await?;
    }

    ui::separator();
    ui::success("Simulation complete");

    Ok(SimulationReport {
        pairing,
        session,
        result,
        deleted: !options.keep,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_simulation_runs_to_completion() {
        let report = run(SimulateOptions::default(), false).await.unwrap();
        assert_eq!(report.result, json!("0x5369676e6564"));
        assert_ne!(report.pairing, report.session);
        assert!(report.deleted);
    }

    #[tokio::test]
    async fn test_kept_simulation_persists_sequences() {
        let dir = TempDir::new().unwrap();
        let options = SimulateOptions {
            storage_dir: Some(dir.path().to_path_buf()),
            keep: true,
            ..Default::default()
        };
        let report = run(options, false).await.unwrap();

        for peer in ["dapp", "wallet"] {
            let sessions = crate::commands::store::load(&dir.path().join(peer).join("sessions"))
                .await
                .unwrap();
            assert_eq!(sessions.len(), 1, "{} sessions", peer);
            assert_eq!(sessions[0].topic, report.session);

            let pairings = crate::commands::store::load(&dir.path().join(peer).join("pairings"))
                .await
                .unwrap();
            assert_eq!(pairings.len(), 1, "{} pairings", peer);
            assert_eq!(pairings[0].topic, report.pairing);
        }
    }

    #[tokio::test]
    async fn test_simulation_rejects_malformed_address() {
        let options = SimulateOptions {
            chain: "ethereum".to_string(),
            ..Default::default()
        };
        assert!(run(options, false).await.is_err());
    }
}
