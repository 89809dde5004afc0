mod common;

use std::sync::Arc;

use common::*;
use serde_json::json;
use tempfile::TempDir;
use walletlink_engine::{EngineEvent, FileSequenceStore, SessionRequest, SettledStatus};
use walletlink_lib::protocol::RequestArguments;
use walletlink_lib::test_utils::MemoryRelayNetwork;
use walletlink_lib::{InMemoryKeyManagement, JsonRpcResponse};

fn file_stores(
    dir: &TempDir,
) -> impl FnOnce(walletlink_engine::WalletLinkClientBuilder) -> walletlink_engine::WalletLinkClientBuilder
{
    let pairings = Arc::new(FileSequenceStore::new(dir.path().join("pairings")).unwrap());
    let sessions = Arc::new(FileSequenceStore::new(dir.path().join("sessions")).unwrap());
    move |builder| {
        builder
            .with_pairing_store(pairings)
            .with_session_store(sessions)
    }
}

#[tokio::test]
async fn test_restarted_dapp_resumes_its_session() {
    let network = MemoryRelayNetwork::new();
    let dapp_dir = TempDir::new().unwrap();
    let dapp_kms = Arc::new(InMemoryKeyManagement::new());

    let dapp = start_peer(
        &network,
        DAPP,
        dapp_config(),
        dapp_kms.clone(),
        file_stores(&dapp_dir),
    )
    .await;
    let wallet = start_peer(
        &network,
        WALLET,
        wallet_config(),
        Arc::new(InMemoryKeyManagement::new()),
        |b| b,
    )
    .await;
    let mut net = TestNetwork {
        network: network.clone(),
        dapp,
        wallet,
    };
    let (pairing, topic) = net.session(eth_permissions()).await;

    // restart the dapp: same key store and directory, fresh client
    let TestNetwork {
        network,
        dapp,
        mut wallet,
    } = net;
    drop(dapp);
    network.disconnect(DAPP);

    let dapp = start_peer(
        &network,
        DAPP,
        dapp_config(),
        dapp_kms,
        file_stores(&dapp_dir),
    )
    .await;

    let sessions = dapp.client.session().settled().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].topic, topic);
    assert_eq!(
        sessions[0].settled_state().unwrap().status,
        SettledStatus::Acknowledged
    );
    assert_eq!(dapp.client.pairing().settled().await.unwrap()[0].topic, pairing);
    assert!(network.is_subscribed(DAPP, &topic));
    assert!(network.is_subscribed(DAPP, &pairing));

    let session = dapp.client.session().clone();
    let request = SessionRequest::new(
        topic.clone(),
        RequestArguments::new("eth_sign", json!([ACCOUNT, "0x01"])),
    );
    let pending = tokio::spawn(async move { session.request(request).await });

    let id = match wallet
        .next(|e| matches!(e, EngineEvent::PayloadRequest { .. }))
        .await
    {
        EngineEvent::PayloadRequest { id, .. } => id,
        other => panic!("unexpected event {:?}", other),
    };
    wallet
        .client
        .session()
        .respond(&topic, JsonRpcResponse::success(id, json!("0xresumed")))
        .await
        .unwrap();
    assert_eq!(pending.await.unwrap().unwrap(), json!("0xresumed"));
}

#[tokio::test]
async fn test_reconnect_restores_subscriptions() {
    let mut net = TestNetwork::new().await;
    let (pairing, topic) = net.session(eth_permissions()).await;

    net.network.simulate_reconnect(WALLET);
    let network = net.network.clone();
    eventually(|| {
        network.is_subscribed(WALLET, &topic) && network.is_subscribed(WALLET, &pairing)
    })
    .await;

    net.dapp.client.session().ping(&topic).await.unwrap();
    net.dapp.client.pairing().ping(&pairing).await.unwrap();
}
