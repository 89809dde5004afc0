//! Persisted sequence store inspection

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use walletlink_engine::{FileSequenceStore, Sequence, SequenceState, SequenceStore};

use crate::ui;

const STORES: [&str; 2] = ["pairings", "sessions"];

/// Every sequence in one store directory, soonest expiry first.
pub async fn load(path: &Path) -> Result<Vec<Sequence>> {
    let store = FileSequenceStore::new(path)
        .with_context(|| format!("cannot open store at {}", path.display()))?;
    let mut sequences = store.get_all().await?;
    sequences.sort_by_key(|s| s.expiry);
    Ok(sequences)
}

/// Directories under `dir` holding a store, `dir` itself included.
fn peer_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let has_store = |p: &Path| STORES.iter().any(|s| p.join(s).is_dir());

    let mut dirs = Vec::new();
    if has_store(dir) {
        dirs.push(dir.to_path_buf());
    }
    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() && has_store(&path) {
                dirs.push(path);
            }
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// List pairings and sessions stored under `dir`
pub async fn list(dir: &Path, verbose: bool) -> Result<()> {
    ui::header(&format!("Stored sequences in {}", dir.display()));

    let peers = peer_dirs(dir)?;
    if peers.is_empty() {
        ui::warning("No stores found. Run 'walletlink-demo simulate --persist --keep' first.");
        return Ok(());
    }

    for peer in peers {
        let name = peer
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| peer.display().to_string());
        ui::separator();
        ui::info(&name);

        for store in STORES {
            let path = peer.join(store);
            if !path.is_dir() {
                continue;
            }
            let sequences = load(&path).await?;
            println!("  {} ({})", store, sequences.len());
            for sequence in &sequences {
                print_sequence(sequence, verbose);
            }
        }
    }

    Ok(())
}

fn print_sequence(sequence: &Sequence, verbose: bool) {
    ui::key_value("  Topic", sequence.topic.as_str());
    ui::key_value("  State", &describe_state(&sequence.state));
    ui::key_value("  Expires", &format_expiry(sequence.expiry));

    if let SequenceState::Settled(settled) = &sequence.state {
        if let Some(metadata) = &settled.peer.metadata {
            ui::key_value("  Peer", &metadata.name);
        }
        if !settled.accounts.is_empty() {
            let accounts: Vec<&str> = settled.accounts.iter().map(String::as_str).collect();
            ui::key_value("  Accounts", &accounts.join(", "));
        }
        if verbose {
            let chains: Vec<&str> = settled.permissions.chains.iter().map(String::as_str).collect();
            let methods: Vec<&str> = settled.permissions.methods.iter().map(String::as_str).collect();
            ui::key_value("  Chains", &chains.join(", "));
            ui::key_value("  Methods", &methods.join(", "));
        }
    }
}

fn describe_state(state: &SequenceState) -> String {
    match state {
        SequenceState::Pending(pending) => format!("pending ({:?})", pending.status),
        SequenceState::Settled(settled) => {
            let role = if settled.is_controller() {
                "controller"
            } else {
                "non-controller"
            };
            format!("settled ({:?}, {})", settled.status, role)
        }
    }
}

fn format_expiry(expiry: i64) -> String {
    DateTime::<Utc>::from_timestamp(expiry, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| expiry.to_string())
}
