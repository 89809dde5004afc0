//! Connection URI inspection

use anyhow::{Context, Result};
use walletlink_lib::parse_uri;

use crate::ui;

/// Show the fields of a connection URI
pub fn parse(uri: &str, verbose: bool) -> Result<()> {
    ui::header("Connection URI");

    let parsed = parse_uri(uri).context("not a valid connection URI")?;

    ui::key_value("Topic", parsed.topic.as_str());
    ui::key_value("Version", &parsed.version.to_string());
    ui::key_value("Public key", parsed.public_key.as_str());
    ui::key_value(
        "Role",
        if parsed.controller {
            "controller (wallet)"
        } else {
            "non-controller (dapp)"
        },
    );
    ui::key_value("Relay", &parsed.relay.protocol);
    if let Some(params) = &parsed.relay.params {
        ui::info("Relay parameters:");
        ui::json(params);
    }

    if verbose {
        ui::separator();
        ui::key_value("Canonical", &parsed.to_string());
    }

    Ok(())
}

/// Render a connection URI as a QR code
pub fn qr(uri: &str, _verbose: bool) -> Result<()> {
    ui::header("Connection URI QR Code");

    let parsed = parse_uri(uri).context("not a valid connection URI")?;
    let canonical = parsed.to_string();

    ui::info(&format!("Topic: {}", parsed.topic));
    ui::qr_code(&canonical)?;

    ui::separator();
    ui::info("Scan this code with a wallet to approve the pairing");

    Ok(())
}
