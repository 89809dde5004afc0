//! Test utilities for WalletLink.
//!
//! - An in-process relay network that connects any number of named clients
//! - Deterministic topic generators for collision and exhaustion scenarios
//!
//! ## Usage
//!
//! ```rust,ignore
//! use walletlink_lib::test_utils::MemoryRelayNetwork;
//!
//! let network = MemoryRelayNetwork::new();
//! let (dapp_relay, dapp_events) = network.connect("dapp");
//! let (wallet_relay, wallet_events) = network.connect("wallet");
//! ```

mod memory_relay;
mod topics;

pub use memory_relay::{MemoryRelay, MemoryRelayNetwork, PublishedMessage};
pub use topics::{FixedTopicGenerator, SequentialTopicGenerator};
