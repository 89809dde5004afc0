//! Key management.
//!
//! Every settled pairing or session is backed by an X25519 key agreement.
//! The resulting secret is bound to the settled topic and, while a session
//! proposal is in flight, temporarily to the proposal topic as well.

mod memory;
mod traits;

pub use memory::InMemoryKeyManagement;
pub use traits::{
    AgreementSecret, KeyManagementService, KeyStoreError, KeyStoreErrorCode, KeyStoreResult,
    SharedSecret,
};
