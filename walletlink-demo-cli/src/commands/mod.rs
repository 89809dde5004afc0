//! CLI command implementations

pub mod simulate;
pub mod store;
pub mod uri;
