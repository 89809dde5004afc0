//! Capability sets negotiated for a pairing or session.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::caip;
use crate::jsonrpc::methods;
use crate::Result;

/// Chains, JSON-RPC methods and notification types a peer may use.
///
/// Permissions only ever grow: [`Permissions::merge`] is a set union.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub chains: BTreeSet<String>,
    #[serde(default)]
    pub methods: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<BTreeSet<String>>,
}

impl Permissions {
    pub fn new<C, M>(chains: C, methods: M) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            chains: chains.into_iter().map(Into::into).collect(),
            methods: methods.into_iter().map(Into::into).collect(),
            notifications: None,
        }
    }

    pub fn with_notifications<N>(mut self, types: N) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
    {
        self.notifications = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Permissions attached to a pairing: the pairing only carries session proposals.
    pub fn pairing() -> Self {
        Self::new(Vec::<String>::new(), [methods::SESSION_PROPOSE])
    }

    /// Check every identifier is well formed.
    pub fn validate(&self) -> Result<()> {
        for chain in &self.chains {
            caip::validate_chain_id(chain)?;
        }
        for method in &self.methods {
            caip::validate_method(method)?;
        }
        if let Some(types) = &self.notifications {
            for kind in types {
                caip::validate_method(kind)?;
            }
        }
        Ok(())
    }

    /// Union `other` into `self`.
    pub fn merge(&mut self, other: &Permissions) {
        self.chains.extend(other.chains.iter().cloned());
        self.methods.extend(other.methods.iter().cloned());
        if let Some(extra) = &other.notifications {
            self.notifications
                .get_or_insert_with(BTreeSet::new)
                .extend(extra.iter().cloned());
        }
    }

    pub fn allows_chain(&self, chain: &str) -> bool {
        self.chains.contains(chain)
    }

    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    pub fn allows_notification(&self, kind: &str) -> bool {
        self.notifications
            .as_ref()
            .is_some_and(|types| types.contains(kind))
    }

    /// True when everything granted by `other` is also granted here.
    pub fn contains(&self, other: &Permissions) -> bool {
        other.chains.is_subset(&self.chains)
            && other.methods.is_subset(&self.methods)
            && match (&other.notifications, &self.notifications) {
                (None, _) => true,
                (Some(theirs), Some(ours)) => theirs.is_subset(ours),
                (Some(theirs), None) => theirs.is_empty(),
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_a_union() {
        let mut base = Permissions::new(["eip155:1"], ["eth_sign"]);
        let extra = Permissions::new(["eip155:137"], ["personal_sign"])
            .with_notifications(["accountsChanged"]);

        let before = base.clone();
        base.merge(&extra);

        assert!(base.contains(&before));
        assert!(base.contains(&extra));
        assert_eq!(base.chains.len(), 2);
        assert!(base.allows_notification("accountsChanged"));
    }

    #[test]
    fn merge_never_removes() {
        let mut base = Permissions::new(["eip155:1"], ["eth_sign"]).with_notifications(["x"]);
        base.merge(&Permissions::default());
        assert!(base.allows_chain("eip155:1"));
        assert!(base.allows_method("eth_sign"));
        assert!(base.allows_notification("x"));
    }

    #[test]
    fn validate_rejects_bad_chain() {
        let perms = Permissions::new(["ethereum"], ["eth_sign"]);
        assert!(perms.validate().is_err());

        let perms = Permissions::new(["eip155:1"], [""]);
        assert!(perms.validate().is_err());
    }

    #[test]
    fn pairing_permissions_allow_session_proposals() {
        let perms = Permissions::pairing();
        assert!(perms.validate().is_ok());
        assert!(perms.allows_method("wc_sessionPropose"));
        assert!(!perms.allows_notification("anything"));
    }

    #[test]
    fn serializes_without_absent_notifications() {
        let perms = Permissions::new(["eip155:1"], ["eth_sign"]);
        let json = serde_json::to_value(&perms).unwrap();
        assert!(json.get("notifications").is_none());
        let back: Permissions = serde_json::from_value(json).unwrap();
        assert_eq!(back, perms);
    }
}
