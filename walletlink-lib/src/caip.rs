//! Chain and account identifier validation.
//!
//! Chains use the `namespace:reference` form (e.g. `eip155:1`) and accounts
//! append an address (e.g. `eip155:1:0xab16...`).

use crate::{LinkError, Result};

fn is_namespace(s: &str) -> bool {
    (3..=8).contains(&s.len())
        && s.bytes()
            .all(|b| b == b'-' || b.is_ascii_lowercase() || b.is_ascii_digit())
}

fn is_reference(s: &str) -> bool {
    (1..=32).contains(&s.len())
        && s.bytes()
            .all(|b| b == b'-' || b == b'_' || b.is_ascii_alphanumeric())
}

fn is_address(s: &str) -> bool {
    (1..=128).contains(&s.len())
        && s.bytes()
            .all(|b| matches!(b, b'-' | b'.' | b'%') || b.is_ascii_alphanumeric())
}

/// Check whether `chain` is a well-formed chain identifier.
pub fn is_valid_chain_id(chain: &str) -> bool {
    match chain.split_once(':') {
        Some((namespace, reference)) => is_namespace(namespace) && is_reference(reference),
        None => false,
    }
}

/// Check whether `account` is a well-formed account identifier.
pub fn is_valid_account_id(account: &str) -> bool {
    match account.rsplit_once(':') {
        Some((chain, address)) => is_valid_chain_id(chain) && is_address(address),
        None => false,
    }
}

pub fn validate_chain_id(chain: &str) -> Result<()> {
    if is_valid_chain_id(chain) {
        Ok(())
    } else {
        Err(LinkError::invalid_identifier("chain", chain))
    }
}

pub fn validate_account_id(account: &str) -> Result<()> {
    if is_valid_account_id(account) {
        Ok(())
    } else {
        Err(LinkError::invalid_identifier("account", account))
    }
}

/// JSON-RPC method names and notification types must be non-blank.
pub fn validate_method(method: &str) -> Result<()> {
    if method.trim().is_empty() || method.chars().any(char::is_whitespace) {
        Err(LinkError::invalid_identifier("method", method))
    } else {
        Ok(())
    }
}

/// Chain portion of an account identifier.
pub fn chain_of_account(account: &str) -> Option<&str> {
    account
        .rsplit_once(':')
        .map(|(chain, _)| chain)
        .filter(|chain| is_valid_chain_id(chain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_chains() {
        assert!(is_valid_chain_id("eip155:1"));
        assert!(is_valid_chain_id("cosmos:cosmoshub-4"));
        assert!(is_valid_chain_id("bip122:000000000019d6689c085ae165831e93"));
    }

    #[test]
    fn rejects_malformed_chains() {
        assert!(!is_valid_chain_id("eip155"));
        assert!(!is_valid_chain_id("ei:1"));
        assert!(!is_valid_chain_id("EIP155:1"));
        assert!(!is_valid_chain_id("eip155:"));
        assert!(!is_valid_chain_id("eip155:1:0xabc"));
        assert!(!is_valid_chain_id(""));
    }

    #[test]
    fn accounts_need_chain_and_address() {
        assert!(is_valid_account_id(
            "eip155:1:0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb"
        ));
        assert!(!is_valid_account_id("eip155:1"));
        assert!(!is_valid_account_id("eip155:1:"));
        assert!(!is_valid_account_id("0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb"));
    }

    #[test]
    fn chain_of_account_extracts_prefix() {
        assert_eq!(chain_of_account("eip155:137:0xabc"), Some("eip155:137"));
        assert_eq!(chain_of_account("garbage"), None);
    }

    #[test]
    fn methods_must_be_single_tokens() {
        assert!(validate_method("eth_sign").is_ok());
        assert!(validate_method("").is_err());
        assert!(validate_method("   ").is_err());
        assert!(validate_method("eth sign").is_err());
    }
}
