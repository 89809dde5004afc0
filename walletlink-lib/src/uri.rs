//! Connection URI codec.
//!
//! A proposer publishes its pairing proposal as a URI, typically rendered as
//! a QR code:
//!
//! ```text
//! wc:{topic}@2?controller={bool}&publicKey={hex}&relay={percent-encoded JSON}
//! ```
//!
//! # Examples
//!
//! ```rust
//! use walletlink_lib::uri::parse_uri;
//!
//! let key = "07".repeat(32);
//! let raw = format!(
//!     "wc:deadbeef@2?controller=false&publicKey={}&relay=%7B%22protocol%22%3A%22waku%22%7D",
//!     key
//! );
//! let uri = parse_uri(&raw).unwrap();
//! assert_eq!(uri.topic.as_str(), "deadbeef");
//! assert!(!uri.controller);
//! assert_eq!(uri.relay.protocol, "waku");
//! assert_eq!(uri.to_string(), raw);
//! ```

use crate::{LinkError, PublicKey, RelayProtocolOptions, Result, Topic};
use std::str::FromStr;

/// URI scheme prefix.
pub const URI_SCHEME: &str = "wc";

/// Protocol version carried after the topic.
pub const URI_VERSION: u8 = 2;

/// A parsed connection URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionUri {
    /// Proposal topic the proposer listens on.
    pub topic: Topic,
    pub version: u8,
    /// Proposer's key agreement public key.
    pub public_key: PublicKey,
    /// Whether the proposer claims the controller role.
    pub controller: bool,
    pub relay: RelayProtocolOptions,
}

impl ConnectionUri {
    pub fn new(
        topic: Topic,
        public_key: PublicKey,
        controller: bool,
        relay: RelayProtocolOptions,
    ) -> Self {
        Self {
            topic,
            version: URI_VERSION,
            public_key,
            controller,
            relay,
        }
    }
}

impl std::fmt::Display for ConnectionUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let relay = serde_json::to_string(&self.relay).map_err(|_| std::fmt::Error)?;
        write!(
            f,
            "{}:{}@{}?controller={}&publicKey={}&relay={}",
            URI_SCHEME,
            self.topic,
            self.version,
            self.controller,
            url_encode(self.public_key.as_str()),
            url_encode(&relay)
        )
    }
}

impl FromStr for ConnectionUri {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        parse_uri(s)
    }
}

/// Parse a connection URI string.
///
/// Parameters may appear in any order; unknown parameters are ignored.
///
/// # Errors
///
/// Returns [`LinkError::InvalidUri`] when the scheme, version or any required
/// parameter is missing or malformed.
pub fn parse_uri(uri: &str) -> Result<ConnectionUri> {
    let uri = uri.trim();

    let rest = uri
        .strip_prefix(URI_SCHEME)
        .and_then(|r| r.strip_prefix(':'))
        .ok_or_else(|| LinkError::InvalidUri(format!("expected '{}:' scheme", URI_SCHEME)))?;

    let (path, query) = rest
        .split_once('?')
        .ok_or_else(|| LinkError::InvalidUri("missing query string".to_string()))?;

    let (topic, version) = path
        .split_once('@')
        .ok_or_else(|| LinkError::InvalidUri("missing protocol version".to_string()))?;

    if topic.is_empty() {
        return Err(LinkError::InvalidUri("empty topic".to_string()));
    }

    let version: u8 = version
        .parse()
        .map_err(|_| LinkError::InvalidUri(format!("invalid version '{}'", version)))?;
    if version != URI_VERSION {
        return Err(LinkError::InvalidUri(format!(
            "unsupported version {}",
            version
        )));
    }

    let mut controller = None;
    let mut public_key = None;
    let mut relay = None;

    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            match key {
                "controller" => controller = Some(parse_bool(value)?),
                "publicKey" => public_key = Some(url_decode(value)?),
                "relay" => relay = Some(url_decode(value)?),
                _ => {}
            }
        }
    }

    let controller =
        controller.ok_or_else(|| LinkError::InvalidUri("missing 'controller'".to_string()))?;

    let public_key = PublicKey::new(
        public_key.ok_or_else(|| LinkError::InvalidUri("missing 'publicKey'".to_string()))?,
    );
    public_key
        .to_bytes()
        .map_err(|e| LinkError::InvalidUri(format!("bad publicKey: {}", e)))?;

    let relay = relay.ok_or_else(|| LinkError::InvalidUri("missing 'relay'".to_string()))?;
    let relay: RelayProtocolOptions = serde_json::from_str(&relay)
        .map_err(|e| LinkError::InvalidUri(format!("bad relay options: {}", e)))?;

    Ok(ConnectionUri {
        topic: Topic::new(topic),
        version,
        public_key,
        controller,
        relay,
    })
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(LinkError::InvalidUri(format!(
            "invalid controller flag '{}'",
            other
        ))),
    }
}

/// Percent-encode everything except RFC 3986 unreserved characters.
pub fn url_encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Decode percent-encoding, treating `+` as a space.
pub fn url_decode(encoded: &str) -> Result<String> {
    let mut decoded = Vec::with_capacity(encoded.len());
    let mut bytes = encoded.bytes();

    while let Some(b) = bytes.next() {
        match b {
            b'%' => {
                let hex1 = bytes
                    .next()
                    .ok_or_else(|| LinkError::InvalidUri("incomplete percent encoding".to_string()))?;
                let hex2 = bytes
                    .next()
                    .ok_or_else(|| LinkError::InvalidUri("incomplete percent encoding".to_string()))?;
                let pair = [hex1, hex2];
                let hex = std::str::from_utf8(&pair)
                    .map_err(|_| LinkError::InvalidUri("invalid percent encoding".to_string()))?;
                let byte = u8::from_str_radix(hex, 16).map_err(|_| {
                    LinkError::InvalidUri("invalid hex in percent encoding".to_string())
                })?;
                decoded.push(byte);
            }
            b'+' => decoded.push(b' '),
            other => decoded.push(other),
        }
    }

    String::from_utf8(decoded)
        .map_err(|_| LinkError::InvalidUri("percent encoding is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ConnectionUri {
        ConnectionUri::new(
            Topic::new("5f1c8a"),
            PublicKey::from_bytes(&[0xab; 32]),
            false,
            RelayProtocolOptions::default(),
        )
    }

    #[test]
    fn test_encode_layout() {
        let encoded = sample().to_string();
        assert!(encoded.starts_with("wc:5f1c8a@2?controller=false&publicKey=abab"));
        assert!(encoded.ends_with("&relay=%7B%22protocol%22%3A%22waku%22%7D"));
    }

    #[test]
    fn test_round_trip_with_relay_params() {
        let mut uri = sample();
        uri.controller = true;
        uri.relay = RelayProtocolOptions::new("irn").with_params(json!({"region": "eu west", "n": 3}));

        let parsed = parse_uri(&uri.to_string()).unwrap();
        assert_eq!(parsed, uri);
    }

    #[test]
    fn test_parameters_in_any_order() {
        let key = "ab".repeat(32);
        let raw = format!(
            "wc:t1@2?relay=%7B%22protocol%22%3A%22waku%22%7D&extra=1&publicKey={}&controller=true",
            key
        );
        let uri = parse_uri(&raw).unwrap();
        assert!(uri.controller);
        assert_eq!(uri.public_key.as_str(), key);
    }

    #[test]
    fn test_rejects_wrong_scheme() {
        match parse_uri("bitcoin:abc@2?controller=false") {
            Err(LinkError::InvalidUri(_)) => {}
            other => panic!("expected InvalidUri, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_wrong_version() {
        let raw = sample().to_string().replace("@2?", "@1?");
        assert!(parse_uri(&raw).is_err());
    }

    #[test]
    fn test_rejects_missing_fields() {
        let key = "ab".repeat(32);
        assert!(parse_uri(&format!("wc:t@2?publicKey={}&relay=%7B%7D", key)).is_err());
        assert!(parse_uri("wc:t@2?controller=false&relay=%7B%22protocol%22%3A%22waku%22%7D").is_err());
        assert!(parse_uri(&format!("wc:t@2?controller=false&publicKey={}", key)).is_err());
        assert!(parse_uri("wc:@2?controller=false").is_err());
    }

    #[test]
    fn test_rejects_bad_controller_and_key() {
        let raw = sample().to_string().replace("controller=false", "controller=maybe");
        assert!(parse_uri(&raw).is_err());

        let raw = format!(
            "wc:t@2?controller=false&publicKey=abcd&relay={}",
            url_encode(r#"{"protocol":"waku"}"#)
        );
        assert!(parse_uri(&raw).is_err());
    }

    #[test]
    fn test_url_decode_multibyte() {
        assert_eq!(url_decode("caf%C3%A9").unwrap(), "café");
        assert_eq!(url_decode("a+b").unwrap(), "a b");
        assert!(url_decode("%4").is_err());
        assert!(url_decode("%zz").is_err());
        assert!(url_decode("%FF").is_err());
    }

    #[test]
    fn test_url_encode_escapes_reserved() {
        assert_eq!(url_encode("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(url_encode("safe-_.~"), "safe-_.~");
        assert_eq!(url_decode(&url_encode("café {\"x\"}")).unwrap(), "café {\"x\"}");
    }
}
