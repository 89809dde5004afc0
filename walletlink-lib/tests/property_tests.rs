//! Property-based tests for walletlink-lib
//!
//! Uses proptest to verify the URI codec, identifier validation and envelope
//! encryption hold for arbitrary inputs

use proptest::prelude::*;
use walletlink_lib::caip::{is_valid_account_id, is_valid_chain_id};
use walletlink_lib::crypto::{derive_topic, open, seal};
use walletlink_lib::uri::{parse_uri, url_decode, url_encode};
use walletlink_lib::{ConnectionUri, PublicKey, RelayProtocolOptions, SharedSecret, Topic};

proptest! {
    /// Any URI we encode parses back to the same value
    #[test]
    fn test_uri_encode_then_parse(
        topic_bytes in prop::collection::vec(any::<u8>(), 32..=32),
        key_bytes in prop::array::uniform32(any::<u8>()),
        controller in any::<bool>(),
        protocol in "[a-z]{1,12}",
        region in proptest::option::of("[ -~]{0,24}")
    ) {
        let mut relay = RelayProtocolOptions::new(protocol);
        if let Some(region) = region {
            relay = relay.with_params(serde_json::json!({ "region": region }));
        }
        let uri = ConnectionUri::new(
            Topic::new(hex::encode(topic_bytes)),
            PublicKey::from_bytes(&key_bytes),
            controller,
            relay,
        );

        let encoded = uri.to_string();
        let parsed = parse_uri(&encoded);
        prop_assert!(parsed.is_ok(), "Encoded URI should parse: {}", encoded);
        prop_assert_eq!(parsed.unwrap(), uri);
    }

    /// Percent encoding is lossless for arbitrary unicode
    #[test]
    fn test_url_encoding_is_lossless(raw in "\\PC{0,64}") {
        let encoded = url_encode(&raw);
        prop_assert!(!encoded.contains(' '));
        prop_assert_eq!(url_decode(&encoded).unwrap(), raw);
    }

    /// Strings without the scheme never parse
    #[test]
    fn test_uri_without_scheme_fails(body in "[a-z0-9@?=&]{0,40}") {
        prop_assume!(!body.starts_with("wc:"));
        prop_assert!(parse_uri(&body).is_err());
    }

    /// Well-formed chain ids validate and their accounts do too
    #[test]
    fn test_generated_identifiers_validate(
        namespace in "[a-z0-9]{3,8}",
        reference in "[a-zA-Z0-9]{1,32}",
        address in "[a-zA-Z0-9]{1,64}"
    ) {
        let chain = format!("{}:{}", namespace, reference);
        prop_assert!(is_valid_chain_id(&chain));
        let account = format!("{}:{}", chain, address);
        prop_assert!(is_valid_account_id(&account));
        prop_assert!(!is_valid_account_id(&chain));
    }

    /// Sealed envelopes open only with the same secret
    #[test]
    fn test_envelope_round_trip(
        secret in prop::array::uniform32(any::<u8>()),
        other in prop::array::uniform32(any::<u8>()),
        payload in prop::collection::vec(any::<u8>(), 0..256)
    ) {
        let secret = SharedSecret::from_bytes(secret);
        let envelope = seal(&secret, &payload).unwrap();
        prop_assert_eq!(open(&secret, &envelope).unwrap(), payload);

        let other = SharedSecret::from_bytes(other);
        if other != secret {
            prop_assert!(open(&other, &envelope).is_err());
            prop_assert_ne!(derive_topic(&other), derive_topic(&secret));
        }
    }
}
