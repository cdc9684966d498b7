use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    move |key| map.get(key).cloned()
}

#[test]
fn from_lookup_defaults_when_unset() {
    let cfg = BrokerConfig::from_lookup(lookup_from(&[])).unwrap();
    assert_eq!(cfg, BrokerConfig::default());
    assert_eq!(cfg.bind_addr(), "0.0.0.0:3000");
    assert!(cfg.echo_to_publisher);
    assert!(cfg.access_tokens.is_empty());
}

#[test]
fn from_lookup_reads_every_variable() {
    let cfg = BrokerConfig::from_lookup(lookup_from(&[
        ("BROKER_HOST", "127.0.0.1"),
        ("PORT", "4100"),
        ("BROKER_ECHO_TO_PUBLISHER", "off"),
        ("BROKER_HANDSHAKE_TIMEOUT_SECS", "3"),
        ("BROKER_ACCESS_TOKENS", " alpha, ,beta "),
    ]))
    .unwrap();

    assert_eq!(cfg.bind_addr(), "127.0.0.1:4100");
    assert!(!cfg.echo_to_publisher);
    assert_eq!(cfg.handshake_timeout, Duration::from_secs(3));
    assert_eq!(cfg.access_tokens, vec!["alpha".to_owned(), "beta".to_owned()]);
}

#[test]
fn from_lookup_rejects_bad_port() {
    let err = BrokerConfig::from_lookup(lookup_from(&[("PORT", "http")])).unwrap_err();
    assert_eq!(err, ConfigError::Invalid { key: "PORT", value: "http".into() });
}

#[test]
fn from_lookup_rejects_bad_bool() {
    let err = BrokerConfig::from_lookup(lookup_from(&[("BROKER_ECHO_TO_PUBLISHER", "maybe")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: "BROKER_ECHO_TO_PUBLISHER", .. }));
}

#[test]
fn parse_bool_accepts_common_spellings() {
    for raw in ["1", "TRUE", "yes", "On"] {
        assert!(parse_bool("K", Some(raw.into()), false).unwrap());
    }
    for raw in ["0", "false", "No", "off"] {
        assert!(!parse_bool("K", Some(raw.into()), true).unwrap());
    }
}
