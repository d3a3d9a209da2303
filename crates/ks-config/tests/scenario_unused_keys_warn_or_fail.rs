//! Scenario: stray config keys are reported per consumer.
//!
//! GREEN when:
//! - A config using only known sections is clean for the daemon.
//! - A typo'd section is reported, and `Fail` turns it into CONFIG_UNUSED_KEYS.
//! - The CLI reports daemon-only sections as unused without failing under `Warn`.

use ks_config::{load_layered_yaml_from_strings, report_unused_keys, Consumer, UnusedKeyPolicy};

const CLEAN: &str = r#"
operator:
  principal_id: "op"
daemon:
  bind_addr: "127.0.0.1:9000"
identity:
  mode: trusted_headers
"#;

const WITH_TYPO: &str = r#"
operator:
  principal_id: "op"
kill_swich:
  affected_systems: ["AI Chat"]
"#;

#[test]
fn known_sections_are_clean_for_daemon() {
    let loaded = load_layered_yaml_from_strings(&[CLEAN]).unwrap();
    let report =
        report_unused_keys(Consumer::Daemon, &loaded.config_json, UnusedKeyPolicy::Fail).unwrap();
    assert!(report.is_clean(), "{:?}", report.unused_leaf_pointers);
}

#[test]
fn typo_section_reported_and_fails_under_fail_policy() {
    let loaded = load_layered_yaml_from_strings(&[WITH_TYPO]).unwrap();

    let report =
        report_unused_keys(Consumer::Daemon, &loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(
        report.unused_leaf_pointers,
        vec!["/kill_swich/affected_systems/0".to_string()]
    );

    let err = report_unused_keys(Consumer::Daemon, &loaded.config_json, UnusedKeyPolicy::Fail)
        .unwrap_err();
    assert!(err.to_string().contains("CONFIG_UNUSED_KEYS"));
}

#[test]
fn cli_sees_daemon_sections_as_unused_but_warn_passes() {
    let loaded = load_layered_yaml_from_strings(&[CLEAN]).unwrap();
    let report =
        report_unused_keys(Consumer::Cli, &loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert!(report
        .unused_leaf_pointers
        .contains(&"/daemon/bind_addr".to_string()));
    assert!(report
        .unused_leaf_pointers
        .contains(&"/identity/mode".to_string()));
}
