//! Scenario: the CLI refuses to touch the switch without its required inputs.
//!
//! GREEN when:
//! - `activate` without `--reason` is rejected by argument parsing.
//! - `status` with a valid config but no database URL fails with
//!   SECRETS_MISSING naming the env var, before any connection attempt.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

#[test]
fn activate_requires_reason_flag() {
    Command::cargo_bin("ks")
        .unwrap()
        .args(["activate", "--principal-id", "op-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--reason"));
}

#[test]
fn missing_database_url_is_reported_by_name() {
    let mut f = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    f.write_all(
        br#"
operator:
  principal_id: "op-1"
store:
  database_url_env: "KS_TEST_CLI_DATABASE_URL"
"#,
    )
    .unwrap();

    Command::cargo_bin("ks")
        .unwrap()
        .env_remove("KS_TEST_CLI_DATABASE_URL")
        .args([
            "status",
            "--principal-id",
            "op-1",
            "--config",
            f.path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("SECRETS_MISSING"))
        .stderr(predicate::str::contains("KS_TEST_CLI_DATABASE_URL"));
}
