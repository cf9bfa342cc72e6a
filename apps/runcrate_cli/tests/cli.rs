use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("runcrate_cli")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("resolve"));
}

#[test]
fn run_requires_a_source_url() {
    Command::cargo_bin("runcrate_cli")
        .unwrap()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SOURCE_URL"));
}

#[test]
fn resolve_without_token_fails_cleanly() {
    Command::cargo_bin("runcrate_cli")
        .unwrap()
        .env_remove("RUNCRATE_RDM_TOKEN")
        .args(["resolve", "https://rdm.example/abc12/files/osfstorage/nb.ipynb"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("token"));
}
