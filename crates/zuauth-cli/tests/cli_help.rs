use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("zuauth")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("login"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("logout"))
        .stdout(predicate::str::contains("request-url"))
        .stdout(predicate::str::contains("derive"));
}

#[test]
fn test_login_help_shows_proof_options() {
    cargo_bin_cmd!("zuauth")
        .args(["login", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--pcd"))
        .stdout(predicate::str::contains("--pcd-file"))
        .stdout(predicate::str::contains("--no-browser"));
}

#[test]
fn test_pcd_and_pcd_file_conflict() {
    cargo_bin_cmd!("zuauth")
        .args(["derive", "--pcd", "{}", "--pcd-file", "proof.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}
