use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use tempfile::tempdir;

fn ticket_proof() -> String {
    let inner = json!({
        "id": "c0ffee00-0000-4000-8000-000000000001",
        "claim": {
            "partialTicket": {
                "attendeeEmail": "Alice@Example.com",
                "attendeeSemaphoreId": "4242"
            }
        }
    });
    json!({ "type": "zk-eddsa-event-ticket-pcd", "pcd": inner.to_string() }).to_string()
}

fn derive_stdout(home: &std::path::Path, proof: &str) -> String {
    let output = cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home)
        .args(["derive", "--pcd", proof, "--show-password"])
        .output()
        .unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn test_derive_is_deterministic() {
    let home = tempdir().unwrap();
    let proof = ticket_proof();

    let first = derive_stdout(home.path(), &proof);
    let second = derive_stdout(home.path(), &proof);

    assert_eq!(first, second);
    assert!(first.contains("Email: pcd-"));
    assert!(first.contains("@zupass.local"));
    assert!(first.contains("External ID: 4242"));
}

#[test]
fn test_derive_masks_password_by_default() {
    let home = tempdir().unwrap();

    cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home.path())
        .args(["derive", "--pcd", &ticket_proof()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Password: "))
        .stdout(predicate::str::is_match("Password: [0-9a-f]{12}\\.\\.\\.").unwrap());
}

#[test]
fn test_derive_attendee_email_strategy() {
    let home = tempdir().unwrap();
    std::fs::write(
        home.path().join("config.toml"),
        "[identity]\nemail_strategy = \"attendee-email\"\n",
    )
    .unwrap();

    cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home.path())
        .args(["derive", "--pcd", &ticket_proof()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Email: alice@example.com (attendee-email)"));
}

#[test]
fn test_derive_reads_pcd_file() {
    let home = tempdir().unwrap();
    let proof_path = home.path().join("proof.json");
    std::fs::write(&proof_path, ticket_proof()).unwrap();

    cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home.path())
        .args(["derive", "--pcd-file"])
        .arg(&proof_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Type: zk-eddsa-event-ticket-pcd"));
}

#[test]
fn test_derive_rejects_non_json_proof() {
    let home = tempdir().unwrap();

    cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home.path())
        .args(["derive", "--pcd", "not-json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid PCD format"));
}

#[test]
fn test_derive_rejects_empty_email_domain() {
    let home = tempdir().unwrap();
    std::fs::write(
        home.path().join("config.toml"),
        "[identity]\nemail_domain = \"\"\n",
    )
    .unwrap();

    cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home.path())
        .args(["derive", "--pcd", &ticket_proof()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("email_domain is empty"));
}
