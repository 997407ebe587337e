//! Login, status and logout against a mock auth backend.

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::tempdir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANON_KEY: &str = "anon-test-key";

fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

fn sample_proof() -> String {
    let inner = json!({
        "id": "1b7f3c52-7d0a-4c1e-9a55-0f1f2b9c8d11",
        "claim": {
            "merkleRoot": "9",
            "depth": 16,
            "externalNullifier": "8",
            "nullifierHash": "777",
            "signal": "1"
        },
        "proof": []
    });
    json!({ "type": "semaphore-group-signal", "pcd": inner.to_string() }).to_string()
}

fn session_body(user_id: &str) -> Value {
    json!({
        "access_token": "access-token-0123456789abcdef",
        "refresh_token": "refresh-token",
        "expires_in": 3600,
        "expires_at": 4_102_444_800_i64,
        "token_type": "bearer",
        "user": { "id": user_id, "email": "pcd-x@zupass.local", "user_metadata": {} }
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_with_piped_proof_saves_session() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    let home = tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "msg": "Invalid login credentials"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("u-new")))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home.path())
        .env("ZUAUTH_BACKEND_URL", server.uri())
        .env("ZUAUTH_ANON_KEY", ANON_KEY)
        .env("ZUAUTH_NO_BROWSER", "1")
        .arg("login")
        .write_stdin(sample_proof())
        .assert()
        .success()
        .stdout(predicate::str::contains("zupass.org#/prove?request="))
        .stdout(predicate::str::contains("✓ Logged in as pcd-x@zupass.local (new account)"));

    let saved: Value =
        serde_json::from_str(&fs::read_to_string(home.path().join("session.json")).unwrap())
            .unwrap();
    assert_eq!(saved["user_id"], "u-new");
    assert_eq!(saved["via"], "sign-up");
    assert_eq!(saved["access_token"], "access-token-0123456789abcdef");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_with_pcd_flag_signs_in() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    let home = tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("u-old")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u-old",
            "email": "pcd-x@zupass.local",
            "user_metadata": { "last_login": "2024-05-01T10:00:00Z" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home.path())
        .env("ZUAUTH_BACKEND_URL", server.uri())
        .env("ZUAUTH_ANON_KEY", ANON_KEY)
        .args(["login", "--pcd", &sample_proof()])
        .assert()
        .success()
        .stdout(predicate::str::contains("(signed in)"))
        .stdout(predicate::str::contains("Prover URL").not());

    assert!(home.path().join("session.json").exists());
}

#[test]
fn test_login_with_empty_proof_fails() {
    let home = tempdir().unwrap();

    cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home.path())
        .env("ZUAUTH_BACKEND_URL", "http://127.0.0.1:9")
        .env("ZUAUTH_ANON_KEY", ANON_KEY)
        .env("ZUAUTH_NO_BROWSER", "1")
        .arg("login")
        .write_stdin("   \n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("empty"));

    assert!(!home.path().join("session.json").exists());
}

#[test]
fn test_login_without_backend_fails() {
    let home = tempdir().unwrap();

    cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home.path())
        .env_remove("ZUAUTH_BACKEND_URL")
        .env_remove("ZUAUTH_ANON_KEY")
        .args(["login", "--pcd", "{}"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No backend URL configured"));
}

#[test]
fn test_status_when_not_logged_in() {
    let home = tempdir().unwrap();

    cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not logged in."));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_status_verifies_session_with_backend() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    let home = tempdir().unwrap();
    fs::write(
        home.path().join("session.json"),
        json!({
            "user_id": "u-1",
            "email": "pcd-x@zupass.local",
            "via": "sign-in",
            "authenticated_at": "2024-05-01T10:00:00+00:00",
            "access_token": "access-token-0123456789abcdef",
            "refresh_token": "refresh-token",
            "expires_at": 4_102_444_800_i64
        })
        .to_string(),
    )
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u-1",
            "user_metadata": { "last_login": "2024-05-01T10:00:00Z" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home.path())
        .env("ZUAUTH_BACKEND_URL", server.uri())
        .env("ZUAUTH_ANON_KEY", ANON_KEY)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged in as pcd-x@zupass.local"))
        .stdout(predicate::str::contains("access-token..."))
        .stdout(predicate::str::contains("Backend: verified"))
        .stdout(predicate::str::contains("Last login: 2024-05-01T10:00:00Z"));
}

#[test]
fn test_logout_when_not_logged_in() {
    let home = tempdir().unwrap();

    cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home.path())
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not logged in"));
}

#[test]
fn test_logout_clears_pending_session() {
    let home = tempdir().unwrap();
    let session_path = home.path().join("session.json");
    fs::write(
        &session_path,
        json!({
            "user_id": "u-2",
            "email": "pcd-y@zupass.local",
            "via": "sign-up",
            "authenticated_at": "2024-05-01T10:00:00+00:00"
        })
        .to_string(),
    )
    .unwrap();

    cargo_bin_cmd!("zuauth")
        .env("ZUAUTH_HOME", home.path())
        .env_remove("ZUAUTH_BACKEND_URL")
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ Logged out from pcd-y@zupass.local"));

    assert!(!session_path.exists());
}
