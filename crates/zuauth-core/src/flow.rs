//! Proof-to-account sign-in flow.
//!
//! A received proof string is summarized (for logs and metadata), turned into
//! deterministic credentials, and presented to the backend: sign in first,
//! sign up with the same credentials if that fails.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::backend::{AuthSession, AuthUser, SignUpResponse, SupabaseAuthClient};
use crate::config::IdentityConfig;
use crate::credentials;
use crate::pcd::{PcdSummary, ProofString};

/// Which backend call authenticated the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    SignIn,
    SignUp,
}

impl AuthMethod {
    pub fn display_name(&self) -> &'static str {
        match self {
            AuthMethod::SignIn => "signed in",
            AuthMethod::SignUp => "new account",
        }
    }
}

/// Result of a successful [`sign_in_with_pcd`].
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub method: AuthMethod,
    /// Derived account email.
    pub email: String,
    pub user: AuthUser,
    /// Absent when sign-up is waiting on email confirmation.
    pub session: Option<AuthSession>,
}

/// Metadata written on a fresh sign-up.
fn sign_up_metadata(proof: &ProofString, summary: &PcdSummary, login_at: &str) -> Value {
    json!({
        "zupass_pcd": proof.as_str(),
        "pcd_data": summary.data,
        "pcd_type": summary.pcd_type,
        "external_id": summary.claim.external_id(),
        "last_login": login_at,
    })
}

/// Metadata refreshed after every successful sign-in.
fn sign_in_metadata(proof: &ProofString, summary: &PcdSummary, login_at: &str) -> Value {
    json!({
        "zupass_pcd": proof.as_str(),
        "pcd_data": summary.data,
        "last_login": login_at,
    })
}

/// Signs in with a proof string, provisioning the account on first use.
///
/// A metadata update failure after sign-in is logged and ignored.
///
/// # Errors
/// Returns an error if the proof string is malformed, credentials cannot be
/// derived, or both sign-in and sign-up fail.
pub async fn sign_in_with_pcd(
    client: &SupabaseAuthClient,
    proof: &ProofString,
    identity: &IdentityConfig,
) -> Result<AuthOutcome> {
    let summary = proof.summarize()?;
    tracing::info!(
        pcd_type = summary.pcd_type.as_deref().unwrap_or("unknown"),
        pcd_id = summary.id.as_deref().unwrap_or("unknown"),
        bytes = proof.len(),
        "received PCD"
    );
    tracing::debug!(pcd = %summary.data, "PCD data");

    let creds = credentials::derive(proof, Some(&summary), identity)?;
    let login_at = Utc::now().to_rfc3339();

    match client
        .sign_in_with_password(&creds.email, &creds.password)
        .await
    {
        Ok(session) => {
            let metadata = sign_in_metadata(proof, &summary, &login_at);
            let user = match client.update_user(&session.access_token, &metadata).await {
                Ok(user) => user,
                Err(err) => {
                    tracing::warn!("Failed to update user metadata: {err}");
                    session.user.clone()
                }
            };
            Ok(AuthOutcome {
                method: AuthMethod::SignIn,
                email: creds.email,
                user,
                session: Some(session),
            })
        }
        Err(err) => {
            tracing::info!("Sign in failed, attempting signup: {err}");
            let metadata = sign_up_metadata(proof, &summary, &login_at);
            let response = client
                .sign_up(&creds.email, &creds.password, &metadata)
                .await
                .context("Sign up failed")?;

            let (user, session) = match response {
                SignUpResponse::Session(session) => (session.user.clone(), Some(session)),
                SignUpResponse::User(user) => {
                    tracing::info!("Sign up succeeded without a session (confirmation pending)");
                    (user, None)
                }
            };
            Ok(AuthOutcome {
                method: AuthMethod::SignUp,
                email: creds.email,
                user,
                session,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_up_metadata_carries_proof_and_external_id() {
        let inner = json!({ "id": "p-1", "claim": { "nullifierHash": "77" } });
        let raw = json!({ "type": "semaphore-group-signal", "pcd": inner.to_string() }).to_string();
        let proof = ProofString::parse(&raw).unwrap();
        let summary = proof.summarize().unwrap();

        let metadata = sign_up_metadata(&proof, &summary, "2024-05-01T10:00:00+00:00");
        assert_eq!(metadata["zupass_pcd"], raw);
        assert_eq!(metadata["pcd_data"]["type"], "semaphore-group-signal");
        assert_eq!(metadata["pcd_type"], "semaphore-group-signal");
        assert_eq!(metadata["external_id"], "77");
        assert_eq!(metadata["last_login"], "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_sign_in_metadata_omits_external_id() {
        let proof = ProofString::parse("{\"claim\":{}}").unwrap();
        let summary = proof.summarize().unwrap();

        let metadata = sign_in_metadata(&proof, &summary, "now");
        assert!(metadata.get("external_id").is_none());
        assert_eq!(metadata["zupass_pcd"], "{\"claim\":{}}");
    }

    #[test]
    fn test_auth_method_serde() {
        assert_eq!(
            serde_json::to_string(&AuthMethod::SignIn).unwrap(),
            "\"sign-in\""
        );
        let parsed: AuthMethod = serde_json::from_str("\"sign-up\"").unwrap();
        assert_eq!(parsed, AuthMethod::SignUp);
    }
}
