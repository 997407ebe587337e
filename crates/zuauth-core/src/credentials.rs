//! Account credentials derived from a proof string.
//!
//! Both values are pure functions of the proof string and the identity
//! config, so presenting the same proof always maps to the same account.

use std::fmt;

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::config::{EmailStrategy, IdentityConfig};
use crate::pcd::{PcdSummary, ProofString};

/// Domain separation so the email local part never equals a password prefix.
const EMAIL_HASH_PREFIX: &str = "zuauth-email:";
/// Hex characters of the email hash kept in the local part.
const EMAIL_HASH_LEN: usize = 32;

/// Email/password pair for the auth backend.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedCredentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for DerivedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedCredentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// Lowercase hex SHA-256 of the proof string.
pub fn derive_password(proof: &ProofString) -> String {
    format!("{:x}", Sha256::digest(proof.as_str().as_bytes()))
}

/// Synthetic address `pcd-<hash>@<domain>` for a proof string.
pub fn derive_hashed_email(proof: &ProofString, domain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(EMAIL_HASH_PREFIX.as_bytes());
    hasher.update(proof.as_str().as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    format!(
        "pcd-{}@{}",
        &hex[..EMAIL_HASH_LEN],
        domain.trim().trim_start_matches('@')
    )
}

/// Derives the account credentials for a proof.
///
/// `summary` is only consulted by [`EmailStrategy::AttendeeEmail`].
///
/// # Errors
/// Returns an error if the hash strategy has no email domain, or the
/// attendee-email strategy is configured and the proof does not carry an
/// attendee email.
pub fn derive(
    proof: &ProofString,
    summary: Option<&PcdSummary>,
    identity: &IdentityConfig,
) -> Result<DerivedCredentials> {
    let email = match identity.email_strategy {
        EmailStrategy::Hash => {
            if identity.email_domain.trim().trim_start_matches('@').is_empty() {
                anyhow::bail!("identity.email_domain is empty; set it in config.toml");
            }
            derive_hashed_email(proof, &identity.email_domain)
        }
        EmailStrategy::AttendeeEmail => summary
            .and_then(|s| s.claim.attendee_email.as_deref())
            .map(|email| email.trim().to_lowercase())
            .filter(|email| !email.is_empty())
            .ok_or_else(|| anyhow::anyhow!("PCD missing attendeeEmail"))?,
    };

    Ok(DerivedCredentials {
        email,
        password: derive_password(proof),
    })
}
