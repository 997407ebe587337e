//! Persisted session storage.
//!
//! Stores the authenticated session in `<base>/session.json` with restricted
//! permissions (0600). Tokens are never logged or displayed in full.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::paths;
use crate::flow::{AuthMethod, AuthOutcome};

/// The local "authenticated" marker plus whatever tokens the backend issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    /// Which path authenticated the account.
    pub via: AuthMethod,
    /// RFC 3339 timestamp of the login.
    pub authenticated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token expiry, unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl Session {
    /// Builds the session to persist after a successful sign-in or sign-up.
    pub fn from_outcome(outcome: &AuthOutcome) -> Self {
        let now = Utc::now();
        let mut session = Self {
            user_id: outcome.user.id.clone(),
            email: outcome
                .user
                .email
                .clone()
                .unwrap_or_else(|| outcome.email.clone()),
            via: outcome.method,
            authenticated_at: now.to_rfc3339(),
            access_token: None,
            refresh_token: None,
            expires_at: None,
        };
        if let Some(tokens) = &outcome.session {
            session.apply_tokens(tokens);
        }
        session
    }

    /// Replaces the stored tokens (after sign-in or refresh).
    pub fn apply_tokens(&mut self, tokens: &crate::backend::AuthSession) {
        let expires_at = tokens.expires_at.unwrap_or_else(|| {
            Utc::now().timestamp() + i64::try_from(tokens.expires_in).unwrap_or(i64::MAX / 2)
        });
        self.access_token = Some(tokens.access_token.clone());
        self.refresh_token = Some(tokens.refresh_token.clone());
        self.expires_at = Some(expires_at);
    }

    /// Returns true if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        const SKEW_SECS: i64 = 60;
        match self.expires_at {
            Some(expires_at) => Utc::now().timestamp() + SKEW_SECS >= expires_at,
            None => false,
        }
    }

    /// True when the backend issued tokens (sign-up with email confirmation
    /// pending leaves none).
    pub fn has_tokens(&self) -> bool {
        self.access_token.is_some()
    }
}

/// Masks a token for display.
pub fn mask_token(token: &str) -> String {
    if token.chars().count() <= 16 {
        return "***".to_string();
    }
    let prefix: String = token.chars().take(12).collect();
    format!("{prefix}...")
}

/// File-backed session store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(paths::session_path())
    }
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored session, if any.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session from {}", self.path.display()))?;

        serde_json::from_str(&contents)
            .map(Some)
            .with_context(|| format!("Failed to parse session from {}", self.path.display()))
    }

    /// Saves the session with restricted permissions (0600).
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents =
            serde_json::to_string_pretty(session).context("Failed to serialize session")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .with_context(|| format!("Failed to open {} for writing", self.path.display()))?;
            file.write_all(contents.as_bytes())
                .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.path, contents)
                .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        }

        tracing::debug!(path = %self.path.display(), "session saved");
        Ok(())
    }

    /// Removes the stored session. Returns whether one existed.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn sample_session() -> Session {
        Session {
            user_id: "u-1".to_string(),
            email: "pcd-abc@zupass.local".to_string(),
            via: AuthMethod::SignUp,
            authenticated_at: "2024-05-01T10:00:00+00:00".to_string(),
            access_token: Some("access-token-abcdefghijklmnop".to_string()),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(Utc::now().timestamp() + 3600),
        }
    }

    #[test]
    fn test_save_load_clear() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested").join("session.json"));

        assert_eq!(store.load().unwrap(), None);
        assert!(!store.clear().unwrap());

        let session = sample_session();
        store.save(&session).unwrap();
        assert_eq!(store.load().unwrap(), Some(session));

        assert!(store.clear().unwrap());
        assert_eq!(store.load().unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_save_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        store.save(&sample_session()).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_load_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        fs::write(store.path(), "{not json").unwrap();

        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("Failed to parse session"));
    }

    #[test]
    fn test_session_without_tokens_serializes_compactly() {
        let mut session = sample_session();
        session.access_token = None;
        session.refresh_token = None;
        session.expires_at = None;

        let json = serde_json::to_string(&session).unwrap();
        assert!(!json.contains("access_token"));
        assert!(json.contains("\"via\":\"sign-up\""));
        assert!(!session.has_tokens());
        assert!(!session.is_expired());
    }

    #[test]
    fn test_is_expired() {
        let mut session = sample_session();
        assert!(!session.is_expired());

        session.expires_at = Some(Utc::now().timestamp() - 1);
        assert!(session.is_expired());

        // Within the skew window counts as expired.
        session.expires_at = Some(Utc::now().timestamp() + 10);
        assert!(session.is_expired());
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("short"), "***");
        assert_eq!(mask_token("abcdefghijklmnopqrstuvwxyz"), "abcdefghijkl...");
        assert_eq!(mask_token("ééééééééééééééééé"), "éééééééééééé...");
    }
}
