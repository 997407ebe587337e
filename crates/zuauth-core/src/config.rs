//! Configuration management for zuauth.
//!
//! Loads configuration from ${ZUAUTH_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::{resolve_anon_key, resolve_base_url};

/// Env var overriding `backend.url`.
pub const BACKEND_URL_ENV: &str = "ZUAUTH_BACKEND_URL";
/// Env var used when `backend.anon_key` is not set.
pub const ANON_KEY_ENV: &str = "ZUAUTH_ANON_KEY";

/// How the account email is derived from a proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmailStrategy {
    /// Synthetic address built from a hash of the proof string (default)
    #[default]
    Hash,
    /// The attendee email carried by ticket PCDs
    AttendeeEmail,
}

impl EmailStrategy {
    pub fn display_name(&self) -> &'static str {
        match self {
            EmailStrategy::Hash => "hash",
            EmailStrategy::AttendeeEmail => "attendee-email",
        }
    }
}

/// Auth backend (Supabase project) configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: Option<String>,
    /// Public anon key.
    pub anon_key: Option<String>,
}

/// Backend settings after env/config resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBackend {
    pub url: String,
    pub anon_key: String,
}

impl BackendConfig {
    /// Resolves the backend URL (env > config) and anon key (config > env).
    ///
    /// # Errors
    /// Returns an error if either value is missing or the URL is invalid.
    pub fn resolve(&self) -> Result<ResolvedBackend> {
        let url = resolve_base_url(self.url.as_deref(), BACKEND_URL_ENV)?;
        let anon_key = resolve_anon_key(self.anon_key.as_deref(), ANON_KEY_ENV)?;
        Ok(ResolvedBackend { url, anon_key })
    }
}

/// Prover (Zupass) request configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProverConfig {
    pub client_url: String,
    pub server_url: String,
    /// Semaphore group URL; derived from `server_url` when unset.
    pub group_url: Option<String>,
    pub nullifier_seed: String,
    pub signal: String,
    pub title: String,
    pub description: String,
}

impl ProverConfig {
    const DEFAULT_CLIENT_URL: &str = "https://zupass.org";
    const DEFAULT_SERVER_URL: &str = "https://api.zupass.org";
    const DEFAULT_NULLIFIER_SEED: &str = "zupasshunt";
    const DEFAULT_SIGNAL: &str = "1";
    const DEFAULT_TITLE: &str = "VERIFY WITH ZUPASS";
    const DEFAULT_DESCRIPTION: &str = "Verify to see if you won!";

    /// Returns the group URL, defaulting to the Zuzalu participants group.
    pub fn effective_group_url(&self) -> String {
        match self.group_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => format!("{}/semaphore/1", self.server_url.trim_end_matches('/')),
        }
    }
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            client_url: Self::DEFAULT_CLIENT_URL.to_string(),
            server_url: Self::DEFAULT_SERVER_URL.to_string(),
            group_url: None,
            nullifier_seed: Self::DEFAULT_NULLIFIER_SEED.to_string(),
            signal: Self::DEFAULT_SIGNAL.to_string(),
            title: Self::DEFAULT_TITLE.to_string(),
            description: Self::DEFAULT_DESCRIPTION.to_string(),
        }
    }
}

/// Loopback callback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Fixed port, or a random high port when unset.
    pub port: Option<u16>,
    /// Seconds to wait for the proof (0 disables the callback).
    pub timeout_secs: u64,
    pub open_browser: bool,
}

impl CallbackConfig {
    const DEFAULT_TIMEOUT_SECS: u64 = 120;

    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            port: None,
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            open_browser: true,
        }
    }
}

/// Account identity derivation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub email_strategy: EmailStrategy,
    pub email_domain: String,
}

impl IdentityConfig {
    const DEFAULT_EMAIL_DOMAIN: &str = "zupass.local";
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            email_strategy: EmailStrategy::default(),
            email_domain: Self::DEFAULT_EMAIL_DOMAIN.to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write a daily log file under `<home>/logs`.
    pub file: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub prover: ProverConfig,
    pub callback: CallbackConfig,
    pub identity: IdentityConfig,
    pub logging: LoggingConfig,
}

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// Lays the user's config over the current template.
///
/// Template comments and keys added since the file was written show up; every
/// key the user set keeps its value, including sections the template lacks.
fn merge_with_template(user_config: &str) -> Result<String> {
    use toml_edit::DocumentMut;

    let mut doc: DocumentMut = default_config_template()
        .parse()
        .context("Failed to parse default config template")?;
    let user_doc: DocumentMut = user_config.parse().context("Failed to parse user config")?;

    overlay_user_values(doc.as_table_mut(), user_doc.as_table());

    Ok(doc.to_string())
}

fn overlay_user_values(template: &mut toml_edit::Table, user: &toml_edit::Table) {
    use toml_edit::Item;

    for (key, item) in user.iter() {
        if let Item::Table(user_section) = item
            && let Some(Item::Table(section)) = template.get_mut(key)
        {
            overlay_user_values(section, user_section);
        } else if !item.is_none() {
            template[key] = item.clone();
        }
    }
}

pub mod paths {
    //! Path resolution for zuauth configuration and data directories.
    //!
    //! ZUAUTH_HOME resolution order:
    //! 1. ZUAUTH_HOME environment variable (if set)
    //! 2. ~/.config/zuauth (default)

    use std::path::PathBuf;

    /// Returns the zuauth home directory.
    pub fn zuauth_home() -> PathBuf {
        if let Ok(home) = std::env::var("ZUAUTH_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("zuauth")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        zuauth_home().join("config.toml")
    }

    /// Returns the path to the persisted session.
    pub fn session_path() -> PathBuf {
        zuauth_home().join("session.json")
    }

    /// Returns the directory for log files.
    pub fn logs_dir() -> PathBuf {
        zuauth_home().join("logs")
    }
}

impl Config {
    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Saves the `[backend]` section to a config file.
    ///
    /// Creates the file with the default template if it doesn't exist.
    /// If the file exists, user values are merged into the latest template
    /// and comments are preserved.
    ///
    /// # Errors
    /// Returns an error if the existing file cannot be parsed or written.
    pub fn save_backend_to(path: &Path, url: Option<&str>, anon_key: Option<&str>) -> Result<()> {
        use toml_edit::{DocumentMut, Item, Table, value};

        if let Some(url) = url {
            url::Url::parse(url).with_context(|| format!("Invalid backend URL: {url}"))?;
        }

        let contents = if path.exists() {
            let user_config = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            merge_with_template(&user_config)?
        } else {
            default_config_template().to_string()
        };

        let mut doc: DocumentMut = contents
            .parse()
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        if !doc.contains_table("backend") {
            doc["backend"] = Item::Table(Table::new());
        }
        if let Some(url) = url {
            doc["backend"]["url"] = value(url);
        }
        if let Some(anon_key) = anon_key {
            doc["backend"]["anon_key"] = value(anon_key);
        }

        Self::write_config(path, &doc.to_string())
    }

    /// Replaces the config file in one step so a failed write never leaves
    /// it half written.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        use std::io::Write;

        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;

        let mut staged = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to stage config in {}", dir.display()))?;
        staged
            .write_all(content.as_bytes())
            .context("Failed to write staged config")?;
        staged.persist(path).map_err(|e| {
            anyhow::anyhow!("Failed to save config to {}: {}", path.display(), e.error)
        })?;

        Ok(())
    }
}
