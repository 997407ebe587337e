//! Auth command handlers.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;

use anyhow::Result;
use zuauth_core::backend::SupabaseAuthClient;
use zuauth_core::callback::{self, CallbackServer};
use zuauth_core::config::Config;
use zuauth_core::flow;
use zuauth_core::pcd::ProofString;
use zuauth_core::request::{self, ProveRequest};
use zuauth_core::session::{Session, SessionStore, mask_token};

use super::proof;

/// Set to skip opening a browser (CI, tests, SSH sessions).
const NO_BROWSER_ENV: &str = "ZUAUTH_NO_BROWSER";

pub struct LoginOptions<'a> {
    pub pcd: Option<&'a str>,
    pub pcd_file: Option<&'a Path>,
    pub no_browser: bool,
}

pub async fn login(config: &Config, opts: LoginOptions<'_>) -> Result<()> {
    let store = SessionStore::default();

    // Piped stdin carries the proof, so only prompt on a terminal.
    if let Some(existing) = store.load()?
        && io::stdin().is_terminal()
    {
        println!("Already logged in as {}", existing.email);
        print!("Do you want to replace the existing session? [y/N] ");
        io::stdout().flush()?;

        let mut response = String::new();
        io::stdin().lock().read_line(&mut response)?;
        if !response.trim().eq_ignore_ascii_case("y") {
            println!("Login cancelled.");
            return Ok(());
        }
    }

    let backend = config.backend.resolve()?;
    let client = SupabaseAuthClient::new(&backend.url, &backend.anon_key);

    let proof = match proof::proof_from_args(opts.pcd, opts.pcd_file)? {
        Some(proof) => proof,
        None => request_proof(config, opts.no_browser)?,
    };

    println!("Signing in...");
    let outcome = flow::sign_in_with_pcd(&client, &proof, &config.identity).await?;

    let session = Session::from_outcome(&outcome);
    store.save(&session)?;

    println!();
    println!(
        "✓ Logged in as {} ({})",
        session.email,
        outcome.method.display_name()
    );
    if !session.has_tokens() {
        println!("  No session issued yet; confirm the account email, then log in again.");
    }
    println!("  Session saved to: {}", store.path().display());
    Ok(())
}

/// Sends the user to the prover and collects the proof it returns.
fn request_proof(config: &Config, no_browser: bool) -> Result<ProofString> {
    let server = match config.callback.timeout() {
        Some(timeout) if io::stdin().is_terminal() => {
            bind_callback(config.callback.port).map(|server| (server, timeout))
        }
        _ => None,
    };

    let (return_url, origin) = match &server {
        Some((server, _)) => (server.popup_url(), server.origin()),
        None => {
            let port = config
                .callback
                .port
                .unwrap_or_else(callback::random_local_port);
            let origin = format!("http://127.0.0.1:{port}");
            (format!("{origin}/popup"), origin)
        }
    };

    let prove_request = ProveRequest::semaphore_group(&config.prover, &return_url, &origin);
    let proof_url = prove_request.to_url(&config.prover.client_url);
    let browser_url = if server.is_some() {
        request::popup_url(&return_url, &proof_url)
    } else {
        proof_url
    };

    println!("To sign in with Zupass:");
    println!();
    println!("  1. A browser window will open (or visit the URL below)");
    println!("  2. Log in to Zupass and approve the proof request");
    println!("  3. If redirected to localhost, return here to continue");
    println!("  4. Otherwise, paste the proof or the full redirect URL");
    println!();
    println!("Prover URL:");
    println!("  {browser_url}");
    println!();

    if config.callback.open_browser
        && !no_browser
        && std::env::var(NO_BROWSER_ENV).is_err()
        && let Err(err) = open::that(&browser_url)
    {
        tracing::warn!("Failed to open browser: {err}");
    }

    if let Some((server, timeout)) = server {
        println!("Waiting for the proof (up to {}s)...", timeout.as_secs());
        if let Some(raw) = server.wait_for_proof(timeout)? {
            return Ok(ProofString::from_input(&raw)?);
        }
        println!("No proof received on localhost.");
    }

    proof::read_pasted_proof()
}

/// Binds the callback listener, falling back to an OS-chosen port when a
/// random one is taken.
fn bind_callback(port: Option<u16>) -> Option<CallbackServer> {
    match CallbackServer::bind(port) {
        Ok(server) => Some(server),
        Err(err) if port.is_none() => {
            tracing::debug!("{err:#}; retrying with an OS-chosen port");
            CallbackServer::bind(Some(0))
                .inspect_err(|err| tracing::warn!("{err:#}"))
                .ok()
        }
        Err(err) => {
            tracing::warn!("{err:#}");
            None
        }
    }
}

pub async fn status(config: &Config) -> Result<()> {
    let store = SessionStore::default();
    let Some(mut session) = store.load()? else {
        println!("Not logged in.");
        return Ok(());
    };

    println!("Logged in as {}", session.email);
    println!("  User ID: {}", session.user_id);
    println!("  Via: {}", session.via.display_name());
    println!("  Since: {}", session.authenticated_at);

    let Some(access_token) = session.access_token.clone() else {
        println!("  Session: waiting for email confirmation");
        return Ok(());
    };
    println!("  Token: {}", mask_token(&access_token));

    let backend = match config.backend.resolve() {
        Ok(backend) => backend,
        Err(err) => {
            tracing::debug!("Skipping backend check: {err:#}");
            println!("  Backend: not configured, skipping verification");
            return Ok(());
        }
    };
    let client = SupabaseAuthClient::new(&backend.url, &backend.anon_key);

    let mut access_token = access_token;
    if session.is_expired() {
        let Some(refresh_token) = session.refresh_token.clone() else {
            println!("  Session: expired. Run `zuauth login` again.");
            return Ok(());
        };
        match client.refresh_session(&refresh_token).await {
            Ok(tokens) => {
                session.apply_tokens(&tokens);
                store.save(&session)?;
                access_token = tokens.access_token;
                println!("  Session: refreshed");
            }
            Err(err) => {
                println!("  Session: expired ({err}). Run `zuauth login` again.");
                return Ok(());
            }
        }
    }

    match client.get_user(&access_token).await {
        Ok(user) => {
            println!("  Backend: verified");
            if let Some(last_login) = user
                .user_metadata
                .get("last_login")
                .and_then(|v| v.as_str())
            {
                println!("  Last login: {last_login}");
            }
        }
        Err(err) => println!("  Backend: rejected the session ({err})"),
    }
    Ok(())
}

pub async fn logout(config: &Config) -> Result<()> {
    let store = SessionStore::default();
    let session = match store.load() {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!("Ignoring unreadable session: {err:#}");
            None
        }
    };

    if let Some(token) = session.as_ref().and_then(|s| s.access_token.as_deref()) {
        match config.backend.resolve() {
            Ok(backend) => {
                let client = SupabaseAuthClient::new(&backend.url, &backend.anon_key);
                if let Err(err) = client.sign_out(token).await {
                    tracing::warn!("Backend sign-out failed: {err}");
                }
            }
            Err(err) => tracing::debug!("Skipping backend sign-out: {err:#}"),
        }
    }

    if store.clear()? {
        match session {
            Some(session) => println!("✓ Logged out from {}", session.email),
            None => println!("✓ Logged out"),
        }
        println!("  Session removed from: {}", store.path().display());
    } else {
        println!("Not logged in (no session found).");
    }
    Ok(())
}
