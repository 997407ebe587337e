//! Proof input, request URL and credential preview commands.

use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use zuauth_core::callback;
use zuauth_core::config::Config;
use zuauth_core::credentials;
use zuauth_core::pcd::ProofString;
use zuauth_core::request::ProveRequest;
use zuauth_core::session::mask_token;

/// Proof given on the command line, if any.
pub fn proof_from_args(pcd: Option<&str>, pcd_file: Option<&Path>) -> Result<Option<ProofString>> {
    if let Some(raw) = pcd {
        return Ok(Some(ProofString::from_input(raw)?));
    }

    let Some(path) = pcd_file else {
        return Ok(None);
    };

    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .lock()
            .read_to_string(&mut buf)
            .context("read proof from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("read proof from {}", path.display()))?
    };
    Ok(Some(ProofString::from_input(&raw)?))
}

/// Prompts for a pasted proof (or redirect URL).
///
/// Reads one line from a terminal, or everything when stdin is piped.
pub fn read_pasted_proof() -> Result<ProofString> {
    let stdin = io::stdin();
    let mut input = String::new();
    if stdin.is_terminal() {
        print!("Paste the proof (or the full redirect URL): ");
        io::stdout().flush()?;
        stdin.lock().read_line(&mut input)?;
    } else {
        stdin.lock().read_to_string(&mut input)?;
    }
    Ok(ProofString::from_input(&input)?)
}

pub fn request_url(config: &Config, return_url: Option<&str>) -> Result<()> {
    let origin = format!("http://127.0.0.1:{}", callback::random_local_port());
    let return_url = return_url.map_or_else(|| format!("{origin}/popup"), str::to_string);
    let request = ProveRequest::semaphore_group(&config.prover, &return_url, &origin);
    println!("{}", request.to_url(&config.prover.client_url));
    Ok(())
}

pub fn derive(
    config: &Config,
    pcd: Option<&str>,
    pcd_file: Option<&Path>,
    show_password: bool,
) -> Result<()> {
    let proof = match proof_from_args(pcd, pcd_file)? {
        Some(proof) => proof,
        None => read_pasted_proof()?,
    };

    let summary = proof.summarize()?;
    let creds = credentials::derive(&proof, Some(&summary), &config.identity)?;

    println!("Type: {}", summary.pcd_type.as_deref().unwrap_or("unknown"));
    if let Some(external_id) = summary.claim.external_id() {
        println!("External ID: {external_id}");
    }
    println!(
        "Email: {} ({})",
        creds.email,
        config.identity.email_strategy.display_name()
    );
    if show_password {
        println!("Password: {}", creds.password);
    } else {
        println!("Password: {}", mask_token(&creds.password));
    }
    Ok(())
}
