//! Serialized PCD handling.
//!
//! The wallet hands back a serialized PCD envelope of the form
//! `{"type": "<pcd type>", "pcd": "<inner json>"}`. The proof itself is opaque
//! here; only the claim is looked at, and only for logging and account metadata.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

/// Errors for proof strings that must never reach the auth backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PcdError {
    /// Nothing was received (or only whitespace).
    Empty,
    /// The string is not JSON at all.
    Malformed(String),
}

impl fmt::Display for PcdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PcdError::Empty => write!(f, "Invalid proof received: empty PCD string"),
            PcdError::Malformed(reason) => write!(f, "Invalid PCD format: {reason}"),
        }
    }
}

impl std::error::Error for PcdError {}

/// A non-empty serialized PCD string, exactly as the wallet produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct ProofString(String);

impl ProofString {
    /// Wraps a raw proof string, rejecting empty input.
    ///
    /// Surrounding whitespace (e.g. a trailing newline from a paste) is removed
    /// so the same proof always derives the same account.
    ///
    /// # Errors
    /// Returns [`PcdError::Empty`] if nothing is left after trimming.
    pub fn parse(raw: &str) -> Result<Self, PcdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PcdError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Accepts either a bare serialized PCD or the full redirect URL the
    /// prover sent the browser to (`...?proof=<encoded pcd>`).
    ///
    /// # Errors
    /// Returns [`PcdError::Empty`] if the input or its `proof` parameter is empty.
    pub fn from_input(input: &str) -> Result<Self, PcdError> {
        let value = input.trim();
        if (value.starts_with("http://") || value.starts_with("https://"))
            && let Ok(url) = url::Url::parse(value)
            && let Some(proof) = url
                .query_pairs()
                .find(|(k, _)| k == "proof")
                .map(|(_, v)| v.into_owned())
        {
            return Self::parse(&proof);
        }
        Self::parse(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses as much structure as the proof string offers.
    ///
    /// The outer value must be a serialized-PCD envelope (`{type, pcd}`) or a
    /// bare PCD object with a `claim`. Past that (inner PCD, claim fields)
    /// parsing is best effort: a mismatch is logged and the summary comes back
    /// partial.
    ///
    /// # Errors
    /// Returns [`PcdError::Malformed`] if the string is not JSON, or is JSON
    /// of any other shape.
    pub fn summarize(&self) -> Result<PcdSummary, PcdError> {
        let outer: Value =
            serde_json::from_str(&self.0).map_err(|e| PcdError::Malformed(e.to_string()))?;

        let mut summary = PcdSummary {
            pcd_type: None,
            id: None,
            claim: ClaimSummary::default(),
            data: outer.clone(),
        };

        // Some wallets hand out the bare PCD object instead of the envelope.
        if outer.get("claim").is_some() {
            summary.id = string_field(&outer, "id");
            summary.claim = ClaimSummary::from_claim(&outer["claim"]);
            return Ok(summary);
        }

        let envelope: PcdEnvelope = serde_json::from_value(outer)
            .map_err(|e| PcdError::Malformed(format!("not a serialized PCD: {e}")))?;
        summary.pcd_type = Some(envelope.kind);

        match serde_json::from_str::<Value>(&envelope.pcd) {
            Ok(inner) => {
                summary.id = string_field(&inner, "id");
                match inner.get("claim") {
                    Some(claim) => summary.claim = ClaimSummary::from_claim(claim),
                    None => tracing::warn!("PCD has no claim"),
                }
            }
            Err(err) => tracing::warn!("Failed to parse inner PCD: {err}"),
        }

        Ok(summary)
    }
}

impl fmt::Debug for ProofString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProofString({} bytes)", self.0.len())
    }
}

#[derive(Debug, Deserialize)]
struct PcdEnvelope {
    #[serde(rename = "type")]
    kind: String,
    pcd: String,
}

/// What could be read out of a proof string.
#[derive(Debug, Clone, PartialEq)]
pub struct PcdSummary {
    /// PCD type name from the envelope (e.g. `semaphore-group-signal`).
    pub pcd_type: Option<String>,
    /// PCD id (a UUID for wallet-issued PCDs).
    pub id: Option<String>,
    pub claim: ClaimSummary,
    /// The outer JSON as parsed, stored as account metadata.
    pub data: Value,
}

/// Claim fields of interest. Group signals carry the nullifier fields;
/// ticket PCDs carry a `partialTicket`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSummary {
    pub attendee_email: Option<String>,
    pub attendee_semaphore_id: Option<String>,
    pub nullifier_hash: Option<String>,
    pub external_nullifier: Option<String>,
    pub signal: Option<String>,
}

impl ClaimSummary {
    fn from_claim(claim: &Value) -> Self {
        let ticket = claim.get("partialTicket").unwrap_or(&Value::Null);
        Self {
            attendee_email: string_field(ticket, "attendeeEmail"),
            attendee_semaphore_id: string_field(ticket, "attendeeSemaphoreId"),
            nullifier_hash: string_field(claim, "nullifierHash"),
            external_nullifier: string_field(claim, "externalNullifier"),
            signal: string_field(claim, "signal"),
        }
    }

    /// Stable external identifier for the holder, if the claim has one.
    pub fn external_id(&self) -> Option<&str> {
        self.attendee_semaphore_id
            .as_deref()
            .or(self.nullifier_hash.as_deref())
    }
}

/// Reads a field that may be a JSON string or number.
fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
