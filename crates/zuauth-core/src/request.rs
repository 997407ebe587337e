//! Zupass prove-request construction.
//!
//! Builds the `Get` request the Zupass client understands and the URLs that
//! carry it: `<client>#/prove?request=<json>` for the prover itself, and
//! `<popup>?proofUrl=<prove url>` for the popup page that forwards to it.

use num_bigint::BigUint;
use serde::Serialize;
use sha3::{Digest, Keccak256};

use crate::config::ProverConfig;

/// PCD type produced by the request.
pub const SEMAPHORE_GROUP_PCD_TYPE: &str = "semaphore-group-signal";
/// PCD type of the identity argument the user supplies.
pub const SEMAPHORE_IDENTITY_PCD_TYPE: &str = "semaphore-identity-pcd";

/// Hashes a message into a snark field element.
///
/// `keccak256(signal) >> 8` leaves a 248-bit value, which always fits the
/// 254-bit BN254 scalar field.
pub fn snark_message_hash(signal: &str) -> BigUint {
    let digest = Keccak256::digest(signal.as_bytes());
    BigUint::from_bytes_be(&digest) >> 8u32
}

/// Argument type names as the prover spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArgumentType {
    #[serde(rename = "BigInt")]
    BigInt,
    #[serde(rename = "Object")]
    Object,
    #[serde(rename = "PCD")]
    Pcd,
}

/// One prove-request argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Argument {
    pub argument_type: ArgumentType,
    pub user_provided: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcd_type: Option<String>,
}

impl Argument {
    fn fixed_bigint(value: String) -> Self {
        Self {
            argument_type: ArgumentType::BigInt,
            user_provided: false,
            value: Some(value),
            remote_url: None,
            pcd_type: None,
        }
    }
}

/// Arguments of a semaphore group signal proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemaphoreGroupArgs {
    pub external_nullifier: Argument,
    pub group: Argument,
    pub identity: Argument,
    pub signal: Argument,
}

/// Display options for the proof screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProveOptions {
    pub title: String,
    pub description: String,
    pub requester_url: String,
}

/// A `Get` request: prove and hand the PCD back to `return_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProveRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub return_url: String,
    pub args: SemaphoreGroupArgs,
    pub pcd_type: String,
    pub options: ProveOptions,
}

impl ProveRequest {
    /// Builds the group-membership request described by `prover`.
    pub fn semaphore_group(prover: &ProverConfig, return_url: &str, requester_url: &str) -> Self {
        let args = SemaphoreGroupArgs {
            external_nullifier: Argument::fixed_bigint(
                snark_message_hash(&prover.nullifier_seed).to_string(),
            ),
            group: Argument {
                argument_type: ArgumentType::Object,
                user_provided: false,
                value: None,
                remote_url: Some(prover.effective_group_url()),
                pcd_type: None,
            },
            identity: Argument {
                argument_type: ArgumentType::Pcd,
                user_provided: true,
                value: None,
                remote_url: None,
                pcd_type: Some(SEMAPHORE_IDENTITY_PCD_TYPE.to_string()),
            },
            signal: Argument::fixed_bigint(prover.signal.clone()),
        };

        Self {
            kind: "Get",
            return_url: return_url.to_string(),
            args,
            pcd_type: SEMAPHORE_GROUP_PCD_TYPE.to_string(),
            options: ProveOptions {
                title: prover.title.clone(),
                description: prover.description.clone(),
                requester_url: requester_url.to_string(),
            },
        }
    }

    /// Returns the prover URL carrying this request.
    pub fn to_url(&self, client_url: &str) -> String {
        // Serializing plain strings and bools cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!(
            "{}#/prove?request={}",
            client_url.trim_end_matches('/'),
            urlencoding::encode(&json)
        )
    }
}

/// Returns the popup URL that forwards the browser to `proof_url`.
pub fn popup_url(popup: &str, proof_url: &str) -> String {
    format!("{popup}?proofUrl={}", urlencoding::encode(proof_url))
}
