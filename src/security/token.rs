//! Signed access token codec.
//!
//! # Responsibilities
//! - Issue compact, URL-safe tokens signed with HMAC-SHA256
//! - Decompose a token string into its fields and canonical signing string
//! - Verify signatures in constant time
//!
//! # Token Format
//! ```text
//! sr=<resource uri>&sig=<base64url signature>&se=<expiry epoch secs>&skn=<policy>
//! ```
//! `sr` and `skn` are percent-encoded. Field order does not matter and unknown
//! fields are ignored; a repeated required field makes the token malformed.
//!
//! The signature covers `"<resource uri>\n<expiry epoch secs>"`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const FIELD_RESOURCE: &str = "sr";
const FIELD_SIGNATURE: &str = "sig";
const FIELD_EXPIRY: &str = "se";
const FIELD_POLICY: &str = "skn";

/// Token codec failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("token repeats field '{0}'")]
    DuplicateField(&'static str),

    #[error("token field '{0}' is not valid")]
    InvalidField(&'static str),

    #[error("token segment is not a key=value pair")]
    InvalidSegment,

    #[error("signing key rejected")]
    InvalidKey,
}

/// Fields recovered from a token string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecomposedToken {
    pub resource_uri: String,
    pub policy_name: String,
    /// Expiry as seconds since the Unix epoch.
    pub expires_at: u64,
    /// The exact string the signature must cover.
    pub canonical: String,
    pub signature: Vec<u8>,
}

/// Current time as seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn canonical_string(resource_uri: &str, expires_at: u64) -> String {
    format!("{resource_uri}\n{expires_at}")
}

fn mac_for(signing_key: &[u8]) -> Result<HmacSha256, TokenError> {
    HmacSha256::new_from_slice(signing_key).map_err(|_| TokenError::InvalidKey)
}

/// HMAC-SHA256 of `canonical` under `signing_key`.
pub fn sign(signing_key: &[u8], canonical: &str) -> Result<Vec<u8>, TokenError> {
    let mut mac = mac_for(signing_key)?;
    mac.update(canonical.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Issue a token valid for `ttl` from now.
pub fn issue(
    resource_uri: &str,
    signing_key: &[u8],
    policy_name: &str,
    ttl: Duration,
) -> Result<String, TokenError> {
    issue_with_expiry(
        resource_uri,
        signing_key,
        policy_name,
        unix_now().saturating_add(ttl.as_secs()),
    )
}

/// Issue a token with an explicit absolute expiry.
pub fn issue_with_expiry(
    resource_uri: &str,
    signing_key: &[u8],
    policy_name: &str,
    expires_at: u64,
) -> Result<String, TokenError> {
    let signature = sign(signing_key, &canonical_string(resource_uri, expires_at))?;

    Ok(format!(
        "{FIELD_RESOURCE}={}&{FIELD_SIGNATURE}={}&{FIELD_EXPIRY}={}&{FIELD_POLICY}={}",
        urlencoding::encode(resource_uri),
        URL_SAFE_NO_PAD.encode(signature),
        expires_at,
        urlencoding::encode(policy_name),
    ))
}

fn set_once(
    slot: &mut Option<String>,
    field: &'static str,
    value: &str,
) -> Result<(), TokenError> {
    if slot.is_some() {
        return Err(TokenError::DuplicateField(field));
    }
    *slot = Some(value.to_string());
    Ok(())
}

/// Split a token string into its fields.
pub fn decompose(token: &str) -> Result<DecomposedToken, TokenError> {
    let mut resource = None;
    let mut signature = None;
    let mut expiry = None;
    let mut policy = None;

    for segment in token.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = segment
            .split_once('=')
            .ok_or(TokenError::InvalidSegment)?;
        match key {
            FIELD_RESOURCE => set_once(&mut resource, FIELD_RESOURCE, value)?,
            FIELD_SIGNATURE => set_once(&mut signature, FIELD_SIGNATURE, value)?,
            FIELD_EXPIRY => set_once(&mut expiry, FIELD_EXPIRY, value)?,
            FIELD_POLICY => set_once(&mut policy, FIELD_POLICY, value)?,
            _ => {}
        }
    }

    let resource_uri = urlencoding::decode(
        &resource.ok_or(TokenError::MissingField(FIELD_RESOURCE))?,
    )
    .map_err(|_| TokenError::InvalidField(FIELD_RESOURCE))?
    .into_owned();

    let policy_name = urlencoding::decode(&policy.ok_or(TokenError::MissingField(FIELD_POLICY))?)
        .map_err(|_| TokenError::InvalidField(FIELD_POLICY))?
        .into_owned();

    let expires_at = expiry
        .ok_or(TokenError::MissingField(FIELD_EXPIRY))?
        .parse::<u64>()
        .map_err(|_| TokenError::InvalidField(FIELD_EXPIRY))?;

    let signature = URL_SAFE_NO_PAD
        .decode(signature.ok_or(TokenError::MissingField(FIELD_SIGNATURE))?)
        .map_err(|_| TokenError::InvalidField(FIELD_SIGNATURE))?;

    if signature.is_empty() {
        return Err(TokenError::InvalidField(FIELD_SIGNATURE));
    }

    Ok(DecomposedToken {
        canonical: canonical_string(&resource_uri, expires_at),
        resource_uri,
        policy_name,
        expires_at,
        signature,
    })
}

/// Recompute the HMAC of `canonical` and compare it to `signature`.
///
/// The comparison is constant time. Never fails; any problem reads as invalid.
pub fn is_signature_valid(signature: &[u8], signing_key: &[u8], canonical: &str) -> bool {
    match mac_for(signing_key) {
        Ok(mut mac) => {
            mac.update(canonical.as_bytes());
            mac.verify_slice(signature).is_ok()
        }
        Err(_) => false,
    }
}
