//! Tenant resolution at the auth boundary.
//!
//! Network callers present `Authorization: Bearer <token>`; the SHA-256
//! hex digest of the token is looked up in the `api_keys` table. The
//! raw token is never stored or logged. Local (stdio) mode uses a fixed
//! default tenant instead.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::storage::ApiKeyStore;

/// SHA-256 hex digest of a token, the stored key form.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Resolve a bearer token to its tenant.
///
/// # Errors
///
/// `UNAUTHORIZED` when the token is unknown.
pub fn tenant_for_token<S: ApiKeyStore>(store: &S, token: &str) -> Result<String> {
    store
        .tenant_for_key_hash(&hash_token(token))?
        .ok_or_else(|| Error::Unauthorized("unknown api key".into()))
}

/// Extract the token from an `Authorization` header value.
///
/// # Errors
///
/// `UNAUTHORIZED` when the header is not a bearer credential.
pub fn bearer_token(header: &str) -> Result<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Unauthorized("expected a bearer token".into()))
}

/// Mint a fresh api token (the caller stores only its digest).
#[must_use]
pub fn generate_token() -> String {
    format!(
        "arb_{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}
