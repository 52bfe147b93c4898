//! Notary errors.
//!
//! [`NotaryError`] is the closed set of rejections a client can receive;
//! each request ends in exactly one signature list or one of these.
//! [`ServiceError`] covers internal failures that are logged server-side
//! and surface to the client only as a dropped session.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_merkle::{PublicKey, TimeWindow};
use vigil_uniqueness::Conflict;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum NotaryError {
    /// The transaction names a different notary.
    #[error("transaction is assigned to a different notary")]
    WrongNotary,

    /// The notary's clock reading fell outside the declared window.
    #[error("clock reading {at} outside time window {window:?}")]
    TimeWindowInvalid { at: u64, window: TimeWindow },

    /// Validating mode: contract verification, dependency resolution or
    /// proof verification failed.
    #[error("transaction invalid: {0}")]
    TransactionInvalid(String),

    /// One or more inputs were already consumed; the full conflict map.
    #[error("{} input(s) already consumed", .0.len())]
    Conflict(Conflict),

    /// Required signatures absent or unverifiable.
    #[error("missing signatures for {} key(s)", .0.len())]
    SignaturesMissing(Vec<PublicKey>),
}

/// Internal failures. Never serialized onto the wire; the session ends and
/// the client retries, which commit idempotence makes safe.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("cluster unavailable: {0}")]
    ClusterUnavailable(String),

    #[error("service holds no local signing key")]
    NoSigningKey,
}
