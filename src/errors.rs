//! Error types for the evm-proxy-upgrades crate.

use std::time::Duration;

use alloy_primitives::Address;
use thiserror::Error;

/// Errors that can occur while resolving or upgrading a proxy.
#[derive(Clone, Debug, Error)]
pub enum UpgradeError {
    /// A required input was not supplied. Fatal, never retried.
    #[error("missing required configuration: {0}")]
    Config(String),

    /// Transport-level failure reading chain state. The caller decides
    /// whether to retry with a fresh attempt.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The library path and the raw slot path disagree on the logic address.
    /// Always fatal to the current attempt; neither value is preferred.
    #[error("resolution mismatch for proxy {proxy}: library reports {library}, storage slot holds {slot}")]
    ResolutionMismatch {
        proxy: Address,
        library: Address,
        slot: Address,
    },

    /// The proxy address changed across an upgrade. The library silently
    /// redeployed instead of upgrading, which must never happen.
    #[error("proxy address changed during upgrade: expected {expected}, got {actual}")]
    InvariantViolation { expected: Address, actual: Address },

    /// A transaction could not be submitted or did not reach finality.
    #[error("transaction failed: {0}")]
    Transaction(TxFailure),
}

/// The distinct ways an upgrade transaction can fail. Timeout and revert are
/// separate reasons: an abandoned wait leaves the transaction outstanding,
/// a revert means the chain rejected it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TxFailure {
    /// The transaction was mined but reverted.
    #[error("reverted: {0}")]
    Reverted(String),

    /// Finality was not observed within the caller-supplied bound.
    #[error("timed out after {0:?} waiting for finality")]
    Timeout(Duration),

    /// A pre-submission check failed; no transaction was sent.
    #[error("precondition not met: {0}")]
    Precondition(String),

    /// Transport failure while submitting or polling.
    #[error("transport: {0}")]
    Transport(String),
}

/// Result type for proxy upgrade operations.
pub type Result<T> = std::result::Result<T, UpgradeError>;
