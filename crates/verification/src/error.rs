//! Error types for the verification request protocol.

use thiserror::Error;
use zkgps_crypto::{CircuitId, ZkError};

use crate::request::RequestStatus;
use crate::store::StoreError;

/// Result type for verification operations
pub type VerificationResult<T> = std::result::Result<T, VerificationError>;

/// Errors surfaced by the lifecycle manager and the proof pipeline.
#[derive(Debug, Error)]
pub enum VerificationError {
    /// Malformed or missing caller input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Identifier does not resolve
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not permitted in the request's current lifecycle state
    #[error("Cannot {operation} request {request_id}: request is {state}")]
    InvalidState {
        request_id: String,
        operation: &'static str,
        state: RequestStatus,
    },

    /// Numeric input exceeds the representable range
    #[error("Encoding overflow: {0}")]
    EncodingOverflow(String),

    /// The proving collaborator failed; the caller may retry.
    ///
    /// `debug_input` carries the circuit input only when the pipeline is
    /// configured to expose it to trusted callers.
    #[error("Proving failed: {reason}")]
    ProvingFailed {
        reason: String,
        debug_input: Option<serde_json::Value>,
    },

    /// A freshly generated proof failed its own verification.
    ///
    /// Proving and verification artifacts disagree. Not retryable.
    #[error("Proof internally invalid for {circuit} circuit: {detail}")]
    ProofInternallyInvalid { circuit: CircuitId, detail: String },

    /// Source identifier is wider than the on-chain identifier
    #[error("Identifier too long: {len} bytes exceeds {max}")]
    IdentifierTooLong { len: usize, max: usize },

    /// The verifying collaborator could not run (e.g. missing verification key)
    #[error("Verifier unavailable: {0}")]
    VerifierUnavailable(String),

    /// Persistence collaborator failure
    #[error("Storage error: {0}")]
    Storage(#[source] StoreError),

    /// Credential could not be sealed or opened
    #[error("Credential error: {0}")]
    Credential(String),
}

impl VerificationError {
    /// Whether the same call may succeed if simply repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            VerificationError::ProvingFailed { .. } => true,
            VerificationError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn invalid_state(
        request_id: impl ToString,
        operation: &'static str,
        state: RequestStatus,
    ) -> Self {
        VerificationError::InvalidState {
            request_id: request_id.to_string(),
            operation,
            state,
        }
    }
}

impl From<StoreError> for VerificationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => VerificationError::NotFound(what),
            other => VerificationError::Storage(other),
        }
    }
}

impl From<ZkError> for VerificationError {
    fn from(err: ZkError) -> Self {
        match err {
            ZkError::EncodingOverflow(msg) => VerificationError::EncodingOverflow(msg),
            ZkError::InvalidInput(msg) => VerificationError::InvalidArgument(msg),
            ZkError::MissingAttribute(name) => {
                VerificationError::InvalidArgument(format!("missing attribute: {}", name))
            }
            ZkError::IdentifierTooLong { len, max } => {
                VerificationError::IdentifierTooLong { len, max }
            }
            ZkError::VerificationKeyNotFound(msg) | ZkError::VerificationFailed(msg) => {
                VerificationError::VerifierUnavailable(msg)
            }
            ZkError::ProvingKeyNotFound(msg) | ZkError::ProofGenerationFailed(msg) => {
                VerificationError::ProvingFailed {
                    reason: msg,
                    debug_input: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_names_current_state() {
        let err = VerificationError::invalid_state("abc", "accept", RequestStatus::Accepted);
        let msg = err.to_string();
        assert!(msg.contains("accepted"));
        assert!(msg.contains("abc"));
    }

    #[test]
    fn test_retryability() {
        let proving = VerificationError::ProvingFailed {
            reason: "timeout".into(),
            debug_input: None,
        };
        assert!(proving.is_retryable());

        let internal = VerificationError::ProofInternallyInvalid {
            circuit: CircuitId::Age,
            detail: "mismatch".into(),
        };
        assert!(!internal.is_retryable());

        assert!(VerificationError::from(StoreError::Unavailable("busy".into())).is_retryable());
        assert!(!VerificationError::InvalidArgument("x".into()).is_retryable());
    }

    #[test]
    fn test_zk_error_mapping() {
        assert!(matches!(
            VerificationError::from(ZkError::EncodingOverflow("lat".into())),
            VerificationError::EncodingOverflow(_)
        ));
        assert!(matches!(
            VerificationError::from(ZkError::MissingAttribute("dob".into())),
            VerificationError::InvalidArgument(_)
        ));
        assert!(matches!(
            VerificationError::from(ZkError::ProofGenerationFailed("exit 1".into())),
            VerificationError::ProvingFailed { .. }
        ));
        assert!(matches!(
            VerificationError::from(StoreError::NotFound("request x".into())),
            VerificationError::NotFound(_)
        ));
    }
}
