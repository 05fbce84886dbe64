//! Error types for Zero-Knowledge proof operations.

use thiserror::Error;

/// Result type for ZK operations
pub type ZkResult<T> = std::result::Result<T, ZkError>;

/// Error types for Zero-Knowledge proof operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZkError {
    /// Proving artifact (wasm or zkey) not found
    #[error("Proving key not found: {0}")]
    ProvingKeyNotFound(String),

    /// Verification key not found
    #[error("Verification key not found: {0}")]
    VerificationKeyNotFound(String),

    /// A numeric value does not fit the representation the circuit expects
    #[error("Encoding overflow: {0}")]
    EncodingOverflow(String),

    /// A raw attribute required to build the circuit input is absent
    #[error("Missing attribute: {0}")]
    MissingAttribute(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Proof generation failed
    #[error("Proof generation failed: {0}")]
    ProofGenerationFailed(String),

    /// Proof verification could not be carried out
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Source identifier is wider than the on-chain identifier
    #[error("Identifier too long: {len} bytes exceeds {max}")]
    IdentifierTooLong { len: usize, max: usize },
}
