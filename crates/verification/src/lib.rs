//! Verification request protocol and proof pipeline.
//!
//! A provider asks a user to prove an attribute (age, presence inside a
//! geofence, or both) within a time window. The user accepts, generates a
//! zero-knowledge proof from private attributes, and the provider verifies
//! it. This crate holds:
//!
//! - **Request lifecycle**: `Pending → {Accepted, Denied}`, `Accepted → {Expired, Verified}`
//! - **Proof pipeline**: encode, prove, self-verify, cache, verify
//! - **Persistence**: in-memory and SQLite stores behind one trait set
//! - **Credential vault**: sealed identity credentials behind content ids
//!
//! Expiry is lazy: reads reconcile it, nothing runs in the background.

pub mod credential;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod request;
pub mod service;
pub mod store;

pub use credential::{CredentialSubject, CredentialVault, VaultKey};
pub use error::{VerificationError, VerificationResult};
pub use lifecycle::RequestLifecycle;
pub use pipeline::{OnChainReceipt, OnChainSubmission, OnChainVerifier, ProofPipeline, RawAttributes};
pub use request::{
    Geofence, NewRequest, OnChainVerification, PartyRole, ProofRecord, ProofStatus, ProofType,
    RequestKind, RequestStatus, VerificationRequest,
};
pub use service::VerificationService;
pub use store::{
    ContentStore, MemoryStore, ProofStore, RequestStore, Store, StoreError, StoreResult,
    UserRecord, UserStore,
};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
