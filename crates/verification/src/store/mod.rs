//! Persistence collaborators.
//!
//! The lifecycle manager and the pipeline see storage only through these
//! traits. Two implementations ship: [`MemoryStore`] and, behind the
//! `sqlite` feature, [`SqliteStore`].

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zkgps_core::{ProofId, RequestId};

use crate::request::{
    OnChainVerification, PartyRole, ProofRecord, ProofType, RequestStatus, VerificationRequest,
};

/// Errors from a persistence collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// A unique constraint would be violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend temporarily unusable
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the failure may clear up on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            #[cfg(feature = "sqlite")]
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A user's pointer to their sealed credential bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    pub content_id: String,
    pub name: String,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Content identifier: BLAKE3 of the stored bytes, lowercase hex.
pub fn content_id(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub trait RequestStore: Send + Sync {
    /// Insert a new request. A duplicate session token is a `Conflict`.
    fn insert_request(&self, request: &VerificationRequest) -> StoreResult<()>;

    fn get_request(&self, id: &RequestId) -> StoreResult<Option<VerificationRequest>>;

    /// Replace a request only if it is still in `expected` status.
    ///
    /// Returns `false` when the stored status differs; `NotFound` if absent.
    fn replace_request_if(
        &self,
        request: &VerificationRequest,
        expected: RequestStatus,
    ) -> StoreResult<bool>;

    /// Conditional bulk update: every `Accepted` request whose `timer_end`
    /// is before `now_ms` becomes `Expired`. Returns the number moved.
    fn expire_accepted_before(&self, now_ms: u64) -> StoreResult<usize>;

    /// Requests involving `party` in `role`, newest first.
    fn list_requests(
        &self,
        party: &str,
        role: PartyRole,
        limit: usize,
    ) -> StoreResult<Vec<VerificationRequest>>;
}

pub trait ProofStore: Send + Sync {
    fn insert_proof(&self, record: &ProofRecord) -> StoreResult<()>;

    fn get_proof(&self, id: &ProofId) -> StoreResult<Option<ProofRecord>>;

    /// Newest record for `(user, request, proof type)`.
    fn latest_proof(
        &self,
        user_id: &str,
        request_id: Option<&RequestId>,
        proof_type: ProofType,
    ) -> StoreResult<Option<ProofRecord>>;

    /// A user's records, newest first.
    fn list_proofs(&self, user_id: &str, limit: usize) -> StoreResult<Vec<ProofRecord>>;

    /// Attach on-chain verification fields. `NotFound` if absent.
    fn attach_on_chain(&self, id: &ProofId, on_chain: &OnChainVerification) -> StoreResult<()>;
}

pub trait UserStore: Send + Sync {
    /// Insert or replace the user's credential pointer (one per user).
    fn upsert_user(&self, record: &UserRecord) -> StoreResult<()>;

    fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>>;
}

pub trait ContentStore: Send + Sync {
    /// Store bytes and return their content id.
    fn put_content(&self, bytes: &[u8]) -> StoreResult<String>;

    /// `NotFound` if nothing is stored under `content_id`.
    fn get_content(&self, content_id: &str) -> StoreResult<Vec<u8>>;
}

/// Everything the verification service persists.
pub trait Store: RequestStore + ProofStore + UserStore + ContentStore {}

impl<T: RequestStore + ProofStore + UserStore + ContentStore> Store for T {}

/// Newest-first ordering shared by the implementations.
pub(crate) fn newest_first<T>(items: &mut [(u64, u64, T)]) {
    items.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
}
