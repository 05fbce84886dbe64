//! In-process store for tests and single-node deployments.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use zkgps_core::{ProofId, RequestId};

use super::{
    content_id, newest_first, ContentStore, ProofStore, RequestStore, StoreError, StoreResult,
    UserRecord, UserStore,
};
use crate::request::{
    OnChainVerification, PartyRole, ProofRecord, ProofType, RequestStatus, VerificationRequest,
};

#[derive(Default)]
struct State {
    seq: u64,
    requests: HashMap<RequestId, (u64, VerificationRequest)>,
    session_tokens: HashSet<String>,
    proofs: HashMap<ProofId, (u64, ProofRecord)>,
    users: HashMap<String, UserRecord>,
    content: HashMap<String, Vec<u8>>,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// [`Store`](super::Store) held in a mutex-guarded map set.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl RequestStore for MemoryStore {
    fn insert_request(&self, request: &VerificationRequest) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.requests.contains_key(&request.id) {
            return Err(StoreError::Conflict(format!("request {} exists", request.id)));
        }
        if let Some(token) = &request.session_token {
            if !state.session_tokens.insert(token.clone()) {
                return Err(StoreError::Conflict(format!(
                    "session token {} already used",
                    token
                )));
            }
        }
        let seq = state.next_seq();
        state
            .requests
            .insert(request.id.clone(), (seq, request.clone()));
        Ok(())
    }

    fn get_request(&self, id: &RequestId) -> StoreResult<Option<VerificationRequest>> {
        Ok(self.lock()?.requests.get(id).map(|(_, r)| r.clone()))
    }

    fn replace_request_if(
        &self,
        request: &VerificationRequest,
        expected: RequestStatus,
    ) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let (_, stored) = state
            .requests
            .get_mut(&request.id)
            .ok_or_else(|| StoreError::NotFound(format!("request {}", request.id)))?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = request.clone();
        Ok(true)
    }

    fn expire_accepted_before(&self, now_ms: u64) -> StoreResult<usize> {
        let mut state = self.lock()?;
        let mut moved = 0;
        for (_, request) in state.requests.values_mut() {
            if request.expire_if_due(now_ms) {
                moved += 1;
            }
        }
        Ok(moved)
    }

    fn list_requests(
        &self,
        party: &str,
        role: PartyRole,
        limit: usize,
    ) -> StoreResult<Vec<VerificationRequest>> {
        let state = self.lock()?;
        let mut matching: Vec<_> = state
            .requests
            .values()
            .filter(|(_, r)| role.matches(r, party))
            .map(|(seq, r)| (r.created_at, *seq, r.clone()))
            .collect();
        newest_first(&mut matching);
        Ok(matching.into_iter().take(limit).map(|(_, _, r)| r).collect())
    }
}

impl ProofStore for MemoryStore {
    fn insert_proof(&self, record: &ProofRecord) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.proofs.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!("proof {} exists", record.id)));
        }
        let seq = state.next_seq();
        state.proofs.insert(record.id.clone(), (seq, record.clone()));
        Ok(())
    }

    fn get_proof(&self, id: &ProofId) -> StoreResult<Option<ProofRecord>> {
        Ok(self.lock()?.proofs.get(id).map(|(_, p)| p.clone()))
    }

    fn latest_proof(
        &self,
        user_id: &str,
        request_id: Option<&RequestId>,
        proof_type: ProofType,
    ) -> StoreResult<Option<ProofRecord>> {
        let state = self.lock()?;
        Ok(state
            .proofs
            .values()
            .filter(|(_, p)| {
                p.user_id == user_id
                    && p.request_id.as_ref() == request_id
                    && p.proof_type == proof_type
            })
            .max_by_key(|(seq, p)| (p.created_at, *seq))
            .map(|(_, p)| p.clone()))
    }

    fn list_proofs(&self, user_id: &str, limit: usize) -> StoreResult<Vec<ProofRecord>> {
        let state = self.lock()?;
        let mut matching: Vec<_> = state
            .proofs
            .values()
            .filter(|(_, p)| p.user_id == user_id)
            .map(|(seq, p)| (p.created_at, *seq, p.clone()))
            .collect();
        newest_first(&mut matching);
        Ok(matching.into_iter().take(limit).map(|(_, _, p)| p).collect())
    }

    fn attach_on_chain(&self, id: &ProofId, on_chain: &OnChainVerification) -> StoreResult<()> {
        let mut state = self.lock()?;
        let (_, record) = state
            .proofs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("proof {}", id)))?;
        record.on_chain = Some(on_chain.clone());
        Ok(())
    }
}

impl UserStore for MemoryStore {
    fn upsert_user(&self, record: &UserRecord) -> StoreResult<()> {
        let mut state = self.lock()?;
        let created_at = state
            .users
            .get(&record.user_id)
            .map(|existing| existing.created_at)
            .unwrap_or(record.created_at);
        state.users.insert(
            record.user_id.clone(),
            UserRecord {
                created_at,
                ..record.clone()
            },
        );
        Ok(())
    }

    fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.lock()?.users.get(user_id).cloned())
    }
}

impl ContentStore for MemoryStore {
    fn put_content(&self, bytes: &[u8]) -> StoreResult<String> {
        let id = content_id(bytes);
        self.lock()?
            .content
            .entry(id.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(id)
    }

    fn get_content(&self, content_id: &str) -> StoreResult<Vec<u8>> {
        self.lock()?
            .content
            .get(content_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("content {}", content_id)))
    }
}
