//! Proof Pipeline.
//!
//! `generate_proof` encodes raw attributes, proves, immediately
//! self-verifies, and caches the result; `verify_proof` checks a proof
//! against a request and drives the request's state machine.
//!
//! # Failure Recording
//!
//! Proving runs under a watchdog (`pipeline.proving_timeout_ms`). A
//! request's `proofStatus` becomes `failed` when proving errors, times out,
//! fails self-verification, or when the caller abandons the future
//! mid-flight. The last case is handled by [`FailureGuard`]'s `Drop`.

use async_trait::async_trait;
use chrono::Datelike;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, error, info, warn};
use zkgps_core::{GeoCoordinate, PipelineConfig, ProofId, RequestId};
use zkgps_crypto::zk::field::{parse_unsigned, to_field_string};
use zkgps_crypto::zk::signals;
use zkgps_crypto::{
    encode_age, encode_location, onchain_request_id, to_on_chain_calldata, AgeAttributes,
    CircuitId, CircuitInput, DateOfBirth, Groth16Proof, LocationAttributes, OnChainCalldata,
    ZkBackend,
};

use crate::error::{VerificationError, VerificationResult};
use crate::lifecycle::RequestLifecycle;
use crate::request::{
    new_challenge, Geofence, OnChainVerification, ProofRecord, ProofStatus, ProofType,
    RequestStatus, VerificationRequest,
};
use crate::store::Store;

/// Raw private attributes for one proof.
///
/// For request-bound proofs the request supplies the challenge and the
/// geofence; the caller-supplied values are only used for unbound proofs.
#[derive(Debug, Clone)]
pub enum RawAttributes {
    Age {
        /// `YYYY-MM-DD`
        dob: String,
        /// Defaults to the current UTC year
        reference_year: Option<i32>,
        challenge: Option<String>,
    },
    Location {
        position: GeoCoordinate,
        geofence: Option<Geofence>,
    },
}

impl RawAttributes {
    pub fn proof_type(&self) -> ProofType {
        match self {
            RawAttributes::Age { .. } => ProofType::Age,
            RawAttributes::Location { .. } => ProofType::Location,
        }
    }
}

/// What the on-chain verifier is asked to check.
#[derive(Debug, Clone)]
pub struct OnChainSubmission {
    pub onchain_request_id: [u8; 32],
    pub proof_type: ProofType,
    pub calldata: OnChainCalldata,
}

/// Outcome of an on-chain verification call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainReceipt {
    pub verified: bool,
    pub tx_hash: String,
    pub verification_id: String,
}

/// Pairing-check verifier contract, reached through whatever transport
/// the deployment wires in.
#[async_trait]
pub trait OnChainVerifier: Send + Sync {
    async fn submit(&self, submission: &OnChainSubmission) -> VerificationResult<OnChainReceipt>;
}

type LockKey = (String, RequestId, ProofType);

/// One async mutex per `(user, request, proof type)`.
#[derive(Default)]
struct KeyedLocks {
    inner: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    fn lease(&self, key: LockKey) -> VerificationResult<LockLease<'_>> {
        let mut map = self.inner.lock().map_err(|_| {
            VerificationError::Storage(crate::store::StoreError::Unavailable(
                "proving lock table poisoned".to_string(),
            ))
        })?;
        let handle = map.entry(key.clone()).or_default().clone();
        Ok(LockLease {
            locks: self,
            key,
            handle: Some(handle),
        })
    }

    fn release(&self, key: &LockKey) {
        if let Ok(mut map) = self.inner.lock() {
            let idle = map
                .get(key)
                .map(|h| Arc::strong_count(h) == 1)
                .unwrap_or(false);
            if idle {
                map.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }
}

/// A shared handle on one keyed lock; the table entry is dropped with the last lease.
struct LockLease<'a> {
    locks: &'a KeyedLocks,
    key: LockKey,
    handle: Option<Arc<AsyncMutex<()>>>,
}

impl LockLease<'_> {
    async fn acquire(&self) -> Option<AsyncMutexGuard<'_, ()>> {
        match &self.handle {
            Some(mutex) => Some(mutex.lock().await),
            None => None,
        }
    }
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        drop(self.handle.take());
        self.locks.release(&self.key);
    }
}

/// Marks the owning request's proof as failed unless disarmed.
struct FailureGuard<'a> {
    lifecycle: &'a RequestLifecycle,
    request_id: Option<&'a RequestId>,
    armed: bool,
}

impl<'a> FailureGuard<'a> {
    fn new(lifecycle: &'a RequestLifecycle, request_id: Option<&'a RequestId>) -> Self {
        Self {
            lifecycle,
            request_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FailureGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(id) = self.request_id {
            if let Err(e) = self.lifecycle.mark_proof_status(id, ProofStatus::Failed) {
                warn!(request_id = %id, error = %e, "Could not record proof failure");
            }
        }
    }
}

/// Generates, caches and verifies proofs.
pub struct ProofPipeline {
    store: Arc<dyn Store>,
    lifecycle: RequestLifecycle,
    backend: Arc<dyn ZkBackend>,
    config: PipelineConfig,
    locks: KeyedLocks,
}

impl ProofPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        lifecycle: RequestLifecycle,
        backend: Arc<dyn ZkBackend>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            lifecycle,
            backend,
            config,
            locks: KeyedLocks::default(),
        }
    }

    pub fn lifecycle(&self) -> &RequestLifecycle {
        &self.lifecycle
    }

    /// Generate a proof for `user_id`, or return the one cached for `request_id`.
    ///
    /// # Errors
    /// - `NotFound` if `request_id` does not resolve
    /// - `InvalidArgument` if the request is another user's or does not take this proof type
    /// - `InvalidState` if the request is not `Accepted`
    /// - `EncodingOverflow` / `InvalidArgument` from the encoder, before any proving work
    /// - `ProvingFailed` if the backend fails or the watchdog fires
    /// - `ProofInternallyInvalid` if the proof fails its own verification
    pub async fn generate_proof(
        &self,
        user_id: &str,
        request_id: Option<&RequestId>,
        attributes: RawAttributes,
    ) -> VerificationResult<ProofRecord> {
        let proof_type = attributes.proof_type();
        let request = match request_id {
            Some(id) => Some(self.bound_request(id, user_id, proof_type)?),
            None => None,
        };

        if let Some(id) = request_id {
            if let Some(cached) = self.cached(user_id, id, proof_type)? {
                return Ok(cached);
            }
        }

        if let Some(request) = &request {
            if request.status != RequestStatus::Accepted {
                return Err(VerificationError::invalid_state(
                    &request.id,
                    "generate a proof for",
                    request.status,
                ));
            }
        }

        let input = self.encode(&attributes, request.as_ref())?;
        debug!(
            circuit = %input.circuit(),
            fields = ?input.field_names().collect::<Vec<_>>(),
            "Circuit input built"
        );

        // Unbound proofs carry caller-chosen inputs, so nothing is reused or serialized.
        let bound_id = match request_id {
            Some(id) if self.config.serialize_per_request => id,
            _ => {
                return self
                    .prove_and_record(user_id, request_id, proof_type, &input)
                    .await;
            }
        };

        let lease = self
            .locks
            .lease((user_id.to_string(), bound_id.clone(), proof_type))?;
        let _permit = lease.acquire().await;
        if let Some(cached) = self.cached(user_id, bound_id, proof_type)? {
            return Ok(cached);
        }
        self.prove_and_record(user_id, request_id, proof_type, &input)
            .await
    }

    /// Verify `proof` and, when addressed to a request, advance it.
    ///
    /// Acceptance needs the backend to verify, the statement flag to be set,
    /// and the public signals to carry the request's bindings. A rejected
    /// proof leaves the request `Accepted` with `proofStatus = failed`.
    pub async fn verify_proof(
        &self,
        request_id: Option<&RequestId>,
        proof_type: ProofType,
        proof: &Groth16Proof,
        public_signals: &[String],
    ) -> VerificationResult<bool> {
        let circuit = proof_type.circuit();
        let request = match request_id {
            Some(id) => {
                let request = self.lifecycle.get(id)?;
                if !request.kind.admits(proof_type) {
                    return Err(VerificationError::InvalidArgument(format!(
                        "{} request does not take a {} proof",
                        request.kind, proof_type
                    )));
                }
                if request.status != RequestStatus::Accepted {
                    return Err(VerificationError::invalid_state(id, "verify", request.status));
                }
                Some(request)
            }
            None => None,
        };

        let backend_ok = self.backend.verify(circuit, public_signals, proof).await?;
        let statement_ok = public_signals
            .get(signals::RESULT)
            .map(|s| s == "1")
            .unwrap_or(false);
        let binding_ok = match &request {
            Some(r) => bindings_match(r, proof_type, public_signals)?,
            None => true,
        };
        let accepted = backend_ok && statement_ok && binding_ok;

        info!(
            request_id = ?request_id.map(|r| r.as_str()),
            circuit = %circuit,
            backend_ok,
            statement_ok,
            binding_ok,
            "Proof verification finished"
        );

        if let Some(request) = request {
            if accepted {
                let proof_id = self
                    .store
                    .latest_proof(&request.user_id, Some(&request.id), proof_type)?
                    .filter(|p| p.proof == *proof && p.public_signals == public_signals)
                    .map(|p| p.id);
                self.lifecycle
                    .mark_verified(&request.id, proof_type, proof_id)?;
            } else {
                self.lifecycle
                    .mark_proof_status(&request.id, ProofStatus::Failed)?;
            }
        }

        Ok(accepted)
    }

    /// A user's proof history, newest first.
    pub fn list_proofs(&self, user_id: &str, limit: usize) -> VerificationResult<Vec<ProofRecord>> {
        Ok(self.store.list_proofs(user_id, limit)?)
    }

    pub fn get_proof(&self, proof_id: &ProofId) -> VerificationResult<ProofRecord> {
        self.store
            .get_proof(proof_id)?
            .ok_or_else(|| VerificationError::NotFound(format!("proof {}", proof_id)))
    }

    /// Verifier-contract calldata for a cached proof.
    pub fn calldata(&self, proof_id: &ProofId) -> VerificationResult<OnChainCalldata> {
        let record = self.get_proof(proof_id)?;
        Ok(to_on_chain_calldata(&record.proof, &record.public_signals)?)
    }

    /// Submit a cached proof to the on-chain verifier and attach the result.
    ///
    /// The on-chain id is derived from the request id, or from the proof id
    /// for unbound proofs. A proof already verified on chain is returned as is.
    pub async fn submit_on_chain(
        &self,
        proof_id: &ProofId,
        verifier: &dyn OnChainVerifier,
    ) -> VerificationResult<ProofRecord> {
        let record = self.get_proof(proof_id)?;
        if record
            .on_chain
            .as_ref()
            .map(|c| c.verified_on_chain)
            .unwrap_or(false)
        {
            return Ok(record);
        }

        let calldata = to_on_chain_calldata(&record.proof, &record.public_signals)?;
        let source_id = record
            .request_id
            .as_ref()
            .map(|r| r.as_str())
            .unwrap_or(record.id.as_str());
        let submission = OnChainSubmission {
            onchain_request_id: onchain_request_id(source_id)?,
            proof_type: record.proof_type,
            calldata,
        };

        let receipt = verifier.submit(&submission).await?;
        if !receipt.verified {
            warn!(
                proof_id = %proof_id,
                tx_hash = %receipt.tx_hash,
                "On-chain verifier rejected proof"
            );
            return Ok(record);
        }

        let on_chain = OnChainVerification {
            verified_on_chain: true,
            tx_hash: receipt.tx_hash.clone(),
            on_chain_verification_id: receipt.verification_id,
            submitted_at: self.lifecycle.now_ms(),
        };
        self.store.attach_on_chain(&record.id, &on_chain)?;
        if let Some(request_id) = &record.request_id {
            self.lifecycle.attach_tx_hash(request_id, &receipt.tx_hash)?;
        }
        info!(
            proof_id = %proof_id,
            tx_hash = %on_chain.tx_hash,
            "Proof verified on chain"
        );

        Ok(ProofRecord {
            on_chain: Some(on_chain),
            ..record
        })
    }

    fn bound_request(
        &self,
        id: &RequestId,
        user_id: &str,
        proof_type: ProofType,
    ) -> VerificationResult<VerificationRequest> {
        let request = self.lifecycle.get(id)?;
        if request.user_id != user_id {
            return Err(VerificationError::InvalidArgument(format!(
                "request {} is not addressed to {}",
                id, user_id
            )));
        }
        if !request.kind.admits(proof_type) {
            return Err(VerificationError::InvalidArgument(format!(
                "{} request does not take a {} proof",
                request.kind, proof_type
            )));
        }
        Ok(request)
    }

    fn cached(
        &self,
        user_id: &str,
        request_id: &RequestId,
        proof_type: ProofType,
    ) -> VerificationResult<Option<ProofRecord>> {
        if self.config.force_regenerate {
            return Ok(None);
        }
        let cached = self
            .store
            .latest_proof(user_id, Some(request_id), proof_type)?;
        if let Some(record) = &cached {
            debug!(proof_id = %record.id, user_id, "Returning cached proof");
        }
        Ok(cached)
    }

    fn current_year(&self) -> i32 {
        chrono::DateTime::<chrono::Utc>::from_timestamp_millis(self.lifecycle.now_ms() as i64)
            .map(|d| d.year())
            .unwrap_or(1970)
    }

    fn encode(
        &self,
        attributes: &RawAttributes,
        request: Option<&VerificationRequest>,
    ) -> VerificationResult<CircuitInput> {
        match attributes {
            RawAttributes::Age {
                dob,
                reference_year,
                challenge,
            } => {
                let challenge = match (request, challenge) {
                    (Some(r), _) => r.challenge.clone(),
                    (None, Some(c)) => c.clone(),
                    (None, None) => new_challenge(),
                };
                Ok(encode_age(&AgeAttributes {
                    dob: DateOfBirth::parse(dob)?,
                    reference_year: reference_year.unwrap_or_else(|| self.current_year()),
                    challenge,
                })?)
            }
            RawAttributes::Location { position, geofence } => {
                let fence = request
                    .and_then(|r| r.geofence)
                    .or(*geofence)
                    .ok_or_else(|| {
                        VerificationError::InvalidArgument(
                            "location proof needs a geofence".to_string(),
                        )
                    })?;
                let user = GeoCoordinate::new(position.latitude, position.longitude)
                    .map_err(|e| VerificationError::InvalidArgument(e.to_string()))?;
                Ok(encode_location(
                    CircuitId::Location,
                    &LocationAttributes {
                        user,
                        provider: fence.center,
                        radius_km: fence.radius_km,
                    },
                )?)
            }
        }
    }

    fn proving_failed(&self, reason: String, input: &CircuitInput) -> VerificationError {
        VerificationError::ProvingFailed {
            reason,
            debug_input: self.config.expose_debug_input.then(|| input.to_json()),
        }
    }

    async fn prove_and_record(
        &self,
        user_id: &str,
        request_id: Option<&RequestId>,
        proof_type: ProofType,
        input: &CircuitInput,
    ) -> VerificationResult<ProofRecord> {
        let circuit = input.circuit();
        let guard = FailureGuard::new(&self.lifecycle, request_id);
        info!(
            user_id,
            request_id = ?request_id.map(|r| r.as_str()),
            circuit = %circuit,
            backend = self.backend.name(),
            "Generating proof"
        );

        let window = Duration::from_millis(self.config.proving_timeout_ms);
        let bundle = match tokio::time::timeout(window, self.backend.prove(input)).await {
            Err(_) => {
                warn!(circuit = %circuit, timeout_ms = self.config.proving_timeout_ms, "Proving timed out");
                return Err(self.proving_failed(
                    format!("proving timed out after {} ms", self.config.proving_timeout_ms),
                    input,
                ));
            }
            Ok(Err(e)) => {
                warn!(circuit = %circuit, error = %e, "Proving failed");
                return Err(self.proving_failed(e.to_string(), input));
            }
            Ok(Ok(bundle)) => bundle,
        };

        let valid = self
            .backend
            .verify(circuit, &bundle.public_signals, &bundle.proof)
            .await?;
        if !valid {
            error!(
                circuit = %circuit,
                backend = self.backend.name(),
                "CRITICAL: Generated proof failed self-verification. Proving and verification keys disagree."
            );
            return Err(VerificationError::ProofInternallyInvalid {
                circuit,
                detail: "generated proof does not verify against the verification key".to_string(),
            });
        }

        let record = ProofRecord {
            id: ProofId::generate(),
            user_id: user_id.to_string(),
            request_id: request_id.cloned(),
            proof_type,
            proof: bundle.proof,
            public_signals: bundle.public_signals,
            verified_locally: true,
            created_at: self.lifecycle.now_ms(),
            on_chain: None,
        };
        self.store.insert_proof(&record)?;
        if let Some(id) = request_id {
            self.lifecycle.mark_proof_status(id, ProofStatus::Generated)?;
        }
        guard.disarm();

        info!(proof_id = %record.id, circuit = %circuit, "Proof generated");
        Ok(record)
    }
}

/// Whether the public signals carry the request's bindings.
fn bindings_match(
    request: &VerificationRequest,
    proof_type: ProofType,
    public_signals: &[String],
) -> VerificationResult<bool> {
    match proof_type {
        ProofType::Age => {
            let expected = parse_unsigned(&request.challenge)?.to_str_radix(10);
            Ok(public_signals.get(signals::AGE_CHALLENGE) == Some(&expected))
        }
        ProofType::Location => {
            let fence = match request.geofence {
                Some(fence) => fence,
                None => return Ok(false),
            };
            let expected = encode_location(
                CircuitId::Location,
                &LocationAttributes {
                    user: fence.center,
                    provider: fence.center,
                    radius_km: fence.radius_km,
                },
            )?;
            let radius_field = CircuitId::Location
                .radius_encoding()
                .map(|e| e.field_name())
                .unwrap_or("radiusSquared");
            let expected_at = |name: &str| expected.get(name).map(to_field_string);

            Ok(
                public_signals.get(signals::LOCATION_PROVIDER_LAT).cloned()
                    == expected_at("providerLat")
                    && public_signals.get(signals::LOCATION_PROVIDER_LON).cloned()
                        == expected_at("providerLon")
                    && public_signals.get(signals::LOCATION_RADIUS).cloned()
                        == expected_at(radius_field),
            )
        }
    }
}
