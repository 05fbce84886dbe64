//! Service facade: the surface callers use, wired from [`Config`].

use std::sync::Arc;
use tracing::info;
use zkgps_core::{
    CircuitBackendKind, Clock, Config, GeoCoordinate, ProofId, RequestId, StorageBackend,
    SystemClock,
};
use zkgps_crypto::{
    to_on_chain_calldata, Groth16Proof, MockBackend, OnChainCalldata, SnarkjsBackend, ZkBackend,
    ZkError,
};

use crate::credential::{CredentialSubject, CredentialVault, VaultKey};
use crate::error::{VerificationError, VerificationResult};
use crate::lifecycle::RequestLifecycle;
use crate::pipeline::{OnChainVerifier, ProofPipeline, RawAttributes};
use crate::request::{NewRequest, PartyRole, ProofRecord, ProofType, VerificationRequest};
use crate::store::{MemoryStore, Store, UserRecord};

/// Request lifecycle, proof pipeline and credential vault over one store.
pub struct VerificationService {
    config: Config,
    store: Arc<dyn Store>,
    pipeline: ProofPipeline,
    vault: CredentialVault,
}

fn config_error(err: zkgps_core::CoreError) -> VerificationError {
    VerificationError::InvalidArgument(format!("configuration: {}", err))
}

/// Open the store `config.storage` names.
pub fn open_store(config: &Config) -> VerificationResult<Arc<dyn Store>> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite => Ok(Arc::new(crate::store::SqliteStore::open(
            &config.storage.path,
        )?)),
        #[cfg(not(feature = "sqlite"))]
        StorageBackend::Sqlite => Err(VerificationError::InvalidArgument(
            "storage.backend = \"sqlite\" needs the sqlite feature".to_string(),
        )),
    }
}

/// Build the proving backend `config.circuits` names.
///
/// The snarkjs backend refuses to start with missing artifacts.
pub fn build_backend(config: &Config) -> VerificationResult<Arc<dyn ZkBackend>> {
    match config.circuits.backend {
        CircuitBackendKind::Mock => Ok(Arc::new(MockBackend::new(config.pipeline.min_age))),
        CircuitBackendKind::Snarkjs => Ok(Arc::new(SnarkjsBackend::initialize(
            config.circuits.snarkjs_bin.clone(),
            config.circuits.artifacts_dir.clone(),
        )?)),
    }
}

impl VerificationService {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        backend: Arc<dyn ZkBackend>,
        clock: Arc<dyn Clock>,
        vault_key: VaultKey,
    ) -> Self {
        let lifecycle = RequestLifecycle::new(store.clone(), clock.clone(), config.requests.clone());
        let pipeline = ProofPipeline::new(
            store.clone(),
            lifecycle,
            backend,
            config.pipeline.clone(),
        );
        let vault = CredentialVault::new(store.clone(), clock, vault_key);
        Self {
            config,
            store,
            pipeline,
            vault,
        }
    }

    /// Validate `config` and wire every collaborator it names.
    pub fn from_config(config: Config, vault_key: VaultKey) -> VerificationResult<Self> {
        config.validate().map_err(config_error)?;
        let store = open_store(&config)?;
        let backend = build_backend(&config)?;
        info!(
            storage = ?config.storage.backend,
            backend = backend.name(),
            "Verification service ready"
        );
        Ok(Self::new(
            config,
            store,
            backend,
            Arc::new(SystemClock),
            vault_key,
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn lifecycle(&self) -> &RequestLifecycle {
        self.pipeline.lifecycle()
    }

    pub fn pipeline(&self) -> &ProofPipeline {
        &self.pipeline
    }

    pub fn create_request(&self, new: NewRequest) -> VerificationResult<VerificationRequest> {
        self.lifecycle().create(new)
    }

    pub fn accept_request(&self, id: &RequestId) -> VerificationResult<VerificationRequest> {
        self.lifecycle().accept(id)
    }

    pub fn deny_request(&self, id: &RequestId) -> VerificationResult<VerificationRequest> {
        self.lifecycle().deny(id)
    }

    pub fn get_request(&self, id: &RequestId) -> VerificationResult<VerificationRequest> {
        self.lifecycle().get(id)
    }

    pub fn list_requests(
        &self,
        party: &str,
        role: PartyRole,
    ) -> VerificationResult<Vec<VerificationRequest>> {
        self.lifecycle().list(party, role)
    }

    pub fn reconcile_expired(&self) -> VerificationResult<usize> {
        self.lifecycle().reconcile_expired()
    }

    pub async fn generate_proof(
        &self,
        user_id: &str,
        request_id: Option<&RequestId>,
        attributes: RawAttributes,
    ) -> VerificationResult<ProofRecord> {
        self.pipeline
            .generate_proof(user_id, request_id, attributes)
            .await
    }

    pub async fn verify_proof(
        &self,
        request_id: Option<&RequestId>,
        proof_type: ProofType,
        proof: &Groth16Proof,
        public_signals: &[String],
    ) -> VerificationResult<bool> {
        self.pipeline
            .verify_proof(request_id, proof_type, proof, public_signals)
            .await
    }

    pub fn to_on_chain_calldata(
        &self,
        proof: &Groth16Proof,
        public_signals: &[String],
    ) -> VerificationResult<OnChainCalldata> {
        Ok(to_on_chain_calldata(proof, public_signals)?)
    }

    pub fn list_proofs(&self, user_id: &str) -> VerificationResult<Vec<ProofRecord>> {
        self.pipeline
            .list_proofs(user_id, self.config.requests.list_limit)
    }

    pub async fn submit_on_chain(
        &self,
        proof_id: &ProofId,
        verifier: &dyn OnChainVerifier,
    ) -> VerificationResult<ProofRecord> {
        self.pipeline.submit_on_chain(proof_id, verifier).await
    }

    pub fn enroll_credential(
        &self,
        user_id: &str,
        subject: &CredentialSubject,
    ) -> VerificationResult<UserRecord> {
        self.vault.enroll(user_id, subject)
    }

    /// Generate a proof from the user's stored credential.
    ///
    /// Only `dob` (age) or the location (live fix first, then the
    /// credential's) leave the vault.
    pub async fn generate_proof_from_credential(
        &self,
        user_id: &str,
        request_id: Option<&RequestId>,
        proof_type: ProofType,
        live_location: Option<GeoCoordinate>,
    ) -> VerificationResult<ProofRecord> {
        let attributes = {
            let subject = self.vault.open(user_id)?;
            match proof_type {
                ProofType::Age => RawAttributes::Age {
                    dob: subject.dob.clone(),
                    reference_year: None,
                    challenge: None,
                },
                ProofType::Location => RawAttributes::Location {
                    position: live_location.or(subject.location).ok_or_else(|| {
                        VerificationError::from(ZkError::MissingAttribute(format!(
                            "location for {}",
                            user_id
                        )))
                    })?,
                    geofence: None,
                },
            }
        };
        self.pipeline
            .generate_proof(user_id, request_id, attributes)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_with_mock_backend() {
        let mut config = Config::default_config();
        config.circuits.backend = CircuitBackendKind::Mock;
        let service = VerificationService::from_config(config, VaultKey::generate()).unwrap();
        assert_eq!(service.config().pipeline.min_age, 18);
    }

    #[test]
    fn test_from_config_fails_on_missing_artifacts() {
        let mut config = Config::default_config();
        config.circuits.artifacts_dir = "/nonexistent/zkgps/circuits".into();
        let err = VerificationService::from_config(config, VaultKey::generate())
            .err()
            .unwrap();
        match err {
            VerificationError::ProvingFailed { reason, .. } => assert!(reason.contains("CRITICAL")),
            other => panic!("Expected ProvingFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default_config();
        config.circuits.backend = CircuitBackendKind::Mock;
        config.pipeline.proving_timeout_ms = 0;
        assert!(matches!(
            VerificationService::from_config(config, VaultKey::generate()),
            Err(VerificationError::InvalidArgument(_))
        ));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_store_from_config() {
        let path = std::env::temp_dir().join(format!("test_service_{}.db", uuid::Uuid::new_v4()));
        let config = Config {
            storage: zkgps_core::StorageConfig {
                backend: StorageBackend::Sqlite,
                path: path.clone(),
            },
            ..Config::default_config()
        };
        assert!(open_store(&config).is_ok());
        std::fs::remove_file(&path).ok();
    }
}
