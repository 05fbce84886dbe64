//! Test utilities for cross-crate integration tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use zkgps_core::{CircuitBackendKind, Config, GeoCoordinate, ManualClock, RequestId};
use zkgps_crypto::MockBackend;
use zkgps_verification::{
    Geofence, MemoryStore, NewRequest, OnChainReceipt, OnChainSubmission, OnChainVerifier,
    RawAttributes, RequestKind, VaultKey, VerificationResult, VerificationService,
};

/// 2024-06-01T12:00:00Z
pub const START_MS: u64 = 1_717_243_200_000;

pub const PROVIDER_ID: &str = "venue-colaba";

/// Venue used by every location scenario (Gateway of India)
pub fn venue() -> GeoCoordinate {
    GeoCoordinate::new(18.9220, 72.8347).unwrap()
}

/// A position a few hundred metres from [`venue`]
pub fn near_venue() -> GeoCoordinate {
    GeoCoordinate::new(18.9250, 72.8320).unwrap()
}

/// Service over an in-memory store, mock circuits and a manual clock.
pub struct Harness {
    pub service: VerificationService,
    pub clock: Arc<ManualClock>,
    pub backend: Arc<MockBackend>,
}

/// Harness with default configuration.
pub fn harness() -> Harness {
    harness_with(MockBackend::new(18), |_| {})
}

/// Harness with a custom backend and configuration tweaks.
pub fn harness_with(backend: MockBackend, tweak: impl FnOnce(&mut Config)) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut config = Config::default_config();
    config.circuits.backend = CircuitBackendKind::Mock;
    tweak(&mut config);

    let clock = Arc::new(ManualClock::new(START_MS));
    let backend = Arc::new(backend);
    let service = VerificationService::new(
        config,
        Arc::new(MemoryStore::new()),
        backend.clone(),
        clock.clone(),
        VaultKey::generate(),
    );
    Harness {
        service,
        clock,
        backend,
    }
}

impl Harness {
    /// Create and accept a request for `user_id`.
    pub fn accepted_request(&self, user_id: &str, kind: RequestKind) -> RequestId {
        let geofence = kind.needs_geofence().then(|| Geofence {
            center: venue(),
            radius_km: 1.0,
        });
        let request = self
            .service
            .create_request(NewRequest {
                provider_id: PROVIDER_ID.to_string(),
                user_id: user_id.to_string(),
                kind,
                duration_seconds: 300,
                geofence,
                session_token: None,
            })
            .unwrap();
        self.service.accept_request(&request.id).unwrap();
        request.id
    }
}

pub fn adult_age() -> RawAttributes {
    RawAttributes::Age {
        dob: "1990-03-14".to_string(),
        reference_year: None,
        challenge: None,
    }
}

pub fn minor_age() -> RawAttributes {
    RawAttributes::Age {
        dob: "2010-11-02".to_string(),
        reference_year: None,
        challenge: None,
    }
}

pub fn at(position: GeoCoordinate) -> RawAttributes {
    RawAttributes::Location {
        position,
        geofence: None,
    }
}

/// On-chain verifier double that records submissions.
#[derive(Default)]
pub struct RecordingVerifier {
    pub reject: bool,
    submissions: Mutex<Vec<OnChainSubmission>>,
    calls: AtomicUsize,
}

impl RecordingVerifier {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<OnChainSubmission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl OnChainVerifier for RecordingVerifier {
    async fn submit(&self, submission: &OnChainSubmission) -> VerificationResult<OnChainReceipt> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.submissions.lock().unwrap().push(submission.clone());
        Ok(OnChainReceipt {
            verified: !self.reject,
            tx_hash: format!("0x{:064x}", n + 1),
            verification_id: format!("onchain-{}", n + 1),
        })
    }
}
