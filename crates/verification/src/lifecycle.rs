//! Request Lifecycle Manager.
//!
//! Owns every status transition of a [`VerificationRequest`]. Transitions
//! are written with a compare-and-set on the previous status, so two racing
//! callers cannot both move the same request.
//!
//! Expiry is observed, not pushed: there is no timer. Every read that
//! depends on status first runs [`RequestLifecycle::reconcile_expired`]
//! (listings) or applies the same check to the single request it loads.

use std::sync::Arc;
use tracing::{debug, info, warn};
use zkgps_core::{Clock, GeoCoordinate, ProofId, RequestConfig, RequestId};

use crate::error::{VerificationError, VerificationResult};
use crate::request::{
    Geofence, NewRequest, PartyRole, ProofStatus, ProofType, RequestStatus, VerificationRequest,
};
use crate::store::{Store, StoreError};

/// Request state machine over a shared store.
#[derive(Clone)]
pub struct RequestLifecycle {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: RequestConfig,
}

impl RequestLifecycle {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: RequestConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Create a `Pending` request with a fresh challenge.
    ///
    /// Location kinds without a geofence get the origin and the configured
    /// default radius.
    pub fn create(&self, mut new: NewRequest) -> VerificationResult<VerificationRequest> {
        if new.duration_seconds <= 0 {
            return Err(VerificationError::InvalidArgument(format!(
                "durationSeconds must be positive, got {}",
                new.duration_seconds
            )));
        }
        if new.duration_seconds > self.config.max_duration_seconds {
            return Err(VerificationError::InvalidArgument(format!(
                "durationSeconds {} exceeds the maximum of {}",
                new.duration_seconds, self.config.max_duration_seconds
            )));
        }
        if new.provider_id.trim().is_empty() || new.user_id.trim().is_empty() {
            return Err(VerificationError::InvalidArgument(
                "providerId and userId are required".to_string(),
            ));
        }
        if matches!(&new.session_token, Some(token) if token.trim().is_empty()) {
            return Err(VerificationError::InvalidArgument(
                "session token must not be empty".to_string(),
            ));
        }

        if new.kind.needs_geofence() {
            let fence = new.geofence.unwrap_or(Geofence {
                center: GeoCoordinate::origin(),
                radius_km: self.config.default_radius_km,
            });
            GeoCoordinate::new(fence.center.latitude, fence.center.longitude)
                .map_err(|e| VerificationError::InvalidArgument(e.to_string()))?;
            if !fence.radius_km.is_finite() || fence.radius_km <= 0.0 {
                return Err(VerificationError::InvalidArgument(format!(
                    "radiusKm must be positive, got {}",
                    fence.radius_km
                )));
            }
            new.geofence = Some(fence);
        } else {
            new.geofence = None;
        }

        let request = VerificationRequest::pending(new, self.now_ms());
        self.store.insert_request(&request).map_err(|e| match e {
            StoreError::Conflict(msg) => VerificationError::InvalidArgument(msg),
            other => other.into(),
        })?;

        info!(
            request_id = %request.id,
            kind = %request.kind,
            duration_seconds = request.duration_seconds,
            "Verification request created"
        );
        Ok(request)
    }

    /// Pending → Accepted.
    pub fn accept(&self, id: &RequestId) -> VerificationResult<VerificationRequest> {
        let now = self.now_ms();
        let request = self.transition(id, "accept", |r| r.on_accept(now))?;
        info!(
            request_id = %id,
            timer_end = ?request.timer_end,
            "Verification request accepted"
        );
        Ok(request)
    }

    /// Pending → Denied.
    pub fn deny(&self, id: &RequestId) -> VerificationResult<VerificationRequest> {
        let request = self.transition(id, "deny", |r| r.on_deny())?;
        info!(request_id = %id, "Verification request denied");
        Ok(request)
    }

    /// Expire every accepted request whose window closed before `now_ms`.
    ///
    /// Idempotent; safe to call concurrently.
    pub fn reconcile_expired_at(&self, now_ms: u64) -> VerificationResult<usize> {
        let moved = self.store.expire_accepted_before(now_ms)?;
        if moved > 0 {
            info!(moved, "Expired verification requests");
        }
        Ok(moved)
    }

    pub fn reconcile_expired(&self) -> VerificationResult<usize> {
        self.reconcile_expired_at(self.now_ms())
    }

    /// Load a request with lazy expiry applied.
    pub fn get(&self, id: &RequestId) -> VerificationResult<VerificationRequest> {
        let mut request = self.load(id)?;
        let now = self.now_ms();
        if request.is_due_for_expiry(now) {
            let mut expired = request.clone();
            expired.expire_if_due(now);
            if self.store.replace_request_if(&expired, RequestStatus::Accepted)? {
                debug!(request_id = %id, "Request expired on read");
                request = expired;
            } else {
                request = self.load(id)?;
            }
        }
        Ok(request)
    }

    /// Requests involving `party`, newest first, after an expiry sweep.
    pub fn list(&self, party: &str, role: PartyRole) -> VerificationResult<Vec<VerificationRequest>> {
        self.reconcile_expired()?;
        Ok(self
            .store
            .list_requests(party, role, self.config.list_limit)?)
    }

    /// Record that `proof_type` verified; Accepted → Verified once every
    /// required component has.
    pub fn mark_verified(
        &self,
        id: &RequestId,
        proof_type: ProofType,
        proof_id: Option<ProofId>,
    ) -> VerificationResult<VerificationRequest> {
        let now = self.now_ms();
        let request = self.transition(id, "verify", |r| {
            r.on_component_verified(proof_type, proof_id.clone(), now)
                .map(|_| ())
        })?;
        info!(
            request_id = %id,
            proof_type = %proof_type,
            status = %request.status,
            "Proof verified for request"
        );
        Ok(request)
    }

    /// Update the informational proof substate without touching `status`.
    ///
    /// A request that already reached `Verified` keeps `proofStatus = verified`.
    pub fn mark_proof_status(
        &self,
        id: &RequestId,
        value: ProofStatus,
    ) -> VerificationResult<VerificationRequest> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut request = self.load(id)?;
            if request.status == RequestStatus::Verified || request.proof_status == value {
                return Ok(request);
            }
            let observed = request.status;
            request.proof_status = value;
            if self.store.replace_request_if(&request, observed)? {
                debug!(request_id = %id, proof_status = %value, "Proof status updated");
                return Ok(request);
            }
        }
        Err(VerificationError::Storage(StoreError::Unavailable(format!(
            "request {} kept changing during proof status update",
            id
        ))))
    }

    /// Attach an on-chain transaction hash to the request.
    pub fn attach_tx_hash(&self, id: &RequestId, tx_hash: &str) -> VerificationResult<()> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut request = self.load(id)?;
            let observed = request.status;
            request.tx_hash = Some(tx_hash.to_string());
            if self.store.replace_request_if(&request, observed)? {
                return Ok(());
            }
        }
        Err(VerificationError::Storage(StoreError::Unavailable(format!(
            "request {} kept changing during tx hash update",
            id
        ))))
    }

    fn load(&self, id: &RequestId) -> VerificationResult<VerificationRequest> {
        self.store
            .get_request(id)?
            .ok_or_else(|| VerificationError::NotFound(format!("request {}", id)))
    }

    /// Apply `apply` to the current request and persist it if the status it
    /// was read in is still current.
    fn transition<F>(
        &self,
        id: &RequestId,
        operation: &'static str,
        apply: F,
    ) -> VerificationResult<VerificationRequest>
    where
        F: Fn(&mut VerificationRequest) -> VerificationResult<()>,
    {
        let mut request = self.get(id)?;
        let observed = request.status;
        if observed.is_terminal() {
            return Err(VerificationError::invalid_state(id, operation, observed));
        }
        apply(&mut request)?;
        if observed != request.status && !observed.can_transition_to(request.status) {
            return Err(VerificationError::invalid_state(id, operation, observed));
        }

        if self.store.replace_request_if(&request, observed)? {
            return Ok(request);
        }

        let current = self.load(id)?;
        warn!(
            request_id = %id,
            operation,
            status = %current.status,
            "Concurrent transition lost"
        );
        Err(VerificationError::invalid_state(id, operation, current.status))
    }
}

const MAX_CAS_ATTEMPTS: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestKind;
    use crate::store::MemoryStore;
    use proptest::prelude::*;
    use zkgps_core::ManualClock;

    fn setup() -> (RequestLifecycle, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let lifecycle = RequestLifecycle::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            RequestConfig::default(),
        );
        (lifecycle, clock)
    }

    fn new_request(kind: RequestKind, duration_seconds: i64) -> NewRequest {
        NewRequest {
            provider_id: "provider-1".into(),
            user_id: "user-1".into(),
            kind,
            duration_seconds,
            geofence: None,
            session_token: None,
        }
    }

    #[test]
    fn test_create_rejects_non_positive_duration() {
        let (lifecycle, _) = setup();
        for duration in [0, -5] {
            let err = lifecycle
                .create(new_request(RequestKind::Age, duration))
                .unwrap_err();
            assert!(matches!(err, VerificationError::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_create_defaults_geofence_for_location() {
        let (lifecycle, _) = setup();
        let request = lifecycle
            .create(new_request(RequestKind::Location, 60))
            .unwrap();
        let fence = request.geofence.unwrap();
        assert_eq!(fence.center, GeoCoordinate::origin());
        assert_eq!(fence.radius_km, 10.0);
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.proof_status, ProofStatus::Awaited);

        let age = lifecycle.create(new_request(RequestKind::Age, 60)).unwrap();
        assert!(age.geofence.is_none());
    }

    #[test]
    fn test_create_rejects_invalid_geofence() {
        let (lifecycle, _) = setup();
        let mut new = new_request(RequestKind::Location, 60);
        new.geofence = Some(Geofence {
            center: GeoCoordinate {
                latitude: 91.0,
                longitude: 0.0,
            },
            radius_km: 1.0,
        });
        assert!(matches!(
            lifecycle.create(new),
            Err(VerificationError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_duplicate_session_token_is_invalid_argument() {
        let (lifecycle, _) = setup();
        let mut new = new_request(RequestKind::Age, 60);
        new.session_token = Some("qr-session".into());
        lifecycle.create(new.clone()).unwrap();
        assert!(matches!(
            lifecycle.create(new),
            Err(VerificationError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_accept_twice_keeps_timer() {
        let (lifecycle, clock) = setup();
        let request = lifecycle.create(new_request(RequestKind::Age, 30)).unwrap();

        let accepted = lifecycle.accept(&request.id).unwrap();
        assert_eq!(accepted.accepted_at, Some(1_000_000));
        assert_eq!(accepted.timer_end, Some(1_030_000));

        clock.advance(5_000);
        let err = lifecycle.accept(&request.id).unwrap_err();
        assert!(err.to_string().contains("accepted"));
        assert_eq!(
            lifecycle.get(&request.id).unwrap().timer_end,
            Some(1_030_000)
        );
    }

    #[test]
    fn test_not_found() {
        let (lifecycle, _) = setup();
        let missing = RequestId::from("000000000000000000000000");
        assert!(matches!(
            lifecycle.accept(&missing),
            Err(VerificationError::NotFound(_))
        ));
        assert!(matches!(
            lifecycle.deny(&missing),
            Err(VerificationError::NotFound(_))
        ));
    }

    #[test]
    fn test_deny_then_accept_fails() {
        let (lifecycle, _) = setup();
        let request = lifecycle.create(new_request(RequestKind::Age, 30)).unwrap();
        lifecycle.deny(&request.id).unwrap();
        assert!(matches!(
            lifecycle.accept(&request.id),
            Err(VerificationError::InvalidState {
                state: RequestStatus::Denied,
                ..
            })
        ));
    }

    #[test]
    fn test_terminal_requests_reject_every_transition() {
        let (lifecycle, clock) = setup();
        let denied = lifecycle.create(new_request(RequestKind::Age, 10)).unwrap();
        lifecycle.deny(&denied.id).unwrap();
        let expired = lifecycle.create(new_request(RequestKind::Age, 10)).unwrap();
        lifecycle.accept(&expired.id).unwrap();
        let verified = lifecycle.create(new_request(RequestKind::Age, 60)).unwrap();
        lifecycle.accept(&verified.id).unwrap();
        lifecycle
            .mark_verified(&verified.id, ProofType::Age, None)
            .unwrap();
        clock.advance(10_001);

        for (id, state) in [
            (&denied.id, RequestStatus::Denied),
            (&expired.id, RequestStatus::Expired),
            (&verified.id, RequestStatus::Verified),
        ] {
            let before = lifecycle.get(id).unwrap();
            assert_eq!(before.status, state);
            for result in [
                lifecycle.accept(id),
                lifecycle.deny(id),
                lifecycle.mark_verified(id, ProofType::Age, None),
            ] {
                match result {
                    Err(VerificationError::InvalidState { state: s, .. }) => assert_eq!(s, state),
                    other => panic!("Expected InvalidState, got {:?}", other),
                }
            }
            assert_eq!(lifecycle.get(id).unwrap(), before);
        }
    }

    #[test]
    fn test_lazy_expiry_on_get_and_list() {
        let (lifecycle, clock) = setup();
        let first = lifecycle.create(new_request(RequestKind::Age, 10)).unwrap();
        let second = lifecycle.create(new_request(RequestKind::Age, 10)).unwrap();
        lifecycle.accept(&first.id).unwrap();
        lifecycle.accept(&second.id).unwrap();

        clock.advance(10_001);
        assert_eq!(
            lifecycle.get(&first.id).unwrap().status,
            RequestStatus::Expired
        );

        let listed = lifecycle.list("user-1", PartyRole::User).unwrap();
        assert!(listed.iter().all(|r| r.status == RequestStatus::Expired));
    }

    #[test]
    fn test_expired_request_cannot_be_verified() {
        let (lifecycle, clock) = setup();
        let request = lifecycle.create(new_request(RequestKind::Age, 10)).unwrap();
        lifecycle.accept(&request.id).unwrap();
        clock.advance(60_000);

        let err = lifecycle
            .mark_verified(&request.id, ProofType::Age, None)
            .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::InvalidState {
                state: RequestStatus::Expired,
                ..
            }
        ));
    }

    #[test]
    fn test_mark_verified_and_proof_status() {
        let (lifecycle, _) = setup();
        let request = lifecycle.create(new_request(RequestKind::Age, 60)).unwrap();
        assert!(lifecycle
            .mark_verified(&request.id, ProofType::Age, None)
            .is_err());

        lifecycle.accept(&request.id).unwrap();
        let updated = lifecycle
            .mark_proof_status(&request.id, ProofStatus::Generated)
            .unwrap();
        assert_eq!(updated.status, RequestStatus::Accepted);
        assert_eq!(updated.proof_status, ProofStatus::Generated);

        let verified = lifecycle
            .mark_verified(&request.id, ProofType::Age, Some(ProofId::from("p")))
            .unwrap();
        assert_eq!(verified.status, RequestStatus::Verified);
        assert!(verified.verified_at.is_some());

        let after = lifecycle
            .mark_proof_status(&request.id, ProofStatus::Failed)
            .unwrap();
        assert_eq!(after.proof_status, ProofStatus::Verified);
    }

    proptest! {
        #[test]
        fn prop_reconcile_is_idempotent(
            durations in proptest::collection::vec(1i64..100, 1..12),
            accept_mask in proptest::collection::vec(any::<bool>(), 12),
            advance_s in 0u64..200,
        ) {
            let (lifecycle, clock) = setup();
            let mut ids = Vec::new();
            for (i, d) in durations.iter().enumerate() {
                let request = lifecycle.create(new_request(RequestKind::Age, *d)).unwrap();
                if accept_mask[i] {
                    lifecycle.accept(&request.id).unwrap();
                }
                ids.push(request.id);
            }
            clock.advance(advance_s * 1000);

            lifecycle.reconcile_expired().unwrap();
            let once: Vec<_> = ids.iter().map(|id| lifecycle.get(id).unwrap()).collect();
            prop_assert_eq!(lifecycle.reconcile_expired().unwrap(), 0);
            let twice: Vec<_> = ids.iter().map(|id| lifecycle.get(id).unwrap()).collect();
            prop_assert_eq!(once, twice);
        }
    }
}
