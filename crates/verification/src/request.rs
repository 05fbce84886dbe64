//! Verification request model and its state machine.
//!
//! # State Transitions
//!
//! ```text
//! Pending
//!     ├─ (accept) → Accepted
//!     │                ├─ (timer_end passes) → Expired
//!     │                └─ (proof verified)   → Verified
//!     └─ (deny)   → Denied
//! ```
//!
//! `Denied`, `Expired` and `Verified` are terminal. Nothing returns to
//! `Pending`; a retry needs a new request.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zkgps_core::{GeoCoordinate, ProofId, RequestId};
use zkgps_crypto::{CircuitId, Groth16Proof};

use crate::error::{VerificationError, VerificationResult};

/// What a request asks the user to prove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Age,
    Location,
    AgeAndLocation,
}

impl RequestKind {
    /// Proof types that must all verify before the request is `Verified`.
    pub fn required_proofs(&self) -> &'static [ProofType] {
        match self {
            RequestKind::Age => &[ProofType::Age],
            RequestKind::Location => &[ProofType::Location],
            RequestKind::AgeAndLocation => &[ProofType::Age, ProofType::Location],
        }
    }

    pub fn admits(&self, proof_type: ProofType) -> bool {
        self.required_proofs().contains(&proof_type)
    }

    pub fn needs_geofence(&self) -> bool {
        self.admits(ProofType::Location)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Age => "age",
            RequestKind::Location => "location",
            RequestKind::AgeAndLocation => "age_and_location",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = VerificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "age" => Ok(RequestKind::Age),
            "location" => Ok(RequestKind::Location),
            "age_and_location" | "both" => Ok(RequestKind::AgeAndLocation),
            other => Err(VerificationError::InvalidArgument(format!(
                "unknown request kind: {}",
                other
            ))),
        }
    }
}

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Denied,
    Expired,
    Verified,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Denied => "denied",
            RequestStatus::Expired => "expired",
            RequestStatus::Verified => "verified",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Denied | RequestStatus::Expired | RequestStatus::Verified
        )
    }

    /// Whether the machine has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::Accepted)
                | (RequestStatus::Pending, RequestStatus::Denied)
                | (RequestStatus::Accepted, RequestStatus::Expired)
                | (RequestStatus::Accepted, RequestStatus::Verified)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = VerificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "denied" => Ok(RequestStatus::Denied),
            "expired" => Ok(RequestStatus::Expired),
            "verified" => Ok(RequestStatus::Verified),
            other => Err(VerificationError::InvalidArgument(format!(
                "unknown request status: {}",
                other
            ))),
        }
    }
}

/// Informational proof substate, independent of [`RequestStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofStatus {
    Awaited,
    Generated,
    Verified,
    Failed,
}

impl fmt::Display for ProofStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProofStatus::Awaited => "awaited",
            ProofStatus::Generated => "generated",
            ProofStatus::Verified => "verified",
            ProofStatus::Failed => "failed",
        };
        f.pad(s)
    }
}

/// Kind of a single proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofType {
    Age,
    Location,
}

impl ProofType {
    pub fn circuit(&self) -> CircuitId {
        match self {
            ProofType::Age => CircuitId::Age,
            ProofType::Location => CircuitId::Location,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.circuit().tag()
    }
}

impl fmt::Display for ProofType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ProofType {
    type Err = VerificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "age" => Ok(ProofType::Age),
            "location" => Ok(ProofType::Location),
            other => Err(VerificationError::InvalidArgument(format!(
                "unknown proof type: {}",
                other
            ))),
        }
    }
}

/// Circular region a location proof must fall inside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    pub center: GeoCoordinate,
    pub radius_km: f64,
}

/// Which side of a request a party is on, for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyRole {
    User,
    Provider,
    /// Either side
    Any,
}

impl PartyRole {
    pub fn matches(&self, request: &VerificationRequest, party: &str) -> bool {
        match self {
            PartyRole::User => request.user_id == party,
            PartyRole::Provider => request.provider_id == party,
            PartyRole::Any => request.user_id == party || request.provider_id == party,
        }
    }
}

impl FromStr for PartyRole {
    type Err = VerificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(PartyRole::User),
            "provider" => Ok(PartyRole::Provider),
            "any" | "both" => Ok(PartyRole::Any),
            other => Err(VerificationError::InvalidArgument(format!(
                "unknown role: {}",
                other
            ))),
        }
    }
}

/// Caller-supplied fields of a new request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRequest {
    pub provider_id: String,
    pub user_id: String,
    pub kind: RequestKind,
    pub duration_seconds: i64,
    #[serde(default)]
    pub geofence: Option<Geofence>,
    #[serde(default)]
    pub session_token: Option<String>,
}

/// A verification request between a provider and a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub id: RequestId,
    pub session_token: Option<String>,
    pub provider_id: String,
    pub user_id: String,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub duration_seconds: i64,
    /// Creation time (Unix milliseconds)
    pub created_at: u64,
    /// Set once, on acceptance
    pub accepted_at: Option<u64>,
    /// `accepted_at + duration_seconds`, set once, on acceptance
    pub timer_end: Option<u64>,
    /// Decimal nonce echoed by age proofs
    pub challenge: String,
    pub geofence: Option<Geofence>,
    pub proof_status: ProofStatus,
    pub proof_id: Option<ProofId>,
    /// Proof types verified so far
    #[serde(default)]
    pub verified_components: Vec<ProofType>,
    pub verified_at: Option<u64>,
    pub tx_hash: Option<String>,
}

/// Fresh request challenge: 16 random bytes as a decimal integer.
pub fn new_challenge() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    u128::from_be_bytes(bytes).to_string()
}

impl VerificationRequest {
    /// Build a `Pending` request. Validation is the lifecycle manager's job.
    pub fn pending(new: NewRequest, now_ms: u64) -> Self {
        Self {
            id: RequestId::generate(),
            session_token: new.session_token,
            provider_id: new.provider_id,
            user_id: new.user_id,
            kind: new.kind,
            status: RequestStatus::Pending,
            duration_seconds: new.duration_seconds,
            created_at: now_ms,
            accepted_at: None,
            timer_end: None,
            challenge: new_challenge(),
            geofence: new.geofence,
            proof_status: ProofStatus::Awaited,
            proof_id: None,
            verified_components: Vec::new(),
            verified_at: None,
            tx_hash: None,
        }
    }

    fn require(&self, expected: RequestStatus, operation: &'static str) -> VerificationResult<()> {
        if self.status != expected {
            return Err(VerificationError::invalid_state(
                &self.id,
                operation,
                self.status,
            ));
        }
        Ok(())
    }

    /// Pending → Accepted; starts the acceptance window.
    pub fn on_accept(&mut self, now_ms: u64) -> VerificationResult<()> {
        self.require(RequestStatus::Pending, "accept")?;
        let window_ms = (self.duration_seconds.max(0) as u64).saturating_mul(1000);
        self.status = RequestStatus::Accepted;
        self.accepted_at = Some(now_ms);
        self.timer_end = Some(now_ms.saturating_add(window_ms));
        Ok(())
    }

    /// Pending → Denied.
    pub fn on_deny(&mut self) -> VerificationResult<()> {
        self.require(RequestStatus::Pending, "deny")?;
        self.status = RequestStatus::Denied;
        Ok(())
    }

    /// Whether the acceptance window has closed at `now_ms`.
    pub fn is_due_for_expiry(&self, now_ms: u64) -> bool {
        self.status == RequestStatus::Accepted
            && self.timer_end.map(|end| end < now_ms).unwrap_or(false)
    }

    /// Accepted → Expired if the window has closed. Returns whether it moved.
    pub fn expire_if_due(&mut self, now_ms: u64) -> bool {
        if self.is_due_for_expiry(now_ms) {
            self.status = RequestStatus::Expired;
            true
        } else {
            false
        }
    }

    /// Record a verified component; Accepted → Verified once every
    /// required proof type has verified. Returns whether it moved.
    pub fn on_component_verified(
        &mut self,
        proof_type: ProofType,
        proof_id: Option<ProofId>,
        now_ms: u64,
    ) -> VerificationResult<bool> {
        self.require(RequestStatus::Accepted, "verify")?;
        if !self.kind.admits(proof_type) {
            return Err(VerificationError::InvalidArgument(format!(
                "{} request does not take a {} proof",
                self.kind, proof_type
            )));
        }

        if !self.verified_components.contains(&proof_type) {
            self.verified_components.push(proof_type);
            self.verified_components.sort();
        }
        if proof_id.is_some() {
            self.proof_id = proof_id;
        }

        let complete = self
            .kind
            .required_proofs()
            .iter()
            .all(|t| self.verified_components.contains(t));
        if complete {
            self.status = RequestStatus::Verified;
            self.proof_status = ProofStatus::Verified;
            self.verified_at = Some(now_ms);
        } else {
            self.proof_status = ProofStatus::Generated;
        }
        Ok(complete)
    }
}

/// On-chain verification attached to a proof after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainVerification {
    pub verified_on_chain: bool,
    pub tx_hash: String,
    pub on_chain_verification_id: String,
    pub submitted_at: u64,
}

/// A generated proof.
///
/// Holds no private attributes: only the proof and its public signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRecord {
    pub id: ProofId,
    pub user_id: String,
    pub request_id: Option<RequestId>,
    pub proof_type: ProofType,
    pub proof: Groth16Proof,
    pub public_signals: Vec<String>,
    pub verified_locally: bool,
    pub created_at: u64,
    #[serde(default)]
    pub on_chain: Option<OnChainVerification>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_request(kind: RequestKind) -> VerificationRequest {
        VerificationRequest::pending(
            NewRequest {
                provider_id: "provider".into(),
                user_id: "user".into(),
                kind,
                duration_seconds: 60,
                geofence: None,
                session_token: None,
            },
            1_000,
        )
    }

    #[test]
    fn test_accept_sets_window_once() {
        let mut request = new_request(RequestKind::Age);
        request.on_accept(5_000).unwrap();
        assert_eq!(request.status, RequestStatus::Accepted);
        assert_eq!(request.accepted_at, Some(5_000));
        assert_eq!(request.timer_end, Some(65_000));

        let err = request.on_accept(9_000).unwrap_err();
        assert!(matches!(
            err,
            VerificationError::InvalidState {
                state: RequestStatus::Accepted,
                ..
            }
        ));
        assert_eq!(request.timer_end, Some(65_000));
    }

    #[test]
    fn test_deny_only_from_pending() {
        let mut request = new_request(RequestKind::Age);
        request.on_deny().unwrap();
        assert_eq!(request.status, RequestStatus::Denied);
        assert!(request.on_accept(1).is_err());
        assert!(request.on_deny().is_err());
    }

    #[test]
    fn test_expiry_is_strictly_after_timer_end() {
        let mut request = new_request(RequestKind::Age);
        request.on_accept(0).unwrap();
        assert!(!request.expire_if_due(60_000));
        assert!(request.expire_if_due(60_001));
        assert_eq!(request.status, RequestStatus::Expired);
        assert!(!request.expire_if_due(120_000));
    }

    #[test]
    fn test_combined_request_needs_both_components() {
        let mut request = new_request(RequestKind::AgeAndLocation);
        request.on_accept(0).unwrap();

        let done = request
            .on_component_verified(ProofType::Age, Some(ProofId::from("p1")), 10)
            .unwrap();
        assert!(!done);
        assert_eq!(request.status, RequestStatus::Accepted);

        let done = request
            .on_component_verified(ProofType::Location, Some(ProofId::from("p2")), 20)
            .unwrap();
        assert!(done);
        assert_eq!(request.status, RequestStatus::Verified);
        assert_eq!(request.proof_status, ProofStatus::Verified);
        assert_eq!(request.verified_at, Some(20));
        assert_eq!(request.proof_id, Some(ProofId::from("p2")));
    }

    #[test]
    fn test_wrong_component_rejected() {
        let mut request = new_request(RequestKind::Age);
        request.on_accept(0).unwrap();
        assert!(matches!(
            request.on_component_verified(ProofType::Location, None, 1),
            Err(VerificationError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_transition_table() {
        use RequestStatus::*;
        let all = [Pending, Accepted, Denied, Expired, Verified];
        let allowed = [
            (Pending, Accepted),
            (Pending, Denied),
            (Accepted, Expired),
            (Accepted, Verified),
        ];
        for from in all {
            for to in all {
                assert_eq!(from.can_transition_to(to), allowed.contains(&(from, to)));
            }
        }
        assert!(all.iter().filter(|s| s.is_terminal()).count() == 3);
    }

    #[test]
    fn test_challenge_is_decimal() {
        let challenge = new_challenge();
        assert!(!challenge.is_empty());
        assert!(challenge.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&RequestStatus::Expired).unwrap();
        assert_eq!(json, "\"expired\"");
        assert_eq!("age_and_location".parse::<RequestKind>().unwrap(), RequestKind::AgeAndLocation);
    }
}
