//! Replay and binding rejection tests
//!
//! A proof is only accepted for the request whose challenge and geofence
//! it carries. These tests move proofs between requests and tamper with
//! their public signals.

use crate::test_utils::*;
use zkgps_crypto::zk::signals;
use zkgps_verification::{ProofStatus, ProofType, RequestKind, RequestStatus, VerificationError};

#[tokio::test]
async fn test_age_proof_replayed_on_another_request_is_rejected() {
    let h = harness();
    let user = "user-arjun";
    let first = h.accepted_request(user, RequestKind::Age);
    let second = h.accepted_request(user, RequestKind::Age);

    let record = h
        .service
        .generate_proof(user, Some(&first), adult_age())
        .await
        .unwrap();

    // Valid proof, wrong challenge
    let ok = h
        .service
        .verify_proof(
            Some(&second),
            ProofType::Age,
            &record.proof,
            &record.public_signals,
        )
        .await
        .unwrap();
    assert!(!ok);
    assert_eq!(
        h.service.get_request(&second).unwrap().proof_status,
        ProofStatus::Failed
    );

    // The original request still accepts it
    assert!(h
        .service
        .verify_proof(
            Some(&first),
            ProofType::Age,
            &record.proof,
            &record.public_signals
        )
        .await
        .unwrap());
}

#[tokio::test]
async fn test_tampered_result_flag_fails_backend_check() {
    let h = harness();
    let request_id = h.accepted_request("user-isha", RequestKind::Age);
    let record = h
        .service
        .generate_proof("user-isha", Some(&request_id), minor_age())
        .await
        .unwrap();

    let mut forged = record.public_signals.clone();
    forged[signals::RESULT] = "1".to_string();
    let ok = h
        .service
        .verify_proof(Some(&request_id), ProofType::Age, &record.proof, &forged)
        .await
        .unwrap();
    assert!(!ok);
    assert_eq!(
        h.service.get_request(&request_id).unwrap().status,
        RequestStatus::Accepted
    );
}

#[tokio::test]
async fn test_location_proof_for_other_venue_is_rejected() {
    let h = harness();
    let user = "user-rohan";
    let request_id = h.accepted_request(user, RequestKind::Location);

    // Proven inside a fence the user picked, not the provider's
    let record = h
        .service
        .generate_proof(
            user,
            None,
            zkgps_verification::RawAttributes::Location {
                position: near_venue(),
                geofence: Some(zkgps_verification::Geofence {
                    center: near_venue(),
                    radius_km: 50.0,
                }),
            },
        )
        .await
        .unwrap();
    assert_eq!(record.public_signals[signals::RESULT], "1");

    let ok = h
        .service
        .verify_proof(
            Some(&request_id),
            ProofType::Location,
            &record.proof,
            &record.public_signals,
        )
        .await
        .unwrap();
    assert!(!ok);
}

#[tokio::test]
async fn test_proof_type_must_match_request_kind() {
    let h = harness();
    let request_id = h.accepted_request("user-tara", RequestKind::Age);

    let err = h
        .service
        .generate_proof("user-tara", Some(&request_id), at(near_venue()))
        .await
        .unwrap_err();
    assert!(matches!(err, VerificationError::InvalidArgument(_)));

    let err = h
        .service
        .generate_proof("someone-else", Some(&request_id), adult_age())
        .await
        .unwrap_err();
    assert!(matches!(err, VerificationError::InvalidArgument(_)));
    assert_eq!(h.backend.prove_calls(), 0);
}

#[tokio::test]
async fn test_verified_request_refuses_further_proofs() {
    let h = harness();
    let request_id = h.accepted_request("user-nina", RequestKind::Age);
    let record = h
        .service
        .generate_proof("user-nina", Some(&request_id), adult_age())
        .await
        .unwrap();
    assert!(h
        .service
        .verify_proof(
            Some(&request_id),
            ProofType::Age,
            &record.proof,
            &record.public_signals
        )
        .await
        .unwrap());

    let err = h
        .service
        .verify_proof(
            Some(&request_id),
            ProofType::Age,
            &record.proof,
            &record.public_signals,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VerificationError::InvalidState {
            state: RequestStatus::Verified,
            ..
        }
    ));
}
