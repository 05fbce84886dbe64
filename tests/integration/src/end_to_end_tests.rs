//! End-to-End Request Protocol Integration Tests
//!
//! This test suite validates the complete provider/user workflow:
//! 1. Provider creates a request, user accepts it
//! 2. User generates age and location proofs bound to the request
//! 3. Provider verifies both proofs and the request becomes verified
//! 4. A proof is exported as calldata and submitted on chain

use crate::test_utils::*;
use zkgps_core::GeoCoordinate;
use zkgps_crypto::zk::signals;
use zkgps_crypto::onchain_request_id;
use zkgps_verification::{
    PartyRole, ProofStatus, ProofType, RequestKind, RequestStatus, VerificationError,
};

#[tokio::test]
async fn test_age_and_location_request_end_to_end() {
    let h = harness();
    let user = "user-priya";

    // Step 1: Provider asks, user accepts
    let request_id = h.accepted_request(user, RequestKind::AgeAndLocation);
    let pending = h.service.list_requests(PROVIDER_ID, PartyRole::Provider).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, RequestStatus::Accepted);

    // Step 2: User proves both components
    let age = h
        .service
        .generate_proof(user, Some(&request_id), adult_age())
        .await
        .unwrap();
    let location = h
        .service
        .generate_proof(user, Some(&request_id), at(near_venue()))
        .await
        .unwrap();
    assert_eq!(h.backend.prove_calls(), 2);
    assert_eq!(
        h.service.get_request(&request_id).unwrap().proof_status,
        ProofStatus::Generated
    );

    // Step 3: Provider verifies, the request stays open until both pass
    assert!(h
        .service
        .verify_proof(Some(&request_id), ProofType::Age, &age.proof, &age.public_signals)
        .await
        .unwrap());
    let partial = h.service.get_request(&request_id).unwrap();
    assert_eq!(partial.status, RequestStatus::Accepted);
    assert_eq!(partial.verified_components, vec![ProofType::Age]);

    assert!(h
        .service
        .verify_proof(
            Some(&request_id),
            ProofType::Location,
            &location.proof,
            &location.public_signals
        )
        .await
        .unwrap());
    let done = h.service.get_request(&request_id).unwrap();
    assert_eq!(done.status, RequestStatus::Verified);
    assert_eq!(done.verified_at, Some(START_MS));
    assert_eq!(done.proof_id.as_ref(), Some(&location.id));

    // Step 4: Calldata and on-chain submission
    let calldata = h.service.pipeline().calldata(&age.id).unwrap();
    let json = calldata.to_json();
    assert_eq!(json["pubSignals"][signals::RESULT], "1");

    let verifier = RecordingVerifier::default();
    let submitted = h.service.submit_on_chain(&age.id, &verifier).await.unwrap();
    let on_chain = submitted.on_chain.expect("on-chain result attached");
    assert!(on_chain.verified_on_chain);

    let submissions = verifier.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(
        submissions[0].onchain_request_id,
        onchain_request_id(request_id.as_str()).unwrap()
    );
    assert_eq!(
        h.service.get_request(&request_id).unwrap().tx_hash,
        Some(on_chain.tx_hash.clone())
    );

    // Resubmitting a proof verified on chain does not call the contract again
    h.service.submit_on_chain(&age.id, &verifier).await.unwrap();
    assert_eq!(verifier.calls(), 1);
}

#[tokio::test]
async fn test_minor_proof_is_rejected_by_provider() {
    let h = harness();
    let request_id = h.accepted_request("user-kabir", RequestKind::Age);

    let record = h
        .service
        .generate_proof("user-kabir", Some(&request_id), minor_age())
        .await
        .unwrap();
    assert_eq!(record.public_signals[signals::RESULT], "0");

    let ok = h
        .service
        .verify_proof(
            Some(&request_id),
            ProofType::Age,
            &record.proof,
            &record.public_signals,
        )
        .await
        .unwrap();
    assert!(!ok);

    let request = h.service.get_request(&request_id).unwrap();
    assert_eq!(request.status, RequestStatus::Accepted);
    assert_eq!(request.proof_status, ProofStatus::Failed);
}

#[tokio::test]
async fn test_denied_and_expired_requests_refuse_proofs() {
    let h = harness();

    let denied = h
        .service
        .create_request(zkgps_verification::NewRequest {
            provider_id: PROVIDER_ID.to_string(),
            user_id: "user-meera".to_string(),
            kind: RequestKind::Age,
            duration_seconds: 60,
            geofence: None,
            session_token: None,
        })
        .unwrap();
    h.service.deny_request(&denied.id).unwrap();
    let err = h
        .service
        .generate_proof("user-meera", Some(&denied.id), adult_age())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VerificationError::InvalidState {
            state: RequestStatus::Denied,
            ..
        }
    ));

    let expiring = h.accepted_request("user-meera", RequestKind::Location);
    h.clock.advance(300_001);
    let err = h
        .service
        .generate_proof("user-meera", Some(&expiring), at(near_venue()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VerificationError::InvalidState {
            state: RequestStatus::Expired,
            ..
        }
    ));
    assert_eq!(h.backend.prove_calls(), 0);
}

#[tokio::test]
async fn test_rejected_on_chain_submission_leaves_record_unverified() {
    let h = harness();
    let request_id = h.accepted_request("user-dev", RequestKind::Location);
    let record = h
        .service
        .generate_proof("user-dev", Some(&request_id), at(near_venue()))
        .await
        .unwrap();

    let verifier = RecordingVerifier::rejecting();
    let after = h.service.submit_on_chain(&record.id, &verifier).await.unwrap();
    assert!(after.on_chain.is_none());
    assert!(h.service.get_request(&request_id).unwrap().tx_hash.is_none());
}

#[tokio::test]
async fn test_unbound_proof_uses_caller_geofence() {
    let h = harness();
    let record = h
        .service
        .generate_proof(
            "user-anya",
            None,
            zkgps_verification::RawAttributes::Location {
                position: GeoCoordinate::new(28.6139, 77.2090).unwrap(),
                geofence: Some(zkgps_verification::Geofence {
                    center: venue(),
                    radius_km: 1.0,
                }),
            },
        )
        .await
        .unwrap();
    assert!(record.request_id.is_none());
    assert_eq!(record.public_signals[signals::RESULT], "0");

    // Unbound proofs derive their on-chain id from the proof id
    let verifier = RecordingVerifier::default();
    h.service.submit_on_chain(&record.id, &verifier).await.unwrap();
    assert_eq!(
        verifier.submissions()[0].onchain_request_id,
        onchain_request_id(record.id.as_str()).unwrap()
    );
}
