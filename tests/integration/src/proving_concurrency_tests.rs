//! Proving serialization, watchdog and cache tests

use crate::test_utils::*;
use std::time::Duration;
use zkgps_crypto::MockBackend;
use zkgps_verification::{ProofStatus, RequestKind, VerificationError};

#[tokio::test]
async fn test_concurrent_generation_proves_once() {
    let h = harness_with(
        MockBackend::new(18).with_delay(Duration::from_millis(50)),
        |_| {},
    );
    let request_id = h.accepted_request("user-zoya", RequestKind::Age);

    let (a, b) = tokio::join!(
        h.service
            .generate_proof("user-zoya", Some(&request_id), adult_age()),
        h.service
            .generate_proof("user-zoya", Some(&request_id), adult_age()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.id, b.id);
    assert_eq!(h.backend.prove_calls(), 1);
    assert_eq!(h.service.list_proofs("user-zoya").unwrap().len(), 1);
}

#[tokio::test]
async fn test_cached_proof_is_returned_without_proving() {
    let h = harness();
    let request_id = h.accepted_request("user-omar", RequestKind::Location);

    let first = h
        .service
        .generate_proof("user-omar", Some(&request_id), at(near_venue()))
        .await
        .unwrap();
    let second = h
        .service
        .generate_proof("user-omar", Some(&request_id), at(near_venue()))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(h.backend.prove_calls(), 1);
}

#[tokio::test]
async fn test_force_regenerate_bypasses_cache() {
    let h = harness_with(MockBackend::new(18), |c| {
        c.pipeline.force_regenerate = true;
    });
    let request_id = h.accepted_request("user-lee", RequestKind::Age);

    for _ in 0..2 {
        h.service
            .generate_proof("user-lee", Some(&request_id), adult_age())
            .await
            .unwrap();
    }
    assert_eq!(h.backend.prove_calls(), 2);
}

#[tokio::test]
async fn test_watchdog_marks_request_failed() {
    let h = harness_with(
        MockBackend::new(18).with_delay(Duration::from_millis(500)),
        |c| {
            c.pipeline.proving_timeout_ms = 20;
        },
    );
    let request_id = h.accepted_request("user-sam", RequestKind::Age);

    let err = h
        .service
        .generate_proof("user-sam", Some(&request_id), adult_age())
        .await
        .unwrap_err();
    assert!(matches!(err, VerificationError::ProvingFailed { .. }));
    assert!(err.is_retryable());
    assert_eq!(
        h.service.get_request(&request_id).unwrap().proof_status,
        ProofStatus::Failed
    );
}

#[tokio::test]
async fn test_abandoned_generation_marks_request_failed() {
    let h = harness_with(
        MockBackend::new(18).with_delay(Duration::from_millis(500)),
        |_| {},
    );
    let request_id = h.accepted_request("user-ada", RequestKind::Age);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        h.service
            .generate_proof("user-ada", Some(&request_id), adult_age()),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(
        h.service.get_request(&request_id).unwrap().proof_status,
        ProofStatus::Failed
    );
}

#[tokio::test]
async fn test_backend_failure_exposes_debug_input_when_enabled() {
    let h = harness_with(MockBackend::new(18).failing("witness mismatch"), |c| {
        c.pipeline.expose_debug_input = true;
    });
    let request_id = h.accepted_request("user-kai", RequestKind::Age);

    let err = h
        .service
        .generate_proof("user-kai", Some(&request_id), adult_age())
        .await
        .unwrap_err();
    match err {
        VerificationError::ProvingFailed {
            reason,
            debug_input,
        } => {
            assert!(reason.contains("witness mismatch"));
            let input = debug_input.expect("debug input attached");
            assert_eq!(input["birthYear"], "1990");
        }
        other => panic!("Expected ProvingFailed, got {:?}", other),
    }
}
