//! Proving and verifying backends.
//!
//! The pipeline talks to a [`ZkBackend`] only; which prover sits behind it
//! (an external `snarkjs` process, or [`MockBackend`] in tests) is wiring.

use async_trait::async_trait;
use num_bigint::{BigInt, BigUint};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use super::circuit::{signals, CircuitId};
use super::error::{ZkError, ZkResult};
use super::field::{base_modulus, to_field_string};
use super::inputs::{radius_threshold, CircuitInput};
use super::proof::{Groth16Proof, ProofBundle, CURVE_BN128, PROTOCOL_GROTH16};

/// Trait for ZK proof generation and verification (dependency injection)
#[async_trait]
pub trait ZkBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Run the circuit named by `input.circuit()` and prove the execution.
    ///
    /// May take seconds. Dropping the returned future abandons the work.
    async fn prove(&self, input: &CircuitInput) -> ZkResult<ProofBundle>;

    /// Check `proof` against the circuit's verification key.
    ///
    /// A malformed or non-matching proof yields `Ok(false)`; `Err` is
    /// reserved for the verifier itself being unusable.
    async fn verify(
        &self,
        circuit: CircuitId,
        public_signals: &[String],
        proof: &Groth16Proof,
    ) -> ZkResult<bool>;
}

#[derive(Debug, Clone)]
enum MockBehaviour {
    Honest,
    FailProving(String),
    VerificationKeyMismatch,
}

/// In-process circuit emulation (TESTING ONLY)
///
/// Evaluates the age and location statements in Rust and emits proofs whose
/// points are BLAKE3 commitments to the circuit and public signals under a
/// per-circuit key. Structurally valid, cryptographically meaningless, but
/// any change to the signals makes verification fail.
#[derive(Debug)]
pub struct MockBackend {
    min_age: u32,
    behaviour: MockBehaviour,
    delay: Option<Duration>,
    prove_calls: AtomicUsize,
}

const MOCK_PROVING_CONTEXT: &str = "zkgps mock groth16 proving key v1";
const MOCK_MISMATCHED_CONTEXT: &str = "zkgps mock groth16 stale verification key";

impl MockBackend {
    /// Honest mock enforcing the given age threshold.
    pub fn new(min_age: u32) -> Self {
        Self {
            min_age,
            behaviour: MockBehaviour::Honest,
            delay: None,
            prove_calls: AtomicUsize::new(0),
        }
    }

    /// Every proving call fails with `reason`.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.behaviour = MockBehaviour::FailProving(reason.into());
        self
    }

    /// Verification uses a key that does not match the proving key.
    pub fn with_mismatched_verification_key(mut self) -> Self {
        self.behaviour = MockBehaviour::VerificationKeyMismatch;
        self
    }

    /// Delay every proving call, to exercise timeouts and cancellation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of proving calls started so far.
    pub fn prove_calls(&self) -> usize {
        self.prove_calls.load(Ordering::SeqCst)
    }

    fn evaluate(&self, input: &CircuitInput) -> ZkResult<Vec<String>> {
        match input.circuit() {
            CircuitId::Age => {
                let birth_year = input.require("birthYear")?;
                input.require("birthMonth")?;
                input.require("birthDay")?;
                let reference_year = input.require("referenceYear")?;
                let challenge = input.require("challenge")?;

                let above = reference_year - birth_year >= BigInt::from(self.min_age);
                Ok(vec![
                    flag(above),
                    to_field_string(challenge),
                    to_field_string(reference_year),
                ])
            }
            CircuitId::Location => {
                let encoding = CircuitId::Location.radius_encoding().ok_or_else(|| {
                    ZkError::InvalidInput("location circuit has no radius encoding".to_string())
                })?;
                let user_lat = input.require("userLat")?;
                let user_lon = input.require("userLon")?;
                let provider_lat = input.require("providerLat")?;
                let provider_lon = input.require("providerLon")?;
                let radius = input.require(encoding.field_name())?;

                let dlat = user_lat - provider_lat;
                let dlon = user_lon - provider_lon;
                let distance_sq = &dlat * &dlat + &dlon * &dlon;
                let within = distance_sq <= radius_threshold(encoding, radius);

                Ok(vec![
                    flag(within),
                    to_field_string(provider_lat),
                    to_field_string(provider_lon),
                    to_field_string(radius),
                ])
            }
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(18)
    }
}

fn flag(value: bool) -> String {
    let bit = if value { "1" } else { "0" };
    bit.to_string()
}

/// Deterministic proof points committing to `(circuit, public_signals)`.
fn mock_proof(context: &str, circuit: CircuitId, public_signals: &[String]) -> Groth16Proof {
    let key = blake3::derive_key(context, circuit.tag().as_bytes());
    let coordinate = |index: u8| -> String {
        let mut hasher = blake3::Hasher::new_keyed(&key);
        hasher.update(&[index]);
        for signal in public_signals {
            hasher.update(signal.as_bytes());
            hasher.update(&[0]);
        }
        let value = BigUint::from_bytes_be(hasher.finalize().as_bytes()) % base_modulus();
        value.to_str_radix(10)
    };

    Groth16Proof {
        pi_a: vec![coordinate(0), coordinate(1), "1".to_string()],
        pi_b: vec![
            vec![coordinate(2), coordinate(3)],
            vec![coordinate(4), coordinate(5)],
            vec!["1".to_string(), "0".to_string()],
        ],
        pi_c: vec![coordinate(6), coordinate(7), "1".to_string()],
        protocol: PROTOCOL_GROTH16.to_string(),
        curve: CURVE_BN128.to_string(),
    }
}

#[async_trait]
impl ZkBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn prove(&self, input: &CircuitInput) -> ZkResult<ProofBundle> {
        self.prove_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let MockBehaviour::FailProving(reason) = &self.behaviour {
            return Err(ZkError::ProofGenerationFailed(reason.clone()));
        }

        let public_signals = self.evaluate(input)?;
        let proof = mock_proof(MOCK_PROVING_CONTEXT, input.circuit(), &public_signals);
        debug!(circuit = %input.circuit(), "Mock proof generated");

        Ok(ProofBundle {
            proof,
            public_signals,
        })
    }

    async fn verify(
        &self,
        circuit: CircuitId,
        public_signals: &[String],
        proof: &Groth16Proof,
    ) -> ZkResult<bool> {
        if proof.check_shape().is_err() || public_signals.len() != circuit.public_signal_count() {
            return Ok(false);
        }
        if public_signals.get(signals::RESULT).is_none() {
            return Ok(false);
        }

        let context = match self.behaviour {
            MockBehaviour::VerificationKeyMismatch => MOCK_MISMATCHED_CONTEXT,
            _ => MOCK_PROVING_CONTEXT,
        };
        let expected = mock_proof(context, circuit, public_signals);

        Ok(expected.pi_a[..2] == proof.pi_a[..2]
            && expected.pi_b[..2] == proof.pi_b[..2]
            && expected.pi_c[..2] == proof.pi_c[..2])
    }
}
