//! Groth16 proof containers.
//!
//! Proofs are carried exactly as the proving backend emits them: decimal
//! strings in projective form (`pi_a = [x, y, "1"]`, `pi_b` a list of
//! `[c0, c1]` pairs). Nothing here interprets the numbers; see
//! [`super::calldata`] for the one place they are converted.

use serde::{Deserialize, Serialize};

use super::error::{ZkError, ZkResult};

pub const PROTOCOL_GROTH16: &str = "groth16";
pub const CURVE_BN128: &str = "bn128";

fn default_protocol() -> String {
    PROTOCOL_GROTH16.to_string()
}

fn default_curve() -> String {
    CURVE_BN128.to_string()
}

/// Zero-Knowledge proof output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Groth16Proof {
    /// Proof component A (G1)
    pub pi_a: Vec<String>,
    /// Proof component B (G2, one `[c0, c1]` pair per coordinate)
    pub pi_b: Vec<Vec<String>>,
    /// Proof component C (G1)
    pub pi_c: Vec<String>,
    /// Protocol identifier (e.g., "groth16")
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Elliptic curve identifier (e.g., "bn128")
    #[serde(default = "default_curve")]
    pub curve: String,
}

impl Groth16Proof {
    /// Check the proof has the Groth16/BN254 shape.
    pub fn check_shape(&self) -> ZkResult<()> {
        if self.protocol != PROTOCOL_GROTH16 {
            return Err(ZkError::VerificationFailed(format!(
                "Unsupported protocol: {}",
                self.protocol
            )));
        }
        if self.curve != CURVE_BN128 && self.curve != "bn254" {
            return Err(ZkError::VerificationFailed(format!(
                "Unsupported curve: {}",
                self.curve
            )));
        }
        if self.pi_a.len() < 2 {
            return Err(ZkError::VerificationFailed(format!(
                "Invalid pi_a: expected at least 2 coordinates, got {}",
                self.pi_a.len()
            )));
        }
        if self.pi_b.len() < 2 || self.pi_b.iter().take(2).any(|pair| pair.len() != 2) {
            return Err(ZkError::VerificationFailed(
                "Invalid pi_b: expected two [c0, c1] coordinate pairs".to_string(),
            ));
        }
        if self.pi_c.len() < 2 {
            return Err(ZkError::VerificationFailed(format!(
                "Invalid pi_c: expected at least 2 coordinates, got {}",
                self.pi_c.len()
            )));
        }
        Ok(())
    }
}

/// A proof together with the public signals it was produced for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofBundle {
    pub proof: Groth16Proof,
    pub public_signals: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Groth16Proof {
        Groth16Proof {
            pi_a: vec!["1".into(), "2".into(), "1".into()],
            pi_b: vec![
                vec!["3".into(), "4".into()],
                vec!["5".into(), "6".into()],
                vec!["1".into(), "0".into()],
            ],
            pi_c: vec!["7".into(), "8".into(), "1".into()],
            protocol: PROTOCOL_GROTH16.into(),
            curve: CURVE_BN128.into(),
        }
    }

    #[test]
    fn test_shape_accepts_projective_form() {
        assert!(sample().check_shape().is_ok());
    }

    #[test]
    fn test_shape_rejects_wrong_protocol() {
        let mut proof = sample();
        proof.protocol = "plonk".into();
        assert!(matches!(
            proof.check_shape(),
            Err(ZkError::VerificationFailed(_))
        ));
    }

    #[test]
    fn test_shape_rejects_short_b() {
        let mut proof = sample();
        proof.pi_b[1].pop();
        assert!(proof.check_shape().is_err());
    }

    #[test]
    fn test_deserialize_defaults_protocol_and_curve() {
        let proof: Groth16Proof = serde_json::from_str(
            r#"{"pi_a":["1","2"],"pi_b":[["3","4"],["5","6"]],"pi_c":["7","8"]}"#,
        )
        .unwrap();
        assert_eq!(proof.protocol, "groth16");
        assert_eq!(proof.curve, "bn128");
    }
}
