//! Conversion of off-chain proofs into verifier-contract calldata.
//!
//! The on-chain Groth16 verifier takes `(pA, pB, pC, pubSignals)` as
//! integers. G2 coordinates are stored by the prover as `[c0, c1]` but the
//! pairing precompile expects `[c1, c0]`, so each inner pair of `pB` is
//! swapped. Nothing else is reordered.

use num_bigint::BigUint;
use serde_json::{json, Value};

use super::error::{ZkError, ZkResult};
use super::field::{base_modulus, parse_decimal, scalar_modulus};
use super::proof::Groth16Proof;

/// Width of the on-chain request identifier.
pub const ONCHAIN_ID_BYTES: usize = 32;

/// Verifier-contract arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainCalldata {
    pub p_a: [BigUint; 2],
    pub p_b: [[BigUint; 2]; 2],
    pub p_c: [BigUint; 2],
    pub pub_signals: Vec<BigUint>,
}

impl OnChainCalldata {
    /// ABI head words in argument order: `pA`, `pB`, `pC`, then signals.
    pub fn to_abi_words(&self) -> Vec<[u8; 32]> {
        let mut words = Vec::with_capacity(8 + self.pub_signals.len());
        words.extend(self.p_a.iter().map(word));
        for pair in &self.p_b {
            words.extend(pair.iter().map(word));
        }
        words.extend(self.p_c.iter().map(word));
        words.extend(self.pub_signals.iter().map(word));
        words
    }

    /// Arguments as decimal strings, in the shape wallet libraries accept.
    pub fn to_json(&self) -> Value {
        let dec = |v: &BigUint| v.to_str_radix(10);
        json!({
            "pA": self.p_a.iter().map(dec).collect::<Vec<_>>(),
            "pB": self
                .p_b
                .iter()
                .map(|pair| pair.iter().map(dec).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
            "pC": self.p_c.iter().map(dec).collect::<Vec<_>>(),
            "pubSignals": self.pub_signals.iter().map(dec).collect::<Vec<_>>(),
        })
    }
}

fn word(value: &BigUint) -> [u8; 32] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; 32];
    // callers only pass field elements, which are < 2^254
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}

fn coordinate(value: &str, what: &str) -> ZkResult<BigUint> {
    let parsed = parse_decimal(value)
        .map_err(|_| ZkError::InvalidInput(format!("{} is not a decimal integer: {:?}", what, value)))?;
    if &parsed >= base_modulus() {
        return Err(ZkError::InvalidInput(format!(
            "{} is outside the base field",
            what
        )));
    }
    Ok(parsed)
}

/// Convert a proof and its public signals into verifier calldata.
pub fn to_on_chain_calldata(
    proof: &Groth16Proof,
    public_signals: &[String],
) -> ZkResult<OnChainCalldata> {
    proof
        .check_shape()
        .map_err(|e| ZkError::InvalidInput(e.to_string()))?;

    let p_a = [
        coordinate(&proof.pi_a[0], "pi_a[0]")?,
        coordinate(&proof.pi_a[1], "pi_a[1]")?,
    ];
    let b = &proof.pi_b;
    let p_b = [
        [
            coordinate(&b[0][1], "pi_b[0][1]")?,
            coordinate(&b[0][0], "pi_b[0][0]")?,
        ],
        [
            coordinate(&b[1][1], "pi_b[1][1]")?,
            coordinate(&b[1][0], "pi_b[1][0]")?,
        ],
    ];
    let p_c = [
        coordinate(&proof.pi_c[0], "pi_c[0]")?,
        coordinate(&proof.pi_c[1], "pi_c[1]")?,
    ];

    let pub_signals = public_signals
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let value = parse_decimal(s).map_err(|_| {
                ZkError::InvalidInput(format!("public signal {} is not a decimal integer", i))
            })?;
            if &value >= scalar_modulus() {
                return Err(ZkError::InvalidInput(format!(
                    "public signal {} is outside the scalar field",
                    i
                )));
            }
            Ok(value)
        })
        .collect::<ZkResult<Vec<_>>>()?;

    Ok(OnChainCalldata {
        p_a,
        p_b,
        p_c,
        pub_signals,
    })
}

/// Derive the 32-byte on-chain request identifier.
///
/// The hex identifier is decoded and left-padded with zeros. An optional
/// `0x` prefix is accepted; odd-length input gets a leading zero nibble.
pub fn onchain_request_id(request_id: &str) -> ZkResult<[u8; ONCHAIN_ID_BYTES]> {
    let digits = request_id
        .strip_prefix("0x")
        .or_else(|| request_id.strip_prefix("0X"))
        .unwrap_or(request_id);
    if digits.is_empty() {
        return Err(ZkError::InvalidInput("request id is empty".to_string()));
    }
    let normalized = if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };
    let bytes = hex::decode(&normalized)
        .map_err(|e| ZkError::InvalidInput(format!("request id is not hex: {}", e)))?;
    if bytes.len() > ONCHAIN_ID_BYTES {
        return Err(ZkError::IdentifierTooLong {
            len: bytes.len(),
            max: ONCHAIN_ID_BYTES,
        });
    }

    let mut out = [0u8; ONCHAIN_ID_BYTES];
    out[ONCHAIN_ID_BYTES - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// `0x`-prefixed hex form of [`onchain_request_id`].
pub fn onchain_request_id_hex(request_id: &str) -> ZkResult<String> {
    Ok(format!("0x{}", hex::encode(onchain_request_id(request_id)?)))
}
