//! BN254 field bounds and decimal field-element handling.

use ark_ff::PrimeField;
use num_bigint::{BigInt, BigUint, Sign};
use std::sync::OnceLock;

use super::error::{ZkError, ZkResult};

/// Bit width of the BN254 scalar field.
pub const SCALAR_FIELD_BITS: u32 = <ark_bn254::Fr as PrimeField>::MODULUS_BIT_SIZE;

/// Modulus of the BN254 scalar field (circuit inputs and public signals).
pub fn scalar_modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| ark_bn254::Fr::MODULUS.into())
}

/// Modulus of the BN254 base field (proof point coordinates).
pub fn base_modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| ark_bn254::Fq::MODULUS.into())
}

/// Parse a strict base-10 unsigned integer (digits only, no sign or separators).
pub fn parse_decimal(value: &str) -> ZkResult<BigUint> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ZkError::InvalidInput(format!(
            "\"{}\" is not a base-10 unsigned integer",
            value
        )));
    }
    BigUint::parse_bytes(value.as_bytes(), 10)
        .ok_or_else(|| ZkError::InvalidInput(format!("\"{}\" is not a decimal integer", value)))
}

/// Parse an unsigned integer given either in decimal or as `0x`-prefixed hex.
pub fn parse_unsigned(value: &str) -> ZkResult<BigUint> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(digits) => {
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ZkError::InvalidInput(format!(
                    "\"{}\" is not a hex integer",
                    value
                )));
            }
            BigUint::parse_bytes(digits.as_bytes(), 16)
                .ok_or_else(|| ZkError::InvalidInput(format!("\"{}\" is not a hex integer", value)))
        }
        None => parse_decimal(value),
    }
}

/// Check that `value` is a canonical element of the scalar field.
pub fn ensure_scalar(value: &BigUint, what: &str) -> ZkResult<()> {
    if value >= scalar_modulus() {
        return Err(ZkError::EncodingOverflow(format!(
            "{} does not fit the {}-bit scalar field",
            what, SCALAR_FIELD_BITS
        )));
    }
    Ok(())
}

/// Reduce a signed integer into the scalar field.
///
/// Negative values map to `p - |v|`, which is how witness generators
/// represent them and how they appear in public signals.
pub fn to_field_element(value: &BigInt) -> BigUint {
    let p = scalar_modulus();
    let magnitude = value.magnitude() % p;
    match value.sign() {
        Sign::Minus if magnitude != BigUint::from(0u8) => p - magnitude,
        _ => magnitude,
    }
}

/// Decimal string of [`to_field_element`].
pub fn to_field_string(value: &BigInt) -> String {
    to_field_element(value).to_str_radix(10)
}
