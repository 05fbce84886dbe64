//! Fixed-point encoding of private attributes into circuit inputs.
//!
//! Pure and deterministic: the same attributes always encode to the same
//! integers. Coordinates are scaled by [`COORDINATE_SCALE`] and rounded
//! half away from zero; any scaled value outside the 53-bit safe integer
//! range is rejected rather than truncated.

use chrono::{Datelike, NaiveDate};
use num_bigint::BigInt;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;

use super::circuit::{CircuitId, RadiusEncoding};
use super::error::{ZkError, ZkResult};
use super::field::{ensure_scalar, parse_unsigned};
use zkgps_core::GeoCoordinate;

/// Six decimal digits of coordinate precision.
pub const COORDINATE_SCALE: f64 = 1_000_000.0;

/// Largest integer exactly representable in an IEEE-754 double (2^53 - 1).
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Named integer inputs for one circuit execution.
///
/// Serializes as a JSON object of decimal strings, the form witness
/// generators accept for arbitrary-precision values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitInput {
    circuit: CircuitId,
    fields: BTreeMap<String, BigInt>,
}

impl CircuitInput {
    pub fn new(circuit: CircuitId) -> Self {
        Self {
            circuit,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<BigInt>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn circuit(&self) -> CircuitId {
        self.circuit
    }

    pub fn get(&self, name: &str) -> Option<&BigInt> {
        self.fields.get(name)
    }

    /// Fetch a field the circuit cannot run without.
    pub fn require(&self, name: &str) -> ZkResult<&BigInt> {
        self.get(name).ok_or_else(|| {
            ZkError::InvalidInput(format!(
                "{} circuit input is missing signal \"{}\"",
                self.circuit, name
            ))
        })
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.to_string())))
                .collect(),
        )
    }
}

impl Serialize for CircuitInput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, &value.to_string())?;
        }
        map.end()
    }
}

/// Calendar date of birth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateOfBirth {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl DateOfBirth {
    /// Parse a `YYYY-MM-DD` credential date.
    pub fn parse(value: &str) -> ZkResult<Self> {
        let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| {
            ZkError::InvalidInput(format!("Date of birth \"{}\" is not YYYY-MM-DD: {}", value, e))
        })?;
        Ok(Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        })
    }
}

/// Raw attributes for the age circuit.
#[derive(Debug, Clone)]
pub struct AgeAttributes {
    pub dob: DateOfBirth,
    pub reference_year: i32,
    /// Request challenge, decimal or `0x` hex
    pub challenge: String,
}

/// Raw attributes for a location circuit.
#[derive(Debug, Clone, Copy)]
pub struct LocationAttributes {
    pub user: GeoCoordinate,
    pub provider: GeoCoordinate,
    pub radius_km: f64,
}

/// Encode age attributes.
///
/// Years are already integers, so no rounding happens here. The challenge
/// must be a canonical scalar field element.
pub fn encode_age(attrs: &AgeAttributes) -> ZkResult<CircuitInput> {
    if attrs.dob.year > attrs.reference_year {
        return Err(ZkError::InvalidInput(format!(
            "Birth year {} is after reference year {}",
            attrs.dob.year, attrs.reference_year
        )));
    }

    let challenge = parse_unsigned(attrs.challenge.trim())?;
    ensure_scalar(&challenge, "challenge")?;

    Ok(CircuitInput::new(CircuitId::Age)
        .with("birthYear", attrs.dob.year)
        .with("birthMonth", attrs.dob.month)
        .with("birthDay", attrs.dob.day)
        .with("referenceYear", attrs.reference_year)
        .with("challenge", BigInt::from(challenge)))
}

/// Encode location attributes for `circuit`, using the radius encoding the
/// circuit identifier is bound to.
pub fn encode_location(circuit: CircuitId, attrs: &LocationAttributes) -> ZkResult<CircuitInput> {
    let encoding = circuit.radius_encoding().ok_or_else(|| {
        ZkError::InvalidInput(format!("{} circuit does not take a location", circuit))
    })?;

    if !attrs.radius_km.is_finite() || attrs.radius_km <= 0.0 {
        return Err(ZkError::InvalidInput(format!(
            "Radius must be a positive number of kilometres, got {}",
            attrs.radius_km
        )));
    }

    let radius = match encoding {
        RadiusEncoding::Linear => scale_to_fixed(attrs.radius_km, "radius")?,
        RadiusEncoding::Squared => round_checked(
            attrs.radius_km * attrs.radius_km * COORDINATE_SCALE * COORDINATE_SCALE,
            "radiusSquared",
        )?,
    };

    Ok(CircuitInput::new(circuit)
        .with("userLat", scale_to_fixed(attrs.user.latitude, "userLat")?)
        .with("userLon", scale_to_fixed(attrs.user.longitude, "userLon")?)
        .with("providerLat", scale_to_fixed(attrs.provider.latitude, "providerLat")?)
        .with("providerLon", scale_to_fixed(attrs.provider.longitude, "providerLon")?)
        .with(encoding.field_name(), radius))
}

/// Squared-radius threshold implied by a radius field value.
pub fn radius_threshold(encoding: RadiusEncoding, radius_field: &BigInt) -> BigInt {
    match encoding {
        RadiusEncoding::Linear => radius_field * radius_field,
        RadiusEncoding::Squared => radius_field.clone(),
    }
}

/// Scale a real value by [`COORDINATE_SCALE`] and round half away from zero.
pub fn scale_to_fixed(value: f64, what: &str) -> ZkResult<i64> {
    round_checked(value * COORDINATE_SCALE, what)
}

fn round_checked(scaled: f64, what: &str) -> ZkResult<i64> {
    if !scaled.is_finite() {
        return Err(ZkError::InvalidInput(format!("{} is not a finite number", what)));
    }
    // f64::round rounds half away from zero
    let rounded = scaled.round();
    if rounded.abs() > MAX_SAFE_INTEGER {
        return Err(ZkError::EncodingOverflow(format!(
            "{} scaled to {} exceeds the 53-bit safe integer range",
            what, rounded
        )));
    }
    Ok(rounded as i64)
}
