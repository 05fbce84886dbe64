//! Circuit identifiers and their fixed interface facts.
//!
//! Each circuit is a compiled artifact set; the identifier selects the
//! artifact file names, the public signal layout and, for location, the
//! radius encoding. These bindings are immutable per identifier: a new
//! encoding means a new identifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::ZkError;

/// Public signal positions shared by every circuit.
pub mod signals {
    /// Boolean statement result (`"1"` when the statement holds)
    pub const RESULT: usize = 0;
    /// Age: echoed request challenge
    pub const AGE_CHALLENGE: usize = 1;
    /// Age: reference year the age was computed against
    pub const AGE_REFERENCE_YEAR: usize = 2;
    /// Location: geofence centre latitude (field element)
    pub const LOCATION_PROVIDER_LAT: usize = 1;
    /// Location: geofence centre longitude (field element)
    pub const LOCATION_PROVIDER_LON: usize = 2;
    /// Location: radius field as supplied to the circuit
    pub const LOCATION_RADIUS: usize = 3;
}

/// Circuit identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitId {
    Age,
    Location,
}

/// How the geofence radius is presented to a location circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadiusEncoding {
    /// `radius = round(r * scale)`; the circuit squares it internally
    Linear,
    /// `radiusSquared = round(r^2 * scale^2)`
    Squared,
}

impl RadiusEncoding {
    /// Circuit input name carrying the radius.
    pub fn field_name(&self) -> &'static str {
        match self {
            RadiusEncoding::Linear => "radius",
            RadiusEncoding::Squared => "radiusSquared",
        }
    }
}

impl CircuitId {
    pub const ALL: [CircuitId; 2] = [CircuitId::Age, CircuitId::Location];

    /// Short tag used in artifact names and storage.
    pub fn tag(&self) -> &'static str {
        match self {
            CircuitId::Age => "age",
            CircuitId::Location => "location",
        }
    }

    pub fn wasm_file(&self) -> String {
        format!("{}.wasm", self.tag())
    }

    pub fn zkey_file(&self) -> String {
        format!("{}_final.zkey", self.tag())
    }

    pub fn vkey_file(&self) -> String {
        format!("{}_vkey.json", self.tag())
    }

    /// Radius encoding compiled into the circuit (location circuits only).
    pub fn radius_encoding(&self) -> Option<RadiusEncoding> {
        match self {
            CircuitId::Age => None,
            CircuitId::Location => Some(RadiusEncoding::Squared),
        }
    }

    /// Number of public signals the circuit emits.
    pub fn public_signal_count(&self) -> usize {
        match self {
            CircuitId::Age => 3,
            CircuitId::Location => 4,
        }
    }

    /// Input names the circuit's witness generator requires.
    pub fn input_names(&self) -> Vec<&'static str> {
        match self {
            CircuitId::Age => vec![
                "birthYear",
                "birthMonth",
                "birthDay",
                "referenceYear",
                "challenge",
            ],
            CircuitId::Location => {
                let mut names = vec!["userLat", "userLon", "providerLat", "providerLon"];
                if let Some(encoding) = self.radius_encoding() {
                    names.push(encoding.field_name());
                }
                names
            }
        }
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for CircuitId {
    type Err = ZkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "age" => Ok(CircuitId::Age),
            "location" => Ok(CircuitId::Location),
            other => Err(ZkError::InvalidInput(format!(
                "Unknown circuit \"{}\", expected \"age\" or \"location\"",
                other
            ))),
        }
    }
}
