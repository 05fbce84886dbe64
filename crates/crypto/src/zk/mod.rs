//! Zero-Knowledge proof module for age and location verification.
//!
//! Circuits are opaque artifacts identified by [`CircuitId`]; this module
//! only knows their input names, public signal layout and radius encoding.

pub mod calldata;
pub mod circuit;
pub mod error;
pub mod field;
pub mod inputs;
pub mod proof;
pub mod prover;
pub mod snarkjs;

pub use calldata::{
    onchain_request_id, onchain_request_id_hex, to_on_chain_calldata, OnChainCalldata,
    ONCHAIN_ID_BYTES,
};
pub use circuit::{signals, CircuitId, RadiusEncoding};
pub use error::{ZkError, ZkResult};
pub use inputs::{
    encode_age, encode_location, scale_to_fixed, AgeAttributes, CircuitInput, DateOfBirth,
    LocationAttributes, COORDINATE_SCALE, MAX_SAFE_INTEGER,
};
pub use proof::{Groth16Proof, ProofBundle};
pub use prover::{MockBackend, ZkBackend};
pub use snarkjs::SnarkjsBackend;
