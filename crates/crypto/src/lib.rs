//! Zero-knowledge proof plumbing for the ZK GPS system.
//!
//! This crate turns real-valued private attributes into circuit inputs,
//! drives a Groth16 proving backend, and reformats proofs for an on-chain
//! pairing-check verifier.
//!
//! # Core Capabilities
//!
//! - **Fixed-Point Encoding**: dates and GPS coordinates to exact field integers
//! - **Proving Backends**: `snarkjs` over compiled artifacts, plus an in-process mock
//! - **On-Chain Calldata**: `(pA, pB, pC, pubSignals)` tuples and 32-byte request ids
//!
//! # Numeric Discipline
//!
//! Floating point is used only on the encoder input side, where degrees and
//! kilometres are scaled and rounded once. Everything downstream of the
//! encoder is an arbitrary-precision integer or its decimal string.

pub mod zk;

pub use zk::{
    encode_age, encode_location, onchain_request_id, onchain_request_id_hex,
    to_on_chain_calldata, AgeAttributes, CircuitId, CircuitInput, DateOfBirth, Groth16Proof,
    LocationAttributes, MockBackend, OnChainCalldata, ProofBundle, RadiusEncoding,
    SnarkjsBackend, ZkBackend, ZkError, ZkResult,
};
