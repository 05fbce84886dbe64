//! Integration tests across the encoder, pipeline and request lifecycle
//!
//! This test suite validates:
//! - The full provider/user request protocol over the service facade
//! - Replay and binding rejection for proofs moved between requests
//! - Per-request proving serialization, watchdog and failure recording
//! - Calldata export and on-chain submission

pub mod test_utils;

#[cfg(test)]
mod end_to_end_tests;

#[cfg(test)]
mod replay_binding_tests;

#[cfg(test)]
mod proving_concurrency_tests;
