//! Core functionality for the ZK GPS verification system.
//!
//! This crate provides the shared types, configuration, logging and clock
//! abstractions used by the proof pipeline and the request lifecycle.

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CircuitBackendKind, CircuitConfig, Config, LogFormat, LoggingConfig, PipelineConfig,
    RequestConfig, StorageBackend, StorageConfig,
};
pub use error::{CoreError, Result};
pub use types::{new_object_id, GeoCoordinate, ProofId, RequestId, OBJECT_ID_BYTES};
