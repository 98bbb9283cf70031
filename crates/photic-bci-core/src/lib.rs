//! Photic BCI Core - shared types for the SSVEP classification engine
//!
//! This crate provides the foundational types for the Photic platform:
//! configuration surface, error taxonomy, and the detection result/event
//! types exchanged between the engine and its downstream consumers.
//!
//! # Modules
//!
//! - [`config`]: Engine configuration and target-frequency validation
//! - [`error`]: Error types for configuration, ingestion, and calibration
//! - [`event`]: Detection results and per-tick events
//!
//! # Example
//!
//! ```rust
//! use photic_bci_core::config::EngineConfig;
//!
//! let config = EngineConfig::default();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.target_frequencies, vec![10.0, 15.0]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod event;

// Re-export commonly used types at crate root
pub use config::{DetectorKind, EngineConfig, FilterBankConfig, TargetSet};
pub use error::{CalibrationError, ConfigError, IngestError};
pub use event::{DetectionEvent, DetectionResult, FrequencyScore};
