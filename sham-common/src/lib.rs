//! # sham Common
//!
//! Shared utilities for the sham crates.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use sham_common::{init_logging_with_format, LogFormat};
//!
//! init_logging_with_format("info", LogFormat::Pretty)?;
//! tracing::info!(vm = "web", "Starting VM");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json, init_logging_with_format, LogFormat};
