//! DHA Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging and small utilities for the DHA harvesting
//! tools.
//!
//! # Overview
//!
//! - **Error Handling**: the configuration/IO error type and result alias
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Units**: byte-size formatting for progress reporting
//!
//! # Example
//!
//! ```no_run
//! use dha_common::{DhaError, Result};
//!
//! fn require_prefix(prefix: &str) -> Result<()> {
//!     if prefix.is_empty() {
//!         return Err(DhaError::config("metadata prefix cannot be empty"));
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod units;

// Re-export commonly used types
pub use error::{DhaError, Result};
