//! Dockerfile Core - Shared Types
//!
//! Errors, diagnostics, source line ranges and parser configuration used by
//! the `dockerfile-parser` crate and by tools that consume its output.

pub mod config;
pub mod diagnostic;
pub mod error;

// Re-export commonly used types
pub use config::ParserConfig;
pub use diagnostic::{Diagnostic, LineRange, Severity};
pub use error::{DockerfileError, ErrorCategory, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
