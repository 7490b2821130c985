//! Configuration loading and validation.
//!
//! Every section is optional; an empty file yields the defaults. Values can
//! be overridden with `INTAKE_`-prefixed environment variables, using `__`
//! between section and key (`INTAKE_INGEST__ADMISSION_WINDOW=8`).

mod loader;
mod types;
mod validate;

pub use loader::{load_config, load_config_from_str};
pub use types::*;
pub use validate::validate_config;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
