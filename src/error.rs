//! Error types for chrysalis-rs.
//!
//! Three failure classes matter to callers: configuration errors (bad run
//! setup, abort before any artifact is written), shape invariant violations
//! (internal defects, reported with expected-vs-actual diagnostics), and
//! unreachable resources (checkpoints or weight files; propagated, never
//! retried). Everything else is plumbing converted via `#[from]`.
//!
//! # Example
//!
//! ```rust
//! use chrysalis_rs::{ChrysalisError, Result};
//!
//! fn check_resolution(res: usize) -> Result<()> {
//!     if !res.is_power_of_two() {
//!         return Err(ChrysalisError::Config(format!(
//!             "resolution must be a power of two, got {res}"
//!         )));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_resolution(128).is_ok());
//! assert!(check_resolution(100).is_err());
//! ```

use thiserror::Error;

/// Result type alias for chrysalis-rs operations.
pub type Result<T> = std::result::Result<T, ChrysalisError>;

/// Errors that can occur in chrysalis-rs.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChrysalisError {
    /// Configuration error. Fatal; the run aborts before producing artifacts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid configuration file.
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Tensor shape does not satisfy an internal invariant.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch {
        /// What the invariant required.
        expected: String,
        /// What was actually observed.
        got: String,
    },

    /// Checkpoint or weights path unreachable.
    #[error("resource unavailable: {0}")]
    Resource(String),

    /// Dataset error.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Model construction error.
    #[error("model error: {0}")]
    Model(String),

    /// Training error.
    #[error("training error: {0}")]
    Training(String),

    /// Checkpoint serialization error.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle error.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Image codec error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Progress bar template error.
    #[error("template error: {0}")]
    Template(String),
}

impl From<indicatif::style::TemplateError> for ChrysalisError {
    fn from(err: indicatif::style::TemplateError) -> Self {
        ChrysalisError::Template(err.to_string())
    }
}

impl ChrysalisError {
    /// Shape mismatch with formatted diagnostics.
    pub fn shape_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        ChrysalisError::ShapeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Configuration error from anything displayable.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        ChrysalisError::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_error_display() {
        let error = ChrysalisError::Config("unknown encoder architecture".to_string());
        assert_eq!(
            error.to_string(),
            "configuration error: unknown encoder architecture"
        );
    }

    #[test]
    fn test_shape_mismatch_display() {
        let error = ChrysalisError::shape_mismatch("[5, 12, 512]", "[5, 512]");
        assert_eq!(
            error.to_string(),
            "shape mismatch: expected [5, 12, 512], got [5, 512]"
        );
    }

    #[test]
    fn test_resource_error_display() {
        let error = ChrysalisError::Resource("snapshot dir not found".to_string());
        assert!(error.to_string().contains("resource unavailable"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: ChrysalisError = io_error.into();
        assert!(matches!(error, ChrysalisError::Io(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("a: b: c: :::").unwrap_err();
        let error: ChrysalisError = yaml_error.into();
        assert!(error.to_string().contains("invalid config file"));
    }

    #[test]
    fn test_candle_error_conversion() {
        use candle_core::{DType, Device, Tensor};

        let a = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        let b = Tensor::zeros((4, 5), DType::F32, &Device::Cpu).unwrap();
        let candle_error = a.broadcast_add(&b).unwrap_err();
        let error: ChrysalisError = candle_error.into();
        assert!(error.to_string().contains("candle error"));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let io_error = io::Error::new(io::ErrorKind::NotFound, "gone");
        let error: ChrysalisError = io_error.into();
        assert!(error.source().is_some());
    }

    #[test]
    fn test_result_type_alias() {
        fn ok_value() -> Result<u32> {
            Ok(7)
        }
        fn err_value() -> Result<u32> {
            Err(ChrysalisError::invalid_config("bad"))
        }

        assert_eq!(ok_value().unwrap(), 7);
        assert!(err_value().is_err());
    }
}
