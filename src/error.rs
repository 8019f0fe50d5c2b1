//! Unified error hierarchy for loadcal
//!
//! Module errors stay close to the code that raises them and are gathered
//! here for the CLI, which needs one severity scale and one user message.

use std::path::PathBuf;
use thiserror::Error;

use crate::calibration::CalibrationError;
use crate::config::ConfigError;
use crate::scaling::LearningError;
use crate::store::StoreError;

/// Top-level error type for all loadcal operations
#[derive(Debug, Error)]
pub enum LoadCalError {
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Only reached when a caller runs the learning step itself
    #[error("Learning error: {0}")]
    Learning(#[from] LearningError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Import/Export error: {0}")]
    ImportExport(#[from] ImportExportError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Import and export errors
#[derive(Debug, Error)]
pub enum ImportExportError {
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Parse error in {format}: {reason}")]
    ParseError { format: String, reason: String },

    #[error("Missing required data: {field}")]
    MissingData { field: String },

    #[error("Export failed to {path}: {reason}")]
    ExportFailed { path: PathBuf, reason: String },
}

impl From<csv::Error> for ImportExportError {
    fn from(err: csv::Error) -> Self {
        ImportExportError::ParseError {
            format: "csv".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ImportExportError {
    fn from(err: serde_json::Error) -> Self {
        ImportExportError::ParseError {
            format: "json".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result type alias for loadcal operations
pub type Result<T> = std::result::Result<T, LoadCalError>;

impl LoadCalError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoadCalError::Store(StoreError::Unavailable(_))
                | LoadCalError::Calibration(CalibrationError::Store(StoreError::Unavailable(_)))
                | LoadCalError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            LoadCalError::Calibration(CalibrationError::NoUsableValues { .. })
            | LoadCalError::Calibration(CalibrationError::LowConfidence { .. })
            | LoadCalError::Calibration(CalibrationError::AlreadyApplied(_))
            | LoadCalError::Calibration(CalibrationError::NotFound(_)) => ErrorSeverity::Warning,
            LoadCalError::Learning(_) => ErrorSeverity::Info,
            LoadCalError::Validation(_) => ErrorSeverity::Warning,
            LoadCalError::Store(StoreError::Serialization(_))
            | LoadCalError::Calibration(CalibrationError::Store(StoreError::Serialization(_))) => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::Error,
        }
    }

    /// Whether the user can act on this error
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            LoadCalError::Calibration(CalibrationError::NoUsableValues { .. })
                | LoadCalError::Calibration(CalibrationError::LowConfidence { .. })
        )
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            LoadCalError::Calibration(CalibrationError::NoUsableValues { reason }) => {
                format!(
                    "The screenshot did not contain usable values ({}). Try a clearer capture or enter the values manually.",
                    reason
                )
            }
            LoadCalError::Calibration(CalibrationError::LowConfidence {
                confidence,
                required,
            }) => {
                format!(
                    "Values were read with {:.0}% confidence, {:.0}% is needed to adjust your history. Please confirm them manually.",
                    confidence * 100.0,
                    required * 100.0
                )
            }
            LoadCalError::Calibration(CalibrationError::AlreadyApplied(id)) => {
                format!("Calibration {} has already been applied.", id)
            }
            LoadCalError::Store(StoreError::Sqlite(_)) => {
                "Unable to access the training database. Please check your configuration.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Data could not be read back; needs attention
    Critical,
    /// Operation failed, system can continue
    Error,
    /// Operation refused, nothing was changed
    Warning,
    Info,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = LoadCalError::from(CalibrationError::LowConfidence {
            confidence: 0.6,
            required: 0.7,
        });
        assert_eq!(err.severity(), ErrorSeverity::Warning);
        assert!(err.is_actionable());

        let err = LoadCalError::from(StoreError::Serialization("bad decimal".to_string()));
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(!err.is_actionable());
    }

    #[test]
    fn test_error_retryable() {
        let err = LoadCalError::Store(StoreError::Unavailable("locked".to_string()));
        assert!(err.is_retryable());

        let err = LoadCalError::Validation("ambiguous record id".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Warning);
        assert_eq!(err.user_message(), "Validation error: ambiguous record id");
    }

    #[test]
    fn test_user_messages() {
        let err = LoadCalError::from(CalibrationError::NoUsableValues {
            reason: "no fitness value".to_string(),
        });
        assert!(err.user_message().contains("manually"));

        let err = LoadCalError::from(CalibrationError::LowConfidence {
            confidence: 0.55,
            required: 0.7,
        });
        assert!(err.user_message().contains("70%"));
    }
}
