//! Error types for the boiler controller
//!
//! This module provides the crate-wide error enum together with structured
//! error codes and a serialisable representation that is published on the
//! `error` event of the control loop.

use crate::config::Purpose;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, BoilerError>;

/// Error types raised by the control loop and its collaborators
#[derive(Error, Debug)]
pub enum BoilerError {
    /// A sensor read failed (I/O or malformed hardware output)
    #[error("Sensor read failed for {uid}: {reason}")]
    SensorRead { uid: String, reason: String },

    /// A sensor is configured with a purpose outside INNER/OUTER/WATER/NONE
    #[error("Unknown sensor purpose '{purpose}' for sensor {uid}")]
    UnknownPurpose { uid: String, purpose: String },

    /// A required role has no sensors assigned
    #[error("No sensors assigned to role {0}")]
    EmptyRoleGroup(Purpose),

    /// The expected-temperature formula failed to parse or evaluate
    #[error("Formula evaluation failed: {0}")]
    FormulaEvaluation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Actuator output errors
    #[error("Actuator error: {0}")]
    Actuator(String),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Structured error code for machine-readable error handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Sensor errors (1000-1099)
    SensorReadFailed,
    SensorOutputMalformed,

    // Configuration errors (1200-1299)
    ConfigurationInvalid,
    UnknownSensorPurpose,
    EmptyRoleGroup,

    // Actuator errors (1300-1399)
    ActuatorFailed,

    // Formula errors (1400-1499)
    FormulaInvalid,
    ParsingFailed,

    // Internal errors (1900-1999)
    InternalError,
}

impl ErrorCode {
    /// Get numeric error code
    pub fn as_number(&self) -> u32 {
        match self {
            ErrorCode::SensorReadFailed => 1001,
            ErrorCode::SensorOutputMalformed => 1002,

            ErrorCode::ConfigurationInvalid => 1201,
            ErrorCode::UnknownSensorPurpose => 1202,
            ErrorCode::EmptyRoleGroup => 1203,

            ErrorCode::ActuatorFailed => 1301,

            ErrorCode::FormulaInvalid => 1401,
            ErrorCode::ParsingFailed => 1402,

            ErrorCode::InternalError => 1901,
        }
    }

    /// Get error category
    pub fn category(&self) -> &'static str {
        match self.as_number() {
            1000..=1099 => "sensor",
            1200..=1299 => "configuration",
            1300..=1399 => "actuator",
            1400..=1499 => "formula",
            1900..=1999 => "internal",
            _ => "unknown",
        }
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Low severity - information only
    Info,
    /// Medium severity - warning condition
    Warning,
    /// High severity - error condition
    Error,
    /// Critical severity - immediate attention required
    Critical,
}

/// Structured error context with additional metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Error code for machine processing
    pub code: ErrorCode,
    /// Component that generated the error
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional metadata about the error
    pub metadata: HashMap<String, serde_json::Value>,
    /// Timestamp when error occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    /// Create new error context
    pub fn new(code: ErrorCode, component: &str, operation: &str) -> Self {
        Self {
            code,
            component: component.to_string(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Add metadata to error context
    pub fn with_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Serialisable error representation carried by `error` events
#[derive(Debug, Clone, Serialize)]
pub struct StructuredError {
    /// Error code for machine processing
    pub code: ErrorCode,
    /// Numeric error code
    pub code_number: u32,
    /// Error category
    pub category: &'static str,
    /// Human-readable message
    pub message: String,
    /// Whether the next cycle may succeed without operator action
    pub is_transient: bool,
    /// Component that generated the error
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional context metadata
    pub metadata: HashMap<String, serde_json::Value>,
    /// Error severity level
    pub severity: ErrorSeverity,
    /// Timestamp when error occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl BoilerError {
    /// Create a sensor read error
    pub fn sensor_read<U: Into<String>, S: Into<String>>(uid: U, reason: S) -> Self {
        Self::SensorRead {
            uid: uid.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown purpose error
    pub fn unknown_purpose<U: Into<String>, S: Into<String>>(uid: U, purpose: S) -> Self {
        Self::UnknownPurpose {
            uid: uid.into(),
            purpose: purpose.into(),
        }
    }

    /// Create a formula evaluation error
    pub fn formula<S: Into<String>>(msg: S) -> Self {
        Self::FormulaEvaluation(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an actuator error
    pub fn actuator<S: Into<String>>(msg: S) -> Self {
        Self::Actuator(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Generic(anyhow::anyhow!(msg.into()))
    }

    /// Map BoilerError to structured error code
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            BoilerError::SensorRead { reason, .. } if reason.contains("malformed") => {
                ErrorCode::SensorOutputMalformed
            }
            BoilerError::SensorRead { .. } => ErrorCode::SensorReadFailed,
            BoilerError::UnknownPurpose { .. } => ErrorCode::UnknownSensorPurpose,
            BoilerError::EmptyRoleGroup(_) => ErrorCode::EmptyRoleGroup,
            BoilerError::FormulaEvaluation(_) => ErrorCode::FormulaInvalid,
            BoilerError::Config(_) => ErrorCode::ConfigurationInvalid,
            BoilerError::Actuator(_) => ErrorCode::ActuatorFailed,
            BoilerError::Json(_) => ErrorCode::ParsingFailed,
            BoilerError::Io(_) => ErrorCode::InternalError,
            BoilerError::Generic(_) => ErrorCode::InternalError,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BoilerError::SensorRead { .. } => ErrorSeverity::Warning,
            BoilerError::Actuator(_) => ErrorSeverity::Critical,
            BoilerError::UnknownPurpose { .. }
            | BoilerError::EmptyRoleGroup(_)
            | BoilerError::FormulaEvaluation(_)
            | BoilerError::Config(_) => ErrorSeverity::Error,
            _ => ErrorSeverity::Error,
        }
    }

    /// Check if the error is expected to clear on its own
    ///
    /// Configuration defects persist until the operator edits the settings,
    /// whereas a flaky sensor bus usually recovers by the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, BoilerError::SensorRead { .. } | BoilerError::Io(_))
    }

    /// Check if error is a configuration defect
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            BoilerError::UnknownPurpose { .. }
                | BoilerError::EmptyRoleGroup(_)
                | BoilerError::FormulaEvaluation(_)
                | BoilerError::Config(_)
        )
    }

    /// Create a structured error from this BoilerError
    pub fn to_structured_error(&self, context: Option<ErrorContext>) -> StructuredError {
        let error_code = self.to_error_code();
        let base_context =
            context.unwrap_or_else(|| ErrorContext::new(error_code.clone(), "unknown", "unknown"));

        StructuredError {
            code: error_code.clone(),
            code_number: error_code.as_number(),
            category: error_code.category(),
            message: self.to_string(),
            is_transient: self.is_transient(),
            component: base_context.component,
            operation: base_context.operation,
            metadata: base_context.metadata,
            severity: self.severity(),
            timestamp: base_context.timestamp,
        }
    }
}

/// Error logging and reporting utilities
pub struct ErrorReporter;

impl ErrorReporter {
    /// Log a structured error with appropriate severity
    pub fn log_error(error: &BoilerError, context: Option<ErrorContext>) {
        let structured = error.to_structured_error(context);

        match structured.severity {
            ErrorSeverity::Critical => {
                tracing::error!(
                    error_code = structured.code_number,
                    category = structured.category,
                    component = structured.component,
                    operation = structured.operation,
                    "Critical error occurred: {}",
                    structured.message
                );
            }
            ErrorSeverity::Error => {
                tracing::error!(
                    error_code = structured.code_number,
                    category = structured.category,
                    component = structured.component,
                    operation = structured.operation,
                    "Error occurred: {}",
                    structured.message
                );
            }
            ErrorSeverity::Warning => {
                tracing::warn!(
                    error_code = structured.code_number,
                    category = structured.category,
                    component = structured.component,
                    operation = structured.operation,
                    "Warning: {}",
                    structured.message
                );
            }
            ErrorSeverity::Info => {
                tracing::info!(
                    error_code = structured.code_number,
                    category = structured.category,
                    component = structured.component,
                    operation = structured.operation,
                    "Info: {}",
                    structured.message
                );
            }
        }
    }

    /// Create an error context for a component/operation pair
    pub fn create_context(code: ErrorCode, component: &str, operation: &str) -> ErrorContext {
        ErrorContext::new(code, component, operation)
    }
}

/// Macro for easy structured error logging
#[macro_export]
macro_rules! log_structured_error {
    ($error:expr, $component:expr, $operation:expr) => {
        $crate::error::ErrorReporter::log_error(
            &$error,
            Some($crate::error::ErrorReporter::create_context(
                $error.to_error_code(),
                $component,
                $operation,
            )),
        )
    };
}

impl From<regex::Error> for BoilerError {
    fn from(err: regex::Error) -> Self {
        BoilerError::Config(format!("Regex pattern error: {err}"))
    }
}
