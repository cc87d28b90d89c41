// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Tenantry operations
#[derive(Error, Debug, Diagnostic)]
pub enum TenantryError {
    /// Validation failed
    #[error("Validation failed for {subject}: {details}")]
    #[diagnostic(
        code(tenantry::validation_failed),
        help("{help_text}")
    )]
    ValidationFailed {
        #[allow(unused)]
        subject: String,
        #[allow(unused)]
        details: String,
        #[allow(unused)]
        help_text: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {reason}")]
    #[diagnostic(
        code(tenantry::invalid_config),
        help("{suggestion}")
    )]
    InvalidConfig {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(tenantry::serialization_error),
        help("Ensure the input is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(tenantry::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for Tenantry operations
pub type Result<T> = std::result::Result<T, TenantryError>;

impl TenantryError {
    /// Create a ValidationFailed error
    pub fn validation_failed(
        subject: impl Into<String>,
        details: impl Into<String>,
        help_text: impl Into<String>,
    ) -> Self {
        Self::ValidationFailed {
            subject: subject.into(),
            details: details.into(),
            help_text: help_text.into(),
        }
    }

    /// Create an InvalidConfig error
    pub fn invalid_config(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
