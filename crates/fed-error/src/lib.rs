// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stable error taxonomy shared across every federator component.
//!
//! [`ErrorCode`] gives every failure kind in the pipeline a stable,
//! serializable wire form; [`FedError`] carries a code, a human message, an
//! optional source error, and free-form structured context for logging.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

/// Coarse grouping of [`ErrorCode`] variants, useful for metrics and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Transport,
    Tool,
    Planning,
    Validation,
    Execution,
    Fusion,
    Config,
    Internal,
}

/// Every distinguishable failure kind in the federator pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// C2 network/protocol failure reaching a backend.
    TransportError,
    /// Backend reported a non-2xx status or an error in its body.
    ToolError,
    /// C4 could not parse the LLM's plan output.
    PlanParseError,
    /// A `PlanStep` failed validation and was dropped.
    ValidationError,
    /// C5 `depends_on` step is missing or produced no rows.
    DependencyMissing,
    /// C5 `_from` reference could not be resolved.
    ResolveError,
    /// Orchestrator-level failure; aborts the request.
    FatalError,
    /// C9 configuration failed to load or validate.
    ConfigError,
}

impl ErrorCode {
    /// The category this code belongs to.
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::TransportError => ErrorCategory::Transport,
            ErrorCode::ToolError => ErrorCategory::Tool,
            ErrorCode::PlanParseError => ErrorCategory::Planning,
            ErrorCode::ValidationError => ErrorCategory::Validation,
            ErrorCode::DependencyMissing | ErrorCode::ResolveError => ErrorCategory::Execution,
            ErrorCode::FatalError => ErrorCategory::Internal,
            ErrorCode::ConfigError => ErrorCategory::Config,
        }
    }

    /// The SCREAMING_SNAKE_CASE wire form, same as the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::TransportError => "TRANSPORT_ERROR",
            ErrorCode::ToolError => "TOOL_ERROR",
            ErrorCode::PlanParseError => "PLAN_PARSE_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::DependencyMissing => "DEPENDENCY_MISSING",
            ErrorCode::ResolveError => "RESOLVE_ERROR",
            ErrorCode::FatalError => "FATAL_ERROR",
            ErrorCode::ConfigError => "CONFIG_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The federator's domain error type.
///
/// Carries an opaque boxed source (not serializable) alongside a stable code,
/// message, and structured context map. Use [`FedError::to_dto`] to obtain a
/// serializable snapshot for logging or HTTP error bodies.
pub struct FedError {
    code: ErrorCode,
    message: String,
    source: Option<Box<dyn StdError + Send + Sync>>,
    context: BTreeMap<String, serde_json::Value>,
}

impl FedError {
    /// Construct a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a structured context field (builder style).
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach an underlying source error (builder style).
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The stable error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The category of this error's code.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured context attached to this error.
    #[must_use]
    pub fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }

    /// A serializable snapshot of this error, dropping the opaque source but
    /// preserving its display text.
    #[must_use]
    pub fn to_dto(&self) -> FedErrorDto {
        FedErrorDto {
            code: self.code,
            message: self.message.clone(),
            source_message: self.source.as_ref().map(|s| s.to_string()),
            context: self.context.clone(),
        }
    }
}

impl fmt::Debug for FedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FedError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("context", &self.context)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl fmt::Display for FedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(src) = &self.source {
            write!(f, ": {src}")?;
        }
        Ok(())
    }
}

impl StdError for FedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn StdError + 'static))
    }
}

/// Serializable snapshot of a [`FedError`], suitable for JSON logging or an
/// HTTP error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FedErrorDto {
    pub code: ErrorCode,
    pub message: String,
    pub source_message: Option<String>,
    pub context: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping_is_stable() {
        assert_eq!(ErrorCode::TransportError.category(), ErrorCategory::Transport);
        assert_eq!(ErrorCode::DependencyMissing.category(), ErrorCategory::Execution);
        assert_eq!(ErrorCode::ResolveError.category(), ErrorCategory::Execution);
        assert_eq!(ErrorCode::ConfigError.category(), ErrorCategory::Config);
    }

    #[test]
    fn wire_form_is_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::DependencyMissing).unwrap();
        assert_eq!(json, "\"DEPENDENCY_MISSING\"");
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = FedError::new(ErrorCode::ToolError, "backend returned 500");
        assert_eq!(err.to_string(), "[TOOL_ERROR] backend returned 500");
    }

    #[test]
    fn with_source_appends_to_display_and_dto() {
        let io_err = std::io::Error::other("boom");
        let err = FedError::new(ErrorCode::TransportError, "dispatch failed").with_source(io_err);
        assert!(err.to_string().contains("boom"));
        let dto = err.to_dto();
        assert_eq!(dto.source_message.as_deref(), Some("boom"));
    }

    #[test]
    fn with_context_is_preserved_in_dto() {
        let err = FedError::new(ErrorCode::ValidationError, "bad step")
            .with_context("step_id", "p1")
            .with_context("reason", "unknown mcp_id");
        let dto = err.to_dto();
        assert_eq!(dto.context.get("step_id").unwrap(), "p1");
        assert_eq!(dto.context.len(), 2);
    }

    #[test]
    fn std_error_source_roundtrips() {
        let io_err = std::io::Error::other("network down");
        let err = FedError::new(ErrorCode::TransportError, "call failed").with_source(io_err);
        let as_std: &dyn StdError = &err;
        assert!(as_std.source().is_some());
    }
}
