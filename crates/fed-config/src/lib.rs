// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed, schema-documented startup configuration for the federator.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard failures that abort process startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },
    #[error("failed to parse config: {reason}")]
    ParseError { reason: String },
    #[error("config failed validation: {}", .reasons.join("; "))]
    ValidationError { reasons: Vec<String> },
}

/// Soft issues that are logged but do not block startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    DeprecatedField { field: String },
    MissingOptionalField { field: String },
    LargeTimeout { field: String, seconds: u64 },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::DeprecatedField { field } => {
                write!(f, "field `{field}` is deprecated and will be removed")
            }
            ConfigWarning::MissingOptionalField { field } => {
                write!(f, "optional field `{field}` not set, using default")
            }
            ConfigWarning::LargeTimeout { field, seconds } => {
                write!(f, "field `{field}` is set to {seconds}s, unusually large")
            }
        }
    }
}

/// The data-plane capability a backend manifest declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    #[serde(rename = "query.sql")]
    QuerySql,
    #[serde(rename = "query.document")]
    QueryDocument,
    #[serde(rename = "query.graph")]
    QueryGraph,
    #[serde(rename = "query.vector")]
    QueryVector,
}

/// Declarative, config-file form of a source registration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ManifestConfig {
    pub id: String,
    pub host: String,
    pub capabilities: BTreeSet<Capability>,
}

/// Which planner backing is wired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LlmMode {
    /// Deterministic canned-response client, useful for exercising the
    /// LLM-plan path in isolation. Not query-aware, so it is unsuitable
    /// as the zero-config default.
    Mock,
    /// Always report unavailable, forcing the keyword-driven heuristic
    /// planner (default). This is the only mode that produces the
    /// documented end-to-end behavior with no LLM wired in.
    #[default]
    Heuristic,
}

/// Top-level startup configuration for the federator daemon.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AppConfig {
    pub bind: String,
    pub log_level: String,
    pub llm_mode: LlmMode,
    #[serde(with = "duration_secs")]
    pub default_tool_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub schema_timeout: Duration,
    #[serde(default)]
    pub sources: Vec<ManifestConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8089".to_string(),
            log_level: "info".to_string(),
            llm_mode: LlmMode::default(),
            default_tool_timeout: Duration::from_secs(20),
            schema_timeout: Duration::from_secs(10),
            sources: Vec::new(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        val.as_secs().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(de)?;
        Ok(Duration::from_secs(secs))
    }
}

const LARGE_TIMEOUT_SECS: u64 = 300;

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// field the file omits (serde's `#[serde(default)]`-free fields are
    /// still required; `sources` alone is optional).
    pub fn load_from_file(path: &Path) -> Result<(Self, Vec<ConfigWarning>), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.to_path_buf(),
        })?;
        let config: AppConfig = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })?;
        let warnings = config.validate()?;
        Ok((config, warnings))
    }

    /// Validate the config, returning soft warnings or a hard validation error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        if self.bind.parse::<std::net::SocketAddr>().is_err() {
            reasons.push(format!("`bind` is not a valid socket address: {}", self.bind));
        }
        for source in &self.sources {
            if source.id.trim().is_empty() {
                reasons.push("a source manifest has an empty `id`".to_string());
            }
            if source.capabilities.is_empty() {
                reasons.push(format!("source `{}` declares no capabilities", source.id));
            }
        }

        if self.default_tool_timeout.as_secs() > LARGE_TIMEOUT_SECS {
            warnings.push(ConfigWarning::LargeTimeout {
                field: "default_tool_timeout".to_string(),
                seconds: self.default_tool_timeout.as_secs(),
            });
        }
        if self.sources.is_empty() {
            warnings.push(ConfigWarning::MissingOptionalField {
                field: "sources".to_string(),
            });
        }

        if reasons.is_empty() {
            Ok(warnings)
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid_with_missing_sources_warning() {
        let config = AppConfig::default();
        let warnings = config.validate().unwrap();
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ConfigWarning::MissingOptionalField { field } if field == "sources")));
    }

    #[test]
    fn invalid_bind_address_is_rejected() {
        let mut config = AppConfig::default();
        config.bind = "not-an-address".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn empty_source_id_is_rejected() {
        let mut config = AppConfig::default();
        config.sources.push(ManifestConfig {
            id: String::new(),
            host: "http://localhost:8001".to_string(),
            capabilities: BTreeSet::from([Capability::QuerySql]),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn large_timeout_warns_but_does_not_fail() {
        let mut config = AppConfig::default();
        config.default_tool_timeout = Duration::from_secs(999);
        let warnings = config.validate().unwrap();
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ConfigWarning::LargeTimeout { .. })));
    }

    #[test]
    fn load_from_file_missing_path_is_file_not_found() {
        let err = AppConfig::load_from_file(Path::new("/nonexistent/federator.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_from_file_round_trips() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            bind = "127.0.0.1:9000"
            log_level = "debug"
            llm_mode = "mock"
            default_tool_timeout = 20
            schema_timeout = 10
            "#
        )
        .unwrap();
        let (config, _warnings) = AppConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.llm_mode, LlmMode::Mock);
    }
}
