//! Coordinator configuration.
//!
//! Precedence: an explicit `--config` path, then
//! `<config dir>/buildmesh/config.toml`, then built-in defaults. Every
//! section and field is optional in the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use buildmesh_protocol::{NodePacketType, PacketCatalog};
use buildmesh_submission::DuplicateResultPolicy;

use crate::observability::LogFormat;
use crate::{CoordinatorError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub submission: SubmissionConfig,
    pub logging: LoggingConfig,
    pub node: NodeConfig,
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    pub duplicate_result_policy: DuplicateResultPolicy,
    /// Synchronous builds wait with a pumping wait and may run
    /// marshalled work on the calling thread.
    pub legacy_threading: bool,
    /// Bound applied by the command-line driver; none by default.
    pub wait_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
    /// Treat warnings from a build as errors; a build that logged one
    /// completes as failed.
    pub warnings_as_errors: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::default(),
            warnings_as_errors: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub connect_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Extra versioned packet types, on top of the built-in catalog.
    pub packet_versions: BTreeMap<NodePacketType, u8>,
}

impl ProtocolConfig {
    pub fn catalog(&self) -> PacketCatalog {
        let mut catalog = PacketCatalog::builtin().clone();
        for (packet_type, version) in &self.packet_versions {
            catalog.register(*packet_type, *version);
        }
        catalog
    }
}

impl CoordinatorConfig {
    /// `<config dir>/buildmesh/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("buildmesh").join("config.toml"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_toml_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_toml_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CoordinatorError::config(path.display().to_string(), format!("failed to read: {e}"))
        })?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            CoordinatorError::Config { message, .. } => {
                CoordinatorError::config(path.display().to_string(), message)
            }
            other => other,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| CoordinatorError::config("<inline>", format!("failed to parse TOML: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CoordinatorConfig::from_toml_str("").unwrap();
        assert_eq!(
            config.submission.duplicate_result_policy,
            DuplicateResultPolicy::Ignore
        );
        assert!(!config.submission.legacy_threading);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.node.connect_timeout_secs, 10);
        assert!(config.protocol.packet_versions.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config = CoordinatorConfig::from_toml_str(
            r#"
            [submission]
            duplicate_result_policy = "reject"
            legacy_threading = true
            wait_timeout_secs = 600

            [logging]
            level = "debug"
            format = "json"
            warnings_as_errors = true

            [node]
            connect_timeout_secs = 3

            [protocol.packet_versions]
            LogMessage = 2
            "#,
        )
        .unwrap();
        assert_eq!(
            config.submission.duplicate_result_policy,
            DuplicateResultPolicy::Reject
        );
        assert!(config.submission.legacy_threading);
        assert_eq!(config.submission.wait_timeout_secs, Some(600));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.logging.warnings_as_errors);
        assert_eq!(config.node.connect_timeout_secs, 3);

        let catalog = config.protocol.catalog();
        assert_eq!(catalog.current_version(NodePacketType::LogMessage), 2);
        assert!(catalog.supports_versioning(NodePacketType::TaskHostConfiguration));
        assert!(!catalog.supports_versioning(NodePacketType::BuildRequest));
    }

    #[test]
    fn test_invalid_policy_is_config_error() {
        let err = CoordinatorConfig::from_toml_str(
            "[submission]\nduplicate_result_policy = \"panic\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, CoordinatorError::Config { .. }));
    }
}
