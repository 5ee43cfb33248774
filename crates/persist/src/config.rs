//! Manager configuration and on-disk manifests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use vstate_schema::Schema;

/// Default name of the reserved version field in persisted blobs.
pub const DEFAULT_VERSION_FIELD: &str = "version";

/// What `init` does when the live schema's fingerprint differs from the
/// hash table entry for the current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftPolicy {
    /// Skip the comparison.
    Ignore,
    /// Log the mismatch and keep the stored data.
    #[default]
    Warn,
    /// Treat stored data as corrupt and start from defaults.
    Reset,
}

/// Runtime configuration for one persisted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateConfig {
    pub storage_key: String,
    pub current_version: u32,
    pub version_field: String,
    pub drift_policy: DriftPolicy,
    /// Deadline applied to every storage call. `None` waits indefinitely.
    pub io_timeout: Option<Duration>,
    /// Known fingerprints by schema version.
    pub schema_hashes: BTreeMap<u32, String>,
}

impl StateConfig {
    pub fn new(storage_key: impl Into<String>, current_version: u32) -> Self {
        Self {
            storage_key: storage_key.into(),
            current_version,
            version_field: DEFAULT_VERSION_FIELD.into(),
            drift_policy: DriftPolicy::default(),
            io_timeout: None,
            schema_hashes: BTreeMap::new(),
        }
    }

    pub fn with_version_field(mut self, field: impl Into<String>) -> Self {
        self.version_field = field.into();
        self
    }

    pub fn with_drift_policy(mut self, policy: DriftPolicy) -> Self {
        self.drift_policy = policy;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn with_schema_hashes(mut self, hashes: impl IntoIterator<Item = (u32, String)>) -> Self {
        self.schema_hashes = hashes.into_iter().collect();
        self
    }
}

/// Errors from loading a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_version_field() -> String {
    DEFAULT_VERSION_FIELD.into()
}

/// A manager declared in a YAML or JSON file.
///
/// ```yaml
/// storage_key: settings
/// current_version: 2
/// drift_policy: warn
/// io_timeout_ms: 2000
/// schema_hashes:
///   2: v1n196
/// schema:
///   type: object
///   fields:
///     count: { type: default, inner: { type: number }, value: 0 }
///     name: { type: string }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateManifest {
    pub storage_key: String,
    pub current_version: u32,
    #[serde(default = "default_version_field")]
    pub version_field: String,
    #[serde(default)]
    pub drift_policy: DriftPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_timeout_ms: Option<u64>,
    #[serde(default)]
    pub schema_hashes: BTreeMap<u32, String>,
    pub schema: Schema,
}

impl StateManifest {
    /// Load a manifest; `.json` files are read as JSON, anything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let manifest = if is_json {
            Self::from_json_str(&text)?
        } else {
            Self::from_yaml_str(&text)?
        };
        tracing::debug!(path = %path.display(), key = %manifest.storage_key, "loaded state manifest");
        Ok(manifest)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Runtime configuration described by this manifest.
    pub fn config(&self) -> StateConfig {
        StateConfig {
            storage_key: self.storage_key.clone(),
            current_version: self.current_version,
            version_field: self.version_field.clone(),
            drift_policy: self.drift_policy,
            io_timeout: self.io_timeout_ms.map(Duration::from_millis),
            schema_hashes: self.schema_hashes.clone(),
        }
    }
}
