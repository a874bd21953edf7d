//! Configuration management.

use crate::models::{DEFAULT_PREDICATE, PredicateTable};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default message type used when a lifecycle config omits it.
pub const DEFAULT_MESSAGE_TYPE: &str = "Annotations";

fn default_message_type() -> String {
    DEFAULT_MESSAGE_TYPE.to_string()
}

/// Lifecycle configuration file (JSON).
///
/// ```json
/// {
///   "originMap": {"http://cmdb.ft.com/systems/pac": "annotations-pac"},
///   "lifecycleMap": {"annotations-pac": "pac"},
///   "messageType": "Annotations"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleConfig {
    /// Origin system id to lifecycle.
    #[serde(default)]
    pub origin_map: BTreeMap<String, String>,
    /// Lifecycle to platform version.
    #[serde(default)]
    pub lifecycle_map: BTreeMap<String, String>,
    /// Payload key used when forwarding written annotations.
    #[serde(default = "default_message_type")]
    pub message_type: String,
}

impl LifecycleConfig {
    /// Loads and validates a lifecycle config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_lifecycle_config".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_json(&contents)
    }

    /// Parses and validates a lifecycle config.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or the maps are inconsistent.
    pub fn from_json(contents: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(contents).map_err(|e| Error::OperationFailed {
                operation: "parse_lifecycle_config".to_string(),
                cause: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every lifecycle reachable from an origin has a platform version.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first lifecycle missing from `lifecycleMap`.
    pub fn validate(&self) -> Result<()> {
        if self.message_type.trim().is_empty() {
            return Err(Error::OperationFailed {
                operation: "validate_lifecycle_config".to_string(),
                cause: "messageType must not be empty".to_string(),
            });
        }
        for (origin, lifecycle) in &self.origin_map {
            if !self.lifecycle_map.contains_key(lifecycle) {
                return Err(Error::OperationFailed {
                    operation: "validate_lifecycle_config".to_string(),
                    cause: format!(
                        "lifecycle '{lifecycle}' for origin '{origin}' has no platform version"
                    ),
                });
            }
        }
        Ok(())
    }

    /// Returns the platform version recorded for a lifecycle.
    #[must_use]
    pub fn platform_version(&self, lifecycle: &str) -> Option<&str> {
        self.lifecycle_map.get(lifecycle).map(String::as_str)
    }

    /// Returns the lifecycle an origin system writes to.
    #[must_use]
    pub fn lifecycle_for_origin(&self, origin_system: &str) -> Option<&str> {
        self.origin_map.get(origin_system).map(String::as_str)
    }

    /// Returns the first origin system (by id) mapped to a lifecycle.
    #[must_use]
    pub fn origin_for_lifecycle(&self, lifecycle: &str) -> Option<&str> {
        self.origin_map
            .iter()
            .find(|(_, mapped)| mapped.as_str() == lifecycle)
            .map(|(origin, _)| origin.as_str())
    }
}

/// Settings for the annotation service.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Base URL used to build public concept and agent links.
    pub public_api_url: String,
    /// Whether an empty predicate falls back to `default_predicate`.
    pub allow_default_predicate: bool,
    /// Predicate used for annotations without one.
    pub default_predicate: String,
    /// Predicate vocabulary.
    pub relations: PredicateTable,
}

impl ServiceSettings {
    /// Creates settings with the standard vocabulary and defaulting disabled.
    #[must_use]
    pub fn new(public_api_url: impl Into<String>) -> Self {
        Self {
            public_api_url: public_api_url.into(),
            allow_default_predicate: false,
            default_predicate: DEFAULT_PREDICATE.to_string(),
            relations: PredicateTable::standard(),
        }
    }

    /// Enables or disables predicate defaulting.
    #[must_use]
    pub const fn with_allow_default_predicate(mut self, allow: bool) -> Self {
        self.allow_default_predicate = allow;
        self
    }

    /// Sets the fallback predicate.
    #[must_use]
    pub fn with_default_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.default_predicate = predicate.into();
        self
    }

    /// Replaces the predicate vocabulary.
    #[must_use]
    pub fn with_relations(mut self, relations: PredicateTable) -> Self {
        self.relations = relations;
        self
    }
}

/// Service identity reported by the health endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    /// Human-readable application name.
    pub name: String,
    /// System code.
    pub system_code: String,
    /// Crate version.
    pub version: String,
}

impl AppInfo {
    /// Creates app info with the crate version.
    #[must_use]
    pub fn new(name: impl Into<String>, system_code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_code: system_code.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for AppInfo {
    fn default() -> Self {
        Self::new("annotations-rw", "annotations-rw")
    }
}
