//! Configuration model for groups and multi-group services.
//!
//! A configuration document is either a single group (`GroupConfig`) or a
//! service (`ServiceConfig`) whose `groups` field maps locator keys to group
//! configurations. The shape is detected from the content, the syntax from the
//! file extension.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorKind;

/// Free-form settings handed to a group constructor.
pub type Settings = Map<String, Value>;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors raised while reading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read configuration file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported configuration format: '{extension}'")]
    UnsupportedFormat { extension: String },
    #[error("invalid configuration: {message}")]
    Format { message: String },
    #[error("invalid group name '{name}': expected a non-empty token of letters, digits, '_' or '-'")]
    InvalidGroupName { name: String },
    #[error("duplicate group name '{name}' declared by '{first}' and '{second}'")]
    DuplicateGroupName {
        name: String,
        first: String,
        second: String,
    },
}

impl ConfigError {
    fn format(message: impl fmt::Display) -> Self {
        Self::Format {
            message: message.to_string(),
        }
    }

    /// Returns the taxonomy class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::Io { .. } => ErrorKind::ConfigNotFound,
            _ => ErrorKind::ConfigFormatInvalid,
        }
    }
}

// ---------------------------------------------------------------------------
// GroupConfig
// ---------------------------------------------------------------------------

/// Configuration for a single group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group name, used as the namespace prefix of its operations.
    pub name: String,
    /// Human-readable description of the group.
    #[serde(default)]
    pub description: Option<String>,
    /// Implementation locator (`"module.path:TypeName"`). Required when the
    /// group is loaded on its own; inside a service the map key is used when
    /// this is absent.
    #[serde(default)]
    pub class_path: Option<String>,
    /// Settings passed to the group constructor.
    #[serde(default)]
    pub config: Settings,
    /// External packages the group declares as required.
    #[serde(default)]
    pub packages: Vec<String>,
    /// Names of environment variables the group expects. Accepts either a list
    /// of names or a name-to-description map.
    #[serde(default, deserialize_with = "env_var_names")]
    pub env_vars: Vec<String>,
}

impl GroupConfig {
    /// Creates a configuration with only a name and a locator.
    #[must_use]
    pub fn new(name: impl Into<String>, class_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            class_path: Some(class_path.into()),
            config: Settings::new(),
            packages: Vec::new(),
            env_vars: Vec::new(),
        }
    }

    /// Checks that the name is usable as a namespace prefix.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidGroupName` when it is not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if is_valid_group_name(&self.name) {
            Ok(())
        } else {
            Err(ConfigError::InvalidGroupName {
                name: self.name.clone(),
            })
        }
    }

    /// Names of the environment variables this group declares as required.
    #[must_use]
    pub fn required_env_vars(&self) -> &[String] {
        &self.env_vars
    }
}

/// Returns `true` when `name` is a non-empty token free of the `.` separator.
#[must_use]
pub fn is_valid_group_name(name: &str) -> bool {
    static TOKEN: OnceLock<Option<Regex>> = OnceLock::new();
    TOKEN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").ok())
        .as_ref()
        .is_some_and(|token| token.is_match(name))
}

fn env_var_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum EnvVars {
        Names(Vec<String>),
        Described(BTreeMap<String, Value>),
    }

    Ok(match Option::<EnvVars>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(EnvVars::Names(names)) => names,
        Some(EnvVars::Described(map)) => map.into_keys().collect(),
    })
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// Configuration for a service made of several groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name.
    pub name: String,
    /// Human-readable description of the service.
    #[serde(default)]
    pub description: Option<String>,
    /// Group configurations keyed by implementation locator.
    pub groups: BTreeMap<String, GroupConfig>,
    /// Packages shared by all groups.
    #[serde(default)]
    pub packages: Vec<String>,
    /// Environment variables shared by all groups, name to description.
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

impl ServiceConfig {
    /// Iterates `(locator, group)` pairs in key order. The locator is the
    /// group's own `class_path` when set, otherwise its map key.
    pub fn group_entries(&self) -> impl Iterator<Item = (&str, &GroupConfig)> {
        self.groups.iter().map(|(key, group)| {
            let locator = group.class_path.as_deref().unwrap_or(key.as_str());
            (locator, group)
        })
    }

    /// Validates every group and enforces service-wide name uniqueness.
    ///
    /// # Errors
    ///
    /// Returns the first invalid group name or the first duplicate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::format("service name must not be empty"));
        }
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (locator, group) in self.group_entries() {
            group.validate()?;
            if let Some(first) = seen.insert(group.name.as_str(), locator) {
                return Err(ConfigError::DuplicateGroupName {
                    name: group.name.clone(),
                    first: first.to_string(),
                    second: locator.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Union of the shared and per-group environment variable names.
    #[must_use]
    pub fn required_env_vars(&self) -> BTreeSet<&str> {
        self.env_vars
            .keys()
            .map(String::as_str)
            .chain(
                self.groups
                    .values()
                    .flat_map(|g| g.env_vars.iter().map(String::as_str)),
            )
            .collect()
    }
}

// ---------------------------------------------------------------------------
// LoadedConfig
// ---------------------------------------------------------------------------

/// Syntax of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Picks the syntax from the file extension.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnsupportedFormat` for anything other than
    /// `.yaml`, `.yml` or `.json`.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::UnsupportedFormat { extension }),
        }
    }
}

/// A parsed configuration document.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedConfig {
    Service(ServiceConfig),
    Group(GroupConfig),
}

impl LoadedConfig {
    /// Parses a document held in memory.
    ///
    /// A document whose `groups` field is a map is a service; anything else is
    /// read as a single group.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Format` on syntax errors, on a non-mapping
    /// document, or when the detected shape does not match.
    pub fn parse(text: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let document: Value = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(ConfigError::format)?,
            ConfigFormat::Json => serde_json::from_str(text).map_err(ConfigError::format)?,
        };
        if !document.is_object() {
            return Err(ConfigError::format("document must be a mapping"));
        }
        let is_service = document.get("groups").is_some_and(Value::is_object);
        if is_service {
            serde_json::from_value(document)
                .map(Self::Service)
                .map_err(|e| ConfigError::format(format!("invalid service configuration: {e}")))
        } else {
            serde_json::from_value(document)
                .map(Self::Group)
                .map_err(|e| ConfigError::format(format!("invalid group configuration: {e}")))
        }
    }

    /// Name of the service or group.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Service(service) => &service.name,
            Self::Group(group) => &group.name,
        }
    }

    /// Description of the service or group, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Service(service) => service.description.as_deref(),
            Self::Group(group) => group.description.as_deref(),
        }
    }

    /// Packages the whole configuration declares, shared ones first.
    #[must_use]
    pub fn required_packages(&self) -> Vec<&str> {
        match self {
            Self::Service(service) => {
                let mut packages: Vec<&str> = service.packages.iter().map(String::as_str).collect();
                for group in service.groups.values() {
                    for package in &group.packages {
                        if !packages.contains(&package.as_str()) {
                            packages.push(package);
                        }
                    }
                }
                packages
            }
            Self::Group(group) => group.packages.iter().map(String::as_str).collect(),
        }
    }

    /// Validates the shape of the configuration.
    ///
    /// # Errors
    ///
    /// See `GroupConfig::validate` and `ServiceConfig::validate`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Service(service) => service.validate(),
            Self::Group(group) => group.validate(),
        }
    }
}

/// Loads and validates a configuration file.
///
/// # Errors
///
/// - `ConfigError::NotFound` when the file does not exist
/// - `ConfigError::UnsupportedFormat` for unknown extensions
/// - `ConfigError::Format` / `InvalidGroupName` / `DuplicateGroupName` for
///   content problems
pub fn load_config(path: &Path) -> Result<LoadedConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let format = ConfigFormat::from_path(path)?;
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = LoadedConfig::parse(&text, format)?;
    config.validate()?;
    tracing::debug!(path = %path.display(), name = config.name(), "configuration loaded");
    Ok(config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SERVICE_YAML: &str = r#"
name: tools
description: Utility tools
packages: [numpy]
env_vars:
  API_KEY: key for the remote api
groups:
  "opgroup_server::groups::math:MathGroup":
    name: math
    config:
      default_precision: 2
  "opgroup_server::groups::example:ExampleGroup":
    name: example
    env_vars: [EXAMPLE_TOKEN]
    packages: [numpy, pandas]
"#;

    #[test]
    fn parses_service_document() {
        let config = LoadedConfig::parse(SERVICE_YAML, ConfigFormat::Yaml).unwrap();
        let LoadedConfig::Service(service) = config else {
            panic!("expected a service configuration");
        };
        assert_eq!(service.name, "tools");
        assert_eq!(service.groups.len(), 2);
        let entries: Vec<_> = service.group_entries().map(|(l, g)| (l, g.name.as_str())).collect();
        assert_eq!(
            entries,
            vec![
                ("opgroup_server::groups::example:ExampleGroup", "example"),
                ("opgroup_server::groups::math:MathGroup", "math"),
            ]
        );
        let math = &service.groups["opgroup_server::groups::math:MathGroup"];
        assert_eq!(math.config.get("default_precision"), Some(&Value::from(2)));
        assert!(service.validate().is_ok());
    }

    #[test]
    fn parses_single_group_document() {
        let json = r#"{"name": "math", "class_path": "m:MathGroup", "env_vars": {"TOKEN": "t"}}"#;
        let config = LoadedConfig::parse(json, ConfigFormat::Json).unwrap();
        let LoadedConfig::Group(group) = config else {
            panic!("expected a group configuration");
        };
        assert_eq!(group.class_path.as_deref(), Some("m:MathGroup"));
        assert_eq!(group.required_env_vars(), ["TOKEN".to_string()]);
        assert!(group.config.is_empty());
    }

    #[test]
    fn class_path_overrides_map_key() {
        let yaml = r#"
name: svc
groups:
  alias:
    name: math
    class_path: "real.module:MathGroup"
"#;
        let LoadedConfig::Service(service) = LoadedConfig::parse(yaml, ConfigFormat::Yaml).unwrap() else {
            panic!("expected a service configuration");
        };
        let (locator, _) = service.group_entries().next().unwrap();
        assert_eq!(locator, "real.module:MathGroup");
    }

    #[test]
    fn duplicate_group_names_rejected() {
        let yaml = r#"
name: svc
groups:
  "a:A":
    name: same
  "b:B":
    name: same
"#;
        let config = LoadedConfig::parse(yaml, ConfigFormat::Yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            &err,
            ConfigError::DuplicateGroupName { name, first, second }
                if name == "same" && first == "a:A" && second == "b:B"
        ));
        assert_eq!(err.kind(), ErrorKind::ConfigFormatInvalid);
    }

    #[test]
    fn group_name_must_be_a_token() {
        assert!(is_valid_group_name("math"));
        assert!(is_valid_group_name("data-processor"));
        assert!(is_valid_group_name("_private2"));
        assert!(!is_valid_group_name(""));
        assert!(!is_valid_group_name("math.ops"));
        assert!(!is_valid_group_name("has space"));
        assert!(!is_valid_group_name("9lives"));
        assert!(!is_valid_group_name("math\n"));
        assert!(!is_valid_group_name("caf\u{e9}"));

        let group = GroupConfig::new("bad.name", "m:T");
        assert!(matches!(group.validate(), Err(ConfigError::InvalidGroupName { .. })));
    }

    #[test]
    fn missing_name_is_format_error() {
        let err = LoadedConfig::parse("description: nothing", ConfigFormat::Yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Format { .. }));
    }

    #[test]
    fn scalar_document_is_format_error() {
        let err = LoadedConfig::parse("42", ConfigFormat::Json).unwrap_err();
        assert!(err.to_string().contains("mapping"));
    }

    #[test]
    fn required_env_vars_union() {
        let LoadedConfig::Service(service) = LoadedConfig::parse(SERVICE_YAML, ConfigFormat::Yaml).unwrap() else {
            panic!("expected a service configuration");
        };
        let vars: Vec<&str> = service.required_env_vars().into_iter().collect();
        assert_eq!(vars, vec!["API_KEY", "EXAMPLE_TOKEN"]);
    }

    #[test]
    fn required_packages_deduplicated() {
        let config = LoadedConfig::parse(SERVICE_YAML, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.required_packages(), vec!["numpy", "pandas"]);
    }

    #[test]
    fn load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/opgroup.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
        assert_eq!(err.kind(), ErrorKind::ConfigNotFound);
    }

    #[test]
    fn load_config_unsupported_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "name = 'x'").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { extension } if extension == "toml"));
    }

    #[test]
    fn load_config_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(SERVICE_YAML.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.name(), "tools");
        assert_eq!(config.description(), Some("Utility tools"));
    }

    #[test]
    fn load_config_invalid_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigFormatInvalid);
    }
}
