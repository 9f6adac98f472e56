//! Group loading: resolves an implementation locator to a constructed group.
//!
//! Locators look like `"module.path:TypeName"`. Resolution goes through a
//! [`GroupCatalog`], a compile-time map from locator to constructor that each
//! binary populates with the groups it links.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use opgroup_core::{ErrorKind, Settings};
use serde_json::Value;

use super::group::{GroupInstance, ServiceGroup};

// ---------------------------------------------------------------------------
// LoadError
// ---------------------------------------------------------------------------

/// Why a locator could not be turned into a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    /// Malformed locator, or nothing registered under it.
    NotFound,
    /// Settings could not be shaped into the group's settings type.
    NotConstructible,
    /// The group's constructor returned an error.
    ConstructorRejected,
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "not found",
            Self::NotConstructible => "not constructible",
            Self::ConstructorRejected => "constructor rejected settings",
        })
    }
}

/// Failure to load one group.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to load group {locator} ({kind}): {message}")]
pub struct LoadError {
    pub locator: String,
    pub kind: LoadErrorKind,
    pub message: String,
}

impl LoadError {
    fn new(locator: &str, kind: LoadErrorKind, message: impl Into<String>) -> Self {
        Self {
            locator: locator.to_string(),
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::GroupLoadFailed
    }
}

/// Splits a locator at its last `:` into module path and type name.
#[must_use]
pub fn parse_locator(locator: &str) -> Option<(&str, &str)> {
    let (module, type_name) = locator.rsplit_once(':')?;
    if module.is_empty() || type_name.is_empty() {
        return None;
    }
    Some((module, type_name))
}

// ---------------------------------------------------------------------------
// GroupCatalog
// ---------------------------------------------------------------------------

type Constructor = fn(&Settings) -> Result<Arc<dyn GroupInstance>, (LoadErrorKind, String)>;

fn construct<G: ServiceGroup>(settings: &Settings) -> Result<Arc<dyn GroupInstance>, (LoadErrorKind, String)> {
    let parsed: G::Settings = serde_json::from_value(Value::Object(settings.clone()))
        .map_err(|e| (LoadErrorKind::NotConstructible, e.to_string()))?;
    let group = G::new(parsed).map_err(|e| (LoadErrorKind::ConstructorRejected, format!("{e:#}")))?;
    Ok(Arc::new(group))
}

/// A group constructed from its locator.
pub struct LoadedGroup {
    pub locator: String,
    pub instance: Arc<dyn GroupInstance>,
}

impl fmt::Debug for LoadedGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedGroup")
            .field("locator", &self.locator)
            .field("type_name", &self.instance.type_name())
            .finish()
    }
}

/// Map from locator to group constructor.
#[derive(Clone, Default)]
pub struct GroupCatalog {
    constructors: HashMap<String, Constructor>,
}

impl GroupCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `G` constructible under `locator`. A later registration under the
    /// same locator replaces the earlier one.
    pub fn register<G: ServiceGroup>(&mut self, locator: impl Into<String>) -> &mut Self {
        self.constructors.insert(locator.into(), construct::<G>);
        self
    }

    #[must_use]
    pub fn contains(&self, locator: &str) -> bool {
        self.constructors.contains_key(locator)
    }

    /// Registered locators, sorted.
    #[must_use]
    pub fn locators(&self) -> Vec<&str> {
        let mut locators: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        locators.sort_unstable();
        locators
    }

    /// Resolve `locator` and construct the group with `settings`.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` when the locator is malformed or unknown, the
    /// settings do not fit the group, or its constructor fails.
    pub fn load(&self, locator: &str, settings: &Settings) -> Result<LoadedGroup, LoadError> {
        if parse_locator(locator).is_none() {
            return Err(LoadError::new(
                locator,
                LoadErrorKind::NotFound,
                "locator must have the form module.path:TypeName",
            ));
        }
        let Some(constructor) = self.constructors.get(locator) else {
            return Err(LoadError::new(
                locator,
                LoadErrorKind::NotFound,
                "no group registered under this locator",
            ));
        };
        let instance = constructor(settings).map_err(|(kind, message)| LoadError::new(locator, kind, message))?;
        tracing::debug!(%locator, type_name = instance.type_name(), "group constructed");
        Ok(LoadedGroup {
            locator: locator.to_string(),
            instance,
        })
    }
}

impl fmt::Debug for GroupCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupCatalog")
            .field("locators", &self.locators())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
