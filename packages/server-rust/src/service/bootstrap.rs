//! Turns a loaded configuration into a frozen operation registry.
//!
//! A single-group configuration aborts on any load or build failure. A
//! multi-group service logs a failing group, records it in the report and
//! carries on with the rest.

use opgroup_core::{ConfigError, ErrorKind, GroupConfig, LoadedConfig};

use super::loader::{GroupCatalog, LoadError};
use super::registry::{BuildError, BuildWarning, OperationRegistry, RegistryBuilder};

/// Why bootstrap could not produce a registry.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("group {group} has no class_path")]
    MissingLocator { group: String },
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Build(#[from] BuildError),
}

impl BootstrapError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(e) => e.kind(),
            Self::MissingLocator { .. } => ErrorKind::ConfigFormatInvalid,
            Self::Load(e) => e.kind(),
            Self::Build(e) => e.kind(),
        }
    }
}

/// One group that was skipped during a multi-group bootstrap.
#[derive(Debug)]
pub struct FailedGroup {
    pub name: String,
    pub locator: String,
    pub error: BootstrapError,
}

/// What bootstrap skipped along the way.
#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub failed_groups: Vec<FailedGroup>,
    pub skipped_operations: Vec<BuildWarning>,
}

impl BootstrapReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed_groups.is_empty() && self.skipped_operations.is_empty()
    }
}

/// Registry produced by bootstrap, with its report.
pub struct Bootstrapped {
    pub registry: OperationRegistry,
    pub report: BootstrapReport,
}

fn add_group(
    builder: &mut RegistryBuilder,
    catalog: &GroupCatalog,
    locator: &str,
    group: &GroupConfig,
) -> Result<(), BootstrapError> {
    let loaded = catalog.load(locator, &group.config)?;
    builder.add_group(&group.name, group.description.clone(), loaded)?;
    Ok(())
}

/// Load and register every group named by `config`.
///
/// # Errors
///
/// Returns `BootstrapError` when the configuration is invalid (including
/// duplicate group names, detected before any group is constructed) or when
/// the only group of a single-group configuration cannot be loaded.
pub fn bootstrap(config: &LoadedConfig, catalog: &GroupCatalog) -> Result<Bootstrapped, BootstrapError> {
    config.validate()?;
    let mut builder = OperationRegistry::builder();
    let mut report = BootstrapReport::default();

    match config {
        LoadedConfig::Group(group) => {
            let locator = group
                .class_path
                .as_deref()
                .ok_or_else(|| BootstrapError::MissingLocator {
                    group: group.name.clone(),
                })?;
            add_group(&mut builder, catalog, locator, group)?;
        }
        LoadedConfig::Service(service) => {
            for (locator, group) in service.group_entries() {
                if let Err(error) = add_group(&mut builder, catalog, locator, group) {
                    tracing::error!(group = %group.name, %locator, %error, "skipping group that failed to load");
                    report.failed_groups.push(FailedGroup {
                        name: group.name.clone(),
                        locator: locator.to_string(),
                        error,
                    });
                }
            }
        }
    }

    let (registry, skipped) = builder.build();
    report.skipped_operations = skipped;
    tracing::info!(
        service = config.name(),
        groups = registry.len(),
        operations = registry.operation_count(),
        failed = report.failed_groups.len(),
        "registry ready"
    );
    Ok(Bootstrapped { registry, report })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
