//! The group trait implemented by every operation provider.

use std::any::type_name;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::operation::OperationSet;
use super::registry::{build_group, BuildError, GroupBuild};

// ---------------------------------------------------------------------------
// ServiceGroup trait
// ---------------------------------------------------------------------------

/// A plain type that contributes operations to the registry.
///
/// Groups are constructed once from their settings map, then asked to
/// register their operations. The registry holds the single instance for the
/// life of the process and every call is dispatched against it.
#[async_trait]
pub trait ServiceGroup: Send + Sync + Sized + 'static {
    /// Settings shape deserialised from the group's `config` map.
    type Settings: DeserializeOwned;

    /// Construct the group from its settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are acceptable in shape but rejected
    /// by the group.
    fn new(settings: Self::Settings) -> anyhow::Result<Self>;

    /// Register the group's operations. Called once per instance.
    fn operations(ops: &mut OperationSet<Self>);

    /// Release resources before process exit.
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Settings for groups that take none. Accepts and ignores any map.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct NoSettings {}

// ---------------------------------------------------------------------------
// GroupInstance (type-erased)
// ---------------------------------------------------------------------------

/// Type-erased handle to a constructed group.
#[async_trait]
pub trait GroupInstance: Send + Sync {
    /// Rust type name of the group, for diagnostics.
    fn type_name(&self) -> &'static str;

    /// Collect the group's operations under `group_name`.
    ///
    /// # Errors
    ///
    /// Returns `BuildError` if any registration is invalid.
    fn build(self: Arc<Self>, group_name: &str) -> Result<GroupBuild, BuildError>;

    /// Run the group's shutdown hook.
    async fn close(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<G: ServiceGroup> GroupInstance for G {
    fn type_name(&self) -> &'static str {
        type_name::<G>()
    }

    fn build(self: Arc<Self>, group_name: &str) -> Result<GroupBuild, BuildError> {
        build_group(self, group_name)
    }

    async fn close(&self) -> anyhow::Result<()> {
        ServiceGroup::shutdown(self).await
    }
}
