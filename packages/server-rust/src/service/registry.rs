//! Operation registry: per-group descriptor collection and the frozen lookup table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use opgroup_core::ErrorKind;
use serde::Serialize;
use serde_json::Value;

use super::group::{GroupInstance, ServiceGroup};
use super::loader::LoadedGroup;
use super::operation::{Accepts, OperationDescriptor, OperationSet};

// ---------------------------------------------------------------------------
// Build results
// ---------------------------------------------------------------------------

/// Invalid registration. Fails the whole group.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{group}.{operation}: operation declares a schema but no parameter accepts it")]
    SchemaParameterMismatch { group: String, operation: String },
    #[error("{group}.{operation}: schema {schema} declares reserved field 'context'")]
    ReservedField {
        group: String,
        operation: String,
        schema: String,
    },
    #[error("group {name} is already registered")]
    DuplicateGroup { name: String },
}

impl BuildError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SchemaParameterMismatch { .. } | Self::ReservedField { .. } => ErrorKind::GroupLoadFailed,
            Self::DuplicateGroup { .. } => ErrorKind::ConfigFormatInvalid,
        }
    }
}

/// Non-fatal build finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildWarning {
    /// A later registration reused a full name and was skipped.
    DuplicateOperation { full_name: String },
}

impl BuildWarning {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateOperation { .. } => ErrorKind::DuplicateOperationName,
        }
    }
}

/// Descriptors produced for one group, in registration order.
#[derive(Debug, Default)]
pub struct GroupBuild {
    pub descriptors: Vec<OperationDescriptor>,
    pub skipped: Vec<BuildWarning>,
}

/// Collect the operations of one group instance.
///
/// # Errors
///
/// Returns `BuildError` if a registration declares a schema its handler
/// cannot accept, or a schema uses the reserved `context` field.
pub fn build_group<G: ServiceGroup>(instance: Arc<G>, group_name: &str) -> Result<GroupBuild, BuildError> {
    let mut set = OperationSet::<G>::new();
    G::operations(&mut set);
    if set.is_empty() {
        tracing::warn!(group = %group_name, "group registers no operations");
    } else {
        tracing::debug!(group = %group_name, registrations = set.len(), "collected operations");
    }

    let mut build = GroupBuild::default();
    let mut seen = HashSet::new();
    for registration in set.registrations {
        let meta = registration.meta;
        let name = meta.external_name().to_string();

        let input_schema = match (&registration.accepts, &meta.schema) {
            (Accepts::Raw, Some(_)) => {
                return Err(BuildError::SchemaParameterMismatch {
                    group: group_name.to_string(),
                    operation: name,
                });
            }
            (Accepts::Typed(own), Some(declared)) if own.name != declared.name => {
                return Err(BuildError::SchemaParameterMismatch {
                    group: group_name.to_string(),
                    operation: name,
                });
            }
            (Accepts::Typed(own), _) => Some(own.clone()),
            (Accepts::Raw, None) => None,
        };

        if let Some(schema) = input_schema.as_ref().filter(|s| s.declares_reserved_field()) {
            return Err(BuildError::ReservedField {
                group: group_name.to_string(),
                operation: name,
                schema: schema.name.clone(),
            });
        }

        let full_name = opgroup_core::full_operation_name(group_name, &name);
        if !seen.insert(name.clone()) {
            tracing::warn!(operation = %full_name, "duplicate operation name, keeping the first registration");
            build.skipped.push(BuildWarning::DuplicateOperation { full_name });
            continue;
        }

        build.descriptors.push(OperationDescriptor {
            name,
            group: group_name.to_string(),
            input_schema,
            requires_context: registration.requires_context,
            documentation: meta.documentation.clone(),
            binder: (registration.bind)(instance.clone()),
        });
    }
    Ok(build)
}

// ---------------------------------------------------------------------------
// OperationRegistry
// ---------------------------------------------------------------------------

/// One registered group and its operations.
pub struct GroupEntry {
    pub name: String,
    pub description: Option<String>,
    pub locator: String,
    instance: Arc<dyn GroupInstance>,
    operations: HashMap<String, Arc<OperationDescriptor>>,
    order: Vec<String>,
}

impl GroupEntry {
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&Arc<OperationDescriptor>> {
        self.operations.get(name)
    }

    /// Operations in registration order.
    pub fn operations(&self) -> impl Iterator<Item = &Arc<OperationDescriptor>> {
        self.order.iter().filter_map(|name| self.operations.get(name))
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.instance.type_name()
    }
}

/// Read-only listing entry for one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationListing {
    pub full_name: String,
    pub documentation: String,
    pub input_schema: Value,
}

/// Frozen map of groups to their operations.
///
/// Built once at startup and only read afterwards. Groups are kept in
/// registration order for listings and shut down in reverse order.
pub struct OperationRegistry {
    groups: HashMap<String, GroupEntry>,
    order: Vec<String>,
}

impl OperationRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<&GroupEntry> {
        self.groups.get(name)
    }

    /// Group names in registration order.
    #[must_use]
    pub fn group_names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total operations across all groups.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.groups.values().map(|g| g.operations.len()).sum()
    }

    /// Every operation, grouped in registration order.
    #[must_use]
    pub fn list_operations(&self) -> Vec<OperationListing> {
        self.entries()
            .flat_map(GroupEntry::operations)
            .map(|descriptor| OperationListing {
                full_name: descriptor.full_name(),
                documentation: descriptor.documentation.clone().unwrap_or_else(|| {
                    format!("Operation {} in group {}", descriptor.name, descriptor.group)
                }),
                input_schema: descriptor.input_schema.as_ref().map_or_else(
                    || serde_json::json!({"type": "object", "properties": {}}),
                    |schema| schema.describe_json(),
                ),
            })
            .collect()
    }

    /// Run every group's shutdown hook in reverse registration order.
    ///
    /// Every hook runs even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first shutdown failure.
    pub async fn shutdown_all(&self) -> anyhow::Result<()> {
        let mut first_error = None;
        for name in self.order.iter().rev() {
            if let Some(entry) = self.groups.get(name) {
                if let Err(e) = entry.instance.close().await {
                    tracing::warn!(group = %name, error = %e, "group shutdown failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn entries(&self) -> impl Iterator<Item = &GroupEntry> {
        self.order.iter().filter_map(|name| self.groups.get(name))
    }
}

// ---------------------------------------------------------------------------
// RegistryBuilder
// ---------------------------------------------------------------------------

/// Accumulates groups, then freezes into an `OperationRegistry`.
#[derive(Default)]
pub struct RegistryBuilder {
    groups: HashMap<String, GroupEntry>,
    order: Vec<String>,
    skipped: Vec<BuildWarning>,
}

impl RegistryBuilder {
    /// Build a loaded group's operations and add it under `name`.
    ///
    /// # Errors
    ///
    /// Returns `BuildError` if the name is taken or the group's registrations
    /// are invalid. The builder is left unchanged on error.
    pub fn add_group(
        &mut self,
        name: &str,
        description: Option<String>,
        loaded: LoadedGroup,
    ) -> Result<&mut Self, BuildError> {
        if self.groups.contains_key(name) {
            return Err(BuildError::DuplicateGroup { name: name.to_string() });
        }
        let build = loaded.instance.clone().build(name)?;

        let mut operations = HashMap::new();
        let mut order = Vec::new();
        for descriptor in build.descriptors {
            order.push(descriptor.name.clone());
            operations.insert(descriptor.name.clone(), Arc::new(descriptor));
        }
        tracing::info!(
            group = %name,
            locator = %loaded.locator,
            operations = order.len(),
            "group registered"
        );

        self.skipped.extend(build.skipped);
        self.order.push(name.to_string());
        self.groups.insert(
            name.to_string(),
            GroupEntry {
                name: name.to_string(),
                description,
                locator: loaded.locator,
                instance: loaded.instance,
                operations,
                order,
            },
        );
        Ok(self)
    }

    /// Duplicate operations skipped so far.
    #[must_use]
    pub fn skipped(&self) -> &[BuildWarning] {
        &self.skipped
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> (OperationRegistry, Vec<BuildWarning>) {
        (
            OperationRegistry {
                groups: self.groups,
                order: self.order,
            },
            self.skipped,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use opgroup_core::{FieldDef, InputSchema, OperationInput};
    use serde::Deserialize;

    use super::*;
    use crate::service::group::NoSettings;
    use crate::service::operation::OperationMeta;

    #[derive(Deserialize)]
    struct Pair {
        x: f64,
        y: f64,
    }

    impl OperationInput for Pair {
        fn input_schema() -> InputSchema {
            InputSchema::new("Pair")
                .field(FieldDef::number("x"))
                .field(FieldDef::number("y"))
        }
    }

    #[derive(Deserialize)]
    struct Sneaky {}

    impl OperationInput for Sneaky {
        fn input_schema() -> InputSchema {
            InputSchema::new("Sneaky").field(FieldDef::any("context"))
        }
    }

    struct Adder;

    impl Adder {
        #[allow(clippy::unnecessary_wraps)]
        fn add(&self, pair: Pair) -> anyhow::Result<f64> {
            Ok(pair.x + pair.y)
        }
    }

    #[async_trait]
    impl ServiceGroup for Adder {
        type Settings = NoSettings;

        fn new(_settings: NoSettings) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn operations(ops: &mut OperationSet<Self>) {
            ops.op(OperationMeta::new("add").doc("Add two numbers"), |g: Arc<Self>, p: Pair| async move {
                g.add(p)
            });
            ops.op(OperationMeta::new("sum").schema_of::<Pair>(), |g: Arc<Self>, p: Pair| async move {
                g.add(p)
            });
            ops.op_raw(OperationMeta::new("raw"), |_g: Arc<Self>, args| async move {
                anyhow::Ok(args.len())
            });
            // Same external name as `add`: skipped.
            ops.op(OperationMeta::new("plus").rename("add"), |_g: Arc<Self>, _p: Pair| async move {
                anyhow::Ok(0.0)
            });
        }
    }

    struct RawWithSchema;

    #[async_trait]
    impl ServiceGroup for RawWithSchema {
        type Settings = NoSettings;

        fn new(_settings: NoSettings) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn operations(ops: &mut OperationSet<Self>) {
            ops.op_raw(OperationMeta::new("bad").schema_of::<Pair>(), |_g: Arc<Self>, _args| async move {
                anyhow::Ok(())
            });
        }
    }

    struct Reserved;

    #[async_trait]
    impl ServiceGroup for Reserved {
        type Settings = NoSettings;

        fn new(_settings: NoSettings) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn operations(ops: &mut OperationSet<Self>) {
            ops.op(OperationMeta::new("sneak"), |_g: Arc<Self>, _s: Sneaky| async move { anyhow::Ok(()) });
        }
    }

    struct Tracked {
        name: &'static str,
        log: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ServiceGroup for Tracked {
        type Settings = NoSettings;

        fn new(_settings: NoSettings) -> anyhow::Result<Self> {
            anyhow::bail!("constructed directly in tests")
        }

        fn operations(_ops: &mut OperationSet<Self>) {}

        async fn shutdown(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("shutdown:{}", self.name));
            Ok(())
        }
    }

    fn loaded<G: ServiceGroup>(group: G) -> LoadedGroup {
        LoadedGroup {
            locator: format!("tests:{}", std::any::type_name::<G>()),
            instance: Arc::new(group),
        }
    }

    #[test]
    fn duplicate_operation_keeps_first() {
        let build = build_group(Arc::new(Adder), "calc").unwrap();
        let names: Vec<&str> = build.descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["add", "sum", "raw"]);
        assert_eq!(
            build.skipped,
            vec![BuildWarning::DuplicateOperation {
                full_name: "calc.add".to_string()
            }]
        );
        assert_eq!(build.descriptors[0].documentation.as_deref(), Some("Add two numbers"));
    }

    #[test]
    fn schema_on_raw_handler_fails_group() {
        let err = build_group(Arc::new(RawWithSchema), "broken").unwrap_err();
        assert!(matches!(err, BuildError::SchemaParameterMismatch { .. }));
        assert!(err
            .to_string()
            .contains("operation declares a schema but no parameter accepts it"));
        assert_eq!(err.kind(), ErrorKind::GroupLoadFailed);
    }

    #[test]
    fn reserved_schema_field_fails_group() {
        let err = build_group(Arc::new(Reserved), "sneaky").unwrap_err();
        assert!(matches!(err, BuildError::ReservedField { ref schema, .. } if schema == "Sneaky"));
    }

    #[test]
    fn listing_uses_docs_or_generated_line() {
        let mut builder = OperationRegistry::builder();
        builder.add_group("calc", None, loaded(Adder)).unwrap();
        let (registry, skipped) = builder.build();
        assert_eq!(skipped.len(), 1);

        let listing = registry.list_operations();
        let names: Vec<&str> = listing.iter().map(|l| l.full_name.as_str()).collect();
        assert_eq!(names, vec!["calc.add", "calc.sum", "calc.raw"]);
        assert_eq!(listing[0].documentation, "Add two numbers");
        assert_eq!(listing[2].documentation, "Operation raw in group calc");
        assert_eq!(listing[0].input_schema["required"], serde_json::json!(["x", "y"]));
        assert_eq!(listing[2].input_schema["properties"], serde_json::json!({}));
    }

    #[test]
    fn duplicate_group_rejected() {
        let mut builder = OperationRegistry::builder();
        builder.add_group("calc", None, loaded(Adder)).unwrap();
        let err = builder.add_group("calc", None, loaded(Adder)).err().unwrap();
        assert!(matches!(err, BuildError::DuplicateGroup { ref name } if name == "calc"));
        let (registry, _) = builder.build();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.operation_count(), 3);
    }

    #[test]
    fn context_requirement_fixed_at_registration() {
        let build = build_group(Arc::new(Adder), "calc").unwrap();
        assert!(build.descriptors.iter().all(|d| !d.requires_context));
        assert!(build.descriptors[2].input_schema.is_none());
    }

    #[tokio::test]
    async fn shutdown_all_runs_in_reverse_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut builder = OperationRegistry::builder();
        for name in ["first", "second", "third"] {
            let group = Tracked {
                name,
                log: log.clone(),
            };
            builder.add_group(name, None, loaded(group)).unwrap();
        }
        let (registry, _) = builder.build();
        assert_eq!(registry.group_names(), vec!["first", "second", "third"]);

        registry.shutdown_all().await.unwrap();
        assert_eq!(
            log.lock().clone(),
            vec!["shutdown:third", "shutdown:second", "shutdown:first"]
        );
    }
}
