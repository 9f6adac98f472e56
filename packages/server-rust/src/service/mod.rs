//! Operation loading, registration and dispatch.
//!
//! This module implements the configuration-driven operation pipeline:
//!
//! 1. **Loading** (`loader`): locator -> constructed group via the `GroupCatalog`
//! 2. **Registration** (`group`, `operation`, `registry`): groups register
//!    operations explicitly; the builder freezes them into an `OperationRegistry`
//! 3. **Bootstrap** (`bootstrap`): configuration -> registry, abort-vs-skip policy
//! 4. **Middleware** (`middleware`): Tower layers (metrics, timeout)
//! 5. **Routing** (`router`): validation, context injection, handler invocation
//! 6. **Dispatch** (`dispatcher`): name parsing and error normalisation

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod group;
pub mod loader;
pub mod middleware;
pub mod operation;
pub mod registry;
pub mod router;

// Re-export key types for convenient access.
pub use bootstrap::{bootstrap, BootstrapError, BootstrapReport, Bootstrapped, FailedGroup};
pub use config::DispatchConfig;
pub use context::{
    ContextServices, ExecutionContext, LogLevel, MemorySink, NoResources, Notification, NotificationSink,
    ResourceResolver, TracingSink,
};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use group::{GroupInstance, NoSettings, ServiceGroup};
pub use loader::{GroupCatalog, LoadError, LoadErrorKind, LoadedGroup};
pub use operation::{Call, CallContext, DispatchError, OperationDescriptor, OperationMeta, OperationSet};
pub use registry::{
    build_group, BuildError, BuildWarning, GroupBuild, GroupEntry, OperationListing, OperationRegistry,
    RegistryBuilder,
};
pub use router::OperationRouter;
