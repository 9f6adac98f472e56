//! `opgroup` Server: group loading, operation registry, and the dispatch pipeline.

pub mod groups;
pub mod service;
pub mod telemetry;

pub use groups::builtin_catalog;
pub use service::{bootstrap, Dispatcher, DispatcherBuilder, GroupCatalog, OperationRegistry, ServiceGroup};
