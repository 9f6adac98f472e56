//! Built-in service groups.
//!
//! Each module exports a `LOCATOR` under which `builtin_catalog` registers
//! its group, so configuration files can name them in `class_path` or as
//! service group keys.

pub mod example;
pub mod math;
pub mod schema;
pub mod timeout;

pub use example::ExampleGroup;
pub use math::MathGroup;
pub use schema::SchemaGroup;
pub use timeout::TimeoutGroup;

use crate::service::GroupCatalog;

/// Catalog holding every built-in group.
#[must_use]
pub fn builtin_catalog() -> GroupCatalog {
    let mut catalog = GroupCatalog::new();
    catalog
        .register::<MathGroup>(math::LOCATOR)
        .register::<ExampleGroup>(example::LOCATOR)
        .register::<SchemaGroup>(schema::LOCATOR)
        .register::<TimeoutGroup>(timeout::LOCATOR);
    catalog
}
