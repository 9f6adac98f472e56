//! `opgroup` Core: configuration model, input schemas, and request/response types.

pub mod config;
pub mod error;
pub mod schema;
pub mod types;

pub use config::{load_config, ConfigError, ConfigFormat, GroupConfig, LoadedConfig, ServiceConfig, Settings};
pub use error::ErrorKind;
pub use schema::{
    Constraints, FieldDef, FieldKind, InputSchema, OperationInput, ValidationFailure, Violation,
    RESERVED_CONTEXT_KEY,
};
pub use types::{
    full_operation_name, split_operation_name, Arguments, ExecutionRequest, ExecutionResponse, Payload,
};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
