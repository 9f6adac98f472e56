//! Minimal operations: a greeting, an echo and a counter.

use std::sync::Arc;

use opgroup_core::{FieldDef, InputSchema, OperationInput};
use serde::Deserialize;

use crate::service::{NoSettings, OperationMeta, OperationSet, ServiceGroup};

pub const LOCATOR: &str = "opgroup_server::groups::example:ExampleGroup";

/// Input for operations that take no arguments.
#[derive(Debug, Default, Deserialize)]
pub struct NoInput {}

impl OperationInput for NoInput {
    fn input_schema() -> InputSchema {
        InputSchema::new("NoInput")
    }
}

#[derive(Debug, Deserialize)]
pub struct EchoInput {
    pub text: String,
}

impl OperationInput for EchoInput {
    fn input_schema() -> InputSchema {
        InputSchema::new("EchoInput").field(FieldDef::string("text").describe("The text to echo back"))
    }
}

#[derive(Debug, Deserialize)]
pub struct CountInput {
    pub number: u32,
}

impl OperationInput for CountInput {
    fn input_schema() -> InputSchema {
        InputSchema::new("CountInput").field(
            FieldDef::integer("number")
                .minimum(1.0)
                .describe("The number to count up to"),
        )
    }
}

pub struct ExampleGroup;

impl ExampleGroup {
    fn count_to(number: u32) -> String {
        (1..=number)
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl ServiceGroup for ExampleGroup {
    type Settings = NoSettings;

    fn new(_settings: NoSettings) -> anyhow::Result<Self> {
        Ok(Self)
    }

    fn operations(ops: &mut OperationSet<Self>) {
        ops.op(
            OperationMeta::new("hello_world").doc("Return a simple hello world message."),
            |_g: Arc<Self>, _input: NoInput| async move { anyhow::Ok("Hello, World!") },
        )
        .op(
            OperationMeta::new("echo").doc("Echo the provided text back with a prefix."),
            |_g: Arc<Self>, input: EchoInput| async move { anyhow::Ok(format!("Echo: {}", input.text)) },
        )
        .op(
            OperationMeta::new("count_to").doc("Count from 1 to the provided number."),
            |_g: Arc<Self>, input: CountInput| async move { anyhow::Ok(Self::count_to(input.number)) },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_comma_separated() {
        assert_eq!(ExampleGroup::count_to(5), "1, 2, 3, 4, 5");
        assert_eq!(ExampleGroup::count_to(1), "1");
    }

    #[test]
    fn count_input_rejects_zero() {
        let mut args = opgroup_core::Arguments::new();
        args.insert("number".to_string(), serde_json::json!(0));
        let err = CountInput::input_schema().validate(&args).unwrap_err();
        assert!(err.mentions("number"));
    }
}
