//! Arithmetic operations on two numbers.

use std::sync::Arc;

use anyhow::{bail, ensure};
use opgroup_core::{FieldDef, InputSchema, OperationInput};
use serde::Deserialize;

use crate::service::{OperationMeta, OperationSet, ServiceGroup};

pub const LOCATOR: &str = "opgroup_server::groups::math:MathGroup";

const MAX_PRECISION: u32 = 15;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MathSettings {
    /// Rounding applied when a call does not ask for its own precision.
    pub default_precision: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ArithmeticInput {
    pub x: f64,
    pub y: f64,
    pub precision: Option<u32>,
}

impl OperationInput for ArithmeticInput {
    fn input_schema() -> InputSchema {
        InputSchema::new("ArithmeticInput")
            .describe("Input for arithmetic operations")
            .field(FieldDef::number("x").describe("First number"))
            .field(FieldDef::number("y").describe("Second number"))
            .field(
                FieldDef::integer("precision")
                    .optional()
                    .minimum(0.0)
                    .maximum(f64::from(MAX_PRECISION))
                    .describe("Decimal precision"),
            )
    }
}

pub struct MathGroup {
    default_precision: Option<u32>,
}

impl MathGroup {
    fn finish(&self, value: f64, precision: Option<u32>) -> anyhow::Result<f64> {
        ensure!(value.is_finite(), "result is not a finite number");
        Ok(match precision.or(self.default_precision) {
            Some(digits) => round_to(value, digits),
            None => value,
        })
    }

    fn add(&self, input: &ArithmeticInput) -> anyhow::Result<f64> {
        self.finish(input.x + input.y, input.precision)
    }

    fn subtract(&self, input: &ArithmeticInput) -> anyhow::Result<f64> {
        self.finish(input.x - input.y, input.precision)
    }

    fn multiply(&self, input: &ArithmeticInput) -> anyhow::Result<f64> {
        self.finish(input.x * input.y, input.precision)
    }

    fn divide(&self, input: &ArithmeticInput) -> anyhow::Result<f64> {
        if input.y == 0.0 {
            bail!("division by zero");
        }
        self.finish(input.x / input.y, input.precision)
    }

    fn power(&self, input: &ArithmeticInput) -> anyhow::Result<f64> {
        self.finish(input.x.powf(input.y), input.precision)
    }
}

fn round_to(value: f64, digits: u32) -> f64 {
    #[allow(clippy::cast_possible_wrap)]
    let factor = 10f64.powi(digits as i32);
    let scaled = value * factor;
    // Values this large carry no fractional digits to round.
    if scaled.is_finite() {
        scaled.round() / factor
    } else {
        value
    }
}

impl ServiceGroup for MathGroup {
    type Settings = MathSettings;

    fn new(settings: MathSettings) -> anyhow::Result<Self> {
        if let Some(digits) = settings.default_precision {
            ensure!(
                digits <= MAX_PRECISION,
                "default_precision must be at most {MAX_PRECISION}, got {digits}"
            );
        }
        Ok(Self {
            default_precision: settings.default_precision,
        })
    }

    fn operations(ops: &mut OperationSet<Self>) {
        ops.op(
            OperationMeta::new("add").doc("Add two numbers."),
            |g: Arc<Self>, input: ArithmeticInput| async move { g.add(&input) },
        )
        .op(
            OperationMeta::new("subtract").doc("Subtract y from x."),
            |g: Arc<Self>, input: ArithmeticInput| async move { g.subtract(&input) },
        )
        .op(
            OperationMeta::new("multiply").doc("Multiply two numbers."),
            |g: Arc<Self>, input: ArithmeticInput| async move { g.multiply(&input) },
        )
        .op(
            OperationMeta::new("divide").doc("Divide x by y."),
            |g: Arc<Self>, input: ArithmeticInput| async move { g.divide(&input) },
        )
        .op(
            OperationMeta::new("power").doc("Raise x to the power of y."),
            |g: Arc<Self>, input: ArithmeticInput| async move { g.power(&input) },
        );
    }
}
