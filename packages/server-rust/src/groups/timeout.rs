//! Long-running operations for exercising deadlines and cancellation.
//!
//! Every handler here watches the execution context's cancellation token so
//! that a call abandoned by the dispatcher stops at its next step.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use opgroup_core::{FieldDef, InputSchema, OperationInput};
use serde::Deserialize;

use super::example::NoInput;
use crate::service::{ExecutionContext, NoSettings, OperationMeta, OperationSet, ServiceGroup};

pub const LOCATOR: &str = "opgroup_server::groups::timeout:TimeoutGroup";

#[derive(Debug, Deserialize)]
pub struct SleepInput {
    pub seconds: f64,
}

impl OperationInput for SleepInput {
    fn input_schema() -> InputSchema {
        InputSchema::new("SleepInput").field(
            FieldDef::number("seconds")
                .minimum(0.0)
                .describe("How long to sleep, in seconds"),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct CounterInput {
    pub limit: u32,
    pub delay: f64,
}

impl OperationInput for CounterInput {
    fn input_schema() -> InputSchema {
        InputSchema::new("CounterInput")
            .field(FieldDef::integer("limit").minimum(0.0).describe("The number to count up to"))
            .field(
                FieldDef::number("delay")
                    .minimum(0.0)
                    .describe("Seconds to wait between counts"),
            )
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkInput {
    pub iterations: u32,
}

impl OperationInput for WorkInput {
    fn input_schema() -> InputSchema {
        InputSchema::new("WorkInput").field(
            FieldDef::integer("iterations")
                .minimum(1.0)
                .describe("Number of calculation iterations to perform"),
        )
    }
}

const WORK_CHUNK: u32 = 100;

#[derive(Default)]
pub struct TimeoutGroup {
    invocations: AtomicU64,
}

impl TimeoutGroup {
    fn started(&self) {
        self.invocations.fetch_add(1, Ordering::SeqCst);
    }

    async fn pause(ctx: &ExecutionContext, duration: Duration) -> anyhow::Result<()> {
        if duration.is_zero() {
            tokio::task::yield_now().await;
            if ctx.is_cancelled() {
                bail!("cancelled");
            }
            return Ok(());
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = ctx.cancelled() => Err(anyhow!("cancelled")),
        }
    }

    async fn sleep(&self, input: SleepInput, ctx: ExecutionContext) -> anyhow::Result<String> {
        self.started();
        Self::pause(&ctx, Duration::try_from_secs_f64(input.seconds)?).await?;
        Ok(format!("Slept for {} seconds", input.seconds))
    }

    async fn slow_counter(&self, input: CounterInput, ctx: ExecutionContext) -> anyhow::Result<String> {
        self.started();
        let start = Instant::now();
        let delay = Duration::try_from_secs_f64(input.delay)?;
        let mut counted = String::new();
        for i in 1..=input.limit {
            if ctx.is_cancelled() {
                bail!("cancelled");
            }
            ctx.report_progress(f64::from(i), Some(f64::from(input.limit)));
            ctx.info(format!("Counter: {i}/{}", input.limit));
            if i > 1 {
                counted.push_str(", ");
            }
            counted.push_str(&i.to_string());
            Self::pause(&ctx, delay).await?;
        }
        Ok(format!(
            "Counted to {} in {:.2} seconds: {counted}",
            input.limit,
            start.elapsed().as_secs_f64(),
        ))
    }

    async fn cpu_intensive(&self, input: WorkInput, ctx: ExecutionContext) -> anyhow::Result<String> {
        self.started();
        ctx.info(format!(
            "Starting CPU-intensive operation with {} iterations",
            input.iterations
        ));
        let start = Instant::now();
        let mut result: u64 = 0;
        for i in 0..input.iterations {
            if i % WORK_CHUNK == 0 {
                if ctx.is_cancelled() {
                    bail!("cancelled");
                }
                ctx.report_progress(f64::from(i), Some(f64::from(input.iterations)));
                tokio::task::yield_now().await;
            }
            result = result.wrapping_add((0..1000u64).map(|j| j * j).sum::<u64>());
        }
        Ok(format!(
            "Completed {} iterations in {:.2} seconds with result: {result}",
            input.iterations,
            start.elapsed().as_secs_f64()
        ))
    }

    fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl ServiceGroup for TimeoutGroup {
    type Settings = NoSettings;

    fn new(_settings: NoSettings) -> anyhow::Result<Self> {
        Ok(Self::default())
    }

    fn operations(ops: &mut OperationSet<Self>) {
        ops.op_with_context(
            OperationMeta::new("sleep").doc("Sleep for the specified number of seconds."),
            |g: Arc<Self>, input: SleepInput, ctx: ExecutionContext| async move { g.sleep(input, ctx).await },
        )
        .op_with_context(
            OperationMeta::new("slow_counter")
                .doc("Count up to a limit with a delay between each number, reporting progress."),
            |g: Arc<Self>, input: CounterInput, ctx: ExecutionContext| async move {
                g.slow_counter(input, ctx).await
            },
        )
        .op_with_context(
            OperationMeta::new("cpu_intensive").doc("Busy work that yields between chunks."),
            |g: Arc<Self>, input: WorkInput, ctx: ExecutionContext| async move {
                g.cpu_intensive(input, ctx).await
            },
        )
        .op(
            OperationMeta::new("invocations").doc("Number of handler invocations so far."),
            |g: Arc<Self>, _input: NoInput| async move { anyhow::Ok(g.invocations()) },
        );
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::service::{CallContext, ContextServices};

    fn context(cancel: CancellationToken) -> ExecutionContext {
        let call = CallContext {
            call_id: 1,
            request_id: uuid::Uuid::new_v4(),
            group: "timeout".to_string(),
            operation: "sleep".to_string(),
            deadline: Duration::from_secs(5),
            cancel,
        };
        ExecutionContext::new(&call, ContextServices::default())
    }

    #[tokio::test]
    async fn sleep_reports_duration() {
        let group = TimeoutGroup::default();
        let out = group
            .sleep(SleepInput { seconds: 0.01 }, context(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(out, "Slept for 0.01 seconds");
        assert_eq!(group.invocations(), 1);
    }

    #[tokio::test]
    async fn sleep_stops_when_cancelled() {
        let group = TimeoutGroup::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = group
            .sleep(SleepInput { seconds: 60.0 }, context(cancel))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cancelled");
    }

    #[tokio::test]
    async fn slow_counter_lists_every_number() {
        let group = TimeoutGroup::default();
        let out = group
            .slow_counter(CounterInput { limit: 3, delay: 0.0 }, context(CancellationToken::new()))
            .await
            .unwrap();
        assert!(out.starts_with("Counted to 3 in "));
        assert!(out.ends_with("seconds: 1, 2, 3"));
    }

    #[tokio::test]
    async fn slow_counter_with_huge_limit_stops_when_cancelled() {
        let group = TimeoutGroup::default();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = group
            .slow_counter(
                CounterInput {
                    limit: 4_000_000_000,
                    delay: 0.0,
                },
                context(cancel),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cancelled");
    }

    #[tokio::test]
    async fn cpu_intensive_completes() {
        let group = TimeoutGroup::default();
        let out = group
            .cpu_intensive(WorkInput { iterations: 250 }, context(CancellationToken::new()))
            .await
            .unwrap();
        assert!(out.starts_with("Completed 250 iterations"));
    }
}
