//! Single entry point for executing operations by full name.
//!
//! `Dispatcher::dispatch` never fails and never panics towards its caller:
//! every failure is normalised into an `ExecutionResponse` carrying the
//! client-facing message.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opgroup_core::{split_operation_name, Arguments, ExecutionRequest, ExecutionResponse};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use super::config::DispatchConfig;
use super::context::{ContextServices, NotificationSink, ResourceResolver};
use super::middleware::{build_dispatch_pipeline, DispatchPipeline};
use super::operation::{Call, CallContext, DispatchError};
use super::registry::{OperationListing, OperationRegistry};
use super::router::OperationRouter;

impl From<DispatchError> for ExecutionResponse {
    fn from(err: DispatchError) -> Self {
        tracing::debug!(kind = err.kind().as_str(), error = %err, "call failed");
        ExecutionResponse::failure(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes calls to registered operations through the dispatch pipeline.
pub struct Dispatcher {
    registry: Arc<OperationRegistry>,
    config: DispatchConfig,
    pipeline: DispatchPipeline,
    next_call_id: AtomicU64,
}

impl Dispatcher {
    /// Dispatcher with default settings and collaborators.
    #[must_use]
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self::builder(registry).build()
    }

    #[must_use]
    pub fn builder(registry: Arc<OperationRegistry>) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            config: DispatchConfig::default(),
            services: ContextServices::default(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Execute `request` under `deadline`.
    pub async fn dispatch(&self, request: ExecutionRequest, deadline: Duration) -> ExecutionResponse {
        let Some((group, operation)) = split_operation_name(&request.operation) else {
            return DispatchError::MalformedName.into();
        };
        let call = Call {
            ctx: CallContext {
                call_id: self.next_call_id.fetch_add(1, Ordering::Relaxed),
                request_id: request.request_id,
                group: group.to_string(),
                operation: operation.to_string(),
                deadline,
                cancel: CancellationToken::new(),
            },
            arguments: request.arguments.unwrap_or_default(),
        };
        match self.pipeline.clone().oneshot(call).await {
            Ok(payload) => ExecutionResponse::success(payload),
            Err(err) => err.into(),
        }
    }

    /// Execute `request` under the configured default deadline.
    pub async fn dispatch_default(&self, request: ExecutionRequest) -> ExecutionResponse {
        self.dispatch(request, self.config.default_deadline).await
    }

    /// Execute `operation` with `arguments` under the default deadline.
    pub async fn call(&self, operation: &str, arguments: Arguments) -> ExecutionResponse {
        self.dispatch_default(ExecutionRequest::new(operation, Some(arguments)))
            .await
    }

    /// Every available operation, in group then registration order.
    #[must_use]
    pub fn list_operations(&self) -> Vec<OperationListing> {
        self.registry.list_operations()
    }
}

// ---------------------------------------------------------------------------
// DispatcherBuilder
// ---------------------------------------------------------------------------

/// Configures a `Dispatcher` before it is built.
pub struct DispatcherBuilder {
    registry: Arc<OperationRegistry>,
    config: DispatchConfig,
    services: ContextServices,
}

impl DispatcherBuilder {
    #[must_use]
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Where execution-context notifications are delivered.
    #[must_use]
    pub fn notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.services.sink = sink;
        self
    }

    /// How execution contexts resolve resources.
    #[must_use]
    pub fn resource_resolver(mut self, resolver: Arc<dyn ResourceResolver>) -> Self {
        self.services.resolver = resolver;
        self
    }

    #[must_use]
    pub fn build(self) -> Dispatcher {
        let router = OperationRouter::new(self.registry.clone(), self.services);
        Dispatcher {
            registry: self.registry,
            config: self.config,
            pipeline: build_dispatch_pipeline(router),
            next_call_id: AtomicU64::new(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use opgroup_core::{FieldDef, InputSchema, OperationInput, Payload};
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::service::context::{ExecutionContext, MemorySink, Notification};
    use crate::service::group::{NoSettings, ServiceGroup};
    use crate::service::loader::LoadedGroup;
    use crate::service::operation::{OperationMeta, OperationSet};

    #[derive(Deserialize)]
    struct Steps {
        steps: u32,
    }

    impl OperationInput for Steps {
        fn input_schema() -> InputSchema {
            InputSchema::new("Steps").field(FieldDef::integer("steps").minimum(1.0))
        }
    }

    struct Walker;

    impl ServiceGroup for Walker {
        type Settings = NoSettings;

        fn new(_settings: NoSettings) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn operations(ops: &mut OperationSet<Self>) {
            ops.op_with_context(
                OperationMeta::new("walk"),
                |_g: Arc<Self>, input: Steps, ctx: ExecutionContext| async move {
                    for step in 1..=input.steps {
                        ctx.report_progress(f64::from(step), Some(f64::from(input.steps)));
                    }
                    anyhow::Ok(ctx.call_id())
                },
            );
        }
    }

    fn registry() -> Arc<OperationRegistry> {
        let mut builder = OperationRegistry::builder();
        builder
            .add_group(
                "walker",
                None,
                LoadedGroup {
                    locator: "tests:Walker".to_string(),
                    instance: Arc::new(Walker),
                },
            )
            .unwrap();
        Arc::new(builder.build().0)
    }

    #[tokio::test]
    async fn malformed_names_rejected() {
        let dispatcher = Dispatcher::new(registry());
        for name in ["walker", ".walk", "walker.", ""] {
            let response = dispatcher.call(name, Arguments::new()).await;
            assert_eq!(response.error.as_deref(), Some("malformed operation name"), "{name}");
            assert!(response.payload.is_none());
        }
    }

    #[tokio::test]
    async fn unknown_group_reported() {
        let dispatcher = Dispatcher::new(registry());
        let response = dispatcher.call("runner.walk", Arguments::new()).await;
        assert_eq!(response.error.as_deref(), Some("group not found: runner"));
    }

    #[tokio::test]
    async fn each_call_gets_its_own_context() {
        let sink = Arc::new(MemorySink::new());
        let dispatcher = Dispatcher::builder(registry())
            .notification_sink(sink.clone())
            .build();

        let mut args = Arguments::new();
        args.insert("steps".to_string(), json!(2));
        let first = dispatcher.call("walker.walk", args.clone()).await;
        let second = dispatcher.call("walker.walk", args).await;
        assert_eq!(first.payload, Some(Payload::Text("1".to_string())));
        assert_eq!(second.payload, Some(Payload::Text("2".to_string())));

        let call_ids: Vec<u64> = sink
            .notifications()
            .iter()
            .map(|n| match n {
                Notification::Progress { call_id, .. } | Notification::Log { call_id, .. } => *call_id,
            })
            .collect();
        assert_eq!(call_ids, vec![1, 1, 2, 2]);
    }

    #[tokio::test]
    async fn missing_arguments_treated_as_empty() {
        let dispatcher = Dispatcher::new(registry());
        let response = dispatcher
            .dispatch(ExecutionRequest::new("walker.walk", None), Duration::from_secs(1))
            .await;
        assert_eq!(
            response.error.as_deref(),
            Some("Input validation failed: 'steps' is required")
        );
    }

    #[test]
    fn default_deadline_is_thirty_seconds() {
        let dispatcher = Dispatcher::new(registry());
        assert_eq!(dispatcher.config().default_deadline, Duration::from_secs(30));
        assert_eq!(dispatcher.list_operations().len(), 1);
    }
}
