//! Operation routing: resolves a `Call` to its descriptor and runs the handler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use opgroup_core::Payload;
use tower::Service;

use super::context::{ContextServices, ExecutionContext};
use super::operation::{Call, DispatchError};
use super::registry::OperationRegistry;

type RouterFuture = Pin<Box<dyn Future<Output = Result<Option<Payload>, DispatchError>> + Send>>;

// ---------------------------------------------------------------------------
// OperationRouter
// ---------------------------------------------------------------------------

/// Innermost service of the dispatch pipeline.
///
/// Looks up the group and operation, validates the arguments, builds the
/// execution context when the operation asks for one, and runs the handler
/// on its own task. Dropping the returned future detaches that task.
#[derive(Clone)]
pub struct OperationRouter {
    registry: Arc<OperationRegistry>,
    services: ContextServices,
}

impl OperationRouter {
    #[must_use]
    pub fn new(registry: Arc<OperationRegistry>, services: ContextServices) -> Self {
        Self { registry, services }
    }
}

impl Service<Call> for OperationRouter {
    type Response = Option<Payload>;
    type Error = DispatchError;
    type Future = RouterFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: Call) -> Self::Future {
        let registry = self.registry.clone();
        let services = self.services.clone();
        Box::pin(async move {
            let Call { ctx, arguments } = call;
            let group = registry.group(&ctx.group).ok_or_else(|| DispatchError::UnknownGroup {
                name: ctx.group.clone(),
            })?;
            let descriptor = group
                .operation(&ctx.operation)
                .ok_or_else(|| DispatchError::UnknownOperation {
                    name: ctx.operation.clone(),
                })?
                .clone();

            let prepared = descriptor.bind(arguments)?;
            let context = descriptor
                .requires_context
                .then(|| ExecutionContext::new(&ctx, services));

            match tokio::spawn(prepared(context)).await {
                Ok(Ok(value)) => Ok(Payload::from_value(value)),
                Ok(Err(err)) => {
                    tracing::warn!(
                        call_id = ctx.call_id,
                        operation = %ctx.full_name(),
                        error = ?err,
                        "handler failed"
                    );
                    Err(DispatchError::HandlerFailed {
                        operation: ctx.operation,
                        message: format!("{err:#}"),
                    })
                }
                Err(join_err) => {
                    tracing::error!(
                        call_id = ctx.call_id,
                        operation = %ctx.full_name(),
                        error = %join_err,
                        "handler task aborted"
                    );
                    let message = if join_err.is_panic() {
                        "handler panicked"
                    } else {
                        "handler cancelled"
                    };
                    Err(DispatchError::HandlerFailed {
                        operation: ctx.operation,
                        message: message.to_string(),
                    })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
