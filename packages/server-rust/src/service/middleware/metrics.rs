//! Metrics middleware for calls.
//!
//! Wraps each call in a `tracing` span carrying its duration and outcome, and
//! records `metrics` counters and histograms labelled by operation and
//! error kind. No exporter is installed here; the embedding binary picks one.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use opgroup_core::Payload;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{Call, DispatchError};

/// Counter of completed calls, labelled `operation` and `outcome`.
pub const CALLS_TOTAL: &str = "opgroup_calls_total";
/// Histogram of call durations in seconds, labelled `operation`.
pub const CALL_DURATION_SECONDS: &str = "opgroup_call_duration_seconds";

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments calls with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records call duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Call> for MetricsService<S>
where
    S: Service<Call, Response = Option<Payload>, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Option<Payload>;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Option<Payload>, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call) -> Self::Future {
        let operation = call.ctx().full_name();
        let call_id = call.ctx().call_id;
        let request_id = call.ctx().request_id;

        let span = info_span!(
            "call",
            operation = %operation,
            call_id = call_id,
            request_id = %request_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(e) => e.kind().as_str(),
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                ::metrics::counter!(CALLS_TOTAL, "operation" => operation.clone(), "outcome" => outcome)
                    .increment(1);
                ::metrics::histogram!(CALL_DURATION_SECONDS, "operation" => operation.clone())
                    .record(elapsed.as_secs_f64());

                tracing::info!(
                    operation = %operation,
                    call_id = call_id,
                    duration_ms = duration_ms,
                    outcome = outcome,
                    "call complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use opgroup_core::Arguments;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::service::operation::CallContext;

    /// Immediately-completing service echoing the call id.
    struct ImmediateService;

    impl Service<Call> for ImmediateService {
        type Response = Option<Payload>;
        type Error = DispatchError;
        type Future = Pin<Box<dyn Future<Output = Result<Option<Payload>, DispatchError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: Call) -> Self::Future {
            let call_id = call.ctx().call_id;
            Box::pin(async move { Ok(Some(Payload::Text(call_id.to_string()))) })
        }
    }

    /// Always-failing service.
    struct FailingService;

    impl Service<Call> for FailingService {
        type Response = Option<Payload>;
        type Error = DispatchError;
        type Future = Pin<Box<dyn Future<Output = Result<Option<Payload>, DispatchError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: Call) -> Self::Future {
            let name = call.ctx().operation.clone();
            Box::pin(async move { Err(DispatchError::UnknownOperation { name }) })
        }
    }

    fn make_call(call_id: u64) -> Call {
        Call {
            ctx: CallContext {
                call_id,
                request_id: Uuid::new_v4(),
                group: "math".to_string(),
                operation: "add".to_string(),
                deadline: Duration::from_secs(5),
                cancel: CancellationToken::new(),
            },
            arguments: Arguments::new(),
        }
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_response() {
        let svc = MetricsLayer.layer(ImmediateService);
        let resp = svc.oneshot(make_call(42)).await.unwrap();
        assert_eq!(resp, Some(Payload::Text("42".to_string())));
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_error() {
        let svc = MetricsLayer.layer(FailingService);
        let err = svc.oneshot(make_call(1)).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownOperation { ref name } if name == "add"));
    }
}
