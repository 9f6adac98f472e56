//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::ServiceBuilder;

use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::service::router::OperationRouter;

/// The assembled dispatch stack.
pub type DispatchPipeline = MetricsService<TimeoutService<OperationRouter>>;

/// Build the dispatch pipeline by wrapping the `OperationRouter` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- record timing and outcome, timeouts included
/// 2. `TimeoutLayer` -- enforce the per-call deadline and cancel on expiry
///
/// The returned service implements `tower::Service<Call>` and is cheap to clone.
#[must_use]
pub fn build_dispatch_pipeline(router: OperationRouter) -> DispatchPipeline {
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(TimeoutLayer)
        .service(router)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
