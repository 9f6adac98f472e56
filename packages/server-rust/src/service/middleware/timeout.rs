//! Timeout middleware for calls.
//!
//! Rejects calls that exceed their `deadline` with `DispatchError::TimedOut`
//! and cancels the call's token so cooperative handlers can stop early.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use opgroup_core::Payload;
use tower::{Layer, Service};

use crate::service::operation::{Call, DispatchError};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps services with per-call deadline enforcement.
///
/// The deadline is read from each call's `ctx.deadline` field, allowing
/// different calls to have different deadlines.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces per-call deadlines.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<Call> for TimeoutService<S>
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
        let deadline = call.ctx().deadline;
        let cancel = call.ctx().cancel.clone();
        let fut = self.inner.call(call);
        Box::pin(async move {
            match tokio::time::timeout(deadline, fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    cancel.cancel();
                    Err(DispatchError::TimedOut { deadline })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
