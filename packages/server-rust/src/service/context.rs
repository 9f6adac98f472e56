//! Per-call execution context handed to operations that ask for one.
//!
//! A context is built fresh for every call of a context-requiring operation
//! and dropped when the handler finishes. Notifications and resource lookups
//! are forwarded to collaborators supplied by the embedding transport.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::operation::CallContext;

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Severity of a log notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Out-of-band message emitted by a running handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Log {
        call_id: u64,
        operation: String,
        level: LogLevel,
        message: String,
    },
    Progress {
        call_id: u64,
        operation: String,
        current: f64,
        total: Option<f64>,
    },
}

/// Receives notifications from running handlers.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Default sink: forwards notifications to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::Log {
                call_id,
                operation,
                level,
                message,
            } => match level {
                LogLevel::Debug => tracing::debug!(call_id, %operation, "{message}"),
                LogLevel::Info => tracing::info!(call_id, %operation, "{message}"),
                LogLevel::Warning => tracing::warn!(call_id, %operation, "{message}"),
                LogLevel::Error => tracing::error!(call_id, %operation, "{message}"),
            },
            Notification::Progress {
                call_id,
                operation,
                current,
                total,
            } => tracing::debug!(call_id, %operation, current, ?total, "progress"),
        }
    }
}

/// Sink that records every notification in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    notifications: parking_lot::Mutex<Vec<Notification>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Resolves auxiliary data referenced by URI.
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    /// Read the resource at `uri`.
    async fn read(&self, uri: &str) -> anyhow::Result<String>;
}

/// Default resolver: knows no resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResources;

#[async_trait]
impl ResourceResolver for NoResources {
    async fn read(&self, uri: &str) -> anyhow::Result<String> {
        anyhow::bail!("no resource resolver configured for {uri}")
    }
}

// ---------------------------------------------------------------------------
// ContextServices
// ---------------------------------------------------------------------------

/// Collaborators shared by every context the dispatcher builds.
#[derive(Clone)]
pub struct ContextServices {
    pub sink: Arc<dyn NotificationSink>,
    pub resolver: Arc<dyn ResourceResolver>,
}

impl Default for ContextServices {
    fn default() -> Self {
        Self {
            sink: Arc::new(TracingSink),
            resolver: Arc::new(NoResources),
        }
    }
}

impl fmt::Debug for ContextServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextServices").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Capabilities available to a handler for the duration of one call.
///
/// Not `Clone`: each call owns exactly one context.
pub struct ExecutionContext {
    call_id: u64,
    operation: String,
    cancel: CancellationToken,
    services: ContextServices,
}

impl ExecutionContext {
    /// Build the context for one call.
    #[must_use]
    pub fn new(call: &CallContext, services: ContextServices) -> Self {
        Self {
            call_id: call.call_id,
            operation: call.full_name(),
            cancel: call.cancel.clone(),
            services,
        }
    }

    #[must_use]
    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Full name of the operation being executed.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.services.sink.notify(Notification::Log {
            call_id: self.call_id,
            operation: self.operation.clone(),
            level,
            message: message.into(),
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Report progress towards `total` (unknown when `None`).
    pub fn report_progress(&self, current: f64, total: Option<f64>) {
        self.services.sink.notify(Notification::Progress {
            call_id: self.call_id,
            operation: self.operation.clone(),
            current,
            total,
        });
    }

    /// Read auxiliary data through the configured resolver.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error when the resource cannot be read.
    pub async fn read_resource(&self, uri: &str) -> anyhow::Result<String> {
        self.services.resolver.read(uri).await
    }

    /// Returns `true` once the call's deadline has elapsed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the call is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("call_id", &self.call_id)
            .field("operation", &self.operation)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;

    struct MapResolver(HashMap<String, String>);

    #[async_trait]
    impl ResourceResolver for MapResolver {
        async fn read(&self, uri: &str) -> anyhow::Result<String> {
            self.0
                .get(uri)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown resource {uri}"))
        }
    }

    fn make_call() -> CallContext {
        CallContext {
            call_id: 7,
            request_id: Uuid::new_v4(),
            group: "schema".to_string(),
            operation: "repeat_message".to_string(),
            deadline: Duration::from_secs(1),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn notifications_reach_sink() {
        let sink = Arc::new(MemorySink::new());
        let services = ContextServices {
            sink: sink.clone(),
            ..ContextServices::default()
        };
        let ctx = ExecutionContext::new(&make_call(), services);
        ctx.info("starting");
        ctx.report_progress(1.0, Some(3.0));

        let received = sink.notifications();
        assert_eq!(received.len(), 2);
        assert_eq!(
            received[0],
            Notification::Log {
                call_id: 7,
                operation: "schema.repeat_message".to_string(),
                level: LogLevel::Info,
                message: "starting".to_string(),
            }
        );
        assert!(matches!(
            received[1],
            Notification::Progress { current, total: Some(total), .. } if current == 1.0 && total == 3.0
        ));
    }

    #[test]
    fn cancellation_follows_call_token() {
        let call = make_call();
        let ctx = ExecutionContext::new(&call, ContextServices::default());
        assert!(!ctx.is_cancelled());
        call.cancel.cancel();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn resources_resolved_through_resolver() {
        let resolver = MapResolver(HashMap::from([("data://greeting".to_string(), "hi".to_string())]));
        let services = ContextServices {
            resolver: Arc::new(resolver),
            ..ContextServices::default()
        };
        let ctx = ExecutionContext::new(&make_call(), services);
        assert_eq!(ctx.read_resource("data://greeting").await.unwrap(), "hi");
        assert!(ctx.read_resource("data://missing").await.is_err());
    }

    #[tokio::test]
    async fn default_resolver_rejects() {
        let ctx = ExecutionContext::new(&make_call(), ContextServices::default());
        let err = ctx.read_resource("file:///etc/hosts").await.unwrap_err();
        assert!(err.to_string().contains("no resource resolver"));
    }
}
