//! Operation types: registration metadata, descriptors, calls and errors.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use opgroup_core::{
    Arguments, ErrorKind, InputSchema, OperationInput, ValidationFailure, RESERVED_CONTEXT_KEY,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::ExecutionContext;

// ---------------------------------------------------------------------------
// OperationMeta
// ---------------------------------------------------------------------------

/// Registration metadata for one operation.
///
/// The external name defaults to the method name; `rename` overrides it.
#[derive(Debug, Clone)]
pub struct OperationMeta {
    method: String,
    rename: Option<String>,
    pub(crate) documentation: Option<String>,
    pub(crate) schema: Option<Arc<InputSchema>>,
}

impl OperationMeta {
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            rename: None,
            documentation: None,
            schema: None,
        }
    }

    /// Expose the operation under a different name.
    #[must_use]
    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.rename = Some(name.into());
        self
    }

    #[must_use]
    pub fn doc(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }

    /// Declare the input schema explicitly.
    #[must_use]
    pub fn schema(mut self, schema: InputSchema) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    /// Declare the schema of a typed input.
    #[must_use]
    pub fn schema_of<I: OperationInput>(self) -> Self {
        self.schema(I::input_schema())
    }

    /// Name the operation is dispatched under.
    #[must_use]
    pub fn external_name(&self) -> &str {
        self.rename.as_deref().unwrap_or(&self.method)
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

// ---------------------------------------------------------------------------
// Handler erasure
// ---------------------------------------------------------------------------

/// Future produced by an invoked handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// A validated call, ready to run once it is given its context.
pub type PreparedCall = Box<dyn FnOnce(Option<ExecutionContext>) -> HandlerFuture + Send>;

/// Validates raw arguments and binds them to the handler.
pub type Binder = Arc<dyn Fn(Arguments) -> Result<PreparedCall, ValidationFailure> + Send + Sync>;

type BindFn<G> = Box<dyn Fn(Arc<G>) -> Binder + Send + Sync>;

/// What kind of argument a handler accepts.
#[derive(Debug, Clone)]
pub(crate) enum Accepts {
    /// Typed input with its own schema.
    Typed(Arc<InputSchema>),
    /// The raw argument map.
    Raw,
}

pub(crate) struct Registration<G> {
    pub(crate) meta: OperationMeta,
    pub(crate) accepts: Accepts,
    pub(crate) requires_context: bool,
    pub(crate) bind: BindFn<G>,
}

fn serialize_output<R: Serialize>(output: R) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(output)?)
}

fn missing_context() -> HandlerFuture {
    Box::pin(async { Err(anyhow::anyhow!("execution context was not provided")) })
}

fn strip_context(mut arguments: Arguments) -> Arguments {
    arguments.remove(RESERVED_CONTEXT_KEY);
    arguments
}

// ---------------------------------------------------------------------------
// OperationSet
// ---------------------------------------------------------------------------

/// Collects the operations a group registers.
pub struct OperationSet<G> {
    pub(crate) registrations: Vec<Registration<G>>,
}

impl<G: Send + Sync + 'static> OperationSet<G> {
    pub(crate) fn new() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }

    /// Register a handler taking a typed input.
    pub fn op<I, R, F, Fut>(&mut self, meta: OperationMeta, handler: F) -> &mut Self
    where
        I: OperationInput,
        R: Serialize + Send + 'static,
        F: Fn(Arc<G>, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let schema = Arc::new(I::input_schema());
        let handler = Arc::new(handler);
        let bind_schema = schema.clone();
        self.push(meta, Accepts::Typed(schema), false, move |group| {
            let handler = handler.clone();
            let schema = bind_schema.clone();
            Arc::new(move |arguments: Arguments| -> Result<PreparedCall, ValidationFailure> {
                let input: I = schema.parse(&arguments)?;
                let handler = handler.clone();
                let group = group.clone();
                let prepared: PreparedCall = Box::new(move |_ctx: Option<ExecutionContext>| -> HandlerFuture {
                    Box::pin(async move { serialize_output(handler(group, input).await?) })
                });
                Ok(prepared)
            })
        })
    }

    /// Register a handler taking a typed input and the execution context.
    pub fn op_with_context<I, R, F, Fut>(&mut self, meta: OperationMeta, handler: F) -> &mut Self
    where
        I: OperationInput,
        R: Serialize + Send + 'static,
        F: Fn(Arc<G>, I, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let schema = Arc::new(I::input_schema());
        let handler = Arc::new(handler);
        let bind_schema = schema.clone();
        self.push(meta, Accepts::Typed(schema), true, move |group| {
            let handler = handler.clone();
            let schema = bind_schema.clone();
            Arc::new(move |arguments: Arguments| -> Result<PreparedCall, ValidationFailure> {
                let input: I = schema.parse(&arguments)?;
                let handler = handler.clone();
                let group = group.clone();
                let prepared: PreparedCall = Box::new(move |ctx: Option<ExecutionContext>| -> HandlerFuture {
                    match ctx {
                        Some(ctx) => Box::pin(async move {
                            serialize_output(handler(group, input, ctx).await?)
                        }),
                        None => missing_context(),
                    }
                });
                Ok(prepared)
            })
        })
    }

    /// Register a handler taking the raw argument map.
    pub fn op_raw<R, F, Fut>(&mut self, meta: OperationMeta, handler: F) -> &mut Self
    where
        R: Serialize + Send + 'static,
        F: Fn(Arc<G>, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.push(meta, Accepts::Raw, false, move |group| {
            let handler = handler.clone();
            Arc::new(move |arguments: Arguments| -> Result<PreparedCall, ValidationFailure> {
                let arguments = strip_context(arguments);
                let handler = handler.clone();
                let group = group.clone();
                let prepared: PreparedCall = Box::new(move |_ctx: Option<ExecutionContext>| -> HandlerFuture {
                    Box::pin(async move { serialize_output(handler(group, arguments).await?) })
                });
                Ok(prepared)
            })
        })
    }

    /// Register a handler taking the raw argument map and the execution context.
    pub fn op_raw_with_context<R, F, Fut>(&mut self, meta: OperationMeta, handler: F) -> &mut Self
    where
        R: Serialize + Send + 'static,
        F: Fn(Arc<G>, Arguments, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.push(meta, Accepts::Raw, true, move |group| {
            let handler = handler.clone();
            Arc::new(move |arguments: Arguments| -> Result<PreparedCall, ValidationFailure> {
                let arguments = strip_context(arguments);
                let handler = handler.clone();
                let group = group.clone();
                let prepared: PreparedCall = Box::new(move |ctx: Option<ExecutionContext>| -> HandlerFuture {
                    match ctx {
                        Some(ctx) => Box::pin(async move {
                            serialize_output(handler(group, arguments, ctx).await?)
                        }),
                        None => missing_context(),
                    }
                });
                Ok(prepared)
            })
        })
    }

    fn push<B>(&mut self, meta: OperationMeta, accepts: Accepts, requires_context: bool, bind: B) -> &mut Self
    where
        B: Fn(Arc<G>) -> Binder + Send + Sync + 'static,
    {
        self.registrations.push(Registration {
            meta,
            accepts,
            requires_context,
            bind: Box::new(bind),
        });
        self
    }

    /// Number of registrations collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// OperationDescriptor
// ---------------------------------------------------------------------------

/// Immutable record of one registered operation, created at build time.
pub struct OperationDescriptor {
    /// External operation name.
    pub name: String,
    /// Owning group name.
    pub group: String,
    /// Schema used to validate arguments, if any.
    pub input_schema: Option<Arc<InputSchema>>,
    /// Whether the handler receives an `ExecutionContext`.
    pub requires_context: bool,
    /// Documentation supplied at registration.
    pub documentation: Option<String>,
    pub(crate) binder: Binder,
}

impl OperationDescriptor {
    /// `group.name`.
    #[must_use]
    pub fn full_name(&self) -> String {
        opgroup_core::full_operation_name(&self.group, &self.name)
    }

    /// Validate arguments and bind them to the handler.
    ///
    /// # Errors
    ///
    /// Returns the aggregated `ValidationFailure` when the arguments do not
    /// satisfy the input schema.
    pub fn bind(&self, arguments: Arguments) -> Result<PreparedCall, ValidationFailure> {
        (self.binder)(arguments)
    }
}

impl fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("input_schema", &self.input_schema.as_ref().map(|s| s.name.as_str()))
            .field("requires_context", &self.requires_context)
            .field("documentation", &self.documentation)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// Context carried with every call through the dispatch pipeline.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub call_id: u64,
    pub request_id: Uuid,
    pub group: String,
    pub operation: String,
    pub deadline: Duration,
    /// Cancelled when the deadline elapses.
    pub cancel: CancellationToken,
}

impl CallContext {
    #[must_use]
    pub fn full_name(&self) -> String {
        opgroup_core::full_operation_name(&self.group, &self.operation)
    }
}

/// One resolved call travelling through the pipeline.
#[derive(Debug)]
pub struct Call {
    pub ctx: CallContext,
    pub arguments: Arguments,
}

impl Call {
    #[must_use]
    pub fn ctx(&self) -> &CallContext {
        &self.ctx
    }
}

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Call-time failures. The display form is the client-facing message.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed operation name")]
    MalformedName,
    #[error("group not found: {name}")]
    UnknownGroup { name: String },
    #[error("unknown operation: {name}")]
    UnknownOperation { name: String },
    #[error(transparent)]
    InvalidInput(#[from] ValidationFailure),
    #[error("operation timed out after {deadline:?}")]
    TimedOut { deadline: Duration },
    #[error("{operation}: {message}")]
    HandlerFailed { operation: String, message: String },
}

impl DispatchError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedName => ErrorKind::MalformedOperationName,
            Self::UnknownGroup { .. } => ErrorKind::UnknownGroup,
            Self::UnknownOperation { .. } => ErrorKind::UnknownOperation,
            Self::InvalidInput(_) => ErrorKind::InputValidationFailed,
            Self::TimedOut { .. } => ErrorKind::OperationTimedOut,
            Self::HandlerFailed { .. } => ErrorKind::HandlerFailed,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
