//! The [`Tool`] capability and [`FnTool`], its closure-backed form.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::arguments::ToolArguments;
use super::types::{ToolParameters, ToolSchema};
use crate::error::CadenceError;
use crate::session::SessionId;

/// What a tool produces: a JSON value for the log, or an error that the
/// registry turns into a tool-role error message.
pub type ToolValue = Result<serde_json::Value, CadenceError>;

/// Which session, call and agent a tool invocation belongs to.
#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    pub session_id: SessionId,
    pub tool_call_id: String,
    pub agent_id: String,
    /// Child of the session token; fires on `stop`.
    pub cancel: CancellationToken,
}

impl ToolExecutionContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A capability the model can call by name.
///
/// Arguments reach [`execute`](Tool::execute) already checked against
/// [`parameters`](Tool::parameters).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> &ToolParameters;

    async fn execute(&self, args: &ToolArguments, ctx: &ToolExecutionContext) -> ToolValue;

    /// The record advertised to the model.
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().schema.clone(),
        }
    }
}

type Handler =
    Arc<dyn Fn(ToolArguments, ToolExecutionContext) -> BoxFuture<'static, ToolValue> + Send + Sync>;

/// A [`Tool`] whose body is an async closure.
///
/// The closure owns its arguments and context. If the session stops while
/// the closure is pending, the call resolves to [`CadenceError::Cancelled`].
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    parameters: ToolParameters,
    handler: Handler,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ToolValue> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args, ctx| Box::pin(handler(args, ctx)));
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler,
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolExecutionContext) -> ToolValue {
        let call = (self.handler)(args.clone(), ctx.clone());
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(CadenceError::Cancelled),
            value = call => value,
        }
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FnTool").field(&self.name).finish()
    }
}
