//! Name-keyed tool registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use super::types::ToolSchema;
use super::validation::validate_arguments;
use crate::types::{ToolCall, ToolResult};

/// Outcome of executing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub result: serde_json::Value,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            result,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }

    pub fn into_result(self, tool_call_id: impl Into<String>) -> ToolResult {
        ToolResult {
            tool_call_id: tool_call_id.into(),
            result: self.result,
            is_error: self.is_error,
        }
    }
}

/// Tools available to sessions, resolved by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas to advertise, limited to `allowed` when given. Sorted by name.
    pub fn schemas(&self, allowed: Option<&[String]>) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|tool| allowed.map_or(true, |names| names.iter().any(|n| n == tool.name())))
            .map(|tool| tool.schema())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Execute `call`, refusing tools outside `allowed` when given.
    ///
    /// Every failure is reported as an error output, never as a Rust error:
    /// the model sees it as a tool-role error message.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolExecutionContext,
        allowed: Option<&[String]>,
    ) -> ToolOutput {
        if let Some(error) = &call.error {
            return ToolOutput::error(format!("malformed tool call: {error}"));
        }
        let Some(tool) = self.get(&call.name) else {
            return ToolOutput::error(format!("unknown tool '{}'", call.name));
        };
        if allowed.is_some_and(|names| !names.iter().any(|n| n == &call.name)) {
            tracing::warn!(
                session_id = %ctx.session_id,
                tool = %call.name,
                agent_id = %ctx.agent_id,
                "tool call outside the agent's allow-list"
            );
            return ToolOutput::error(format!(
                "tool '{}' not available to agent '{}'",
                call.name, ctx.agent_id
            ));
        }

        let arguments = call.arguments_value();
        if let Err(err) = validate_arguments(&arguments, &tool.parameters().schema) {
            return ToolOutput::error(err.to_string());
        }

        match tool.execute(&ToolArguments::new(arguments), ctx).await {
            Ok(result) => ToolOutput::ok(result),
            Err(err) => {
                tracing::debug!(tool = %call.name, error = %err, "tool execution failed");
                ToolOutput::error(err.to_string())
            }
        }
    }
}
