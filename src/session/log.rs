//! Append-only ordered message log.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use crate::error::CadenceError;
use crate::types::{Message, Role};

/// Storage for a session's conversation.
///
/// Only the owning session loop appends; readers receive copies.
pub trait MessageLog: Send + Sync {
    /// Append one message. Tool-role messages must answer a tool call that
    /// already appears in the log.
    fn append(&self, message: Message) -> Result<(), CadenceError>;

    /// Every message, in append order.
    fn read_all(&self) -> Vec<Message>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct LogInner {
    messages: Vec<Message>,
    call_ids: HashSet<String>,
}

/// [`MessageLog`] kept in memory for the session's lifetime.
#[derive(Debug, Default)]
pub struct InMemoryMessageLog {
    inner: RwLock<LogInner>,
}

impl InMemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageLog for InMemoryMessageLog {
    fn append(&self, message: Message) -> Result<(), CadenceError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if message.role == Role::Tool {
            let answered = message.tool_call_id.as_deref().unwrap_or_default();
            if !inner.call_ids.contains(answered) {
                return Err(CadenceError::InvalidState(format!(
                    "tool result references unknown tool call '{answered}'"
                )));
            }
        }
        for call in &message.tool_calls {
            inner.call_ids.insert(call.id.clone());
        }
        inner.messages.push(message);
        Ok(())
    }

    fn read_all(&self) -> Vec<Message> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .messages
            .clone()
    }

    fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .messages
            .len()
    }
}
