//! Agent profiles addressable by id for multi-agent handoff.

use std::collections::HashMap;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::CadenceError;

/// Configuration for one agent identity.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct AgentProfile {
    #[builder(into)]
    pub id: String,
    /// System instructions sent with each request; never written to the log.
    #[builder(into)]
    pub instructions: Option<String>,
    #[builder(into)]
    pub model: Option<String>,
    /// Tool names this agent may call; `None` allows every registered tool.
    pub tools: Option<Vec<String>>,
}

impl AgentProfile {
    /// Profile with no instructions, default model, and every tool.
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            instructions: None,
            model: None,
            tools: None,
        }
    }
}

/// Registered agent profiles, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct AgentDirectory {
    agents: HashMap<String, AgentProfile>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a profile.
    pub fn register(&mut self, profile: AgentProfile) {
        self.agents.insert(profile.id.clone(), profile);
    }

    pub fn with(mut self, profile: AgentProfile) -> Self {
        self.register(profile);
        self
    }

    pub fn get(&self, id: &str) -> Option<&AgentProfile> {
        self.agents.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// Look up a handoff target.
    pub fn resolve(&self, id: &str) -> Result<&AgentProfile, CadenceError> {
        self.get(id)
            .ok_or_else(|| CadenceError::AgentNotFound(id.to_string()))
    }

    /// Profile for a session's starting agent. An unregistered id gets a bare profile.
    pub fn starting_profile(&self, id: &str) -> AgentProfile {
        self.get(id)
            .cloned()
            .unwrap_or_else(|| AgentProfile::bare(id))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
