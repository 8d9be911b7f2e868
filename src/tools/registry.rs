//! Capability registry: name → tool, built once at start-up.

use std::sync::Arc;

use tracing::info;

use super::Capability;
use crate::llm::ToolDefinition;

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Capability>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a capability. Names are unique; a second registration under
    /// the same name is rejected.
    pub fn register(&mut self, tool: Arc<dyn Capability>) -> anyhow::Result<()> {
        if self.get(tool.name()).is_some() {
            anyhow::bail!("Tool '{}' is already registered", tool.name());
        }
        info!("Registered tool: {}", tool.name());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Schemas handed to the model, in registration order.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.descriptor().into()).collect()
    }

    /// Human-readable list for the system prompt and `/tools`.
    pub fn tool_descriptions(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
