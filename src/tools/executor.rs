//! Resolves tool calls against the registry and runs them.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::{ToolContext, ToolError, ToolRegistry, ToolResult};

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Runs `name` with `arguments` on behalf of `context.session_id`.
    ///
    /// Unknown names fail with `ToolError::NotFound`; nothing is retried.
    pub async fn execute(
        &self,
        context: &ToolContext,
        name: &str,
        arguments: Value,
    ) -> Result<ToolResult, ToolError> {
        let tool = self.registry.get(name).ok_or_else(|| {
            warn!("Model requested unknown tool: {name}");
            ToolError::NotFound(name.to_string())
        })?;

        debug!("Executing tool {name} for session {}", context.session_id);
        let payload = tool.execute(context, arguments).await?;
        Ok(ToolResult::ok(payload))
    }
}
