//! Builtin tools. Terminal, file and browser run inside the session's
//! sandbox; search calls an external API from the host.

pub mod browser;
pub mod file;
pub mod search;
pub mod terminal;

use std::sync::Arc;

pub use browser::BrowserTool;
pub use file::FileTool;
pub use search::SearchTool;
pub use terminal::TerminalTool;

use super::{ToolError, ToolRegistry};
use crate::config::ToolsConfig;
use crate::sandbox::{SandboxError, SandboxManager};

/// Registers every builtin tool. Search is added only when configured.
pub fn register_builtin(
    registry: &mut ToolRegistry,
    sandboxes: Arc<SandboxManager>,
    config: &ToolsConfig,
) -> anyhow::Result<()> {
    registry.register(Arc::new(TerminalTool::new(sandboxes.clone())))?;
    registry.register(Arc::new(FileTool::new(sandboxes.clone())))?;
    registry.register(Arc::new(BrowserTool::new(sandboxes)))?;
    if let Some(ref search) = config.search {
        registry.register(Arc::new(SearchTool::new(search)?))?;
    }
    Ok(())
}

pub(crate) fn sandbox_failure(tool: &str, e: SandboxError) -> ToolError {
    ToolError::execution(tool, e.to_string())
}
