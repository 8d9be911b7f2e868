pub mod conversation;
pub mod events;
pub mod planact;
pub mod session;

use thiserror::Error;

use crate::llm::LlmError;

pub use conversation::ConversationState;
pub use events::AgentEvent;
pub use planact::PlanActAgent;
pub use session::AgentSession;

/// Failures that end an agent run. Tool failures never do; only the
/// language-model service can.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),
}
