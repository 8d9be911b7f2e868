use crate::llm::Message;

/// Ordered turns of one orchestration loop. Owned by a single agent;
/// lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    turns: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.turns.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.turns.extend(messages);
    }

    pub fn messages(&self) -> &[Message] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
