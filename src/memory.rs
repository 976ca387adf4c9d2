use crate::models::message::Message;

/// Append-only log of the conversation so far.
///
/// The log persists across `run` calls for the lifetime of the agent, so a
/// later goal can refer back to an earlier exchange. There is no eviction:
/// sessions are expected to be short-lived relative to context limits.
#[derive(Debug, Default)]
pub struct ConversationMemory {
    messages: Vec<Message>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The only mutator: record a message at the end of the log
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The full ordered history, oldest first
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let mut memory = ConversationMemory::new();
        memory.append(Message::user().with_text("first"));
        memory.append(Message::assistant().with_text("second"));
        memory.append(Message::user().with_text("third"));

        let snapshot = memory.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].text(), "first");
        assert_eq!(snapshot[1].text(), "second");
        assert_eq!(snapshot[2].text(), "third");
    }

    #[test]
    fn test_length_is_monotonic() {
        let mut memory = ConversationMemory::new();
        assert!(memory.is_empty());
        let mut last = 0;
        for i in 0..10 {
            memory.append(Message::user().with_text(format!("turn {}", i)));
            assert!(memory.len() > last);
            last = memory.len();
        }
    }
}
