use crate::domain::message::Message;

pub const GREETING: &str = "Hi! 👋 I'm Knatty. How can I assist you today?";

/// Append-only, ordered conversation log for one widget instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh transcript holding the assistant greeting.
    pub fn seeded() -> Self {
        let mut transcript = Self::new();
        transcript.append(Message::assistant(GREETING));
        transcript
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
