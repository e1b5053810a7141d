use chrono::Local;

/// Sender identity reserved for notices generated by the server itself.
pub const SYSTEM_SENDER: &str = "system";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Matches Go's `time.Kitchen` layout, e.g. `3:04PM`.
const KITCHEN_FORMAT: &str = "%-I:%M%p";

/// One chat event as it travels through the hub.
///
/// Messages are built once and never mutated; each recipient gets its own clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    sender: String,
    body: String,
    timestamp: String,
}

impl ChatMessage {
    /// Creates a message stamped with the current local time.
    pub fn new(sender: impl Into<String>, body: &str) -> Self {
        let timestamp = Local::now().format(KITCHEN_FORMAT).to_string();
        Self::with_timestamp(sender, body, timestamp)
    }

    /// Creates a message with an explicit display timestamp.
    ///
    /// Trailing line endings are stripped from `body`, so text read straight
    /// off a socket and text built in code end up in the same shape.
    pub fn with_timestamp(
        sender: impl Into<String>,
        body: &str,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            body: body.trim_end_matches(LINE_ENDINGS).to_string(),
            timestamp: timestamp.into(),
        }
    }

    pub fn system(body: &str) -> Self {
        Self::new(SYSTEM_SENDER, body)
    }

    pub fn joined(nickname: &str) -> Self {
        Self::system(&format!("New user {nickname} has joined the chat room."))
    }

    pub fn left(nickname: &str) -> Self {
        Self::system(&format!("User {nickname} left the chat room."))
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }

    /// Formats the message the way stream clients see it: a highlighted
    /// `time: sender` header, the body, and a terminating newline.
    pub fn render(&self) -> String {
        format!(
            "\x1b[1;33;40m{}: {} \x1b[m:{}\x1b[m\n",
            self.timestamp, self.sender, self.body
        )
    }
}
