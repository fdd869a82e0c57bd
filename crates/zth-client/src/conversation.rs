//! The conversation log shared by the learner and the tutor.
//!
//! The log is append-only except for its last entry while that entry is
//! streaming. At most one entry streams at a time and it is always the last.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The learner.
    User,
    /// The AI tutor. Older backends call it `assistant` or `alex`.
    #[serde(alias = "assistant", alias = "alex")]
    Tutor,
    /// Informational messages from the backend.
    System,
    /// A failed turn.
    Error,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Tutor => write!(f, "tutor"),
            Self::System => write!(f, "system"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Author of the entry.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// ISO-8601 creation time.
    #[serde(default = "now")]
    pub timestamp: String,
    /// Set while tutor fragments are still arriving.
    #[serde(rename = "isStreaming", default, skip_serializing_if = "is_false")]
    pub is_streaming: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

/// Current time in the wire format used for entry timestamps.
#[must_use]
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ConversationEntry {
    /// Creates a sealed entry stamped with the current time.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now(),
            is_streaming: false,
        }
    }

    /// Creates a learner message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates an error entry for a failed turn.
    #[must_use]
    pub fn error(content: impl Into<String>) -> Self {
        Self::new(Role::Error, content)
    }

    /// Creates the open tutor entry that later fragments extend.
    #[must_use]
    pub fn tutor_fragment(fragment: impl Into<String>) -> Self {
        Self {
            is_streaming: true,
            ..Self::new(Role::Tutor, fragment)
        }
    }
}

/// Ordered conversation log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    entries: Vec<ConversationEntry>,
}

impl Conversation {
    /// Creates an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends an entry, sealing any streaming entry first.
    pub fn push(&mut self, entry: ConversationEntry) {
        self.seal_streaming();
        self.entries.push(entry);
    }

    /// Extends the streaming entry, or opens one when none exists.
    ///
    /// Returns `true` if a new entry was opened.
    pub fn append_token(&mut self, fragment: &str) -> bool {
        if let Some(entry) = self.entries.last_mut().filter(|e| e.is_streaming) {
            entry.content.push_str(fragment);
            return false;
        }
        self.entries.push(ConversationEntry::tutor_fragment(fragment));
        true
    }

    /// Marks the streaming entry complete. Returns whether one was open.
    pub fn seal_streaming(&mut self) -> bool {
        match self.entries.last_mut().filter(|e| e.is_streaming) {
            Some(entry) => {
                entry.is_streaming = false;
                true
            }
            None => false,
        }
    }

    /// Replaces the whole log with an authoritative one from the backend.
    ///
    /// Incoming entries are all treated as sealed.
    pub fn replace(&mut self, entries: Vec<ConversationEntry>) {
        self.entries = entries;
        for entry in &mut self.entries {
            entry.is_streaming = false;
        }
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The entry currently being streamed, if any.
    #[must_use]
    pub fn streaming_entry(&self) -> Option<&ConversationEntry> {
        self.entries.last().filter(|e| e.is_streaming)
    }

    /// The most recent entry.
    #[must_use]
    pub fn last(&self) -> Option<&ConversationEntry> {
        self.entries.last()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries in order.
    pub fn iter(&self) -> std::slice::Iter<'_, ConversationEntry> {
        self.entries.iter()
    }

    /// The entries as a slice.
    #[must_use]
    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }
}

impl<'a> IntoIterator for &'a Conversation {
    type Item = &'a ConversationEntry;
    type IntoIter = std::slice::Iter<'a, ConversationEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl From<Vec<ConversationEntry>> for Conversation {
    fn from(entries: Vec<ConversationEntry>) -> Self {
        let mut conversation = Self::new();
        conversation.replace(entries);
        conversation
    }
}
