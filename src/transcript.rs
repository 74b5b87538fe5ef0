//! Append/update-only conversation transcript.
//!
//! Both state tracks (turn and challenge) write here, but at most one
//! streamed agent entry is ever in flight. The session machine enforces
//! that by never starting a second Processing cycle before the previous
//! one reaches Speaking, Idle or Error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique token identifying a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Who produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Agent,
}

/// One line of the conversation.
///
/// `id` and `sender` are immutable after creation. `text` is mutated in
/// place only while the entry is the in-flight streaming placeholder.
/// `translated_text` is set at most once, lazily, on explicit request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: EntryId,
    pub text: String,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
    pub translated_text: Option<String>,
}

/// Ordered conversation log. Insertion order is display order; entries are
/// never reordered or deleted.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new entry, returning its unique id.
    pub fn append(&mut self, text: impl Into<String>, sender: Sender) -> EntryId {
        let entry = TranscriptEntry {
            id: EntryId::new(),
            text: text.into(),
            sender,
            created_at: Utc::now(),
            translated_text: None,
        };
        let id = entry.id;
        self.entries.push(entry);
        id
    }

    /// Overwrite the text of an existing entry.
    ///
    /// Returns `false` if the id is unknown.
    pub fn update(&mut self, id: EntryId, text: impl Into<String>) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.text = text.into();
                true
            }
            None => false,
        }
    }

    /// Record a translation for an entry. No-op if the entry is unknown or
    /// already translated; returns whether the translation was stored.
    pub fn mark_translated(&mut self, id: EntryId, text: impl Into<String>) -> bool {
        match self.entry_mut(id) {
            Some(entry) if entry.translated_text.is_none() => {
                entry.translated_text = Some(text.into());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: EntryId) -> Option<&TranscriptEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, id: EntryId) -> Option<&mut TranscriptEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }
}
