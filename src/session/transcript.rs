//! Append-only transcript log.
//!
//! Entries are recorded strictly in arrival order. System entries carry
//! connection diagnostics and state transitions; the conversation view
//! filters them out.

use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    Bot,
    User,
    System,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::Bot => write!(f, "bot"),
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub content: String,
    pub timestamp: OffsetDateTime,
}

#[derive(Default)]
pub struct TranscriptLog {
    entries: parking_lot::RwLock<Vec<TranscriptEntry>>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, role: TranscriptRole, content: impl Into<String>) {
        let content = content.into();
        debug!(%role, %content, "transcript entry");
        self.entries.write().push(TranscriptEntry {
            role,
            content,
            timestamp: OffsetDateTime::now_utc(),
        });
    }

    /// Diagnostic bookkeeping entry, excluded from the conversation view.
    pub fn system(&self, content: impl Into<String>) {
        self.append(TranscriptRole::System, content);
    }

    /// Every entry, including system diagnostics.
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.read().clone()
    }

    /// Spoken turns only.
    pub fn conversation(&self) -> Vec<TranscriptEntry> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.role != TranscriptRole::System)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
