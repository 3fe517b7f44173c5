//! In-memory session store mapping download ids to finished subtitle documents.
//!
//! Entries are write-once and live for the whole process; there is no eviction
//! because this is a single-operator tool, not a multi-tenant service.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use uuid::Uuid;

/// One completed transcription available for download.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Full SRT subtitle document.
    pub document: String,
    /// Suggested download filename, e.g. `interview.srt`.
    pub filename: String,
}

/// Mutex-guarded map from opaque session ids to subtitle documents.
///
/// Constructed once at startup and injected into handler state; never a
/// process global.
#[derive(Debug, Default)]
pub struct SessionStore {
    entries: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a finished subtitle document and returns its fresh id.
    ///
    /// UUID v4 keys make collisions practically impossible, so an existing
    /// entry is never overwritten in practice.
    pub fn put(&self, document: String, filename: String) -> String {
        let id = Uuid::new_v4().to_string();
        let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
        entries.insert(id.clone(), SessionEntry { document, filename });
        id
    }

    /// Looks up a session by id.
    pub fn get(&self, id: &str) -> Option<SessionEntry> {
        let entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
        entries.get(id).cloned()
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Derives the suggested subtitle filename from an uploaded filename by
/// replacing its extension with `.srt`.
pub fn srt_filename(upload_name: &str) -> String {
    let stem = Path::new(upload_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(upload_name);
    format!("{stem}.srt")
}

#[cfg(test)]
mod tests {
    use super::{srt_filename, SessionStore};

    #[test]
    fn put_then_get_round_trips() {
        let store = SessionStore::new();
        let id = store.put("1\n0:00:00,000 --> 0:00:01,000\nhi\n\n".into(), "clip.srt".into());

        let entry = store.get(&id).expect("entry");
        assert_eq!(entry.filename, "clip.srt");
        assert!(entry.document.starts_with("1\n"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_id_is_none() {
        let store = SessionStore::new();
        assert!(store.get("not-a-session").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn ids_are_unique_per_put() {
        let store = SessionStore::new();
        let a = store.put("a".into(), "a.srt".into());
        let b = store.put("a".into(), "a.srt".into());
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn srt_filename_replaces_extension() {
        assert_eq!(srt_filename("interview.mp4"), "interview.srt");
        assert_eq!(srt_filename("talk.rec.wav"), "talk.rec.srt");
        assert_eq!(srt_filename("noext"), "noext.srt");
    }
}
