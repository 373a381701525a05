//! Proposed-content store.
//!
//! `propose_write_file` and `propose_str_replace` stage file edits in a
//! per-run overlay instead of touching the user's disk. The overlay is keyed
//! by run id, touched only by the owning run, and cleared when the run
//! returns.

use std::collections::HashMap;
use std::sync::Mutex;

/// Per-run ephemeral overlay of proposed file contents.
#[derive(Debug, Default)]
pub struct ProposedContentStore {
    inner: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl ProposedContentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage full proposed content for a path.
    pub fn propose(&self, run_id: &str, path: &str, content: String) {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(run_id.to_owned())
            .or_default()
            .insert(path.to_owned(), content);
    }

    /// Get the proposed content for a path, if staged.
    #[must_use]
    pub fn get(&self, run_id: &str, path: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(run_id)
            .and_then(|files| files.get(path).cloned())
    }

    /// Every staged path and its content for a run, sorted by path.
    #[must_use]
    pub fn entries(&self, run_id: &str) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(run_id)
            .map(|files| {
                files
                    .iter()
                    .map(|(path, content)| (path.clone(), content.clone()))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Returns `true` if the run has staged content.
    #[must_use]
    pub fn has_entries(&self, run_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(run_id)
            .is_some_and(|files| !files.is_empty())
    }

    /// Drop everything staged by a run.
    pub fn clear(&self, run_id: &str) {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(run_id);
    }
}
