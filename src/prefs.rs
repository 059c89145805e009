//! Local preferences: the last selected project.
//!
//! Best effort only. Read and write failures are logged and otherwise
//! ignored; nothing in the conversation core depends on them.

#[cfg(test)]
#[path = "prefs_test.rs"]
mod prefs_test;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::ProjectId;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub last_project_id: Option<ProjectId>,
}

/// JSON file backing [`Preferences`]. Without a path every call is a no-op.
#[derive(Clone, Debug, Default)]
pub struct PrefsStore {
    path: Option<PathBuf>,
}

impl PrefsStore {
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn load(&self) -> Preferences {
        let Some(path) = self.path.as_deref() else {
            return Preferences::default();
        };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Preferences::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "preferences unreadable");
                return Preferences::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "preferences malformed; ignoring");
            Preferences::default()
        })
    }

    #[must_use]
    pub fn last_project(&self) -> Option<ProjectId> {
        self.load().last_project_id
    }

    pub fn remember_project(&self, project_id: ProjectId) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        let mut prefs = self.load();
        prefs.last_project_id = Some(project_id);
        let result = serde_json::to_vec_pretty(&prefs)
            .map_err(std::io::Error::other)
            .and_then(|bytes| std::fs::write(path, bytes));
        match result {
            Ok(()) => debug!(project_id, "last project remembered"),
            Err(e) => warn!(path = %path.display(), error = %e, "preferences not saved"),
        }
    }
}
