//! Per-project unread-mention flags.
//!
//! Flags are seeded from the server list, raised live by `mention:created`,
//! and cleared locally when a project is opened. A local clear is trusted
//! only while its durable mark-viewed call is in flight or after it
//! succeeded. A failed clear is forgotten, so the next
//! [`MentionTracker::refresh`] restores the server's answer instead of
//! leaving the flag silently cleared.

#[cfg(test)]
#[path = "mention_test.rs"]
mod mention_test;

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::types::{ProjectId, TeamMember};

#[derive(Clone, Debug, Default)]
pub struct MentionTracker {
    unread: BTreeSet<ProjectId>,
    clearing: BTreeSet<ProjectId>,
    failed: BTreeSet<ProjectId>,
    open: Option<ProjectId>,
}

impl MentionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every flag with the server's list of mentioned projects.
    /// Projects whose clear is still in flight stay cleared; the list may
    /// predate the clear.
    pub fn refresh(&mut self, mentioned: impl IntoIterator<Item = ProjectId>) {
        self.unread = mentioned.into_iter().filter(|p| !self.clearing.contains(p)).collect();
        if !self.failed.is_empty() {
            debug!(projects = ?self.failed, "failed mention clears restored from refresh");
            self.failed.clear();
        }
    }

    /// A new mention of the local user. Returns true when the project is the
    /// one being viewed and should be marked viewed again instead of flagged.
    pub fn on_mention_created(&mut self, project_id: ProjectId) -> bool {
        if self.open == Some(project_id) {
            self.clearing.insert(project_id);
            return true;
        }
        self.unread.insert(project_id);
        false
    }

    /// The user opened `project_id`: clear its flag locally. The caller must
    /// issue the durable mark-viewed call.
    pub fn open(&mut self, project_id: ProjectId) {
        self.open = Some(project_id);
        self.unread.remove(&project_id);
        self.clearing.insert(project_id);
    }

    pub fn mark_viewed_succeeded(&mut self, project_id: ProjectId) {
        self.clearing.remove(&project_id);
    }

    /// The clear was not persisted. The flag stays cleared on screen until
    /// the next refresh puts the server state back.
    pub fn mark_viewed_failed(&mut self, project_id: ProjectId) {
        self.clearing.remove(&project_id);
        self.failed.insert(project_id);
        warn!(project_id, "mention clear not confirmed; will restore on refresh");
    }

    #[must_use]
    pub fn has_unread(&self, project_id: ProjectId) -> bool {
        self.unread.contains(&project_id)
    }

    pub fn unread_projects(&self) -> impl Iterator<Item = ProjectId> + '_ {
        self.unread.iter().copied()
    }

    /// Whether a local clear failed and the flags may diverge from the server.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Roster members referenced as `@Name` in `content` (case-insensitive,
/// names may contain spaces).
#[must_use]
pub fn find_mentions<'a>(roster: &'a [TeamMember], content: &str) -> Vec<&'a TeamMember> {
    let lower = content.to_lowercase();
    roster
        .iter()
        .filter(|member| {
            let name = member.name.trim().to_lowercase();
            if name.is_empty() {
                return false;
            }
            let needle = format!("@{name}");
            lower.match_indices(&needle).any(|(at, _)| {
                lower[at + needle.len()..]
                    .chars()
                    .next()
                    .is_none_or(|next| !next.is_alphanumeric())
            })
        })
        .collect()
}
