//! Room subscription lifecycle for the active project.
//!
//! DESIGN
//! ======
//! The manager holds a single subscription record: the target project and
//! the state of its room on the current connection.
//!
//! ```text
//! Unsubscribed -> Subscribing(p) -> Subscribed(p) -> Unsubscribing(p) -> Unsubscribed
//! ```
//!
//! Switching projects replaces the target in one step, leaves the old room,
//! then joins the new one, so there is never more than one joined room and
//! the target is never empty once a project was selected.
//!
//! ERROR HANDLING
//! ==============
//! A failed leave is logged and the join proceeds: the server drops room
//! membership with the connection anyway, and inbound events are filtered on
//! project id. A failed join leaves the manager `Unsubscribed` and surfaces
//! `SubscriptionFailed`; there is no background retry. A reconnect re-asserts
//! the target once, since room membership never survives a connection drop.

#[cfg(test)]
#[path = "subscription_test.rs"]
mod subscription_test;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::transport::RoomTransport;
use crate::types::ProjectId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing(ProjectId),
    Subscribed(ProjectId),
    Unsubscribing(ProjectId),
}

pub struct RoomSubscriptionManager {
    transport: Arc<dyn RoomTransport>,
    state: SubscriptionState,
    target: Option<ProjectId>,
}

impl RoomSubscriptionManager {
    #[must_use]
    pub fn new(transport: Arc<dyn RoomTransport>) -> Self {
        Self { transport, state: SubscriptionState::Unsubscribed, target: None }
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Project the subscription is for, whether or not its room is joined yet.
    #[must_use]
    pub fn target(&self) -> Option<ProjectId> {
        self.target
    }

    /// Whether inbound events for `project_id` belong to the active subscription.
    #[must_use]
    pub fn accepts(&self, project_id: ProjectId) -> bool {
        self.target == Some(project_id)
    }

    /// Make `project_id` the one subscribed room.
    ///
    /// # Errors
    ///
    /// [`ChatError::SubscriptionFailed`] when the join is rejected or the
    /// connection is down.
    pub async fn select(&mut self, project_id: ProjectId) -> Result<(), ChatError> {
        if self.state == SubscriptionState::Subscribed(project_id) {
            return Ok(());
        }

        self.target = Some(project_id);
        if let SubscriptionState::Subscribed(previous) | SubscriptionState::Subscribing(previous) = self.state {
            if previous != project_id {
                self.leave(previous).await;
            }
        }
        self.join(project_id).await
    }

    /// Re-assert the target after the transport reconnected.
    ///
    /// # Errors
    ///
    /// [`ChatError::SubscriptionFailed`] when the re-join fails.
    pub async fn on_reconnect(&mut self) -> Result<(), ChatError> {
        let Some(project_id) = self.target else {
            return Ok(());
        };
        if self.state == SubscriptionState::Subscribed(project_id) {
            return Ok(());
        }
        info!(project_id, "re-joining room after reconnect");
        self.join(project_id).await
    }

    /// The connection dropped; the server forgot our room membership.
    pub fn on_disconnect(&mut self) {
        if self.state != SubscriptionState::Unsubscribed {
            debug!(state = ?self.state, "subscription lost with connection");
            self.state = SubscriptionState::Unsubscribed;
        }
    }

    /// Leave the joined room and clear the target (shutdown).
    pub async fn leave_all(&mut self) {
        self.target = None;
        if let SubscriptionState::Subscribed(project_id) | SubscriptionState::Subscribing(project_id) = self.state {
            self.leave(project_id).await;
        }
    }

    async fn leave(&mut self, project_id: ProjectId) {
        self.state = SubscriptionState::Unsubscribing(project_id);
        match self.transport.leave(project_id).await {
            Ok(()) => info!(project_id, "left project room"),
            Err(e) => warn!(project_id, error = %e, "room leave failed; continuing"),
        }
        self.state = SubscriptionState::Unsubscribed;
    }

    async fn join(&mut self, project_id: ProjectId) -> Result<(), ChatError> {
        self.state = SubscriptionState::Subscribing(project_id);
        match self.transport.join(project_id).await {
            Ok(()) => {
                self.state = SubscriptionState::Subscribed(project_id);
                info!(project_id, "joined project room");
                Ok(())
            }
            Err(source) => {
                self.state = SubscriptionState::Unsubscribed;
                warn!(project_id, error = %source, "room join failed");
                Err(ChatError::SubscriptionFailed { project_id, source })
            }
        }
    }
}
