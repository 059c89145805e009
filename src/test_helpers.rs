//! Fixtures and fakes shared by unit tests.

use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::transport::{RoomTransport, TransportError, TypingSignal};
use crate::types::{DeliveryState, Message, MessageId, ProjectId, TempId, UserId};

pub const ME: UserId = 12;
pub const OTHER: UserId = 40;

pub fn confirmed(id: i64, sender_id: UserId, content: &str, created_at: i64) -> Message {
    Message {
        id: MessageId::Server(id),
        project_id: 7,
        sender_id,
        sender_name: name_of(sender_id).to_owned(),
        content: Some(content.to_owned()),
        attachments: Vec::new(),
        created_at,
        is_edited: false,
        reply_to_id: None,
        reply_to: None,
        delivery: DeliveryState::Confirmed,
    }
}

pub fn pending(temp: u64, content: &str, created_at: i64) -> Message {
    Message {
        id: MessageId::Temp(TempId(temp)),
        delivery: DeliveryState::Pending,
        ..confirmed(0, ME, content, created_at)
    }
}

pub fn in_project(mut message: Message, project_id: ProjectId) -> Message {
    message.project_id = project_id;
    message
}

pub fn ids(messages: &[Message]) -> Vec<MessageId> {
    messages.iter().map(|m| m.id).collect()
}

fn name_of(user: UserId) -> &'static str {
    if user == ME { "Ann" } else { "Bo" }
}

// =============================================================================
// FAKE TRANSPORT
// =============================================================================

/// Scripted [`RoomTransport`] that records every call and tracks joined rooms.
#[derive(Default)]
pub struct FakeRoomTransport {
    pub calls: Mutex<Vec<String>>,
    joined: Mutex<BTreeSet<ProjectId>>,
    max_joined: Mutex<usize>,
    failing_joins: Mutex<BTreeSet<ProjectId>>,
    fail_leaves: Mutex<bool>,
}

impl FakeRoomTransport {
    pub fn fail_join(&self, project_id: ProjectId) {
        self.failing_joins.lock().unwrap().insert(project_id);
    }

    pub fn heal_join(&self, project_id: ProjectId) {
        self.failing_joins.lock().unwrap().remove(&project_id);
    }

    pub fn fail_leaves(&self) {
        *self.fail_leaves.lock().unwrap() = true;
    }

    pub fn joined(&self) -> Vec<ProjectId> {
        self.joined.lock().unwrap().iter().copied().collect()
    }

    /// Most rooms ever joined at the same time.
    pub fn max_joined(&self) -> usize {
        *self.max_joined.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Simulate the server forgetting memberships when the socket drops.
    pub fn drop_connection(&self) {
        self.joined.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl RoomTransport for FakeRoomTransport {
    async fn join(&self, project_id: ProjectId) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(format!("join:{project_id}"));
        if self.failing_joins.lock().unwrap().contains(&project_id) {
            return Err(TransportError::Closed);
        }
        let mut joined = self.joined.lock().unwrap();
        joined.insert(project_id);
        let mut max = self.max_joined.lock().unwrap();
        *max = (*max).max(joined.len());
        Ok(())
    }

    async fn leave(&self, project_id: ProjectId) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(format!("leave:{project_id}"));
        self.joined.lock().unwrap().remove(&project_id);
        if *self.fail_leaves.lock().unwrap() {
            return Err(TransportError::Timeout("room:leave".to_owned()));
        }
        Ok(())
    }

    async fn signal_typing(
        &self,
        project_id: ProjectId,
        user_name: &str,
        signal: TypingSignal,
    ) -> Result<(), TransportError> {
        let kind = match signal {
            TypingSignal::Start => "start",
            TypingSignal::Stop => "stop",
        };
        self.calls.lock().unwrap().push(format!("typing:{kind}:{project_id}:{user_name}"));
        Ok(())
    }
}
