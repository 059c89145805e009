//! JSON DTOs shared by the REST API and broadcast frame payloads.
//!
//! DESIGN
//! ======
//! These mirror the server payloads so serde stays schema-driven. Numbers
//! that arrive through a protobuf `Struct` are always floats, so every
//! integer field decodes through [`deserialize_i64_from_number`].

#[cfg(test)]
#[path = "wire_test.rs"]
mod wire_test;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{
    Attachment, DeliveryState, Message, MessageId, ProjectId, ReplySnapshot, UserId,
};

/// A persisted message as returned by `list`/`send`/`update` and carried by
/// `message:created` / `message:updated` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(deserialize_with = "deserialize_i64_from_number")]
    pub id: i64,
    #[serde(deserialize_with = "deserialize_i64_from_number")]
    pub project_id: ProjectId,
    #[serde(deserialize_with = "deserialize_i64_from_number")]
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
    #[serde(deserialize_with = "deserialize_i64_from_number")]
    pub created_at: i64,
    #[serde(default, alias = "edited")]
    pub is_edited: bool,
    #[serde(default, deserialize_with = "deserialize_opt_i64_from_number")]
    pub reply_to_message_id: Option<i64>,
    #[serde(default)]
    pub reply_to: Option<ReplyRecord>,
}

/// Attachment metadata on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_u64_from_number")]
    pub size: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub pending: bool,
}

/// Denormalized reply context on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyRecord {
    #[serde(deserialize_with = "deserialize_i64_from_number")]
    pub id: i64,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub sender_name: String,
    #[serde(deserialize_with = "deserialize_i64_from_number")]
    pub sender_id: UserId,
}

/// Body of the durable send call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SendBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub attachments: Vec<AttachmentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyRecord>,
}

/// Body of the durable update call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpdateBody {
    pub content: String,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: MessageId::Server(record.id),
            project_id: record.project_id,
            sender_id: record.sender_id,
            sender_name: record.sender_name,
            content: record.content,
            attachments: record.attachments.into_iter().map(Attachment::from).collect(),
            created_at: record.created_at,
            is_edited: record.is_edited,
            reply_to_id: record.reply_to_message_id.or(record.reply_to.as_ref().map(|r| r.id)),
            reply_to: record.reply_to.map(ReplySnapshot::from),
            delivery: DeliveryState::Confirmed,
        }
    }
}

impl From<AttachmentRecord> for Attachment {
    fn from(record: AttachmentRecord) -> Self {
        Self { name: record.name, size: record.size, url: record.url, pending: record.pending }
    }
}

impl From<&Attachment> for AttachmentRecord {
    fn from(attachment: &Attachment) -> Self {
        Self {
            name: attachment.name.clone(),
            size: attachment.size,
            url: attachment.url.clone(),
            pending: attachment.pending,
        }
    }
}

impl From<ReplyRecord> for ReplySnapshot {
    fn from(record: ReplyRecord) -> Self {
        Self {
            id: record.id,
            content: record.content,
            sender_name: record.sender_name,
            sender_id: record.sender_id,
        }
    }
}

impl From<&ReplySnapshot> for ReplyRecord {
    fn from(snapshot: &ReplySnapshot) -> Self {
        Self {
            id: snapshot.id,
            content: snapshot.content.clone(),
            sender_name: snapshot.sender_name.clone(),
            sender_id: snapshot.sender_id,
        }
    }
}

/// Decode an `i64` from any integer-compatible JSON number (including `501.0`).
pub(crate) fn deserialize_i64_from_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    i64_from_value(&value).ok_or_else(|| D::Error::custom("expected integer-compatible number"))
}

fn deserialize_opt_i64_from_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    i64_from_value(&value)
        .map(Some)
        .ok_or_else(|| D::Error::custom("expected integer-compatible number or null"))
}

fn deserialize_u64_from_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = deserialize_i64_from_number(deserializer)?;
    u64::try_from(value).map_err(|_| D::Error::custom(format!("value {value} out of range for u64")))
}

/// Integer view of a JSON number, accepting floats with no fractional part.
#[must_use]
pub fn i64_from_value(value: &serde_json::Value) -> Option<i64> {
    let serde_json::Value::Number(number) = value else {
        return None;
    };
    if let Some(int) = number.as_i64() {
        return Some(int);
    }
    let float = number.as_f64()?;
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    if float.is_finite() && float.fract() == 0.0 && float >= i64::MIN as f64 && float <= i64::MAX as f64 {
        return Some(float as i64);
    }
    None
}
