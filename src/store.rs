//! Ordered message list of the active conversation.
//!
//! DESIGN
//! ======
//! The store is the single source of truth for rendering. Reads are public;
//! every mutator is crate-private so only reconciliation and the optimistic
//! coordinator can insert, replace or remove entries. Anything derived (reply
//! counts, pending totals) is computed from the list on demand.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use crate::types::{Message, MessageId, TempId, UserId};

#[derive(Clone, Debug, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
}

impl ConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages in presentation order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    #[must_use]
    pub fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: MessageId) -> bool {
        self.position(id).is_some()
    }

    /// Number of entries whose durable send is still in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_pending()).count()
    }

    /// Earliest pending entry sent by `sender` whose text and reply target
    /// match `like`.
    pub(crate) fn first_pending_like(&self, sender: UserId, like: &Message) -> Option<TempId> {
        let text = |m: &Message| m.content.as_deref().map(str::trim).map(str::to_owned);
        self.messages.iter().find_map(|m| match m.id {
            MessageId::Temp(temp)
                if m.is_pending()
                    && m.sender_id == sender
                    && m.reply_to_id == like.reply_to_id
                    && text(m) == text(like) =>
            {
                Some(temp)
            }
            _ => None,
        })
    }

    pub(crate) fn push(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Insert at the tail, stepping back past entries that are strictly newer
    /// so resynchronized messages land in `created_at` order.
    pub(crate) fn insert_by_created_at(&mut self, message: Message) -> usize {
        let index = self
            .messages
            .iter()
            .rposition(|m| m.created_at <= message.created_at)
            .map_or(0, |i| i + 1);
        self.messages.insert(index, message);
        index
    }

    pub(crate) fn insert_at(&mut self, index: usize, message: Message) -> usize {
        let index = index.min(self.messages.len());
        self.messages.insert(index, message);
        index
    }

    /// Replace the entry at `id` in place. Returns its index, or hands
    /// `message` back when `id` is not present.
    pub(crate) fn replace(&mut self, id: MessageId, message: Message) -> Result<usize, Message> {
        let Some(index) = self.position(id) else {
            return Err(message);
        };
        self.messages[index] = message;
        Ok(index)
    }

    pub(crate) fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Remove the entry with `id`, returning it and its former index.
    pub(crate) fn remove(&mut self, id: MessageId) -> Option<(usize, Message)> {
        let index = self.position(id)?;
        Some((index, self.messages.remove(index)))
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&Message) -> bool) {
        self.messages.retain(keep);
    }
}
