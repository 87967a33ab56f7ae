use std::collections::HashMap;

use shared::{
    domain::{ChannelId, MessageId},
    protocol::Message,
};

/// Merges `incoming` into `current`, deduplicating by id and restoring the
/// canonical order. Entries are indexed writing `current` first, then
/// `incoming`, so an incoming entry with a known id overwrites the prior
/// entry's fields. The result is sorted ascending by `(created_at, id)`;
/// final positions are a pure function of the merged set, never of arrival
/// order, which is what lets async sources commit in any order.
pub fn merge(current: &[Message], incoming: Vec<Message>) -> Vec<Message> {
    let mut by_id: HashMap<MessageId, Message> = current
        .iter()
        .map(|message| (message.id.clone(), message.clone()))
        .collect();
    for message in incoming {
        by_id.insert(message.id.clone(), message);
    }

    let mut merged: Vec<Message> = by_id.into_values().collect();
    merged.sort_unstable_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    merged
}

/// Canonical ordered message set for one open channel. The store is the
/// single writer: pagination, realtime ingestion, and optimistic sends all
/// submit batches through it, and every mutation commits against the latest
/// state under the caller's lock guard.
#[derive(Debug)]
pub struct MessageStore {
    channel_id: ChannelId,
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            messages: Vec::new(),
        }
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Merges a batch and returns the new sorted snapshot.
    pub fn apply(&mut self, incoming: Vec<Message>) -> Vec<Message> {
        self.messages = merge(&self.messages, incoming);
        self.messages.clone()
    }

    /// Swaps a pending entry for its persisted counterpart: the local id is
    /// removed and the confirmed message merged in. Safe when the row feed
    /// has already delivered the persisted row (dedup collapses the two).
    pub fn confirm(&mut self, local_id: &MessageId, confirmed: Message) -> Vec<Message> {
        self.messages.retain(|message| message.id != *local_id);
        self.apply(vec![confirmed])
    }

    pub fn remove(&mut self, id: &MessageId) -> Vec<Message> {
        self.messages.retain(|message| message.id != *id);
        self.messages.clone()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|message| message.id == *id)
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
