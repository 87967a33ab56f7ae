use chrono::{DateTime, Utc};
use shared::protocol::Message;

/// Backward-pagination cursor for one open channel. `loading` is the only
/// explicit lock in the system: it serializes older-page loads and makes
/// duplicate edge-triggered load requests harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationCursor {
    pub oldest_loaded_at: Option<DateTime<Utc>>,
    pub has_more: bool,
    pub loading: bool,
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self {
            oldest_loaded_at: None,
            has_more: true,
            loading: false,
        }
    }
}

impl PaginationCursor {
    pub fn can_load_older(&self) -> bool {
        !self.loading && self.has_more && self.oldest_loaded_at.is_some()
    }

    /// Seeds the cursor from the initial ascending page.
    pub fn seed(&mut self, batch: &[Message], page_size: usize) {
        self.oldest_loaded_at = batch.iter().map(|message| message.created_at).min();
        self.has_more = batch.len() == page_size;
        self.loading = false;
    }

    /// Advances the cursor past an older batch (already reversed to
    /// ascending). An empty batch exhausts the cursor without moving it.
    pub fn advance(&mut self, batch: &[Message], page_size: usize) {
        if batch.is_empty() {
            self.has_more = false;
            return;
        }
        if let Some(oldest) = batch.iter().map(|message| message.created_at).min() {
            self.oldest_loaded_at = Some(oldest);
        }
        self.has_more = batch.len() == page_size;
    }
}

#[cfg(test)]
#[path = "tests/pagination_tests.rs"]
mod tests;
