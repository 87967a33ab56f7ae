use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ChannelId;

/// Failure classes surfaced by the synchronization core. None of them is
/// fatal to the process; all are scoped to a channel or the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Initial or older history page could not be fetched.
    Fetch,
    /// Author profile lookup failed; display degrades to the fallback chain.
    Resolution,
    /// A message insert failed; the pending entry has been removed.
    Persist,
    /// A realtime feed dropped or could not be re-established.
    Subscription,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?} failure: {detail}")]
pub struct SyncFailure {
    pub kind: FailureKind,
    pub channel_id: Option<ChannelId>,
    pub detail: String,
}

impl SyncFailure {
    pub fn new(kind: FailureKind, channel_id: Option<ChannelId>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            channel_id,
            detail: detail.into(),
        }
    }
}
