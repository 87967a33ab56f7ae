use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChannelId, MessageId, UserId};

/// Denormalized author identity attached to a message when a batch is merged.
/// Resolved exactly once via the fallback chain (profile name, then email,
/// then the raw user id); ordering logic never looks at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum AuthorDisplay {
    Named {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar_url: Option<String>,
    },
    Email {
        email: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar_url: Option<String>,
    },
    Unresolved {
        user_id: UserId,
    },
}

impl AuthorDisplay {
    pub fn label(&self) -> &str {
        match self {
            Self::Named { name, .. } => name,
            Self::Email { email, .. } => email,
            Self::Unresolved { user_id } => user_id.as_str(),
        }
    }

    pub fn avatar_url(&self) -> Option<&str> {
        match self {
            Self::Named { avatar_url, .. } | Self::Email { avatar_url, .. } => {
                avatar_url.as_deref()
            }
            Self::Unresolved { .. } => None,
        }
    }

    /// One- or two-letter monogram for avatar placeholders.
    pub fn initials(&self) -> String {
        let label = self.label().trim();
        if label.is_empty() {
            return "U".to_string();
        }
        let mut words = label.split_whitespace();
        let first = words.next().and_then(|w| w.chars().next());
        let second = words.next().and_then(|w| w.chars().next());
        match (first, second) {
            (Some(a), Some(b)) => format!("{}{}", a.to_uppercase(), b.to_uppercase()),
            (Some(a), None) => a.to_uppercase().to_string(),
            _ => "U".to_string(),
        }
    }
}

/// Author profile as the persistence collaborator returns it. Any field may
/// be missing or blank; `display` applies the fallback chain once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorProfile {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
}

impl AuthorProfile {
    pub fn display(&self) -> AuthorDisplay {
        if let Some(name) = non_blank(&self.name) {
            return AuthorDisplay::Named {
                name: name.to_string(),
                avatar_url: self.avatar_url.clone(),
            };
        }
        if let Some(email) = non_blank(&self.email) {
            return AuthorDisplay::Email {
                email: email.to_string(),
                avatar_url: self.avatar_url.clone(),
            };
        }
        AuthorDisplay::Unresolved {
            user_id: self.id.clone(),
        }
    }
}

/// Canonical message as held by the store and rendered by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author_display: AuthorDisplay,
}

/// Persisted row as stored by the backend and delivered on the row-insertion
/// feed: a message without display data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    pub fn into_message(self, author_display: AuthorDisplay) -> Message {
        Message {
            id: self.id,
            channel_id: self.channel_id,
            author_id: self.author_id,
            content: self.content,
            created_at: self.created_at,
            author_display,
        }
    }
}

/// Heartbeat record published to the presence channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Full presence state as the transport delivers it on sync/join/leave:
/// keyed by presence key, each key possibly holding several records when one
/// user has multiple live connections.
pub type PresenceState = HashMap<String, Vec<PresenceRecord>>;
