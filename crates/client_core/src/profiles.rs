use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use shared::{
    domain::UserId,
    protocol::{AuthorDisplay, AuthorProfile, Message, MessageRow},
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::ChatBackend;

struct CachedProfile {
    profile: AuthorProfile,
    expires_at: Instant,
}

/// Batch author-identity resolver with an explicit bounded TTL cache.
/// Resolution failures never propagate: callers always get a map, and any
/// author missing from it degrades to the id-based display fallback.
pub struct ProfileResolver {
    backend: Arc<dyn ChatBackend>,
    cache: Mutex<HashMap<UserId, CachedProfile>>,
    ttl: Duration,
    capacity: usize,
}

impl ProfileResolver {
    pub fn new(backend: Arc<dyn ChatBackend>, ttl: Duration, capacity: usize) -> Self {
        Self {
            backend,
            cache: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    pub async fn resolve(&self, user_ids: &[UserId]) -> HashMap<UserId, AuthorProfile> {
        let mut resolved: HashMap<UserId, AuthorProfile> = HashMap::new();
        let mut missing: Vec<UserId> = Vec::new();

        {
            let cache = self.cache.lock().await;
            let now = Instant::now();
            for user_id in user_ids {
                if resolved.contains_key(user_id) || missing.contains(user_id) {
                    continue;
                }
                match cache.get(user_id) {
                    Some(entry) if entry.expires_at > now => {
                        resolved.insert(user_id.clone(), entry.profile.clone());
                    }
                    _ => missing.push(user_id.clone()),
                }
            }
        }

        if missing.is_empty() {
            return resolved;
        }

        match self.backend.resolve_profiles(&missing).await {
            Ok(fetched) => {
                let mut cache = self.cache.lock().await;
                let now = Instant::now();
                for (user_id, profile) in fetched {
                    cache.insert(
                        user_id.clone(),
                        CachedProfile {
                            profile: profile.clone(),
                            expires_at: now + self.ttl,
                        },
                    );
                    resolved.insert(user_id, profile);
                }
                prune(&mut cache, now, self.capacity);
            }
            Err(err) => {
                warn!(error = %err, "profile resolution failed; degrading to cached display data");
            }
        }

        resolved
    }

    /// Attaches display identity to a fetched batch. Authors the resolver
    /// could not produce a profile for fall back to their raw id.
    pub async fn enrich(&self, rows: Vec<MessageRow>) -> Vec<Message> {
        let mut author_ids: Vec<UserId> = Vec::new();
        for row in &rows {
            if !author_ids.contains(&row.author_id) {
                author_ids.push(row.author_id.clone());
            }
        }
        let profiles = self.resolve(&author_ids).await;

        rows.into_iter()
            .map(|row| {
                let display = profiles
                    .get(&row.author_id)
                    .map(AuthorProfile::display)
                    .unwrap_or_else(|| AuthorDisplay::Unresolved {
                        user_id: row.author_id.clone(),
                    });
                row.into_message(display)
            })
            .collect()
    }
}

fn prune(cache: &mut HashMap<UserId, CachedProfile>, now: Instant, capacity: usize) {
    cache.retain(|_, entry| entry.expires_at > now);
    while cache.len() > capacity {
        let Some(evict) = cache
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(user_id, _)| user_id.clone())
        else {
            break;
        };
        cache.remove(&evict);
    }
}

#[cfg(test)]
#[path = "tests/profiles_tests.rs"]
mod tests;
