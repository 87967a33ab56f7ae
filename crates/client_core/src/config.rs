use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Rows requested per history page, initial and older alike.
    pub page_size: usize,
    /// Capacity of the client event bus.
    pub event_buffer: usize,
    /// How long a resolved author profile stays usable without a refetch.
    pub profile_cache_ttl: Duration,
    /// Upper bound on cached profiles; soonest-expiring entries are evicted
    /// beyond it.
    pub profile_cache_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            page_size: 50,
            event_buffer: 1024,
            profile_cache_ttl: Duration::from_secs(300),
            profile_cache_capacity: 512,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(v) = std::env::var("CHAT_PAGE_SIZE") {
        if let Ok(parsed) = v.parse::<usize>() {
            if parsed > 0 {
                settings.page_size = parsed;
            }
        }
    }

    if let Ok(v) = std::env::var("CHAT_EVENT_BUFFER") {
        if let Ok(parsed) = v.parse::<usize>() {
            if parsed > 0 {
                settings.event_buffer = parsed;
            }
        }
    }

    if let Ok(v) = std::env::var("CHAT_PROFILE_CACHE_TTL_SECONDS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.profile_cache_ttl = Duration::from_secs(parsed);
        }
    }

    if let Ok(v) = std::env::var("CHAT_PROFILE_CACHE_CAPACITY") {
        if let Ok(parsed) = v.parse::<usize>() {
            if parsed > 0 {
                settings.profile_cache_capacity = parsed;
            }
        }
    }

    settings
}
