use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use crate::source::{RequestHeaders, TrackDescriptor};

pub const DEFAULT_HEADER_TTL: Duration = Duration::from_secs(15 * 60);

/// A registration request, as sent by the host before it starts playback.
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderRegistration {
    pub url: String,
    pub headers: RequestHeaders,
}

#[derive(Debug, Clone)]
struct HeaderOverride {
    headers: RequestHeaders,
    expire_at: Instant,
}

/// Per-URL request headers with a fixed time-to-live. Expired entries are
/// evicted by the lookup that notices them; nothing sweeps in the background.
#[derive(Debug)]
pub struct HeaderRegistry {
    ttl: Duration,
    entries: Mutex<HashMap<String, HeaderOverride>>,
}

impl Default for HeaderRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_TTL)
    }
}

impl HeaderRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, HeaderOverride>> {
        // A poisoned map only ever holds complete inserts.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores every item with a non-empty URL and at least one header pair
    /// whose name and value are both non-empty, returning how many were kept.
    /// Re-registering a URL replaces its headers and expiry.
    pub fn register<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = HeaderRegistration>,
    {
        let expire_at = Instant::now() + self.ttl;
        let mut entries = self.entries();
        let mut stored = 0;
        for item in items {
            let url = item.url.trim();
            let headers: RequestHeaders = item
                .headers
                .into_iter()
                .filter(|(key, value)| !key.is_empty() && !value.is_empty())
                .collect();
            if url.is_empty() || headers.is_empty() {
                continue;
            }
            entries.insert(
                url.to_string(),
                HeaderOverride {
                    headers,
                    expire_at,
                },
            );
            stored += 1;
        }
        debug!(stored, ttl_secs = self.ttl.as_secs(), "registered media headers");
        stored
    }

    pub fn register_descriptors(&self, descriptors: &[TrackDescriptor]) -> usize {
        self.register(descriptors.iter().filter_map(|descriptor| {
            descriptor
                .request_headers
                .as_ref()
                .map(|headers| HeaderRegistration {
                    url: descriptor.url.clone(),
                    headers: headers.clone(),
                })
        }))
    }

    pub fn lookup(&self, url: &str) -> Option<RequestHeaders> {
        let mut entries = self.entries();
        let entry = entries.get(url)?;
        if Instant::now() >= entry.expire_at {
            entries.remove(url);
            debug!(url, "evicted expired media headers");
            return None;
        }
        Some(entry.headers.clone())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
