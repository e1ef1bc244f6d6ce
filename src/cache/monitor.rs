//! Operator view of a single cache.

use std::sync::Arc;

use tracing::info;

use super::engine::Cache;
use super::keys::CacheKey;
use super::value::{CacheValue, ValueError};
use crate::util::bytes::{format_bytes, format_size};

/// Snapshot of one entry for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryView {
    pub key: String,
    pub content: String,
    pub size: String,
}

impl EntryView {
    fn new(key: &CacheKey, value: &CacheValue) -> Self {
        let content = match value.content_bytes() {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => format!("<object: {}>", value.object_type().unwrap_or("unknown")),
        };
        Self {
            key: key.to_string(),
            content,
            size: format_size(value.size()),
        }
    }
}

/// Inspects and maintains one [`Cache`]. Entries are addressed by their key's
/// display string.
#[derive(Debug, Clone)]
pub struct CacheMonitor {
    cache: Arc<Cache>,
}

impl CacheMonitor {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }

    pub fn clear(&self) {
        info!(cache = %self.cache.name(), "Cache cleared by operator");
        self.cache.clear();
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.cache.keys().iter().map(ToString::to_string).collect()
    }

    /// Remove the entry whose key renders as `key`.
    pub fn remove_key(&self, key: &str) -> bool {
        let Some(found) = self.find(key) else {
            return false;
        };
        let removed = self.cache.remove(&found).is_some();
        if removed {
            info!(cache = %self.cache.name(), key, "Cache entry removed by operator");
        }
        removed
    }

    /// Sum of all known entry sizes, in bytes.
    pub fn total_size(&self) -> u64 {
        self.cache
            .keys()
            .iter()
            .filter_map(|key| self.cache.peek(key))
            .filter_map(|value| value.size())
            .sum()
    }

    /// [`total_size`](Self::total_size) in human-readable form.
    pub fn size(&self) -> String {
        format_bytes(self.total_size())
    }

    pub fn entry(&self, key: &str) -> Option<EntryView> {
        let found = self.find(key)?;
        let value = self.cache.peek(&found)?;
        Some(EntryView::new(&found, &value))
    }

    pub fn entries(&self) -> Vec<EntryView> {
        self.cache
            .keys()
            .iter()
            .filter_map(|key| {
                self.cache
                    .peek(key)
                    .map(|value| EntryView::new(key, &value))
            })
            .collect()
    }

    /// Overwrite the content of a byte-backed entry. `Ok(false)` when no entry matches.
    pub fn set_entry_content(&self, key: &str, content: &str) -> Result<bool, ValueError> {
        let Some(value) = self
            .find(key)
            .and_then(|found| self.cache.peek(&found))
        else {
            return Ok(false);
        };
        value.set_content(content.to_owned())?;
        info!(cache = %self.cache.name(), key, "Cache entry content replaced by operator");
        Ok(true)
    }

    fn find(&self, rendered: &str) -> Option<CacheKey> {
        self.cache
            .keys()
            .into_iter()
            .find(|key| key.to_string() == rendered)
    }
}
