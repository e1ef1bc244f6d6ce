//! Bulk maintenance across several caches.
//!
//! Entries are selected by a [`BurstFilter`]. Every bound that is set must
//! hold; bounds that are not set are ignored, so an empty filter selects
//! everything.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use super::engine::Cache;
use super::keys::CacheKey;
use super::value::CacheValue;
use crate::util::clock::{Millis, now_millis};

/// Maximum number of lines returned by [`CacheBurstActions::list`].
pub const LIST_LIMIT: usize = 100;

const SECOND_MS: Millis = 1_000;
const MINUTE_MS: Millis = 60 * SECOND_MS;
const HOUR_MS: Millis = 60 * MINUTE_MS;
const DAY_MS: Millis = 24 * HOUR_MS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BurstError {
    #[error("unsupported age `{value}`: expected digits followed by one of s, m, h, d")]
    Age { value: String },
}

impl BurstError {
    fn age(value: &str) -> Self {
        Self::Age {
            value: value.to_string(),
        }
    }
}

/// Parse an age such as `30s`, `15m`, `2h` or `7d` into milliseconds.
pub fn parse_age(value: &str) -> Result<Millis, BurstError> {
    let Some(unit) = value.chars().last() else {
        return Err(BurstError::age(value));
    };
    let digits = &value[..value.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(BurstError::age(value));
    }

    let factor = match unit {
        's' => SECOND_MS,
        'm' => MINUTE_MS,
        'h' => HOUR_MS,
        'd' => DAY_MS,
        _ => return Err(BurstError::age(value)),
    };

    digits
        .parse::<Millis>()
        .ok()
        .and_then(|count| count.checked_mul(factor))
        .ok_or_else(|| BurstError::age(value))
}

/// Inclusive bounds on entry size, modification time and expiry.
///
/// An entry whose size or modification time is unknown fails any bound on
/// that property. Expiry bounds only match entries stored under an expiry key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BurstFilter {
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub min_last_modified: Option<Millis>,
    pub max_last_modified: Option<Millis>,
    pub min_expires: Option<Millis>,
    pub max_expires: Option<Millis>,
}

impl BurstFilter {
    /// Entries at least `size` bytes large.
    pub fn greater_than(size: u64) -> Self {
        Self {
            min_size: Some(size),
            ..Self::default()
        }
    }

    /// Entries at most `size` bytes large.
    pub fn smaller_than(size: u64) -> Self {
        Self {
            max_size: Some(size),
            ..Self::default()
        }
    }

    /// Entries last modified at least `age` ago, e.g. `"2h"`.
    pub fn older_than(age: &str) -> Result<Self, BurstError> {
        Ok(Self {
            max_last_modified: Some(now_millis() - parse_age(age)?),
            ..Self::default()
        })
    }

    /// Entries last modified within `age`, e.g. `"10m"`.
    pub fn younger_than(age: &str) -> Result<Self, BurstError> {
        Ok(Self {
            min_last_modified: Some(now_millis() - parse_age(age)?),
            ..Self::default()
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, key: &CacheKey, value: &CacheValue) -> bool {
        let size = value.size();
        let last_modified = key.last_modified();

        within(size, self.min_size, self.max_size)
            && within(last_modified, self.min_last_modified, self.max_last_modified)
            && within(key.expires_at(), self.min_expires, self.max_expires)
    }
}

fn within<T: PartialOrd + Copy>(actual: Option<T>, min: Option<T>, max: Option<T>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    let Some(actual) = actual else {
        return false;
    };
    min.is_none_or(|min| actual >= min) && max.is_none_or(|max| actual <= max)
}

/// Outcome of [`CacheBurstActions::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BurstReport {
    pub matched: usize,
    pub removed: usize,
}

/// Filtered list and clear operations over a set of caches.
#[derive(Debug, Clone)]
pub struct CacheBurstActions {
    caches: Vec<Arc<Cache>>,
}

impl CacheBurstActions {
    pub fn new(caches: impl IntoIterator<Item = Arc<Cache>>) -> Self {
        Self {
            caches: caches.into_iter().collect(),
        }
    }

    /// Remove every matching entry.
    pub fn clear(&self, filter: &BurstFilter) -> BurstReport {
        let mut report = BurstReport::default();
        self.for_each_match(filter, |cache, key| {
            report.matched += 1;
            if cache.remove(key).is_some() {
                report.removed += 1;
            }
        });
        info!(
            matched = report.matched,
            removed = report.removed,
            "Burst clear finished"
        );
        report
    }

    /// Describe matching entries as `cache: key`, capped at [`LIST_LIMIT`] lines.
    pub fn list(&self, filter: &BurstFilter) -> Vec<String> {
        let mut lines = Vec::new();
        self.for_each_match(filter, |cache, key| {
            lines.push(format!("{}: {key}", cache.name()));
        });

        if lines.len() > LIST_LIMIT {
            let shown = LIST_LIMIT - 1;
            let hidden = lines.len() - shown;
            lines.truncate(shown);
            lines.push(format!(
                "There are {hidden} more entries matching this filter."
            ));
        }
        lines
    }

    pub fn clear_greater_than(&self, size: u64) -> BurstReport {
        self.clear(&BurstFilter::greater_than(size))
    }

    pub fn clear_smaller_than(&self, size: u64) -> BurstReport {
        self.clear(&BurstFilter::smaller_than(size))
    }

    pub fn clear_older_than(&self, age: &str) -> Result<BurstReport, BurstError> {
        Ok(self.clear(&BurstFilter::older_than(age)?))
    }

    pub fn clear_younger_than(&self, age: &str) -> Result<BurstReport, BurstError> {
        Ok(self.clear(&BurstFilter::younger_than(age)?))
    }

    pub fn list_greater_than(&self, size: u64) -> Vec<String> {
        self.list(&BurstFilter::greater_than(size))
    }

    pub fn list_smaller_than(&self, size: u64) -> Vec<String> {
        self.list(&BurstFilter::smaller_than(size))
    }

    pub fn list_older_than(&self, age: &str) -> Result<Vec<String>, BurstError> {
        Ok(self.list(&BurstFilter::older_than(age)?))
    }

    pub fn list_younger_than(&self, age: &str) -> Result<Vec<String>, BurstError> {
        Ok(self.list(&BurstFilter::younger_than(age)?))
    }

    fn for_each_match(&self, filter: &BurstFilter, mut action: impl FnMut(&Cache, &CacheKey)) {
        for cache in &self.caches {
            for key in cache.keys() {
                // Entries can disappear between the key snapshot and this read.
                let Some(value) = cache.peek(&key) else {
                    continue;
                };
                // Filter on the producing key's data but act on the slot it is stored under.
                if filter.matches(value.key().unwrap_or(&key), &value) {
                    action(cache, &key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::cache::keys::{ExpiresKey, ParameterKey, TimestampKey};
    use crate::cache::store::LruStore;

    fn cache(name: &str) -> Arc<Cache> {
        Arc::new(Cache::new(name, LruStore::new(NonZeroUsize::new(512).unwrap())))
    }

    fn page(path: &str, modified: Millis) -> CacheKey {
        TimestampKey::parse(&format!("https://example.org/{path}"), modified)
            .unwrap()
            .into()
    }

    fn put(cache: &Cache, key: CacheKey, size: usize) {
        cache.put(key.clone(), CacheValue::bytes(vec![b'x'; size], key));
    }

    #[test]
    fn parses_ages() {
        assert_eq!(parse_age("30s"), Ok(30_000));
        assert_eq!(parse_age("15m"), Ok(900_000));
        assert_eq!(parse_age("2h"), Ok(7_200_000));
        assert_eq!(parse_age("1d"), Ok(86_400_000));

        for bad in ["", "s", "10", "10w", "-5m", "1.5h", "10 m"] {
            assert!(parse_age(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let pages = cache("pages");
        put(&pages, page("a", 1), 10);
        put(&pages, ParameterKey::new().with("id", "1").into(), 10);

        let actions = CacheBurstActions::new([Arc::clone(&pages)]);
        assert!(BurstFilter::default().is_empty());
        assert_eq!(actions.list(&BurstFilter::default()).len(), 2);
    }

    #[test]
    fn bounds_are_combined() {
        let pages = cache("pages");
        put(&pages, page("small-old", 1_000), 10);
        put(&pages, page("big-old", 1_000), 500);
        put(&pages, page("big-new", 9_000), 500);

        let actions = CacheBurstActions::new([Arc::clone(&pages)]);
        let filter = BurstFilter {
            min_size: Some(100),
            max_last_modified: Some(5_000),
            ..BurstFilter::default()
        };

        let listed = actions.list(&filter);
        assert_eq!(listed.len(), 1);
        assert!(listed[0].starts_with("pages: "));
        assert!(listed[0].contains("big-old"));

        let report = actions.clear(&filter);
        assert_eq!(report, BurstReport { matched: 1, removed: 1 });
        assert_eq!(pages.len(), 2);
    }

    #[test]
    fn unknown_modification_time_fails_time_bounds() {
        let pages = cache("pages");
        put(&pages, ParameterKey::new().with("id", "1").into(), 10);

        let actions = CacheBurstActions::new([pages]);
        let filter = BurstFilter {
            min_last_modified: Some(0),
            ..BurstFilter::default()
        };
        assert!(actions.list(&filter).is_empty());
    }

    #[test]
    fn expiry_bounds_only_match_expiring_entries() {
        let pages = cache("pages");
        let expiring: CacheKey = ExpiresKey::at(page("e", 1), 10_000, 60).unwrap().into();
        put(&pages, expiring, 10);
        put(&pages, page("plain", 1), 10);

        let actions = CacheBurstActions::new([pages]);
        let filter = BurstFilter {
            max_expires: Some(100_000),
            ..BurstFilter::default()
        };
        let listed = actions.list(&filter);
        assert_eq!(listed.len(), 1);
        assert!(listed[0].contains("ExpiresKey"));

        let too_early = BurstFilter {
            max_expires: Some(69_999),
            ..BurstFilter::default()
        };
        assert!(actions.list(&too_early).is_empty());
    }

    #[test]
    fn size_helpers_are_inclusive() {
        let pages = cache("pages");
        put(&pages, page("a", 1), 100);
        put(&pages, page("b", 1), 200);

        let actions = CacheBurstActions::new([Arc::clone(&pages)]);
        assert_eq!(actions.list_greater_than(200).len(), 1);
        assert_eq!(actions.list_smaller_than(200).len(), 2);
        assert_eq!(actions.clear_smaller_than(100).removed, 1);
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn age_helpers_select_by_modification_time() {
        let pages = cache("pages");
        let now = now_millis();
        put(&pages, page("recent", now - 1_000), 10);
        put(&pages, page("ancient", now - 3 * DAY_MS), 10);

        let actions = CacheBurstActions::new([Arc::clone(&pages)]);

        let old = actions.list_older_than("1d").unwrap();
        assert_eq!(old.len(), 1);
        assert!(old[0].contains("ancient"));

        let young = actions.list_younger_than("1h").unwrap();
        assert_eq!(young.len(), 1);
        assert!(young[0].contains("recent"));

        assert!(actions.clear_older_than("1x").is_err());
        assert_eq!(actions.clear_older_than("1d").unwrap().removed, 1);
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn entries_are_addressed_by_their_slot() {
        let pages = cache("pages");
        let slot = page("slot", 1);
        let producer: CacheKey = ParameterKey::new().with("id", "producer").into();
        pages.put(slot.clone(), CacheValue::bytes("v", producer));

        let actions = CacheBurstActions::new([Arc::clone(&pages)]);
        let listed = actions.list(&BurstFilter::default());
        assert_eq!(listed.len(), 1);
        assert!(listed[0].contains("slot"));
        assert!(!listed[0].contains("producer"));

        let report = actions.clear(&BurstFilter::default());
        assert_eq!(report, BurstReport { matched: 1, removed: 1 });
        assert_eq!(pages.len(), 0);
    }

    #[test]
    fn listing_leaves_recency_untouched() {
        let pages = Arc::new(Cache::new("pages", LruStore::new(NonZeroUsize::new(2).unwrap())));
        put(&pages, page("a", 1), 1);
        put(&pages, page("b", 1), 1);

        let actions = CacheBurstActions::new([Arc::clone(&pages)]);
        assert_eq!(actions.list(&BurstFilter::default()).len(), 2);

        put(&pages, page("c", 1), 1);
        assert!(pages.peek(&page("a", 1)).is_none());
        assert!(pages.peek(&page("b", 1)).is_some());
    }

    #[test]
    fn listing_is_capped() {
        let pages = cache("pages");
        let other = cache("other");
        for index in 0..80 {
            put(&pages, page(&format!("p{index}"), 1), 1);
            put(&other, page(&format!("o{index}"), 1), 1);
        }

        let actions = CacheBurstActions::new([pages, other]);
        let listed = actions.list(&BurstFilter::default());

        assert_eq!(listed.len(), LIST_LIMIT);
        assert_eq!(
            listed.last().unwrap(),
            "There are 61 more entries matching this filter."
        );
    }
}
