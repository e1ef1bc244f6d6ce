//! Cache key definitions.
//!
//! A [`CacheKey`] answers two different questions:
//!
//! - *Is this the same slot?* `==` and `Hash`, used by the backing store.
//! - *May a value produced under this key serve that lookup?*
//!   [`CacheKey::is_valid`], used by the cache before handing a value out.
//!
//! The two relations are independent: an [`ExpiresKey`] stays valid against
//! later lookups while its window is open, and an [`InvalidKey`] is never valid,
//! not even against itself.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::util::clock::{Millis, format_millis, now_millis};

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid resource url `{url}`: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid expiry `{value}`: expected a whole number of seconds")]
    Expires { value: String },
    #[error("expiry of {seconds}s from {created_at} overflows the timestamp range")]
    ExpiresOverflow { created_at: Millis, seconds: u64 },
    #[error("invalid cache key: {message}")]
    Construction { message: String },
}

impl KeyError {
    pub fn construction(message: impl Into<String>) -> Self {
        Self::Construction {
            message: message.into(),
        }
    }
}

/// Identifies a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum CacheKey {
    Timestamp(TimestampKey),
    Expires(ExpiresKey),
    Compound(CompoundKey),
    Parameter(ParameterKey),
    Invalid(InvalidKey),
}

impl CacheKey {
    /// Whether a value produced under `self` may serve a lookup made with `candidate`.
    pub fn is_valid(&self, candidate: &CacheKey) -> bool {
        match self {
            Self::Timestamp(key) => {
                matches!(candidate, Self::Timestamp(other) if key.is_valid(other))
            }
            Self::Expires(key) => matches!(candidate, Self::Expires(other) if key.is_valid(other)),
            Self::Compound(key) => matches!(candidate, Self::Compound(other) if key.is_valid(other)),
            Self::Parameter(key) => {
                matches!(candidate, Self::Parameter(other) if key.is_valid(other))
            }
            Self::Invalid(_) => false,
        }
    }

    /// Modification time in epoch milliseconds, `None` when the key has no temporal meaning.
    pub fn last_modified(&self) -> Option<Millis> {
        match self {
            Self::Timestamp(key) => Some(key.timestamp()),
            Self::Expires(key) => key.last_modified(),
            Self::Compound(key) => key.last_modified(),
            Self::Parameter(_) | Self::Invalid(_) => None,
        }
    }

    /// Expiration instant for expiry keys.
    pub fn expires_at(&self) -> Option<Millis> {
        match self {
            Self::Expires(key) => Some(key.expires_at()),
            Self::Timestamp(_) | Self::Compound(_) | Self::Parameter(_) | Self::Invalid(_) => None,
        }
    }

    /// Stable-within-process digest of the key, for log correlation.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp(key) => key.fmt(f),
            Self::Expires(key) => key.fmt(f),
            Self::Compound(key) => key.fmt(f),
            Self::Parameter(key) => key.fmt(f),
            Self::Invalid(key) => key.fmt(f),
        }
    }
}

impl From<TimestampKey> for CacheKey {
    fn from(key: TimestampKey) -> Self {
        Self::Timestamp(key)
    }
}

impl From<ExpiresKey> for CacheKey {
    fn from(key: ExpiresKey) -> Self {
        Self::Expires(key)
    }
}

impl From<CompoundKey> for CacheKey {
    fn from(key: CompoundKey) -> Self {
        Self::Compound(key)
    }
}

impl From<ParameterKey> for CacheKey {
    fn from(key: ParameterKey) -> Self {
        Self::Parameter(key)
    }
}

impl From<InvalidKey> for CacheKey {
    fn from(key: InvalidKey) -> Self {
        Self::Invalid(key)
    }
}

// ============================================================================
// TimestampKey
// ============================================================================

/// A resource identified by its URL at a given modification time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimestampKey {
    url: Url,
    timestamp: Millis,
}

impl TimestampKey {
    pub fn new(url: Url, timestamp: Millis) -> Self {
        Self { url, timestamp }
    }

    pub fn parse(url: &str, timestamp: Millis) -> Result<Self, KeyError> {
        let parsed = Url::parse(url).map_err(|source| KeyError::Url {
            url: url.to_string(),
            source,
        })?;
        Ok(Self::new(parsed, timestamp))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn timestamp(&self) -> Millis {
        self.timestamp
    }

    pub fn is_valid(&self, other: &TimestampKey) -> bool {
        self.url == other.url && self.timestamp == other.timestamp
    }
}

impl fmt::Display for TimestampKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TimestampKey(url={}, timestamp={} ({}))",
            self.url,
            self.timestamp,
            format_millis(self.timestamp)
        )
    }
}

// ============================================================================
// ExpiresKey
// ============================================================================

/// Wraps another key and keeps values usable for a fixed number of seconds.
///
/// Only the wrapped key identifies the slot, so a lookup built later for the
/// same content finds the entry stored earlier and the window decides whether
/// it may be served. The expiration instant is fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ExpiresParts", into = "ExpiresParts")]
pub struct ExpiresKey {
    inner: Box<CacheKey>,
    created_at: Millis,
    seconds: u64,
    expires_at: Millis,
}

impl ExpiresKey {
    /// Create a key whose window opens now.
    pub fn new(inner: impl Into<CacheKey>, seconds: u64) -> Result<Self, KeyError> {
        Self::at(inner, now_millis(), seconds)
    }

    /// Create a key whose window opens at `created_at`.
    pub fn at(
        inner: impl Into<CacheKey>,
        created_at: Millis,
        seconds: u64,
    ) -> Result<Self, KeyError> {
        let expires_at = i64::try_from(seconds)
            .ok()
            .and_then(|seconds| seconds.checked_mul(1_000))
            .and_then(|window| created_at.checked_add(window))
            .ok_or(KeyError::ExpiresOverflow {
                created_at,
                seconds,
            })?;

        Ok(Self {
            inner: Box::new(inner.into()),
            created_at,
            seconds,
            expires_at,
        })
    }

    /// Create a key from the textual seconds form used in pipeline configuration.
    pub fn parse(inner: impl Into<CacheKey>, expires: &str) -> Result<Self, KeyError> {
        let seconds = expires
            .trim()
            .parse::<u64>()
            .map_err(|_| KeyError::Expires {
                value: expires.to_string(),
            })?;
        Self::new(inner, seconds)
    }

    pub fn inner(&self) -> &CacheKey {
        &self.inner
    }

    pub fn created_at(&self) -> Millis {
        self.created_at
    }

    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    pub fn expires_at(&self) -> Millis {
        self.expires_at
    }

    pub fn last_modified(&self) -> Option<Millis> {
        self.inner.last_modified()
    }

    /// Valid while the window is still open at the candidate's creation.
    ///
    /// Past the window, only a wrapped key that carries its own modification
    /// time can vouch for the value, and both wrapped keys must accept each
    /// other; parameters and invalid markers cannot.
    pub fn is_valid(&self, other: &ExpiresKey) -> bool {
        if self.expires_at > other.created_at {
            return true;
        }

        self.inner.last_modified().is_some()
            && self.inner.is_valid(&other.inner)
            && other.inner.is_valid(&self.inner)
    }
}

impl PartialEq for ExpiresKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for ExpiresKey {}

impl Hash for ExpiresKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl fmt::Display for ExpiresKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExpiresKey(key={}, created_at={}, expires_at={})",
            self.inner,
            format_millis(self.created_at),
            format_millis(self.expires_at)
        )
    }
}

#[derive(Serialize, Deserialize)]
struct ExpiresParts {
    key: CacheKey,
    created_at: Millis,
    seconds: u64,
}

impl TryFrom<ExpiresParts> for ExpiresKey {
    type Error = KeyError;

    fn try_from(parts: ExpiresParts) -> Result<Self, Self::Error> {
        Self::at(parts.key, parts.created_at, parts.seconds)
    }
}

impl From<ExpiresKey> for ExpiresParts {
    fn from(key: ExpiresKey) -> Self {
        Self {
            key: *key.inner,
            created_at: key.created_at,
            seconds: key.seconds,
        }
    }
}

// ============================================================================
// CompoundKey
// ============================================================================

/// An ordered list of sub-keys, one per stage that contributed to the artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompoundKey {
    keys: Vec<CacheKey>,
}

impl CompoundKey {
    pub fn new(keys: Vec<CacheKey>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[CacheKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Structurally equal and valid position by position.
    pub fn is_valid(&self, other: &CompoundKey) -> bool {
        self == other
            && self
                .keys
                .iter()
                .zip(&other.keys)
                .all(|(mine, theirs)| mine.is_valid(theirs))
    }

    /// Latest sub-key modification, unknown as soon as one sub-key is unknown.
    pub fn last_modified(&self) -> Option<Millis> {
        self.keys
            .iter()
            .try_fold(0, |latest, key| key.last_modified().map(|at| latest.max(at)))
    }
}

impl FromIterator<CacheKey> for CompoundKey {
    fn from_iter<I: IntoIterator<Item = CacheKey>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for CompoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompoundKey[")?;
        for (index, key) in self.keys.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}")?;
        }
        f.write_str("]")
    }
}

// ============================================================================
// ParameterKey
// ============================================================================

/// A set of named string parameters, compared as a map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterKey {
    parameters: BTreeMap<String, String>,
}

impl ParameterKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_bool(self, name: impl Into<String>, value: bool) -> Self {
        self.with(name, value.to_string())
    }

    pub fn with_int(self, name: impl Into<String>, value: i64) -> Self {
        self.with(name, value.to_string())
    }

    /// Flatten a nested map into `name_key` parameters.
    pub fn with_map<K, V, I>(mut self, name: &str, entries: I) -> Self
    where
        K: fmt::Display,
        V: fmt::Display,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.parameters
                .insert(format!("{name}_{key}"), value.to_string());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn is_valid(&self, other: &ParameterKey) -> bool {
        self == other
    }
}

impl<K, V> FromIterator<(K, V)> for ParameterKey
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            parameters: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ParameterKey{")?;
        for (index, (name, value)) in self.parameters.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

// ============================================================================
// InvalidKey
// ============================================================================

/// Marks output that must never be reused on validity grounds.
///
/// Paired with an [`ExpiresKey`], it gives uncacheable content a pure
/// time-based lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvalidKey {
    marker: String,
}

impl InvalidKey {
    pub fn new(marker: impl Into<String>) -> Result<Self, KeyError> {
        let marker = marker.into();
        if marker.trim().is_empty() {
            return Err(KeyError::construction(
                "an explicit marker is required for an invalid key",
            ));
        }
        Ok(Self { marker })
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }
}

impl fmt::Display for InvalidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InvalidKey({})", self.marker)
    }
}
