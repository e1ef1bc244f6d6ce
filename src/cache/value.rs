//! Cached payloads together with the key they were produced under.

use std::any::{Any, type_name};
use std::fmt;
use std::io::Write;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use super::keys::CacheKey;
use super::lock;

const SOURCE: &str = "cache::value";

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("`{operation}` is not supported for {kind} cache values")]
    Unsupported {
        operation: &'static str,
        kind: ValueKind,
    },
    #[error("failed to write cached content: {0}")]
    Io(#[from] std::io::Error),
}

impl ValueError {
    fn unsupported(operation: &'static str, kind: ValueKind) -> Self {
        Self::Unsupported { operation, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bytes,
    Object,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes => f.write_str("bytes"),
            Self::Object => f.write_str("object"),
        }
    }
}

enum Content {
    Bytes(RwLock<Bytes>),
    Object {
        value: Arc<dyn Any + Send + Sync>,
        type_name: &'static str,
        size: Option<u64>,
    },
}

/// A payload stored in a cache.
///
/// The producing key travels with the payload so the cache can decide, per
/// lookup, whether the payload may be served. A value without a key is never
/// valid.
pub struct CacheValue {
    key: Option<CacheKey>,
    content: Content,
}

impl CacheValue {
    /// Raw byte content, such as a rendered fragment.
    pub fn bytes(content: impl Into<Bytes>, key: impl Into<Option<CacheKey>>) -> Self {
        Self {
            key: key.into(),
            content: Content::Bytes(RwLock::new(content.into())),
        }
    }

    /// A parsed object whose size is measured once through its JSON form.
    pub fn object<T>(value: T, key: impl Into<Option<CacheKey>>) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        let size = match serde_json::to_vec(&value) {
            Ok(encoded) => Some(encoded.len() as u64),
            Err(error) => {
                warn!(
                    module = SOURCE,
                    type_name = type_name::<T>(),
                    error = %error,
                    "Could not measure cached object size"
                );
                None
            }
        };
        Self::with_object(value, key, size)
    }

    /// An object with no size estimate, for payloads that cannot be serialized.
    pub fn opaque<T>(value: T, key: impl Into<Option<CacheKey>>) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::with_object(value, key, None)
    }

    fn with_object<T>(value: T, key: impl Into<Option<CacheKey>>, size: Option<u64>) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            content: Content::Object {
                value: Arc::new(value),
                type_name: type_name::<T>(),
                size,
            },
        }
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    pub fn is_valid(&self, candidate: &CacheKey) -> bool {
        self.key.as_ref().is_some_and(|key| key.is_valid(candidate))
    }

    /// Byte estimate, `None` when unknown.
    pub fn size(&self) -> Option<u64> {
        match &self.content {
            Content::Bytes(bytes) => Some(lock::read(bytes, SOURCE, "size").len() as u64),
            Content::Object { size, .. } => *size,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self.content {
            Content::Bytes(_) => ValueKind::Bytes,
            Content::Object { .. } => ValueKind::Object,
        }
    }

    /// Current bytes of a byte-backed value.
    pub fn content_bytes(&self) -> Option<Bytes> {
        match &self.content {
            Content::Bytes(bytes) => Some(lock::read(bytes, SOURCE, "content_bytes").clone()),
            Content::Object { .. } => None,
        }
    }

    /// Shared handle to an object payload of type `T`.
    pub fn downcast<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        match &self.content {
            Content::Object { value, .. } => Arc::clone(value).downcast::<T>().ok(),
            Content::Bytes(_) => None,
        }
    }

    pub fn object_type(&self) -> Option<&'static str> {
        match &self.content {
            Content::Object { type_name, .. } => Some(*type_name),
            Content::Bytes(_) => None,
        }
    }

    /// Stream byte content into `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<u64, ValueError> {
        let bytes = self
            .content_bytes()
            .ok_or_else(|| ValueError::unsupported("write_to", self.kind()))?;
        writer.write_all(&bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Replace byte content in place; the producing key is kept.
    pub fn set_content(&self, content: impl Into<Bytes>) -> Result<(), ValueError> {
        match &self.content {
            Content::Bytes(bytes) => {
                *lock::write(bytes, SOURCE, "set_content") = content.into();
                Ok(())
            }
            Content::Object { .. } => Err(ValueError::unsupported("set_content", self.kind())),
        }
    }
}

impl fmt::Debug for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("CacheValue");
        debug.field("key", &self.key).field("kind", &self.kind());
        if let Some(type_name) = self.object_type() {
            debug.field("type_name", &type_name);
        }
        debug.field("size", &self.size()).finish()
    }
}
