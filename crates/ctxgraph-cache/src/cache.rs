use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ctxgraph_core::{CtxGraphError, Language, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const KEY_PREFIX: &str = "ast";
const OPTIONS_HASH_LEN: usize = 16;
const CONTENT_HASH_LEN: usize = 64;

/// Hex sha256 of raw file content.
pub fn content_hash(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// Builder options that influence a parsed artifact. Backed by an ordered
/// map, so the resulting hash does not depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    options: BTreeMap<String, String>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.options.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Short hex digest of the canonical `key=value` lines, or an empty
    /// string when no options are set.
    pub fn options_hash(&self) -> String {
        if self.options.is_empty() {
            return String::new();
        }
        let mut hasher = Sha256::new();
        for (key, value) in &self.options {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        let digest = format!("{:x}", hasher.finalize());
        digest[..OPTIONS_HASH_LEN].to_string()
    }
}

/// Deterministic identity of a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub file_path: String,
    pub language: Language,
    pub content_hash: String,
    /// Empty when the artifact was built with default options.
    pub options_hash: String,
}

impl CacheKey {
    pub fn new(
        file_path: impl Into<String>,
        language: Language,
        content_hash: impl Into<String>,
        options_hash: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            language,
            content_hash: content_hash.into(),
            options_hash: options_hash.into(),
        }
    }

    pub fn for_content(
        file_path: impl Into<String>,
        language: Language,
        content: &[u8],
        options: &BuildOptions,
    ) -> Self {
        Self::new(
            file_path,
            language,
            content_hash(content),
            options.options_hash(),
        )
    }

    /// sha256 over all four fields.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.file_path.as_str(),
            self.language.as_str(),
            self.content_hash.as_str(),
            self.options_hash.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            KEY_PREFIX, self.file_path, self.language, self.content_hash
        )?;
        if !self.options_hash.is_empty() {
            write!(f, ":{}", self.options_hash)?;
        }
        Ok(())
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn malformed_key(s: &str) -> CtxGraphError {
    CtxGraphError::Invalidation(format!("malformed cache key '{}'", s))
}

impl FromStr for CacheKey {
    type Err = CtxGraphError;

    /// Parses right-to-left so file paths may contain `:`. A trailing
    /// 16-digit hex segment is read as the options hash only when it follows
    /// a full sha256 content hash.
    fn from_str(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix(KEY_PREFIX)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| malformed_key(s))?;

        let parts: Vec<&str> = body.rsplitn(4, ':').collect();
        let with_options = parts.len() == 4
            && parts[0].len() == OPTIONS_HASH_LEN
            && is_hex(parts[0])
            && parts[1].len() == CONTENT_HASH_LEN
            && is_hex(parts[1]);

        let (path, language, hash, options) = if with_options {
            (parts[3], parts[2], parts[1], parts[0])
        } else {
            let parts: Vec<&str> = body.rsplitn(3, ':').collect();
            if parts.len() != 3 {
                return Err(malformed_key(s));
            }
            (parts[2], parts[1], parts[0], "")
        };

        if path.is_empty() || hash.is_empty() {
            return Err(malformed_key(s));
        }
        let language = Language::from_str(language).map_err(|_| malformed_key(s))?;
        Ok(Self::new(path, language, hash, options))
    }
}

/// Opaque parsed representation of a file plus what it depends on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub data: Bytes,
    pub dependencies: Vec<String>,
    /// Invalidation epoch the dependency list was computed against.
    pub dependency_epoch: u64,
}

impl Artifact {
    pub fn new(data: impl Into<Bytes>, dependencies: Vec<String>, dependency_epoch: u64) -> Self {
        Self {
            data: data.into(),
            dependencies,
            dependency_epoch,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len() + self.dependencies.iter().map(String::len).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub artifact: Artifact,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub relevance_score: f64,
    /// Set when a physical delete failed; a stale entry is never served.
    pub stale: bool,
}

impl CacheEntry {
    pub fn new(key: CacheKey, artifact: Artifact) -> Self {
        let now = Utc::now();
        Self {
            key,
            artifact,
            created_at: now,
            last_accessed: now,
            relevance_score: 0.0,
            stale: false,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.artifact.size_bytes()
    }

    pub fn dependency_epoch(&self) -> u64 {
        self.artifact.dependency_epoch
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }
}

/// Cache performance statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size_bytes: usize,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

/// Key/value store for parsed artifacts. Writes are atomic per key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fresh entry for `key`, if any. Stale entries count as a miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Insert or atomically replace the entry for `key`.
    async fn put(&self, key: CacheKey, artifact: Artifact) -> Result<()>;

    /// Returns `false` when the key was absent.
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    async fn keys_matching(
        &self,
        predicate: &(dyn for<'k> Fn(&'k CacheKey) -> bool + Send + Sync),
    ) -> Result<Vec<CacheKey>>;

    async fn update_score(&self, key: &CacheKey, score: f64) -> Result<bool>;

    /// In-memory fallback used when a delete keeps failing. Returns whether
    /// an entry was marked.
    fn mark_stale(&self, key: &CacheKey) -> bool;

    async fn stats(&self) -> CacheStats;
}
