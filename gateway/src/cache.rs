// Response cache keyed by request fingerprint. Entries outlive their TTL by a
// configurable retention so that expired payloads remain available for ETag
// revalidation and for serve-stale fallback while the upstream is down.
use crate::metrics_defs::{CACHE_HIT, CACHE_MISS};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::sync::Cache;
use shared::counter;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single query parameter value as it participates in a cache key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
}

impl ParamValue {
    /// Rendering used both on the wire and in cache keys. Lists are joined
    /// with `,` in their given order.
    pub fn render(&self) -> String {
        match self {
            ParamValue::Str(s) => s.clone(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::List(values) => values.join(","),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Int(i) => serde_json::Value::from(*i),
            ParamValue::Bool(b) => serde_json::Value::from(*b),
            ParamValue::Str(_) | ParamValue::List(_) => serde_json::Value::from(self.render()),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(values: Vec<String>) -> Self {
        ParamValue::List(values)
    }
}

/// Builds a deterministic cache key: `prefix:{"a":..,"b":..}` with the
/// parameters sorted by name. If a name repeats, the last value wins.
pub fn generate_key<'a, I>(prefix: &str, params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a ParamValue)>,
{
    let sorted: BTreeMap<&str, serde_json::Value> = params
        .into_iter()
        .map(|(name, value)| (name, value.to_json()))
        .collect();

    let object: serde_json::Map<String, serde_json::Value> = sorted
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

    format!("{prefix}:{}", serde_json::Value::Object(object))
}

#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Bytes,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub etag: Option<String>,
}

impl CacheEntry {
    pub fn new(key: &str, value: Bytes, ttl: Duration, etag: Option<String>) -> Self {
        CacheEntry {
            key: key.to_string(),
            value,
            created_at: Utc::now(),
            ttl,
            etag,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now < self.created_at + ttl,
            // A TTL too large to represent never expires
            Err(_) => true,
        }
    }
}

/// Key/value store behind the gateway. Implementations are best-effort:
/// they may drop entries early, but `get` must never hand out an entry past
/// its TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the entry only while it is fresh.
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.get_stale(key).await.filter(CacheEntry::is_fresh);
        let metric_def = if entry.is_some() { CACHE_HIT } else { CACHE_MISS };
        counter!(metric_def).increment(1);
        entry
    }

    /// Returns the entry regardless of freshness. Callers use this only with
    /// explicit fallback or revalidation intent.
    async fn get_stale(&self, key: &str) -> Option<CacheEntry>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration, etag: Option<String>);

    async fn delete(&self, key: &str);
}

/// Keeps every entry for its own TTL plus the configured stale retention.
struct RetainPastTtl {
    retention: Duration,
}

impl Expiry<String, Arc<CacheEntry>> for RetainPastTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl.saturating_add(self.retention))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl.saturating_add(self.retention))
    }
}

/// In-process store backed by a bounded moka cache.
pub struct MemoryCacheStore {
    cache: Cache<String, Arc<CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new(max_entries: u64, stale_retention: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(RetainPastTtl {
                retention: stale_retention,
            })
            .build();

        MemoryCacheStore { cache }
    }

    /// Stores a prebuilt entry as is, keeping its `created_at`.
    pub fn insert_entry(&self, entry: CacheEntry) {
        self.cache.insert(entry.key.clone(), Arc::new(entry));
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get_stale(&self, key: &str) -> Option<CacheEntry> {
        self.cache.get(key).map(|entry| (*entry).clone())
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration, etag: Option<String>) {
        self.insert_entry(CacheEntry::new(key, value, ttl, etag));
    }

    async fn delete(&self, key: &str) {
        self.cache.invalidate(key);
    }
}
