//! Two-tier, content-addressed summary cache (spec.md §4.3).
//!
//! Memory tier is an in-process map guarded by a mutex. Disk tier is one JSON
//! file per key under `cache_dir`. A hit requires the entry be fresher than
//! its caller-supplied TTL; a stale or corrupt entry is deleted and treated
//! as a miss.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One cached summary plus the metadata it was produced with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub summary: String,
    /// Unix seconds, stored as a float to match the on-disk contract.
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        let now = now_unix_secs();
        now - self.timestamp < ttl.as_secs_f64()
    }
}

fn now_unix_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Aggregate counts returned by [`SummaryCache::stats`].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub disk_entries: usize,
    pub disk_bytes: u64,
}

/// Compute the content-addressed cache key (spec.md §4.3, bit-exact).
///
/// `SHA-256(UTF-8(canonical-JSON({content_hash, provider, model, operation,
/// language, function_name?})))`, where `content_hash` is itself
/// `SHA-256(UTF-8(content))` as a lowercase hex digest, and canonical JSON
/// means lexicographically sorted keys with no insignificant whitespace —
/// `serde_json`'s default map ordering for a `BTreeMap` gives us this for
/// free, so we build the envelope with one instead of relying on insertion
/// order.
pub fn compute_key(
    content: &str,
    provider: &str,
    model: &str,
    operation: &str,
    language: &str,
    function_name: Option<&str>,
) -> String {
    let content_hash = hex::encode(Sha256::digest(content.as_bytes()));

    let mut envelope = std::collections::BTreeMap::new();
    envelope.insert("content_hash", content_hash.as_str());
    envelope.insert("provider", provider);
    envelope.insert("model", model);
    envelope.insert("operation", operation);
    envelope.insert("language", language);
    if let Some(name) = function_name {
        envelope.insert("function_name", name);
    }

    let canonical =
        serde_json::to_string(&envelope).expect("BTreeMap<&str, &str> always serializes");
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// The summary cache itself.
pub struct SummaryCache {
    cache_dir: PathBuf,
    memory: Mutex<HashMap<String, CacheEntry>>,
}

impl SummaryCache {
    /// Open (without requiring it to exist yet) a cache rooted at
    /// `cache_dir`. Directory creation is deferred to the first disk write.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            memory: Mutex::new(HashMap::new()),
        }
    }

    /// Default location: `{system_tmp}/codeconcat_ai_cache/`.
    pub fn default_location() -> Self {
        Self::new(std::env::temp_dir().join("codeconcat_ai_cache"))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.json"))
    }

    /// Look up `key`, consulting memory first and falling back to disk.
    /// Stale or corrupt entries are deleted and treated as a miss.
    pub async fn get(&self, key: &str, ttl: Duration) -> Option<CacheEntry> {
        if let Some(entry) = self.memory_get(key, ttl) {
            return Some(entry);
        }

        let path = self.entry_path(key);
        let bytes = tokio::fs::read(&path).await.ok()?;
        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(e) => e,
            Err(_) => {
                let _ = tokio::fs::remove_file(&path).await;
                return None;
            }
        };

        if !entry.is_fresh(ttl) {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }

        self.memory.lock().unwrap().insert(key.to_string(), entry.clone());
        Some(entry)
    }

    fn memory_get(&self, key: &str, ttl: Duration) -> Option<CacheEntry> {
        let mut guard = self.memory.lock().unwrap();
        match guard.get(key) {
            Some(entry) if entry.is_fresh(ttl) => Some(entry.clone()),
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    /// Write `summary` under `key`. The memory write always succeeds; the
    /// disk write is best-effort — an I/O error is swallowed, leaving the
    /// cache correct but less durable (spec.md §4.3).
    pub async fn set(&self, key: &str, summary: &str, metadata: serde_json::Value) {
        let entry = CacheEntry {
            summary: summary.to_string(),
            timestamp: now_unix_secs(),
            metadata,
        };

        self.memory.lock().unwrap().insert(key.to_string(), entry.clone());

        if let Ok(bytes) = serde_json::to_vec(&entry) {
            if tokio::fs::create_dir_all(&self.cache_dir).await.is_ok() {
                let path = self.entry_path(key);
                if let Err(e) = tokio::fs::write(&path, &bytes).await {
                    tracing::warn!(error = %e, path = %path.display(), "cache disk write failed, continuing without persistence");
                }
            }
        }
    }

    /// Empty the memory tier and unlink every `*.json` file in `cache_dir`.
    pub async fn clear(&self) {
        self.memory.lock().unwrap().clear();
        clear_json_files(&self.cache_dir, |_| true).await;
    }

    /// Sweep both tiers, deleting entries older than `ttl`.
    pub async fn clear_expired(&self, ttl: Duration) {
        {
            let mut guard = self.memory.lock().unwrap();
            guard.retain(|_, entry| entry.is_fresh(ttl));
        }
        clear_json_files(&self.cache_dir, |entry| !entry.is_fresh(ttl)).await;
    }

    /// Entry counts and total bytes on disk.
    pub async fn stats(&self) -> CacheStats {
        let memory_entries = self.memory.lock().unwrap().len();
        let mut disk_entries = 0usize;
        let mut disk_bytes = 0u64;

        if let Ok(mut dir) = tokio::fs::read_dir(&self.cache_dir).await {
            while let Ok(Some(entry)) = dir.next_entry().await {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("json")
                    && let Ok(meta) = entry.metadata().await
                {
                    disk_entries += 1;
                    disk_bytes += meta.len();
                }
            }
        }

        CacheStats {
            memory_entries,
            disk_entries,
            disk_bytes,
        }
    }
}

async fn clear_json_files(dir: &Path, should_delete: impl Fn(&CacheEntry) -> bool) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let delete = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) => should_delete(&entry),
                Err(_) => true,
            },
            Err(_) => true,
        };
        if delete {
            let _ = tokio::fs::remove_file(&path).await;
        }
    }
}
