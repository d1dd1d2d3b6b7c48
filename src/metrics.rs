//! Request/response metrics collection.
//!
//! Tracks:
//! - Request counts (total, success, failed) per provider/model
//! - Token usage (prompt, completion, total) per provider/model
//! - Latency
//! - Cost estimates per provider/model

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Metrics snapshot for a time window.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsSnapshot {
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub requests_total: u64,
    pub requests_failed: u64,
    pub prompt_tokens_total: u64,
    pub completion_tokens_total: u64,
    pub latency_avg_ms: u64,
    pub cost_total: f64,
}

/// Metrics breakdown by provider and model.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderMetrics {
    pub provider_id: String,
    pub model_id: Option<String>,
    pub requests_total: u64,
    pub requests_failed: u64,
    pub prompt_tokens_total: u64,
    pub completion_tokens_total: u64,
    pub cost_total: f64,
}

/// Aggregated metrics collector.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    requests_total: AtomicU64,
    requests_success: AtomicU64,
    requests_failed: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    cost_total: AtomicU64, // Stored as cents * 100 for precision

    // Per-provider/model breakdown. `Arc` so `entry_for` can hand callers a
    // handle to the same atomics stored in the map instead of a detached copy.
    provider_metrics: RwLock<HashMap<String, std::sync::Arc<ProviderMetricsInner>>>,
}

#[derive(Debug, Default)]
struct ProviderMetricsInner {
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    cost_total: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing a request against `provider`/`model`. Shorthand for
    /// [`RequestTimer::with_breakdown`], used by the provider summarization
    /// pre-flight (`providers::summarize_common`).
    pub fn start_request<'a>(&'a self, provider: &str, model: &str) -> RequestTimer<'a> {
        RequestTimer::with_breakdown(self, provider, model)
    }

    /// Record a successful request.
    pub fn record_success(
        &self,
        prompt_tokens: u32,
        completion_tokens: u32,
        latency: Duration,
        cost_cents: f64,
    ) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_success.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens
            .fetch_add(prompt_tokens as u64, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(completion_tokens as u64, Ordering::Relaxed);
        self.latency_sum_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        // Store cost as integer cents * 100
        let cost_int = (cost_cents * 100.0) as u64;
        self.cost_total.fetch_add(cost_int, Ordering::Relaxed);
    }

    /// Record a successful request with provider/model breakdown.
    pub fn record_success_with_breakdown(
        &self,
        provider_id: &str,
        model_id: Option<&str>,
        prompt_tokens: u32,
        completion_tokens: u32,
        latency: Duration,
        cost_cents: f64,
    ) {
        // Record global metrics
        self.record_success(prompt_tokens, completion_tokens, latency, cost_cents);

        // Record per-provider breakdown, mutating the entry already stored
        // in the map rather than a clone — a clone's atomics are a separate
        // allocation, so incrementing it and discarding it (as happens
        // whenever the key already exists) would silently drop every update
        // after the first.
        let key = format!("{}:{}", provider_id, model_id.unwrap_or(""));
        let metrics = self.entry_for(key);

        metrics.requests_total.fetch_add(1, Ordering::Relaxed);
        metrics
            .prompt_tokens
            .fetch_add(prompt_tokens as u64, Ordering::Relaxed);
        metrics
            .completion_tokens
            .fetch_add(completion_tokens as u64, Ordering::Relaxed);
        let cost_int = (cost_cents * 100.0) as u64;
        metrics.cost_total.fetch_add(cost_int, Ordering::Relaxed);
    }

    /// Get-or-insert the per-key counters, returning an `Arc` to the entry
    /// actually stored in the map so the caller's subsequent `fetch_add`s
    /// land on the shared atomics rather than a short-lived copy.
    fn entry_for(&self, key: String) -> std::sync::Arc<ProviderMetricsInner> {
        if let Some(existing) = self.provider_metrics.read().unwrap().get(&key) {
            return existing.clone();
        }
        let mut lock = self.provider_metrics.write().unwrap();
        lock.entry(key).or_default().clone()
    }

    /// Record a failed request.
    pub fn record_failure(&self, latency: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed request with provider breakdown.
    pub fn record_failure_with_breakdown(
        &self,
        provider_id: &str,
        model_id: Option<&str>,
        latency: Duration,
    ) {
        // Record global metrics
        self.record_failure(latency);

        // Record per-provider breakdown
        let key = format!("{}:{}", provider_id, model_id.unwrap_or(""));
        let metrics = self.entry_for(key);

        metrics.requests_total.fetch_add(1, Ordering::Relaxed);
        metrics.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self, window_start_ms: u64, window_end_ms: u64) -> MetricsSnapshot {
        let requests_total = self.requests_total.load(Ordering::Relaxed);
        let requests_failed = self.requests_failed.load(Ordering::Relaxed);
        let prompt_tokens = self.prompt_tokens.load(Ordering::Relaxed);
        let completion_tokens = self.completion_tokens.load(Ordering::Relaxed);
        let latency_sum = self.latency_sum_ms.load(Ordering::Relaxed);
        let latency_count = self.latency_count.load(Ordering::Relaxed);
        let cost_int = self.cost_total.load(Ordering::Relaxed);

        let latency_avg_ms = if latency_count > 0 {
            latency_sum / latency_count
        } else {
            0
        };

        MetricsSnapshot {
            window_start_ms,
            window_end_ms,
            requests_total,
            requests_failed,
            prompt_tokens_total: prompt_tokens,
            completion_tokens_total: completion_tokens,
            latency_avg_ms,
            cost_total: (cost_int as f64) / 100.0,
        }
    }

    /// Get metrics breakdown by provider.
    pub fn get_provider_metrics(&self) -> Vec<ProviderMetrics> {
        self.provider_metrics
            .read()
            .unwrap()
            .iter()
            .map(|(key, metrics)| {
                let parts: Vec<&str> = key.split(':').collect();
                let provider_id = parts.first().unwrap_or(&"").to_string();
                let model_id = parts
                    .get(1)
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string());

                ProviderMetrics {
                    provider_id,
                    model_id,
                    requests_total: metrics.requests_total.load(Ordering::Relaxed),
                    requests_failed: metrics.requests_failed.load(Ordering::Relaxed),
                    prompt_tokens_total: metrics.prompt_tokens.load(Ordering::Relaxed),
                    completion_tokens_total: metrics.completion_tokens.load(Ordering::Relaxed),
                    cost_total: (metrics.cost_total.load(Ordering::Relaxed) as f64) / 100.0,
                }
            })
            .collect()
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.requests_total.store(0, Ordering::Relaxed);
        self.requests_success.store(0, Ordering::Relaxed);
        self.requests_failed.store(0, Ordering::Relaxed);
        self.prompt_tokens.store(0, Ordering::Relaxed);
        self.completion_tokens.store(0, Ordering::Relaxed);
        self.latency_sum_ms.store(0, Ordering::Relaxed);
        self.latency_count.store(0, Ordering::Relaxed);
        self.cost_total.store(0, Ordering::Relaxed);
        self.provider_metrics.write().unwrap().clear();
    }
}

/// RAII guard for timing requests.
pub struct RequestTimer<'a> {
    start: Instant,
    collector: &'a MetricsCollector,
    breakdown: Option<(String, Option<String>)>,
    recorded: bool,
}

impl<'a> RequestTimer<'a> {
    /// Start a new request timer.
    pub fn new(collector: &'a MetricsCollector) -> Self {
        Self {
            start: Instant::now(),
            collector,
            breakdown: None,
            recorded: false,
        }
    }

    /// Start a new request timer with a provider/model breakdown key. Alias
    /// used by the provider summarization pre-flight, where "starting a
    /// request" always means tracking it against a specific provider/model.
    pub fn with_breakdown(collector: &'a MetricsCollector, provider: &str, model: &str) -> Self {
        Self {
            start: Instant::now(),
            collector,
            breakdown: Some((provider.to_string(), Some(model.to_string()))),
            recorded: false,
        }
    }

    /// Record success and stop timing.
    pub fn success(mut self, prompt_tokens: u32, completion_tokens: u32, cost_cents: f64) {
        let latency = self.start.elapsed();
        match &self.breakdown {
            Some((provider, model)) => self.collector.record_success_with_breakdown(
                provider,
                model.as_deref(),
                prompt_tokens,
                completion_tokens,
                latency,
                cost_cents,
            ),
            None => self
                .collector
                .record_success(prompt_tokens, completion_tokens, latency, cost_cents),
        }
        self.recorded = true;
    }

    /// Record failure and stop timing.
    pub fn failure(mut self) {
        let latency = self.start.elapsed();
        match &self.breakdown {
            Some((provider, model)) => self
                .collector
                .record_failure_with_breakdown(provider, model.as_deref(), latency),
            None => self.collector.record_failure(latency),
        }
        self.recorded = true;
    }
}

impl<'a> Drop for RequestTimer<'a> {
    fn drop(&mut self) {
        // If not explicitly recorded, record as failure
        if !self.recorded {
            let latency = self.start.elapsed();
            match &self.breakdown {
                Some((provider, model)) => self.collector.record_failure_with_breakdown(
                    provider,
                    model.as_deref(),
                    latency,
                ),
                None => self.collector.record_failure(latency),
            }
        }
    }
}

// Global metrics collector - use LazyLock for HashMap initialization
static COLLECTOR: LazyLock<MetricsCollector> = LazyLock::new(|| MetricsCollector {
    requests_total: AtomicU64::new(0),
    requests_success: AtomicU64::new(0),
    requests_failed: AtomicU64::new(0),
    prompt_tokens: AtomicU64::new(0),
    completion_tokens: AtomicU64::new(0),
    latency_sum_ms: AtomicU64::new(0),
    latency_count: AtomicU64::new(0),
    cost_total: AtomicU64::new(0),
    provider_metrics: RwLock::new(HashMap::new()),
});

/// Get the global metrics collector.
pub fn global_collector() -> &'static MetricsCollector {
    &COLLECTOR
}

/// Start timing a request.
pub fn start_request_timer() -> RequestTimer<'static> {
    RequestTimer::new(global_collector())
}

/// Get current metrics snapshot.
pub fn get_snapshot() -> MetricsSnapshot {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    global_collector().snapshot(0, now.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector() {
        let collector = MetricsCollector::new();

        collector.record_success(100, 50, Duration::from_millis(200), 0.05);
        collector.record_success(200, 100, Duration::from_millis(300), 0.10);
        collector.record_failure(Duration::from_millis(50));

        let snapshot = collector.snapshot(0, 1000);

        assert_eq!(snapshot.requests_total, 3);
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.prompt_tokens_total, 300);
        assert_eq!(snapshot.completion_tokens_total, 150);
        assert!((snapshot.cost_total - 0.15).abs() < 0.01);
    }

    #[test]
    fn per_provider_breakdown_accumulates_across_repeated_keys() {
        let collector = MetricsCollector::new();

        collector.record_success_with_breakdown(
            "openai",
            Some("gpt-4o-mini"),
            100,
            50,
            Duration::from_millis(10),
            1.0,
        );
        collector.record_success_with_breakdown(
            "openai",
            Some("gpt-4o-mini"),
            200,
            75,
            Duration::from_millis(10),
            1.0,
        );
        collector.record_failure_with_breakdown(
            "openai",
            Some("gpt-4o-mini"),
            Duration::from_millis(10),
        );

        let breakdown = collector.get_provider_metrics();
        assert_eq!(breakdown.len(), 1);
        let entry = &breakdown[0];
        assert_eq!(entry.provider_id, "openai");
        assert_eq!(entry.model_id.as_deref(), Some("gpt-4o-mini"));
        // Regression: a prior version discarded every update after the
        // first because it mutated a detached clone of the map entry.
        assert_eq!(entry.requests_total, 3);
        assert_eq!(entry.requests_failed, 1);
        assert_eq!(entry.prompt_tokens_total, 300);
        assert_eq!(entry.completion_tokens_total, 125);
        assert!((entry.cost_total - 2.0).abs() < 0.01);
    }
}
