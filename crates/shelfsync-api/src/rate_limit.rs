use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

/// Fixed-window limiter keyed by (endpoint group, client id)
#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<HashMap<String, RateWindow>>>,
    window: Duration,
    limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointGroup {
    /// Publish, enrich, and rollback: calls that reach external platforms
    Publish,
    /// Catalog import, linking, and auto-match
    Catalog,
}

#[derive(Default)]
struct RateLimitMetrics {
    publish_allowed: AtomicU64,
    publish_limited: AtomicU64,
    catalog_allowed: AtomicU64,
    catalog_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub publish_allowed: u64,
    pub publish_limited: u64,
    pub catalog_allowed: u64,
    pub catalog_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.rate_limit_window, config.mutation_rate_limit_per_window)
    }

    pub fn new(window: Duration, limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window,
            limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, group: EndpointGroup, client_id: &str) -> Result<(), AppError> {
        let key = format!("{}:{client_id}", group.label());
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let entry = guard.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs();
            self.mark(group, false);
            tracing::warn!(
                group = group.label(),
                client = client_fingerprint(client_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                format!("rate limit exceeded for {} endpoints", group.label()),
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.mark(group, true);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            publish_allowed: self.metrics.publish_allowed.load(Ordering::Relaxed),
            publish_limited: self.metrics.publish_limited.load(Ordering::Relaxed),
            catalog_allowed: self.metrics.catalog_allowed.load(Ordering::Relaxed),
            catalog_limited: self.metrics.catalog_limited.load(Ordering::Relaxed),
        }
    }

    fn mark(&self, group: EndpointGroup, allowed: bool) {
        let counter = match (group, allowed) {
            (EndpointGroup::Publish, true) => &self.metrics.publish_allowed,
            (EndpointGroup::Publish, false) => &self.metrics.publish_limited,
            (EndpointGroup::Catalog, true) => &self.metrics.catalog_allowed,
            (EndpointGroup::Catalog, false) => &self.metrics.catalog_limited,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl EndpointGroup {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Catalog => "catalog",
        }
    }
}

fn client_fingerprint(client_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    client_id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_blocks_after_limit() {
        let limiter = EndpointRateLimiter::new(Duration::from_secs(60), 2);

        limiter.check(EndpointGroup::Publish, "client-a").await.unwrap();
        limiter.check(EndpointGroup::Publish, "client-a").await.unwrap();

        let err = limiter
            .check(EndpointGroup::Publish, "client-a")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TooManyRequests(_, secs) if secs <= 60));

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.publish_allowed, 2);
        assert_eq!(metrics.publish_limited, 1);
    }

    #[tokio::test]
    async fn windows_are_per_group_and_client() {
        let limiter = EndpointRateLimiter::new(Duration::from_secs(60), 1);

        limiter.check(EndpointGroup::Publish, "client-a").await.unwrap();
        limiter.check(EndpointGroup::Catalog, "client-a").await.unwrap();
        limiter.check(EndpointGroup::Publish, "client-b").await.unwrap();
        assert!(limiter
            .check(EndpointGroup::Catalog, "client-a")
            .await
            .is_err());

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.catalog_allowed, 1);
        assert_eq!(metrics.catalog_limited, 1);
    }

    #[tokio::test]
    async fn window_resets_after_expiry() {
        let limiter = EndpointRateLimiter::new(Duration::from_millis(20), 1);
        limiter.check(EndpointGroup::Publish, "client-a").await.unwrap();
        assert!(limiter.check(EndpointGroup::Publish, "client-a").await.is_err());

        tokio::time::sleep(Duration::from_millis(30)).await;
        limiter.check(EndpointGroup::Publish, "client-a").await.unwrap();
    }
}
