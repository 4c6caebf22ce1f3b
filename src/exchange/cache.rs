use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{RateSource, RateTable};
use crate::error::AppResult;

/// Rate table with its fetch time
#[derive(Debug, Clone)]
struct CachedRates {
    rates: Arc<RateTable>,
    fetched_at: Instant,
}

/// Process-wide exchange rate cache with a TTL.
///
/// One caller refreshes at a time. While a refresh is running, or after it
/// failed, callers get the previous table if there is one.
pub struct RateCache {
    source: Arc<dyn RateSource>,
    ttl: Duration,
    current: RwLock<Option<CachedRates>>,
    refresh: Mutex<()>,
}

impl RateCache {
    pub fn new(source: Arc<dyn RateSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    fn fresh(&self) -> Option<Arc<RateTable>> {
        self.current
            .read()
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.ttl)
            .map(|c| c.rates.clone())
    }

    fn stale(&self) -> Option<Arc<RateTable>> {
        self.current.read().as_ref().map(|c| c.rates.clone())
    }

    /// Full rate table, refreshed from the source once the TTL has passed.
    pub async fn rates(&self) -> AppResult<Arc<RateTable>> {
        if let Some(rates) = self.fresh() {
            debug!("✓ Rate cache hit");
            return Ok(rates);
        }

        let _guard = match self.refresh.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                if let Some(rates) = self.stale() {
                    debug!("⚠ Rate refresh in progress, serving stale table");
                    return Ok(rates);
                }
                self.refresh.lock().await
            }
        };

        // Another caller may have refreshed while we waited
        if let Some(rates) = self.fresh() {
            return Ok(rates);
        }

        match self.source.fetch_rates().await {
            Ok(table) => {
                let rates = Arc::new(table);
                *self.current.write() = Some(CachedRates {
                    rates: rates.clone(),
                    fetched_at: Instant::now(),
                });
                info!("💱 Exchange rates refreshed ({} currencies)", rates.len());
                Ok(rates)
            }
            Err(e) => match self.stale() {
                Some(rates) => {
                    warn!("⚠️  Exchange rate refresh failed, serving stale table: {}", e);
                    Ok(rates)
                }
                None => Err(e),
            },
        }
    }

    /// CNY per unit of `currency`, `None` when unknown or unavailable.
    pub async fn get(&self, currency: &str) -> Option<f64> {
        match self.rates().await {
            Ok(rates) => rates.get(&currency.to_uppercase()).copied(),
            Err(e) => {
                warn!("⚠️  Exchange rates unavailable: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    impl CountingSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateSource for CountingSource {
        async fn fetch_rates(&self) -> AppResult<RateTable> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::ExternalError("upstream down".to_string()));
            }
            Ok(RateTable::from([
                ("CNY".to_string(), 1.0),
                ("PHP".to_string(), 0.1 * n as f64),
            ]))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_is_reused_within_ttl() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = RateCache::new(source.clone(), Duration::from_secs(600));

        assert_eq!(cache.get("php").await, Some(0.1));
        tokio::time::advance(Duration::from_secs(599)).await;
        assert_eq!(cache.get("PHP").await, Some(0.1));
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("PHP").await, Some(0.2));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_serves_stale_table() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = RateCache::new(source.clone(), Duration::from_secs(600));
        assert_eq!(cache.get("PHP").await, Some(0.1));

        source.fail.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(cache.get("PHP").await, Some(0.1));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_table_is_an_error() {
        let source = CountingSource::new(Duration::ZERO);
        source.fail.store(true, Ordering::SeqCst);
        let cache = RateCache::new(source, Duration::from_secs(600));

        assert!(cache.rates().await.is_err());
        assert_eq!(cache.get("PHP").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_serves_stale_to_other_callers() {
        let source = CountingSource::new(Duration::from_secs(5));
        let cache = Arc::new(RateCache::new(source.clone(), Duration::from_secs(600)));
        assert_eq!(cache.get("PHP").await, Some(0.1));

        tokio::time::advance(Duration::from_secs(601)).await;

        let refresher = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("PHP").await })
        };
        // Let the spawned task take the refresh lock and start sleeping
        tokio::task::yield_now().await;

        assert_eq!(cache.get("PHP").await, Some(0.1));
        assert_eq!(refresher.await.unwrap(), Some(0.2));
        assert_eq!(source.calls(), 2);
    }
}
