pub mod file;
pub mod provider;

pub use file::JsonFileSource;
pub use provider::{PredictionSource, SourceBatch};

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rand::Rng;
use tracing::{info, warn};

use crate::error::FusionError;

/// Per-source fetch budget.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    pub timeout: Duration,
    /// Extra attempts after the first failure
    pub retries: u32,
    pub base_backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        FetchPolicy {
            timeout: Duration::from_secs(10),
            retries: 2,
            base_backoff: Duration::from_millis(500),
        }
    }
}

/// Everything one collection cycle produced.
#[derive(Debug, Default)]
pub struct Collection {
    pub batches: Vec<(String, SourceBatch)>,
    /// Sources that timed out or failed; absent data for this cycle
    pub failures: Vec<FusionError>,
}

impl Collection {
    /// All successful batches merged into one.
    pub fn merged(&self) -> SourceBatch {
        let mut all = SourceBatch::default();
        for (_, batch) in &self.batches {
            all.extend(batch.clone());
        }
        all
    }
}

/// Fetch from one source, retrying with doubling, jittered backoff.
async fn fetch_with_retry(
    source: Arc<dyn PredictionSource>,
    date: Option<NaiveDate>,
    policy: FetchPolicy,
) -> Result<SourceBatch, FusionError> {
    let mut backoff = policy.base_backoff;
    let mut attempt = 0u32;
    loop {
        let err = match tokio::time::timeout(policy.timeout, source.fetch(date)).await {
            Ok(Ok(batch)) => return Ok(batch),
            Ok(Err(e)) => FusionError::SourceFailed {
                source_id: source.name().to_string(),
                reason: format!("{:#}", e),
            },
            Err(_) => FusionError::SourceTimeout {
                source_id: source.name().to_string(),
                timeout: policy.timeout,
            },
        };
        if attempt >= policy.retries {
            return Err(err);
        }
        attempt += 1;
        let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
        let wait = backoff + Duration::from_millis(jitter_ms);
        warn!(
            "[{}] attempt {} failed ({}); retrying in {:?}",
            source.name(),
            attempt,
            err,
            wait
        );
        tokio::time::sleep(wait).await;
        backoff = (backoff * 2).min(Duration::from_secs(30));
    }
}

/// Polls all sources concurrently, each with its own timeout and retry
/// budget. A failing source never fails the cycle.
pub async fn collect_batches(
    sources: &[Arc<dyn PredictionSource>],
    date: Option<NaiveDate>,
    policy: FetchPolicy,
) -> Collection {
    let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
    info!("Collecting from {} sources: {:?}", sources.len(), names);

    let futures: Vec<_> = sources
        .iter()
        .map(|s| {
            let s = Arc::clone(s);
            async move {
                let name = s.name().to_string();
                (name, fetch_with_retry(s, date, policy).await)
            }
        })
        .collect();

    let mut collection = Collection::default();
    for (name, result) in futures_util::future::join_all(futures).await {
        match result {
            Ok(batch) => {
                info!("[{}] {} records", name, batch.len());
                collection.batches.push((name, batch));
            }
            Err(e) => {
                warn!("Source '{}' unavailable this cycle: {}", name, e);
                collection.failures.push(e);
            }
        }
    }
    collection
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl PredictionSource for Flaky {
        async fn fetch(&self, _date: Option<NaiveDate>) -> anyhow::Result<SourceBatch> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("503 from upstream");
            }
            Ok(SourceBatch::default())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    struct Hanging;

    #[async_trait]
    impl PredictionSource for Hanging {
        async fn fetch(&self, _date: Option<NaiveDate>) -> anyhow::Result<SourceBatch> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(SourceBatch::default())
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    fn quick(retries: u32) -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_millis(50),
            retries,
            base_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let sources: Vec<Arc<dyn PredictionSource>> = vec![Arc::new(Flaky {
            failures_left: AtomicU32::new(2),
        })];
        let out = collect_batches(&sources, None, quick(2)).await;
        assert_eq!(out.batches.len(), 1);
        assert!(out.failures.is_empty());
    }

    #[tokio::test]
    async fn failing_and_hanging_sources_degrade_not_abort() {
        let sources: Vec<Arc<dyn PredictionSource>> = vec![
            Arc::new(Flaky {
                failures_left: AtomicU32::new(5),
            }),
            Arc::new(Hanging),
            Arc::new(Flaky {
                failures_left: AtomicU32::new(0),
            }),
        ];
        let out = collect_batches(&sources, None, quick(1)).await;
        assert_eq!(out.batches.len(), 1);
        assert_eq!(out.failures.len(), 2);
        assert!(out.failures.iter().all(|e| e.is_source_failure()));
        assert!(out
            .failures
            .iter()
            .any(|e| matches!(e, FusionError::SourceTimeout { .. })));
    }
}
