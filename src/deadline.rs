use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::fetch::{FetchOutcome, FetchStatus, Fetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("deadline of {0:?} exceeded")]
    Deadline(Duration),
    #[error("task panicked")]
    Panicked,
}

/// Runs `task` on its own tokio task and waits at most `limit` for it.
/// On expiry the task is aborted and the caller gets control back right away.
pub async fn run_with_deadline<T, F>(limit: Duration, task: F) -> Result<T, Interrupted>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(task);
    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(Interrupted::Panicked),
        Err(_) => {
            handle.abort();
            Err(Interrupted::Deadline(limit))
        }
    }
}

/// One row's fetch under a hard deadline. Never fails: an expired deadline
/// becomes `Error_Connect`, anything unexpected becomes `Error_Unknown`.
pub async fn bounded_fetch(fetcher: Arc<Fetcher>, url: &str, limit: Duration) -> FetchOutcome {
    let target = url.to_string();
    let task = async move { fetcher.fetch(&target).await };
    match run_with_deadline(limit, task).await {
        Ok(outcome) => outcome,
        Err(Interrupted::Deadline(_)) => {
            warn!("  {} exceeded {:?}, moving on", url, limit);
            FetchOutcome::without_page(FetchStatus::Timeout)
        }
        Err(Interrupted::Panicked) => {
            warn!("  fetch of {} failed unexpectedly", url);
            FetchOutcome::without_page(FetchStatus::Unknown)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::CannedSource;
    use crate::fetch::StaticSource;
    use async_trait::async_trait;
    use std::time::Instant;

    struct Hanging;

    #[async_trait]
    impl StaticSource for Hanging {
        async fn get(&self, _url: &str) -> FetchOutcome {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            FetchOutcome::without_page(FetchStatus::Ok)
        }
    }

    struct Exploding;

    #[async_trait]
    impl StaticSource for Exploding {
        async fn get(&self, url: &str) -> FetchOutcome {
            panic!("parser blew up on {}", url);
        }
    }

    #[tokio::test]
    async fn finishes_within_deadline() {
        let result = run_with_deadline(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn expired_deadline_returns_promptly() {
        let start = Instant::now();
        let result = run_with_deadline(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
        .await;
        assert_eq!(result, Err(Interrupted::Deadline(Duration::from_millis(50))));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn hung_fetch_is_connect_error() {
        let fetcher = Arc::new(Fetcher::new(Hanging));
        let outcome = bounded_fetch(fetcher, "http://slow.test/", Duration::from_millis(50)).await;
        assert_eq!(outcome.status.to_string(), "Error_Connect");
        assert!(outcome.page.is_none());
    }

    #[tokio::test]
    async fn panicking_fetch_is_unknown_error() {
        let fetcher = Arc::new(Fetcher::new(Exploding));
        let outcome = bounded_fetch(fetcher, "http://boom.test/", Duration::from_secs(5)).await;
        assert_eq!(outcome.status, FetchStatus::Unknown);
    }

    #[tokio::test]
    async fn passes_outcome_through() {
        let canned = FetchOutcome::without_page(FetchStatus::NotFound);
        let fetcher = Arc::new(Fetcher::new(CannedSource::new(canned.clone())));
        let outcome = bounded_fetch(fetcher, "http://gone.test/", Duration::from_secs(5)).await;
        assert_eq!(outcome, canned);
    }
}
