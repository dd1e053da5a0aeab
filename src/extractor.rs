use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::info;

use crate::checkpoint::{PendingRow, RowUpdate};
use crate::deadline::bounded_fetch;
use crate::features::{
    self, FeatureVector, FETCH_STATUS, HTML_COLUMNS, PROCESSED_AT, SEMANTIC_COLUMNS, SEMANTIC_STATUS,
};
use crate::fetch::Fetcher;
use crate::semantic::{classify_with_retry, Classifier, RetryPolicy, SemanticStatus};

/// Turns pending rows into complete row updates, one row at a time.
pub struct FeatureExtractor {
    fetcher: Arc<Fetcher>,
    deadline: Duration,
    classifier: Option<Arc<dyn Classifier>>,
    retry: RetryPolicy,
    row_delay: Duration,
}

impl FeatureExtractor {
    pub fn new(fetcher: Fetcher, deadline: Duration) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            deadline,
            classifier: None,
            retry: RetryPolicy { max_attempts: 1, base_backoff: Duration::ZERO },
            row_delay: Duration::ZERO,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>, retry: RetryPolicy) -> Self {
        self.classifier = Some(classifier);
        self.retry = retry;
        self
    }

    /// Pause between rows, to stay polite to hosts and the model API.
    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = delay;
        self
    }

    pub async fn extract_batch(&self, rows: &[PendingRow]) -> Result<Vec<RowUpdate>> {
        // URL features need no I/O.
        let lexical: Vec<FeatureVector> = rows
            .par_iter()
            .map(|row| features::url::extract(&row.url))
            .collect();

        let pb = ProgressBar::new(rows.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} (eta {eta}) {msg}")?
                .progress_chars("=> "),
        );

        let mut updates = Vec::with_capacity(rows.len());
        for (n, (row, lexical)) in rows.iter().zip(lexical).enumerate() {
            pb.set_message(row.url.clone());
            info!("--- row {} ({}/{}): {}", row.index, n + 1, rows.len(), row.url);
            updates.push(self.process_row(row, lexical).await);
            pb.inc(1);
            if n + 1 < rows.len() && !self.row_delay.is_zero() {
                tokio::time::sleep(self.row_delay).await;
            }
        }
        pb.finish_and_clear();
        Ok(updates)
    }

    /// Every column of the schema gets a value, whatever happened to the fetch.
    pub async fn process_row(&self, row: &PendingRow, lexical: FeatureVector) -> RowUpdate {
        let outcome = bounded_fetch(Arc::clone(&self.fetcher), &row.url, self.deadline).await;

        let mut update = RowUpdate::new(row.index);
        update.set(FETCH_STATUS, outcome.status.to_string());
        update.set(PROCESSED_AT, Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        update.extend(&lexical);

        let Some(page) = outcome.page else {
            info!("  fetch status {}, recording defaults", outcome.status);
            update.extend(&FeatureVector::defaults(HTML_COLUMNS));
            update.extend(&FeatureVector::defaults(SEMANTIC_COLUMNS));
            update.set(SEMANTIC_STATUS, SemanticStatus::SkippedFetchError.to_string());
            return update;
        };

        info!("  fetch status {}, {} chars of text", outcome.status, page.text.chars().count());
        update.extend(&features::html::extract(&row.url, &page.html));

        let (semantic, status) = match &self.classifier {
            Some(classifier) => classify_with_retry(classifier.as_ref(), &page.text, &self.retry).await,
            None => (None, SemanticStatus::SkippedDisabled),
        };
        let vector = semantic
            .map(|s| s.to_vector())
            .unwrap_or_else(|| FeatureVector::defaults(SEMANTIC_COLUMNS));
        update.extend(&vector);
        update.set(SEMANTIC_STATUS, status.to_string());
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::schema_columns;
    use crate::fetch::testing::CannedSource;
    use crate::fetch::{FetchOutcome, FetchStatus};
    use crate::semantic::testing::{sample_features, ScriptedClassifier};
    use crate::semantic::ClassifyError;
    use std::sync::atomic::Ordering;

    const PAGE: &str = "<html><head><title>PayPal Login</title></head><body><form><input type='password'></form><p>Verify your account now</p></body></html>";

    fn quick() -> RetryPolicy {
        RetryPolicy { max_attempts: 2, base_backoff: Duration::from_millis(1) }
    }

    fn pending(url: &str) -> PendingRow {
        PendingRow { index: 4, url: url.to_string() }
    }

    fn ok_page() -> FetchOutcome {
        FetchOutcome::from_markup(PAGE.to_string(), FetchStatus::Ok, FetchStatus::OkEmpty)
    }

    #[tokio::test]
    async fn fetched_row_fills_every_column() {
        let classifier = Arc::new(ScriptedClassifier::new(vec![Ok(sample_features())]));
        let extractor = FeatureExtractor::new(Fetcher::new(CannedSource::new(ok_page())), Duration::from_secs(5))
            .with_classifier(classifier.clone(), quick());

        let row = pending("https://paypal-secure.test/login");
        let update = extractor.process_row(&row, features::url::extract(&row.url)).await;

        assert_eq!(update.index, 4);
        assert_eq!(update.get(FETCH_STATUS), Some("OK"));
        assert_eq!(update.get(SEMANTIC_STATUS), Some("OK"));
        assert_eq!(update.get("feature_extracted"), Some("1"));
        assert_eq!(update.get("impersonated_brand"), Some("PayPal"));
        assert!(update.get(PROCESSED_AT).is_some());
        for column in schema_columns() {
            assert!(update.get(column).is_some(), "missing {}", column);
        }
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_records_defaults_and_skips_model() {
        let classifier = Arc::new(ScriptedClassifier::new(vec![Ok(sample_features())]));
        let source = CannedSource::new(FetchOutcome::without_page(FetchStatus::NotFound));
        let extractor = FeatureExtractor::new(Fetcher::new(source), Duration::from_secs(5))
            .with_classifier(classifier.clone(), quick());

        let row = pending("http://gone.test/a");
        let update = extractor.process_row(&row, features::url::extract(&row.url)).await;

        assert_eq!(update.get(FETCH_STATUS), Some("Error_404"));
        assert_eq!(update.get(SEMANTIC_STATUS), Some("Skipped_Due_To_Fetch_Error"));
        assert_eq!(update.get("feature_extracted"), Some("0"));
        assert_eq!(update.get("impersonated_brand"), Some("N/A"));
        assert_eq!(update.get("length_url"), Some("18"));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn classifier_failure_keeps_html_features() {
        let classifier = Arc::new(ScriptedClassifier::new(vec![Err(ClassifyError::RateLimited)]));
        let extractor = FeatureExtractor::new(Fetcher::new(CannedSource::new(ok_page())), Duration::from_secs(5))
            .with_classifier(classifier, quick());

        let row = pending("https://paypal-secure.test/login");
        let update = extractor.process_row(&row, features::url::extract(&row.url)).await;

        assert_eq!(update.get(FETCH_STATUS), Some("OK"));
        assert_eq!(update.get(SEMANTIC_STATUS), Some("Error_429_RateLimit"));
        assert_eq!(update.get("feature_extracted"), Some("1"));
        assert_eq!(update.get("overall_phishing_likelihood_score"), Some("0"));
    }

    #[tokio::test]
    async fn without_classifier_semantic_is_skipped() {
        let extractor = FeatureExtractor::new(Fetcher::new(CannedSource::new(ok_page())), Duration::from_secs(5));
        let update = extractor
            .process_row(&pending("https://a.test/"), features::url::extract("https://a.test/"))
            .await;
        assert_eq!(update.get(SEMANTIC_STATUS), Some("Skipped_Disabled"));
        assert_eq!(update.get("summary_of_intent"), Some("N/A"));
    }

    #[tokio::test]
    async fn batch_keeps_row_order() {
        let extractor = FeatureExtractor::new(Fetcher::new(CannedSource::new(ok_page())), Duration::from_secs(5));
        let rows = vec![
            PendingRow { index: 2, url: "http://b.test/".into() },
            PendingRow { index: 7, url: "http://c.test/".into() },
        ];
        let updates = extractor.extract_batch(&rows).await.unwrap();
        let indices: Vec<usize> = updates.iter().map(|u| u.index).collect();
        assert_eq!(indices, vec![2, 7]);
    }
}
