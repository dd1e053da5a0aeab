use anyhow::Result;
use itertools::Itertools;
use tracing::info;

use crate::checkpoint::{CheckpointStore, RunContext};
use crate::dataset::Dataset;
use crate::extractor::FeatureExtractor;
use crate::features::{FETCH_STATUS, SEMANTIC_STATUS};

/// Progress of a dataset after a run, or as a standalone snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub total_rows: usize,
    pub processed_now: usize,
    pub processed_total: usize,
    pub remaining: usize,
    pub original_columns: usize,
    pub added_columns: usize,
    /// Non-OK fetch statuses, most frequent first.
    pub fetch_failures: Vec<(String, usize)>,
    pub semantic_failures: Vec<(String, usize)>,
}

impl BatchReport {
    pub fn summarize(dataset: &Dataset, ctx: &RunContext, processed_now: usize) -> Self {
        let processed_total = dataset.column(FETCH_STATUS).flatten().count();
        Self {
            total_rows: dataset.len(),
            processed_now,
            processed_total,
            remaining: dataset.len() - processed_total,
            original_columns: ctx.original_columns.len(),
            added_columns: ctx.added_columns(dataset),
            fetch_failures: tally(dataset, FETCH_STATUS, &["OK", "OK_Dynamic"]),
            semantic_failures: tally(dataset, SEMANTIC_STATUS, &["OK"]),
        }
    }

    pub fn print(&self) {
        if self.processed_now > 0 {
            println!("Processed {} rows this run.", self.processed_now);
        }
        println!("Total:     {}", self.total_rows);
        println!("Processed: {}", self.processed_total);
        println!("Remaining: {}", self.remaining);
        println!(
            "Columns:   {} original + {} added",
            self.original_columns, self.added_columns
        );
        print_breakdown("Fetch failures", &self.fetch_failures);
        print_breakdown("Semantic failures", &self.semantic_failures);
        if self.remaining > 0 {
            println!("\nRun again to continue with the next batch.");
        }
    }
}

fn print_breakdown(title: &str, counts: &[(String, usize)]) {
    if counts.is_empty() {
        return;
    }
    println!("\n--- {} ---", title);
    for (status, n) in counts {
        println!("  {:<28} {:>6}", status, n);
    }
}

/// Counts the recorded values of `column` that are not in `ok`.
fn tally(dataset: &Dataset, column: &str, ok: &[&str]) -> Vec<(String, usize)> {
    dataset
        .column(column)
        .flatten()
        .filter(|s| !ok.contains(s))
        .counts()
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
        .map(|(s, n)| (s.to_string(), n))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Nothing left to do; no file was written.
    Complete { total_rows: usize },
    Batch(BatchReport),
}

/// One resumable batch: load, pick unprocessed rows, extract, merge, save.
pub struct Coordinator {
    store: CheckpointStore,
    extractor: FeatureExtractor,
}

impl Coordinator {
    pub fn new(store: CheckpointStore, extractor: FeatureExtractor) -> Self {
        Self { store, extractor }
    }

    pub async fn run_once(&self, max_batch: usize) -> Result<RunOutcome> {
        anyhow::ensure!(max_batch > 0, "batch size must be at least 1");

        let (mut dataset, ctx) = self.store.load()?;
        let pending = self.store.unprocessed(&dataset);
        if pending.is_empty() {
            info!("All {} rows already processed", dataset.len());
            return Ok(RunOutcome::Complete { total_rows: dataset.len() });
        }

        let batch = &pending[..pending.len().min(max_batch)];
        info!(
            "{} of {} rows unprocessed, taking {} this run",
            pending.len(),
            dataset.len(),
            batch.len()
        );

        let updates = self.extractor.extract_batch(batch).await?;
        let merged = CheckpointStore::merge(&mut dataset, &updates)?;
        self.store.save(&dataset)?;

        Ok(RunOutcome::Batch(BatchReport::summarize(&dataset, &ctx, merged)))
    }

    /// Snapshot of progress without touching the network or the checkpoint.
    pub fn stats(store: &CheckpointStore) -> Result<BatchReport> {
        let (dataset, ctx) = store.load()?;
        Ok(BatchReport::summarize(&dataset, &ctx, 0))
    }
}
