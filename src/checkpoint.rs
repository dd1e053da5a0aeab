use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::{error, info};

use crate::dataset::Dataset;
use crate::features::{schema_columns, FeatureVector, FETCH_STATUS};

/// Which columns came from the user's dataset, as opposed to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub original_columns: Vec<String>,
}

impl RunContext {
    pub fn added_columns(&self, dataset: &Dataset) -> usize {
        dataset
            .headers()
            .iter()
            .filter(|h| !self.original_columns.contains(h))
            .count()
    }
}

/// A row that has never been attempted.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRow {
    pub index: usize,
    pub url: String,
}

/// Values recorded for one row, keyed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub index: usize,
    pub values: Vec<(String, String)>,
}

impl RowUpdate {
    pub fn new(index: usize) -> Self {
        Self { index, values: Vec::new() }
    }

    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        let value = value.into();
        match self.values.iter_mut().find(|(c, _)| c == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column.to_string(), value)),
        }
    }

    pub fn extend(&mut self, features: &FeatureVector) {
        for (name, value) in features.iter() {
            self.set(name, value.to_string());
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }
}

/// The persisted working copy. A row is unprocessed exactly when its
/// `fetch_status` cell is empty; nothing else marks progress.
pub struct CheckpointStore {
    input: PathBuf,
    checkpoint: PathBuf,
    url_column: String,
}

impl CheckpointStore {
    pub fn new(input: impl Into<PathBuf>, checkpoint: impl Into<PathBuf>, url_column: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            checkpoint: checkpoint.into(),
            url_column: url_column.into(),
        }
    }

    /// Loads the checkpoint if one exists, otherwise the original dataset.
    /// Either way the result carries every pipeline column.
    pub fn load(&self) -> Result<(Dataset, RunContext)> {
        let schema = schema_columns();
        let (mut dataset, original_columns) = if self.checkpoint.exists() {
            info!("Resuming from checkpoint {}", self.checkpoint.display());
            let dataset = Dataset::read_csv(&self.checkpoint)?;
            let original = dataset
                .headers()
                .iter()
                .filter(|h| !schema.contains(&h.as_str()))
                .cloned()
                .collect();
            (dataset, original)
        } else {
            if !self.input.exists() {
                bail!(
                    "neither checkpoint {} nor input {} exists",
                    self.checkpoint.display(),
                    self.input.display()
                );
            }
            info!("No checkpoint yet, starting from {}", self.input.display());
            let dataset = Dataset::read_csv(&self.input)?;
            let original = dataset.headers().to_vec();
            (dataset, original)
        };

        if dataset.column_index(&self.url_column).is_none() {
            bail!("dataset has no '{}' column", self.url_column);
        }
        for column in schema {
            dataset.ensure_column(column);
        }
        Ok((dataset, RunContext { original_columns }))
    }

    /// Rows still waiting for a first attempt, in file order.
    pub fn unprocessed(&self, dataset: &Dataset) -> Vec<PendingRow> {
        let (Some(status), Some(url)) = (
            dataset.column_index(FETCH_STATUS),
            dataset.column_index(&self.url_column),
        ) else {
            return Vec::new();
        };
        (0..dataset.len())
            .filter(|&i| dataset.cell(i, status).is_none())
            .map(|i| PendingRow {
                index: i,
                url: dataset.cell(i, url).unwrap_or_default().to_string(),
            })
            .collect()
    }

    /// Writes batch results into the full table by row index. Columns the
    /// table lacks are added first.
    pub fn merge(dataset: &mut Dataset, batch: &[RowUpdate]) -> Result<usize> {
        for update in batch {
            if update.index >= dataset.len() {
                bail!("update for row {} but table has {} rows", update.index, dataset.len());
            }
            for (column, value) in &update.values {
                let idx = dataset.ensure_column(column);
                dataset.set(update.index, idx, value.clone())?;
            }
        }
        Ok(batch.len())
    }

    pub fn save(&self, dataset: &Dataset) -> Result<()> {
        if let Err(e) = dataset.write_csv(&self.checkpoint) {
            error!("Failed to save checkpoint {}: {:#}", self.checkpoint.display(), e);
            return Err(e).context("checkpoint not saved; processed rows will be retried next run");
        }
        info!("Checkpoint saved to {}", self.checkpoint.display());
        Ok(())
    }
}
