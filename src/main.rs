mod checkpoint;
mod coordinator;
mod dataset;
mod deadline;
mod extractor;
mod features;
mod fetch;
mod semantic;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use checkpoint::CheckpointStore;
use coordinator::{Coordinator, RunOutcome};
use extractor::FeatureExtractor;
use features::FeatureVector;
use fetch::{ChromeRenderer, Fetcher, HttpSource};
use semantic::{Classifier, GeminiClassifier, RetryPolicy};
use settings::Settings;

#[derive(Parser)]
#[command(name = "phishscan", about = "Builds a phishing feature dataset from a CSV of URLs")]
struct Cli {
    /// Settings file (default: ./phishscan.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Original dataset with a `url` column
    #[arg(long, global = true)]
    input: Option<PathBuf>,
    /// Working copy that carries progress between runs
    #[arg(long, global = true)]
    checkpoint: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the next batch of unprocessed rows and save the checkpoint
    Run {
        /// Max rows this run (default: batch_size setting)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show progress and failure breakdown
    Stats,
    /// Fetch one URL and show how it ended
    Fetch { url: String },
    /// Print the features of one URL
    Features {
        url: String,
        /// Also fetch the page and print its HTML features
        #[arg(long)]
        html: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(input) = cli.input {
        settings.input = input;
    }
    if let Some(checkpoint) = cli.checkpoint {
        settings.checkpoint = checkpoint;
    }

    let result = match cli.command {
        Commands::Run { limit } => {
            let store = CheckpointStore::new(&settings.input, &settings.checkpoint, &settings.url_column);
            let mut extractor = FeatureExtractor::new(build_fetcher(&settings)?, settings.fetch.deadline())
                .with_row_delay(settings.row_delay());
            if let Some(classifier) = build_classifier(&settings)? {
                extractor = extractor
                    .with_classifier(classifier, RetryPolicy::from_settings(&settings.semantic));
            }

            let coordinator = Coordinator::new(store, extractor);
            match coordinator.run_once(limit.unwrap_or(settings.batch_size)).await? {
                RunOutcome::Complete { total_rows } => {
                    println!("All {} rows already processed. Nothing to do.", total_rows);
                }
                RunOutcome::Batch(report) => report.print(),
            }
            Ok(())
        }
        Commands::Stats => {
            let store = CheckpointStore::new(&settings.input, &settings.checkpoint, &settings.url_column);
            Coordinator::stats(&store)?.print();
            Ok(())
        }
        Commands::Fetch { url } => {
            let fetcher = Arc::new(build_fetcher(&settings)?);
            let outcome = deadline::bounded_fetch(fetcher, &url, settings.fetch.deadline()).await;
            println!("Status: {}", outcome.status);
            if let Some(page) = outcome.page {
                println!("HTML:   {} bytes", page.html.len());
                println!("Text:   {}", truncate(&page.text, 200));
            }
            Ok(())
        }
        Commands::Features { url, html } => {
            print_features(&features::url::extract(&url));
            if html {
                let fetcher = Arc::new(build_fetcher(&settings)?);
                let outcome = deadline::bounded_fetch(fetcher, &url, settings.fetch.deadline()).await;
                println!("\n--- fetch: {} ---", outcome.status);
                match outcome.page {
                    Some(page) => print_features(&features::html::extract(&url, &page.html)),
                    None => println!("No content; HTML features would be recorded as defaults."),
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn build_fetcher(settings: &Settings) -> Result<Fetcher> {
    let fetcher = Fetcher::new(HttpSource::new(&settings.fetch)?);
    if settings.fetch.dynamic_fallback {
        Ok(fetcher.with_renderer(ChromeRenderer::new(&settings.fetch)))
    } else {
        info!("Dynamic rendering disabled");
        Ok(fetcher)
    }
}

fn build_classifier(settings: &Settings) -> Result<Option<Arc<dyn Classifier>>> {
    if !settings.semantic.enabled {
        info!("Semantic analysis disabled, rows will be marked Skipped_Disabled");
        return Ok(None);
    }
    let Some(key) = settings.semantic.api_key.clone() else {
        bail!("semantic analysis needs an API key: set GOOGLE_API_KEY or PHISH_SEMANTIC__ENABLED=false");
    };
    let classifier = GeminiClassifier::new(&settings.semantic, key)?;
    Ok(Some(Arc::new(classifier)))
}

fn print_features(features: &FeatureVector) {
    for (name, value) in features.iter() {
        println!("  {:<36} {}", name, truncate(&value.to_string(), 60));
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
