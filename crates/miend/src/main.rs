use std::sync::Arc;

use anyhow::{Context, Result};
use mien_core::{FaceAnalyzer, LogPublisher};
use mien_store::{Layout, Store};
use tracing_subscriber::EnvFilter;

mod analyzer;
mod config;
mod ingest;
mod pipeline;
mod retrain;
mod stability;

use analyzer::CommandAnalyzer;
use config::Config;
use ingest::IngestService;
use pipeline::Pipeline;
use retrain::Retrainer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("miend starting");

    let config = Config::from_env();
    let analyzer: Arc<dyn FaceAnalyzer> = Arc::new(
        config
            .analyzer_cmd
            .as_deref()
            .and_then(CommandAnalyzer::from_command_line)
            .context("MIEN_ANALYZER_CMD must name the external analyzer command")?,
    );

    let store = Arc::new(
        Store::open(&config.db_path)
            .with_context(|| format!("opening store at {}", config.db_path.display()))?,
    );
    let layout = Layout::new(&config.data_dir).with_inbox(&config.inbox_dir);
    layout
        .ensure()
        .with_context(|| format!("creating data directories under {}", config.data_dir.display()))?;

    mien_store::sweep::run(&store, &layout);

    if config.retrain_on_start {
        let retrainer = Retrainer::new(Arc::clone(&store), Arc::clone(&analyzer));
        match retrainer.run() {
            Ok(outcome) => {
                let status = retrainer.status();
                tracing::info!(
                    processed = status.done,
                    samples = status.total,
                    retrained = outcome.retrained,
                    skipped = outcome.skipped,
                    "startup re-embedding complete"
                );
            }
            Err(e) => tracing::warn!(error = %e, "startup re-embedding failed"),
        }
    }

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        layout,
        analyzer,
        Arc::new(LogPublisher),
    ));
    let service = IngestService::spawn(
        &config.inbox_dir,
        config.settle_window,
        config.retry_window,
        move |path| {
            let _ = pipeline.process(path);
        },
    )
    .with_context(|| format!("watching inbox {}", config.inbox_dir.display()))?;

    tracing::info!(inbox = %config.inbox_dir.display(), "miend ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("miend shutting down");
    service.stop();

    Ok(())
}
