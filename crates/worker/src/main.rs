use anyhow::Context;
use clap::Parser;
use placement_core::pipeline::{Pipeline, PipelineError};
use placement_core::storage::WriteOutcome;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "placement_worker")]
struct Args {
    /// Refresh even if the cached snapshot is still fresh.
    #[arg(long)]
    force: bool,

    /// Fetch and aggregate, but do not write the cache.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = placement_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let pipeline = Pipeline::new(&settings.pipeline_config())?;

    if !args.force {
        if let Some(cached) = pipeline.cached_fresh().await {
            tracing::info!(
                last_updated = %cached.last_updated,
                "cached snapshot still fresh; nothing to do (use --force to refresh anyway)"
            );
            return Ok(());
        }
    }

    let snapshot = match pipeline.refresh().await {
        Ok(snapshot) => snapshot,
        Err(PipelineError::NoData) => {
            anyhow::bail!("upstream returned no company data; cache left untouched")
        }
        Err(PipelineError::Internal(err)) => {
            sentry_anyhow::capture_anyhow(&err);
            return Err(err.context("refresh failed"));
        }
    };

    tracing::info!(
        summary = %snapshot.acceptance_stats.summary,
        available = snapshot.available_companies.len(),
        "snapshot ready"
    );

    if args.dry_run {
        tracing::info!(dry_run = true, "skipping cache write");
        return Ok(());
    }

    let outcome = pipeline
        .cache()
        .write(&snapshot)
        .await
        .with_context(|| format!("write cache {} failed", pipeline.cache().path().display()))?;

    match outcome {
        WriteOutcome::Written => {
            tracing::info!(path = %pipeline.cache().path().display(), "cache updated")
        }
        WriteOutcome::SkippedStale => {
            tracing::warn!("a newer snapshot was already cached; kept it")
        }
    }

    Ok(())
}

fn init_sentry(settings: &placement_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
