use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use claimlens_audit::{ClaudeGenerator, Reaper, RunSupervisor};
use claimlens_common::{Config, Subject};
use claimlens_store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("claimlens=info".parse()?))
        .init();

    info!("ClaimLens auditor starting...");

    let config = Config::from_env();
    config.log_redacted();

    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    store.migrate().await?;

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("audit") => {
            let path = args
                .next()
                .ok_or_else(|| anyhow!("usage: auditor audit <subject.json>"))?;
            let raw = std::fs::read_to_string(&path)?;
            let subject: Subject = serde_json::from_str(&raw)?;

            let generator = Arc::new(ClaudeGenerator::new(
                &config.anthropic_api_key,
                &config.signal_model,
                &config.analysis_model,
            ));
            let supervisor = RunSupervisor::new(store, generator);

            let run = supervisor.start_audit(&subject).await?;
            let outcome = supervisor.run(run.id, &subject).await?;
            info!(
                run_id = %outcome.run_id,
                status = %outcome.status,
                truth_index = ?outcome.truth_index,
                "Audit finished"
            );
            if let Some(error) = outcome.error {
                info!(%error, "Run ended with an error message");
            }
        }
        Some("reap") => {
            let reaper = Reaper::new(store, Duration::minutes(config.stale_run_minutes));
            let reaped = reaper.sweep().await?;
            info!(reaped, "Reap finished");
        }
        _ => {
            return Err(anyhow!("usage: auditor <audit <subject.json> | reap>"));
        }
    }

    Ok(())
}
