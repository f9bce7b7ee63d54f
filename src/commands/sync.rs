use anyhow::{Context, Result};
use reis_sync::config::Config;
use reis_sync::sync::{SyncOutcome, SyncService};

use super::Runtime;

pub async fn sync(config: Config, once: bool, print_metrics: bool) -> Result<()> {
    let runtime = Runtime::new(&config)?;
    let orchestrator = runtime.orchestrator(&config).await?;

    if once {
        println!("Syncing portal data");
        println!("===================");

        match orchestrator.sync_all().await {
            SyncOutcome::Completed(report) => {
                println!("Subjects processed: {}", report.subjects_processed);
                println!("Duration: {:.1}s", report.duration.as_secs_f64());
                if report.is_partial() {
                    println!("Failed domains: {}", report.failed_domains.join(", "));
                }
            }
            SyncOutcome::Skipped => println!("A sync is already running"),
        }

        if print_metrics {
            let text = reis_sync::metrics::encode_metrics()
                .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {e}"))?;
            println!("{text}");
        }
        return Ok(());
    }

    let service = SyncService::new(
        orchestrator,
        config.sync_interval(),
        config.sync.run_on_startup,
    );
    let handle = service.start();
    tracing::info!(
        interval_secs = config.sync.interval_secs,
        "Periodic sync running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down sync service");
    service.stop();
    handle.await.context("Sync service task panicked")?;
    Ok(())
}
