use anyhow::{Context, Result};
use reis_sync::bridge::{spawn_json_lines_reader, HostHandler, IsolatedMessage, JsonLinesSink};
use reis_sync::config::Config;
use reis_sync::sync::SyncService;
use std::sync::Arc;

use super::Runtime;

/// Answer isolated-side messages read from stdin as JSON lines
pub async fn bridge(config: Config) -> Result<()> {
    let runtime = Runtime::new(&config)?;
    let orchestrator = runtime.orchestrator(&config).await?;

    let service = SyncService::new(
        orchestrator.clone(),
        config.sync_interval(),
        config.sync.run_on_startup,
    );
    let sync_task = service.start();
    let cache_listener = orchestrator.caches().clone().spawn_listener(&runtime.store);

    let handler = Arc::new(HostHandler::new(
        runtime.fetcher.clone(),
        runtime.portal.clone(),
        orchestrator,
        Arc::new(JsonLinesSink::new(tokio::io::stdout())),
    ));
    let inbound = spawn_json_lines_reader::<IsolatedMessage, _>(tokio::io::stdin());
    let served = handler.serve(inbound);

    tokio::select! {
        result = served => {
            result.context("Bridge host task panicked")?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Interrupted");
        }
    }

    service.stop();
    cache_listener.abort();
    sync_task.await.context("Sync service task panicked")?;
    Ok(())
}
