//! `cmdrelay serve`: request engine with remote logging.

use super::{allocator, connection};
use anyhow::Result;
use command_protocol::EngineRole;
use command_transport::{CommandEngine, EngineConfig};
use log_relay::RemoteLoggingService;
use observability::LogTap;
use relay_config_and_utils::Config;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn serve(
    config: Config,
    port: Option<u16>,
    heartbeat_secs: Option<u64>,
    tap: LogTap,
) -> Result<()> {
    let engine_config = EngineConfig::new(EngineRole::Request)
        .with_bind_host(config.bind_host.clone())
        .with_advertised_host(config.advertised_host())
        .with_preferred_port(port.unwrap_or(config.request_port))
        .with_read_timeout(config.io_timeout());

    let connection = connection(&config);
    let engine = CommandEngine::with_connection(engine_config, connection.clone(), allocator(&config));
    let service = RemoteLoggingService::new(tap, Arc::new(connection));
    service.register(&engine).await;

    let handle = engine.start()?;
    println!("Listening on {}", handle.address());

    let heartbeat = heartbeat_secs
        .filter(|secs| *secs > 0)
        .map(|secs| tokio::spawn(heartbeat(Duration::from_secs(secs))));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping engine");
            if let Err(e) = handle.stop().await {
                warn!(error = %e, "Engine stop request failed");
            }
        }
        state = handle.wait_stopped() => {
            info!(state = ?state, "Engine stopped");
        }
    }

    service.shutdown();
    if let Some(task) = heartbeat {
        task.abort();
    }
    if !handle.wait_stopped_timeout(SHUTDOWN_TIMEOUT).await {
        anyhow::bail!("Engine did not stop within {:?}", SHUTDOWN_TIMEOUT);
    }
    Ok(())
}

async fn heartbeat(period: Duration) {
    let mut interval = tokio::time::interval(period);
    let mut beat: u64 = 0;
    loop {
        interval.tick().await;
        beat += 1;
        info!(beat, "heartbeat");
    }
}
