//! `cmdrelay capture`: print a remote engine's logs until Ctrl-C.

use super::{allocator, connection};
use anyhow::Result;
use command_protocol::ConnectionAddr;
use log_relay::{LogCapture, LogCaptureConfig, StdoutSink, StopSignal};
use relay_config_and_utils::Config;
use std::sync::Arc;
use tracing::info;

pub async fn capture(
    config: Config,
    remote: ConnectionAddr,
    port: Option<u16>,
    max_failures: Option<i32>,
) -> Result<()> {
    let capture_config = LogCaptureConfig {
        remote,
        local_host: config.bind_host.clone(),
        advertised_host: config.advertised_host.clone(),
        preferred_port: port.unwrap_or(config.response_port),
        max_failures: max_failures.unwrap_or(config.max_failures),
    };

    let capture = LogCapture::start(
        capture_config,
        connection(&config),
        allocator(&config),
        Arc::new(StdoutSink),
    )
    .await?;
    info!(
        remote = %capture.remote(),
        callback = %capture.address(),
        "Capturing remote logs, press Ctrl-C to stop"
    );

    let stop = StopSignal::new();
    let signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.stop();
        }
    });

    capture.run_until(stop).await?;
    Ok(())
}
