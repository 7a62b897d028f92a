//! One-shot commands: `cmdrelay echo` and `cmdrelay stop`.

use super::connection;
use anyhow::{Context, Result};
use command_protocol::{Command, ConnectionAddr, EngineRole};
use relay_config_and_utils::Config;

pub async fn echo(config: Config, to: ConnectionAddr, text: String) -> Result<()> {
    connection(&config)
        .send_request(&to, Command::echo(text))
        .await
        .with_context(|| format!("Echo to {to} failed"))?;
    println!("Echo delivered to {to}");
    Ok(())
}

pub async fn stop(config: Config, to: ConnectionAddr, target: EngineRole) -> Result<()> {
    connection(&config)
        .send_request(&to, Command::stop_engine(target))
        .await
        .with_context(|| format!("Stopping the {target} engine at {to} failed"))?;
    println!("Stop sent to the {target} engine at {to}");
    Ok(())
}
