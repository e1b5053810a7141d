use std::{fs::OpenOptions, path::Path, sync::Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use broadcast_chat::{
    config::{Cli, ConfigSource, Settings},
    server::ChatServer,
};

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let _ = fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = fmt().with_env_filter(filter).with_target(false).try_init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (settings, source) = Settings::load(&cli)?;
    init_tracing(settings.log_file.as_deref())?;

    match &source {
        ConfigSource::File(path) => info!(path = %path.display(), "loaded configuration"),
        ConfigSource::Defaults(path) => {
            info!(path = %path.display(), "no configuration file found; using defaults")
        }
    }
    if let Some(path) = &settings.log_file {
        println!("Logging to {}", path.display());
    }

    let server = ChatServer::bind(&settings).await?;
    info!("telnet listening on {}", server.telnet_addr()?);
    info!("api listening on {}", server.api_addr()?);

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("chat server exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
