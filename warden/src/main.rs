use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use warden::{Config, Supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warden=debug,backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        host = %config.host,
        range_start = config.port_range_start,
        range_end = config.port_range_end,
        "warden starting"
    );

    let supervisor = Supervisor::new(config)?;

    // Startup trigger: get the backend reachable before the monitor takes
    // over. A terminal failure here is logged, not fatal; the monitor keeps
    // retrying on its own cadence.
    match supervisor.ensure_backend().await {
        Ok(endpoint) => info!(%endpoint, "backend ready"),
        Err(e) => error!("initial backend start failed: {e}"),
    }

    let monitor = supervisor.spawn_monitor();

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    supervisor.shutdown().await;
    monitor.await.ok();
    Ok(())
}
