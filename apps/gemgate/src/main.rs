use anyhow::Context;
use tracing::info;

use gemgate_core::bootstrap_from_env;
use gemgate_router::proxy_router;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("gemgate failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let boot = bootstrap_from_env().await?;
    let global = boot.state.global();
    info!(
        event = "config_loaded",
        host = %global.host,
        port = global.port,
        auth = global.auth_key.is_some(),
        cron = global.cron_secret.is_some(),
        proxy = %global.proxy.as_deref().unwrap_or(""),
        passthrough_unmapped = global.passthrough_unmapped
    );

    let app = proxy_router(boot.state.clone());
    let bind = format!("{}:{}", global.host, global.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(event = "listening", addr = %bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gemgate=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!(event = "shutdown");
    }
}
