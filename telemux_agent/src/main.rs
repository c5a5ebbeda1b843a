use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use telemux_agent::cache::MetricsCache;
use telemux_agent::config::{AgentConfig, USAGE};
use telemux_agent::error::ConfigError;
use telemux_agent::fanout::Broadcaster;
use telemux_agent::host::SysinfoCounters;
use telemux_agent::logs::{CommandLogSource, LogMultiplexer};
use telemux_agent::sampler::Sampler;
use telemux_agent::state::AppState;
use telemux_agent::ws::{router, WsTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = match AgentConfig::load() {
        Ok(cfg) => cfg,
        Err(ConfigError::Help(usage)) => {
            print!("{usage}");
            return Ok(());
        }
        Err(e) => {
            eprintln!("error: {e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cache = Arc::new(MetricsCache::new());
    let transport = Arc::new(WsTransport::new());
    let fanout = Arc::new(Broadcaster::new(transport.clone()));
    let source = Arc::new(CommandLogSource::new(
        &cfg.follow_cmd,
        &cfg.dump_cmd,
        tokio::runtime::Handle::current(),
    ));
    let logs = Arc::new(LogMultiplexer::new(
        source,
        fanout.clone(),
        cfg.logs.clone(),
    ));

    let sampler = Sampler::new(Box::new(SysinfoCounters::new()), cfg.sampler.clone())
        .start(cache.clone(), cfg.sample_interval);
    let forwarder = fanout.spawn_metrics_forwarder(&cache);
    let reaper = logs.spawn_reaper(cfg.logs.reap_interval);

    let state = AppState::new(
        cache,
        logs.clone(),
        fanout,
        transport,
        cfg.auth_token.clone(),
        cfg.client_queue,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, auth = cfg.auth_token.is_some(), "telemux agent listening on ws://{addr}/ws");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sampler.stop().await;
    forwarder.stop().await;
    reaper.stop().await;
    let closed = logs.shutdown();
    info!(closed_streams = closed, "agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}
