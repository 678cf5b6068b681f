//! sentinel_agent binary: serves host telemetry over a local WebSocket.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sentinel_agent::config::{AgentConfig, CliAction};
use sentinel_agent::fake::{spawn_demo_load, InMemoryProbe};
use sentinel_agent::probe::SharedProbe;
use sentinel_agent::sampler::spawn_sampler;
use sentinel_agent::state::AppState;
use sentinel_agent::system::SysinfoProbe;
use sentinel_agent::ws::router;
use sentinel_agent::TelemetryService;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sentinel_agent=info")),
        )
        .init();

    let cfg = match AgentConfig::from_env_and_args(env::args()) {
        Ok(CliAction::Run(cfg)) => cfg,
        Ok(CliAction::Help(usage)) => {
            println!("{usage}");
            return Ok(());
        }
        Err(msg) => anyhow::bail!(msg),
    };

    let probe: SharedProbe = if cfg.demo {
        let demo = Arc::new(InMemoryProbe::demo());
        let _load = spawn_demo_load(Arc::clone(&demo), Duration::from_millis(500));
        info!("demo mode: serving fabricated telemetry");
        demo
    } else {
        Arc::new(SysinfoProbe::new())
    };

    let service = TelemetryService::new(probe, cfg.service.clone());
    if let Some(period) = cfg.sample_period {
        let _sampler = spawn_sampler(service.clone(), period);
        info!(period_ms = period.as_millis() as u64, "background sampling enabled");
    }

    let app = router(AppState::new(service));
    let addr = SocketAddr::new(cfg.bind, cfg.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let local = listener.local_addr().context("reading bound address")?;
    info!("sentinel agent listening at ws://{local}/ws");
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
