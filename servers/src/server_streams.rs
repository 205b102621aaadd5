use anyhow::Result;
use lib_streams::connections::{MemoryStore, RedisStore, StateStore};
use lib_streams::core::{
    Broadcaster, ChannelContinuation, ConnectionRegistry, EngineSettings, StreamContext,
    StreamDomain, Supervisor, SupervisorSummary,
};
use lib_streams::ingestors::{FlightPlansDomain, MarketDomain};
use lib_streams::retrieve::UpstreamClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod streams_logic;
use streams_logic::config::{self, Config, StreamKind};
use streams_logic::state::{AppState, StreamEndpoint, WsGateway};
use streams_logic::{downstream, logger};

async fn open_store(config: &Config, stream: &str) -> Result<Arc<dyn StateStore>> {
    match &config.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url, &format!("streams:{}", stream)).await?;
            log::info!("[{}] Durable state in Redis", stream);
            Ok(Arc::new(store))
        }
        None => {
            log::warn!("[{}] No Redis URL configured. State lives in memory and is lost on restart.", stream);
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Wires one stream and starts its supervisor.
fn launch<D: StreamDomain>(
    domain: D,
    settings: EngineSettings,
    client: Arc<UpstreamClient>,
    store: Arc<dyn StateStore>,
    shutdown: CancellationToken,
) -> (StreamEndpoint, JoinHandle<SupervisorSummary>) {
    let registry = ConnectionRegistry::new(store.clone());
    let gateway = WsGateway::new();
    let (continuation, continuations) = ChannelContinuation::channel();

    let context = Arc::new(StreamContext {
        domain: Arc::new(domain),
        client,
        store,
        broadcaster: Broadcaster::new(registry.clone(), Arc::new(gateway.clone())),
        continuation: Arc::new(continuation),
        settings,
        shutdown,
    });
    let supervisor = tokio::spawn(Supervisor::new(context, continuations).run());

    (StreamEndpoint { registry, gateway }, supervisor)
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                log::info!("Ctrl-C received, initiating shutdown.");
            }
            _ = term_signal.recv() => {
                log::info!("SIGTERM received, initiating shutdown.");
            }
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        log::info!("Ctrl-C received, initiating shutdown.");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), config.log_level())?;

    // Fatal configuration errors stop the process before anything starts
    let streams = config.enabled_streams()?;
    let client = Arc::new(UpstreamClient::new(
        config.upstream_url()?,
        config.upstream_token.clone(),
        &config.retry_settings(),
    )?);

    let shutdown = CancellationToken::new();
    let mut endpoints = HashMap::new();
    let mut supervisors = Vec::new();

    for (kind, settings) in streams {
        let store = open_store(&config, kind.name()).await?;
        let (endpoint, supervisor) = match kind {
            StreamKind::FlightPlans => launch(FlightPlansDomain::new(), settings, client.clone(), store, shutdown.clone()),
            StreamKind::Market => launch(MarketDomain::new(), settings, client.clone(), store, shutdown.clone()),
        };
        log::info!("Stream '{}' started", kind.name());
        endpoints.insert(kind.name().to_string(), endpoint);
        supervisors.push((kind, supervisor));
    }

    let app_state = AppState::new(endpoints, shutdown.clone());
    let downstream_handle = tokio::spawn(downstream::run(config.port(), app_state));

    wait_for_signal().await?;

    // Send shutdown signal to all components
    shutdown.cancel();

    for (kind, supervisor) in supervisors {
        match supervisor.await {
            Ok(summary) => log::info!("Stream '{}' stopped: {:?}", kind.name(), summary),
            Err(e) => log::error!("Stream '{}' supervisor crashed: {}", kind.name(), e),
        }
    }
    match downstream_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Downstream server failed: {}", e),
        Err(e) => log::error!("Downstream server task crashed: {}", e),
    }

    log::info!("Shutdown complete.");
    Ok(())
}
