use anyhow::Result;
use assist_core::{
    agents::{
        AgentRegistry, FixerAgent, IntentRouterAgent, KnowledgeAgent, LanguageAgent,
        RefactorAgent, ValidatorAgent,
    },
    analysis::HeuristicAnalyzer,
    api::{ApiServer, AppState},
    config::Config,
    events::EventBus,
    mcp::McpClient,
    orchestrator::Orchestrator,
    provider::ModelClient,
    scan::ScanEngine,
};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "assist-core", about = "AI assistant orchestration backend")]
struct Args {
    /// Bind host override
    #[arg(long)]
    host: Option<String>,
    /// Bind port override
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Starting Assist Core orchestration backend");

    let args = Args::parse();
    let mut config = Config::load()?;
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }

    let bus = EventBus::default();
    let analysis = Arc::new(HeuristicAnalyzer::new()?);
    let provider = Arc::new(ModelClient::new(bus.clone()));
    let mcp = Arc::new(McpClient::new(config.mcp.clone(), bus.clone()));

    let registry = Arc::new(AgentRegistry::new(bus.clone()));
    registry
        .register(Arc::new(LanguageAgent::csharp(
            provider.clone(),
            analysis.clone(),
        )))
        .await?;
    registry
        .register(Arc::new(LanguageAgent::javascript(
            provider.clone(),
            analysis.clone(),
        )))
        .await?;
    registry
        .register(Arc::new(LanguageAgent::python(
            provider.clone(),
            analysis.clone(),
        )))
        .await?;
    registry
        .register(Arc::new(FixerAgent::new(
            provider.clone(),
            analysis.clone(),
        )))
        .await?;
    registry
        .register(Arc::new(RefactorAgent::new(
            provider.clone(),
            analysis.clone(),
        )))
        .await?;
    registry.register(Arc::new(ValidatorAgent::new()?)).await?;
    registry
        .register(Arc::new(KnowledgeAgent::new(provider.clone(), None)))
        .await?;
    registry
        .register(Arc::new(IntentRouterAgent::new(provider.clone())))
        .await?;
    info!("Registered {} agents", registry.count().await);

    let orchestrator = Arc::new(Orchestrator::new(&config, registry.clone(), bus.clone())?);
    let scan = Arc::new(ScanEngine::new(
        config.scan.clone(),
        analysis,
        Some(provider.clone()),
        bus.clone(),
    ));

    // Completed scans get snapshotted under the data directory.
    let snapshot_dir = std::env::var("ASSIST_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let snapshots = assist_core::snapshot::ReportSnapshotStore::new(
        std::path::Path::new(&snapshot_dir).join("reports"),
    );
    let mut scan_completed = bus.subscribe(assist_core::events::Topic::ScanCompleted);
    let snapshot_scan = scan.clone();
    let snapshotter = tokio::spawn(async move {
        while let Some(event) = scan_completed.recv().await {
            if let assist_core::events::SystemEvent::ScanCompleted { report_id, .. } = event {
                let report = snapshot_scan.report().await;
                if report.id == report_id {
                    if let Err(e) = snapshots.save(&report).await {
                        tracing::warn!("Failed to snapshot scan report {}: {}", report_id, e);
                    }
                }
            }
        }
    });

    // Background loops, all tied to one shutdown token.
    let shutdown = CancellationToken::new();
    let worker = orchestrator.spawn_worker(shutdown.clone());
    let tuner = orchestrator
        .governor()
        .spawn_tuner(orchestrator.queue(), shutdown.clone());
    let health = registry.spawn_health_monitor(shutdown.clone());
    let heartbeat = mcp.spawn_heartbeat(shutdown.clone());
    let cleanup = orchestrator.executions().spawn_cleanup(
        std::time::Duration::from_secs(assist_core::constants::EXECUTION_CLEANUP_INTERVAL_SECS),
        shutdown.clone(),
    );

    let api_server = ApiServer::new(
        config,
        AppState {
            orchestrator: orchestrator.clone(),
            scan,
            models: provider,
            mcp,
        },
    );

    tokio::select! {
        result = api_server.run() => {
            if let Err(e) = result {
                tracing::error!("API server failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    shutdown.cancel();
    snapshotter.abort();
    registry.stop_all().await;
    for handle in [worker, tuner, health, heartbeat, cleanup] {
        let _ = handle.await;
    }
    info!("Assist Core shutdown complete");
    Ok(())
}
