//! AGOS-OS daemon
//!
//! Boots the multi-agent flood-route runtime: loads configuration and the
//! base road graph (with risk snapshot recovery), wires the agents over the
//! message bus, starts the lifecycle scheduler, and serves the HTTP API.
//!
//! # Usage
//!
//! ```bash
//! agos-os --config agos_config.toml --addr 0.0.0.0:8000
//! ```
//!
//! # Exit codes
//!
//! - 0: normal shutdown
//! - 1: configuration invalid
//! - 2: road graph failed to load

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use agos_os::agents::{
    Agent, EvacuationManagerAgent, FloodCollectorAgent, HazardFusionAgent, OrchestratorAgent,
    RoutingAgent, ScoutAgent,
};
use agos_os::api::{create_app, ApiState};
use agos_os::comms::MessageBus;
use agos_os::config::{defaults, SystemConfig};
use agos_os::environment::{snapshot, RoadGraph, SpatialIndex};
use agos_os::llm::LlmService;
use agos_os::nlp::geocoder::Geocoder;
use agos_os::routing::RoutePlanner;
use agos_os::runtime::AgentLifecycleScheduler;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "agos-os")]
#[command(about = "AGOS-OS flood route operational intelligence runtime")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML configuration file (default: AGOS_CONFIG env var,
    /// then ./agos_config.toml, then built-in defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP server bind address (e.g. 0.0.0.0:8000)
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the road graph file path
    #[arg(long)]
    graph: Option<PathBuf>,
}

// Agent ids on the bus
const ORCHESTRATOR_ID: &str = "orchestrator_main";
const HAZARD_ID: &str = "hazard_agent_001";
const SCOUT_ID: &str = "scout_agent_001";
const FLOOD_ID: &str = "flood_agent_001";
const ROUTING_ID: &str = "routing_agent_001";
const EVACUATION_ID: &str = "evac_manager_001";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    // --- Configuration (fatal on error: exit 1) ---
    let config_result = match &args.config {
        Some(path) => SystemConfig::load_from_file(path),
        None => SystemConfig::load(),
    };
    let mut config = match config_result {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration invalid");
            std::process::exit(1);
        }
    };
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(graph_path) = args.graph {
        config.paths.graph_file = graph_path;
    }
    let config = Arc::new(config);

    // --- Road graph + snapshot recovery (fatal on error: exit 2) ---
    let graph = match RoadGraph::load_from_file(&config.paths.graph_file) {
        Ok(graph) => Arc::new(graph),
        Err(e) => {
            error!(
                path = %config.paths.graph_file.display(),
                error = %e,
                "road graph failed to load"
            );
            std::process::exit(2);
        }
    };
    match snapshot::recover(&graph, &config.paths.snapshot_file) {
        Ok(0) => info!("no risk snapshot to recover"),
        Ok(restored) => info!(restored, "risk snapshot recovered"),
        Err(e) => warn!(error = %e, "risk snapshot recovery failed, starting clean"),
    }
    let index = Arc::new(SpatialIndex::build(&graph, defaults::GRID_CELL_DEGREES));

    // --- Shared collaborators ---
    let cancel = CancellationToken::new();
    let bus = Arc::new(MessageBus::new(&config.runtime));
    let llm = Arc::new(LlmService::new(config.llm.clone()));
    let geocoder = Arc::new(Geocoder::load(&config.paths.geocoder_csv));
    let planner = Arc::new(RoutePlanner::new(
        Arc::clone(&graph),
        Arc::clone(&index),
        Arc::clone(&config),
    ));

    for id in [ORCHESTRATOR_ID, HAZARD_ID, SCOUT_ID, FLOOD_ID, ROUTING_ID, EVACUATION_ID] {
        if let Err(e) = bus.register(id) {
            error!(agent = id, error = %e, "bus registration failed");
            std::process::exit(1);
        }
    }

    // --- Agents ---
    let hazard = HazardFusionAgent::new(
        HAZARD_ID,
        Arc::clone(&bus),
        Arc::clone(&config),
        Arc::clone(&graph),
        Arc::clone(&index),
        None,
    );
    let collector = FloodCollectorAgent::new(
        FLOOD_ID,
        Arc::clone(&bus),
        HAZARD_ID,
        Arc::clone(&config),
        Arc::clone(&llm),
        cancel.clone(),
    );
    let scout = ScoutAgent::new(
        SCOUT_ID,
        Arc::clone(&bus),
        HAZARD_ID,
        Arc::clone(&config),
        Arc::clone(&llm),
        Arc::clone(&geocoder),
        cancel.clone(),
    );
    let routing = RoutingAgent::new(
        ROUTING_ID,
        Arc::clone(&bus),
        Arc::clone(&planner),
        Arc::clone(&llm),
        cancel.clone(),
    );
    let evacuation = EvacuationManagerAgent::new(
        EVACUATION_ID,
        Arc::clone(&bus),
        HAZARD_ID,
        Arc::clone(&config),
        Arc::clone(&llm),
        Arc::clone(&planner),
        cancel.clone(),
    );

    let sub_agents: HashMap<String, String> = [
        ("scout", SCOUT_ID),
        ("flood", FLOOD_ID),
        ("routing", ROUTING_ID),
        ("evacuation", EVACUATION_ID),
        ("hazard", HAZARD_ID),
    ]
    .into_iter()
    .map(|(role, id)| (role.to_string(), id.to_string()))
    .collect();
    let orchestrator = OrchestratorAgent::new(
        ORCHESTRATOR_ID,
        Arc::clone(&bus),
        Arc::clone(&config),
        Arc::clone(&llm),
        Arc::clone(&geocoder),
        sub_agents,
    );

    // Typed handles stay with the API; the scheduler drives the same objects
    let orchestrator = Arc::new(Mutex::new(orchestrator));
    let evacuation = Arc::new(Mutex::new(evacuation));

    // --- Scheduler: orchestrator first, then data flow order ---
    let mut scheduler =
        AgentLifecycleScheduler::new(config.runtime.tick_interval_seconds, cancel.clone());
    {
        let dyn_orchestrator: Arc<Mutex<dyn Agent + Send>> = orchestrator.clone();
        scheduler.register_agent(ORCHESTRATOR_ID, dyn_orchestrator, 0);
        scheduler.register_agent(HAZARD_ID, Arc::new(Mutex::new(hazard)), 1);
        scheduler.register_agent(SCOUT_ID, Arc::new(Mutex::new(scout)), 2);
        scheduler.register_agent(FLOOD_ID, Arc::new(Mutex::new(collector)), 3);
        scheduler.register_agent(ROUTING_ID, Arc::new(Mutex::new(routing)), 4);
        let dyn_evacuation: Arc<Mutex<dyn Agent + Send>> = evacuation.clone();
        scheduler.register_agent(EVACUATION_ID, dyn_evacuation, 5);
    }
    let tick_count = scheduler.tick_counter();
    scheduler.start();

    // --- Periodic risk snapshot ---
    {
        let graph = Arc::clone(&graph);
        let path = config.paths.snapshot_file.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match snapshot::maybe_snapshot(&graph, &path, defaults::SNAPSHOT_MIN_INTERVAL_SEC)
                {
                    Ok(Some(edges)) => info!(edges, "periodic risk snapshot written"),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "periodic snapshot failed"),
                }
            }
        });
    }

    // --- HTTP API ---
    let state = ApiState {
        orchestrator,
        evacuation,
        planner,
        llm,
        bus,
        tick_count,
    };
    let app = create_app(state);

    let listener = match tokio::net::TcpListener::bind(&config.server.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.server.addr, error = %e, "failed to bind server address");
            std::process::exit(1);
        }
    };
    info!(addr = %config.server.addr, "HTTP API listening");

    let shutdown_cancel = cancel.clone();
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_cancel.cancel();
        })
        .await;
    if let Err(e) = serve_result {
        error!(error = %e, "server error");
    }

    // --- Drain: stop ticks, final snapshot ---
    scheduler.stop().await;
    match snapshot::write_snapshot(&graph, &config.paths.snapshot_file) {
        Ok(edges) => info!(edges, "final risk snapshot written"),
        Err(e) => warn!(error = %e, "final snapshot failed"),
    }
    info!("shutdown complete");
}
