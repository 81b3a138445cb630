//! End-to-end mission flows over the live bus and scheduler
//!
//! Agents run under the real lifecycle scheduler at a fast tick. External
//! sources are absent, so the collector uses its simulated fallback and the
//! LLM facade stays in rule-based mode throughout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use agos_os::agents::{
    Agent, FloodCollectorAgent, HazardFusionAgent, OrchestratorAgent, RoutingAgent,
};
use agos_os::comms::MessageBus;
use agos_os::config::{defaults, LlmConfig, SystemConfig};
use agos_os::environment::{Node, RoadGraph, SpatialIndex};
use agos_os::llm::LlmService;
use agos_os::nlp::geocoder::Geocoder;
use agos_os::routing::RoutePlanner;
use agos_os::runtime::AgentLifecycleScheduler;
use agos_os::types::MissionType;

struct Harness {
    orchestrator: Arc<Mutex<OrchestratorAgent>>,
    scheduler: AgentLifecycleScheduler,
}

fn city_graph() -> RoadGraph {
    let nodes = vec![
        Node { id: 1, lat: 14.6500, lon: 121.1000 },
        Node { id: 2, lat: 14.6509, lon: 121.1000 },
        Node { id: 3, lat: 14.6509, lon: 121.1014 },
        Node { id: 4, lat: 14.6500, lon: 121.1014 },
    ];
    let edges = vec![
        (1, 2, 0, 100.0),
        (2, 1, 0, 100.0),
        (2, 3, 0, 150.0),
        (3, 2, 0, 150.0),
        (3, 4, 0, 200.0),
        (4, 3, 0, 200.0),
        (1, 4, 0, 350.0),
        (4, 1, 0, 350.0),
    ];
    RoadGraph::from_parts(nodes, edges)
}

/// Wire orchestrator + hazard + collector + routing over a live bus.
/// `route_timeout` configures the route_calculation mission deadline.
fn build_harness(route_timeout: f64, register_routing: bool) -> Harness {
    let mut config = SystemConfig::default();
    config.runtime.tick_interval_seconds = 0.02;
    config.orchestrator.mission_timeouts.route_calculation = route_timeout;
    config.llm.enabled = false;
    let config = Arc::new(config);

    let bus = Arc::new(MessageBus::new(&config.runtime));
    for id in ["orchestrator_main", "hazard_agent_001", "flood_agent_001", "routing_agent_001"] {
        bus.register(id).unwrap();
    }

    let graph = Arc::new(city_graph());
    let index = Arc::new(SpatialIndex::build(&graph, defaults::GRID_CELL_DEGREES));
    let llm = Arc::new(LlmService::new(LlmConfig { enabled: false, ..LlmConfig::default() }));
    let planner =
        Arc::new(RoutePlanner::new(Arc::clone(&graph), Arc::clone(&index), Arc::clone(&config)));
    let cancel = CancellationToken::new();

    let hazard = HazardFusionAgent::new(
        "hazard_agent_001",
        Arc::clone(&bus),
        Arc::clone(&config),
        Arc::clone(&graph),
        Arc::clone(&index),
        None,
    );
    let collector = FloodCollectorAgent::new(
        "flood_agent_001",
        Arc::clone(&bus),
        "hazard_agent_001",
        Arc::clone(&config),
        Arc::clone(&llm),
        cancel.clone(),
    );
    let routing = RoutingAgent::new(
        "routing_agent_001",
        Arc::clone(&bus),
        planner,
        Arc::clone(&llm),
        cancel.clone(),
    );

    let sub_agents: HashMap<String, String> = [
        ("scout", "scout_agent_001"),
        ("flood", "flood_agent_001"),
        ("routing", "routing_agent_001"),
        ("evacuation", "evac_manager_001"),
        ("hazard", "hazard_agent_001"),
    ]
    .into_iter()
    .map(|(r, a)| (r.to_string(), a.to_string()))
    .collect();
    let orchestrator = OrchestratorAgent::new(
        "orchestrator_main",
        Arc::clone(&bus),
        Arc::clone(&config),
        llm,
        Arc::new(Geocoder::builtin()),
        sub_agents,
    );
    let orchestrator = Arc::new(Mutex::new(orchestrator));

    let mut scheduler = AgentLifecycleScheduler::new(0.02, cancel);
    let dyn_orchestrator: Arc<Mutex<dyn Agent + Send>> = orchestrator.clone();
    scheduler.register_agent("orchestrator_main", dyn_orchestrator, 0);
    scheduler.register_agent("hazard_agent_001", Arc::new(Mutex::new(hazard)), 1);
    scheduler.register_agent("flood_agent_001", Arc::new(Mutex::new(collector)), 3);
    if register_routing {
        scheduler.register_agent("routing_agent_001", Arc::new(Mutex::new(routing)), 4);
    }

    Harness { orchestrator, scheduler }
}

async fn wait_for_state(
    orchestrator: &Arc<Mutex<OrchestratorAgent>>,
    mission_id: &str,
    expected: &str,
    timeout: Duration,
) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        {
            let guard = orchestrator.lock().await;
            if let Some(snapshot) = guard.mission_snapshot(mission_id) {
                if snapshot["state"] == expected {
                    return snapshot;
                }
                let state = snapshot["state"].as_str().unwrap_or("").to_string();
                assert!(
                    !(state == "FAILED" && expected != "FAILED"),
                    "mission failed early: {snapshot}"
                );
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "mission {mission_id} never reached {expected}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn cascade_risk_update_completes_end_to_end() {
    let mut harness = build_harness(30.0, true);
    harness.scheduler.start();

    let mission_id = {
        let mut orchestrator = harness.orchestrator.lock().await;
        let handle = orchestrator.start_mission(MissionType::CascadeRiskUpdate, json!({}));
        handle["mission_id"].as_str().unwrap().to_string()
    };

    let snapshot = wait_for_state(
        &harness.orchestrator,
        &mission_id,
        "COMPLETED",
        Duration::from_secs(5),
    )
    .await;

    // Both pipeline stages reported back
    assert!(snapshot["results"].get("flood").is_some(), "{snapshot}");
    assert!(snapshot["results"].get("hazard").is_some(), "{snapshot}");

    harness.scheduler.stop().await;
}

#[tokio::test]
async fn route_mission_completes_with_route_result() {
    let mut harness = build_harness(30.0, true);
    harness.scheduler.start();

    let mission_id = {
        let mut orchestrator = harness.orchestrator.lock().await;
        let handle = orchestrator.start_mission(
            MissionType::RouteCalculation,
            json!({
                "start": [14.6500, 121.1000],
                "end": [14.6500, 121.1014],
            }),
        );
        handle["mission_id"].as_str().unwrap().to_string()
    };

    let snapshot = wait_for_state(
        &harness.orchestrator,
        &mission_id,
        "COMPLETED",
        Duration::from_secs(5),
    )
    .await;
    let route = &snapshot["results"]["routing"];
    assert_eq!(route["status"], "success", "{snapshot}");
    assert!(route["distance"].as_f64().unwrap() > 0.0);

    harness.scheduler.stop().await;
}

#[tokio::test]
async fn unresponsive_agent_times_the_mission_out() {
    // Routing agent registered on the bus but never scheduled: the REQUEST
    // sits unanswered until the mission deadline passes.
    let mut harness = build_harness(1.0, false);
    harness.scheduler.start();

    let mission_id = {
        let mut orchestrator = harness.orchestrator.lock().await;
        let handle = orchestrator.start_mission(
            MissionType::RouteCalculation,
            json!({
                "start": [14.6500, 121.1000],
                "end": [14.6500, 121.1014],
            }),
        );
        handle["mission_id"].as_str().unwrap().to_string()
    };

    let snapshot = wait_for_state(
        &harness.orchestrator,
        &mission_id,
        "TIMED_OUT",
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(snapshot["error"], "Mission timed out");

    harness.scheduler.stop().await;
}
