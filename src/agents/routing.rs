//! Routing Agent — MQ-callable wrapper over the route planner
//!
//! Handles `calculate_route` and `find_evacuation_center` REQUESTs. Route
//! calculation is pure graph work and answers inline; evacuation-center
//! ranking routes to several candidates and may consult the LLM for an
//! explanation, so it runs in a worker task.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Agent;
use crate::comms::{AclMessage, MessageBody, MessageBus, Performative};
use crate::llm::LlmService;
use crate::routing::RoutePlanner;
use crate::types::{GeoPoint, RoutePreferences};

pub struct RoutingAgent {
    agent_id: String,
    bus: Arc<MessageBus>,
    planner: Arc<RoutePlanner>,
    llm: Arc<LlmService>,
    cancel: CancellationToken,
    routes_calculated: u64,
}

impl RoutingAgent {
    pub fn new(
        agent_id: impl Into<String>,
        bus: Arc<MessageBus>,
        planner: Arc<RoutePlanner>,
        llm: Arc<LlmService>,
        cancel: CancellationToken,
    ) -> Self {
        let agent_id = agent_id.into();
        info!(
            agent = %agent_id,
            evacuation_centers = planner.evacuation_centers().len(),
            "routing agent initialized"
        );
        Self { agent_id, bus, planner, llm, cancel, routes_calculated: 0 }
    }

    fn handle_route_request(&mut self, msg: &AclMessage, start: GeoPoint, end: GeoPoint, preferences: &RoutePreferences) {
        match self.planner.calculate_route(start, end, preferences) {
            Ok(route) => {
                self.routes_calculated += 1;
                info!(
                    agent = %self.agent_id,
                    status = ?route.status,
                    distance_m = route.distance,
                    avg_risk = route.risk_level,
                    "route calculated"
                );
                let reply = AclMessage::inform_reply(
                    msg,
                    self.agent_id.clone(),
                    MessageBody::RouteResult(route),
                );
                if let Err(e) = self.bus.send(reply) {
                    warn!(agent = %self.agent_id, error = %e, "failed to send route reply");
                }
            }
            Err(e) => {
                warn!(agent = %self.agent_id, error = %e, "route calculation failed");
                let reply = AclMessage::failure_reply(msg, self.agent_id.clone(), e.to_string());
                if let Err(send_err) = self.bus.send(reply) {
                    warn!(agent = %self.agent_id, error = %send_err, "failed to send failure reply");
                }
            }
        }
    }

    fn spawn_evacuation_request(
        &self,
        msg: AclMessage,
        location: GeoPoint,
        query: Option<String>,
        preferences: RoutePreferences,
    ) {
        let agent_id = self.agent_id.clone();
        let bus = Arc::clone(&self.bus);
        let planner = Arc::clone(&self.planner);
        let llm = Arc::clone(&self.llm);
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let reply = match planner.find_nearest_center(location, &preferences) {
                Ok(mut recommendation) => {
                    if let (Some(center), Some(query)) = (&recommendation.center, &query) {
                        if llm.is_available().await {
                            let prompt = format!(
                                "A resident asked: \"{query}\". The recommended evacuation \
                                 center is {} ({}). Explain the choice in one short sentence.",
                                center.name, center.center_type
                            );
                            let explanation = llm.text_chat(&prompt).await;
                            if !explanation.is_empty() {
                                recommendation.explanation = Some(explanation);
                            }
                        }
                    }
                    info!(
                        agent = %agent_id,
                        status = %recommendation.status,
                        evaluated = recommendation.candidates_evaluated,
                        "evacuation center selected"
                    );
                    AclMessage::inform_reply(
                        &msg,
                        agent_id.clone(),
                        MessageBody::EvacuationCenterResult(recommendation),
                    )
                }
                Err(e) => AclMessage::failure_reply(&msg, agent_id.clone(), e.to_string()),
            };
            if cancel.is_cancelled() {
                return;
            }
            if let Err(e) = bus.send(reply) {
                warn!(agent = %agent_id, error = %e, "failed to send evacuation reply");
            }
        });
    }

    pub fn stats(&self) -> serde_json::Value {
        let (hits, misses) = self.planner.cache_stats();
        serde_json::json!({
            "agent_id": self.agent_id,
            "routes_calculated": self.routes_calculated,
            "evacuation_centers": self.planner.evacuation_centers().len(),
            "node_cache_hits": hits,
            "node_cache_misses": misses,
        })
    }
}

#[async_trait]
impl Agent for RoutingAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn step(&mut self) {
        while let Ok(Some(msg)) = self.bus.try_receive(&self.agent_id) {
            match (msg.performative, msg.body.clone()) {
                (Performative::Request, MessageBody::CalculateRoute { start, end, preferences }) => {
                    self.handle_route_request(&msg, start, end, &preferences);
                }
                (
                    Performative::Request,
                    MessageBody::FindEvacuationCenter { location, query, preferences },
                ) => {
                    self.spawn_evacuation_request(msg, location, query, preferences);
                }
                (performative, body) => {
                    warn!(
                        agent = %self.agent_id,
                        %performative,
                        tag = body.tag(),
                        from = %msg.sender,
                        "unhandled message"
                    );
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{defaults, LlmConfig, SystemConfig};
    use crate::environment::{Node, RoadGraph, SpatialIndex};
    use crate::types::{RouteStatus};

    fn setup() -> (RoutingAgent, Arc<MessageBus>) {
        let config = Arc::new(SystemConfig::default());
        let bus = Arc::new(MessageBus::new(&config.runtime));
        bus.register("routing_agent_001").unwrap();
        bus.register("orchestrator_main").unwrap();

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
        let graph = Arc::new(RoadGraph::from_parts(nodes, edges));
        let index = Arc::new(SpatialIndex::build(&graph, defaults::GRID_CELL_DEGREES));
        let planner = Arc::new(RoutePlanner::new(graph, index, Arc::clone(&config)));
        let llm = Arc::new(LlmService::new(LlmConfig { enabled: false, ..LlmConfig::default() }));

        let agent = RoutingAgent::new(
            "routing_agent_001",
            Arc::clone(&bus),
            planner,
            llm,
            CancellationToken::new(),
        );
        (agent, bus)
    }

    #[tokio::test]
    async fn calculate_route_replies_inline() {
        let (mut agent, bus) = setup();
        let request = AclMessage::request(
            "orchestrator_main",
            "routing_agent_001",
            MessageBody::CalculateRoute {
                start: GeoPoint::new(14.6500, 121.1000),
                end: GeoPoint::new(14.6500, 121.1014),
                preferences: RoutePreferences::default(),
            },
            Some("m1".into()),
        );
        bus.send(request).unwrap();

        agent.step().await;

        let reply = bus.try_receive("orchestrator_main").unwrap().unwrap();
        assert_eq!(reply.conversation_id.as_deref(), Some("m1"));
        match reply.body {
            MessageBody::RouteResult(route) => assert_eq!(route.status, RouteStatus::Success),
            other => panic!("unexpected reply {:?}", other.tag()),
        }
    }

    #[tokio::test]
    async fn invalid_location_yields_failure() {
        let (mut agent, bus) = setup();
        let request = AclMessage::request(
            "orchestrator_main",
            "routing_agent_001",
            MessageBody::CalculateRoute {
                start: GeoPoint::new(51.5, -0.12),
                end: GeoPoint::new(14.6500, 121.1014),
                preferences: RoutePreferences::default(),
            },
            Some("m2".into()),
        );
        bus.send(request).unwrap();

        agent.step().await;

        let reply = bus.try_receive("orchestrator_main").unwrap().unwrap();
        assert_eq!(reply.performative, Performative::Failure);
    }

    #[tokio::test]
    async fn evacuation_center_request_replies_async() {
        let (mut agent, bus) = setup();
        let request = AclMessage::request(
            "orchestrator_main",
            "routing_agent_001",
            MessageBody::FindEvacuationCenter {
                location: GeoPoint::new(14.6500, 121.1000),
                query: None,
                preferences: RoutePreferences::safest(),
            },
            Some("m3".into()),
        );
        bus.send(request).unwrap();

        agent.step().await;

        let mut reply = None;
        for _ in 0..50 {
            if let Some(msg) = bus.try_receive("orchestrator_main").unwrap() {
                reply = Some(msg);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let reply = reply.expect("no evacuation reply");
        assert!(matches!(reply.body, MessageBody::EvacuationCenterResult(_)));
    }
}
