//! Agent Lifecycle Scheduler
//!
//! A single scheduler task invokes each agent's `step()` in priority order
//! (lower first) every tick period. Agents are held behind async mutexes:
//! a step still running when the next tick arrives is simply skipped for
//! that agent, so invocations of the same agent never overlap and a slow
//! step costs at most one missed tick (delayed, not bursted).
//!
//! A global pause predicate can suspend ticking entirely (simulation
//! control). `stop()` cancels the scheduler, waits for the in-flight tick
//! cycle to finish, and propagates cancellation to agent worker tasks
//! through the shared token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::Agent;

type SharedAgent = Arc<Mutex<dyn Agent + Send>>;
type PausePredicate = Arc<dyn Fn() -> bool + Send + Sync>;

struct ScheduledAgent {
    id: String,
    priority: u8,
    handle: SharedAgent,
}

pub struct AgentLifecycleScheduler {
    agents: Vec<ScheduledAgent>,
    tick_interval: Duration,
    pause_predicate: Option<PausePredicate>,
    cancel: CancellationToken,
    tick_count: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl AgentLifecycleScheduler {
    pub fn new(tick_interval_seconds: f64, cancel: CancellationToken) -> Self {
        Self {
            agents: Vec::new(),
            tick_interval: Duration::from_secs_f64(tick_interval_seconds.max(0.01)),
            pause_predicate: None,
            cancel,
            tick_count: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    /// Register an agent with a priority (lower runs first).
    pub fn register_agent(&mut self, agent_id: impl Into<String>, agent: SharedAgent, priority: u8) {
        let id = agent_id.into();
        info!(agent = %id, priority, "agent registered with scheduler");
        self.agents.push(ScheduledAgent { id, priority, handle: agent });
        self.agents.sort_by_key(|a| a.priority);
    }

    /// Install a global pause predicate; while it returns true, whole ticks
    /// are skipped.
    pub fn set_pause_predicate(&mut self, predicate: PausePredicate) {
        self.pause_predicate = Some(predicate);
    }

    /// Ticks executed so far (liveness signal for the health endpoint).
    pub fn tick_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.tick_count)
    }

    /// Start the scheduler task. No-op when already running.
    pub fn start(&mut self) {
        if self.task.is_some() {
            warn!("scheduler already started");
            return;
        }
        let agents: Vec<(String, SharedAgent)> =
            self.agents.iter().map(|a| (a.id.clone(), Arc::clone(&a.handle))).collect();
        let tick_interval = self.tick_interval;
        let pause = self.pause_predicate.clone();
        let cancel = self.cancel.clone();
        let tick_count = Arc::clone(&self.tick_count);

        info!(
            agents = agents.len(),
            tick_seconds = tick_interval.as_secs_f64(),
            "agent lifecycle scheduler started"
        );

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            // A late tick fires once, then the cadence resets: at most one
            // catch-up, never a burst
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("scheduler cancelled, exiting after in-flight cycle");
                        break;
                    }
                    _ = interval.tick() => {}
                }

                if pause.as_ref().map_or(false, |p| p()) {
                    debug!("scheduler paused by simulation control");
                    continue;
                }

                tick_count.fetch_add(1, Ordering::Relaxed);
                for (id, agent) in &agents {
                    // Same-agent steps must never overlap: skip while busy
                    match agent.try_lock() {
                        Ok(mut guard) => guard.step().await,
                        Err(_) => {
                            debug!(agent = %id, "previous step still running, tick skipped");
                        }
                    }
                }
            }
        }));
    }

    /// Stop the scheduler: cancel, then wait for the in-flight tick cycle.
    /// No new ticks start after this begins.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "scheduler task join failed");
            }
        }
        info!(ticks = self.tick_count.load(Ordering::Relaxed), "scheduler stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingAgent {
        id: String,
        steps: Arc<AtomicUsize>,
        order_log: Arc<std::sync::Mutex<Vec<String>>>,
        delay: Duration,
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn agent_id(&self) -> &str {
            &self.id
        }

        async fn step(&mut self) {
            self.steps.fetch_add(1, Ordering::SeqCst);
            self.order_log.lock().unwrap().push(self.id.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
    }

    fn counting_agent(
        id: &str,
        order_log: Arc<std::sync::Mutex<Vec<String>>>,
        delay: Duration,
    ) -> (Arc<Mutex<dyn Agent + Send>>, Arc<AtomicUsize>) {
        let steps = Arc::new(AtomicUsize::new(0));
        let agent = CountingAgent {
            id: id.to_string(),
            steps: Arc::clone(&steps),
            order_log,
            delay,
        };
        (Arc::new(Mutex::new(agent)), steps)
    }

    #[tokio::test]
    async fn ticks_run_agents_in_priority_order() {
        let order_log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (first, first_steps) = counting_agent("first", Arc::clone(&order_log), Duration::ZERO);
        let (second, second_steps) =
            counting_agent("second", Arc::clone(&order_log), Duration::ZERO);

        let cancel = CancellationToken::new();
        let mut scheduler = AgentLifecycleScheduler::new(0.02, cancel);
        // Register out of order; priority must win
        scheduler.register_agent("second", second, 5);
        scheduler.register_agent("first", first, 0);
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        assert!(first_steps.load(Ordering::SeqCst) >= 2);
        assert!(second_steps.load(Ordering::SeqCst) >= 2);

        let log = order_log.lock().unwrap();
        let first_pos = log.iter().position(|i| i == "first").unwrap();
        let second_pos = log.iter().position(|i| i == "second").unwrap();
        assert!(first_pos < second_pos);
    }

    #[tokio::test]
    async fn no_ticks_after_stop() {
        let order_log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (agent, steps) = counting_agent("only", order_log, Duration::ZERO);

        let cancel = CancellationToken::new();
        let mut scheduler = AgentLifecycleScheduler::new(0.02, cancel);
        scheduler.register_agent("only", agent, 0);
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.stop().await;
        let after_stop = steps.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(steps.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn pause_predicate_suspends_ticks() {
        let order_log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (agent, steps) = counting_agent("paused", order_log, Duration::ZERO);

        let cancel = CancellationToken::new();
        let mut scheduler = AgentLifecycleScheduler::new(0.02, cancel);
        scheduler.register_agent("paused", agent, 0);
        scheduler.set_pause_predicate(Arc::new(|| true));
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(80)).await;
        scheduler.stop().await;
        assert_eq!(steps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_agent_does_not_overlap_itself() {
        let order_log = Arc::new(std::sync::Mutex::new(Vec::new()));
        // Step takes 3 tick periods; overlapping invocations would push the
        // step count far past what sequential execution allows
        let (agent, steps) = counting_agent("slow", order_log, Duration::from_millis(60));

        let cancel = CancellationToken::new();
        let mut scheduler = AgentLifecycleScheduler::new(0.02, cancel);
        scheduler.register_agent("slow", agent, 0);
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.stop().await;

        let count = steps.load(Ordering::SeqCst);
        assert!(count >= 2, "got {count}");
        assert!(count <= 5, "steps overlapped: {count}");
    }
}
