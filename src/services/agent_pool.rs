//! Agent pool manager.
//!
//! Maintains between `min_agents` and `max_agents` worker slots with
//! priority-queued acquisition, demand- and queue-driven scale-up,
//! idle-driven scale-down, and a periodic health ticker that fails workers
//! stuck past the activity timeout.
//!
//! Queued acquisitions suspend on a oneshot handshake: when a worker frees
//! up it is handed to the highest-priority, oldest waiting request.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::errors::PoolError;
use crate::domain::models::{
    AgentRecord, AgentState, PoolConfig, PriorityQueue, SwarmConfig, TaskPriority, TaskRole,
};
use crate::services::event_bus::{EventBus, SwarmEvent};

/// How long shutdown waits for running workers to drain.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

/// Scaling-history entries retained.
const MAX_SCALE_HISTORY: usize = 100;

/// Aggregate health label for the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl PoolHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Critical => "critical",
        }
    }
}

/// What caused a scale event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleTrigger {
    /// A single worker spawned directly for an acquire with no idle worker
    Demand,
    /// Queue depth crossed the scale-up threshold
    QueueDepth,
    /// Idle workers aged past the scale-down threshold
    IdleTimeout,
    /// Replacement spawned after a failure dropped the pool below minimum
    Replacement,
}

/// One entry in the bounded scaling history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalingEvent {
    pub at: chrono::DateTime<Utc>,
    pub previous_count: usize,
    pub new_count: usize,
    pub reason: String,
    pub trigger: ScaleTrigger,
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub total_agents: usize,
    pub idle_agents: usize,
    pub running_agents: usize,
    pub queue_depth: usize,
    pub utilization: f64,
    pub health: PoolHealth,
    pub consecutive_failures: u32,
    pub scale_events: usize,
}

struct PendingAcquire {
    id: u64,
    role: TaskRole,
    task_id: Option<String>,
    tx: oneshot::Sender<Result<String, PoolError>>,
}

struct PoolInner {
    agents: HashMap<String, AgentRecord>,
    queue: PriorityQueue<PendingAcquire>,
    /// Serializes scale operations
    scaling: bool,
    next_request_id: u64,
    /// Consecutive release-with-failure events across the whole pool
    consecutive_failures: u32,
    /// Failures observed since the last health tick
    recent_failures: usize,
    history: Vec<ScalingEvent>,
    last_scale_at: Option<Instant>,
}

impl PoolInner {
    fn idle_count(&self) -> usize {
        self.agents.values().filter(|a| a.is_idle()).count()
    }

    fn running_count(&self) -> usize {
        self.agents.values().filter(|a| a.is_running()).count()
    }

    fn record_scale(
        &mut self,
        previous_count: usize,
        reason: impl Into<String>,
        trigger: ScaleTrigger,
    ) {
        self.history.push(ScalingEvent {
            at: Utc::now(),
            previous_count,
            new_count: self.agents.len(),
            reason: reason.into(),
            trigger,
        });
        if self.history.len() > MAX_SCALE_HISTORY {
            let excess = self.history.len() - MAX_SCALE_HISTORY;
            self.history.drain(..excess);
        }
    }

    fn health(&self) -> PoolHealth {
        let total = self.agents.len();
        let failed = self.recent_failures;
        let denom = total + failed;
        if denom == 0 {
            return PoolHealth::Healthy;
        }
        if failed * 2 > denom {
            return PoolHealth::Critical;
        }
        if failed * 5 > denom {
            return PoolHealth::Unhealthy;
        }
        #[allow(clippy::cast_precision_loss)]
        let utilization = if total == 0 {
            0.0
        } else {
            self.running_count() as f64 / total as f64
        };
        if utilization > 0.9 || self.queue.len() > 2 * total {
            return PoolHealth::Degraded;
        }
        PoolHealth::Healthy
    }
}

/// Bounded, auto-scaling worker pool with prioritized acquisition.
pub struct AgentPool {
    config: PoolConfig,
    agent_timeout_ms: u64,
    inner: Arc<Mutex<PoolInner>>,
    events: EventBus,
    shutting_down: Arc<AtomicBool>,
    excessive_failures: Arc<AtomicBool>,
    health_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AgentPool {
    /// Create a pool with `initial_agents` idle workers (clamped to the
    /// configured bounds).
    pub fn new(config: &SwarmConfig, events: EventBus) -> Self {
        let pool_config = config.pool.clone();
        let initial = pool_config
            .initial_agents
            .clamp(pool_config.min_agents, pool_config.max_agents);
        let mut agents = HashMap::new();
        for _ in 0..initial {
            let agent = AgentRecord::new(TaskRole::default());
            agents.insert(agent.id.clone(), agent);
        }
        info!(initial, "Agent pool initialized");
        Self {
            config: pool_config,
            agent_timeout_ms: config.agent_timeout_ms,
            inner: Arc::new(Mutex::new(PoolInner {
                agents,
                queue: PriorityQueue::new(),
                scaling: false,
                next_request_id: 0,
                consecutive_failures: 0,
                recent_failures: 0,
                history: Vec::new(),
                last_scale_at: None,
            })),
            events,
            shutting_down: Arc::new(AtomicBool::new(false)),
            excessive_failures: Arc::new(AtomicBool::new(false)),
            health_handle: Mutex::new(None),
        }
    }

    /// Spawn the periodic health ticker. Idempotent per pool instance:
    /// a prior ticker is replaced.
    pub async fn start_health_monitor(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let interval = Duration::from_millis(self.config.health_check_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it so the cadence
            // starts one interval from now.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if pool.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                pool.run_health_check().await;
            }
        });
        let mut slot = self.health_handle.lock().await;
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Acquire a worker for the given role and priority.
    ///
    /// Selection order: an idle worker with matching role, any idle worker,
    /// a freshly scaled-up worker when below the cap, else a priority-queued
    /// wait bounded by `timeout_ms` (default from config). Timed-out
    /// requests remove themselves from the queue.
    pub async fn acquire(
        &self,
        role: TaskRole,
        priority: TaskPriority,
        task_id: Option<String>,
        timeout_ms: Option<u64>,
    ) -> Result<String, PoolError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }

        let (request_id, rx) = {
            let mut inner = self.inner.lock().await;

            if let Some(agent_id) = Self::assign_idle(&mut inner, role, task_id.clone()) {
                return Ok(agent_id);
            }

            if inner.agents.len() < self.config.max_agents && !inner.scaling {
                let previous = inner.agents.len();
                let mut agent = AgentRecord::new(role);
                agent.assign(role, task_id);
                let agent_id = agent.id.clone();
                inner.agents.insert(agent_id.clone(), agent);
                inner.record_scale(previous, "no idle worker for acquire", ScaleTrigger::Demand);
                self.events.publish(SwarmEvent::ScaleUp {
                    previous_count: previous,
                    new_count: previous + 1,
                    reason: "acquire demand".to_string(),
                });
                debug!(agent_id = %agent_id, role = %role.as_str(), "Scaled up one worker for acquire");
                return Ok(agent_id);
            }

            let (tx, rx) = oneshot::channel();
            let request_id = inner.next_request_id;
            inner.next_request_id += 1;
            inner.queue.enqueue(
                PendingAcquire {
                    id: request_id,
                    role,
                    task_id,
                    tx,
                },
                priority.queue_rank(),
            );
            debug!(
                request_id,
                role = %role.as_str(),
                priority = %priority.as_str(),
                queue_depth = inner.queue.len(),
                "Acquire queued"
            );
            (request_id, rx)
        };

        let timeout = Duration::from_millis(timeout_ms.unwrap_or(self.config.acquire_timeout_ms));
        let mut rx = rx;
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PoolError::ShuttingDown),
            Err(_) => {
                let mut inner = self.inner.lock().await;
                let removed = inner.queue.remove_matching(|r| r.id == request_id);
                drop(inner);
                if removed.is_empty() {
                    // Served concurrently with the timeout; claim the worker
                    // the handshake already carries.
                    if let Ok(Ok(agent_id)) = rx.try_recv() {
                        debug!(request_id, agent_id = %agent_id, "Acquire raced its timeout; keeping worker");
                        return Ok(agent_id);
                    }
                }
                debug!(request_id, "Acquire timed out and was removed from the queue");
                #[allow(clippy::cast_possible_truncation)]
                Err(PoolError::AcquireTimeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Release a worker back to idle.
    ///
    /// Releasing an already-idle worker is a no-op. A queued request is
    /// served immediately when one is waiting, then a scale-down check runs.
    pub async fn release(&self, agent_id: &str, success: bool) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().await;
        let agent = inner
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| PoolError::AgentNotFound(agent_id.to_string()))?;
        if agent.is_idle() {
            return Ok(());
        }
        agent.finish(success);

        if success {
            inner.consecutive_failures = 0;
        } else {
            inner.consecutive_failures += 1;
            if inner.consecutive_failures == self.config.max_consecutive_failures {
                warn!(
                    consecutive = inner.consecutive_failures,
                    "Excessive consecutive failures"
                );
                self.excessive_failures.store(true, Ordering::SeqCst);
                self.events.publish(SwarmEvent::ExcessiveFailures {
                    consecutive_failures: inner.consecutive_failures,
                });
            }
        }

        Self::serve_queue(&mut inner);
        self.scale_down_check(&mut inner);
        Ok(())
    }

    /// Remove a failed worker; it is never reused. A replacement is spawned
    /// when the pool would drop below the minimum.
    pub async fn mark_agent_failed(&self, agent_id: &str, error: &str) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().await;
        self.fail_agent_locked(&mut inner, agent_id, error)
    }

    fn fail_agent_locked(
        &self,
        inner: &mut PoolInner,
        agent_id: &str,
        error: &str,
    ) -> Result<(), PoolError> {
        let mut agent = inner
            .agents
            .remove(agent_id)
            .ok_or_else(|| PoolError::AgentNotFound(agent_id.to_string()))?;
        agent.state = AgentState::Failed;
        inner.recent_failures += 1;
        warn!(agent_id = %agent_id, error = %error, "Worker marked failed and removed");
        self.events.publish(SwarmEvent::AgentFailed {
            agent_id: agent_id.to_string(),
            error: error.to_string(),
        });

        if inner.agents.len() < self.config.min_agents {
            let previous = inner.agents.len();
            let replacement = AgentRecord::new(TaskRole::default());
            debug!(agent_id = %replacement.id, "Spawned replacement worker");
            inner.agents.insert(replacement.id.clone(), replacement);
            inner.record_scale(previous, "replace failed worker", ScaleTrigger::Replacement);
            Self::serve_queue(inner);
        }
        Ok(())
    }

    /// One health pass: fail workers stuck past the activity timeout, then
    /// run scale checks. Exposed for tests; normally driven by the ticker.
    pub async fn run_health_check(&self) {
        let mut inner = self.inner.lock().await;
        inner.recent_failures = 0;

        let now = Utc::now();
        let stuck: Vec<String> = inner
            .agents
            .values()
            .filter(|a| a.is_running() && a.idle_ms(now) > self.agent_timeout_ms)
            .map(|a| a.id.clone())
            .collect();
        for agent_id in stuck {
            let _ = self.fail_agent_locked(
                &mut inner,
                &agent_id,
                &PoolError::AgentTimeout(agent_id.clone()).to_string(),
            );
        }

        self.scale_up_check(&mut inner);
        self.scale_down_check(&mut inner);
    }

    fn assign_idle(inner: &mut PoolInner, role: TaskRole, task_id: Option<String>) -> Option<String> {
        let pick = inner
            .agents
            .values()
            .filter(|a| a.is_idle())
            .find(|a| a.role == role)
            .map(|a| a.id.clone())
            .or_else(|| {
                inner
                    .agents
                    .values()
                    .find(|a| a.is_idle())
                    .map(|a| a.id.clone())
            })?;
        if let Some(agent) = inner.agents.get_mut(&pick) {
            agent.assign(role, task_id);
        }
        Some(pick)
    }

    /// Hand idle workers to waiting requests in priority order.
    fn serve_queue(inner: &mut PoolInner) {
        while inner.queue.peek().is_some() {
            if inner.idle_count() == 0 {
                break;
            }
            let Some(request) = inner.queue.dequeue() else {
                break;
            };
            // idle_count > 0 was checked under this same lock, so the
            // assignment cannot fail.
            let Some(agent_id) = Self::assign_idle(inner, request.role, request.task_id.clone())
            else {
                break;
            };
            if request.tx.send(Ok(agent_id.clone())).is_err() {
                // Receiver timed out concurrently; return the worker.
                if let Some(agent) = inner.agents.get_mut(&agent_id) {
                    agent.current_task_id = None;
                    agent.state = AgentState::Idle;
                }
                continue;
            }
            debug!(request_id = request.id, agent_id = %agent_id, "Queued acquire served");
        }
    }

    fn scale_up_check(&self, inner: &mut PoolInner) {
        if inner.scaling {
            return;
        }
        if inner.queue.len() < self.config.scale_up_threshold {
            return;
        }
        if inner.agents.len() >= self.config.max_agents {
            return;
        }
        if let Some(last) = inner.last_scale_at {
            if last.elapsed() < Duration::from_millis(self.config.cooldown_ms) {
                return;
            }
        }

        inner.scaling = true;
        let previous = inner.agents.len();
        let desired = inner
            .queue
            .len()
            .saturating_sub(inner.idle_count())
            .min(self.config.max_agents - previous);
        for _ in 0..desired {
            let agent = AgentRecord::new(TaskRole::default());
            inner.agents.insert(agent.id.clone(), agent);
        }
        inner.last_scale_at = Some(Instant::now());
        inner.scaling = false;

        if desired > 0 {
            let reason = format!("queue depth {}", inner.queue.len());
            inner.record_scale(previous, reason.clone(), ScaleTrigger::QueueDepth);
            info!(previous, new = inner.agents.len(), %reason, "Scaled up");
            self.events.publish(SwarmEvent::ScaleUp {
                previous_count: previous,
                new_count: inner.agents.len(),
                reason,
            });
            Self::serve_queue(inner);
        }
    }

    fn scale_down_check(&self, inner: &mut PoolInner) {
        if inner.scaling || inner.agents.len() <= self.config.min_agents {
            return;
        }
        let now = Utc::now();
        let mut victims: Vec<(String, chrono::DateTime<Utc>)> = inner
            .agents
            .values()
            .filter(|a| a.is_idle() && a.idle_ms(now) > self.config.scale_down_threshold_ms)
            .map(|a| (a.id.clone(), a.last_activity))
            .collect();
        if victims.is_empty() {
            return;
        }
        // Oldest idle first
        victims.sort_by_key(|(_, last_activity)| *last_activity);

        let previous = inner.agents.len();
        let mut removed = 0;
        for (agent_id, _) in victims {
            if inner.agents.len() <= self.config.min_agents {
                break;
            }
            if let Some(mut agent) = inner.agents.remove(&agent_id) {
                agent.state = AgentState::Stopped;
                removed += 1;
            }
        }
        if removed > 0 {
            let reason = format!("{removed} workers idle past threshold");
            inner.record_scale(previous, reason.clone(), ScaleTrigger::IdleTimeout);
            info!(previous, new = inner.agents.len(), %reason, "Scaled down");
            self.events.publish(SwarmEvent::ScaleDown {
                previous_count: previous,
                new_count: inner.agents.len(),
                reason,
            });
        }
    }

    /// Snapshot every worker record (for checkpoints and status).
    pub async fn agent_snapshots(&self) -> Vec<AgentRecord> {
        let inner = self.inner.lock().await;
        let mut agents: Vec<AgentRecord> = inner.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Point-in-time statistics, including the health label.
    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        let total = inner.agents.len();
        let running = inner.running_count();
        #[allow(clippy::cast_precision_loss)]
        let utilization = if total == 0 {
            0.0
        } else {
            running as f64 / total as f64
        };
        PoolStats {
            total_agents: total,
            idle_agents: inner.idle_count(),
            running_agents: running,
            queue_depth: inner.queue.len(),
            utilization,
            health: inner.health(),
            consecutive_failures: inner.consecutive_failures,
            scale_events: inner.history.len(),
        }
    }

    /// Health label per the documented thresholds.
    pub async fn health_status(&self) -> PoolHealth {
        self.inner.lock().await.health()
    }

    /// The bounded scaling history, oldest first.
    pub async fn scaling_history(&self) -> Vec<ScalingEvent> {
        self.inner.lock().await.history.clone()
    }

    /// Consume the excessive-failures signal if one is pending.
    pub fn take_excessive_failures_signal(&self) -> bool {
        self.excessive_failures.swap(false, Ordering::SeqCst)
    }

    /// Stop the ticker, reject queued requests, drain running workers for
    /// up to 30 s, then force-remove the rest. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.health_handle.lock().await.take() {
            handle.abort();
        }
        {
            let mut inner = self.inner.lock().await;
            for request in inner.queue.drain_all() {
                let _ = request.tx.send(Err(PoolError::ShuttingDown));
            }
        }

        let deadline = Instant::now() + SHUTDOWN_DRAIN;
        loop {
            {
                let inner = self.inner.lock().await;
                if inner.running_count() == 0 {
                    break;
                }
            }
            if Instant::now() >= deadline {
                warn!("Shutdown drain deadline reached; removing running workers");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let mut inner = self.inner.lock().await;
        for agent in inner.agents.values_mut() {
            agent.state = AgentState::Stopped;
        }
        inner.agents.clear();
        info!("Agent pool shut down");
        self.events.publish(SwarmEvent::PoolShutdown);
    }
}
