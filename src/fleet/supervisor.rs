//! Fleet supervisor
//!
//! Owns every agent/session pair, brings them up with staggered connects,
//! routes transport events to the right session, drives the scheduler from
//! a single event loop and publishes a health snapshot after every change.
//!
//! All session mutation happens on the task running [`Supervisor::run`], so
//! no session is ever touched from two places at once.

use super::scheduler::{Scheduler, TickSummary};
use super::{AgentSpec, FleetUnit, FleetUnits};
use crate::agent::Agent;
use crate::config::FleetConfig;
use crate::error::{FleetError, FleetResult};
use crate::lifecycle_span;
use crate::observability::metrics::metrics;
use crate::protocol::codec::check_agent_id;
use crate::protocol::{epoch_seconds_now, Position};
use crate::session::{Session, SessionConfig, SessionSnapshot, SessionStateKind};
use crate::transport::{
    event_channel, EventReceiver, EventSender, SessionEvent, Transport, TransportFactory,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Timing and limits for a fleet
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSettings {
    pub tick_interval: Duration,
    pub timer_resolution: Duration,
    pub connect_stagger: Duration,
    pub max_concurrent_connects: usize,
    pub session: SessionConfig,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            timer_resolution: Duration::from_millis(250),
            connect_stagger: Duration::from_millis(200),
            max_concurrent_connects: 8,
            session: SessionConfig::default(),
        }
    }
}

/// Shortest cadence or timer period the run loop accepts
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

impl SupervisorSettings {
    /// Raise zero periods to [`MIN_INTERVAL`]; `tokio::time::interval`
    /// panics on a zero period
    pub fn normalized(mut self) -> Self {
        self.tick_interval = self.tick_interval.max(MIN_INTERVAL);
        self.timer_resolution = self.timer_resolution.max(MIN_INTERVAL);
        self
    }
}

impl From<&FleetConfig> for SupervisorSettings {
    fn from(config: &FleetConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            timer_resolution: config.timer_resolution(),
            connect_stagger: config.connect_stagger(),
            max_concurrent_connects: config.scheduler.max_concurrent_connects,
            session: config.session_config(),
        }
    }
}

/// Overall fleet condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FleetStatus {
    /// Every session is connected
    Healthy,
    /// Some sessions are connected
    Degraded,
    /// No session is connected
    Down,
    /// Not started, or shut down
    Stopped,
}

/// Health of one agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentHealth {
    pub display_name: String,
    pub position: Position,
    #[serde(flatten)]
    pub session: SessionSnapshot,
}

/// Read-only fleet snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetHealth {
    pub status: FleetStatus,
    pub total_agents: usize,
    pub connected: usize,
    pub queued_frames: usize,
    pub agents: Vec<AgentHealth>,
    pub timestamp: DateTime<Utc>,
}

impl FleetHealth {
    /// Snapshot of a fleet with no agents
    pub fn empty() -> Self {
        Self {
            status: FleetStatus::Stopped,
            total_agents: 0,
            connected: 0,
            queued_frames: 0,
            agents: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_fully_connected(&self) -> bool {
        self.status == FleetStatus::Healthy
    }

    pub fn any_connected(&self) -> bool {
        self.connected > 0
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentHealth> {
        self.agents.iter().find(|a| a.session.agent_id == agent_id)
    }
}

/// Cloneable remote control for a running supervisor
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    shutdown: Arc<watch::Sender<bool>>,
    health: watch::Receiver<FleetHealth>,
}

impl SupervisorHandle {
    /// Ask the run loop to stop; it shuts every session down on its way out
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Latest published snapshot
    pub fn health(&self) -> FleetHealth {
        self.health.borrow().clone()
    }

    /// Receiver for snapshot updates
    pub fn subscribe(&self) -> watch::Receiver<FleetHealth> {
        self.health.clone()
    }
}

pub struct Supervisor<T: Transport> {
    settings: SupervisorSettings,
    units: FleetUnits<T>,
    scheduler: Scheduler,
    /// Agents still waiting for their first connect, in start order
    startup: VecDeque<(Instant, String)>,
    events_tx: EventSender,
    events_rx: Option<EventReceiver>,
    health_tx: watch::Sender<FleetHealth>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    started: bool,
    stopped: bool,
}

impl<T: Transport> Supervisor<T> {
    pub fn new(settings: SupervisorSettings) -> Self {
        let settings = settings.normalized();
        let (events_tx, events_rx) = event_channel();
        let (health_tx, _) = watch::channel(FleetHealth::empty());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            scheduler: Scheduler::new(settings.max_concurrent_connects),
            settings,
            units: FleetUnits::new(),
            startup: VecDeque::new(),
            events_tx,
            events_rx: Some(events_rx),
            health_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            started: false,
            stopped: false,
        }
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            shutdown: Arc::clone(&self.shutdown_tx),
            health: self.health_tx.subscribe(),
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn units(&self) -> &FleetUnits<T> {
        &self.units
    }

    pub fn session(&self, agent_id: &str) -> Option<&Session<T>> {
        self.units.get(agent_id).map(|unit| &unit.session)
    }

    pub fn agent(&self, agent_id: &str) -> Option<&Agent> {
        self.units.get(agent_id).map(|unit| &unit.agent)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Agents whose first connect has not happened yet
    pub fn pending_startups(&self) -> usize {
        self.startup.len()
    }

    /// Build one agent and session per `AgentSpec` and schedule their first
    /// connects `connect_stagger` apart, the first one at `now`.
    ///
    /// Specs are validated as a whole before anything is built.
    pub fn start<F>(&mut self, specs: Vec<AgentSpec>, factory: &F, now: Instant) -> FleetResult<()>
    where
        F: TransportFactory<Transport = T>,
    {
        let span = lifecycle_span!(phase = "start", agents = specs.len());
        let _enter = span.enter();

        if self.started {
            return Err(FleetError::internal("supervisor already started"));
        }
        validate_specs(&specs)?;

        let mut units = FleetUnits::new();
        for spec in &specs {
            let transport = factory.create(&spec.id, self.events_tx.clone())?;
            let session = Session::new(spec.id.clone(), self.settings.session.clone(), transport)
                .with_display_name(spec.display_name.clone());
            let agent = Agent::new(spec.id.clone(), spec.display_name.clone(), spec.position);
            units.insert(spec.id.clone(), FleetUnit { agent, session });
        }

        self.units = units;
        self.started = true;
        self.startup = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| (now + stagger_offset(self.settings.connect_stagger, i), spec.id))
            .collect();

        info!(
            agents = self.units.len(),
            stagger_ms = self.settings.connect_stagger.as_millis() as u64,
            "Fleet started"
        );
        self.poll_startup(now);
        self.publish_health();
        Ok(())
    }

    /// Issue first connects that have come due, within the concurrency
    /// limit. Returns how many were issued.
    pub fn poll_startup(&mut self, now: Instant) -> usize {
        let mut issued = 0;
        while let Some((due, _)) = self.startup.front() {
            if *due > now || self.scheduler.available_permits(&self.units) == 0 {
                break;
            }
            let Some((_, agent_id)) = self.startup.pop_front() else {
                break;
            };
            if let Some(unit) = self.units.get_mut(&agent_id) {
                if unit.session.connect(now) {
                    issued += 1;
                }
            }
        }
        issued
    }

    /// One cadence tick
    pub fn tick(&mut self, now: Instant, epoch_seconds: u32) -> TickSummary {
        if self.stopped {
            return TickSummary::default();
        }
        let summary = self.scheduler.tick(&mut self.units, now, epoch_seconds);
        self.poll_startup(now);
        self.publish_health();
        summary
    }

    /// Timer-resolution step between ticks: due startups and reconnects
    pub fn advance(&mut self, now: Instant) -> TickSummary {
        if self.stopped {
            return TickSummary::default();
        }
        self.poll_startup(now);
        let summary = self.scheduler.advance_sessions(&mut self.units, now);
        if summary.reconnects_started > 0 {
            self.publish_health();
        }
        summary
    }

    /// Route one transport event to its session
    pub fn deliver(&mut self, event: SessionEvent, now: Instant) -> bool {
        if self.stopped {
            return false;
        }
        match self.units.get_mut(&event.agent_id) {
            Some(unit) => unit.session.deliver(event, now),
            None => {
                debug!(agent_id = %event.agent_id, "Event for unknown agent dropped");
                false
            }
        }
    }

    /// Deliver every event already waiting, without blocking. Returns how
    /// many were applied.
    pub fn process_pending_events(&mut self, now: Instant) -> usize {
        let Some(mut events) = self.events_rx.take() else {
            return 0;
        };
        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            if self.deliver(event, now) {
                applied += 1;
            }
        }
        self.events_rx = Some(events);
        if applied > 0 {
            self.publish_health();
        }
        applied
    }

    /// Drive the fleet until shutdown is requested through a
    /// [`SupervisorHandle`], then shut every session down
    pub async fn run(&mut self) -> FleetResult<()> {
        let mut events = self
            .events_rx
            .take()
            .ok_or_else(|| FleetError::internal("supervisor is already running"))?;
        let mut shutdown_rx = self.shutdown_rx.clone();

        let mut cadence = tokio::time::interval(self.settings.tick_interval);
        cadence.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut timers = tokio::time::interval(self.settings.timer_resolution);
        timers.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            tick_interval_ms = self.settings.tick_interval.as_millis() as u64,
            "Fleet run loop started"
        );

        while !*shutdown_rx.borrow() {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(event) = events.recv() => {
                    if self.deliver(event, Instant::now()) {
                        self.publish_health();
                    }
                }
                _ = cadence.tick() => {
                    self.tick(Instant::now(), epoch_seconds_now());
                }
                _ = timers.tick() => {
                    self.advance(Instant::now());
                }
            }
        }

        self.events_rx = Some(events);
        self.shutdown();
        info!("Fleet run loop stopped");
        Ok(())
    }

    /// Shut every session down. Safe at any point and idempotent.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        let span = lifecycle_span!(phase = "shutdown", agents = self.units.len());
        let _enter = span.enter();

        self.stopped = true;
        self.startup.clear();
        for unit in self.units.values_mut() {
            unit.session.shutdown();
        }
        let _ = self.shutdown_tx.send(true);
        self.publish_health();
        info!("Fleet shut down");
    }

    /// Current snapshot
    pub fn health(&self) -> FleetHealth {
        let agents: Vec<AgentHealth> = self
            .units
            .values()
            .map(|unit| AgentHealth {
                display_name: unit.agent.display_name().to_string(),
                position: unit.agent.current_position(),
                session: unit.session.snapshot(),
            })
            .collect();

        let total_agents = agents.len();
        let connected = agents
            .iter()
            .filter(|a| a.session.state == SessionStateKind::Connected)
            .count();
        let queued_frames = agents.iter().map(|a| a.session.queue_depth).sum();

        let status = if self.stopped || total_agents == 0 {
            FleetStatus::Stopped
        } else if connected == total_agents {
            FleetStatus::Healthy
        } else if connected > 0 {
            FleetStatus::Degraded
        } else {
            FleetStatus::Down
        };

        FleetHealth {
            status,
            total_agents,
            connected,
            queued_frames,
            agents,
            timestamp: Utc::now(),
        }
    }

    fn publish_health(&self) {
        let health = self.health();
        metrics().set_session_gauges(health.connected, health.total_agents);
        self.health_tx.send_replace(health);
    }
}

impl<T: Transport> Drop for Supervisor<T> {
    fn drop(&mut self) {
        if !self.stopped && self.started {
            warn!("Supervisor dropped without shutdown, closing sessions");
            self.shutdown();
        }
    }
}

fn stagger_offset(stagger: Duration, index: usize) -> Duration {
    stagger.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX))
}

/// Reject an `AgentSpec` list the fleet could not run
fn validate_specs(specs: &[AgentSpec]) -> FleetResult<()> {
    if specs.is_empty() {
        return Err(FleetError::NoAgents);
    }

    let mut seen = HashSet::new();
    for spec in specs {
        check_agent_id(&spec.id)?;
        if !seen.insert(spec.id.as_str()) {
            return Err(FleetError::DuplicateAgent {
                agent_id: spec.id.clone(),
            });
        }
        if !spec.position.is_valid() {
            return Err(FleetError::InvalidPosition {
                agent_id: spec.id.clone(),
                latitude: spec.position.latitude_deg,
                longitude: spec.position.longitude_deg,
            });
        }
    }
    Ok(())
}
