//! Cycle controller - runs one wake cycle against the retained state

use crate::config::CycleTimeouts;
use crate::connection::{ConfigSource, Link};
use crate::sensor::MeasurementSource;
use crate::transport::{Delivery, DeliveryStrategy, PointWriter};
use ldr_shared::state_machine::{CycleEvent, CyclePhase, CycleStateMachine, TransitionResult};
use ldr_shared::{
    apply_update, series, Measurement, NodeError, Point, RetainedState, RetainedStats,
    UpdateOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Summary of one wake cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Phase reached; always `Sleeping` once the cycle returns
    pub phase: CyclePhase,
    /// True if the link failed and everything after it was skipped
    pub exited_early: bool,
    /// Configuration updates that changed the retained config
    pub config_changes: usize,
    /// Normalized value measured this cycle
    pub measured: Option<f64>,
    /// Strategy that delivered the measurement
    pub delivered_via: Option<&'static str>,
    /// True if this cycle counted a miss
    pub missed: bool,
    /// True if statistics were flushed and reset
    pub flushed: bool,
    /// Time to sleep before the next wake
    pub next_wake: Duration,
}

/// Counts at most one miss per cycle, however many failures occur
#[derive(Debug, Default)]
struct MissLatch {
    latched: bool,
}

impl MissLatch {
    fn record(&mut self, stats: &mut RetainedStats, cause: &NodeError) {
        if !cause.counts_as_miss() {
            debug!("Not a missed transmission: {}", cause);
            return;
        }
        warn!("Missed transmission: {}", cause);
        if !self.latched {
            stats.record_miss();
            self.latched = true;
        }
    }
}

/// Orchestrates link, config sync, measurement, delivery and accounting
pub struct CycleController {
    node_id: String,
    timeouts: CycleTimeouts,
    link: Box<dyn Link>,
    config_source: Box<dyn ConfigSource>,
    sensor: Box<dyn MeasurementSource>,
    strategies: Vec<Box<dyn DeliveryStrategy>>,
    stats_writer: Arc<dyn PointWriter>,
}

impl CycleController {
    /// Create a new cycle controller
    ///
    /// `strategies` are tried in order; `stats_writer` receives the periodic flush.
    pub fn new(
        node_id: impl Into<String>,
        timeouts: CycleTimeouts,
        link: Box<dyn Link>,
        config_source: Box<dyn ConfigSource>,
        sensor: Box<dyn MeasurementSource>,
        strategies: Vec<Box<dyn DeliveryStrategy>>,
        stats_writer: Arc<dyn PointWriter>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            timeouts,
            link,
            config_source,
            sensor,
            strategies,
            stats_writer,
        }
    }

    /// Run one cycle from Boot to Sleeping
    ///
    /// `state` is the only thing carried over from the previous wake; the
    /// caller persists it before powering down.
    pub async fn run_cycle(&mut self, state: &mut RetainedState) -> CycleReport {
        let started = Instant::now();
        let mut fsm = CycleStateMachine::new();
        let mut misses = MissLatch::default();
        let mut report = CycleReport {
            phase: CyclePhase::Boot,
            exited_early: false,
            config_changes: 0,
            measured: None,
            delivered_via: None,
            missed: false,
            flushed: false,
            next_wake: Duration::ZERO,
        };

        // Boot -> NetworkUp
        if let Err(e) = self.bring_up_link().await {
            misses.record(&mut state.stats, &e);
            advance(&mut fsm, CycleEvent::LinkFailed);
            return self.finish(fsm, report, misses, state, started);
        }
        advance(&mut fsm, CycleEvent::LinkUp);

        // NetworkUp -> ConfigSynced
        report.config_changes = self.sync_config(state).await;
        advance(&mut fsm, CycleEvent::ConfigSessionEnded);

        // ConfigSynced -> Measured
        let value = match self.sensor.read() {
            Ok(value) => value,
            Err(e) => {
                // Not a transmission miss; nothing is sent this cycle
                warn!("{}, skipping delivery", e);
                advance(&mut fsm, CycleEvent::ReadFailed);
                return self.finish(fsm, report, misses, state, started);
            }
        };
        report.measured = Some(value);
        advance(&mut fsm, CycleEvent::MeasurementTaken);

        // Measured -> Delivered
        let measurement = Measurement::new(&self.node_id, state.config.position(), value);
        match self.deliver(&measurement).await {
            Ok(delivery) => {
                report.delivered_via = Some(delivery.channel);
                if let Some(latency) = delivery.latency {
                    if latency < self.timeouts.ack {
                        state.stats.record_latency(latency);
                    }
                }
            }
            Err(e) => misses.record(&mut state.stats, &e),
        }
        advance(&mut fsm, CycleEvent::DeliveryFinished);

        // Delivered -> Accounted
        if state.stats.flush_due(state.config.sampling_interval()) {
            match self.flush(&state.stats).await {
                Ok(()) => {
                    state.stats.reset_after_flush();
                    report.flushed = true;
                }
                // Accumulators stay intact for the next eligible cycle
                Err(e) => misses.record(&mut state.stats, &e),
            }
        }
        advance(&mut fsm, CycleEvent::AccountingDone);

        self.finish(fsm, report, misses, state, started)
    }

    async fn bring_up_link(&self) -> Result<(), NodeError> {
        match timeout(self.timeouts.link, self.link.bring_up()).await {
            Ok(Ok(())) => {
                debug!("Link {} up", self.link.name());
                Ok(())
            }
            Ok(Err(e)) => Err(NodeError::Connectivity(format!("{:#}", e))),
            Err(_) => Err(NodeError::Connectivity(format!(
                "link {} not up within {:?}",
                self.link.name(),
                self.timeouts.link
            ))),
        }
    }

    /// Apply every update received; returns how many changed the config
    async fn sync_config(&mut self, state: &mut RetainedState) -> usize {
        let updates = match self.config_source.sync().await {
            Ok(updates) => updates,
            Err(e) => {
                warn!("{}, keeping retained configuration", e);
                return 0;
            }
        };

        let mut changes = 0;
        for update in &updates {
            match apply_update(&mut state.config, update) {
                Ok(UpdateOutcome::SamplingInterval(interval)) => {
                    changes += 1;
                    info!("Sampling interval set to {:?}", interval);
                    if !self.timeouts.fits_within(interval) {
                        warn!(
                            "Sampling interval {:?} is shorter than the worst-case cycle {:?}",
                            interval,
                            self.timeouts.worst_case()
                        );
                    }
                }
                Ok(UpdateOutcome::Position(position)) => {
                    changes += 1;
                    info!("Position set to {:?}", position);
                }
                Ok(UpdateOutcome::Unchanged) => {
                    debug!("Config update {:?} unchanged", update.topic);
                }
                Err(e) => warn!("Discarding config update {:?}: {}", update.topic, e),
            }
        }
        changes
    }

    /// Try each strategy in order; the last failure is returned if all fail
    async fn deliver(&self, measurement: &Measurement) -> Result<Delivery, NodeError> {
        let mut last_error = NodeError::FallbackWrite("no delivery strategy configured".into());

        for strategy in &self.strategies {
            match strategy.attempt(measurement).await {
                Ok(delivery) => return Ok(delivery),
                Err(e) => {
                    warn!("Delivery via {} failed: {}", strategy.name(), e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Report mean latency and miss count; both writes must succeed
    async fn flush(&self, stats: &RetainedStats) -> Result<(), NodeError> {
        let mean = stats.mean_latency_ms().unwrap_or(0.0);
        let points = [
            Point::sensor(
                series::MEAN_LATENCY_MEASUREMENT,
                &self.node_id,
                series::MEAN_LATENCY_FIELD,
                mean,
            ),
            Point::sensor(
                series::MISS_MEASUREMENT,
                &self.node_id,
                series::MISS_FIELD,
                stats.missed_tx() as f64,
            ),
        ];

        for point in &points {
            self.stats_writer
                .write_point(point)
                .await
                .map_err(|e| NodeError::StatsFlush(format!("{}: {:#}", point.measurement, e)))?;
        }

        info!(
            mean_latency_ms = mean,
            samples = stats.latency_count(),
            missed = stats.missed_tx(),
            "Statistics flushed"
        );
        Ok(())
    }

    fn finish(
        &self,
        mut fsm: CycleStateMachine,
        mut report: CycleReport,
        misses: MissLatch,
        state: &RetainedState,
        started: Instant,
    ) -> CycleReport {
        if !fsm.exited_early() {
            advance(&mut fsm, CycleEvent::SleepScheduled);
        }

        // Interval read after the config sync, so an update applies immediately
        let interval = state.config.sampling_interval();
        report.next_wake = interval.saturating_sub(started.elapsed());
        report.phase = fsm.phase();
        report.exited_early = fsm.exited_early();
        report.missed = misses.latched;

        info!(
            phase = ?report.phase,
            delivered_via = report.delivered_via.unwrap_or("none"),
            missed = report.missed,
            missed_tx = state.stats.missed_tx(),
            next_wake_ms = report.next_wake.as_millis() as u64,
            "Cycle complete"
        );
        report
    }
}

fn advance(fsm: &mut CycleStateMachine, event: CycleEvent) {
    if let TransitionResult::Invalid { from, event } = fsm.process_event(event) {
        warn!("Invalid cycle transition: {:?} on {:?}", from, event);
    }
}
