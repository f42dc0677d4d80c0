//! Crossing runtime
//!
//! One tick, in order:
//! 1. drain the sensor link (buttons, transit latch, channel readings)
//! 2. merge link latches with operator commands into triggers
//! 3. fuse vision and hall readings into demand
//! 4. advance the phase controller
//! 5. push lights and button feedback back to the hardware
//!
//! `tick` is synchronous and never waits on vision; `run` drives it at the
//! configured rate inside tokio.

use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::CrossingConfig;
use crate::core::aggregator::PersonCountAggregator;
use crate::core::controller::PhaseController;
use crate::core::link::{LineTransport, SensorLink};
use crate::core::presentation::PresentationAdapter;
use crate::core::vision::{VisionFeed, VisionWorker};
use crate::error::ConfigError;
use crate::types::{CrossingSnapshot, PhaseEvent, Triggers};

/// Upper bound on waiting for the vision worker at shutdown
pub const VISION_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Keyboard / API equivalents of the physical inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Start,
    Transit,
    SlowToggle,
    Shutdown,
}

impl OperatorCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorCommand::Start => "start",
            OperatorCommand::Transit => "transit",
            OperatorCommand::SlowToggle => "slow",
            OperatorCommand::Shutdown => "quit",
        }
    }

    fn triggers(&self) -> Triggers {
        match self {
            OperatorCommand::Start => Triggers {
                manual_start: true,
                ..Triggers::none()
            },
            OperatorCommand::Transit => Triggers {
                transit: true,
                ..Triggers::none()
            },
            OperatorCommand::SlowToggle => Triggers {
                slow_toggle: true,
                ..Triggers::none()
            },
            OperatorCommand::Shutdown => Triggers::none(),
        }
    }
}

impl FromStr for OperatorCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" | "s" | "1" => Ok(OperatorCommand::Start),
            "transit" | "t" | "tram" => Ok(OperatorCommand::Transit),
            "slow" | "l" | "2" => Ok(OperatorCommand::SlowToggle),
            "quit" | "q" | "exit" => Ok(OperatorCommand::Shutdown),
            other => Err(format!("unknown command: {}", other)),
        }
    }
}

impl std::fmt::Display for OperatorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The whole installation: controller, demand fusion, hardware and vision
pub struct Crossing<T: LineTransport> {
    controller: PhaseController,
    aggregator: PersonCountAggregator,
    presentation: PresentationAdapter,
    link: Option<SensorLink<T>>,
    vision: VisionFeed,
    worker: Option<VisionWorker>,
    tick: u64,
    vision_was_present: bool,
}

impl<T: LineTransport> Crossing<T> {
    /// Build a crossing in Idle. Invalid configuration is fatal.
    pub fn new(
        config: CrossingConfig,
        link: Option<SensorLink<T>>,
        vision: VisionFeed,
    ) -> Result<Self, ConfigError> {
        let aggregator = PersonCountAggregator::new(&config);
        let presentation = PresentationAdapter::new(&config);
        let controller = PhaseController::new(config)?;
        if link.is_none() {
            info!("no sensor link, running without hardware");
        }
        Ok(Self {
            controller,
            aggregator,
            presentation,
            link,
            vision,
            worker: None,
            tick: 0,
            vision_was_present: false,
        })
    }

    /// Hand over the vision worker so shutdown can stop it
    pub fn with_worker(mut self, worker: VisionWorker) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Run one control step of `dt_ms` at monotonic time `now_ms`
    pub fn tick(&mut self, dt_ms: f64, now_ms: u64, commands: &[OperatorCommand]) -> CrossingSnapshot {
        self.tick += 1;

        let mut triggers = commands
            .iter()
            .fold(Triggers::none(), |acc, cmd| acc.merge(cmd.triggers()));

        let hardware = match self.link.as_mut() {
            Some(link) => {
                let poll = link.poll();
                triggers = triggers.merge(link.take_triggers());
                (!poll.link_down()).then_some(poll.channels)
            }
            None => None,
        };

        let vision = self.vision.latest_count();
        if vision.is_some() != self.vision_was_present {
            self.vision_was_present = vision.is_some();
            if self.vision_was_present {
                info!("vision count available");
            } else {
                warn!("vision count absent, using hall sensors only");
            }
        }

        let demand = self.aggregator.update(vision, hardware.as_ref(), now_ms);
        let output = self.controller.advance(dt_ms, demand, triggers);

        if let Some(link) = self.link.as_mut() {
            link.send_light_state(output.state.lights(), now_ms);
            link.send_pulse(output.state.button_feedback());
        }

        self.build_snapshot(output.events)
    }

    /// Current view without advancing anything
    pub fn snapshot(&self) -> CrossingSnapshot {
        self.build_snapshot(Vec::new())
    }

    fn build_snapshot(&self, events: Vec<PhaseEvent>) -> CrossingSnapshot {
        let state = self.controller.state().clone();
        let frame = self.presentation.frame(&state, self.controller.config());
        CrossingSnapshot {
            timestamp: chrono::Utc::now(),
            tick: self.tick,
            active_units: self.controller.active_units(),
            demand: self.aggregator.breakdown(),
            link: self.link.as_ref().map(|l| l.status()),
            vision_present: self.vision_was_present,
            cycle_count: self.controller.cycle_count(),
            events,
            frame,
            state,
        }
    }

    /// Stop the vision worker (bounded) and close the link. Safe to repeat.
    pub fn shutdown(&mut self, timeout: Duration) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown(timeout);
        }
        if let Some(link) = self.link.as_mut() {
            link.close();
        }
    }

    /// Drive `tick` at the configured rate until a shutdown command arrives
    /// or every command sender is gone. Each snapshot replaces the last one
    /// in `snapshots`. Returns the final snapshot.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<OperatorCommand>,
        snapshots: watch::Sender<CrossingSnapshot>,
    ) -> CrossingSnapshot {
        let hz = self.controller.config().tick_hz.max(1);
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / hz as f64));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let started = Instant::now();
        let mut last = started;
        let mut queued: Vec<OperatorCommand> = Vec::new();
        info!(tick_hz = hz, "crossing running");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Instant::now();
                    let dt_ms = now.duration_since(last).as_secs_f64() * 1000.0;
                    last = now;
                    let now_ms = now.duration_since(started).as_millis() as u64;
                    let snapshot = self.tick(dt_ms, now_ms, &queued);
                    queued.clear();
                    snapshots.send_replace(snapshot);
                }
                command = commands.recv() => match command {
                    Some(OperatorCommand::Shutdown) | None => break,
                    Some(command) => {
                        debug!(%command, "operator command");
                        queued.push(command);
                    }
                },
            }
        }

        info!(ticks = self.tick, cycles = self.controller.cycle_count(), "crossing stopping");
        // the bounded join sleeps, keep it off the runtime threads
        if let Some(mut worker) = self.worker.take() {
            let joined =
                tokio::task::spawn_blocking(move || worker.shutdown(VISION_JOIN_TIMEOUT)).await;
            if joined.is_err() {
                warn!("vision shutdown task failed");
            }
        }
        self.shutdown(VISION_JOIN_TIMEOUT);
        self.snapshot()
    }

    pub fn link(&self) -> Option<&SensorLink<T>> {
        self.link.as_ref()
    }
}

impl<T: LineTransport> Drop for Crossing<T> {
    fn drop(&mut self) {
        self.shutdown(VISION_JOIN_TIMEOUT);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::link::{LinkStatus, MemoryHandle, MemoryTransport};
    use crate::core::vision::ReplayCounter;
    use crate::types::Phase;

    fn crossing() -> (Crossing<MemoryTransport>, MemoryHandle) {
        let (transport, hw) = MemoryTransport::pair();
        let link = SensorLink::new(transport, 2000);
        let crossing =
            Crossing::new(CrossingConfig::default(), Some(link), VisionFeed::absent()).unwrap();
        (crossing, hw)
    }

    #[test]
    fn test_parse_operator_commands() {
        assert_eq!("start".parse::<OperatorCommand>(), Ok(OperatorCommand::Start));
        assert_eq!(" T ".parse::<OperatorCommand>(), Ok(OperatorCommand::Transit));
        assert_eq!("slow".parse::<OperatorCommand>(), Ok(OperatorCommand::SlowToggle));
        assert_eq!("q".parse::<OperatorCommand>(), Ok(OperatorCommand::Shutdown));
        assert!("dance".parse::<OperatorCommand>().is_err());
    }

    #[test]
    fn test_button_starts_cycle_and_pulse() {
        let (mut c, hw) = crossing();
        hw.push_line("B 1");
        let snap = c.tick(16.0, 16, &[]);
        assert_eq!(snap.phase(), Phase::Filling);
        assert!(snap.events.contains(&PhaseEvent::ManualStart));

        let sent = hw.take_sent();
        assert!(sent.contains(&"L 1 0 0 0 1".to_string()));
        assert!(sent.contains(&"P 1".to_string()));
    }

    #[test]
    fn test_operator_transit_preempts() {
        let (mut c, _hw) = crossing();
        let snap = c.tick(16.0, 16, &[OperatorCommand::Transit]);
        assert_eq!(snap.phase(), Phase::TransitPreempt);
        assert!(snap.frame.transit_badge);
    }

    #[test]
    fn test_hall_sensors_drive_demand() {
        let (mut c, hw) = crossing();
        hw.push_line("S 1 1 0 0 0 0 0 0");
        c.tick(16.0, 1000, &[]);
        let snap = c.tick(16.0, 1400, &[]);
        assert_eq!(snap.demand.hardware, 2);
        assert_eq!(snap.phase(), Phase::Filling);
        assert!(snap.events.contains(&PhaseEvent::DemandDetected));
    }

    #[test]
    fn test_link_down_degrades() {
        let (mut c, hw) = crossing();
        hw.disconnect();
        let snap = c.tick(16.0, 16, &[]);
        assert_eq!(snap.link, Some(LinkStatus::Down));
        assert!(!snap.demand.hardware_present);

        let snap = c.tick(16.0, 32, &[OperatorCommand::Start]);
        assert_eq!(snap.phase(), Phase::Filling);
    }

    #[test]
    fn test_shutdown_closes_link_once() {
        let (mut c, hw) = crossing();
        c.tick(16.0, 16, &[]);
        c.shutdown(Duration::from_millis(10));
        c.shutdown(Duration::from_millis(10));
        drop(c);
        assert_eq!(hw.close_count(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_command() {
        let (c, hw) = crossing();
        let (tx, rx) = mpsc::channel(8);
        let (snap_tx, snap_rx) = watch::channel(c.snapshot());

        let task = tokio::spawn(c.run(rx, snap_tx));
        tx.send(OperatorCommand::Start).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(snap_rx.borrow().phase(), Phase::Filling);

        tx.send(OperatorCommand::Shutdown).await.unwrap();
        let last = task.await.unwrap();
        assert_eq!(last.link, Some(LinkStatus::Closed));
        assert_eq!(hw.close_count(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_vision_worker() {
        let (transport, _hw) = MemoryTransport::pair();
        let link = SensorLink::new(transport, 2000);
        let counter = ReplayCounter::new(vec![2], Duration::from_millis(1));
        let (worker, feed) = VisionWorker::spawn(counter).unwrap();
        let c = Crossing::new(CrossingConfig::default(), Some(link), feed.clone())
            .unwrap()
            .with_worker(worker);
        let (tx, rx) = mpsc::channel(8);
        let (snap_tx, snap_rx) = watch::channel(c.snapshot());

        let task = tokio::spawn(c.run(rx, snap_tx));
        let deadline = Instant::now() + Duration::from_secs(2);
        while !snap_rx.borrow().demand.vision_present {
            assert!(Instant::now() < deadline, "vision never arrived");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(tx);
        task.await.unwrap();
        // the worker thread has exited and dropped its sender
        assert_eq!(feed.latest_count(), None);
    }
}
