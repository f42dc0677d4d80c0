//! Integration tests for full crossing cycles
//!
//! Tests the full path: wire lines → SensorLink → aggregator → controller
//! → light commands back on the wire, using the in-memory transport.

use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};

use crosswalk::core::{
    Crossing, LinkStatus, MemoryHandle, MemoryTransport, OperatorCommand, ReplayCounter,
    SensorLink, VisionFeed, VisionWorker,
};
use crosswalk::types::{CrossingSnapshot, Phase, PhaseEvent};
use crosswalk::CrossingConfig;

const DT: f64 = 16.0;

struct Rig {
    crossing: Crossing<MemoryTransport>,
    hw: MemoryHandle,
    now_ms: u64,
}

impl Rig {
    fn new(vision: VisionFeed) -> Self {
        let (transport, hw) = MemoryTransport::pair();
        let link = SensorLink::new(transport, 2000);
        let crossing = Crossing::new(CrossingConfig::default(), Some(link), vision).unwrap();
        Self {
            crossing,
            hw,
            now_ms: 0,
        }
    }

    fn tick(&mut self, commands: &[OperatorCommand]) -> CrossingSnapshot {
        self.now_ms += DT as u64;
        self.crossing.tick(DT, self.now_ms, commands)
    }

    /// Tick until `phase` is entered; panics after `max_ms` of simulated time
    fn run_until(&mut self, phase: Phase, max_ms: u64) -> CrossingSnapshot {
        let deadline = self.now_ms + max_ms;
        loop {
            let snapshot = self.tick(&[]);
            if snapshot.phase() == phase {
                return snapshot;
            }
            assert!(self.now_ms < deadline, "never reached {} (stuck in {})", phase, snapshot.phase());
        }
    }

    /// Distinct light commands sent so far, heartbeats collapsed
    fn light_sequence(&self) -> Vec<String> {
        let mut lights: Vec<String> = self
            .hw
            .sent()
            .into_iter()
            .filter(|l| l.starts_with('L'))
            .collect();
        lights.dedup();
        lights
    }
}

#[test]
fn test_demand_driven_cycle_on_the_wire() {
    let mut rig = Rig::new(VisionFeed::absent());
    rig.hw.push_line("S 1 1 1 0 0 0 0 0");

    let snapshot = rig.run_until(Phase::Filling, 1_000);
    assert_eq!(snapshot.demand.hardware, 3);
    assert!(snapshot.events.contains(&PhaseEvent::DemandDetected));

    rig.run_until(Phase::SafetyBuffer, 15_000);
    let walking = rig.run_until(Phase::Walking, 5_000);
    assert_eq!(walking.active_units, 28);
    assert!(walking.frame.pedestrian_walk);

    // queue has left
    rig.hw.push_line("S 0 0 0 0 0 0 0 0");
    rig.run_until(Phase::Clearing, 20_000);
    let idle = rig.run_until(Phase::Idle, 7_000);
    assert_eq!(idle.cycle_count, 1);

    assert_eq!(
        rig.light_sequence(),
        vec![
            "L 1 0 0 0 1",
            "L 1 0 0 1 0",
            "L 1 0 1 0 0",
            "L 0 1 1 0 0",
            "L 1 0 1 0 0",
            "L 1 0 1 1 0",
            "L 1 0 0 0 1",
        ]
    );

    let pulses: Vec<String> = rig
        .hw
        .sent()
        .into_iter()
        .filter(|l| l.starts_with('P'))
        .collect();
    assert_eq!(pulses, vec!["P 0", "P 1", "P 0"]);

    // no restart while the sensors stay empty
    for _ in 0..100 {
        assert_eq!(rig.tick(&[]).phase(), Phase::Idle);
    }
}

#[test]
fn test_fill_faster_with_larger_crowd() {
    let mut elapsed = Vec::new();
    for line in ["S 1 0 0 0 0 0 0 0", "S 1 1 1 1 1 1 0 0"] {
        let mut rig = Rig::new(VisionFeed::absent());
        rig.hw.push_line(line);
        let start = rig.run_until(Phase::Filling, 1_000);
        let started_at = rig.now_ms;
        assert_eq!(start.phase(), Phase::Filling);
        rig.run_until(Phase::Walking, 20_000);
        elapsed.push(rig.now_ms - started_at);
    }
    assert!(elapsed[1] < elapsed[0], "fill times {:?}", elapsed);
}

#[test]
fn test_transit_detector_preempts_idle() {
    let mut rig = Rig::new(VisionFeed::absent());
    rig.hw.push_line("S 0 0 0 0 0 0 1 0");
    rig.hw.push_line("S 0 0 0 0 0 0 0 0");

    let snapshot = rig.tick(&[]);
    assert_eq!(snapshot.phase(), Phase::TransitPreempt);
    assert!(snapshot.events.contains(&PhaseEvent::TransitPreempted));

    let walking = rig.run_until(Phase::Walking, 6_000);
    assert!(walking.state.transit_active);
    assert!(walking.events.contains(&PhaseEvent::TransitWalkStarted));
    assert_eq!(walking.active_units, 30);

    let walk_started = rig.now_ms;
    rig.run_until(Phase::Clearing, 30_000);
    let walk_ms = rig.now_ms - walk_started;
    assert!((24_900..=25_100).contains(&walk_ms), "transit walk lasted {} ms", walk_ms);

    assert_eq!(
        rig.light_sequence()[..3].to_vec(),
        vec!["L 1 0 0 1 0", "L 1 0 1 0 0", "L 0 1 1 0 0"]
    );
}

#[test]
fn test_transit_during_clearing_discarded() {
    let mut rig = Rig::new(VisionFeed::absent());
    rig.tick(&[OperatorCommand::Start]);
    rig.run_until(Phase::Clearing, 40_000);

    rig.hw.push_line("S 0 0 0 0 0 0 0 1");
    let snapshot = rig.tick(&[]);
    assert_eq!(snapshot.phase(), Phase::Clearing);
    assert!(snapshot.events.contains(&PhaseEvent::TransitIgnored));

    let idle = rig.run_until(Phase::Idle, 7_000);
    assert!(!idle.state.transit_active);
    // the latch was consumed, nothing carries into the next cycle
    assert_eq!(rig.tick(&[]).phase(), Phase::Idle);
}

#[test]
fn test_slow_button_extends_walk() {
    let mut normal = Rig::new(VisionFeed::absent());
    normal.tick(&[OperatorCommand::Start]);
    normal.run_until(Phase::Walking, 15_000);
    let started = normal.now_ms;
    normal.run_until(Phase::Clearing, 40_000);
    let normal_ms = normal.now_ms - started;

    let mut slow = Rig::new(VisionFeed::absent());
    slow.tick(&[OperatorCommand::Start]);
    slow.run_until(Phase::Walking, 15_000);
    let started = slow.now_ms;
    slow.hw.push_line("B 2");
    let snapshot = slow.tick(&[]);
    assert!(snapshot.state.slow_mode);
    slow.run_until(Phase::Clearing, 40_000);
    let slow_ms = slow.now_ms - started;

    assert!(slow_ms > normal_ms, "slow {} vs normal {}", slow_ms, normal_ms);
}

#[test]
fn test_link_down_mid_walk_keeps_timing() {
    let mut reference = Rig::new(VisionFeed::absent());
    reference.tick(&[OperatorCommand::Start]);
    reference.run_until(Phase::Walking, 15_000);
    let walk_started = reference.now_ms;
    reference.run_until(Phase::Clearing, 40_000);
    let reference_walk = reference.now_ms - walk_started;

    let mut rig = Rig::new(VisionFeed::absent());
    rig.tick(&[OperatorCommand::Start]);
    rig.run_until(Phase::Walking, 15_000);
    let walk_started = rig.now_ms;
    for _ in 0..50 {
        rig.tick(&[]);
    }

    rig.hw.disconnect();
    let sent_before = rig.hw.sent().len();
    let snapshot = rig.tick(&[]);
    assert_eq!(snapshot.link, Some(LinkStatus::Down));
    assert_eq!(snapshot.phase(), Phase::Walking);

    rig.run_until(Phase::Clearing, 40_000);
    assert_eq!(rig.now_ms - walk_started, reference_walk);
    rig.run_until(Phase::Idle, 7_000);
    assert_eq!(rig.hw.sent().len(), sent_before);
}

#[test]
fn test_vision_and_hall_fused_by_max() {
    let counter = ReplayCounter::new(vec![4], Duration::from_millis(1));
    let (worker, feed) = VisionWorker::spawn(counter).unwrap();
    let mut rig = Rig::new(feed);
    rig.crossing = rig.crossing.with_worker(worker);

    let wait = Instant::now();
    while !rig.tick(&[]).demand.vision_present {
        assert!(wait.elapsed() < Duration::from_secs(2), "vision never arrived");
        std::thread::sleep(Duration::from_millis(1));
    }

    rig.hw.push_line("S 1 1 0 0 0 0 0 0");
    let mut snapshot = rig.tick(&[]);
    for _ in 0..40 {
        snapshot = rig.tick(&[]);
    }
    assert_eq!(snapshot.demand.vision, 4);
    assert_eq!(snapshot.demand.hardware, 2);
    assert_eq!(snapshot.demand.demand, 4);
    assert_eq!(snapshot.phase(), Phase::Filling);

    rig.crossing.shutdown(Duration::from_secs(1));
    assert_eq!(rig.crossing.link().map(|l| l.status()), Some(LinkStatus::Closed));
}
