//! Phase controller: the crossing state machine
//!
//! Transitions:
//! - IDLE → FILLING: manual start, or demand > 0 with the zero-crossing guard armed
//! - FILLING → SAFETY_BUFFER: vehicle light reaches red (timer carries over)
//! - SAFETY_BUFFER → WALKING: crowd-scaled fill time reaches the total
//! - WALKING → CLEARING: walk budget spent
//! - CLEARING → IDLE: clearance elapsed, guard re-armed
//! - IDLE | FILLING | SAFETY_BUFFER → TRANSIT_PREEMPT: transit trigger
//! - TRANSIT_PREEMPT → WALKING: pre-green elapsed, full transit budget
//!
//! Light outputs are never set directly; they are derived from phase and
//! elapsed time after every mutation.

use tracing::{debug, info};

use crate::config::CrossingConfig;
use crate::error::ConfigError;
use crate::types::{
    ControllerState, LightState, PedestrianLight, Phase, PhaseEvent, Triggers, VehicleLight,
};

/// A budget this close below the next whole unit still displays that unit
pub const WALK_UNIT_SNAP: f64 = 0.01;

/// Result of one controller tick
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub state: ControllerState,
    pub events: Vec<PhaseEvent>,
}

/// Crossing state machine
#[derive(Debug)]
pub struct PhaseController {
    config: CrossingConfig,
    state: ControllerState,
    /// Armed while demand has been seen at zero since the last demand start
    zero_guard_armed: bool,
    /// Completed cycles since start
    cycle_count: u64,
}

impl PhaseController {
    /// Create a controller in Idle. Invalid configuration is fatal.
    pub fn new(config: CrossingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: ControllerState::idle(),
            zero_guard_armed: true,
            cycle_count: 0,
        })
    }

    /// Advance all timers by `dt_ms` and apply this tick's triggers.
    ///
    /// Order within a tick: slow toggle, transit, manual start (transit wins
    /// over a simultaneous start in Idle), then the timed step for the
    /// current phase unless a trigger already changed it. Demand outside
    /// `[0, max_demand]` is clamped and non-finite or negative `dt_ms` counts
    /// as zero, so no input can make this fail.
    pub fn advance(&mut self, dt_ms: f64, demand: u32, triggers: Triggers) -> StepOutput {
        let dt_ms = if dt_ms.is_finite() && dt_ms > 0.0 { dt_ms } else { 0.0 };
        let demand = demand.min(self.config.max_demand);
        self.state.demand = demand;
        if demand == 0 {
            self.zero_guard_armed = true;
        }

        let phase_before = self.state.phase;
        let mut events = Vec::new();

        if triggers.slow_toggle {
            events.push(self.toggle_slow());
        }
        if triggers.transit {
            events.push(self.transit());
        }
        if triggers.manual_start {
            events.extend(self.start());
        }

        if self.state.phase == phase_before {
            events.extend(self.step(dt_ms));
        }

        for event in &events {
            match event.target() {
                Some(phase) => info!(code = event.code(), %phase, demand, "{}", event.description()),
                None => debug!(code = event.code(), "{}", event.description()),
            }
        }

        StepOutput {
            state: self.state.clone(),
            events,
        }
    }

    /// Manual start. Only acts in Idle.
    pub fn start(&mut self) -> Option<PhaseEvent> {
        if self.state.phase != Phase::Idle {
            return None;
        }
        self.enter_filling();
        Some(PhaseEvent::ManualStart)
    }

    /// Transit vehicle detected
    pub fn transit(&mut self) -> PhaseEvent {
        let event = match self.state.phase {
            // must wait for the cycle to finish
            Phase::Clearing | Phase::TransitPreempt => PhaseEvent::TransitIgnored,
            Phase::Walking if self.state.transit_active => PhaseEvent::TransitIgnored,
            Phase::Walking => {
                self.state.walk_budget = self.config.max_leds as f64;
                self.state.transit_active = true;
                self.state.slow_mode = false;
                PhaseEvent::TransitExtended
            }
            Phase::Idle | Phase::Filling | Phase::SafetyBuffer => {
                // vehicles already stopped: the yellow part is done
                let already_red = self.state.phase == Phase::SafetyBuffer;
                self.state.phase = Phase::TransitPreempt;
                self.state.phase_elapsed_ms = if already_red {
                    self.config.transit_yellow_duration_ms
                } else {
                    0.0
                };
                self.state.transit_active = true;
                self.state.slow_mode = false;
                PhaseEvent::TransitPreempted
            }
        };
        self.refresh_lights();
        event
    }

    /// Slow-mode button. Only acts in Walking.
    pub fn toggle_slow(&mut self) -> PhaseEvent {
        if self.state.phase != Phase::Walking {
            return PhaseEvent::SlowModeIgnored;
        }
        self.state.slow_mode = !self.state.slow_mode;
        PhaseEvent::SlowModeToggled
    }

    /// Timed part of the tick
    fn step(&mut self, dt_ms: f64) -> Option<PhaseEvent> {
        let event = match self.state.phase {
            Phase::Idle => {
                if self.state.demand > 0 && self.zero_guard_armed {
                    self.zero_guard_armed = false;
                    self.enter_filling();
                    Some(PhaseEvent::DemandDetected)
                } else {
                    None
                }
            }

            Phase::Filling => {
                let total = self.state.fill_total_ms;
                let buffer_start = total - self.config.safety_buffer_duration_ms;
                let yellow_start = buffer_start - self.config.vehicle_yellow_duration_ms;
                let was_green = self.state.phase_elapsed_ms < yellow_start;
                self.state.phase_elapsed_ms += dt_ms * self.time_factor();
                // vehicles never go green to red without the full yellow
                if was_green && self.state.phase_elapsed_ms >= buffer_start {
                    self.state.phase_elapsed_ms = yellow_start;
                }
                if self.state.phase_elapsed_ms >= buffer_start {
                    // a stalled tick must not skip the all-red gap
                    if self.state.phase_elapsed_ms >= total {
                        self.state.phase_elapsed_ms = buffer_start;
                    }
                    self.state.phase = Phase::SafetyBuffer;
                    Some(PhaseEvent::SafetyBufferStarted)
                } else {
                    None
                }
            }

            Phase::SafetyBuffer => {
                self.state.phase_elapsed_ms += dt_ms * self.time_factor();
                if self.state.phase_elapsed_ms >= self.state.fill_total_ms {
                    let budget = self.config.initial_walk_budget(self.state.demand);
                    self.enter_walking(budget, false);
                    Some(PhaseEvent::WalkStarted)
                } else {
                    None
                }
            }

            Phase::Walking => {
                self.state.phase_elapsed_ms += dt_ms;
                self.state.walk_budget -= dt_ms / self.ms_per_walk_unit();
                if self.state.walk_budget <= 0.0 {
                    self.state.walk_budget = 0.0;
                    self.enter(Phase::Clearing);
                    Some(PhaseEvent::WalkBudgetSpent)
                } else {
                    None
                }
            }

            Phase::Clearing => {
                self.state.phase_elapsed_ms += dt_ms;
                if self.state.phase_elapsed_ms >= self.config.clearance_duration_ms {
                    self.reset_to_idle();
                    Some(PhaseEvent::CycleCompleted)
                } else {
                    None
                }
            }

            Phase::TransitPreempt => {
                self.state.phase_elapsed_ms += dt_ms;
                if self.state.phase_elapsed_ms >= self.config.transit_pre_green_duration_ms {
                    self.enter_walking(self.config.max_leds as f64, true);
                    Some(PhaseEvent::TransitWalkStarted)
                } else {
                    None
                }
            }
        };
        self.refresh_lights();
        event
    }

    /// Fill speed-up: more people waiting means a shorter wait
    pub fn time_factor(&self) -> f64 {
        1.0 + (self.state.demand as f64 / 5.0) * self.config.crowd_bonus_factor
    }

    /// Milliseconds one walk unit lasts right now
    pub fn ms_per_walk_unit(&self) -> f64 {
        if self.state.transit_active {
            self.config.ms_per_walk_unit_transit()
        } else if self.state.slow_mode {
            self.config.ms_per_walk_unit_slow
        } else {
            self.config.ms_per_walk_unit_normal
        }
    }

    fn enter(&mut self, phase: Phase) {
        self.state.phase = phase;
        self.state.phase_elapsed_ms = 0.0;
    }

    fn enter_filling(&mut self) {
        self.enter(Phase::Filling);
        self.state.fill_total_ms = self.config.fill_total_ms();
        self.refresh_lights();
    }

    fn enter_walking(&mut self, budget: f64, transit: bool) {
        self.enter(Phase::Walking);
        self.state.walk_budget = budget;
        self.state.transit_active = transit;
        self.state.slow_mode = false;
    }

    fn reset_to_idle(&mut self) {
        let demand = self.state.demand;
        self.state = ControllerState::idle();
        self.state.demand = demand;
        self.zero_guard_armed = true;
        self.cycle_count += 1;
    }

    fn refresh_lights(&mut self) {
        let lights = lights_for(
            &self.config,
            self.state.phase,
            self.state.phase_elapsed_ms,
            self.state.fill_total_ms,
        );
        self.state.pedestrian_light = lights.pedestrian;
        self.state.vehicle_light = lights.vehicle;
    }

    /// Walk units shown to the presentation layer
    pub fn active_units(&self) -> u32 {
        active_units(self.state.walk_budget, self.config.max_leds)
    }

    /// Get current state
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn config(&self) -> &CrossingConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn zero_guard_armed(&self) -> bool {
        self.zero_guard_armed
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Reset to Idle defaults, keeping the configuration
    pub fn reset(&mut self) {
        self.state = ControllerState::idle();
        self.zero_guard_armed = true;
    }
}

/// `floor(walk_budget)` clamped to `[0, max_leds]`
pub fn active_units(walk_budget: f64, max_leds: u32) -> u32 {
    let units = (walk_budget + WALK_UNIT_SNAP).floor();
    if units <= 0.0 {
        0
    } else {
        (units as u32).min(max_leds)
    }
}

/// Light outputs as a pure function of phase and elapsed time
pub fn lights_for(
    config: &CrossingConfig,
    phase: Phase,
    elapsed_ms: f64,
    fill_total_ms: f64,
) -> LightState {
    match phase {
        Phase::Idle => LightState::new(PedestrianLight::STOP, VehicleLight::GREEN),
        Phase::Filling => {
            let remaining = fill_total_ms - elapsed_ms;
            let vehicle = if remaining <= config.safety_buffer_duration_ms {
                VehicleLight::RED
            } else if remaining
                <= config.safety_buffer_duration_ms + config.vehicle_yellow_duration_ms
            {
                VehicleLight::YELLOW
            } else {
                VehicleLight::GREEN
            };
            LightState::new(PedestrianLight::STOP, vehicle)
        }
        Phase::SafetyBuffer => LightState::new(PedestrianLight::STOP, VehicleLight::RED),
        Phase::Walking => LightState::new(PedestrianLight::WALK, VehicleLight::RED),
        Phase::Clearing => {
            let remaining = config.clearance_duration_ms - elapsed_ms;
            let vehicle = if remaining < config.car_red_yellow_duration_ms {
                VehicleLight::RED_YELLOW
            } else {
                VehicleLight::RED
            };
            LightState::new(PedestrianLight::STOP, vehicle)
        }
        Phase::TransitPreempt => {
            let vehicle = if elapsed_ms < config.transit_yellow_duration_ms {
                VehicleLight::YELLOW
            } else {
                VehicleLight::RED
            };
            LightState::new(PedestrianLight::STOP, vehicle)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
