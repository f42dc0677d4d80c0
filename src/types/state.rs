//! Controller state and per-tick inputs

use serde::{Deserialize, Serialize};

use crate::types::{LightState, PedestrianLight, Phase, VehicleLight};

/// Everything the phase controller owns. Only `PhaseController::advance`
/// and its event handlers mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    pub phase: Phase,
    /// Time accumulated in the current phase (Filling time is crowd-scaled)
    pub phase_elapsed_ms: f64,
    /// Length of the fill started on entering Filling
    pub fill_total_ms: f64,
    /// Remaining walk units, fractional
    pub walk_budget: f64,
    /// Canonical person count seen on the last tick
    pub demand: u32,
    pub slow_mode: bool,
    pub transit_active: bool,
    pub pedestrian_light: PedestrianLight,
    pub vehicle_light: VehicleLight,
}

impl ControllerState {
    /// Idle defaults: vehicles green, pedestrians red
    pub fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            phase_elapsed_ms: 0.0,
            fill_total_ms: 0.0,
            walk_budget: 0.0,
            demand: 0,
            slow_mode: false,
            transit_active: false,
            pedestrian_light: PedestrianLight::STOP,
            vehicle_light: VehicleLight::GREEN,
        }
    }

    pub fn lights(&self) -> LightState {
        LightState::new(self.pedestrian_light, self.vehicle_light)
    }

    /// Button feedback indicator: on while pedestrians are waiting for green
    pub fn button_feedback(&self) -> bool {
        matches!(self.phase, Phase::Filling | Phase::SafetyBuffer)
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Discrete events collected since the previous tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triggers {
    /// Button 1 or operator "start"
    pub manual_start: bool,
    /// Transit detector latch or operator "transit"
    pub transit: bool,
    /// Button 2 or operator "slow"
    pub slow_toggle: bool,
}

impl Triggers {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !(self.manual_start || self.transit || self.slow_toggle)
    }

    /// Merge two trigger sets; an event seen by either source counts
    pub fn merge(self, other: Triggers) -> Triggers {
        Triggers {
            manual_start: self.manual_start || other.manual_start,
            transit: self.transit || other.transit,
            slow_toggle: self.slow_toggle || other.slow_toggle,
        }
    }
}
