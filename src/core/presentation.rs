//! Presentation adapter
//!
//! Pure function of controller state: what an external renderer needs to
//! draw the countdown ring, the crowd icon and the transit badge. Nothing
//! here feeds back into the controller.

use serde::{Deserialize, Serialize};

use crate::config::CrossingConfig;
use crate::core::controller::active_units;
use crate::types::{ControllerState, Phase};

/// How the ring should be drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RingRole {
    /// All units dark
    Off,
    /// Red units filling clockwise
    Filling,
    /// Full red ring during the all-red gap
    Holding,
    /// Green units draining
    Walking,
    /// Full ring, blinking, with a countdown
    Clearing,
    /// Transit pre-green, units draining
    Transit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RingView {
    pub role: RingRole,
    pub lit_units: u32,
    pub total_units: u32,
    /// Continuous ring progress in `[0, 1]`
    pub fill_fraction: f64,
}

/// Everything a renderer needs for one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresentationFrame {
    pub ring: RingView,
    /// Whole seconds left, only while clearing
    pub countdown_secs: Option<u32>,
    /// Index into the crowd icon set (0 = one person)
    pub crowd_icon: Option<u32>,
    pub transit_badge: bool,
    pub pedestrian_walk: bool,
}

#[derive(Debug, Clone)]
pub struct PresentationAdapter {
    icon_count: u32,
}

impl PresentationAdapter {
    pub fn new(config: &CrossingConfig) -> Self {
        Self {
            icon_count: config.max_demand,
        }
    }

    pub fn frame(&self, state: &ControllerState, config: &CrossingConfig) -> PresentationFrame {
        let total = config.visual_led_count;
        let ring = match state.phase {
            Phase::Idle => ring(RingRole::Off, 0.0, total),
            Phase::Filling => {
                let fraction = ratio(state.phase_elapsed_ms, state.fill_total_ms);
                ring(RingRole::Filling, fraction, total)
            }
            Phase::SafetyBuffer => ring(RingRole::Holding, 1.0, total),
            Phase::Walking => {
                let lit = active_units(state.walk_budget, config.max_leds).min(total);
                RingView {
                    role: RingRole::Walking,
                    lit_units: lit,
                    total_units: total,
                    fill_fraction: ratio(state.walk_budget, config.max_leds as f64),
                }
            }
            Phase::Clearing => ring(RingRole::Clearing, 1.0, total),
            Phase::TransitPreempt => {
                let spent = ratio(state.phase_elapsed_ms, config.transit_pre_green_duration_ms);
                ring(RingRole::Transit, 1.0 - spent, total)
            }
        };

        let countdown_secs = (state.phase == Phase::Clearing).then(|| {
            countdown_secs(config.clearance_duration_ms - state.phase_elapsed_ms)
        });

        let transit_badge = state.phase == Phase::TransitPreempt
            || (state.phase == Phase::Walking && state.transit_active);

        let crowd_icon = match state.phase {
            Phase::Clearing | Phase::TransitPreempt => None,
            _ if transit_badge => None,
            _ => self.crowd_icon(state.demand),
        };

        PresentationFrame {
            ring,
            countdown_secs,
            crowd_icon,
            transit_badge,
            pedestrian_walk: state.pedestrian_light.green,
        }
    }

    /// Icon for `demand` people, saturating at the last icon
    pub fn crowd_icon(&self, demand: u32) -> Option<u32> {
        if demand == 0 || self.icon_count == 0 {
            return None;
        }
        Some(demand.min(self.icon_count) - 1)
    }
}

/// `ceil(remaining / 1000)`, never below 1
pub fn countdown_secs(remaining_ms: f64) -> u32 {
    let secs = (remaining_ms.max(0.0) / 1000.0).ceil() as u32;
    secs.max(1)
}

fn ratio(value: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    (value / total).clamp(0.0, 1.0)
}

fn ring(role: RingRole, fraction: f64, total: u32) -> RingView {
    let fraction = fraction.clamp(0.0, 1.0);
    RingView {
        role,
        lit_units: (fraction * total as f64).floor() as u32,
        total_units: total,
        fill_fraction: fraction,
    }
}

// =============================================================================
// TESTS
// =============================================================================
