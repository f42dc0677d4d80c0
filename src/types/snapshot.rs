//! Per-tick snapshot published to the terminal, the API and renderers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::aggregator::DemandBreakdown;
use crate::core::link::LinkStatus;
use crate::core::presentation::PresentationFrame;
use crate::types::{ControllerState, Phase, PhaseEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossingSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Ticks since start
    pub tick: u64,
    pub state: ControllerState,
    pub demand: DemandBreakdown,
    /// Whole walk units shown to pedestrians
    pub active_units: u32,
    /// `None` when running without hardware
    pub link: Option<LinkStatus>,
    pub vision_present: bool,
    pub cycle_count: u64,
    /// Events raised during this tick
    pub events: Vec<PhaseEvent>,
    pub frame: PresentationFrame,
}

impl CrossingSnapshot {
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Format for terminal display (with colors)
    pub fn to_terminal_string(&self) -> String {
        format!(
            "{}{:<15}{} demand={} (vision={} hall={}) | units={:>2} | {}{}",
            self.state.phase.color_code(),
            self.state.phase,
            Phase::color_reset(),
            self.demand.demand,
            self.demand.vision,
            self.demand.hardware,
            self.active_units,
            self.flags(),
            self.link_suffix(),
        )
    }

    /// Format for parseable output (no colors)
    pub fn to_parseable_string(&self) -> String {
        format!(
            "phase={} | demand={} | vision={} | hall={} | units={} | {}{}",
            self.state.phase,
            self.demand.demand,
            self.demand.vision,
            self.demand.hardware,
            self.active_units,
            self.flags(),
            self.link_suffix(),
        )
    }

    fn flags(&self) -> String {
        format!(
            "slow={} transit={}",
            self.state.slow_mode as u8, self.state.transit_active as u8
        )
    }

    fn link_suffix(&self) -> String {
        match self.link {
            Some(LinkStatus::Up) => String::new(),
            Some(status) => format!(" | link={}", format!("{:?}", status).to_uppercase()),
            None => " | no hardware".to_string(),
        }
    }
}
