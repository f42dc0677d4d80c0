//! Phase events emitted by the controller
//! Same code/description pairing as log reason codes

use serde::{Deserialize, Serialize};

use crate::types::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseEvent {
    // =========================================================================
    // E1: Cycle start
    // =========================================================================
    /// Button 1 or operator start while idle
    ManualStart,
    /// Demand rose above zero with the zero-crossing guard armed
    DemandDetected,

    // =========================================================================
    // E2: Timed transitions
    // =========================================================================
    /// Vehicle light reached red, all-red gap begins
    SafetyBufferStarted,
    /// Fill complete, walk signal on
    WalkStarted,
    /// Walk budget spent
    WalkBudgetSpent,
    /// Clearance finished, back to idle
    CycleCompleted,
    /// Transit pre-green finished, walk signal on
    TransitWalkStarted,

    // =========================================================================
    // E3: Overrides
    // =========================================================================
    /// Transit vehicle preempted a non-walking phase
    TransitPreempted,
    /// Transit vehicle extended a running walk phase
    TransitExtended,
    /// Transit request discarded (clearing, or already granted)
    TransitIgnored,
    /// Slow mode flipped during Walking
    SlowModeToggled,
    /// Slow mode request outside Walking
    SlowModeIgnored,
}

impl PhaseEvent {
    /// Get the code string (for logging)
    pub fn code(&self) -> &'static str {
        match self {
            Self::ManualStart => "E1_MANUAL_START",
            Self::DemandDetected => "E1_DEMAND_DETECTED",
            Self::SafetyBufferStarted => "E2_SAFETY_BUFFER",
            Self::WalkStarted => "E2_WALK_STARTED",
            Self::WalkBudgetSpent => "E2_WALK_BUDGET_SPENT",
            Self::CycleCompleted => "E2_CYCLE_COMPLETED",
            Self::TransitWalkStarted => "E2_TRANSIT_WALK_STARTED",
            Self::TransitPreempted => "E3_TRANSIT_PREEMPTED",
            Self::TransitExtended => "E3_TRANSIT_EXTENDED",
            Self::TransitIgnored => "E3_TRANSIT_IGNORED",
            Self::SlowModeToggled => "E3_SLOW_MODE_TOGGLED",
            Self::SlowModeIgnored => "E3_SLOW_MODE_IGNORED",
        }
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::ManualStart => "Manual start, filling",
            Self::DemandDetected => "Pedestrians detected, filling",
            Self::SafetyBufferStarted => "Vehicles red, safety buffer",
            Self::WalkStarted => "Walk signal on",
            Self::WalkBudgetSpent => "Walk time over, clearing",
            Self::CycleCompleted => "Cycle complete",
            Self::TransitWalkStarted => "Transit walk signal on",
            Self::TransitPreempted => "Transit priority granted",
            Self::TransitExtended => "Walk extended for transit",
            Self::TransitIgnored => "Transit request ignored",
            Self::SlowModeToggled => "Slow mode toggled",
            Self::SlowModeIgnored => "Slow mode only applies while walking",
        }
    }

    /// Phase entered by this event, if it changes phase
    pub fn target(&self) -> Option<Phase> {
        match self {
            Self::ManualStart | Self::DemandDetected => Some(Phase::Filling),
            Self::SafetyBufferStarted => Some(Phase::SafetyBuffer),
            Self::WalkStarted | Self::TransitWalkStarted => Some(Phase::Walking),
            Self::WalkBudgetSpent => Some(Phase::Clearing),
            Self::CycleCompleted => Some(Phase::Idle),
            Self::TransitPreempted => Some(Phase::TransitPreempt),
            Self::TransitExtended
            | Self::TransitIgnored
            | Self::SlowModeToggled
            | Self::SlowModeIgnored => None,
        }
    }
}

impl std::fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.description())
    }
}
