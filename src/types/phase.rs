//! Crossing phase definitions

use serde::{Deserialize, Serialize};

/// The six phases of a crossing cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// No cycle running, vehicles have green
    Idle,
    /// Pedestrians wait while the ring fills; vehicle light steps down to red
    Filling,
    /// All-red gap before the walk signal (tail of Filling on the wire)
    SafetyBuffer,
    /// Pedestrian green, walk budget counting down
    Walking,
    /// Pedestrian red, vehicles held until the crossing is clear
    Clearing,
    /// Transit vehicle granted priority, fast-tracking the walk phase
    TransitPreempt,
}

impl Phase {
    /// Every phase, in cycle order
    pub const ALL: [Phase; 6] = [
        Phase::Idle,
        Phase::Filling,
        Phase::SafetyBuffer,
        Phase::Walking,
        Phase::Clearing,
        Phase::TransitPreempt,
    ];

    /// Get ANSI color code for terminal display
    pub fn color_code(&self) -> &'static str {
        match self {
            Phase::Idle => "\x1b[90m",           // Gray
            Phase::Filling => "\x1b[33m",        // Yellow
            Phase::SafetyBuffer => "\x1b[31m",   // Red
            Phase::Walking => "\x1b[32m",        // Green
            Phase::Clearing => "\x1b[31m",       // Red
            Phase::TransitPreempt => "\x1b[36m", // Cyan
        }
    }

    /// Reset ANSI color
    pub fn color_reset() -> &'static str {
        "\x1b[0m"
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "IDLE",
            Phase::Filling => "FILLING",
            Phase::SafetyBuffer => "SAFETY_BUFFER",
            Phase::Walking => "WALKING",
            Phase::Clearing => "CLEARING",
            Phase::TransitPreempt => "TRANSIT_PREEMPT",
        };
        f.pad(name)
    }
}
