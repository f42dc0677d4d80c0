//! Crosswalk: phase controller for a single pedestrian crossing
//!
//! Vision count + hall sensors → PersonCountAggregator → PhaseController →
//! light outputs over the serial link, snapshots to the renderer

pub mod config;
pub mod core;
pub mod error;
pub mod types;

pub use config::CrossingConfig;
pub use error::{ConfigError, LinkError, ProtocolError, VisionError};

// =============================================================================
// DEMAND
// =============================================================================

/// Upper bound of the canonical person count
pub const MAX_DEMAND: u32 = 8;

/// Hardware channels 0..6 report presence, 6 and 7 detect transit vehicles
pub const CHANNEL_COUNT: usize = 8;
pub const PRESENCE_CHANNELS: usize = 6;
pub const TRANSIT_CHANNELS: [usize; 2] = [6, 7];

/// Debounce windows (milliseconds)
/// Vision is already smoothed upstream, raw GPIO needs a little longer
pub const VISION_DEBOUNCE_MS: u64 = 250;
pub const HARDWARE_DEBOUNCE_MS: u64 = 300;

// =============================================================================
// FILLING [C] - 25 ring units at 400 ms each
// =============================================================================

pub const BASE_FILL_DURATION_MS: f64 = 10_000.0;
pub const SAFETY_BUFFER_DURATION_MS: f64 = 3_000.0;

/// Fill speed-up per five waiting people
pub const CROWD_BONUS_FACTOR: f64 = 0.3;

// =============================================================================
// WALKING [C]
// =============================================================================

pub const BASE_WALK_LEDS: u32 = 25;
pub const LEDS_PER_PERSON: u32 = 1;
pub const MAX_LEDS: u32 = 30;

/// Ring size the renderer draws
pub const VISUAL_LED_COUNT: u32 = 25;

pub const MS_PER_WALK_UNIT_NORMAL: f64 = 660.0;
pub const MS_PER_WALK_UNIT_SLOW: f64 = 1_000.0;

// =============================================================================
// VEHICLE LIGHT + CLEARANCE [C]
// =============================================================================

pub const CLEARANCE_DURATION_MS: f64 = 6_000.0;
pub const VEHICLE_YELLOW_DURATION_MS: f64 = 3_000.0;
pub const CAR_RED_YELLOW_DURATION_MS: f64 = 1_500.0;

// =============================================================================
// TRANSIT PRIORITY [C]
// =============================================================================

pub const TRANSIT_YELLOW_DURATION_MS: f64 = 3_000.0;
pub const TRANSIT_PRE_GREEN_DURATION_MS: f64 = 5_000.0;
pub const TRANSIT_WALK_DURATION_MS: f64 = 25_000.0;

// =============================================================================
// LINK + LOOP
// =============================================================================

/// Light state is resent at least this often even when unchanged
pub const LINK_HEARTBEAT_MS: u64 = 2_000;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

pub const TICK_HZ: u32 = 60;

// =============================================================================
// VERSION
// =============================================================================

pub const VERSION: &str = "1.0.0";
