//! Crossing configuration
//!
//! Every timing and limit the controller uses is a field here. Defaults come
//! from the constants in `lib.rs`; a TOML file may override any subset.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::{
    BASE_FILL_DURATION_MS, BASE_WALK_LEDS, CAR_RED_YELLOW_DURATION_MS, CLEARANCE_DURATION_MS,
    CROWD_BONUS_FACTOR, HARDWARE_DEBOUNCE_MS, LEDS_PER_PERSON, LINK_HEARTBEAT_MS, MAX_DEMAND,
    MAX_LEDS, MS_PER_WALK_UNIT_NORMAL, MS_PER_WALK_UNIT_SLOW, PRESENCE_CHANNELS,
    SAFETY_BUFFER_DURATION_MS, TICK_HZ, TRANSIT_PRE_GREEN_DURATION_MS, TRANSIT_WALK_DURATION_MS,
    TRANSIT_YELLOW_DURATION_MS, VEHICLE_YELLOW_DURATION_MS, VISION_DEBOUNCE_MS, VISUAL_LED_COUNT,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossingConfig {
    pub max_demand: u32,

    pub base_fill_duration_ms: f64,
    pub safety_buffer_duration_ms: f64,
    pub crowd_bonus_factor: f64,

    pub base_walk_leds: u32,
    pub leds_per_person: u32,
    pub max_leds: u32,
    pub visual_led_count: u32,
    pub ms_per_walk_unit_normal: f64,
    pub ms_per_walk_unit_slow: f64,

    pub clearance_duration_ms: f64,
    pub vehicle_yellow_duration_ms: f64,
    pub car_red_yellow_duration_ms: f64,

    pub transit_yellow_duration_ms: f64,
    pub transit_pre_green_duration_ms: f64,
    pub transit_walk_duration_ms: f64,

    pub presence_channels: usize,
    pub vision_debounce_ms: u64,
    pub hardware_debounce_ms: u64,

    pub link_heartbeat_ms: u64,
    pub tick_hz: u32,
}

impl Default for CrossingConfig {
    fn default() -> Self {
        Self {
            max_demand: MAX_DEMAND,
            base_fill_duration_ms: BASE_FILL_DURATION_MS,
            safety_buffer_duration_ms: SAFETY_BUFFER_DURATION_MS,
            crowd_bonus_factor: CROWD_BONUS_FACTOR,
            base_walk_leds: BASE_WALK_LEDS,
            leds_per_person: LEDS_PER_PERSON,
            max_leds: MAX_LEDS,
            visual_led_count: VISUAL_LED_COUNT,
            ms_per_walk_unit_normal: MS_PER_WALK_UNIT_NORMAL,
            ms_per_walk_unit_slow: MS_PER_WALK_UNIT_SLOW,
            clearance_duration_ms: CLEARANCE_DURATION_MS,
            vehicle_yellow_duration_ms: VEHICLE_YELLOW_DURATION_MS,
            car_red_yellow_duration_ms: CAR_RED_YELLOW_DURATION_MS,
            transit_yellow_duration_ms: TRANSIT_YELLOW_DURATION_MS,
            transit_pre_green_duration_ms: TRANSIT_PRE_GREEN_DURATION_MS,
            transit_walk_duration_ms: TRANSIT_WALK_DURATION_MS,
            presence_channels: PRESENCE_CHANNELS,
            vision_debounce_ms: VISION_DEBOUNCE_MS,
            hardware_debounce_ms: HARDWARE_DEBOUNCE_MS,
            link_heartbeat_ms: LINK_HEARTBEAT_MS,
            tick_hz: TICK_HZ,
        }
    }
}

impl CrossingConfig {
    /// Load from a TOML file and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Whole Filling phase: base fill plus the all-red safety buffer
    pub fn fill_total_ms(&self) -> f64 {
        self.base_fill_duration_ms + self.safety_buffer_duration_ms
    }

    /// Walk budget granted when Filling completes with `demand` waiting
    pub fn initial_walk_budget(&self, demand: u32) -> f64 {
        let leds = self
            .base_walk_leds
            .saturating_add(demand.saturating_mul(self.leds_per_person));
        leds.min(self.max_leds) as f64
    }

    /// Transit walk spreads `transit_walk_duration_ms` over a full budget
    pub fn ms_per_walk_unit_transit(&self) -> f64 {
        self.transit_walk_duration_ms / self.max_leds as f64
    }

    /// Reject inconsistent settings; a failure here must stop startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_demand", self.max_demand as f64),
            ("base_fill_duration_ms", self.base_fill_duration_ms),
            ("safety_buffer_duration_ms", self.safety_buffer_duration_ms),
            ("max_leds", self.max_leds as f64),
            ("visual_led_count", self.visual_led_count as f64),
            ("ms_per_walk_unit_normal", self.ms_per_walk_unit_normal),
            ("ms_per_walk_unit_slow", self.ms_per_walk_unit_slow),
            ("clearance_duration_ms", self.clearance_duration_ms),
            ("vehicle_yellow_duration_ms", self.vehicle_yellow_duration_ms),
            ("car_red_yellow_duration_ms", self.car_red_yellow_duration_ms),
            ("transit_yellow_duration_ms", self.transit_yellow_duration_ms),
            ("transit_pre_green_duration_ms", self.transit_pre_green_duration_ms),
            ("transit_walk_duration_ms", self.transit_walk_duration_ms),
            ("link_heartbeat_ms", self.link_heartbeat_ms as f64),
            ("tick_hz", self.tick_hz as f64),
        ];
        for (field, value) in positive {
            // NaN fails this check too
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive { field, value });
            }
        }

        if self.max_leds < self.base_walk_leds {
            return Err(ConfigError::LedLimits {
                max_leds: self.max_leds,
                base_walk_leds: self.base_walk_leds,
            });
        }

        if !(self.crowd_bonus_factor >= 0.0) {
            return Err(ConfigError::NegativeCrowdBonus(self.crowd_bonus_factor));
        }

        if self.presence_channels > PRESENCE_CHANNELS {
            return Err(ConfigError::TooManyPresenceChannels(self.presence_channels));
        }

        let yellow_and_buffer = self.vehicle_yellow_duration_ms + self.safety_buffer_duration_ms;
        if yellow_and_buffer > self.fill_total_ms() {
            return Err(ConfigError::DoesNotFit {
                inner: "vehicle yellow + safety buffer",
                inner_ms: yellow_and_buffer,
                outer: "fill",
                outer_ms: self.fill_total_ms(),
            });
        }
        if self.car_red_yellow_duration_ms > self.clearance_duration_ms {
            return Err(ConfigError::DoesNotFit {
                inner: "car_red_yellow_duration_ms",
                inner_ms: self.car_red_yellow_duration_ms,
                outer: "clearance_duration_ms",
                outer_ms: self.clearance_duration_ms,
            });
        }
        if self.transit_yellow_duration_ms > self.transit_pre_green_duration_ms {
            return Err(ConfigError::DoesNotFit {
                inner: "transit_yellow_duration_ms",
                inner_ms: self.transit_yellow_duration_ms,
                outer: "transit_pre_green_duration_ms",
                outer_ms: self.transit_pre_green_duration_ms,
            });
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
