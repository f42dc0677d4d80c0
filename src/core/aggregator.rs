//! Person count aggregator
//!
//! Vision count and hall-sensor occupancy observe the same queue through
//! different means, so they are combined by taking the larger, not summed.
//! Each source is debounced on its own window.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::CrossingConfig;
use crate::CHANNEL_COUNT;

/// One debounced input: `confirmed` only follows `pending` after `pending`
/// has been unchanged for at least `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Debounced<T> {
    pending: T,
    pending_since_ms: u64,
    confirmed: T,
    window_ms: u64,
}

impl<T: Copy + PartialEq> Debounced<T> {
    pub fn new(initial: T, window_ms: u64) -> Self {
        Self {
            pending: initial,
            pending_since_ms: 0,
            confirmed: initial,
            window_ms,
        }
    }

    /// Feed a raw sample taken at `now_ms`, return the confirmed value
    pub fn update(&mut self, raw: T, now_ms: u64) -> T {
        if raw != self.pending {
            self.pending = raw;
            self.pending_since_ms = now_ms;
        }
        if now_ms.saturating_sub(self.pending_since_ms) >= self.window_ms {
            self.confirmed = self.pending;
        }
        self.confirmed
    }

    /// Drop history and confirm `value` immediately
    pub fn force(&mut self, value: T, now_ms: u64) {
        self.pending = value;
        self.pending_since_ms = now_ms;
        self.confirmed = value;
    }

    pub fn pending(&self) -> T {
        self.pending
    }

    pub fn confirmed(&self) -> T {
        self.confirmed
    }
}

/// Per-source breakdown of the last update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandBreakdown {
    pub vision: u32,
    pub hardware: u32,
    pub demand: u32,
    pub vision_present: bool,
    pub hardware_present: bool,
}

/// Merges the vision count and the presence channels into one demand value
#[derive(Debug, Clone)]
pub struct PersonCountAggregator {
    max_demand: u32,
    vision: Debounced<u32>,
    hardware: Vec<Debounced<u8>>,
    last: DemandBreakdown,
}

impl PersonCountAggregator {
    pub fn new(config: &CrossingConfig) -> Self {
        let channels = config.presence_channels.min(CHANNEL_COUNT);
        Self {
            max_demand: config.max_demand,
            vision: Debounced::new(0, config.vision_debounce_ms),
            hardware: vec![Debounced::new(0, config.hardware_debounce_ms); channels],
            last: DemandBreakdown {
                vision: 0,
                hardware: 0,
                demand: 0,
                vision_present: false,
                hardware_present: false,
            },
        }
    }

    /// Recompute demand.
    ///
    /// `None` for a source means it is absent (vision fault, link down); an
    /// absent source contributes zero and its record is reset so that a
    /// returning source starts from a clean window. Channels beyond the
    /// configured presence count, including the transit detectors, are ignored.
    pub fn update(
        &mut self,
        vision_count: Option<u32>,
        hardware_channels: Option<&[u8; CHANNEL_COUNT]>,
        now_ms: u64,
    ) -> u32 {
        let vision = match vision_count {
            Some(count) => self.vision.update(count, now_ms),
            None => {
                self.vision.force(0, now_ms);
                0
            }
        };

        let hardware: u32 = match hardware_channels {
            Some(channels) => self
                .hardware
                .iter_mut()
                .zip(channels.iter())
                .map(|(record, &raw)| record.update(raw.min(1), now_ms) as u32)
                .sum(),
            None => {
                for record in &mut self.hardware {
                    record.force(0, now_ms);
                }
                0
            }
        };

        let demand = vision.max(hardware).min(self.max_demand);
        if demand != self.last.demand {
            trace!(vision, hardware, demand, "demand changed");
        }

        self.last = DemandBreakdown {
            vision,
            hardware,
            demand,
            vision_present: vision_count.is_some(),
            hardware_present: hardware_channels.is_some(),
        };
        demand
    }

    pub fn demand(&self) -> u32 {
        self.last.demand
    }

    pub fn breakdown(&self) -> DemandBreakdown {
        self.last
    }

    pub fn hardware_records(&self) -> &[Debounced<u8>] {
        &self.hardware
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> PersonCountAggregator {
        PersonCountAggregator::new(&CrossingConfig::default())
    }

    #[test]
    fn test_debounce_waits_for_window() {
        let mut d = Debounced::new(0u32, 250);
        assert_eq!(d.update(3, 1000), 0);
        assert_eq!(d.update(3, 1100), 0);
        assert_eq!(d.update(3, 1249), 0);
        assert_eq!(d.update(3, 1250), 3);
    }

    #[test]
    fn test_debounce_restarts_on_change() {
        let mut d = Debounced::new(0u32, 250);
        d.update(3, 1000);
        d.update(4, 1200);
        assert_eq!(d.update(4, 1300), 0);
        assert_eq!(d.update(4, 1450), 4);
        assert_eq!(d.pending(), 4);
    }

    #[test]
    fn test_debounce_independent_of_tick_count() {
        for step in [1u64, 7, 16, 50, 125, 300] {
            let mut d = Debounced::new(0u32, 250);
            let mut t = 10_000;
            while t <= 10_000 + 600 {
                d.update(5, t);
                t += step;
            }
            assert_eq!(d.confirmed(), 5, "step {}", step);
        }
    }

    #[test]
    fn test_glitch_never_confirmed() {
        let mut d = Debounced::new(0u8, 300);
        d.update(1, 1000);
        d.update(0, 1050);
        for t in (1100..2000).step_by(16) {
            assert_eq!(d.update(0, t), 0);
        }
    }

    #[test]
    fn test_sources_combined_by_max() {
        let mut a = aggregator();
        let channels = [1, 1, 0, 0, 0, 0, 0, 0];
        a.update(Some(4), Some(&channels), 1000);
        let demand = a.update(Some(4), Some(&channels), 2000);
        assert_eq!(demand, 4);

        let channels = [1, 1, 1, 1, 1, 0, 0, 0];
        a.update(Some(4), Some(&channels), 3000);
        let demand = a.update(Some(4), Some(&channels), 4000);
        assert_eq!(demand, 5);
        assert_eq!(a.breakdown().vision, 4);
        assert_eq!(a.breakdown().hardware, 5);
    }

    #[test]
    fn test_transit_channels_excluded() {
        let mut a = aggregator();
        let channels = [0, 0, 0, 0, 0, 0, 1, 1];
        a.update(None, Some(&channels), 1000);
        assert_eq!(a.update(None, Some(&channels), 2000), 0);
    }

    #[test]
    fn test_demand_capped() {
        let mut a = aggregator();
        a.update(Some(40), None, 1000);
        assert_eq!(a.update(Some(40), None, 2000), crate::MAX_DEMAND);
    }

    #[test]
    fn test_absent_source_falls_back() {
        let mut a = aggregator();
        let channels = [1, 1, 1, 0, 0, 0, 0, 0];
        a.update(Some(1), Some(&channels), 1000);
        assert_eq!(a.update(Some(1), Some(&channels), 2000), 3);

        // link down: vision only
        assert_eq!(a.update(Some(1), None, 2100), 1);
        assert!(!a.breakdown().hardware_present);

        // vision fault: hardware only, fresh window
        a.update(None, Some(&channels), 2200);
        assert_eq!(a.update(None, Some(&channels), 2600), 3);
    }

    #[test]
    fn test_fewer_presence_channels_configured() {
        let config = CrossingConfig {
            presence_channels: 2,
            ..Default::default()
        };
        let mut a = PersonCountAggregator::new(&config);
        let channels = [1, 1, 1, 1, 0, 0, 0, 0];
        a.update(None, Some(&channels), 1000);
        assert_eq!(a.update(None, Some(&channels), 2000), 2);
        assert_eq!(a.hardware_records().len(), 2);
    }
}
