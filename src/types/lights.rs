//! Light outputs for the pedestrian head and the paired vehicle head

use serde::{Deserialize, Serialize};

/// Pedestrian signal head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PedestrianLight {
    pub red: bool,
    pub green: bool,
}

impl PedestrianLight {
    pub const STOP: Self = Self { red: true, green: false };
    pub const WALK: Self = Self { red: false, green: true };
}

/// Vehicle signal head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VehicleLight {
    pub red: bool,
    pub yellow: bool,
    pub green: bool,
}

impl VehicleLight {
    pub const GREEN: Self = Self { red: false, yellow: false, green: true };
    pub const YELLOW: Self = Self { red: false, yellow: true, green: false };
    pub const RED: Self = Self { red: true, yellow: false, green: false };
    pub const RED_YELLOW: Self = Self { red: true, yellow: true, green: false };
}

/// Both heads together, as sent in one `L` line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LightState {
    pub pedestrian: PedestrianLight,
    pub vehicle: VehicleLight,
}

impl LightState {
    pub fn new(pedestrian: PedestrianLight, vehicle: VehicleLight) -> Self {
        Self { pedestrian, vehicle }
    }

    /// Pedestrians and vehicles must never both be allowed to go
    pub fn is_consistent(&self) -> bool {
        !(self.pedestrian.green && (self.vehicle.green || self.vehicle.yellow))
    }
}

impl Default for LightState {
    fn default() -> Self {
        Self::new(PedestrianLight::STOP, VehicleLight::GREEN)
    }
}
