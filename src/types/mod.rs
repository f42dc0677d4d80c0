//! Crossing data types

pub mod event;
pub mod lights;
pub mod phase;
pub mod snapshot;
pub mod state;

pub use event::PhaseEvent;
pub use lights::{LightState, PedestrianLight, VehicleLight};
pub use phase::Phase;
pub use snapshot::CrossingSnapshot;
pub use state::{ControllerState, Triggers};
