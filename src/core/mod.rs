//! Core modules for the crossing controller

pub mod aggregator;
pub mod api;
pub mod controller;
pub mod link;
pub mod presentation;
pub mod protocol;
pub mod runtime;
pub mod vision;

pub use aggregator::{Debounced, DemandBreakdown, PersonCountAggregator};
pub use api::{create_router, run_server};
pub use controller::{active_units, lights_for, PhaseController, StepOutput};
pub use link::{
    LineTransport, LinkStatus, MemoryHandle, MemoryTransport, SensorLink, SensorPoll,
    SerialTransport,
};
pub use presentation::{PresentationAdapter, PresentationFrame, RingRole, RingView};
pub use protocol::{Button, Inbound, Outbound};
pub use runtime::{Crossing, OperatorCommand};
pub use vision::{
    CommandCounter, PersonCounter, ReplayCounter, VisionFeed, VisionFrame, VisionReading,
    VisionWorker,
};
