mod controller;
mod state;
mod trigger;

pub use controller::{Controller, CycleOutcome, SkipReason};
pub use state::EngineState;
pub use trigger::run_periodic;
