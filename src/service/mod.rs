pub mod autopilot;

pub use autopilot::{evaluate_one, AutopilotService};
