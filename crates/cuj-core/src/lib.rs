pub mod config;
pub mod events;
pub mod perf;
pub mod plan;
pub mod types;

pub use config::{MeetConfig, ScenarioVars};
pub use events::{EventLog, EventPayload};
pub use perf::{Direction, Metric, ResultBag};
pub use plan::{window_duration, StepPlan};
pub use types::*;
