//! cujrun - user-journey scenario runner
//!
//! Library components: deadline contexts, the cleanup stack, driver
//! contracts, the tiered runner, telemetry recording and retry helpers.

pub mod cleanup;
pub mod deadline;
pub mod driver;
pub mod error;
pub mod participants;
pub mod poll;
pub mod recorder;
pub mod rooms;
pub mod runner;
pub mod session;
pub mod sim;

pub use cleanup::{cleanup_fn, CleanupFn, CleanupStack};
pub use deadline::{Context, ContextError, Releaser};
pub use driver::{BrowsingDriver, Conference, ConferenceDriver, StepArgs, VideoDriver, Workload};
pub use error::{ErrorKind, Result, ResultExt, ScenarioError};
pub use recorder::{GpuCollector, Recorder};
pub use rooms::run_with_room_urls;
pub use runner::{run, ScenarioParams, ScenarioReport, StepOutcome};
pub use session::{prepare_fn, BrowserSession, Prepare};
