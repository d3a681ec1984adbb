//! Telemetry recorder contracts.

use crate::deadline::Context;
use crate::error::Result;
use async_trait::async_trait;
use cuj_core::ResultBag;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// File name for raw histogram data inside the output directory.
pub const HISTOGRAMS_FILE: &str = "histograms.json";

/// Samples metrics over a measurement window.
///
/// Methods take `&self` so a recorder can be shared with a cleanup thunk.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Begin sampling. Samples from now on belong to the current window.
    async fn start(&self, ctx: &Context) -> Result<()>;

    async fn stop(&self, ctx: &Context) -> Result<()>;

    /// Write the metrics collected over the window into `bag`.
    async fn record(&self, ctx: &Context, bag: &mut ResultBag) -> Result<()>;

    /// Persist raw histograms as `dir/histograms.json`.
    async fn save_histograms(&self, dir: &Path) -> Result<()>;

    /// Release probes. Safe to call more than once.
    async fn close(&self, ctx: &Context) -> Result<()>;
}

/// Reads GPU counters for a fixed duration.
#[async_trait]
pub trait GpuCollector: Send + Sync {
    /// Collect for `duration` and return `GPU.*` metrics.
    async fn collect(&self, ctx: &Context, duration: Duration) -> Result<ResultBag>;
}

/// Run `f` inside a measurement window on `recorder`.
///
/// The window is stopped even if `f` fails or the context is cancelled. An
/// error from `f` wins over an error from stopping.
pub async fn run_window<T, F, Fut>(ctx: &Context, recorder: &dyn Recorder, f: F) -> Result<T>
where
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    recorder.start(ctx).await?;
    let result = f(ctx.clone()).await;
    let stopped = recorder.stop(&ctx.without_cancel()).await;
    match (result, stopped) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(stop_err)) => {
            warn!(error = %stop_err, "failed to stop recorder after window error");
            Err(err)
        }
    }
}
