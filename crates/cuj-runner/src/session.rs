//! Browser session collaborator and scenario preparation.

use crate::cleanup::CleanupFn;
use crate::deadline::Context;
use crate::error::Result;
use crate::recorder::{GpuCollector, Recorder};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Live desktop session a scenario runs in.
///
/// Every call that changes device state returns the [`CleanupFn`] restoring it.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Reference browser launch time, measured fresh.
    async fn browser_start_time(&self, ctx: &Context, tablet: bool) -> Result<Duration>;

    /// App launch time; `None` without an Android container.
    async fn app_start_time(&self, _ctx: &Context) -> Result<Option<Duration>> {
        Ok(None)
    }

    /// Apply the initial device settings for measurement.
    async fn apply_settings(&self, ctx: &Context) -> Result<CleanupFn>;

    async fn set_tablet_mode(&self, ctx: &Context, tablet: bool) -> Result<CleanupFn>;

    async fn mute(&self, ctx: &Context) -> Result<CleanupFn>;

    /// Capture a UI tree snapshot and screenshot into `dir`.
    async fn dump_ui(&self, ctx: &Context, dir: &Path) -> Result<()>;

    async fn open_recorder(&self, ctx: &Context) -> Result<Arc<dyn Recorder>>;

    fn gpu_collector(&self) -> Arc<dyn GpuCollector>;
}

/// Yields the session URL for a scenario and the cleanup that releases it.
pub type Prepare = Box<dyn FnOnce(Context) -> BoxFuture<'static, Result<(String, CleanupFn)>> + Send>;

/// Box an async closure as a [`Prepare`].
pub fn prepare_fn<F, Fut>(f: F) -> Prepare
where
    F: FnOnce(Context) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(String, CleanupFn)>> + Send + 'static,
{
    Box::new(move |ctx| Box::pin(f(ctx)))
}
