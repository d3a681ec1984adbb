//! Scoped cleanup stack.
//!
//! Every acquiring call hands back a [`CleanupFn`]; the caller pushes it right
//! after the acquisition succeeds, together with the context the release must
//! run under. [`CleanupStack::run_all`] unwinds in LIFO order.

use crate::deadline::Context;
use crate::error::{Result, ScenarioError};
use futures_util::future::BoxFuture;
use std::future::Future;
use tracing::{debug, warn};

/// Release thunk for an acquired resource.
pub type CleanupFn = Box<dyn FnOnce(Context) -> BoxFuture<'static, Result<()>> + Send>;

/// Box an async closure as a [`CleanupFn`].
pub fn cleanup_fn<F, Fut>(f: F) -> CleanupFn
where
    F: FnOnce(Context) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move |ctx| Box::pin(f(ctx)))
}

/// Cleanup that does nothing.
pub fn noop() -> CleanupFn {
    cleanup_fn(|_ctx| async { Ok(()) })
}

struct Entry {
    name: String,
    ctx: Context,
    thunk: CleanupFn,
}

/// LIFO registry of cleanup thunks.
#[derive(Default)]
pub struct CleanupStack {
    entries: Vec<Entry>,
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupStack")
            .field(
                "entries",
                &self.entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cleanup to run under `ctx`.
    pub fn push(&mut self, name: impl Into<String>, ctx: &Context, thunk: CleanupFn) {
        let name = name.into();
        debug!(cleanup = %name, "registered cleanup");
        self.entries.push(Entry {
            name,
            ctx: ctx.clone(),
            thunk,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every thunk, newest first.
    ///
    /// Returns the first failure; later failures are logged.
    pub async fn run_all(&mut self) -> Result<()> {
        self.run_all_with(|_, _| {}).await
    }

    /// Like [`run_all`](Self::run_all), reporting each failure to `on_failure`.
    ///
    /// Each thunk gets its registered context detached from cancellation, so
    /// a cancelled scenario still releases what it acquired. A thunk still
    /// running at that context's deadline is abandoned.
    pub async fn run_all_with<F>(&mut self, mut on_failure: F) -> Result<()>
    where
        F: FnMut(&str, &ScenarioError),
    {
        let mut first: Option<ScenarioError> = None;
        while let Some(entry) = self.entries.pop() {
            let ctx = entry.ctx.without_cancel();
            let outcome = match ctx.run((entry.thunk)(ctx.clone())).await {
                Ok(result) => result,
                Err(err) => Err(ScenarioError::from(err)),
            };
            match outcome {
                Ok(()) => debug!(cleanup = %entry.name, "cleanup finished"),
                Err(err) => {
                    let err = err.with_step(entry.name.clone());
                    on_failure(&entry.name, &err);
                    if first.is_none() {
                        warn!(cleanup = %entry.name, error = %err, "cleanup failed");
                        first = Some(err);
                    } else {
                        warn!(cleanup = %entry.name, error = %err, "additional cleanup failure");
                    }
                }
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!(
                pending = self.entries.len(),
                "cleanup stack dropped with pending cleanups"
            );
        }
    }
}
