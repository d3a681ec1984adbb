//! Retry and polling primitives.
//!
//! All waiting for eventually-consistent UI state goes through these helpers.
//! Every wait is a context sleep, so cancellation is observed at each tick.

use crate::deadline::{Context, ContextError};
use crate::error::{Result, ScenarioError};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Options for [`poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Pause between attempts.
    pub interval: Duration,
    /// Total budget. `None` polls until the context ends; zero runs the
    /// action exactly once.
    pub timeout: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            timeout: None,
        }
    }
}

impl PollOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout: Some(timeout),
        }
    }
}

/// Failure returned by a polled action.
#[derive(Debug)]
pub enum Failure<E> {
    /// Transient; try again after the interval.
    Retry(E),
    /// Not retryable; stop polling and return the error.
    Break(E),
}

impl<E> From<E> for Failure<E> {
    fn from(err: E) -> Self {
        Self::Retry(err)
    }
}

/// Abort polling immediately with `err`.
pub fn poll_break<E>(err: E) -> Failure<E> {
    Failure::Break(err)
}

/// Invoke `action` until it succeeds, breaks, or the timeout elapses.
///
/// On timeout the last retryable error is returned. If the caller's context
/// is cancelled, a cancellation error is returned instead.
pub async fn poll<T, E, F, Fut>(ctx: &Context, opts: PollOptions, mut action: F) -> std::result::Result<T, E>
where
    F: FnMut(Context) -> Fut,
    Fut: Future<Output = std::result::Result<T, Failure<E>>>,
    E: From<ContextError>,
{
    if opts.timeout == Some(Duration::ZERO) {
        return match action(ctx.clone()).await {
            Ok(v) => Ok(v),
            Err(Failure::Retry(e) | Failure::Break(e)) => Err(e),
        };
    }

    let (poll_ctx, _release) = match opts.timeout {
        Some(timeout) => ctx.with_timeout(timeout),
        None => ctx.with_cancel(),
    };

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let last = match action(poll_ctx.clone()).await {
            Ok(v) => return Ok(v),
            Err(Failure::Break(e)) => return Err(e),
            Err(Failure::Retry(e)) => e,
        };
        debug!(attempt, "poll attempt failed");

        if let Some(ContextError::Cancelled) = ctx.err() {
            return Err(ContextError::Cancelled.into());
        }
        if poll_ctx.sleep(opts.interval).await.is_err() {
            if let Some(ContextError::Cancelled) = ctx.err() {
                return Err(ContextError::Cancelled.into());
            }
            return Err(last);
        }
    }
}

/// Invoke `action` up to `attempts` times, with no pause between attempts.
///
/// Returns the first success or the last error.
pub async fn retry<T, F, Fut>(attempts: u32, mut action: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match action().await {
            Ok(v) => return Ok(v),
            Err(err) if attempt < attempts && !err.is_cancellation() => {
                debug!(attempt, error = %err, "retrying");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Like [`retry`] with a context-aware pause between attempts.
pub async fn retry_with_interval<T, F, Fut>(
    ctx: &Context,
    attempts: u32,
    interval: Duration,
    mut action: F,
) -> Result<T>
where
    F: FnMut(Context) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match action(ctx.clone()).await {
            Ok(v) => return Ok(v),
            Err(err) if attempt < attempts && !err.is_cancellation() => {
                debug!(attempt, error = %err, "retrying after interval");
                attempt += 1;
                if let Err(ctx_err) = ctx.sleep(interval).await {
                    return Err(match ctx_err {
                        ContextError::Cancelled => ctx_err.into(),
                        _ => err,
                    });
                }
            }
            Err(err) => return Err(err),
        }
    }
}

type StepFn<'a> = Box<dyn FnOnce(Context) -> BoxFuture<'a, Result<()>> + Send + 'a>;

/// A named unit of work for [`combine`].
pub struct NamedStep<'a> {
    name: String,
    run: StepFn<'a>,
}

impl<'a> NamedStep<'a> {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(Context) -> Fut + Send + 'a,
        Fut: Future<Output = Result<()>> + Send + 'a,
    {
        Self {
            name: name.into(),
            run: Box::new(move |ctx| Box::pin(f(ctx))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for NamedStep<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedStep").field("name", &self.name).finish()
    }
}

/// Run `steps` in order. The first failure is returned with `name` and the
/// failing step's name as breadcrumbs.
pub async fn combine(ctx: &Context, name: &str, steps: Vec<NamedStep<'_>>) -> Result<()> {
    for step in steps {
        let NamedStep { name: step_name, run } = step;
        if let Err(err) = ctx.check() {
            return Err(ScenarioError::from(err).with_step(step_name).with_step(name));
        }
        debug!(action = name, step = %step_name, "running step");
        if let Err(err) = run(ctx.clone()).await {
            return Err(err.with_step(step_name).with_step(name));
        }
    }
    Ok(())
}

/// Run `then` only if `precheck` succeeds.
pub async fn if_success_then<P, F, Fut>(precheck: P, then: F) -> Result<()>
where
    P: Future<Output = Result<()>>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    precheck.await?;
    then().await
}
