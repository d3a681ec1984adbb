//! Deadline context.
//!
//! A [`Context`] bundles a monotonic deadline, a cancellation token and a set
//! of string annotations. It is the only cancellation mechanism in the runner:
//! every blocking call takes one and gives up once it is done.
//!
//! Derived contexts never outlive their parent. Cancellation flows from parent
//! to child only, via [`CancellationToken::child_token`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    #[error("invalid deadline: later than the parent deadline")]
    InvalidDeadline,
}

/// Cancellation and deadline carrier passed to every operation.
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Option<Instant>,
    token: CancellationToken,
    annotations: Arc<BTreeMap<String, String>>,
}

/// Cancels a derived context when released or dropped.
///
/// Releasing never affects the parent.
#[derive(Debug)]
pub struct Releaser {
    token: CancellationToken,
}

impl Releaser {
    /// Cancel the derived context without giving up the releaser.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Releaser {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl Context {
    /// Root context with no deadline.
    pub fn background() -> Self {
        Self {
            deadline: None,
            token: CancellationToken::new(),
            annotations: Arc::new(BTreeMap::new()),
        }
    }

    fn child(&self, deadline: Option<Instant>) -> (Self, Releaser) {
        let token = self.token.child_token();
        let ctx = Self {
            deadline,
            token: token.clone(),
            annotations: Arc::clone(&self.annotations),
        };
        (ctx, Releaser { token })
    }

    /// Child that can be cancelled independently of the parent.
    pub fn with_cancel(&self) -> (Self, Releaser) {
        self.child(self.deadline)
    }

    /// Child whose deadline is `timeout` from now, capped at the parent's.
    pub fn with_timeout(&self, timeout: Duration) -> (Self, Releaser) {
        let wanted = Instant::now().checked_add(timeout);
        let deadline = match (wanted, self.deadline) {
            (Some(w), Some(p)) => Some(w.min(p)),
            (Some(w), None) => Some(w),
            (None, p) => p,
        };
        self.child(deadline)
    }

    /// Child with an explicit deadline, which must not be after the parent's.
    pub fn derive(&self, deadline: Instant) -> Result<(Self, Releaser), ContextError> {
        if let Some(parent) = self.deadline {
            if deadline > parent {
                return Err(ContextError::InvalidDeadline);
            }
        }
        Ok(self.child(Some(deadline)))
    }

    /// Child that ends `reserve` before the parent, keeping that tail for cleanup.
    ///
    /// When `reserve` is not smaller than the remaining time the child is
    /// already done at creation; the parent still has its full budget.
    /// A parent without a deadline yields a child without one.
    pub fn shorten(&self, reserve: Duration) -> (Self, Releaser) {
        let now = Instant::now();
        let deadline = self.deadline.map(|d| match d.checked_sub(reserve) {
            Some(shortened) if shortened > now => shortened,
            _ => now,
        });
        self.child(deadline)
    }

    /// Copy that keeps the deadline and annotations but ignores cancellation
    /// of `self`. Cleanups run under such a context.
    pub fn without_cancel(&self) -> Self {
        Self {
            deadline: self.deadline,
            token: CancellationToken::new(),
            annotations: Arc::clone(&self.annotations),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, clamped at zero.
    /// Returns [`Duration::MAX`] when there is no deadline.
    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(d) => d.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Why the context is done, if it is.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// `Ok(())` while the context is live.
    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Sleep for `duration` unless the context ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        self.run(tokio::time::sleep(duration)).await
    }

    /// Drive `fut` to completion unless the context ends first.
    ///
    /// A future that is ready on its first poll wins even against an expired
    /// context.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        tokio::select! {
            biased;
            out = fut => Ok(out),
            () = self.done() => Err(self.err().unwrap_or(ContextError::DeadlineExceeded)),
        }
    }

    /// Copy with one extra annotation.
    #[must_use]
    pub fn with_annotation(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut annotations = (*self.annotations).clone();
        annotations.insert(key.into(), value.into());
        Self {
            deadline: self.deadline,
            token: self.token.clone(),
            annotations: Arc::new(annotations),
        }
    }

    /// Copy with several annotations merged in; later values win.
    #[must_use]
    pub fn with_annotations<I, K, V>(&self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut annotations = (*self.annotations).clone();
        annotations.extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self {
            deadline: self.deadline,
            token: self.token.clone(),
            annotations: Arc::new(annotations),
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn annotations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.annotations
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
