//! Room URL selection with participant-count retry.
//!
//! Fixture rooms are shared and sometimes short of bots. A scenario that fails
//! on participant count is retried against the next URL; with a retry timeout
//! the whole sweep is repeated until it passes or the timeout runs out.

use crate::deadline::Context;
use crate::error::{Result, ScenarioError};
use crate::poll::{poll, poll_break, Failure, PollOptions};
use cuj_core::MeetConfig;
use std::future::Future;
use std::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// Try each URL in `urls` in order until `run_once` succeeds.
///
/// Only participant-count failures move on to the next URL.
async fn sweep<T, F, Fut>(ctx: &Context, urls: &[String], run_once: &F) -> Result<T>
where
    F: Fn(Context, String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last = None;
    for url in urls {
        info!(url = %url, "running scenario against room");
        match run_once(ctx.clone(), url.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_participant_error() => {
                warn!(url = %url, error = %err, "room has the wrong participant count, trying next URL");
                last = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last.unwrap_or_else(|| ScenarioError::Prepare("no conference URLs to try".into())))
}

/// Run a conference scenario against the configured room URLs.
///
/// A zero retry timeout means a single sweep. Otherwise sweeps repeat every
/// `retry_interval` while they fail on participant count; any other error
/// stops at once. When the timeout cuts a sweep short, the error from the last
/// sweep that finished in time is reported.
pub async fn run_with_room_urls<T, F, Fut>(ctx: &Context, config: &MeetConfig, run_once: F) -> Result<T>
where
    F: Fn(Context, String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if config.urls.is_empty() {
        return Err(ScenarioError::Prepare("no conference URLs configured".into()));
    }
    if config.retry_timeout.is_zero() {
        return sweep(ctx, &config.urls, &run_once).await;
    }

    let started = Instant::now();
    let last_complete: Mutex<Option<ScenarioError>> = Mutex::new(None);
    let run_once = &run_once;
    let last_ref = &last_complete;
    let opts = PollOptions::new(config.retry_interval, config.retry_timeout);

    let result = poll(ctx, opts, |pctx| async move {
        let err = match sweep(&pctx, &config.urls, run_once).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let participant = err.is_participant_error();
        // Runs cut short by the timeout are not kept as the reported failure.
        let err = if started.elapsed() < config.retry_timeout {
            let summary = ScenarioError::Upstream(err.to_string());
            if let Ok(mut slot) = last_ref.lock() {
                *slot = Some(err);
            }
            summary
        } else {
            err
        };
        if participant {
            info!(
                interval_secs = config.retry_interval.as_secs(),
                "retrying room sweep"
            );
            Err(Failure::Retry(err))
        } else {
            Err(poll_break(err))
        }
    })
    .await;

    match result {
        Ok(value) => Ok(value),
        Err(err) if ctx.is_cancelled() => Err(err),
        Err(err) => {
            let last = last_complete.lock().ok().and_then(|mut slot| slot.take());
            Err(last.unwrap_or(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn config(urls: &[&str], timeout: Duration) -> MeetConfig {
        MeetConfig {
            account: None,
            password: None,
            urls: urls.iter().map(|u| (*u).to_string()).collect(),
            retry_timeout: timeout,
            retry_interval: Duration::from_secs(60),
        }
    }

    fn short_room() -> ScenarioError {
        ScenarioError::ParticipantCount {
            got: 1,
            want: "5 ~ 6".into(),
        }
    }

    #[tokio::test]
    async fn participant_failure_moves_to_next_url() {
        let tried = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&tried);
        let ctx = Context::background();
        let got = run_with_room_urls(&ctx, &config(&["a", "b", "c"], Duration::ZERO), |_, url| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(url.clone());
                if url == "b" {
                    Ok(url)
                } else {
                    Err(short_room())
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(got, "b");
        assert_eq!(*tried.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn other_failures_stop_the_sweep() {
        let calls = AtomicU32::new(0);
        let ctx = Context::background();
        let err = run_with_room_urls(&ctx, &config(&["a", "b"], Duration::ZERO), |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ScenarioError::Auth("expired".into())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ScenarioError::Auth(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_repeat_until_timeout() {
        let calls = AtomicU32::new(0);
        let ctx = Context::background();
        let start = Instant::now();
        let err = run_with_room_urls(&ctx, &config(&["a", "b"], Duration::from_secs(150)), |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(short_room()) }
        })
        .await
        .unwrap_err();
        // Sweeps at 0 s, 60 s and 120 s, two URLs each.
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert!(err.is_participant_error());
        assert_eq!(start.elapsed(), Duration::from_secs(150));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_last_complete_sweep() {
        let calls = AtomicU32::new(0);
        let ctx = Context::background();
        let err = run_with_room_urls(&ctx, &config(&["a"], Duration::from_secs(90)), |ctx, _| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    return Err::<(), _>(short_room());
                }
                // Second sweep overruns the retry timeout.
                ctx.sleep(Duration::from_secs(600)).await?;
                Ok(())
            }
        })
        .await
        .unwrap_err();
        assert!(err.is_participant_error(), "got {err}");
    }

    #[tokio::test]
    async fn empty_url_list_is_a_prepare_error() {
        let ctx = Context::background();
        let err = run_with_room_urls(&ctx, &config(&[], Duration::ZERO), |_, _| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Prepare);
    }
}
