//! Tiered scenario runner.
//!
//! Drives one scenario end to end:
//! - reserve cleanup time, prepare the session and register its release
//! - capture reference metrics and apply device settings
//! - open a measurement window running the tier's step plan next to a single
//!   GPU collection task
//! - record, save, then unwind the cleanup stack on every exit path

use crate::cleanup::{cleanup_fn, CleanupStack};
use crate::deadline::Context;
use crate::driver::{StepArgs, Workload};
use crate::error::{Result, ResultExt, ScenarioError};
use crate::recorder::run_window;
use crate::session::{BrowserSession, Prepare};
use cuj_core::events::{
    CleanupFailedPayload, ScenarioCompletedPayload, ScenarioFailedPayload, ScenarioStartedPayload,
    StepFinishedPayload, StepSkippedPayload, StepStartedPayload, WindowClosedPayload,
};
use cuj_core::{
    window_duration, Direction, EventLog, EventPayload, Id, Metric, ResultBag, RoomSize,
    ScenarioKind, ScenarioVars, Step, StepPlan, StepStatus, Tier,
};
use futures_util::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Time kept back from the scenario for releasing what it acquired.
pub const CLEANUP_RESERVE: Duration = Duration::from_secs(5);

/// Time kept back for restoring the initial device settings.
pub const SETTINGS_RESERVE: Duration = Duration::from_secs(10);

/// Extra time the GPU collector may run past the window.
pub const GPU_GRACE: Duration = Duration::from_secs(5);

/// Subdirectory of the output directory for failure diagnostics.
pub const DIAGNOSTICS_DIR: &str = "service";

pub const BROWSER_START_TIME: &str = "Browser.StartTime";
pub const APPS_START_TIME: &str = "Apps.StartTime";
pub const LOST_NETWORK_COUNT: &str = "Conference.LostNetworkCount";
pub const DISPLAY_ALL_PARTICIPANTS_TIME: &str = "Conference.DisplayAllParticipantsTime";

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioParams {
    pub kind: ScenarioKind,
    pub tier: Tier,
    pub room: RoomSize,
    pub out_dir: PathBuf,
    /// Force tablet (`true`) or clamshell (`false`); `None` defers to the
    /// `cuj_mode` variable and otherwise leaves the device alone.
    pub tablet_mode: Option<bool>,
}

impl ScenarioParams {
    pub fn new(kind: ScenarioKind, tier: Tier, room: RoomSize, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            tier,
            room,
            out_dir: out_dir.into(),
            tablet_mode: None,
        }
    }

    #[must_use]
    pub fn with_tablet_mode(mut self, tablet: bool) -> Self {
        self.tablet_mode = Some(tablet);
        self
    }

    /// Screen mode to enter: the forced one, else the `cuj_mode` variable.
    pub fn resolve_tablet_mode(&self, vars: &ScenarioVars) -> Option<bool> {
        self.tablet_mode.or_else(|| vars.cuj_mode.map(|m| m.is_tablet()))
    }

    pub fn window(&self) -> Duration {
        window_duration(self.tier, self.room)
    }

    pub fn plan(&self) -> Vec<Step> {
        StepPlan::for_kind(self.kind).steps_for(self.tier, self.room)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: Step,
    pub status: StepStatus,
    pub duration: Duration,
}

/// Result of a successful scenario.
#[derive(Debug)]
pub struct ScenarioReport {
    pub scenario_id: Id,
    pub steps: Vec<StepOutcome>,
    pub window: Duration,
    pub bag: ResultBag,
    /// Chart files written into the output directory.
    pub charts: Vec<PathBuf>,
}

impl ScenarioReport {
    /// Steps that ran to completion, in order.
    pub fn executed(&self) -> Vec<Step> {
        self.with_status(StepStatus::Succeeded)
    }

    pub fn skipped(&self) -> Vec<Step> {
        self.with_status(StepStatus::Skipped)
    }

    fn with_status(&self, status: StepStatus) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|o| o.status == status)
            .map(|o| o.step)
            .collect()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn emit(log: &mut EventLog, payload: EventPayload) {
    if let Err(err) = log.emit(payload) {
        warn!(error = %err, "failed to write scenario event");
    }
}

/// Run one scenario.
///
/// `workload` must match the shape of `params.kind`. The caller keeps
/// ownership of it; the runner leaves it torn down (room left, windows
/// closed) on return.
pub async fn run(
    ctx: &Context,
    session: Arc<dyn BrowserSession>,
    workload: &mut Workload,
    prepare: Prepare,
    params: &ScenarioParams,
) -> Result<ScenarioReport> {
    if workload.shape() != params.kind.shape() {
        return Err(ScenarioError::Setup(format!(
            "{} scenario needs a {} driver, got {}",
            params.kind.as_str(),
            params.kind.shape().as_str(),
            workload.shape().as_str()
        )));
    }

    let scenario_id = Id::new();
    let events = EventLog::open(&params.out_dir, scenario_id.clone())
        .map_err(|e| ScenarioError::Setup(format!("failed to open event log: {e}")))?;
    let mut scenario = ScenarioRun {
        params,
        session,
        cleanups: CleanupStack::new(),
        releases: CleanupStack::new(),
        events,
        steps: Vec::new(),
        failed: Arc::new(AtomicBool::new(false)),
    };

    let window = params.window();
    let tablet_mode = ScenarioVars::from_annotations(ctx.annotations())
        .ok()
        .and_then(|vars| params.resolve_tablet_mode(&vars))
        .or(params.tablet_mode);
    info!(
        scenario_id = %scenario_id,
        kind = params.kind.as_str(),
        tier = params.tier.as_str(),
        room = params.room.as_str(),
        driver = workload.name(),
        window_secs = window.as_secs(),
        "starting scenario"
    );
    emit(
        &mut scenario.events,
        EventPayload::ScenarioStarted(ScenarioStartedPayload {
            kind: params.kind,
            tier: params.tier,
            room: params.room,
            tablet_mode: tablet_mode.unwrap_or(false),
            window_ms: millis(window),
        }),
    );
    let started = Instant::now();

    let outcome = AssertUnwindSafe(scenario.execute(ctx, workload, prepare))
        .catch_unwind()
        .await;

    let result = match outcome {
        Ok(result) => result,
        Err(panic) => {
            scenario.failed.store(true, Ordering::SeqCst);
            let reason = panic_message(&*panic);
            error!(scenario_id = %scenario_id, reason = %reason, "scenario panicked, unwinding cleanups");
            if let Err(err) = scenario.unwind(ctx, workload).await {
                warn!(error = %err, "cleanup failed after panic");
            }
            emit(
                &mut scenario.events,
                EventPayload::ScenarioFailed(ScenarioFailedPayload {
                    kind: "panic".to_string(),
                    reason,
                }),
            );
            std::panic::resume_unwind(panic);
        }
    };
    if result.is_err() {
        scenario.failed.store(true, Ordering::SeqCst);
    }
    let cleanup = scenario.unwind(ctx, workload).await;
    let elapsed = started.elapsed();

    let failure = match (result, cleanup) {
        (Ok((bag, charts)), Ok(())) => {
            info!(
                scenario_id = %scenario_id,
                duration_ms = millis(elapsed),
                metrics = bag.len(),
                "scenario completed"
            );
            emit(
                &mut scenario.events,
                EventPayload::ScenarioCompleted(ScenarioCompletedPayload {
                    duration_ms: millis(elapsed),
                    metrics: bag.len(),
                }),
            );
            return Ok(ScenarioReport {
                scenario_id,
                steps: std::mem::take(&mut scenario.steps),
                window,
                bag,
                charts,
            });
        }
        (Ok(_), Err(err)) => err.with_step("cleanup"),
        (Err(err), _) => err,
    };

    error!(
        scenario_id = %scenario_id,
        kind = failure.kind().as_str(),
        error = %failure,
        "scenario failed"
    );
    emit(
        &mut scenario.events,
        EventPayload::ScenarioFailed(ScenarioFailedPayload {
            kind: failure.kind().as_str().to_string(),
            reason: failure.to_string(),
        }),
    );
    Err(failure)
}

struct ScenarioRun<'p> {
    params: &'p ScenarioParams,
    session: Arc<dyn BrowserSession>,
    /// Cleanups of the run itself, unwound before the driver is torn down.
    cleanups: CleanupStack,
    /// Release of the prepared session, unwound after the driver.
    releases: CleanupStack,
    events: EventLog,
    steps: Vec<StepOutcome>,
    /// Read by the diagnostic dump cleanup.
    failed: Arc<AtomicBool>,
}

async fn drain(stack: &mut CleanupStack, events: &mut EventLog) -> Result<()> {
    stack
        .run_all_with(|name, err| {
            emit(
                events,
                EventPayload::CleanupFailed(CleanupFailedPayload {
                    name: name.to_string(),
                    error: err.to_string(),
                }),
            );
        })
        .await
}

impl ScenarioRun<'_> {
    /// Unwind the run's cleanups, then tear the driver down, then release
    /// the session. Returns the first cleanup failure; teardown failures are
    /// only reported.
    async fn unwind(&mut self, ctx: &Context, workload: &mut Workload) -> Result<()> {
        let cleanup = drain(&mut self.cleanups, &mut self.events).await;

        let (teardown_ctx, _release) = ctx.without_cancel().with_timeout(CLEANUP_RESERVE);
        let teardown = match teardown_ctx.run(workload.teardown(&teardown_ctx)).await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = teardown {
            warn!(driver = workload.name(), error = %err, "driver teardown failed");
            emit(
                &mut self.events,
                EventPayload::CleanupFailed(CleanupFailedPayload {
                    name: "driver teardown".into(),
                    error: err.to_string(),
                }),
            );
        }

        let released = drain(&mut self.releases, &mut self.events).await;
        cleanup.and(released)
    }

    async fn execute(
        &mut self,
        ctx: &Context,
        workload: &mut Workload,
        prepare: Prepare,
    ) -> Result<(ResultBag, Vec<PathBuf>)> {
        let vars = ScenarioVars::from_annotations(ctx.annotations()).step("read scenario vars")?;

        let cleanup_ctx = ctx.clone();
        let (ctx, _release) = ctx.shorten(CLEANUP_RESERVE);

        let (url, release_session) = prepare(ctx.clone()).await.step("prepare")?;
        self.releases.push("release session", &cleanup_ctx, release_session);
        debug!(url = %url, "session prepared");

        let failed = Arc::clone(&self.failed);
        let session = Arc::clone(&self.session);
        let dump_dir = self.params.out_dir.join(DIAGNOSTICS_DIR);
        self.cleanups.push(
            "diagnostic dump",
            &cleanup_ctx,
            cleanup_fn(move |ctx| async move {
                if !failed.load(Ordering::SeqCst) {
                    return Ok(());
                }
                tokio::fs::create_dir_all(&dump_dir).await?;
                info!(dir = %dump_dir.display(), "capturing UI dump");
                session.dump_ui(&ctx, &dump_dir).await
            }),
        );

        if vars.cuj_mode.is_none() {
            if let Some(mode) = ctx.annotation("cuj_mode").filter(|m| !m.is_empty()) {
                warn!(mode, "unrecognized cuj_mode, keeping the device default");
            }
        }
        let tablet = self.params.resolve_tablet_mode(&vars);
        let browser_start = self
            .session
            .browser_start_time(&ctx, tablet.unwrap_or(false))
            .await
            .step("measure browser start time")?;
        let app_start = self
            .session
            .app_start_time(&ctx)
            .await
            .step("measure app start time")?;

        let settings_ctx = ctx.clone();
        let (ctx, _release_settings) = ctx.shorten(SETTINGS_RESERVE);
        let restore = self
            .session
            .apply_settings(&ctx)
            .await
            .step("apply initial settings")?;
        self.cleanups.push("restore settings", &settings_ctx, restore);

        if let Some(tablet) = tablet {
            let restore = self
                .session
                .set_tablet_mode(&ctx, tablet)
                .await
                .step("set screen mode")?;
            self.cleanups.push("restore screen mode", &settings_ctx, restore);
        }
        if vars.mute {
            let unmute = self.session.mute(&ctx).await.step("mute")?;
            self.cleanups.push("unmute", &settings_ctx, unmute);
        }

        let recorder = self
            .session
            .open_recorder(&ctx)
            .await
            .step("open recorder")?;
        let closer = Arc::clone(&recorder);
        self.cleanups.push(
            "close recorder",
            &settings_ctx,
            cleanup_fn(move |ctx| async move { closer.close(&ctx).await }),
        );

        let plan = self.params.plan();
        let gpu = {
            let this = &mut *self;
            let driver = &mut *workload;
            let (plan, url, extras) = (plan.as_slice(), url.as_str(), &vars.extras);
            run_window(&ctx, recorder.as_ref(), move |wctx| {
                this.measure(wctx, driver, plan, url, extras)
            })
            .await?
        };

        let mut bag = ResultBag::new();
        recorder
            .record(&ctx, &mut bag)
            .await
            .step("record metrics")?;
        bag.append(
            &Metric::new(BROWSER_START_TIME, "ms", Direction::SmallerIsBetter).cumulative(),
            &[millis_f64(browser_start)],
        )?;
        if let Some(app_start) = app_start {
            bag.append(
                &Metric::new(APPS_START_TIME, "ms", Direction::SmallerIsBetter).cumulative(),
                &[millis_f64(app_start)],
            )?;
        }
        bag.merge(&gpu).step("merge GPU metrics")?;
        self.conference_metrics(&ctx, workload, &mut bag).await?;

        let charts = bag.save(&self.params.out_dir).step("save results")?;
        recorder
            .save_histograms(&self.params.out_dir)
            .await
            .step("save histograms")?;
        Ok((bag, charts))
    }

    /// Body of the measurement window: the step plan plus the GPU task.
    async fn measure(
        &mut self,
        ctx: Context,
        workload: &mut Workload,
        plan: &[Step],
        url: &str,
        extras: &BTreeMap<String, String>,
    ) -> Result<ResultBag> {
        let window = self.params.window();
        let opened = Instant::now();

        let (gpu_ctx, gpu_release) = ctx.with_timeout(window + GPU_GRACE);
        let collector = self.session.gpu_collector();
        let gpu = tokio::spawn(async move { collector.collect(&gpu_ctx, window).await });

        let args = StepArgs {
            tier: self.params.tier,
            url,
            extras,
        };
        for (index, &step) in plan.iter().enumerate() {
            info!(step = step.as_str(), index, "step started");
            emit(
                &mut self.events,
                EventPayload::StepStarted(StepStartedPayload { step, index }),
            );
            let started = Instant::now();
            let result = workload.perform(&ctx, step, args).await;
            let duration = started.elapsed();

            match result {
                Ok(()) => {
                    info!(step = step.as_str(), duration_ms = millis(duration), "step finished");
                    self.finish_step(step, StepStatus::Succeeded, duration, None);
                }
                Err(err) if err.is_feature_unavailable() => {
                    warn!(step = step.as_str(), error = %err, "feature unavailable, skipping step");
                    self.steps.push(StepOutcome {
                        step,
                        status: StepStatus::Skipped,
                        duration,
                    });
                    emit(
                        &mut self.events,
                        EventPayload::StepSkipped(StepSkippedPayload {
                            step,
                            reason: err.to_string(),
                        }),
                    );
                }
                Err(err) => {
                    self.finish_step(step, StepStatus::Failed, duration, Some(err.to_string()));
                    gpu_release.cancel();
                    if let Err(join_err) = gpu.await {
                        warn!(error = %join_err, "GPU collector task did not exit cleanly");
                    }
                    return Err(err.with_step(step.as_str()));
                }
            }
        }

        let collected = match gpu.await {
            Ok(result) => result.step("collect GPU counters")?,
            Err(join_err) => {
                return Err(ScenarioError::Telemetry(format!(
                    "GPU collector task failed: {join_err}"
                )))
            }
        };
        drop(gpu_release);

        let elapsed = opened.elapsed();
        info!(window_ms = millis(window), elapsed_ms = millis(elapsed), "measurement window closed");
        emit(
            &mut self.events,
            EventPayload::WindowClosed(WindowClosedPayload {
                window_ms: millis(window),
                elapsed_ms: millis(elapsed),
            }),
        );
        Ok(collected)
    }

    fn finish_step(&mut self, step: Step, status: StepStatus, duration: Duration, error: Option<String>) {
        self.steps.push(StepOutcome {
            step,
            status,
            duration,
        });
        emit(
            &mut self.events,
            EventPayload::StepFinished(StepFinishedPayload {
                step,
                status,
                duration_ms: millis(duration),
                error,
            }),
        );
    }

    async fn conference_metrics(&self, ctx: &Context, workload: &Workload, bag: &mut ResultBag) -> Result<()> {
        let Some(conference) = workload.as_conference() else {
            return Ok(());
        };
        if !conference.room().has_room() {
            return Ok(());
        }
        let driver = conference.driver();
        if let Some(count) = driver
            .lost_network_count(ctx)
            .await
            .step("read lost network count")?
        {
            bag.set(
                &Metric::new(LOST_NETWORK_COUNT, "count", Direction::SmallerIsBetter),
                f64::from(count),
            )?;
        }
        if let Some(time) = driver
            .display_all_participants_time(ctx)
            .await
            .step("read participant display time")?
        {
            bag.set(
                &Metric::new(DISPLAY_ALL_PARTICIPANTS_TIME, "ms", Direction::SmallerIsBetter),
                millis_f64(time),
            )?;
        }
        Ok(())
    }
}
