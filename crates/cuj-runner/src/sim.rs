//! Simulated back-end.
//!
//! An in-process stand-in for a live session: every driver, session and
//! recorder call is appended to a shared [`Journal`] and dwells on the tokio
//! clock the way the real UI scripts do. Participant counts, failures and
//! missing features are scripted up front.

use crate::cleanup::{cleanup_fn, noop, CleanupFn, CleanupStack};
use crate::deadline::Context;
use crate::driver::{BrowsingDriver, Conference, ConferenceDriver, VideoDriver, Workload};
use crate::error::{ErrorKind, Result, ScenarioError};
use crate::poll::{combine, if_success_then, retry, NamedStep};
use crate::recorder::{GpuCollector, Recorder, HISTOGRAMS_FILE};
use crate::session::{prepare_fn, BrowserSession, Prepare};
use async_trait::async_trait;
use cuj_core::{Direction, Metric, PresentApp, ResultBag, RoomSize, ScenarioKind, Tier};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Dwell after each media toggle.
const MEDIA_DWELL: Duration = Duration::from_secs(5);
/// Dwell on each layout mode.
const LAYOUT_DWELL: Duration = Duration::from_secs(10);
/// Dwell on each background.
const BACKGROUND_DWELL: Duration = Duration::from_secs(5);
/// Pause between document edits.
const EDIT_INTERVAL: Duration = Duration::from_secs(2);
/// Time reserved inside `present` for deleting the created document.
const PRESENT_CLEANUP_RESERVE: Duration = Duration::from_secs(10);
const SHORT_DWELL: Duration = Duration::from_secs(1);
/// Attempts at starting a screen share before giving up.
const SHARE_ATTEMPTS: u32 = 3;

const LAYOUTS: [&str; 3] = ["tiled", "spotlight", "sidebar"];
const BACKGROUNDS: [&str; 3] = ["blur", "sky", "off"];

/// Ordered record of every simulated call.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entries starting with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|e| e == entry)
    }

    /// Position of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// Scripted behaviour of the simulated back-end.
#[derive(Debug, Clone)]
pub struct SimScript {
    /// Participant counts returned by successive polls; the last one repeats.
    /// Empty means the room holds exactly the expected count.
    pub participants: Vec<u32>,
    /// Operations that fail, by journal name, with the error kind to raise.
    pub failures: BTreeMap<String, ErrorKind>,
    /// Operations the back-end does not support.
    pub unsupported: BTreeSet<String>,
    /// Operation that panics, for unwind testing.
    pub panic_on: Option<String>,
    pub browser_start: Duration,
    pub app_start: Option<Duration>,
    pub lost_network_count: Option<u32>,
    pub display_all_participants_time: Option<Duration>,
}

impl Default for SimScript {
    fn default() -> Self {
        Self {
            participants: Vec::new(),
            failures: BTreeMap::new(),
            unsupported: BTreeSet::new(),
            panic_on: None,
            browser_start: Duration::from_millis(850),
            app_start: None,
            lost_network_count: None,
            display_all_participants_time: None,
        }
    }
}

fn error_for(kind: ErrorKind, op: &str) -> ScenarioError {
    let msg = format!("simulated {op} failure");
    match kind {
        ErrorKind::Setup => ScenarioError::Setup(msg),
        ErrorKind::Prepare => ScenarioError::Prepare(msg),
        ErrorKind::Network => ScenarioError::Network(msg),
        ErrorKind::Navigation => ScenarioError::Navigation(msg),
        ErrorKind::Permission => ScenarioError::Permission(msg),
        ErrorKind::Auth => ScenarioError::Auth(msg),
        ErrorKind::SignedOut => ScenarioError::Auth(msg).signed_out(),
        ErrorKind::UiNotFound => ScenarioError::UiNotFound(msg),
        ErrorKind::ControlUnavailable => ScenarioError::ControlUnavailable(msg),
        ErrorKind::ParticipantCount => ScenarioError::ParticipantCount {
            got: 1,
            want: "more".into(),
        },
        ErrorKind::FeatureUnavailable => ScenarioError::FeatureUnavailable(msg),
        ErrorKind::Telemetry => ScenarioError::Telemetry(msg),
        ErrorKind::InvalidState => ScenarioError::InvalidState(msg),
        ErrorKind::Cancelled => crate::deadline::ContextError::Cancelled.into(),
        ErrorKind::DeadlineExceeded => crate::deadline::ContextError::DeadlineExceeded.into(),
        ErrorKind::Upstream | ErrorKind::Io => ScenarioError::Upstream(msg),
    }
}

/// State shared by every simulated component of one back-end.
#[derive(Debug, Default)]
struct Shared {
    journal: Journal,
    script: SimScript,
    polls: AtomicUsize,
}

impl Shared {
    /// Journal `op` and apply any scripted outcome for it.
    fn enter(&self, op: &str) -> Result<()> {
        self.journal.record(op);
        if self.script.panic_on.as_deref() == Some(op) {
            panic!("simulated panic in {op}");
        }
        if self.script.unsupported.contains(op) {
            return Err(ScenarioError::FeatureUnavailable(format!(
                "{op} is not supported by the simulated back-end"
            )));
        }
        match self.script.failures.get(op) {
            Some(kind) => Err(error_for(*kind, op)),
            None => Ok(()),
        }
    }

    async fn dwell(&self, ctx: &Context, entry: String, duration: Duration) -> Result<()> {
        self.journal.record(entry);
        ctx.sleep(duration).await?;
        Ok(())
    }
}

/// Builder and factory for a simulated back-end.
#[derive(Debug, Clone, Default)]
pub struct SimBackend {
    shared: Arc<Shared>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_script(script: SimScript) -> Self {
        Self {
            shared: Arc::new(Shared {
                journal: Journal::default(),
                script,
                polls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.shared.journal
    }

    pub fn script(&self) -> &SimScript {
        &self.shared.script
    }

    pub fn session(&self) -> Arc<dyn BrowserSession> {
        Arc::new(SimSession {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Driver for `kind`, wrapped for the runner.
    pub fn workload(&self, kind: ScenarioKind, room: RoomSize) -> Workload {
        let shared = Arc::clone(&self.shared);
        match kind {
            ScenarioKind::Conference => Workload::Conference(Conference::new(
                Box::new(SimConference {
                    shared,
                    joined: false,
                    documents: 0,
                }),
                room,
            )),
            ScenarioKind::Video => Workload::Video(Box::new(SimVideo { shared, open: false })),
            ScenarioKind::TabSwitch | ScenarioKind::Multitasking => {
                Workload::Browsing(Box::new(SimBrowsing { shared, tabs: 0 }))
            }
        }
    }

    /// Preparation yielding `url`; its cleanup releases the room.
    pub fn prepare(&self, url: impl Into<String>) -> Prepare {
        let shared = Arc::clone(&self.shared);
        let url = url.into();
        prepare_fn(move |ctx| async move {
            shared.enter("prepare")?;
            ctx.check()?;
            shared.journal.record(format!("prepare {url}"));
            let release_shared = Arc::clone(&shared);
            let release_url = url.clone();
            let release = cleanup_fn(move |_ctx| async move {
                release_shared.journal.record(format!("release {release_url}"));
                Ok(())
            });
            Ok((url, release))
        })
    }
}

struct SimSession {
    shared: Arc<Shared>,
}

#[async_trait]
impl BrowserSession for SimSession {
    async fn browser_start_time(&self, ctx: &Context, tablet: bool) -> Result<Duration> {
        self.shared.enter("session.browser_start")?;
        let start = self.shared.script.browser_start;
        self.shared
            .dwell(ctx, format!("session.launch_browser tablet={tablet}"), start)
            .await?;
        Ok(start)
    }

    async fn app_start_time(&self, ctx: &Context) -> Result<Option<Duration>> {
        let Some(start) = self.shared.script.app_start else {
            return Ok(None);
        };
        self.shared.enter("session.app_start")?;
        ctx.sleep(start).await?;
        Ok(Some(start))
    }

    async fn apply_settings(&self, ctx: &Context) -> Result<CleanupFn> {
        self.shared.enter("session.apply_settings")?;
        ctx.check()?;
        let shared = Arc::clone(&self.shared);
        Ok(cleanup_fn(move |_ctx| async move {
            shared.enter("session.restore_settings")
        }))
    }

    async fn set_tablet_mode(&self, ctx: &Context, tablet: bool) -> Result<CleanupFn> {
        self.shared.enter("session.set_tablet_mode")?;
        ctx.check()?;
        self.shared
            .journal
            .record(format!("session.tablet_mode {tablet}"));
        let shared = Arc::clone(&self.shared);
        Ok(cleanup_fn(move |_ctx| async move {
            shared.enter("session.restore_tablet_mode")
        }))
    }

    async fn mute(&self, ctx: &Context) -> Result<CleanupFn> {
        self.shared.enter("session.mute")?;
        ctx.check()?;
        let shared = Arc::clone(&self.shared);
        Ok(cleanup_fn(move |_ctx| async move { shared.enter("session.unmute") }))
    }

    async fn dump_ui(&self, _ctx: &Context, dir: &Path) -> Result<()> {
        self.shared.enter("session.dump_ui")?;
        let tree = self.shared.journal.entries().join("\n");
        tokio::fs::write(dir.join("ui_dump.txt"), tree).await?;
        Ok(())
    }

    async fn open_recorder(&self, ctx: &Context) -> Result<Arc<dyn Recorder>> {
        self.shared.enter("recorder.open")?;
        ctx.check()?;
        Ok(Arc::new(SimRecorder {
            shared: Arc::clone(&self.shared),
            opened_at: Mutex::new(None),
            windows: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }

    fn gpu_collector(&self) -> Arc<dyn GpuCollector> {
        Arc::new(SimGpu {
            shared: Arc::clone(&self.shared),
        })
    }
}

#[derive(Serialize)]
struct Histograms<'a> {
    windows_ms: &'a [u64],
}

struct SimRecorder {
    shared: Arc<Shared>,
    opened_at: Mutex<Option<Instant>>,
    windows: Mutex<Vec<u64>>,
    closed: AtomicBool,
}

#[async_trait]
impl Recorder for SimRecorder {
    async fn start(&self, _ctx: &Context) -> Result<()> {
        self.shared.enter("recorder.start")?;
        *self.opened_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        Ok(())
    }

    async fn stop(&self, _ctx: &Context) -> Result<()> {
        self.shared.enter("recorder.stop")?;
        let opened = self
            .opened_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(opened) = opened {
            let ms = u64::try_from(opened.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.windows
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(ms);
        }
        Ok(())
    }

    async fn record(&self, _ctx: &Context, _bag: &mut ResultBag) -> Result<()> {
        self.shared.enter("recorder.record")
    }

    async fn save_histograms(&self, dir: &Path) -> Result<()> {
        self.shared.enter("recorder.save_histograms")?;
        let windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let body = serde_json::to_vec_pretty(&Histograms {
            windows_ms: &windows,
        })
        .map_err(|e| ScenarioError::Telemetry(format!("encode histograms: {e}")))?;
        tokio::fs::write(dir.join(HISTOGRAMS_FILE), body).await?;
        Ok(())
    }

    async fn close(&self, _ctx: &Context) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.enter("recorder.close")
    }
}

struct SimGpu {
    shared: Arc<Shared>,
}

#[async_trait]
impl GpuCollector for SimGpu {
    async fn collect(&self, ctx: &Context, duration: Duration) -> Result<ResultBag> {
        self.shared.enter("gpu.start")?;
        ctx.sleep(duration).await?;
        self.shared.journal.record("gpu.done");
        let mut bag = ResultBag::new();
        bag.set(
            &Metric::new("GPU.Busy", "percent", Direction::SmallerIsBetter),
            42.0,
        )?;
        bag.set(
            &Metric::new("GPU.Frequency", "MHz", Direction::BiggerIsBetter),
            650.0,
        )?;
        Ok(bag)
    }
}

struct SimConference {
    shared: Arc<Shared>,
    joined: bool,
    documents: u32,
}

#[async_trait]
impl ConferenceDriver for SimConference {
    fn name(&self) -> &str {
        "sim-conference"
    }

    async fn join(&mut self, ctx: &Context, url: &str, _extras: &BTreeMap<String, String>) -> Result<()> {
        self.shared.enter("conference.join")?;
        self.shared
            .dwell(ctx, format!("conference.open {url}"), Duration::from_secs(3))
            .await?;
        self.joined = true;
        Ok(())
    }

    async fn participant_count(&self, ctx: &Context) -> Result<u32> {
        ctx.check()?;
        let script = &self.shared.script.participants;
        let n = self.shared.polls.fetch_add(1, Ordering::SeqCst);
        // An empty script defaults to a small room.
        let count = script
            .get(n)
            .or_else(|| script.last())
            .copied()
            .unwrap_or(RoomSize::Small.default_participants());
        self.shared
            .journal
            .record(format!("conference.participants {count}"));
        Ok(count)
    }

    async fn toggle_av(&mut self, ctx: &Context) -> Result<()> {
        self.shared.enter("conference.toggle_av")?;
        let shared = &self.shared;
        let toggle = |what: &'static str, state: &'static str| {
            NamedStep::new(format!("turn {what} {state}"), move |ctx: Context| async move {
                shared
                    .dwell(&ctx, format!("conference.{what} {state}"), MEDIA_DWELL)
                    .await
            })
        };
        combine(
            ctx,
            "toggle audio and video",
            vec![
                toggle("camera", "off"),
                toggle("camera", "on"),
                toggle("mic", "off"),
                toggle("mic", "on"),
            ],
        )
        .await
    }

    async fn switch_tabs(&mut self, ctx: &Context) -> Result<()> {
        self.shared.enter("conference.switch_tabs")?;
        self.shared
            .dwell(ctx, "conference.open_tab".into(), Duration::from_secs(2))
            .await?;
        self.shared
            .dwell(ctx, "conference.switch_back".into(), Duration::from_secs(2))
            .await
    }

    async fn change_layout(&mut self, ctx: &Context) -> Result<()> {
        self.shared.enter("conference.change_layout")?;
        for layout in LAYOUTS {
            self.shared
                .dwell(ctx, format!("conference.layout {layout}"), LAYOUT_DWELL)
                .await?;
        }
        self.shared.journal.record("conference.layout_panel closed");
        Ok(())
    }

    async fn present(&mut self, ctx: &Context, app: PresentApp) -> Result<()> {
        self.shared.enter("conference.present")?;
        self.documents += 1;
        let document = format!("{} {}", app.tab_name(), self.documents);

        let mut cleanups = CleanupStack::new();
        let cleanup_ctx = ctx.clone();
        let (ctx, _release) = ctx.shorten(PRESENT_CLEANUP_RESERVE);

        self.shared
            .journal
            .record(format!("document.create {}", app.as_str()));
        let shared = Arc::clone(&self.shared);
        let deleted = app.as_str();
        cleanups.push(
            "delete document",
            &cleanup_ctx,
            cleanup_fn(move |ctx| async move {
                ctx.sleep(SHORT_DWELL).await?;
                shared.journal.record(format!("document.delete {deleted}"));
                Ok(())
            }),
        );

        let shared = &self.shared;
        let result = combine(
            &ctx,
            "present",
            vec![
                NamedStep::new("rename document", |ctx: Context| async move {
                    shared
                        .dwell(&ctx, format!("document.rename {document}"), SHORT_DWELL)
                        .await
                }),
                NamedStep::new("edit document", |ctx: Context| async move {
                    for line in 1..=3 {
                        shared
                            .dwell(&ctx, format!("document.edit {line}"), EDIT_INTERVAL)
                            .await?;
                    }
                    Ok(())
                }),
                NamedStep::new("share screen", |ctx: Context| async move {
                    retry(SHARE_ATTEMPTS, || async move { shared.enter("conference.share") }).await?;
                    shared
                        .dwell(&ctx, "conference.sharing".into(), MEDIA_DWELL)
                        .await
                }),
                NamedStep::new("stop sharing", |ctx: Context| async move {
                    shared
                        .dwell(&ctx, "conference.stop_sharing".into(), SHORT_DWELL)
                        .await
                }),
            ],
        )
        .await;

        let cleaned = cleanups.run_all().await;
        result?;
        cleaned
    }

    async fn change_background(&mut self, ctx: &Context) -> Result<()> {
        let shared = &self.shared;
        if_success_then(async { shared.enter("conference.change_background") }, || async move {
            for background in BACKGROUNDS {
                shared.journal.record("conference.fullscreen enter");
                shared
                    .dwell(ctx, format!("conference.background {background}"), BACKGROUND_DWELL)
                    .await?;
                shared.journal.record("conference.fullscreen exit");
            }
            shared.journal.record("conference.background_panel closed");
            Ok(())
        })
        .await
    }

    async fn end(&mut self, ctx: &Context) -> Result<()> {
        if !self.joined {
            return Ok(());
        }
        self.shared.enter("conference.end")?;
        ctx.check()?;
        self.joined = false;
        Ok(())
    }

    async fn lost_network_count(&self, _ctx: &Context) -> Result<Option<u32>> {
        Ok(self.shared.script.lost_network_count)
    }

    async fn display_all_participants_time(&self, _ctx: &Context) -> Result<Option<Duration>> {
        Ok(self.shared.script.display_all_participants_time)
    }
}

struct SimVideo {
    shared: Arc<Shared>,
    open: bool,
}

#[async_trait]
impl VideoDriver for SimVideo {
    fn name(&self) -> &str {
        "sim-video"
    }

    async fn open_video(&mut self, ctx: &Context, tier: Tier) -> Result<()> {
        self.shared.enter("video.open")?;
        let quality = if tier >= Tier::Premium { "2160p" } else { "1080p" };
        self.shared
            .dwell(ctx, format!("video.play {quality}"), Duration::from_secs(5))
            .await?;
        self.open = true;
        Ok(())
    }

    async fn enter_fullscreen(&mut self, ctx: &Context) -> Result<()> {
        self.shared.enter("video.fullscreen")?;
        ctx.sleep(Duration::from_secs(2)).await?;
        Ok(())
    }

    async fn open_mail(&mut self, ctx: &Context) -> Result<()> {
        self.shared.enter("video.open_mail")?;
        ctx.sleep(Duration::from_secs(5)).await?;
        Ok(())
    }

    async fn switch_back(&mut self, ctx: &Context) -> Result<()> {
        self.shared.enter("video.switch_back")?;
        ctx.sleep(Duration::from_secs(2)).await?;
        Ok(())
    }

    async fn pause_and_play(&mut self, ctx: &Context) -> Result<()> {
        self.shared.enter("video.pause_and_play")?;
        self.shared
            .dwell(ctx, "video.paused".into(), Duration::from_secs(3))
            .await?;
        self.shared
            .dwell(ctx, "video.playing".into(), Duration::from_secs(3))
            .await
    }

    async fn close(&mut self, _ctx: &Context) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.shared.enter("video.close")
    }
}

struct SimBrowsing {
    shared: Arc<Shared>,
    tabs: usize,
}

#[async_trait]
impl BrowsingDriver for SimBrowsing {
    fn name(&self) -> &str {
        "sim-browsing"
    }

    async fn open_tabs(&mut self, ctx: &Context, tier: Tier) -> Result<()> {
        self.shared.enter("browsing.open_tabs")?;
        let count = match tier {
            Tier::Basic => 5,
            Tier::Plus => 10,
            Tier::Premium | Tier::Record => 20,
        };
        for tab in 1..=count {
            self.shared
                .dwell(ctx, format!("browsing.tab {tab}"), SHORT_DWELL)
                .await?;
            self.tabs = tab;
        }
        Ok(())
    }

    async fn tile_windows(&mut self, ctx: &Context) -> Result<()> {
        self.shared.enter("browsing.tile_windows")?;
        ctx.sleep(Duration::from_secs(2)).await?;
        Ok(())
    }

    async fn cycle_tabs(&mut self, ctx: &Context) -> Result<()> {
        self.shared.enter("browsing.cycle_tabs")?;
        for tab in 1..=self.tabs {
            ctx.sleep(SHORT_DWELL).await?;
            self.shared.journal.record(format!("browsing.focus {tab}"));
        }
        Ok(())
    }

    async fn close(&mut self, _ctx: &Context) -> Result<()> {
        if self.tabs == 0 {
            return Ok(());
        }
        self.tabs = 0;
        self.shared.enter("browsing.close")
    }
}

/// Preparation for scenarios without a room.
pub fn no_room_prepare() -> Prepare {
    prepare_fn(|_ctx| async { Ok(("ignore".to_string(), noop())) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participants::wait_for_participants;

    fn script(participants: &[u32]) -> SimScript {
        SimScript {
            participants: participants.to_vec(),
            ..SimScript::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn oscillating_count_is_accepted_for_small_room() {
        let backend = SimBackend::from_script(script(&[1, 5, 6, 5]));
        let Workload::Conference(conference) = backend.workload(ScenarioKind::Conference, RoomSize::Small) else {
            panic!("expected a conference workload");
        };
        let ctx = Context::background();
        let count = wait_for_participants(&ctx, conference.driver(), RoomSize::Small)
            .await
            .unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn lone_participant_is_rejected_after_five_polls() {
        let backend = SimBackend::from_script(script(&[1]));
        let Workload::Conference(conference) = backend.workload(ScenarioKind::Conference, RoomSize::Small) else {
            panic!("expected a conference workload");
        };
        let ctx = Context::background();
        let start = Instant::now();
        let err = wait_for_participants(&ctx, conference.driver(), RoomSize::Small)
            .await
            .unwrap_err();
        assert!(err.is_participant_error());
        assert_eq!(backend.journal().matching("conference.participants").len(), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_av_returns_media_to_original_state() {
        let backend = SimBackend::from_script(script(&[2]));
        let mut workload = backend.workload(ScenarioKind::Conference, RoomSize::Two);
        let Workload::Conference(conference) = &mut workload else {
            panic!("expected a conference workload");
        };
        let ctx = Context::background();
        conference.join(&ctx, "https://meet/x", &BTreeMap::new()).await.unwrap();
        let start = Instant::now();
        conference.toggle_av(&ctx).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(20));
        let media = backend.journal().matching("conference.camera");
        assert_eq!(media, vec!["conference.camera off", "conference.camera on"]);
        let mic = backend.journal().matching("conference.mic");
        assert_eq!(mic, vec!["conference.mic off", "conference.mic on"]);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_state_machine_enforces_order() {
        let backend = SimBackend::from_script(script(&[2]));
        let mut workload = backend.workload(ScenarioKind::Conference, RoomSize::Two);
        let Workload::Conference(conference) = &mut workload else {
            panic!("expected a conference workload");
        };
        let ctx = Context::background();

        let err = conference.toggle_av(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        conference.join(&ctx, "https://meet/two", &BTreeMap::new()).await.unwrap();
        assert_eq!(conference.state(), cuj_core::ConferenceState::Joined);
        let err = conference
            .join(&ctx, "https://meet/two", &BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        conference.change_layout(&ctx).await.unwrap();
        assert_eq!(conference.state(), cuj_core::ConferenceState::LayoutChanged);
        assert!(backend.journal().contains("conference.layout_panel closed"));

        conference.end(&ctx).await.unwrap();
        conference.end(&ctx).await.unwrap();
        assert_eq!(conference.state(), cuj_core::ConferenceState::Idle);
        assert_eq!(backend.journal().matching("conference.end").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn present_deletes_document_when_sharing_fails() {
        let mut script = script(&[2]);
        script
            .failures
            .insert("conference.share".into(), ErrorKind::Upstream);
        let backend = SimBackend::from_script(script);
        let mut workload = backend.workload(ScenarioKind::Conference, RoomSize::Two);
        let Workload::Conference(conference) = &mut workload else {
            panic!("expected a conference workload");
        };
        let ctx = Context::background();
        conference.join(&ctx, "https://meet/two", &BTreeMap::new()).await.unwrap();

        let err = conference.present(&ctx, PresentApp::Docs).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.breadcrumbs(), vec!["present", "share screen"]);
        assert_eq!(backend.journal().matching("conference.share").len(), SHARE_ATTEMPTS as usize);
        assert!(backend.journal().contains("document.create docs"));
        assert!(backend.journal().contains("document.delete docs"));
        assert_eq!(conference.state(), cuj_core::ConferenceState::Joined);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_background_is_feature_unavailable() {
        let mut script = script(&[2]);
        script.unsupported.insert("conference.change_background".into());
        let backend = SimBackend::from_script(script);
        let mut workload = backend.workload(ScenarioKind::Conference, RoomSize::Two);
        let Workload::Conference(conference) = &mut workload else {
            panic!("expected a conference workload");
        };
        let ctx = Context::background();
        conference.join(&ctx, "https://meet/two", &BTreeMap::new()).await.unwrap();
        let err = conference.change_background(&ctx).await.unwrap_err();
        assert!(err.is_feature_unavailable());
        assert!(backend.journal().matching("conference.background ").is_empty());
    }
}
