//! Application driver contracts.
//!
//! A driver translates abstract workload steps into UI actions against one
//! back-end. The runner only ever sees these traits, grouped by shape in
//! [`Workload`].

use crate::deadline::Context;
use crate::error::{Result, ScenarioError};
use crate::participants::wait_for_participants;
use async_trait::async_trait;
use cuj_core::{ConferenceState, DriverShape, PresentApp, RoomSize, Step, Tier};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Conference back-end (Meet, Zoom, ...).
///
/// `FeatureUnavailable` from any operation means the back-end lacks the
/// capability; the runner logs it and moves on.
#[async_trait]
pub trait ConferenceDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Participant count this back-end provisions for `room`.
    fn expected_participants(&self, room: RoomSize) -> u32 {
        room.default_participants()
    }

    /// Enter the room at `url`. The participant count is checked by the caller.
    async fn join(&mut self, ctx: &Context, url: &str, extras: &BTreeMap<String, String>) -> Result<()>;

    async fn participant_count(&self, ctx: &Context) -> Result<u32>;

    /// Toggle camera and microphone twice each, ending in the original state.
    async fn toggle_av(&mut self, ctx: &Context) -> Result<()>;

    /// Open an auxiliary tab and switch back to the conference.
    async fn switch_tabs(&mut self, ctx: &Context) -> Result<()>;

    /// Cycle every layout mode and close the layout panel.
    async fn change_layout(&mut self, ctx: &Context) -> Result<()>;

    /// Create, edit and share a document, then stop sharing.
    /// The created document is removed even when sharing fails.
    async fn present(&mut self, ctx: &Context, app: PresentApp) -> Result<()>;

    async fn change_background(&mut self, ctx: &Context) -> Result<()>;

    /// Leave the room.
    async fn end(&mut self, ctx: &Context) -> Result<()>;

    async fn lost_network_count(&self, _ctx: &Context) -> Result<Option<u32>> {
        Ok(None)
    }

    async fn display_all_participants_time(&self, _ctx: &Context) -> Result<Option<Duration>> {
        Ok(None)
    }
}

/// Video playback back-end (YouTube web or app).
#[async_trait]
pub trait VideoDriver: Send + Sync {
    fn name(&self) -> &str;
    /// Open the video; Premium and above pick a heavier source.
    async fn open_video(&mut self, ctx: &Context, tier: Tier) -> Result<()>;
    async fn enter_fullscreen(&mut self, ctx: &Context) -> Result<()>;
    async fn open_mail(&mut self, ctx: &Context) -> Result<()>;
    async fn switch_back(&mut self, ctx: &Context) -> Result<()>;
    async fn pause_and_play(&mut self, ctx: &Context) -> Result<()>;
    async fn close(&mut self, ctx: &Context) -> Result<()>;
}

/// Multi-tab browsing back-end.
#[async_trait]
pub trait BrowsingDriver: Send + Sync {
    fn name(&self) -> &str;
    async fn open_tabs(&mut self, ctx: &Context, tier: Tier) -> Result<()>;
    async fn tile_windows(&mut self, ctx: &Context) -> Result<()>;
    async fn cycle_tabs(&mut self, ctx: &Context) -> Result<()>;
    async fn close(&mut self, ctx: &Context) -> Result<()>;
}

/// Conference driver plus the lifecycle state the runner relies on.
pub struct Conference {
    driver: Box<dyn ConferenceDriver>,
    room: RoomSize,
    state: ConferenceState,
}

impl std::fmt::Debug for Conference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conference")
            .field("driver", &self.driver.name())
            .field("room", &self.room)
            .field("state", &self.state)
            .finish()
    }
}

impl Conference {
    pub fn new(driver: Box<dyn ConferenceDriver>, room: RoomSize) -> Self {
        Self {
            driver,
            room,
            state: ConferenceState::Idle,
        }
    }

    pub fn state(&self) -> ConferenceState {
        self.state
    }

    pub fn room(&self) -> RoomSize {
        self.room
    }

    pub fn driver(&self) -> &dyn ConferenceDriver {
        self.driver.as_ref()
    }

    fn require_in_room(&self, op: &str) -> Result<()> {
        if self.state.in_room() {
            Ok(())
        } else {
            Err(ScenarioError::InvalidState(format!(
                "{op} requires a joined room, driver is {}",
                self.state.as_str()
            )))
        }
    }

    /// Join and wait for an acceptable participant count.
    ///
    /// The room counts as entered once the driver's join returns, so a bad
    /// participant count still leaves [`end`](Self::end) with work to do.
    pub async fn join(&mut self, ctx: &Context, url: &str, extras: &BTreeMap<String, String>) -> Result<u32> {
        if !matches!(self.state, ConferenceState::Idle | ConferenceState::Ended) {
            return Err(ScenarioError::InvalidState(format!(
                "join requires an idle driver, driver is {}",
                self.state.as_str()
            )));
        }
        self.driver.join(ctx, url, extras).await?;
        self.state = ConferenceState::Joined;
        wait_for_participants(ctx, self.driver.as_ref(), self.room).await
    }

    pub async fn toggle_av(&mut self, ctx: &Context) -> Result<()> {
        self.require_in_room("toggle_av")?;
        self.driver.toggle_av(ctx).await?;
        self.state = ConferenceState::MediaToggled;
        Ok(())
    }

    pub async fn switch_tabs(&mut self, ctx: &Context) -> Result<()> {
        self.require_in_room("switch_tabs")?;
        self.driver.switch_tabs(ctx).await?;
        self.state = ConferenceState::Switched;
        Ok(())
    }

    pub async fn change_layout(&mut self, ctx: &Context) -> Result<()> {
        self.require_in_room("change_layout")?;
        self.driver.change_layout(ctx).await?;
        self.state = ConferenceState::LayoutChanged;
        Ok(())
    }

    /// Present `app`. Without a room the document is edited locally only.
    pub async fn present(&mut self, ctx: &Context, app: PresentApp) -> Result<()> {
        if self.room.has_room() {
            self.require_in_room("present")?;
        } else {
            return self.driver.present(ctx, app).await;
        }
        let before = self.state;
        self.state = ConferenceState::Presenting;
        match self.driver.present(ctx, app).await {
            Ok(()) => {
                self.state = ConferenceState::Presented;
                Ok(())
            }
            Err(err) => {
                self.state = before;
                Err(err)
            }
        }
    }

    pub async fn change_background(&mut self, ctx: &Context) -> Result<()> {
        self.require_in_room("change_background")?;
        self.driver.change_background(ctx).await?;
        self.state = ConferenceState::BackgroundChanged;
        Ok(())
    }

    /// Leave the room. A no-op when idle.
    pub async fn end(&mut self, ctx: &Context) -> Result<()> {
        if self.state == ConferenceState::Idle {
            return Ok(());
        }
        self.state = ConferenceState::Ended;
        self.driver.end(ctx).await?;
        self.state = ConferenceState::Idle;
        Ok(())
    }
}

/// Inputs a step may need beyond the context.
#[derive(Debug, Clone, Copy)]
pub struct StepArgs<'a> {
    pub tier: Tier,
    pub url: &'a str,
    pub extras: &'a BTreeMap<String, String>,
}

/// The driver a scenario runs against, by shape.
pub enum Workload {
    Conference(Conference),
    Video(Box<dyn VideoDriver>),
    Browsing(Box<dyn BrowsingDriver>),
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conference(c) => f.debug_tuple("Conference").field(c).finish(),
            Self::Video(d) => f.debug_tuple("Video").field(&d.name()).finish(),
            Self::Browsing(d) => f.debug_tuple("Browsing").field(&d.name()).finish(),
        }
    }
}

impl Workload {
    pub fn shape(&self) -> DriverShape {
        match self {
            Self::Conference(_) => DriverShape::Conference,
            Self::Video(_) => DriverShape::Video,
            Self::Browsing(_) => DriverShape::Browsing,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Conference(c) => c.driver().name(),
            Self::Video(d) => d.name(),
            Self::Browsing(d) => d.name(),
        }
    }

    pub fn as_conference(&self) -> Option<&Conference> {
        match self {
            Self::Conference(c) => Some(c),
            _ => None,
        }
    }

    /// Execute one planned step.
    pub async fn perform(&mut self, ctx: &Context, step: Step, args: StepArgs<'_>) -> Result<()> {
        if step.shape() != self.shape() {
            return Err(ScenarioError::InvalidState(format!(
                "{} driver cannot perform {step}",
                self.shape().as_str()
            )));
        }
        match self {
            Self::Conference(c) => match step {
                Step::Join => c.join(ctx, args.url, args.extras).await.map(|_| ()),
                Step::SwitchTabs => c.switch_tabs(ctx).await,
                Step::ToggleAv => c.toggle_av(ctx).await,
                Step::ChangeLayout => c.change_layout(ctx).await,
                Step::Present => {
                    let app = args.tier.present_app().ok_or_else(|| {
                        ScenarioError::InvalidState(format!(
                            "tier {} does not present",
                            args.tier.as_str()
                        ))
                    })?;
                    info!(app = app.as_str(), "presenting document");
                    c.present(ctx, app).await
                }
                Step::ChangeBackground => c.change_background(ctx).await,
                _ => unreachable_step(step),
            },
            Self::Video(d) => match step {
                Step::OpenVideo => d.open_video(ctx, args.tier).await,
                Step::EnterFullscreen => d.enter_fullscreen(ctx).await,
                Step::OpenMail => d.open_mail(ctx).await,
                Step::SwitchBack => d.switch_back(ctx).await,
                Step::PauseAndPlay => d.pause_and_play(ctx).await,
                _ => unreachable_step(step),
            },
            Self::Browsing(d) => match step {
                Step::OpenTabs => d.open_tabs(ctx, args.tier).await,
                Step::TileWindows => d.tile_windows(ctx).await,
                Step::CycleTabs => d.cycle_tabs(ctx).await,
                _ => unreachable_step(step),
            },
        }
    }

    /// Release whatever the driver holds. Idempotent.
    pub async fn teardown(&mut self, ctx: &Context) -> Result<()> {
        let result = match self {
            Self::Conference(c) => c.end(ctx).await,
            Self::Video(d) => d.close(ctx).await,
            Self::Browsing(d) => d.close(ctx).await,
        };
        if let Err(err) = &result {
            warn!(driver = self.name(), error = %err, "driver teardown failed");
        }
        result
    }
}

fn unreachable_step(step: Step) -> Result<()> {
    Err(ScenarioError::InvalidState(format!(
        "step {step} has no handler"
    )))
}
