//! Core types for the CUJ scenario runner.
//!
//! Tags (room size, tier, screen mode), workload steps and the conference
//! driver state machine. Everything here is plain data; the async engine
//! lives in `cuj-runner`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for scenario runs.
/// Uses `UUIDv7` for time-ordered lexicographic sorting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Error returned when a textual tag does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseTagError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseTagError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// --- Enumerations ---

/// Size class of the conference room a scenario joins.
///
/// The integer participant count behind each tag is owned by the driver,
/// since two back-ends may provision differently sized rooms for one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomSize {
    /// No conference at all; only the local workload and GPU collection run.
    NoRoom,
    Two,
    Small,
    Large,
    ClassRoom,
}

impl RoomSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoRoom => "none",
            Self::Two => "two",
            Self::Small => "small",
            Self::Large => "large",
            Self::ClassRoom => "class",
        }
    }

    /// Participant count the fixture rooms are usually provisioned with.
    pub fn default_participants(&self) -> u32 {
        match self {
            Self::NoRoom => 0,
            Self::Two => 2,
            Self::Small => 5,
            Self::Large => 16,
            Self::ClassRoom => 38,
        }
    }

    /// Whether the scenario joins a conference at all.
    pub fn has_room(&self) -> bool {
        !matches!(self, Self::NoRoom)
    }

    pub fn all() -> [Self; 5] {
        [
            Self::NoRoom,
            Self::Two,
            Self::Small,
            Self::Large,
            Self::ClassRoom,
        ]
    }
}

impl FromStr for RoomSize {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "no_room" | "noroom" => Ok(Self::NoRoom),
            "two" => Ok(Self::Two),
            "small" => Ok(Self::Small),
            "large" => Ok(Self::Large),
            "class" | "classroom" | "class_room" => Ok(Self::ClassRoom),
            _ => Err(ParseTagError::new("room size", s)),
        }
    }
}

/// Intensity level of a scenario.
///
/// Ordering is meaningful: every tier runs all steps of the tiers below it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Basic,
    Plus,
    Premium,
    Record,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Plus => "plus",
            Self::Premium => "premium",
            Self::Record => "record",
        }
    }

    /// Document presented to the conference, if this tier presents at all.
    ///
    /// Premium and above present the heavier artifact.
    pub fn present_app(&self) -> Option<PresentApp> {
        match self {
            Self::Basic => None,
            Self::Plus => Some(PresentApp::Slides),
            Self::Premium | Self::Record => Some(PresentApp::Docs),
        }
    }
}

impl FromStr for Tier {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "plus" => Ok(Self::Plus),
            "premium" => Ok(Self::Premium),
            "record" => Ok(Self::Record),
            _ => Err(ParseTagError::new("tier", s)),
        }
    }
}

/// Device posture for the scenario (`cuj_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenMode {
    Tablet,
    Clamshell,
}

impl ScreenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tablet => "tablet",
            Self::Clamshell => "clamshell",
        }
    }

    pub fn is_tablet(&self) -> bool {
        matches!(self, Self::Tablet)
    }
}

impl FromStr for ScreenMode {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tablet" => Ok(Self::Tablet),
            "clamshell" => Ok(Self::Clamshell),
            _ => Err(ParseTagError::new("screen mode", s)),
        }
    }
}

/// Application whose document is created and presented to the conference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentApp {
    Slides,
    Docs,
}

impl PresentApp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slides => "slides",
            Self::Docs => "docs",
        }
    }

    /// Tab title the document opens under.
    pub fn tab_name(&self) -> &'static str {
        match self {
            Self::Slides => "Google Slides",
            Self::Docs => "Google Docs",
        }
    }
}

/// Scenario family; selects the step plan and the driver shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    #[default]
    Conference,
    Video,
    TabSwitch,
    Multitasking,
}

impl ScenarioKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conference => "conference",
            Self::Video => "video",
            Self::TabSwitch => "tab_switch",
            Self::Multitasking => "multitasking",
        }
    }

    /// Shape of driver able to execute this scenario's steps.
    pub fn shape(&self) -> DriverShape {
        match self {
            Self::Conference => DriverShape::Conference,
            Self::Video => DriverShape::Video,
            Self::TabSwitch | Self::Multitasking => DriverShape::Browsing,
        }
    }
}

impl FromStr for ScenarioKind {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "conference" | "meet" => Ok(Self::Conference),
            "video" => Ok(Self::Video),
            "tab_switch" | "tabswitch" => Ok(Self::TabSwitch),
            "multitasking" | "multi_tasking" => Ok(Self::Multitasking),
            _ => Err(ParseTagError::new("scenario kind", s)),
        }
    }
}

/// Capability set a driver exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverShape {
    Conference,
    Video,
    Browsing,
}

impl DriverShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conference => "conference",
            Self::Video => "video",
            Self::Browsing => "browsing",
        }
    }
}

/// A single workload step the runner asks a driver to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    // Conference shape.
    Join,
    SwitchTabs,
    ToggleAv,
    ChangeLayout,
    /// Present a document; the artifact is resolved from the tier.
    Present,
    ChangeBackground,
    // Video shape.
    OpenVideo,
    EnterFullscreen,
    OpenMail,
    SwitchBack,
    PauseAndPlay,
    // Browsing shape.
    OpenTabs,
    TileWindows,
    CycleTabs,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::SwitchTabs => "switch_tabs",
            Self::ToggleAv => "toggle_av",
            Self::ChangeLayout => "change_layout",
            Self::Present => "present",
            Self::ChangeBackground => "change_background",
            Self::OpenVideo => "open_video",
            Self::EnterFullscreen => "enter_fullscreen",
            Self::OpenMail => "open_mail",
            Self::SwitchBack => "switch_back",
            Self::PauseAndPlay => "pause_and_play",
            Self::OpenTabs => "open_tabs",
            Self::TileWindows => "tile_windows",
            Self::CycleTabs => "cycle_tabs",
        }
    }

    pub fn shape(&self) -> DriverShape {
        match self {
            Self::Join
            | Self::SwitchTabs
            | Self::ToggleAv
            | Self::ChangeLayout
            | Self::Present
            | Self::ChangeBackground => DriverShape::Conference,
            Self::OpenVideo
            | Self::EnterFullscreen
            | Self::OpenMail
            | Self::SwitchBack
            | Self::PauseAndPlay => DriverShape::Video,
            Self::OpenTabs | Self::TileWindows | Self::CycleTabs => DriverShape::Browsing,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a planned step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Succeeded,
    /// Back-end lacks the capability; logged and elided.
    Skipped,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "SUCCEEDED",
            Self::Skipped => "SKIPPED",
            Self::Failed => "FAILED",
        }
    }
}

/// Conference driver lifecycle.
///
/// Transitions map one-to-one onto driver operations. The runner decides the
/// order and skips transitions the tier does not need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConferenceState {
    #[default]
    Idle,
    Joined,
    MediaToggled,
    Switched,
    LayoutChanged,
    Presenting,
    Presented,
    BackgroundChanged,
    Ended,
}

impl ConferenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Joined => "joined",
            Self::MediaToggled => "media_toggled",
            Self::Switched => "switched",
            Self::LayoutChanged => "layout_changed",
            Self::Presenting => "presenting",
            Self::Presented => "presented",
            Self::BackgroundChanged => "background_changed",
            Self::Ended => "ended",
        }
    }

    /// True once the active user is inside a room and until the room is left.
    pub fn in_room(&self) -> bool {
        !matches!(self, Self::Idle | Self::Ended)
    }
}

/// Accepted participant counts for a joined room.
///
/// Rooms hold exactly N or N+1 members (the driver itself may be counted),
/// two-person rooms must match exactly, and class rooms accept anything at or
/// above N. A count of one is never accepted: nobody else is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRule {
    Exactly(u32),
    Within { min: u32, max: u32 },
    AtLeast(u32),
}

impl ParticipantRule {
    /// Rule for a room tag given the back-end's expected count.
    /// Returns `None` for [`RoomSize::NoRoom`], which has nothing to check.
    pub fn for_room(room: RoomSize, expected: u32) -> Option<Self> {
        match room {
            RoomSize::NoRoom => None,
            RoomSize::Two => Some(Self::Exactly(expected)),
            RoomSize::Small | RoomSize::Large => Some(Self::Within {
                min: expected,
                max: expected + 1,
            }),
            RoomSize::ClassRoom => Some(Self::AtLeast(expected)),
        }
    }

    pub fn accepts(&self, observed: u32) -> bool {
        if observed <= 1 {
            return false;
        }
        match *self {
            Self::Exactly(n) => observed == n,
            Self::Within { min, max } => (min..=max).contains(&observed),
            Self::AtLeast(n) => observed >= n,
        }
    }
}

impl std::fmt::Display for ParticipantRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exactly(n) => write!(f, "{n}"),
            Self::Within { min, max } => write!(f, "{min} ~ {max}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}
