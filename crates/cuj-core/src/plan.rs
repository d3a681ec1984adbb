//! Step plans and measurement windows.
//!
//! Each scenario kind has a fixed step order. Tiers only ever add steps at the
//! tail, so the plan for a tier is always a prefix of the plan for the next.

use crate::types::{RoomSize, ScenarioKind, Step, Tier};
use std::time::Duration;

/// A step and the conditions under which it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedStep {
    pub step: Step,
    pub min_tier: Tier,
    /// Skipped for [`RoomSize::NoRoom`].
    pub needs_room: bool,
}

impl PlannedStep {
    const fn new(step: Step, min_tier: Tier, needs_room: bool) -> Self {
        Self {
            step,
            min_tier,
            needs_room,
        }
    }

    pub fn applies(&self, tier: Tier, room: RoomSize) -> bool {
        tier >= self.min_tier && (!self.needs_room || room.has_room())
    }
}

const CONFERENCE: &[PlannedStep] = &[
    PlannedStep::new(Step::Join, Tier::Basic, true),
    PlannedStep::new(Step::SwitchTabs, Tier::Basic, true),
    PlannedStep::new(Step::ToggleAv, Tier::Basic, true),
    PlannedStep::new(Step::ChangeLayout, Tier::Basic, true),
    PlannedStep::new(Step::Present, Tier::Plus, false),
    PlannedStep::new(Step::ChangeBackground, Tier::Premium, true),
];

const VIDEO: &[PlannedStep] = &[
    PlannedStep::new(Step::OpenVideo, Tier::Basic, false),
    PlannedStep::new(Step::EnterFullscreen, Tier::Basic, false),
    PlannedStep::new(Step::OpenMail, Tier::Basic, false),
    PlannedStep::new(Step::SwitchBack, Tier::Basic, false),
    PlannedStep::new(Step::PauseAndPlay, Tier::Basic, false),
];

const TAB_SWITCH: &[PlannedStep] = &[
    PlannedStep::new(Step::OpenTabs, Tier::Basic, false),
    PlannedStep::new(Step::CycleTabs, Tier::Basic, false),
];

const MULTITASKING: &[PlannedStep] = &[
    PlannedStep::new(Step::OpenTabs, Tier::Basic, false),
    PlannedStep::new(Step::TileWindows, Tier::Basic, false),
    PlannedStep::new(Step::CycleTabs, Tier::Basic, false),
];

/// Ordered step list for a scenario kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPlan {
    kind: ScenarioKind,
    steps: &'static [PlannedStep],
}

impl StepPlan {
    pub fn for_kind(kind: ScenarioKind) -> Self {
        let steps = match kind {
            ScenarioKind::Conference => CONFERENCE,
            ScenarioKind::Video => VIDEO,
            ScenarioKind::TabSwitch => TAB_SWITCH,
            ScenarioKind::Multitasking => MULTITASKING,
        };
        Self { kind, steps }
    }

    pub fn kind(&self) -> ScenarioKind {
        self.kind
    }

    pub fn steps(&self) -> &'static [PlannedStep] {
        self.steps
    }

    /// Steps that run for `tier` in `room`, in execution order.
    pub fn steps_for(&self, tier: Tier, room: RoomSize) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|p| p.applies(tier, room))
            .map(|p| p.step)
            .collect()
    }
}

/// Length of the measurement window.
///
/// Runs without a room only do local work and get a short fixed window;
/// otherwise the window grows with the tier.
pub fn window_duration(tier: Tier, room: RoomSize) -> Duration {
    if !room.has_room() {
        return Duration::from_secs(70);
    }
    match tier {
        Tier::Basic => Duration::from_secs(50),
        Tier::Plus => Duration::from_secs(140),
        Tier::Premium | Tier::Record => Duration::from_secs(180),
    }
}
