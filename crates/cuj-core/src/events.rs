//! Scenario event log.
//!
//! Every scenario appends JSON lines to `events.jsonl` in its output
//! directory. Each line carries a timestamp, the scenario id, the event type
//! and a type-specific payload.

use crate::types::{Id, RoomSize, ScenarioKind, Step, StepStatus, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// File name of the event log inside a scenario output directory.
pub const EVENT_LOG_FILE: &str = "events.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ScenarioStarted,
    StepStarted,
    StepFinished,
    StepSkipped,
    WindowClosed,
    CleanupFailed,
    ScenarioCompleted,
    ScenarioFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScenarioStarted => "SCENARIO_STARTED",
            Self::StepStarted => "STEP_STARTED",
            Self::StepFinished => "STEP_FINISHED",
            Self::StepSkipped => "STEP_SKIPPED",
            Self::WindowClosed => "WINDOW_CLOSED",
            Self::CleanupFailed => "CLEANUP_FAILED",
            Self::ScenarioCompleted => "SCENARIO_COMPLETED",
            Self::ScenarioFailed => "SCENARIO_FAILED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStartedPayload {
    pub kind: ScenarioKind,
    pub tier: Tier,
    pub room: RoomSize,
    pub tablet_mode: bool,
    pub window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStartedPayload {
    pub step: Step,
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFinishedPayload {
    pub step: Step,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Step elided because the back-end does not offer the feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSkippedPayload {
    pub step: Step,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowClosedPayload {
    pub window_ms: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupFailedPayload {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioCompletedPayload {
    pub duration_ms: u64,
    pub metrics: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFailedPayload {
    /// Error kind tag, e.g. `participant_count`.
    pub kind: String,
    pub reason: String,
}

/// Union type for all event payloads.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    ScenarioStarted(ScenarioStartedPayload),
    StepStarted(StepStartedPayload),
    StepFinished(StepFinishedPayload),
    StepSkipped(StepSkippedPayload),
    WindowClosed(WindowClosedPayload),
    CleanupFailed(CleanupFailedPayload),
    ScenarioCompleted(ScenarioCompletedPayload),
    ScenarioFailed(ScenarioFailedPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::ScenarioStarted(_) => EventType::ScenarioStarted,
            Self::StepStarted(_) => EventType::StepStarted,
            Self::StepFinished(_) => EventType::StepFinished,
            Self::StepSkipped(_) => EventType::StepSkipped,
            Self::WindowClosed(_) => EventType::WindowClosed,
            Self::CleanupFailed(_) => EventType::CleanupFailed,
            Self::ScenarioCompleted(_) => EventType::ScenarioCompleted,
            Self::ScenarioFailed(_) => EventType::ScenarioFailed,
        }
    }
}

/// One line of the event log.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub scenario_id: Id,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(scenario_id: Id, payload: EventPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            scenario_id,
            event_type: payload.event_type(),
            payload,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Append-only JSONL writer for scenario events.
///
/// Every line is flushed as soon as it is written so a crashed scenario still
/// leaves a readable log behind.
pub struct EventLog {
    scenario_id: Id,
    writer: BufWriter<File>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("scenario_id", &self.scenario_id)
            .field("writer", &"BufWriter<File>")
            .finish()
    }
}

impl EventLog {
    /// Open (or create) `dir/events.jsonl` for appending.
    pub fn open(dir: &Path, scenario_id: Id) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(EVENT_LOG_FILE))?;
        Ok(Self {
            scenario_id,
            writer: BufWriter::new(file),
        })
    }

    pub fn scenario_id(&self) -> &Id {
        &self.scenario_id
    }

    pub fn emit(&mut self, payload: EventPayload) -> std::io::Result<()> {
        let event = Event::new(self.scenario_id.clone(), payload);
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn event_type_serializes_correctly() {
        assert_eq!(
            serde_json::to_string(&EventType::ScenarioStarted).unwrap(),
            "\"SCENARIO_STARTED\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::CleanupFailed).unwrap(),
            "\"CLEANUP_FAILED\""
        );
    }

    #[test]
    fn step_finished_omits_missing_error() {
        let payload = StepFinishedPayload {
            step: Step::ToggleAv,
            status: StepStatus::Succeeded,
            duration_ms: 20_000,
            error: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("toggle_av"));
        assert!(json.contains("SUCCEEDED"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn event_log_appends_json_lines() {
        let tmp = TempDir::new().unwrap();
        let id = Id::from_string("scenario-1");
        let mut log = EventLog::open(tmp.path(), id.clone()).unwrap();
        log.emit(EventPayload::StepStarted(StepStartedPayload {
            step: Step::Join,
            index: 0,
        }))
        .unwrap();
        log.emit(EventPayload::ScenarioFailed(ScenarioFailedPayload {
            kind: "participant_count".into(),
            reason: "got 1, want 5".into(),
        }))
        .unwrap();
        drop(log);

        let raw = std::fs::read_to_string(tmp.path().join(EVENT_LOG_FILE)).unwrap();
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "STEP_STARTED");
        assert_eq!(lines[0]["scenario_id"], "scenario-1");
        assert_eq!(lines[0]["payload"]["step"], "join");
        assert_eq!(lines[1]["type"], "SCENARIO_FAILED");
        assert_eq!(lines[1]["payload"]["kind"], "participant_count");
        assert!(lines[1]["timestamp"].as_str().is_some());
    }
}
