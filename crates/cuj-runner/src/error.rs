//! Scenario error taxonomy.

use crate::deadline::ContextError;
use cuj_core::config::ConfigError;
use cuj_core::perf::PerfError;
use thiserror::Error;

/// Error kind, independent of step breadcrumbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Setup,
    Prepare,
    Network,
    Navigation,
    Permission,
    Auth,
    SignedOut,
    UiNotFound,
    ControlUnavailable,
    Upstream,
    ParticipantCount,
    FeatureUnavailable,
    Telemetry,
    InvalidState,
    Cancelled,
    DeadlineExceeded,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Prepare => "prepare",
            Self::Network => "network",
            Self::Navigation => "navigation",
            Self::Permission => "permission",
            Self::Auth => "auth",
            Self::SignedOut => "signed_out",
            Self::UiNotFound => "ui_not_found",
            Self::ControlUnavailable => "control_unavailable",
            Self::Upstream => "upstream",
            Self::ParticipantCount => "participant_count",
            Self::FeatureUnavailable => "feature_unavailable",
            Self::Telemetry => "telemetry",
            Self::InvalidState => "invalid_state",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Io => "io",
        }
    }
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("setup failed: {0}")]
    Setup(String),
    #[error("prepare failed: {0}")]
    Prepare(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("permission prompt not dismissible: {0}")]
    Permission(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("user signed out: {source}")]
    SignedOut {
        #[source]
        source: Box<ScenarioError>,
    },
    #[error("UI element not found: {0}")]
    UiNotFound(String),
    #[error("control unavailable: {0}")]
    ControlUnavailable(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("unexpected participant count: got {got}, want {want}")]
    ParticipantCount { got: u32, want: String },
    #[error("feature unavailable: {0}")]
    FeatureUnavailable(String),
    #[error("telemetry failed: {0}")]
    Telemetry(String),
    #[error("invalid driver state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Context(#[from] ContextError),
    /// Breadcrumb added as the error bubbles up through named steps.
    #[error("{name}: {source}")]
    Step {
        name: String,
        #[source]
        source: Box<ScenarioError>,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Perf(#[from] PerfError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, ScenarioError>;

impl ScenarioError {
    /// Kind of the innermost cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Setup(_) => ErrorKind::Setup,
            Self::Prepare(_) => ErrorKind::Prepare,
            Self::Network(_) => ErrorKind::Network,
            Self::Navigation(_) => ErrorKind::Navigation,
            Self::Permission(_) => ErrorKind::Permission,
            Self::Auth(_) => ErrorKind::Auth,
            Self::SignedOut { .. } => ErrorKind::SignedOut,
            Self::UiNotFound(_) => ErrorKind::UiNotFound,
            Self::ControlUnavailable(_) => ErrorKind::ControlUnavailable,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::ParticipantCount { .. } => ErrorKind::ParticipantCount,
            Self::FeatureUnavailable(_) => ErrorKind::FeatureUnavailable,
            Self::Telemetry(_) | Self::Perf(_) => ErrorKind::Telemetry,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Context(ContextError::Cancelled) => ErrorKind::Cancelled,
            Self::Context(ContextError::DeadlineExceeded) => ErrorKind::DeadlineExceeded,
            Self::Context(ContextError::InvalidDeadline) => ErrorKind::InvalidState,
            Self::Step { source, .. } => source.kind(),
            Self::Io(_) => ErrorKind::Io,
            Self::Config(ConfigError::MissingRoomUrls(_)) => ErrorKind::Prepare,
            Self::Config(_) => ErrorKind::Setup,
        }
    }

    /// Wrap with the name of the step that failed.
    #[must_use]
    pub fn with_step(self, name: impl Into<String>) -> Self {
        Self::Step {
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// Mark an auth failure as the session having ended under the scenario.
    #[must_use]
    pub fn signed_out(self) -> Self {
        Self::SignedOut {
            source: Box::new(self),
        }
    }

    /// Step names from the outermost to the innermost breadcrumb.
    pub fn breadcrumbs(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut current = self;
        while let Self::Step { name, source } = current {
            names.push(name.as_str());
            current = source;
        }
        names
    }

    pub fn is_participant_error(&self) -> bool {
        self.kind() == ErrorKind::ParticipantCount
    }

    pub fn is_feature_unavailable(&self) -> bool {
        self.kind() == ErrorKind::FeatureUnavailable
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Cancelled | ErrorKind::DeadlineExceeded
        )
    }
}

pub trait ResultExt<T> {
    /// Add a step breadcrumb to the error, if any.
    fn step(self, name: &str) -> Result<T>;
}

impl<T, E: Into<ScenarioError>> ResultExt<T> for std::result::Result<T, E> {
    fn step(self, name: &str) -> Result<T> {
        self.map_err(|e| e.into().with_step(name))
    }
}
