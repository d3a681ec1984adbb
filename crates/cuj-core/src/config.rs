//! Scenario variables and conference room configuration.
//!
//! Variables arrive as `key=value` pairs, either from a vars file (one pair
//! per line, `#` comments, optional quotes) or from run annotations attached
//! to the scenario context. Unknown keys are kept in `extras` and handed to
//! the driver untouched.

use crate::types::{RoomSize, ScreenMode};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read vars file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid vars line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid duration value for {key}: {value}")]
    InvalidDuration { key: String, value: String },
    #[error("no conference URLs configured for {0} room")]
    MissingRoomUrls(&'static str),
}

/// Primary and secondary URL pools for one room tag.
///
/// Secondary URLs are only tried once every primary URL failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomUrls {
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
}

impl RoomUrls {
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.secondary.is_empty()
    }
}

/// Recognized scenario variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioVars {
    /// Mute the device for the whole scenario.
    pub mute: bool,
    /// Force tablet or clamshell posture; `None` keeps the parameterized mode.
    pub cuj_mode: Option<ScreenMode>,
    /// Bluetooth peer to pair before the scenario.
    pub bt_devicename: Option<String>,
    pub meet_account: Option<String>,
    pub meet_password: Option<String>,
    /// URLs from plain `meet_url` / `meet_url_secondary`, valid for any room.
    pub generic_urls: RoomUrls,
    /// URLs from `meet_url_<room>` / `meet_url_<room>_secondary`.
    pub room_urls: BTreeMap<RoomSize, RoomUrls>,
    pub meet_url_retry_timeout: Duration,
    pub meet_url_retry_interval: Duration,
    /// Keys this crate does not interpret.
    pub extras: BTreeMap<String, String>,
}

impl Default for ScenarioVars {
    fn default() -> Self {
        Self {
            mute: false,
            cuj_mode: None,
            bt_devicename: None,
            meet_account: None,
            meet_password: None,
            generic_urls: RoomUrls::default(),
            room_urls: BTreeMap::new(),
            meet_url_retry_timeout: Duration::ZERO,
            meet_url_retry_interval: Duration::from_secs(60),
            extras: BTreeMap::new(),
        }
    }
}

impl ScenarioVars {
    /// Load vars from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut vars = Self::default();
        vars.load_file(path)?;
        Ok(vars)
    }

    /// Build vars from annotation pairs.
    pub fn from_annotations<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut vars = Self::default();
        for (key, value) in pairs {
            vars.apply_value(key, value)?;
        }
        Ok(vars)
    }

    /// Load and merge values from a vars file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        for (key, value) in parse_pairs(&content)? {
            self.apply_value(&key, &value)?;
        }
        Ok(())
    }

    /// Apply a single variable.
    pub fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "mute" => {
                // Presence alone mutes.
                self.mute = value.is_empty() || parse_bool(key, value)?;
            }
            // Anything but tablet or clamshell leaves the device as it is.
            "cuj_mode" => self.cuj_mode = value.parse().ok(),
            "bt_devicename" => self.bt_devicename = non_empty(value),
            "meet_account" => self.meet_account = non_empty(value),
            "meet_password" => self.meet_password = non_empty(value),
            "meet_url_retry_timeout" => {
                self.meet_url_retry_timeout = parse_duration(key, value)?;
            }
            "meet_url_retry_interval" => {
                self.meet_url_retry_interval = parse_duration(key, value)?;
            }
            _ => {
                if let Some(rest) = key.strip_prefix("meet_url") {
                    if let Some((room, secondary)) = Self::url_key(rest) {
                        let urls = match room {
                            Some(room) => self.room_urls.entry(room).or_default(),
                            None => &mut self.generic_urls,
                        };
                        let list = split_list(value);
                        if secondary {
                            urls.secondary = list;
                        } else {
                            urls.primary = list;
                        }
                        return Ok(());
                    }
                }
                self.extras.insert(key.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    /// Decode the part of a `meet_url*` key after the prefix.
    /// Returns the room (or `None` for the generic list) and whether it is secondary.
    fn url_key(rest: &str) -> Option<(Option<RoomSize>, bool)> {
        let (rest, secondary) = match rest.strip_suffix("_secondary") {
            Some(r) => (r, true),
            None => (rest, false),
        };
        if rest.is_empty() {
            return Some((None, secondary));
        }
        let room = rest.strip_prefix('_')?.parse::<RoomSize>().ok()?;
        if room == RoomSize::NoRoom {
            return None;
        }
        Some((Some(room), secondary))
    }

    /// Serialize back into annotation pairs.
    pub fn to_annotations(&self) -> BTreeMap<String, String> {
        let mut out = self.extras.clone();
        if self.mute {
            out.insert("mute".into(), "true".into());
        }
        if let Some(mode) = self.cuj_mode {
            out.insert("cuj_mode".into(), mode.as_str().into());
        }
        for (key, value) in [
            ("bt_devicename", &self.bt_devicename),
            ("meet_account", &self.meet_account),
            ("meet_password", &self.meet_password),
        ] {
            if let Some(v) = value {
                out.insert(key.into(), v.clone());
            }
        }
        out.insert(
            "meet_url_retry_timeout".into(),
            format!("{}s", self.meet_url_retry_timeout.as_secs()),
        );
        out.insert(
            "meet_url_retry_interval".into(),
            format!("{}s", self.meet_url_retry_interval.as_secs()),
        );
        let mut put_urls = |prefix: String, urls: &RoomUrls| {
            if !urls.primary.is_empty() {
                out.insert(prefix.clone(), urls.primary.join(","));
            }
            if !urls.secondary.is_empty() {
                out.insert(format!("{prefix}_secondary"), urls.secondary.join(","));
            }
        };
        put_urls("meet_url".into(), &self.generic_urls);
        for (room, urls) in &self.room_urls {
            put_urls(format!("meet_url_{}", room.as_str()), urls);
        }
        out
    }

    /// Resolve the conference configuration for a room.
    ///
    /// Primary URLs (room-specific plus generic) are shuffled and tried first,
    /// then the shuffled secondaries. A room with no URLs is an error.
    pub fn meet_config<R: Rng + ?Sized>(
        &self,
        room: RoomSize,
        rng: &mut R,
    ) -> Result<MeetConfig, ConfigError> {
        let mut config = MeetConfig {
            account: self.meet_account.clone(),
            password: self.meet_password.clone(),
            urls: Vec::new(),
            retry_timeout: self.meet_url_retry_timeout,
            retry_interval: self.meet_url_retry_interval,
        };
        if !room.has_room() {
            return Ok(config);
        }

        let specific = self.room_urls.get(&room).cloned().unwrap_or_default();
        let mut primary: Vec<String> = specific
            .primary
            .into_iter()
            .chain(self.generic_urls.primary.iter().cloned())
            .collect();
        let mut secondary: Vec<String> = specific
            .secondary
            .into_iter()
            .chain(self.generic_urls.secondary.iter().cloned())
            .collect();
        primary.shuffle(rng);
        secondary.shuffle(rng);
        config.urls = primary.into_iter().chain(secondary).collect();

        if config.urls.is_empty() {
            return Err(ConfigError::MissingRoomUrls(room.as_str()));
        }
        Ok(config)
    }
}

/// Conference account and URL retry settings for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetConfig {
    pub account: Option<String>,
    pub password: Option<String>,
    /// Ordered list of URLs to try.
    pub urls: Vec<String>,
    /// Zero means a single sweep over `urls`.
    pub retry_timeout: Duration,
    pub retry_interval: Duration,
}

/// Parse `key=value` content into ordered pairs.
pub fn parse_pairs(content: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();

        // Skip empty lines and comments
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(ConfigError::InvalidLine(line.to_string()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::InvalidLine(line.to_string()));
        }
        pairs.push((key.to_string(), unquote(value.trim())));
    }
    Ok(pairs)
}

/// Parse one `key=value` override as given on the command line.
pub fn parse_override(arg: &str) -> Result<(String, String), ConfigError> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), unquote(value.trim())))
        }
        _ => Err(ConfigError::InvalidLine(arg.to_string())),
    }
}

/// Remove surrounding quotes from a value.
fn unquote(value: &str) -> String {
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        return value[1..value.len() - 1].to_string();
    }
    value.to_string()
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Split a comma or whitespace separated list.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Ok(true),
        "false" | "0" | "no" | "n" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Parse `90`, `90s`, `15m`, `1h` or `500ms`. Bare numbers are seconds.
pub fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration {
        key: key.to_string(),
        value: value.to_string(),
    };
    let value = value.trim();
    let (digits, scale_ms) = if let Some(n) = value.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = value.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (value, 1_000)
    };
    let n: u64 = digits.trim().parse().map_err(|_| invalid())?;
    n.checked_mul(scale_ms)
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}
