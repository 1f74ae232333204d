//! JSON run profiles for the `pks` binary.
//!
//! A profile names the target process, the step sequence, the dispatch
//! interval and the repeat policy:
//!
//! ```json
//! {
//!   "process_name": "notepad.exe",
//!   "steps": [
//!     {"mode": "key", "key_name": "Return"},
//!     {"mode": "text", "text_content": "hi", "append_enter": true}
//!   ],
//!   "interval": "500ms",
//!   "repeat_count": 3
//! }
//! ```

use std::fs;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PksError, Result};
use crate::poster::Dispatch;
use crate::step::KeyStep;

/// Shortest dispatch interval accepted from a profile.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Case-insensitive substring of the target's process name.
    #[serde(default)]
    pub process_name: String,

    /// Exact window to target; takes precedence over `process_name`.
    #[serde(default)]
    pub window_id: Option<u64>,

    #[serde(default)]
    pub steps: Vec<KeyStep>,

    #[serde(
        default = "default_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub interval: Duration,

    /// 0 loops until stopped.
    #[serde(default)]
    pub repeat_count: u32,

    #[serde(default = "default_pause_hotkey")]
    pub pause_hotkey: String,

    /// Attempts at locating the target before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub verbose: bool,
}

fn default_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_pause_hotkey() -> String {
    "ctrl+alt+r".to_string()
}

fn default_max_retries() -> u32 {
    10
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| PksError::config_load(path, e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| PksError::config_load(path, e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.process_name.trim().is_empty() && self.window_id.is_none() {
            return Err(PksError::configuration(
                "either process_name or window_id must be set",
            ));
        }
        if self.steps.is_empty() {
            return Err(PksError::configuration("at least one step is required"));
        }
        if self.interval < MIN_INTERVAL {
            return Err(PksError::configuration(format!(
                "interval must be at least {} ms",
                MIN_INTERVAL.as_millis()
            )));
        }
        if self.max_retries == 0 {
            return Err(PksError::configuration("max_retries must be greater than 0"));
        }
        for (index, step) in self.steps.iter().enumerate() {
            Dispatch::from_step(step, index)?;
        }
        Ok(())
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval.as_millis() as u64
    }
}

/// Parse `"500ms"`, `"2s"`, `"5m"` or bare milliseconds (`"1000"`).
pub fn parse_duration(value: &str) -> Result<Duration> {
    let trimmed = value.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err(PksError::invalid_duration(value, "empty duration"));
    }

    let (digits, unit_ms) = if let Some(number) = trimmed.strip_suffix("ms") {
        (number, 1)
    } else if let Some(number) = trimmed.strip_suffix('s') {
        (number, 1_000)
    } else if let Some(number) = trimmed.strip_suffix('m') {
        (number, 60_000)
    } else {
        (trimmed.as_str(), 1)
    };

    let amount: u64 = digits
        .trim()
        .parse()
        .map_err(|_| PksError::invalid_duration(value, "expected a non-negative number with ms, s or m"))?;

    amount
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| PksError::invalid_duration(value, "duration too large"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{}ms", duration.as_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepMode;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("1000").unwrap(), Duration::from_millis(1000));
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn test_profile_with_all_modes() {
        let json = r#"
        {
            "process_name": "notepad.exe",
            "steps": [
                {"mode": "key", "key_name": "s", "control": true},
                {"mode": "text", "text_content": "hello", "append_enter": true},
                {"mode": "combo", "text_content": "x", "has_prefix_key": true, "prefix_key_name": "Tab"}
            ],
            "interval": 250,
            "repeat_count": 2
        }
        "#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.steps.len(), 3);
        assert_eq!(config.steps[2].mode, StepMode::Combo);
        assert!(config.steps[0].control);
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.pause_hotkey, "ctrl+alt+r");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_keys() {
        let config = Config {
            process_name: "app".to_string(),
            window_id: None,
            steps: vec![KeyStep::key("hyper")],
            interval: Duration::from_millis(500),
            repeat_count: 0,
            pause_hotkey: default_pause_hotkey(),
            max_retries: 3,
            verbose: false,
        };
        assert!(matches!(config.validate(), Err(PksError::UnknownKey { .. })));
    }
}
