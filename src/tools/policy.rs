//! When to check the tools feed again

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Persisted tool acquisition state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolState {
    /// Last successful feed fetch
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

impl ToolState {
    /// Load state, falling back to a fresh state if missing or unreadable
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|content| serde_json::from_str(&content).map_err(anyhow::Error::from))
        {
            Ok(state) => state,
            Err(e) => {
                warn!("Ignoring unreadable tool state {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize tool state")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }
}

/// Feed refresh policy: last-checked timestamp plus a fixed interval
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    interval: Duration,
}

impl RefreshPolicy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn every_hours(hours: u32) -> Self {
        Self::new(Duration::hours(i64::from(hours)))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Due when never checked, when the interval has elapsed, or when the
    /// stored timestamp lies in the future (clock changes).
    pub fn is_due(&self, last_checked: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_checked {
            None => true,
            Some(last) if last > now => true,
            Some(last) => now - last >= self.interval,
        }
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::every_hours(24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_never_checked_is_due() {
        assert!(RefreshPolicy::default().is_due(None, at(12)));
    }

    #[test]
    fn test_interval() {
        let policy = RefreshPolicy::every_hours(6);
        assert!(!policy.is_due(Some(at(6)), at(11)));
        assert!(policy.is_due(Some(at(6)), at(12)));
    }

    #[test]
    fn test_crossing_midnight_is_not_due() {
        // a calendar-date comparison would re-check here
        let policy = RefreshPolicy::default();
        let last = Utc.with_ymd_and_hms(2024, 5, 1, 23, 30, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 0, 30, 0).unwrap();
        assert!(!policy.is_due(Some(last), now));
    }

    #[test]
    fn test_future_timestamp_is_due() {
        assert!(RefreshPolicy::default().is_due(Some(at(20)), at(10)));
    }

    #[test]
    fn test_state_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state/state.json");

        assert_eq!(ToolState::load(&path), ToolState::default());

        let state = ToolState {
            last_checked: Some(at(9)),
        };
        state.save(&path).unwrap();
        assert_eq!(ToolState::load(&path), state);
    }

    #[test]
    fn test_corrupt_state_resets() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");
        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(ToolState::load(&path), ToolState::default());
    }
}
