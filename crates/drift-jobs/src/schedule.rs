//! Daily schedule arithmetic.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DAY: u64 = 24 * 60 * 60;

/// A fixed UTC time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    /// Hour, `0..24`.
    pub hour: u8,
    /// Minute, `0..60`.
    pub minute: u8,
}

impl TimeOfDay {
    /// Midnight UTC.
    pub const MIDNIGHT: Self = Self { hour: 0, minute: 0 };

    /// Build a time of day, rejecting out-of-range values.
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    fn seconds(self) -> u64 {
        u64::from(self.hour) * 3600 + u64::from(self.minute) * 60
    }

    /// Time from `now` (Unix seconds) until the next occurrence. An
    /// occurrence exactly at `now` counts as the next day's.
    pub fn delay_from(self, now: u64) -> Duration {
        let today = now % DAY;
        let target = self.seconds();
        let secs = if target > today {
            target - today
        } else {
            DAY - today + target
        };
        Duration::from_secs(secs)
    }

    /// Time from the current wall clock until the next occurrence.
    pub fn delay_from_now(self) -> Duration {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.delay_from(now)
    }
}

impl std::str::FromStr for TimeOfDay {
    type Err = String;

    /// Parse `HH:MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got {s:?}"))?;
        let hour = h.parse().map_err(|_| format!("bad hour in {s:?}"))?;
        let minute = m.parse().map_err(|_| format!("bad minute in {s:?}"))?;
        Self::new(hour, minute).ok_or_else(|| format!("time out of range: {s:?}"))
    }
}
