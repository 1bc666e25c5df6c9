use chrono::{DateTime, Duration, Utc};

/// Elapsed-time source for one session.
///
/// Holds only the start anchor and, once the session ends, the frozen value.
/// Everything else is derived from the `now` passed in by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DurationClock {
    started_at: Option<DateTime<Utc>>,
    frozen: Option<Duration>,
}

impl DurationClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anchor(&mut self, start: DateTime<Utc>) {
        *self = Self {
            started_at: Some(start),
            frozen: None,
        };
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    /// `now - start`, clamped at zero for clock skew. Constant once frozen.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        if let Some(frozen) = self.frozen {
            return frozen;
        }
        match self.started_at {
            Some(start) => (now - start).max(Duration::zero()),
            None => Duration::zero(),
        }
    }

    /// Fixes the reported value at `end - start`. Only the first call has effect.
    pub fn freeze(&mut self, end: DateTime<Utc>) -> Duration {
        if let Some(frozen) = self.frozen {
            return frozen;
        }
        let value = self.elapsed(end);
        self.frozen = Some(value);
        value
    }
}

pub fn format_hms_secs(total_secs: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60
    )
}

/// `HH:MM:SS`, floored to whole seconds. Negative input renders as zero.
pub fn format_hms(elapsed: Duration) -> String {
    format_hms_secs(elapsed.num_seconds().max(0) as u64)
}

/// Parses the backend's `HH:MM:SS` duration string.
pub fn parse_hms(value: &str) -> Option<Duration> {
    let mut parts = value.trim().split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0 || !(0..60).contains(&minutes) || !(0..60).contains(&seconds) {
        return None;
    }
    Some(Duration::seconds(hours * 3600 + minutes * 60 + seconds))
}
