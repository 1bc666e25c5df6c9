use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::snapshot::{Connectivity, LiveDiagnosis, SessionSnapshot, StatisticsView};
use crate::clock::{format_hms, parse_hms, DurationClock};
use crate::error::{LifecycleError, MalformedEventError, SessionError, SessionResult};
use crate::gateway::{StartAck, StopSummary};
use crate::models::{
    ClassificationEvent, EventOrigin, ServerHints, Session, SessionReport, SessionStatus,
    StatisticsSource,
};
use crate::settings::LabelSettings;
use crate::stats::{FamilyKind, StatAggregator};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "session";

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    StartRequested,
    StartSucceeded,
    StartFailed,
    EventReceived,
    ChannelConnected,
    ChannelDisconnected,
    ChannelFailed,
    StopRequested,
    StopSucceeded,
    StopFailed,
    /// The stop call reached the backend but its reply was unusable.
    StopFaulted,
    Teardown,
}

impl Trigger {
    pub const ALL: [Trigger; 12] = [
        Trigger::StartRequested,
        Trigger::StartSucceeded,
        Trigger::StartFailed,
        Trigger::EventReceived,
        Trigger::ChannelConnected,
        Trigger::ChannelDisconnected,
        Trigger::ChannelFailed,
        Trigger::StopRequested,
        Trigger::StopSucceeded,
        Trigger::StopFailed,
        Trigger::StopFaulted,
        Trigger::Teardown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::StartRequested => "start",
            Trigger::StartSucceeded => "complete start",
            Trigger::StartFailed => "fail start",
            Trigger::EventReceived => "fold event",
            Trigger::ChannelConnected => "mark connected",
            Trigger::ChannelDisconnected => "mark degraded",
            Trigger::ChannelFailed => "mark unreachable",
            Trigger::StopRequested => "stop",
            Trigger::StopSucceeded => "complete stop",
            Trigger::StopFailed => "fail stop",
            Trigger::StopFaulted => "fault stop",
            Trigger::Teardown => "tear down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Folded,
    /// Resync reply: live diagnosis refreshed, statistics untouched.
    Refreshed,
    /// Not newer than the last folded event of this window.
    Duplicate,
    /// No session is accepting events.
    Ignored,
}

/// Single owner of everything a session mutates. All methods are
/// synchronous; the controller serializes access behind one mutex.
#[derive(Debug, Clone)]
pub struct SessionState {
    status: SessionStatus,
    generation: u64,
    session: Option<Session>,
    /// Status to return to when a stop call fails.
    resume_status: SessionStatus,
    clock: DurationClock,
    stats: StatAggregator,
    statistics_source: Option<StatisticsSource>,
    live: LiveDiagnosis,
    connectivity: Connectivity,
    last_error: Option<String>,
    /// Timestamp of the last folded event in the current delivery window.
    watermark: Option<DateTime<Utc>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(&LabelSettings::default())
    }
}

impl SessionState {
    pub fn new(labels: &LabelSettings) -> Self {
        Self {
            status: SessionStatus::Idle,
            generation: 0,
            session: None,
            resume_status: SessionStatus::Active,
            clock: DurationClock::new(),
            stats: StatAggregator::new(&labels.sit, &labels.spine),
            statistics_source: None,
            live: LiveDiagnosis::default(),
            connectivity: Connectivity::Offline,
            last_error: None,
            watermark: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Whether elapsed time is still advancing.
    pub fn is_running(&self) -> bool {
        matches!(self.status, SessionStatus::Active | SessionStatus::Stopping)
    }

    fn has_started(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.started_at.is_some())
    }

    /// Target of `trigger` from the current status. `None` is a no-op: the
    /// trigger does not apply and nothing changes.
    pub fn next_status(&self, trigger: Trigger) -> Option<SessionStatus> {
        use SessionStatus::*;
        use Trigger::*;

        match (self.status, trigger) {
            (_, Teardown) => Some(Idle),
            (Idle | Stopped | Errored, StartRequested) => Some(Connecting),
            (Connecting, StartSucceeded) => Some(Active),
            (Connecting, StartFailed) => Some(Errored),
            (Active, EventReceived | ChannelConnected | ChannelDisconnected) => Some(Active),
            (Active, ChannelFailed) => Some(Errored),
            (Active, StopRequested) => Some(Stopping),
            (Errored, StopRequested) if self.has_started() => Some(Stopping),
            (Stopping, EventReceived | ChannelConnected | ChannelDisconnected | ChannelFailed) => {
                Some(Stopping)
            }
            (Stopping, StopSucceeded) => Some(Stopped),
            (Stopping, StopFailed) => Some(self.resume_status),
            (Stopping, StopFaulted) => Some(Errored),
            _ => None,
        }
    }

    fn transition(&mut self, trigger: Trigger) -> SessionResult<SessionStatus> {
        let next = self
            .next_status(trigger)
            .ok_or(SessionError::InvalidTransition {
                status: self.status,
                trigger: trigger.as_str(),
            })?;
        if next != self.status {
            log_info!(
                "{} -> {} on {} (generation {})",
                self.status,
                next,
                trigger.as_str(),
                self.generation
            );
        }
        self.status = next;
        Ok(next)
    }

    fn ensure_current(&self, generation: u64) -> SessionResult<()> {
        if generation == self.generation {
            Ok(())
        } else {
            log_debug!(
                "discarding completion for generation {} (current {})",
                generation,
                self.generation
            );
            Err(SessionError::StaleCompletion {
                expected: self.generation,
                found: generation,
            })
        }
    }

    /// Enters Connecting with a fresh session and returns its generation.
    /// Everything from the previous session is discarded here.
    pub fn begin_start(&mut self) -> SessionResult<u64> {
        self.transition(Trigger::StartRequested)?;

        self.generation += 1;
        self.session = Some(Session::new(Uuid::new_v4().to_string(), self.generation));
        self.clock = DurationClock::new();
        self.stats.reset();
        self.statistics_source = None;
        self.live = LiveDiagnosis::default();
        self.connectivity = Connectivity::Offline;
        self.last_error = None;
        self.watermark = None;

        Ok(self.generation)
    }

    pub fn complete_start(
        &mut self,
        generation: u64,
        now: DateTime<Utc>,
        ack: &StartAck,
    ) -> SessionResult<()> {
        self.ensure_current(generation)?;
        self.transition(Trigger::StartSucceeded)?;

        self.clock.anchor(now);
        if let Some(session) = self.session.as_mut() {
            session.started_at = Some(now);
            session.backend_started_at = ack.start_time;
        }
        Ok(())
    }

    /// No partial session survives a failed start.
    pub fn fail_start(&mut self, generation: u64, err: &LifecycleError) -> SessionResult<()> {
        self.ensure_current(generation)?;
        self.transition(Trigger::StartFailed)?;

        self.session = None;
        self.last_error = Some(format!("start failed: {err}"));
        Ok(())
    }

    pub fn apply_event(
        &mut self,
        event: &ClassificationEvent,
    ) -> Result<EventOutcome, MalformedEventError> {
        if self.next_status(Trigger::EventReceived).is_none() {
            return Ok(EventOutcome::Ignored);
        }

        match event.origin {
            EventOrigin::Resync => {
                self.stats.validate(event)?;
                self.live.observe(event);
                Ok(EventOutcome::Refreshed)
            }
            EventOrigin::Live => {
                if self.watermark.is_some_and(|mark| event.timestamp <= mark) {
                    log_debug!("dropping replayed event at {}", event.timestamp);
                    return Ok(EventOutcome::Duplicate);
                }
                self.stats.fold(event)?;
                self.watermark = Some(event.timestamp);
                self.live.observe(event);
                if let Some(hints) = &event.hints {
                    self.compare_hints(hints);
                }
                Ok(EventOutcome::Folded)
            }
        }
    }

    fn compare_hints(&self, hints: &ServerHints) {
        for (kind, hinted) in [
            (FamilyKind::Sit, hints.dominant_sit.as_deref()),
            (FamilyKind::Spine, hints.dominant_spine.as_deref()),
        ] {
            let local = self.stats.family(kind).dominant();
            if let Some(hinted) = hinted {
                if local.is_some_and(|l| !l.eq_ignore_ascii_case(hinted)) {
                    log_debug!(
                        "backend reports dominant {} '{}', local aggregate has {:?}",
                        kind,
                        hinted,
                        local
                    );
                }
            }
        }
    }

    /// A fresh delivery window opened. Returns false when no session cares.
    pub fn channel_connected(&mut self) -> bool {
        if self.next_status(Trigger::ChannelConnected).is_none() {
            return false;
        }
        self.connectivity = Connectivity::Connected;
        // Windows are not comparable; the new one starts its own ordering.
        self.watermark = None;
        true
    }

    pub fn channel_disconnected(&mut self, reason: String, attempt: u32, budget: u32) -> bool {
        if self.next_status(Trigger::ChannelDisconnected).is_none() {
            return false;
        }
        self.connectivity = Connectivity::Degraded {
            attempt,
            budget,
            reason,
        };
        true
    }

    /// Retry budget exhausted. Active sessions become Errored but keep their
    /// record; a pending stop still decides the outcome.
    pub fn channel_failed(&mut self, reason: String) -> bool {
        if self.next_status(Trigger::ChannelFailed).is_none() {
            return false;
        }
        self.last_error = Some(format!("connection failed: {reason}"));
        self.connectivity = Connectivity::Unreachable { reason };
        if self.status == SessionStatus::Stopping {
            // A failed stop must not roll back into Active without a channel.
            self.resume_status = SessionStatus::Errored;
        }
        let _ = self.transition(Trigger::ChannelFailed);
        true
    }

    pub fn begin_stop(&mut self) -> SessionResult<u64> {
        if self.session.is_none() {
            return Err(SessionError::NoSession);
        }
        let previous = self.status;
        self.transition(Trigger::StopRequested)?;
        self.resume_status = previous;
        Ok(self.generation)
    }

    pub fn complete_stop(
        &mut self,
        generation: u64,
        now: DateTime<Utc>,
        summary: &StopSummary,
    ) -> SessionResult<SessionReport> {
        self.ensure_current(generation)?;
        if self.session.is_none() {
            return Err(SessionError::NoSession);
        }
        self.transition(Trigger::StopSucceeded)?;

        let started_at = self.clock.started_at().unwrap_or(now);
        let ended_at = now.max(started_at);
        let elapsed = self.clock.freeze(ended_at);

        let source = match &summary.posture_statistics {
            Some(server) => match self.stats.replace_with(server) {
                Ok(()) => StatisticsSource::Server,
                Err(err) => {
                    log_warn!("keeping local statistics, server summary rejected: {}", err);
                    StatisticsSource::Local
                }
            },
            None => StatisticsSource::Local,
        };
        self.statistics_source = Some(source);
        self.connectivity = Connectivity::Offline;

        if let Some(backend) = summary.duration.as_deref() {
            match parse_hms(backend) {
                Some(reported) => log_debug!(
                    "backend duration {} vs local {}",
                    format_hms(reported),
                    format_hms(elapsed)
                ),
                None => log_warn!("backend duration '{}' is not HH:MM:SS", backend),
            }
        }

        let mut id = String::new();
        if let Some(session) = self.session.as_mut() {
            session.ended_at = Some(ended_at);
            id = session.id.clone();
        }

        Ok(SessionReport {
            id,
            generation,
            started_at,
            ended_at,
            elapsed_ms: elapsed.num_milliseconds().max(0) as u64,
            elapsed_formatted: format_hms(elapsed),
            backend_duration: summary.duration.clone(),
            statistics: self.stats.snapshot(),
            statistics_source: source,
        })
    }

    /// The stop never took effect: back to where the session was.
    pub fn fail_stop(&mut self, generation: u64, err: &LifecycleError) -> SessionResult<SessionStatus> {
        self.ensure_current(generation)?;
        let status = self.transition(Trigger::StopFailed)?;
        self.last_error = Some(format!("stop failed: {err}"));
        Ok(status)
    }

    pub fn fault_stop(&mut self, generation: u64, err: &LifecycleError) -> SessionResult<()> {
        self.ensure_current(generation)?;
        self.transition(Trigger::StopFaulted)?;
        self.last_error = Some(format!("stop outcome unknown: {err}"));
        Ok(())
    }

    /// Back to Idle under a new generation so any in-flight completion is stale.
    pub fn teardown(&mut self) {
        let _ = self.transition(Trigger::Teardown);
        self.generation += 1;
        self.session = None;
        self.clock = DurationClock::new();
        self.stats.reset();
        self.statistics_source = None;
        self.live = LiveDiagnosis::default();
        self.connectivity = Connectivity::Offline;
        self.last_error = None;
        self.watermark = None;
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        let elapsed = self.clock.elapsed(now);
        let stats = self.stats.snapshot();

        SessionSnapshot {
            generation: self.generation,
            session_id: self.session.as_ref().map(|s| s.id.clone()),
            status: self.status,
            started_at: self.session.as_ref().and_then(|s| s.started_at),
            ended_at: self.session.as_ref().and_then(|s| s.ended_at),
            elapsed_ms: elapsed.num_milliseconds().max(0) as u64,
            elapsed_formatted: format_hms(elapsed),
            live_diagnosis: self.live.clone(),
            statistics: StatisticsView {
                sit: stats.sit,
                spine: stats.spine,
                source: self.statistics_source,
            },
            connectivity: self.connectivity.clone(),
            last_error: self.last_error.clone(),
        }
    }
}
