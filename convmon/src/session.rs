//! A single convergence measurement session.

use convmon_netlink::Attrs;

/// What kind of disturbance opened the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Netem,
    Route,
}

impl TriggerSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Netem => "netem",
            Self::Route => "route",
        }
    }
}

/// An event recorded inside a session, in arrival order.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub timestamp_ms: i64,
    /// Stable label, e.g. `route_add` or `netem_event(QDISC_DEL)`.
    pub label: String,
    pub info: Attrs,
    /// `timestamp - trigger_time`; may be negative if the kernel delivers
    /// out of order around the trigger.
    pub offset_ms: i64,
}

/// The observation window opened by a trigger event and closed by
/// quiet-period expiry (or a forced finish at shutdown).
#[derive(Debug, Clone)]
pub struct Session {
    pub id: u64,
    pub trigger_time_ms: i64,
    pub trigger_info: Attrs,
    pub trigger_source: TriggerSource,
    pub events: Vec<SessionEvent>,
    pub last_event_time_ms: Option<i64>,
    pub converged: bool,
    pub convergence_detected_at_ms: Option<i64>,
    pub convergence_time_ms: Option<i64>,
}

impl Session {
    pub fn new(
        id: u64,
        trigger_time_ms: i64,
        trigger_info: Attrs,
        trigger_source: TriggerSource,
    ) -> Self {
        Self {
            id,
            trigger_time_ms,
            trigger_info,
            trigger_source,
            events: Vec::new(),
            last_event_time_ms: None,
            converged: false,
            convergence_detected_at_ms: None,
            convergence_time_ms: None,
        }
    }

    /// Append an in-session event; returns its 1-based sequence number.
    pub fn append_event(
        &mut self,
        timestamp_ms: i64,
        label: impl Into<String>,
        info: Attrs,
    ) -> usize {
        self.events.push(SessionEvent {
            timestamp_ms,
            label: label.into(),
            info,
            offset_ms: timestamp_ms - self.trigger_time_ms,
        });
        self.last_event_time_ms = Some(timestamp_ms);
        self.events.len()
    }

    /// How long the session has been quiet: time since the last event, or
    /// since the trigger when no event has arrived yet.
    pub fn quiet_since_ms(&self, now_ms: i64) -> i64 {
        self.last_event_time_ms
            .map_or(now_ms - self.trigger_time_ms, |last| now_ms - last)
    }

    /// Evaluate the quiet-period rule, marking the session converged when
    /// satisfied. Idempotent once converged.
    ///
    /// The convergence time is `last_event - trigger`, or `0` when the
    /// trigger was never followed by any event.
    pub fn check_convergence(&mut self, now_ms: i64, quiet_period_ms: i64) -> bool {
        if self.converged {
            return true;
        }
        if self.quiet_since_ms(now_ms) >= quiet_period_ms {
            self.converged = true;
            self.convergence_detected_at_ms = Some(now_ms);
            self.convergence_time_ms =
                Some(self.last_event_time_ms.map_or(0, |last| last - self.trigger_time_ms));
            return true;
        }
        false
    }

    /// Converge immediately, regardless of how quiet the session has been.
    pub fn force_converge(&mut self, now_ms: i64) {
        self.check_convergence(now_ms, i64::MIN);
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Trigger-to-detection duration of a finished session.
    pub fn completed_duration_ms(&self) -> i64 {
        self.convergence_detected_at_ms.unwrap_or(self.trigger_time_ms) - self.trigger_time_ms
    }
}
