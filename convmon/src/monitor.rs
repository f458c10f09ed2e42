//! The Monitor: the process-wide session engine.
//!
//! All session state lives behind one mutex: `current` being `Some` *is*
//! the monitoring state, so "at most one session" and "state matches
//! session presence" hold by construction. Classification of every incoming
//! event goes through the single [`Monitor::ingest`] funnel; records are
//! built under the lock but handed to the sink only after it is released.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use convmon_netlink::{
    unix_millis, KernelEvent, QdiscEvent, QdiscEventKind, RouteEvent,
};

use crate::config::MonitorConfig;
use crate::record::{self, Record};
use crate::ring::QdiscRing;
use crate::session::{Session, TriggerSource};
use crate::sink::RecordSink;
use crate::stats;

/// Reason recorded on sessions finished by shutdown rather than quiet.
pub const FORCE_FINISH_REASON: &str = "monitor_shutdown";

#[derive(Debug, Default)]
struct Engine {
    /// The in-flight session; `Some` means monitoring, `None` means idle.
    /// A session in here is never converged: convergence removes it.
    current: Option<Session>,
    completed: Vec<Session>,
    session_seq: u64,
}

impl Engine {
    fn next_session_id(&mut self) -> u64 {
        self.session_seq += 1;
        self.session_seq
    }
}

/// Process-wide convergence monitor.
pub struct Monitor {
    router_name: String,
    user: String,
    monitor_id: Uuid,
    quiet_period_ms: i64,
    log_path_display: String,
    started_at_ms: i64,

    sink: Arc<dyn RecordSink>,
    engine: Mutex<Engine>,
    recent_qdiscs: Mutex<QdiscRing>,

    running: AtomicBool,
    stopped: AtomicBool,

    total_route_events: AtomicU64,
    total_netem_triggers: AtomicU64,
    total_route_triggers: AtomicU64,
}

impl Monitor {
    pub fn new(config: MonitorConfig, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            router_name: config.router_name,
            user: config.user,
            monitor_id: Uuid::new_v4(),
            quiet_period_ms: config.quiet_period_ms,
            log_path_display: config.log_path.display().to_string(),
            started_at_ms: unix_millis(),
            sink,
            engine: Mutex::new(Engine::default()),
            recent_qdiscs: Mutex::new(QdiscRing::default()),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            total_route_events: AtomicU64::new(0),
            total_netem_triggers: AtomicU64::new(0),
            total_route_triggers: AtomicU64::new(0),
        }
    }

    /// Emit `monitoring_started` and begin accepting events. A second call
    /// while running is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let now_ms = unix_millis();
        let mut started = self.base_record(record::MONITORING_STARTED, now_ms);
        started.set("listen_start_time", record::iso8601_millis(self.started_at_ms));
        started.set("convergence_threshold_ms", self.quiet_period_ms);
        started.set("log_file_path", self.log_path_display.as_str());
        self.sink.log(started);

        info!(
            router = %self.router_name,
            threshold_ms = self.quiet_period_ms,
            "monitoring started, waiting for trigger events"
        );
    }

    /// Classify one kernel event: a trigger when idle, an in-session event
    /// while monitoring. Never promotes an event to a new trigger while a
    /// session is in progress.
    pub fn ingest(&self, event: KernelEvent) {
        if !self.running.load(Ordering::SeqCst) || self.stopped.load(Ordering::SeqCst) {
            return;
        }
        match event {
            KernelEvent::Route(route) => self.ingest_route(route),
            KernelEvent::Qdisc(qdisc) => self.ingest_qdisc(qdisc),
        }
    }

    fn ingest_route(&self, event: RouteEvent) {
        let mut records = Vec::with_capacity(2);
        let mut started = None;
        {
            let mut engine = self.engine();
            if engine.current.is_none() {
                let id = engine.next_session_id();
                self.total_route_triggers.fetch_add(1, Ordering::Relaxed);

                let mut trigger_info = event.attrs.clone();
                trigger_info.insert("type".to_owned(), event.kind.as_str().to_owned());
                let session =
                    Session::new(id, event.timestamp_ms, trigger_info, TriggerSource::Route);
                records.push(self.session_started_record(&session, event.kind.as_str()));
                started = Some((id, event.attrs.get("destination").cloned()));
                engine.current = Some(session);
            }

            // The FIB change that opens a session is itself convergence
            // activity; it is recorded as the session's first event.
            if let Some(session) = engine.current.as_mut() {
                let number = self.total_route_events.fetch_add(1, Ordering::Relaxed) + 1;
                let sequence =
                    session.append_event(event.timestamp_ms, event.kind.as_str(), event.attrs.clone());
                records.push(self.route_event_record(
                    session.id,
                    event.kind.as_str(),
                    number,
                    sequence,
                    event.timestamp_ms - session.trigger_time_ms,
                    &event,
                ));
            }
        }

        for entry in records {
            self.sink.log(entry);
        }
        if let Some((id, destination)) = started {
            info!(
                session_id = id,
                destination = destination.as_deref().unwrap_or("?"),
                "session #{id} started (route trigger: {})",
                event.kind
            );
        }
    }

    fn ingest_qdisc(&self, event: QdiscEvent) {
        let netem_related = {
            let mut ring = self.ring();
            ring.push(&event);
            event.is_netem
                || (event.kind == QdiscEventKind::Del && ring.netem_seen_on(event.interface()))
        };
        if !netem_related {
            // Non-netem qdisc churn neither opens nor feeds a session.
            return;
        }

        let mut records = Vec::with_capacity(2);
        let mut started = None;
        let mut in_progress = None;
        {
            let mut engine = self.engine();
            match engine.current.as_mut() {
                Some(session) => {
                    in_progress = Some(session.id);
                    records.push(self.netem_detected_record(&event));

                    let label = format!("netem_event({})", event.kind.as_str());
                    let number = self.total_route_events.fetch_add(1, Ordering::Relaxed) + 1;
                    let sequence =
                        session.append_event(event.timestamp_ms, label.clone(), event.attrs.clone());
                    records.push(self.route_event_record(
                        session.id,
                        &label,
                        number,
                        sequence,
                        event.timestamp_ms - session.trigger_time_ms,
                        &QdiscAsRoute(&event),
                    ));
                }
                None => {
                    let id = engine.next_session_id();
                    self.total_netem_triggers.fetch_add(1, Ordering::Relaxed);

                    let session = Session::new(
                        id,
                        event.timestamp_ms,
                        event.attrs.clone(),
                        TriggerSource::Netem,
                    );
                    records.push(self.session_started_record(&session, event.kind.as_str()));
                    records.push(self.netem_detected_record(&event));
                    started = Some((id, event.interface().to_owned()));
                    engine.current = Some(session);
                }
            }
        }

        for entry in records {
            self.sink.log(entry);
        }
        if let Some((id, interface)) = started {
            info!(
                session_id = id,
                interface = %interface,
                "session #{id} started (netem trigger: {})",
                event.kind
            );
        }
        if let Some(id) = in_progress {
            info!("ignoring new event: session #{id} in progress");
        }
    }

    /// Ticker entry point: finalize the current session if it has been
    /// quiet for the full threshold. `now_ms` is sampled by the caller
    /// before this takes the session lock.
    pub fn poll_convergence(&self, now_ms: i64) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let mut finished = None;
        {
            let mut engine = self.engine();
            let quiet = engine
                .current
                .as_mut()
                .is_some_and(|session| session.check_convergence(now_ms, self.quiet_period_ms));
            if quiet {
                if let Some(session) = engine.current.take() {
                    finished = Some((
                        self.session_completed_record(&session, None),
                        session.id,
                        session.convergence_time_ms.unwrap_or(0),
                        session.event_count(),
                    ));
                    engine.completed.push(session);
                }
            }
        }

        if let Some((entry, id, convergence_ms, events)) = finished {
            self.sink.log(entry);
            info!(convergence_ms, events, "session #{id} converged");
        }
    }

    /// Graceful shutdown: force-finish a live session, drain the sink and
    /// append the terminal summary record durably. Stopping a stopped (or
    /// never started) monitor is a no-op.
    pub fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let now_ms = unix_millis();
        let mut forced = None;
        {
            let mut engine = self.engine();
            if let Some(mut session) = engine.current.take() {
                session.force_converge(now_ms);
                forced = Some((
                    self.session_completed_record(&session, Some(FORCE_FINISH_REASON)),
                    session.id,
                ));
                engine.completed.push(session);
            }
        }
        if let Some((entry, id)) = forced {
            self.sink.log(entry);
            info!("session #{id} force-finished: {FORCE_FINISH_REASON}");
        }

        let end_ms = unix_millis();
        let (summary_record, summary, completed_count) = {
            let engine = self.engine();
            let summary = stats::summarize(&engine.completed);
            let entry =
                self.monitoring_completed_record(engine.completed.len(), &summary, end_ms);
            (entry, summary, engine.completed.len())
        };

        // Drain queued records first so the summary is the last line.
        self.sink.shutdown();
        self.sink.log_sync(summary_record);

        let triggers = self.total_netem_triggers.load(Ordering::Relaxed)
            + self.total_route_triggers.load(Ordering::Relaxed);
        info!(
            router = %self.router_name,
            sessions = completed_count,
            triggers,
            route_events = self.total_route_events.load(Ordering::Relaxed),
            duration_s = (end_ms - self.started_at_ms) as f64 / 1000.0,
            "monitoring completed"
        );
        if let (Some(fastest), Some(slowest), Some(avg)) = (
            summary.fastest_convergence_ms,
            summary.slowest_convergence_ms,
            summary.avg_convergence_time_ms,
        ) {
            info!(
                "convergence: fastest={fastest}ms slowest={slowest}ms avg={avg:.1}ms \
                 (fast={} medium={} slow={})",
                summary.fast_convergence_count,
                summary.medium_convergence_count,
                summary.slow_convergence_count,
            );
        }
    }

    /// Whether a session is currently open.
    pub fn is_monitoring(&self) -> bool {
        self.engine().current.is_some()
    }

    pub fn completed_count(&self) -> usize {
        self.engine().completed.len()
    }

    fn engine(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ring(&self) -> MutexGuard<'_, QdiscRing> {
        self.recent_qdiscs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn base_record(&self, event_type: &str, timestamp_ms: i64) -> Record {
        let mut entry = Record::new(event_type);
        entry.set("router_name", self.router_name.as_str());
        entry.set("user", self.user.as_str());
        entry.set("timestamp", record::iso8601_millis(timestamp_ms));
        entry.set("monitor_id", self.monitor_id.to_string());
        entry
    }

    fn session_started_record(&self, session: &Session, trigger_event_type: &str) -> Record {
        let mut entry = self.base_record(record::SESSION_STARTED, session.trigger_time_ms);
        entry.set("session_id", session.id);
        entry.set("trigger_source", session.trigger_source.as_str());
        entry.set("trigger_event_type", trigger_event_type);
        entry.set_attrs("trigger_info", &session.trigger_info);
        entry
    }

    fn netem_detected_record(&self, event: &QdiscEvent) -> Record {
        let mut entry = self.base_record(record::NETEM_DETECTED, event.timestamp_ms);
        entry.set("netem_event_type", event.kind.as_str());
        entry.set_attrs("qdisc_info", &event.attrs);
        entry
    }

    fn route_event_record(
        &self,
        session_id: u64,
        label: &str,
        number: u64,
        sequence: usize,
        offset_ms: i64,
        event: &dyn EventInfo,
    ) -> Record {
        let mut entry = self.base_record(record::ROUTE_EVENT, event.timestamp_ms());
        entry.set("session_id", session_id);
        entry.set("route_event_type", label);
        entry.set("route_event_number", number);
        entry.set("session_event_number", sequence as u64);
        entry.set("offset_from_trigger_ms", offset_ms);
        entry.set_attrs("route_info", event.attrs());
        entry
    }

    fn session_completed_record(&self, session: &Session, reason: Option<&str>) -> Record {
        let detected_ms = session.convergence_detected_at_ms.unwrap_or_else(unix_millis);
        let mut entry = self.base_record(record::SESSION_COMPLETED, detected_ms);
        entry.set("session_id", session.id);
        entry.set("convergence_time_ms", session.convergence_time_ms.unwrap_or(0));
        entry.set("route_events_count", session.event_count() as u64);
        entry.set("session_duration_ms", session.completed_duration_ms());
        entry.set("convergence_threshold_ms", self.quiet_period_ms);
        entry.set_attrs("netem_info", &session.trigger_info);
        if let Some(reason) = reason {
            entry.set("reason", reason);
        }
        entry
    }

    fn monitoring_completed_record(
        &self,
        completed: usize,
        summary: &stats::Summary,
        end_ms: i64,
    ) -> Record {
        let netem_triggers = self.total_netem_triggers.load(Ordering::Relaxed);
        let route_triggers = self.total_route_triggers.load(Ordering::Relaxed);
        let total_ms = end_ms - self.started_at_ms;

        let mut entry = self.base_record(record::MONITORING_COMPLETED, end_ms);
        entry.set("log_file_path", self.log_path_display.as_str());
        entry.set("listen_start_time", record::iso8601_millis(self.started_at_ms));
        entry.set("listen_end_time", record::iso8601_millis(end_ms));
        entry.set("total_listen_duration_ms", total_ms);
        entry.set("total_listen_duration_seconds", total_ms as f64 / 1000.0);
        entry.set("convergence_threshold_ms", self.quiet_period_ms);
        entry.set("total_trigger_events", netem_triggers + route_triggers);
        entry.set("netem_events_count", netem_triggers);
        entry.set("route_events_in_trigger", route_triggers);
        entry.set("total_route_events", self.total_route_events.load(Ordering::Relaxed));
        entry.set("completed_sessions_count", completed as u64);
        summary.apply(&mut entry);
        entry
    }
}

/// Uniform access to the bits of an event a `route_event` record needs,
/// whether it came from the FIB or from traffic control.
trait EventInfo {
    fn timestamp_ms(&self) -> i64;
    fn attrs(&self) -> &convmon_netlink::Attrs;
}

impl EventInfo for RouteEvent {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
    fn attrs(&self) -> &convmon_netlink::Attrs {
        &self.attrs
    }
}

struct QdiscAsRoute<'a>(&'a QdiscEvent);

impl EventInfo for QdiscAsRoute<'_> {
    fn timestamp_ms(&self) -> i64 {
        self.0.timestamp_ms
    }
    fn attrs(&self) -> &convmon_netlink::Attrs {
        &self.0.attrs
    }
}

/// Drive the engine from the subscriber's event channel until it closes.
pub async fn run_event_loop(monitor: Arc<Monitor>, mut events: mpsc::Receiver<KernelEvent>) {
    while let Some(event) = events.recv().await {
        monitor.ingest(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{
        MONITORING_COMPLETED, MONITORING_STARTED, NETEM_DETECTED, ROUTE_EVENT, SESSION_COMPLETED,
        SESSION_STARTED,
    };
    use convmon_netlink::{Attrs, RouteEventKind};
    use serde_json::Value;
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct CapturingSink {
        records: StdMutex<Vec<Record>>,
    }

    impl RecordSink for CapturingSink {
        fn log(&self, record: Record) {
            self.records.lock().unwrap().push(record);
        }
        fn log_sync(&self, record: Record) {
            self.records.lock().unwrap().push(record);
        }
        fn shutdown(&self) {}
    }

    impl CapturingSink {
        fn event_types(&self) -> Vec<String> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.event_type().to_owned())
                .collect()
        }

        fn of_type(&self, event_type: &str) -> Vec<Record> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.event_type() == event_type)
                .cloned()
                .collect()
        }
    }

    fn test_monitor(quiet_period_ms: i64) -> (Arc<Monitor>, Arc<CapturingSink>) {
        let sink = Arc::new(CapturingSink::default());
        let config = MonitorConfig {
            quiet_period_ms,
            router_name: "spine1".to_owned(),
            user: "tester".to_owned(),
            log_path: PathBuf::from("/tmp/convmon-test.json"),
        };
        let monitor = Arc::new(Monitor::new(config, sink.clone() as Arc<dyn RecordSink>));
        (monitor, sink)
    }

    fn route(timestamp_ms: i64, kind: RouteEventKind, interface: &str, dst: &str) -> KernelEvent {
        let mut attrs = Attrs::new();
        attrs.insert("destination".into(), dst.into());
        attrs.insert("gateway".into(), "N/A".into());
        attrs.insert("interface".into(), interface.into());
        KernelEvent::Route(RouteEvent { timestamp_ms, kind, attrs })
    }

    fn qdisc(
        timestamp_ms: i64,
        kind: QdiscEventKind,
        interface: &str,
        qdisc_kind: &str,
    ) -> KernelEvent {
        let is_netem = qdisc_kind == "netem";
        let mut attrs = Attrs::new();
        attrs.insert("interface".into(), interface.into());
        attrs.insert("kind".into(), qdisc_kind.into());
        attrs.insert("is_netem".into(), is_netem.to_string());
        KernelEvent::Qdisc(QdiscEvent { timestamp_ms, kind, is_netem, attrs })
    }

    fn int(record: &Record, key: &str) -> i64 {
        record.get(key).and_then(Value::as_i64).unwrap()
    }

    fn text<'a>(record: &'a Record, key: &str) -> &'a str {
        record.get(key).and_then(Value::as_str).unwrap()
    }

    #[test]
    fn netem_trigger_with_one_route_event() {
        let (monitor, sink) = test_monitor(3000);
        monitor.start();

        monitor.ingest(qdisc(0, QdiscEventKind::Add, "eth0", "netem"));
        monitor.ingest(route(50, RouteEventKind::Del, "eth0", "2001:db8::/64"));

        monitor.poll_convergence(3049);
        assert!(monitor.is_monitoring());
        monitor.poll_convergence(3050);
        assert!(!monitor.is_monitoring());

        assert_eq!(
            sink.event_types(),
            [MONITORING_STARTED, SESSION_STARTED, NETEM_DETECTED, ROUTE_EVENT, SESSION_COMPLETED]
        );

        let started = &sink.of_type(SESSION_STARTED)[0];
        assert_eq!(int(started, "session_id"), 1);
        assert_eq!(text(started, "trigger_source"), "netem");
        assert_eq!(text(started, "trigger_event_type"), "QDISC_ADD");
        assert_eq!(started.get("trigger_info").unwrap()["interface"], "eth0");

        let event = &sink.of_type(ROUTE_EVENT)[0];
        assert_eq!(int(event, "session_id"), 1);
        assert_eq!(int(event, "session_event_number"), 1);
        assert_eq!(int(event, "offset_from_trigger_ms"), 50);
        assert_eq!(text(event, "route_event_type"), "route_del");

        let completed = &sink.of_type(SESSION_COMPLETED)[0];
        assert_eq!(int(completed, "convergence_time_ms"), 50);
        assert_eq!(int(completed, "route_events_count"), 1);
        assert!(int(completed, "session_duration_ms") >= 3050);
        assert!(completed.get("reason").is_none());
    }

    #[test]
    fn route_trigger_with_bursty_convergence() {
        let (monitor, sink) = test_monitor(1000);
        monitor.start();

        monitor.ingest(route(0, RouteEventKind::Add, "eth1", "10.0.0.0/24"));
        monitor.ingest(route(100, RouteEventKind::Del, "eth1", "10.0.1.0/24"));
        monitor.ingest(route(900, RouteEventKind::Add, "eth2", "10.0.2.0/24"));
        monitor.ingest(route(1800, RouteEventKind::Add, "eth2", "10.0.3.0/24"));

        monitor.poll_convergence(2799);
        monitor.poll_convergence(2800);

        let events = sink.of_type(ROUTE_EVENT);
        assert_eq!(events.len(), 4);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(int(event, "session_event_number"), i as i64 + 1);
            assert_eq!(int(event, "session_id"), 1);
        }

        let completed = sink.of_type(SESSION_COMPLETED);
        assert_eq!(completed.len(), 1);
        assert_eq!(int(&completed[0], "convergence_time_ms"), 1800);
        assert_eq!(int(&completed[0], "route_events_count"), 4);

        let started = sink.of_type(SESSION_STARTED);
        assert_eq!(started.len(), 1);
        assert_eq!(text(&started[0], "trigger_source"), "route");
        assert_eq!(started[0].get("trigger_info").unwrap()["type"], "route_add");
    }

    #[test]
    fn second_netem_joins_the_running_session() {
        let (monitor, sink) = test_monitor(3000);
        monitor.start();

        monitor.ingest(qdisc(0, QdiscEventKind::Add, "eth0", "netem"));
        monitor.ingest(qdisc(500, QdiscEventKind::Add, "eth1", "netem"));

        // Only one session; the second arrival is consumed, not promoted.
        assert_eq!(sink.of_type(SESSION_STARTED).len(), 1);
        assert_eq!(sink.of_type(NETEM_DETECTED).len(), 2);

        let events = sink.of_type(ROUTE_EVENT);
        assert_eq!(events.len(), 1);
        assert_eq!(text(&events[0], "route_event_type"), "netem_event(QDISC_ADD)");
        assert_eq!(int(&events[0], "offset_from_trigger_ms"), 500);

        monitor.poll_convergence(3500);
        let completed = sink.of_type(SESSION_COMPLETED);
        assert_eq!(completed.len(), 1);
        assert_eq!(int(&completed[0], "convergence_time_ms"), 500);
        assert_eq!(int(&completed[0], "route_events_count"), 1);
    }

    #[test]
    fn kindless_qdisc_delete_is_recognized_via_ring() {
        let (monitor, sink) = test_monitor(3000);
        monitor.start();

        monitor.ingest(qdisc(0, QdiscEventKind::Add, "eth0", "netem"));
        // Delete without a kind attribute: classified by the ring history.
        monitor.ingest(qdisc(10, QdiscEventKind::Del, "eth0", "unknown"));

        assert_eq!(sink.of_type(SESSION_STARTED).len(), 1);
        assert_eq!(sink.of_type(NETEM_DETECTED).len(), 2);

        let events = sink.of_type(ROUTE_EVENT);
        assert_eq!(events.len(), 1);
        assert_eq!(text(&events[0], "route_event_type"), "netem_event(QDISC_DEL)");
    }

    #[test]
    fn kindless_delete_on_other_interface_is_ignored() {
        let (monitor, sink) = test_monitor(3000);
        monitor.start();

        monitor.ingest(qdisc(0, QdiscEventKind::Add, "eth0", "netem"));
        monitor.ingest(qdisc(10, QdiscEventKind::Del, "eth7", "unknown"));

        assert_eq!(sink.of_type(NETEM_DETECTED).len(), 1);
        assert_eq!(sink.of_type(ROUTE_EVENT).len(), 0);
    }

    #[test]
    fn shutdown_force_finishes_the_session() {
        let (monitor, sink) = test_monitor(3000);
        monitor.start();

        monitor.ingest(qdisc(0, QdiscEventKind::Add, "eth0", "netem"));
        monitor.ingest(route(100, RouteEventKind::Add, "eth0", "10.0.0.0/24"));
        monitor.stop();

        let completed = sink.of_type(SESSION_COMPLETED);
        assert_eq!(completed.len(), 1);
        assert_eq!(int(&completed[0], "convergence_time_ms"), 100);
        assert_eq!(text(&completed[0], "reason"), FORCE_FINISH_REASON);

        let types = sink.event_types();
        assert_eq!(types.first().map(String::as_str), Some(MONITORING_STARTED));
        assert_eq!(types.last().map(String::as_str), Some(MONITORING_COMPLETED));

        let summary = &sink.of_type(MONITORING_COMPLETED)[0];
        assert_eq!(int(summary, "completed_sessions_count"), 1);
        assert_eq!(int(summary, "netem_events_count"), 1);
        assert_eq!(int(summary, "route_events_in_trigger"), 0);
        assert_eq!(int(summary, "total_route_events"), 1);
    }

    #[test]
    fn force_finish_without_events_reports_zero_convergence() {
        let (monitor, sink) = test_monitor(30_000);
        monitor.start();
        monitor.ingest(qdisc(0, QdiscEventKind::Add, "eth0", "netem"));
        monitor.stop();

        let completed = &sink.of_type(SESSION_COMPLETED)[0];
        assert_eq!(int(completed, "convergence_time_ms"), 0);
        assert_eq!(int(completed, "route_events_count"), 0);
    }

    #[test]
    fn non_netem_qdisc_never_triggers() {
        let (monitor, sink) = test_monitor(3000);
        monitor.start();

        monitor.ingest(qdisc(0, QdiscEventKind::Add, "eth0", "fq_codel"));
        monitor.ingest(qdisc(5, QdiscEventKind::Change, "eth0", "htb"));

        assert!(!monitor.is_monitoring());
        assert_eq!(sink.event_types(), [MONITORING_STARTED]);
    }

    #[test]
    fn non_netem_qdisc_is_dropped_while_monitoring() {
        let (monitor, sink) = test_monitor(3000);
        monitor.start();

        monitor.ingest(route(0, RouteEventKind::Add, "eth0", "10.0.0.0/24"));
        monitor.ingest(qdisc(10, QdiscEventKind::Add, "eth0", "fq_codel"));

        // The qdisc event left no trace and did not touch the session.
        assert_eq!(sink.of_type(ROUTE_EVENT).len(), 1);
        assert_eq!(sink.of_type(NETEM_DETECTED).len(), 0);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (monitor, sink) = test_monitor(3000);
        monitor.start();
        monitor.start();
        assert_eq!(sink.of_type(MONITORING_STARTED).len(), 1);

        monitor.stop();
        monitor.stop();
        assert_eq!(sink.of_type(MONITORING_COMPLETED).len(), 1);
    }

    #[test]
    fn stopping_a_never_started_monitor_emits_nothing() {
        let (monitor, sink) = test_monitor(3000);
        monitor.stop();
        assert!(sink.event_types().is_empty());
    }

    #[test]
    fn session_ids_increase_across_sessions() {
        let (monitor, sink) = test_monitor(1000);
        monitor.start();

        monitor.ingest(route(0, RouteEventKind::Add, "eth0", "10.0.0.0/24"));
        monitor.poll_convergence(1000);
        monitor.ingest(route(5000, RouteEventKind::Del, "eth1", "10.0.1.0/24"));
        monitor.poll_convergence(6000);

        let started = sink.of_type(SESSION_STARTED);
        assert_eq!(started.len(), 2);
        assert_eq!(int(&started[0], "session_id"), 1);
        assert_eq!(int(&started[1], "session_id"), 2);
        assert_eq!(monitor.completed_count(), 2);

        // session_started precedes its route events, which precede the
        // matching session_completed.
        let types = sink.event_types();
        assert_eq!(
            types,
            [
                MONITORING_STARTED,
                SESSION_STARTED,
                ROUTE_EVENT,
                SESSION_COMPLETED,
                SESSION_STARTED,
                ROUTE_EVENT,
                SESSION_COMPLETED,
            ]
        );
    }

    #[test]
    fn monitor_id_is_shared_by_first_and_last_record() {
        let (monitor, sink) = test_monitor(1000);
        monitor.start();
        monitor.stop();

        let records = sink.records.lock().unwrap();
        let first = text(records.first().unwrap(), "monitor_id").to_owned();
        let last = text(records.last().unwrap(), "monitor_id").to_owned();
        assert_eq!(first, last);
        assert_eq!(records.first().unwrap().event_type(), MONITORING_STARTED);
        assert_eq!(records.last().unwrap().event_type(), MONITORING_COMPLETED);
    }

    #[test]
    fn events_after_stop_are_ignored() {
        let (monitor, sink) = test_monitor(1000);
        monitor.start();
        monitor.stop();

        monitor.ingest(route(0, RouteEventKind::Add, "eth0", "10.0.0.0/24"));
        assert_eq!(sink.of_type(SESSION_STARTED).len(), 0);
    }
}
