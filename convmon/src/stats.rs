//! Shutdown-time aggregation over completed sessions.

use std::collections::BTreeSet;

use crate::record::Record;
use crate::session::Session;

/// Sessions converging faster than this count as "fast".
pub const FAST_THRESHOLD_MS: i64 = 100;
/// Sessions converging faster than this (but not fast) count as "medium";
/// the rest are "slow".
pub const SLOW_THRESHOLD_MS: i64 = 1000;

/// Aggregated statistics for the `monitoring_completed` record.
///
/// Optional fields stay `None` when there is no data to compute them from
/// and are then omitted from the record rather than written as nulls.
#[derive(Debug, Default)]
pub struct Summary {
    pub fast_convergence_count: u64,
    pub medium_convergence_count: u64,
    pub slow_convergence_count: u64,

    pub fastest_convergence_ms: Option<i64>,
    pub slowest_convergence_ms: Option<i64>,
    pub avg_convergence_time_ms: Option<f64>,
    pub convergence_std_deviation_ms: Option<f64>,

    pub min_route_events_per_session: Option<u64>,
    pub max_route_events_per_session: Option<u64>,
    pub avg_route_events_per_session: Option<f64>,

    pub shortest_session_ms: Option<i64>,
    pub longest_session_ms: Option<i64>,
    pub avg_session_duration_ms: Option<f64>,

    /// Interfaces referenced by any trigger or event, sorted ascending.
    pub unique_interfaces: Vec<String>,
}

pub fn summarize(sessions: &[Session]) -> Summary {
    let mut summary = Summary::default();

    let convergence_times: Vec<i64> =
        sessions.iter().filter_map(|s| s.convergence_time_ms).collect();
    let event_counts: Vec<u64> = sessions.iter().map(|s| s.event_count() as u64).collect();
    let durations: Vec<i64> = sessions.iter().map(Session::completed_duration_ms).collect();

    for &t in &convergence_times {
        if t < FAST_THRESHOLD_MS {
            summary.fast_convergence_count += 1;
        } else if t < SLOW_THRESHOLD_MS {
            summary.medium_convergence_count += 1;
        } else {
            summary.slow_convergence_count += 1;
        }
    }

    summary.fastest_convergence_ms = convergence_times.iter().min().copied();
    summary.slowest_convergence_ms = convergence_times.iter().max().copied();
    summary.avg_convergence_time_ms = mean(&convergence_times);
    summary.convergence_std_deviation_ms = sample_std_deviation(&convergence_times);

    summary.min_route_events_per_session = event_counts.iter().min().copied();
    summary.max_route_events_per_session = event_counts.iter().max().copied();
    summary.avg_route_events_per_session =
        mean(&event_counts.iter().map(|&c| c as i64).collect::<Vec<_>>());

    summary.shortest_session_ms = durations.iter().min().copied();
    summary.longest_session_ms = durations.iter().max().copied();
    summary.avg_session_duration_ms = mean(&durations);

    let mut interfaces = BTreeSet::new();
    for session in sessions {
        if let Some(iface) = session.trigger_info.get("interface") {
            interfaces.insert(iface.clone());
        }
        for event in &session.events {
            if let Some(iface) = event.info.get("interface") {
                interfaces.insert(iface.clone());
            }
        }
    }
    interfaces.remove(convmon_netlink::event::NA);
    summary.unique_interfaces = interfaces.into_iter().collect();

    summary
}

impl Summary {
    /// Merge the summary into the terminal record, omitting empty fields.
    pub fn apply(&self, record: &mut Record) {
        record.set("fast_convergence_count", self.fast_convergence_count);
        record.set("medium_convergence_count", self.medium_convergence_count);
        record.set("slow_convergence_count", self.slow_convergence_count);

        if let Some(v) = self.fastest_convergence_ms {
            record.set("fastest_convergence_ms", v);
        }
        if let Some(v) = self.slowest_convergence_ms {
            record.set("slowest_convergence_ms", v);
        }
        if let Some(v) = self.avg_convergence_time_ms {
            record.set("avg_convergence_time_ms", v);
        }
        if let Some(v) = self.convergence_std_deviation_ms {
            record.set("convergence_std_deviation_ms", v);
        }

        if let Some(v) = self.min_route_events_per_session {
            record.set("min_route_events_per_session", v);
        }
        if let Some(v) = self.max_route_events_per_session {
            record.set("max_route_events_per_session", v);
        }
        if let Some(v) = self.avg_route_events_per_session {
            record.set("avg_route_events_per_session", v);
        }

        if let Some(v) = self.shortest_session_ms {
            record.set("shortest_session_ms", v);
        }
        if let Some(v) = self.longest_session_ms {
            record.set("longest_session_ms", v);
        }
        if let Some(v) = self.avg_session_duration_ms {
            record.set("avg_session_duration_ms", v);
        }

        record.set("unique_interfaces", self.unique_interfaces.clone());
        record.set("unique_interface_count", self.unique_interfaces.len() as u64);
    }
}

fn mean(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<i64>() as f64 / values.len() as f64)
}

/// Sample standard deviation; defined only for two or more values.
fn sample_std_deviation(values: &[i64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<i64>() as f64 / values.len() as f64;
    let variance = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / (values.len() - 1) as f64;
    Some(variance.sqrt())
}
