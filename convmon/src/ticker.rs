//! Quiet-period ticker: periodically asks the engine whether the current
//! session has gone quiet for long enough.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use convmon_netlink::unix_millis;

use crate::monitor::Monitor;

/// How often the convergence rule is evaluated.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn the ticker task. The check itself is idempotent, so a spurious or
/// delayed tick is harmless; cancellation takes effect at the next wait.
pub fn spawn(monitor: Arc<Monitor>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    // Read the clock before the engine takes its lock.
                    let now_ms = unix_millis();
                    monitor.poll_convergence(now_ms);
                }
            }
        }

        debug!("quiet-period ticker stopped");
    })
}
