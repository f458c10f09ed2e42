//! Runtime configuration: threshold validation, router naming and log-path
//! resolution.

use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use nix::unistd::{access, geteuid, AccessFlags, User};
use tracing::warn;

use convmon_netlink::SubscribeError;

/// Default quiet period in milliseconds.
pub const DEFAULT_THRESHOLD_MS: i64 = 3000;

/// Preferred home of the measurement log on FRR routers.
pub const DEFAULT_LOG_DIR: &str = "/var/log/frr";

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "async_route_convergence.rs.json";

/// Mode for log directories created on the way to the log file.
const LOG_DIR_MODE: u32 = 0o755;

/// Fatal errors on the way to a running monitor.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("convergence threshold must be a positive number of milliseconds, got {0}")]
    InvalidThreshold(i64),

    #[error("failed to create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Subscribe(#[from] SubscribeError),

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] io::Error),
}

/// Resolved monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// The convergence threshold: event silence this long ends a session.
    pub quiet_period_ms: i64,
    /// Identifies this router instance in every record.
    pub router_name: String,
    /// Effective user, recorded alongside every record.
    pub user: String,
    /// Where the measurement log is appended.
    pub log_path: PathBuf,
}

impl MonitorConfig {
    /// Validate and fill in defaults.
    ///
    /// An explicit log path whose parent directory cannot be created is
    /// fatal; the default directory quietly falls back to the working
    /// directory when `/var/log/frr` is unavailable.
    pub fn resolve(
        threshold_ms: i64,
        router_name: Option<String>,
        log_path: Option<PathBuf>,
    ) -> Result<Self, StartupError> {
        if threshold_ms <= 0 {
            return Err(StartupError::InvalidThreshold(threshold_ms));
        }

        let user = current_username();
        let router_name = router_name.unwrap_or_else(|| {
            format!("router_{user}_{}", convmon_netlink::unix_millis() / 1000)
        });

        let log_path = match log_path {
            Some(path) => {
                ensure_parent_dir(&path)?;
                path
            }
            None => default_log_path(),
        };

        Ok(Self { quiet_period_ms: threshold_ms, router_name, user, log_path })
    }
}

/// Name of the effective user, with an environment fallback for stripped
/// containers without a passwd database.
pub fn current_username() -> String {
    User::from_uid(geteuid())
        .ok()
        .flatten()
        .map(|user| user.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_owned())
}

fn ensure_parent_dir(path: &Path) -> Result<(), StartupError> {
    let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return Ok(());
    };
    make_dirs(dir).map_err(|source| StartupError::LogDir { path: dir.to_owned(), source })
}

fn make_dirs(dir: &Path) -> io::Result<()> {
    DirBuilder::new().recursive(true).mode(LOG_DIR_MODE).create(dir)
}

fn default_log_path() -> PathBuf {
    let dir = Path::new(DEFAULT_LOG_DIR);
    if make_dirs(dir).is_ok() && access(dir, AccessFlags::W_OK).is_ok() {
        return dir.join(DEFAULT_LOG_FILE);
    }
    warn!(dir = DEFAULT_LOG_DIR, "default log directory unavailable, using the working directory");
    PathBuf::from(DEFAULT_LOG_FILE)
}
