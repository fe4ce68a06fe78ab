use std::time::Duration;

pub const LOCAL_WS_URL: &str = "ws://localhost:3005/ws";
pub const HOSTED_WS_URL: &str = "wss://watchparty.onrender.com/ws";
pub const DEFAULT_API_URL: &str = "https://watchparty.onrender.com/api";

/// Current application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often a playing client refreshes the room's authoritative position
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Allowed gap between the local player and the server position before a corrective seek
pub const DRIFT_TOLERANCE_SECS: f64 = 2.0;

/// Consecutive failed connection attempts before giving up
pub const RECONNECT_BUDGET: u32 = 8;
pub const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
pub const BACKOFF_MAX: Duration = Duration::from_secs(30);
pub const BACKOFF_JITTER: f64 = 0.2;

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(12);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const RESYNC_TIMEOUT: Duration = Duration::from_secs(10);
pub const ECHO_TIMEOUT: Duration = Duration::from_secs(3);
pub const LEAVE_TIMEOUT: Duration = Duration::from_secs(1);
