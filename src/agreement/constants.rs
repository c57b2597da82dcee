use tokio::time::Duration;

// Receive loop settings

/// Bounded wait of one receive in an open round
pub const RECEIVE_TIMEOUT: Duration = Duration::from_millis(5);

// Diagnostics

/// Blocking time after which a round is reported as stalled
pub const STALL_REPORT_AFTER: Duration = Duration::from_secs(10);
/// Interval between two stall reports
pub const STALL_REPORT_EVERY: Duration = Duration::from_secs(60);
