use std::time::Duration;

/// What to connect to. Fixed for the lifetime of one `ConnectionManager`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub port_identifier: String,
    pub baud_rate: u32,
    pub auto_reconnect: bool,
}

impl ConnectionConfig {
    pub fn new(port_identifier: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_identifier: port_identifier.into(),
            baud_rate,
            auto_reconnect: true,
        }
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }
}

pub const DEFAULT_BAUD: u32 = 115_200;
pub const DEFAULT_CAPACITY: usize = 500;
/// 10,000 events is ~10 s of lines at 1 kHz without a drain.
pub const DEFAULT_EVENT_CAPACITY: usize = 10_000;

/// Delays used by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Bound on a single read from the port.
    pub read_timeout: Duration,
    /// Settle time after open; many boards reset on DTR.
    pub warm_up: Duration,
    /// Wait before retrying a failed open.
    pub open_backoff: Duration,
    /// Wait before reopening after a read/write failure.
    pub io_backoff: Duration,
    /// Wait after an unexpected error with the handle still open.
    pub unexpected_backoff: Duration,
    /// Yield when a read produced no complete line.
    pub idle_yield: Duration,
    /// How long `close()` waits for the worker to finish.
    pub close_wait: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(100),
            warm_up: Duration::from_millis(200),
            open_backoff: Duration::from_millis(1000),
            io_backoff: Duration::from_millis(500),
            unexpected_backoff: Duration::from_millis(200),
            idle_yield: Duration::from_millis(20),
            close_wait: Duration::from_millis(1000),
        }
    }
}

impl Timing {
    /// Every delay scaled down to a few milliseconds, for fakes and tests.
    pub fn fast() -> Self {
        Self {
            read_timeout: Duration::from_millis(5),
            warm_up: Duration::from_millis(1),
            open_backoff: Duration::from_millis(10),
            io_backoff: Duration::from_millis(5),
            unexpected_backoff: Duration::from_millis(2),
            idle_yield: Duration::from_millis(1),
            close_wait: Duration::from_millis(1000),
        }
    }
}
