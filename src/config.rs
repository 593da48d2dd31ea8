/// Runtime tuning for the scheduler, connectivity monitor and sensor warm-up.
///
/// Defaults reproduce the timings the device has always used: a 500 ms tick,
/// a 10 s display refresh, an hourly reconnect check and a ~30 s association
/// window. Everything is plain data so tests can shrink the timings.

use crate::sensor::{DEFAULT_MAX_RESYNC_BYTES, DEFAULT_TIMEOUT_MS};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Pause between scheduler ticks (ms)
    pub tick_period_ms: u32,
    /// Minimum time between display refreshes (ms)
    pub refresh_interval_ms: u32,
    /// Time between status telemetry lines (ms)
    pub status_interval_ms: u32,
    /// Ticks between reconnect checks (7200 × 500 ms ≈ 1 h)
    pub reconnect_check_ticks: u32,
    /// Association status polls before giving up
    pub association_attempts: u32,
    /// Pause between association status polls (ms)
    pub association_poll_ms: u32,
    /// Whether an Offline device keeps running the reconnect check
    pub retry_when_offline: bool,
    /// Read window for one sensor response (ms)
    pub sensor_timeout_ms: u32,
    /// Cap on bytes discarded while resynchronizing
    pub max_resync_bytes: usize,
    /// Pause after boot before the first warm-up poll (ms)
    pub warmup_settle_ms: u32,
    /// Warm-up polls before painting whatever the sensor reports
    pub warmup_attempts: u32,
    /// Pause between warm-up polls (ms)
    pub warmup_retry_ms: u32,
    /// Value the sensor reports while still heating up. `None` accepts any valid reading.
    pub warmup_reject_ppm: Option<u16>,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            tick_period_ms: 500,
            refresh_interval_ms: 10_000,
            status_interval_ms: 30_000,
            reconnect_check_ticks: 7200,
            association_attempts: 60,
            association_poll_ms: 500,
            retry_when_offline: true,
            sensor_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_resync_bytes: DEFAULT_MAX_RESYNC_BYTES,
            warmup_settle_ms: 30_000,
            warmup_attempts: 120,
            warmup_retry_ms: 1000,
            warmup_reject_ppm: Some(500),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
