//! Outbound write admission with high/low byte watermarks.
//!
//! The frame transport buffers outbound frames; when its buffer climbs past
//! the high watermark the connection stops being writable, and it becomes
//! writable again only after draining below the low watermark. Senders treat
//! an unwritable connection as a deferred, not failed, send: they wait for
//! admission (bounded) before issuing further writes.
//!
//! Defaults follow the transport configuration this core is designed
//! against: low 3 MB, high 5 MB per connection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Result, StreamwireError};

/// Default low watermark: writes resume once pending bytes drain below this.
pub const DEFAULT_LOW_WATERMARK: usize = 3 * 1024 * 1024;

/// Default high watermark: writes defer once pending bytes exceed this.
pub const DEFAULT_HIGH_WATERMARK: usize = 5 * 1024 * 1024;

/// Default bound on how long a sender waits for admission.
pub const DEFAULT_ADMISSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between admission re-checks.
const CHECK_INTERVAL: Duration = Duration::from_micros(100);

/// Watermark configuration for one connection's outbound path.
#[derive(Debug, Clone)]
pub struct WatermarkConfig {
    /// Pending bytes below which a saturated connection becomes writable.
    pub low: usize,
    /// Pending bytes above which the connection stops being writable.
    pub high: usize,
    /// Bound on the admission wait.
    pub admission_timeout: Duration,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            low: DEFAULT_LOW_WATERMARK,
            high: DEFAULT_HIGH_WATERMARK,
            admission_timeout: DEFAULT_ADMISSION_TIMEOUT,
        }
    }
}

struct Shared {
    pending: AtomicUsize,
    saturated: AtomicBool,
    low: usize,
    high: usize,
}

/// Gauge of un-flushed outbound bytes with high/low hysteresis.
///
/// Cheaply cloneable; clones share the same counter. The sending side calls
/// [`record`](WriteWatermark::record) when a frame is queued, the transport
/// calls [`release`](WriteWatermark::release) once bytes are flushed to the
/// wire.
#[derive(Clone)]
pub struct WriteWatermark {
    shared: Arc<Shared>,
    admission_timeout: Duration,
}

impl WriteWatermark {
    /// Create a gauge from a configuration.
    pub fn new(config: WatermarkConfig) -> Self {
        debug_assert!(config.low <= config.high);
        Self {
            shared: Arc::new(Shared {
                pending: AtomicUsize::new(0),
                saturated: AtomicBool::new(false),
                low: config.low,
                high: config.high,
            }),
            admission_timeout: config.admission_timeout,
        }
    }

    /// Account `bytes` as queued but not yet flushed.
    pub fn record(&self, bytes: usize) {
        let prev = self.shared.pending.fetch_add(bytes, Ordering::AcqRel);
        if prev + bytes >= self.shared.high {
            self.shared.saturated.store(true, Ordering::Release);
        }
    }

    /// Account `bytes` as flushed to the wire.
    pub fn release(&self, bytes: usize) {
        let prev = self.shared.pending.fetch_sub(bytes, Ordering::AcqRel);
        if prev.saturating_sub(bytes) <= self.shared.low {
            self.shared.saturated.store(false, Ordering::Release);
        }
    }

    /// True when the connection accepts further writes.
    #[inline]
    pub fn is_writable(&self) -> bool {
        !self.shared.saturated.load(Ordering::Acquire)
    }

    /// Current un-flushed byte count.
    #[inline]
    pub fn pending_bytes(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Wait until the connection is writable.
    ///
    /// Returns `Err(WatermarkTimeout)` if admission does not clear within
    /// the configured bound.
    pub async fn admit(&self) -> Result<()> {
        if self.is_writable() {
            return Ok(());
        }

        let start = Instant::now();
        loop {
            if self.is_writable() {
                return Ok(());
            }
            if start.elapsed() > self.admission_timeout {
                return Err(StreamwireError::WatermarkTimeout);
            }
            tokio::time::sleep(CHECK_INTERVAL).await;
        }
    }
}

impl Default for WriteWatermark {
    fn default() -> Self {
        Self::new(WatermarkConfig::default())
    }
}
