//! Rate counter implementation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Length of one counting window.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Source of monotonic time for the counter.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// Move the clock to an arbitrary instant, including backwards.
    pub fn set(&self, instant: Instant) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = instant;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Conditions under which the counter cannot tell which window it is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CounterError {
    #[error("clock reading precedes the counter epoch")]
    ClockRegression,

    #[error("window index overflowed")]
    WindowOverflow,
}

/// Fixed-window counter of admitted requests.
///
/// The window index (high 32 bits) and the admitted count (low 32 bits)
/// share one atomic word, so rolling into a new window and counting a
/// request happen in the same compare-and-swap.
pub struct RateCounter {
    state: AtomicU64,
    epoch: Instant,
    clock: Arc<dyn Clock>,
}

fn pack(window: u32, count: u32) -> u64 {
    (u64::from(window) << 32) | u64::from(count)
}

fn unpack(state: u64) -> (u32, u32) {
    ((state >> 32) as u32, state as u32)
}

impl RateCounter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        Self {
            state: AtomicU64::new(pack(0, 0)),
            epoch,
            clock,
        }
    }

    /// Count one request against `limit` for the current window.
    ///
    /// Returns `Ok(true)` if the request fits, `Ok(false)` if the window is
    /// already at capacity. A limit of 0 is always at capacity.
    pub fn try_acquire(&self, limit: u32) -> Result<bool, CounterError> {
        if limit == 0 {
            return Ok(false);
        }
        let window = self.current_window()?;

        let result = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                let (stored, count) = unpack(state);
                if window > stored {
                    return Some(pack(window, 1));
                }
                // A concurrent caller may already have rolled past our reading;
                // count against whichever window is stored.
                (count < limit).then(|| pack(stored, count + 1))
            });

        Ok(result.is_ok())
    }

    /// Requests admitted so far in the current window.
    pub fn current_count(&self) -> u32 {
        let (stored, count) = unpack(self.state.load(Ordering::Acquire));
        match self.current_window() {
            Ok(window) if window == stored => count,
            _ => 0,
        }
    }

    /// Time left until the current window rolls over.
    pub fn duration_until_reset(&self) -> Duration {
        let elapsed = self.clock.now().saturating_duration_since(self.epoch);
        let into_window = Duration::from_nanos((elapsed.as_nanos() % WINDOW.as_nanos()) as u64);
        WINDOW - into_window
    }

    fn current_window(&self) -> Result<u32, CounterError> {
        let elapsed = self
            .clock
            .now()
            .checked_duration_since(self.epoch)
            .ok_or(CounterError::ClockRegression)?;
        u32::try_from(elapsed.as_nanos() / WINDOW.as_nanos()).map_err(|_| CounterError::WindowOverflow)
    }
}

impl Default for RateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RateCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (window, count) = unpack(self.state.load(Ordering::Relaxed));
        f.debug_struct("RateCounter")
            .field("window", &window)
            .field("count", &count)
            .finish()
    }
}
