//! Timestamp types for Arbor.
//!
//! Value history is keyed by nanosecond timestamps. A [`MonotonicClock`]
//! hands out strictly increasing values per store even when the wall clock
//! stalls or steps backwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A point in time as nanoseconds since the Unix epoch.
///
/// The zero timestamp doubles as "never" for expirations.
///
/// # Example
///
/// ```rust
/// use arbor_common::types::Timestamp;
///
/// let ts = Timestamp::now();
/// assert!(ts.as_nanos() > 0);
/// assert!(Timestamp::ZERO.is_zero());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Zero timestamp (epoch). Means "never" when used as an expiration.
    pub const ZERO: Self = Self(0);

    /// Maximum timestamp value.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a timestamp from nanoseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a timestamp from the current system time.
    #[must_use]
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }

    /// Returns the timestamp as nanoseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the timestamp as microseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.0 / 1_000
    }

    /// Returns true for the zero timestamp.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Adds a duration to this timestamp.
    #[inline]
    #[must_use]
    pub fn add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_nanos(duration)))
    }

    /// Subtracts a duration from this timestamp.
    #[inline]
    #[must_use]
    pub fn sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_nanos(duration)))
    }

    /// Returns the timestamp as big-endian bytes, which sort in time order.
    #[inline]
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Creates a timestamp from big-endian bytes.
    #[inline]
    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Decodes a timestamp from a byte slice holding exactly 8 big-endian
    /// bytes.
    #[must_use]
    pub fn from_be_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 8] = bytes.try_into().ok()?;
        Some(Self::from_be_bytes(array))
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ns)", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Format as ISO 8601 if reasonable
        if self.0 > 0 {
            let secs = i64::try_from(self.0 / 1_000_000_000).unwrap_or(i64::MAX);
            let subsec_nanos = (self.0 % 1_000_000_000) as u32;
            if let Some(dt) = chrono::DateTime::from_timestamp(secs, subsec_nanos) {
                return write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.9fZ"));
            }
        }
        write!(f, "{}ns", self.0)
    }
}

impl From<u64> for Timestamp {
    #[inline]
    fn from(nanos: u64) -> Self {
        Self::from_nanos(nanos)
    }
}

impl From<Timestamp> for u64 {
    #[inline]
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

/// Strictly increasing timestamp source.
///
/// Each tick returns `max(wall clock, last + 1)`, so two ticks from the same
/// clock never collide, even across threads.
///
/// # Example
///
/// ```rust
/// use arbor_common::types::MonotonicClock;
///
/// let clock = MonotonicClock::new();
/// let a = clock.tick();
/// let b = clock.tick();
/// assert!(b > a);
/// ```
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    /// Creates a new clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Returns a timestamp strictly greater than every previous tick.
    pub fn tick(&self) -> Timestamp {
        let physical = Timestamp::now().as_nanos();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = physical.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Timestamp(next),
                Err(current) => last = current,
            }
        }
    }

    /// Makes sure later ticks are greater than `ts`.
    ///
    /// Used when history entries with explicit timestamps are written or
    /// loaded from a snapshot.
    pub fn observe(&self, ts: Timestamp) {
        self.last.fetch_max(ts.as_nanos(), Ordering::AcqRel);
    }

    /// Returns the last timestamp handed out or observed.
    #[must_use]
    pub fn last(&self) -> Timestamp {
        Timestamp(self.last.load(Ordering::Acquire))
    }
}
