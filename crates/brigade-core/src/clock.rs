//! Business clock with an optional simulated offset.
//!
//! The [`ClockSource`] is the single source of "now" for the engine. It
//! reads real local time from a [`WallClock`] and adds an optional offset
//! used to rehearse a whole service day in minutes. The offset is shared
//! between sessions through the sync bus `clock:offset` slot.
//!
//! # Design Principles
//!
//! - Offsets are non-negative and bounded. Anything else is a clock
//!   anomaly: the offset is cleared and real time is used.
//! - All arithmetic is checked. An offset that would overflow the date
//!   range is ignored rather than wrapped.

use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDateTime, TimeDelta};

use crate::config::ClockConfig;

/// Clock anomalies. Every variant is logged by the caller and handled by
/// falling back to the real clock.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// A negative offset was requested.
    #[error("clock anomaly: negative offset of {secs}s")]
    NegativeOffset {
        /// Requested offset in seconds.
        secs: i64,
    },

    /// The requested offset exceeds the configured maximum.
    #[error("clock anomaly: offset of {secs}s exceeds maximum of {max_secs}s")]
    OffsetTooLarge {
        /// Requested offset in seconds.
        secs: i64,
        /// Configured maximum in seconds.
        max_secs: i64,
    },

    /// Observed time moved backwards.
    #[error("clock anomaly: time moved backwards from {previous} to {now}")]
    WentBackwards {
        /// The last instant the scheduler observed.
        previous: NaiveDateTime,
        /// The instant that was just read.
        now: NaiveDateTime,
    },
}

/// Source of real local time.
pub trait WallClock: Send + Sync {
    /// The current local wall-clock instant.
    fn now(&self) -> NaiveDateTime;
}

/// The operating system's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A wall clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    /// Create a manual clock reading `start`.
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Jump to an instant.
    pub fn set(&self, instant: NaiveDateTime) {
        if let Ok(mut now) = self.now.lock() {
            *now = instant;
        }
    }

    /// Move forward (or backward) by a delta. Overflow leaves time unchanged.
    pub fn advance(&self, delta: TimeDelta) {
        if let Ok(mut now) = self.now.lock() {
            if let Some(next) = now.checked_add_signed(delta) {
                *now = next;
            }
        }
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        self.now.lock().map_or(NaiveDateTime::MIN, |now| *now)
    }
}

/// Real clock plus an optional simulated offset.
pub struct ClockSource {
    /// Underlying wall clock.
    wall: Arc<dyn WallClock>,
    /// Active offset, `None` for real time.
    offset: Option<TimeDelta>,
    /// Largest offset accepted.
    max_offset: TimeDelta,
}

impl ClockSource {
    /// Create a clock from a wall clock and configuration.
    pub fn new(wall: Arc<dyn WallClock>, config: &ClockConfig) -> Self {
        let max_offset =
            TimeDelta::try_hours(i64::from(config.max_offset_hours)).unwrap_or(TimeDelta::MAX);
        Self {
            wall,
            offset: None,
            max_offset,
        }
    }

    /// The system clock with default limits.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock), &ClockConfig::default())
    }

    /// Current business instant (real time plus offset).
    pub fn now(&self) -> NaiveDateTime {
        let real = self.wall.now();
        self.offset
            .and_then(|offset| real.checked_add_signed(offset))
            .unwrap_or(real)
    }

    /// Current real instant, ignoring any offset.
    pub fn real_now(&self) -> NaiveDateTime {
        self.wall.now()
    }

    /// Install a simulated offset.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::NegativeOffset`] or
    /// [`ClockError::OffsetTooLarge`]; in both cases the offset is cleared
    /// so the clock falls back to real time.
    pub fn set_offset(&mut self, delta: TimeDelta) -> Result<(), ClockError> {
        if delta < TimeDelta::zero() {
            self.offset = None;
            return Err(ClockError::NegativeOffset {
                secs: delta.num_seconds(),
            });
        }
        if delta > self.max_offset {
            self.offset = None;
            return Err(ClockError::OffsetTooLarge {
                secs: delta.num_seconds(),
                max_secs: self.max_offset.num_seconds(),
            });
        }
        self.offset = if delta.is_zero() { None } else { Some(delta) };
        Ok(())
    }

    /// Return to real time.
    pub const fn clear_offset(&mut self) {
        self.offset = None;
    }

    /// The active offset.
    pub const fn offset(&self) -> Option<TimeDelta> {
        self.offset
    }

    /// The active offset in whole seconds, as carried on the sync bus.
    pub fn offset_secs(&self) -> Option<i64> {
        self.offset.map(|offset| offset.num_seconds())
    }
}

impl core::fmt::Debug for ClockSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClockSource")
            .field("offset", &self.offset)
            .field("max_offset", &self.max_offset)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 15)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn clock_at(h: u32, m: u32) -> (ManualClock, ClockSource) {
        let wall = ManualClock::new(at(h, m));
        let source = ClockSource::new(Arc::new(wall.clone()), &ClockConfig::default());
        (wall, source)
    }

    #[test]
    fn offset_shifts_now() {
        let (_wall, mut clock) = clock_at(10, 5);
        clock.set_offset(TimeDelta::try_minutes(690).unwrap()).unwrap();
        assert_eq!(clock.now(), at(21, 35));
        assert_eq!(clock.real_now(), at(10, 5));
        assert_eq!(clock.offset_secs(), Some(690 * 60));
    }

    #[test]
    fn clearing_offset_restores_real_time() {
        let (wall, mut clock) = clock_at(10, 5);
        clock.set_offset(TimeDelta::try_hours(2).unwrap()).unwrap();
        clock.clear_offset();
        wall.advance(TimeDelta::try_minutes(1).unwrap());
        assert_eq!(clock.now(), at(10, 6));
        assert_eq!(clock.offset(), None);
    }

    #[test]
    fn negative_offset_is_an_anomaly_and_falls_back() {
        let (_wall, mut clock) = clock_at(10, 5);
        clock.set_offset(TimeDelta::try_hours(1).unwrap()).unwrap();
        let err = clock.set_offset(TimeDelta::try_hours(-1).unwrap());
        assert_eq!(err, Err(ClockError::NegativeOffset { secs: -3600 }));
        assert_eq!(clock.now(), at(10, 5));
    }

    #[test]
    fn oversized_offset_is_rejected() {
        let (_wall, mut clock) = clock_at(10, 5);
        let too_far = TimeDelta::try_days(400).unwrap();
        assert!(matches!(
            clock.set_offset(too_far),
            Err(ClockError::OffsetTooLarge { .. })
        ));
        assert_eq!(clock.offset(), None);
    }

    #[test]
    fn zero_offset_means_real_time() {
        let (_wall, mut clock) = clock_at(10, 5);
        clock.set_offset(TimeDelta::zero()).unwrap();
        assert_eq!(clock.offset(), None);
    }
}
