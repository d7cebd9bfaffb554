//! Request timing.
//!
//! Elapsed time comes from the monotonic clock when the platform has one.
//! Without it the wall clock is used (and a warning is logged once); if even
//! the wall clock is unusable the logger cannot be built.

use clogger_core::{ClogError, Result};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

const USEC_PER_SEC: i64 = 1_000_000;

/// Seconds + microseconds, `usec` always in `0..1_000_000`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub sec: i64,
    pub usec: i64,
}

impl Timestamp {
    pub fn new(sec: i64, usec: i64) -> Self {
        Self {
            sec: sec + usec.div_euclid(USEC_PER_SEC),
            usec: usec.rem_euclid(USEC_PER_SEC),
        }
    }

    /// `self - earlier`, borrowing from the seconds when the microsecond
    /// part would go negative. Clamped at zero if the clock went backwards.
    pub fn since(self, earlier: Timestamp) -> Timestamp {
        let mut sec = self.sec - earlier.sec;
        let mut usec = self.usec - earlier.usec;
        if usec < 0 {
            sec -= 1;
            usec += USEC_PER_SEC;
        }
        if sec < 0 {
            return Timestamp::default();
        }
        Timestamp { sec, usec }
    }

    fn from_system(t: SystemTime) -> Option<Self> {
        let d = t.duration_since(UNIX_EPOCH).ok()?;
        Some(Self {
            sec: i64::try_from(d.as_secs()).ok()?,
            usec: i64::from(d.subsec_micros()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    Monotonic,
    Wall,
}

/// The clock used for request start and elapsed-time directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    source: ClockSource,
}

static DETECTED: OnceLock<Option<ClockSource>> = OnceLock::new();

impl Clock {
    /// Pick the best clock available. The probe runs once per process.
    pub fn detect() -> Result<Clock> {
        let source = *DETECTED.get_or_init(|| probe(read_monotonic, read_wall));
        source
            .map(|source| Clock { source })
            .ok_or(ClogError::ClockUnavailable)
    }

    pub fn source(&self) -> ClockSource {
        self.source
    }

    #[inline]
    pub fn now(&self) -> Timestamp {
        read_source(self.source, read_monotonic, read_wall)
    }
}

/// A reading from `source` only, never another clock. A failed read is zero.
fn read_source(
    source: ClockSource,
    monotonic: impl Fn() -> Option<Timestamp>,
    wall: impl Fn() -> Option<Timestamp>,
) -> Timestamp {
    match source {
        ClockSource::Monotonic => monotonic(),
        ClockSource::Wall => wall(),
    }
    .unwrap_or_default()
}

fn probe(
    monotonic: impl Fn() -> Option<Timestamp>,
    wall: impl Fn() -> Option<Timestamp>,
) -> Option<ClockSource> {
    if monotonic().is_some() {
        return Some(ClockSource::Monotonic);
    }
    wall()?;
    warn!("monotonic clock unavailable, request times use the wall clock");
    Some(ClockSource::Wall)
}

fn read_monotonic() -> Option<Timestamp> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return None;
    }
    Some(Timestamp {
        sec: ts.tv_sec as i64,
        usec: ts.tv_nsec as i64 / 1_000,
    })
}

fn read_wall() -> Option<Timestamp> {
    Timestamp::from_system(SystemTime::now())
}

/// Wall-clock "now" for the `TimeNow` directives.
pub fn wall_now() -> Timestamp {
    read_wall().unwrap_or_default()
}

/// Everything captured at request entry.
#[derive(Debug, Clone, Copy)]
pub struct RequestStart {
    /// Reading of the logger's clock, for elapsed time.
    pub clock: Timestamp,
    /// Wall-clock entry time, for `begin:` timestamps.
    pub wall: SystemTime,
}

impl RequestStart {
    pub fn now(clock: &Clock) -> Self {
        Self {
            clock: clock.now(),
            wall: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_borrows_from_seconds() {
        let start = Timestamp::new(10, 900_000);
        let end = Timestamp::new(12, 100_000);
        assert_eq!(end.since(start), Timestamp { sec: 1, usec: 200_000 });
    }

    #[test]
    fn since_never_goes_negative() {
        let start = Timestamp::new(5, 0);
        let end = Timestamp::new(4, 999_999);
        assert_eq!(end.since(start), Timestamp::default());
    }

    #[test]
    fn new_normalizes_microseconds() {
        assert_eq!(Timestamp::new(1, 2_500_000), Timestamp { sec: 3, usec: 500_000 });
        assert_eq!(Timestamp::new(1, -1), Timestamp { sec: 0, usec: 999_999 });
    }

    #[test]
    fn probe_prefers_monotonic() {
        let got = probe(|| Some(Timestamp::default()), || None);
        assert_eq!(got, Some(ClockSource::Monotonic));
    }

    #[test]
    fn probe_falls_back_to_wall() {
        let got = probe(|| None, || Some(Timestamp::new(1, 0)));
        assert_eq!(got, Some(ClockSource::Wall));
    }

    #[test]
    fn failed_monotonic_read_never_uses_wall_time() {
        let wall = || Some(Timestamp::new(1_700_000_000, 0));
        let end = read_source(ClockSource::Monotonic, || None, wall);
        assert_eq!(end, Timestamp::default());
        assert_eq!(end.since(Timestamp::new(100, 0)), Timestamp::default());

        let end = read_source(ClockSource::Monotonic, || Some(Timestamp::new(101, 5)), wall);
        assert_eq!(end.since(Timestamp::new(100, 0)), Timestamp::new(1, 5));
        assert_eq!(read_source(ClockSource::Wall, || None, wall), Timestamp::new(1_700_000_000, 0));
    }

    #[test]
    fn probe_fails_without_any_clock() {
        assert_eq!(probe(|| None, || None), None);
    }

    #[test]
    fn detected_clock_advances() {
        let clock = Clock::detect().unwrap();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(wall_now().sec > 1_600_000_000);
    }
}
