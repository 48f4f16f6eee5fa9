use super::profile::{AdjustReason, ZoneOffsets};
use chrono::{DateTime, FixedOffset};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    Tick,
    Changed,
    TimezoneChanged,
    DstChanged,
}

impl ClockEvent {
    pub fn adjust_reason(self) -> AdjustReason {
        match self {
            Self::Tick => AdjustReason::NONE,
            Self::Changed => AdjustReason::MANUAL,
            Self::TimezoneChanged => AdjustReason::TIMEZONE,
            Self::DstChanged => AdjustReason::DST,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    wall: DateTime<FixedOffset>,
    offsets: ZoneOffsets,
    instant: Instant,
}

/// Classifies periodic wall clock samples.
///
/// The wall clock is compared against the monotonic clock: when the two
/// drift apart by more than the tolerance, the time has been set. A change
/// of the standard zone offset is a time zone change, a change of the DST
/// part alone is a daylight saving transition.
///
/// `Instant` does not advance while the system is suspended, so the first
/// sample after a resume is reported as [`ClockEvent::Changed`] even if
/// nobody set the clock. Subscribers then get a correct time flagged as a
/// manual adjustment.
#[derive(Debug)]
pub struct ClockWatcher {
    tolerance: Duration,
    last: Option<Sample>,
}

impl ClockWatcher {
    pub fn new(tolerance: Duration) -> Self {
        Self { tolerance, last: None }
    }

    pub fn observe(&mut self, wall: DateTime<FixedOffset>, offsets: ZoneOffsets, instant: Instant) -> ClockEvent {
        let sample = Sample { wall, offsets, instant };
        let Some(last) = self.last.replace(sample) else {
            return ClockEvent::Tick;
        };

        if offsets.zone != last.offsets.zone {
            return ClockEvent::TimezoneChanged;
        }
        if offsets.dst != last.offsets.dst {
            return ClockEvent::DstChanged;
        }

        let expected = instant.saturating_duration_since(last.instant).as_millis() as i64;
        let elapsed = (wall - last.wall).num_milliseconds();
        if (elapsed - expected).abs() > self.tolerance.as_millis() as i64 {
            ClockEvent::Changed
        } else {
            ClockEvent::Tick
        }
    }
}
