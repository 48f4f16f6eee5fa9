//! Byte layouts of the Current Time Service characteristics.
//!
//! See the Bluetooth SIG Current Time Service specification and
//! GATT Specification Supplement, sections "Current Time" and
//! "Local Time Information".

use crate::utils::coded_enum;
use chrono::{DateTime, Datelike, NaiveDate, Offset, TimeZone, Timelike};
use std::ops::{BitOr, BitOrAssign};

/// Reason of the last clock adjustment, carried in the last
/// byte of the Current Time characteristic. Flags may be combined.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdjustReason(u8);

impl AdjustReason {
    pub const NONE: Self = Self(0x0);
    pub const MANUAL: Self = Self(0x1);
    pub const EXTERNAL: Self = Self(0x2);
    pub const TIMEZONE: Self = Self(0x4);
    pub const DST: Self = Self(0x8);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AdjustReason {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AdjustReason {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

const FIFTEEN_MINUTE_SECS: i32 = 15 * 60;
const HALF_HOUR_SECS: i32 = 30 * 60;

const DAY_UNKNOWN: u8 = 0;
const DST_UNKNOWN: u8 = 0xFF;

coded_enum! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum DayOfWeek::<u32> {
        Monday = 1 => 1,
        Tuesday = 2 => 2,
        Wednesday = 3 => 3,
        Thursday = 4 => 4,
        Friday = 5 => 5,
        Saturday = 6 => 6,
        Sunday = 7 => 7
    }
}

coded_enum! {
    /// DST offset counted in 30 minute intervals
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum DstOffset::<i32> {
        Standard = 0 => 0x00,
        Half = 1 => 0x02,
        Single = 2 => 0x04,
        Double = 4 => 0x08
    }
}

/// Bluetooth weekday code for a Monday-based day number (Monday = 1).
/// Anything out of range is reported as unknown.
pub fn weekday_code(number_from_monday: u32) -> u8 {
    DayOfWeek::try_from(number_from_monday).map_or(DAY_UNKNOWN, DayOfWeek::code)
}

/// Bluetooth DST offset code for an offset in 30 minute intervals.
pub fn dst_offset_code(half_hours: i32) -> u8 {
    DstOffset::try_from(half_hours).map_or(DST_UNKNOWN, DstOffset::code)
}

/// Current Time characteristic value for the given wall clock reading.
pub fn exact_time<Tz: TimeZone>(time: &DateTime<Tz>, adjust_reason: AdjustReason) -> [u8; 10] {
    let year = (time.year() as u16).to_le_bytes();
    [
        year[0],
        year[1],
        time.month() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
        weekday_code(time.weekday().number_from_monday()),
        // Fractions256, kept as milliseconds / 256 for compatibility
        (time.timestamp_subsec_millis() / 256) as u8,
        adjust_reason.bits(),
    ]
}

/// Standard time zone offset and DST offset of a timestamp, in seconds
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ZoneOffsets {
    pub zone: i32,
    pub dst: i32,
}

impl ZoneOffsets {
    /// The zone offset is the smallest UTC offset that the timestamp's time zone
    /// uses on January 1st, July 1st or at the timestamp itself. Whatever is
    /// left of the current offset is daylight saving.
    pub fn of<Tz: TimeZone>(time: &DateTime<Tz>) -> Self {
        let total = time.offset().fix().local_minus_utc();
        let timezone = time.timezone();
        let zone = [1, 7]
            .into_iter()
            .filter_map(|month| NaiveDate::from_ymd_opt(time.year(), month, 1)?.and_hms_opt(0, 0, 0))
            .map(|midnight| timezone.offset_from_utc_datetime(&midnight).fix().local_minus_utc())
            .fold(total, i32::min);
        Self { zone, dst: total - zone }
    }
}

/// Local Time Information characteristic value for the given offsets.
pub fn local_time_info(offsets: ZoneOffsets) -> [u8; 2] {
    [
        (offsets.zone / FIFTEEN_MINUTE_SECS) as i8 as u8,
        dst_offset_code(offsets.dst / HALF_HOUR_SECS),
    ]
}

pub fn local_time_info_at<Tz: TimeZone>(time: &DateTime<Tz>) -> [u8; 2] {
    local_time_info(ZoneOffsets::of(time))
}
