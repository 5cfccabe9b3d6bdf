//! Calendar time model shared by the RTC, the recorder and the wire protocol.
//!
//! [`TmElements`] mirrors the RTC's register set: a broken-down time with the
//! year stored as an offset from 1970 (0..=129), Sunday as weekday 1 and
//! January as month 1.  [`rtc_make`]/[`rtc_break`] convert to and from Unix
//! seconds and are exact inverses over the representable range.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static DAY_NAMES: [&str; 8] = ["Err", "Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
static MONTH_NAMES: [&str; 13] = [
    "Err", "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const SECS_PER_DAY: i64 = 86_400;

/// Broken-down calendar time in RTC register form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TmElements {
    pub second: u8,
    pub minute: u8,
    pub hour: u8,
    /// Day of week, 1 = Sunday .. 7 = Saturday.
    pub wday: u8,
    /// Day of month, 1-based.
    pub day: u8,
    /// Month, 1 = January.
    pub month: u8,
    /// Years since 1970 (0..=129).
    pub year: u8,
}

fn is_leap(calendar_year: i64) -> bool {
    (calendar_year % 4 == 0) && (calendar_year % 100 != 0 || calendar_year % 400 == 0)
}

/// Days in `month` (1-based) of `calendar_year`.
pub fn days_in_month(month: u8, calendar_year: i64) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap(calendar_year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

/// Convert broken-down time to Unix seconds.  `wday` is ignored.
pub fn rtc_make(te: &TmElements) -> i64 {
    let mut days: i64 = 0;
    for y in 0..te.year as i64 {
        days += if is_leap(1970 + y) { 366 } else { 365 };
    }
    for m in 1..te.month {
        days += days_in_month(m, 1970 + te.year as i64) as i64;
    }
    days += te.day as i64 - 1;

    days * SECS_PER_DAY
        + te.hour as i64 * 3600
        + te.minute as i64 * 60
        + te.second as i64
}

/// Convert Unix seconds to broken-down time, filling in the weekday.
pub fn rtc_break(secs: i64) -> TmElements {
    let days_total = secs.div_euclid(SECS_PER_DAY);
    let mut rem = secs.rem_euclid(SECS_PER_DAY);

    let hour = (rem / 3600) as u8;
    rem %= 3600;
    let minute = (rem / 60) as u8;
    let second = (rem % 60) as u8;

    // 1970-01-01 was a Thursday; Sunday is weekday 1.
    let wday = ((days_total + 4).rem_euclid(7) + 1) as u8;

    let mut year: i64 = 0;
    let mut days = days_total;
    loop {
        let year_days = if is_leap(1970 + year) { 366 } else { 365 };
        if days < year_days {
            break;
        }
        days -= year_days;
        year += 1;
    }

    let mut month: u8 = 1;
    loop {
        let month_days = days_in_month(month, 1970 + year) as i64;
        if days < month_days {
            break;
        }
        days -= month_days;
        month += 1;
    }

    TmElements {
        second,
        minute,
        hour,
        wday,
        day: (days + 1) as u8,
        month,
        year: year as u8,
    }
}

// ── Wall clock ────────────────────────────────────────────────
//
// On the device the system clock is set from the RTC at boot and by
// `set_time`; on the host an offset lets tests steer the clock without
// touching the real one.

static SIM_OFFSET_SECS: AtomicI64 = AtomicI64::new(0);

/// Current wall time in Unix seconds.
pub fn now_secs() -> i64 {
    let real = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    real + SIM_OFFSET_SECS.load(Ordering::Relaxed)
}

/// Current wall time, broken down.
pub fn now() -> TmElements {
    rtc_break(now_secs())
}

/// Point the wall clock at `te`.  On the device this calls `settimeofday`;
/// on the host it adjusts the simulation offset.
pub fn set_system_time(te: &TmElements) {
    let target = rtc_make(te);

    #[cfg(target_os = "espidf")]
    {
        let tv = esp_idf_svc::sys::timeval {
            tv_sec: target as _,
            tv_usec: 0,
        };
        // SAFETY: plain libc call with a valid timeval pointer.
        unsafe {
            esp_idf_svc::sys::settimeofday(&tv, core::ptr::null());
        }
    }

    #[cfg(not(target_os = "espidf"))]
    {
        let real = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        SIM_OFFSET_SECS.store(target - real, Ordering::Relaxed);
    }
}

/// Detects whole-second advances of the wall clock.  Each task keeps its own.
#[derive(Default)]
pub struct SecondTicker {
    prev: i64,
}

impl SecondTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once per wall-clock second.
    pub fn changed(&mut self) -> bool {
        let now = now_secs();
        if now != self.prev {
            self.prev = now;
            true
        } else {
            false
        }
    }
}

// ── Display strings ───────────────────────────────────────────

/// `"DOW MON DAY HH:MM:SS YEAR"` for the serial log and the time screen.
pub fn disp_string(te: &TmElements) -> String {
    let wday = if te.wday > 7 { 0 } else { te.wday };
    let month = if te.month > 12 { 0 } else { te.month };
    format!(
        "{} {} {:2} {:2}:{:02}:{:02} {:4}",
        DAY_NAMES[wday as usize],
        MONTH_NAMES[month as usize],
        te.day,
        te.hour,
        te.minute,
        te.second,
        te.year as u16 + 1970
    )
}

/// `"YY_MM_DD_HH_MM_SS"` — the session directory name stem.
/// Assumes we are running post-2000.
pub fn short_string(te: &TmElements) -> String {
    let y2k = te.year.saturating_sub(30);
    format!(
        "{:02}_{:02}_{:02}_{:02}_{:02}_{:02}",
        y2k, te.month, te.day, te.hour, te.minute, te.second
    )
}
