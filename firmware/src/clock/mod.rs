//! Timekeeping: the calendar model, the wall clock and the DS3232 RTC.

pub mod ds3232;
pub mod time;

use log::info;

use crate::error::StoreError;

/// Set the system clock from the RTC.  Called once at boot, before any task
/// that stamps records or names session directories runs.
pub fn time_init(rtc: &ds3232::Ds3232) -> Result<(), StoreError> {
    let te = rtc.read_time()?;
    time::set_system_time(&te);
    info!("Initial RTC time: {}", time::disp_string(&te));
    Ok(())
}

/// Set both the RTC and the system clock.  Used by the `set_time` command.
pub fn time_set(rtc: &ds3232::Ds3232, te: &time::TmElements) -> Result<(), StoreError> {
    rtc.write_time(te)?;
    time::set_system_time(te);
    Ok(())
}
