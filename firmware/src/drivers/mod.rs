//! Device drivers and the shared-bus discipline.
//!
//! The VSPI bus carries the ArduCAM, LCD and touchscreen; a task takes
//! [`vspi_lock`] for the whole of a multi-transaction interaction (the
//! ArduCAM corrupts its FIFO offload if other traffic interleaves).  The
//! I2C bus has its own per-transaction lock inside [`i2c`].

pub mod adc128d818;
pub mod cci;
pub mod i2c;
pub mod ov2640;
pub mod sdcard;
pub mod vospi;

use std::sync::{Mutex, MutexGuard};

static VSPI_BUS: Mutex<()> = Mutex::new(());

/// Hold the returned guard for the duration of a multi-transaction VSPI
/// interaction.
pub fn vspi_lock() -> MutexGuard<'static, ()> {
    VSPI_BUS.lock().unwrap()
}

// ── Board pins ────────────────────────────────────────────────

pub mod pins {
    pub const TS_CSN: i32 = 5;
    pub const LCD_CSN: i32 = 18;
    pub const HSPI_SCK: i32 = 19;
    pub const LEP_CSN: i32 = 21;
    pub const I2C_SDA: i32 = 22;
    pub const I2C_SCL: i32 = 23;
    pub const VSPI_SCK: i32 = 25;
    pub const PWR_HOLD: i32 = 26;
    pub const CAM_CSN: i32 = 27;
    pub const LCD_DC: i32 = 32;
    pub const VSPI_MOSI: i32 = 33;
    pub const VSPI_MISO: i32 = 34;
    pub const TS_IRQ: i32 = 35;
    pub const LEP_VSYNC: i32 = 36;
    pub const HSPI_MISO: i32 = 39;
}

// ── GPIO helpers ──────────────────────────────────────────────

/// Level of the Lepton vsync line.
#[cfg(target_os = "espidf")]
pub fn vsync_level() -> bool {
    // SAFETY: reading a configured input pin.
    unsafe { esp_idf_svc::sys::gpio_get_level(pins::LEP_VSYNC) != 0 }
}

/// Host stand-in: vsync is always asserted so the thermal loop never spins.
#[cfg(not(target_os = "espidf"))]
pub fn vsync_level() -> bool {
    true
}

/// Drive the power-hold line.  High keeps the regulator enabled; dropping it
/// low powers the system off once the user releases the button.
#[cfg(target_os = "espidf")]
pub fn set_power_hold(level: bool) {
    // SAFETY: writing a configured output pin.
    unsafe {
        esp_idf_svc::sys::gpio_set_level(pins::PWR_HOLD, level as u32);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn set_power_hold(level: bool) {
    log::info!("power hold -> {level}");
}
