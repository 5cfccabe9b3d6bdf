//! Shared I2C master (RTC/parameter store, ADC, Lepton CCI).
//!
//! One mutex guards the bus; every transaction is taken under the lock.  On
//! ESP-IDF this wraps the master read/write helpers; on the host the bus
//! does not exist and the per-driver simulation backends stand in, so the
//! functions here only model success.

use std::sync::Mutex;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys;

/// I2C controller used for all board peripherals.
pub const I2C_PORT: i32 = 1;

const I2C_TIMEOUT_MS: u32 = 100;

static BUS: Mutex<()> = Mutex::new(());

/// An I2C transaction failed (NACK or timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusError;

/// Write `data` to the device at `addr`.
#[cfg(target_os = "espidf")]
pub fn write(addr: u8, data: &[u8]) -> Result<(), BusError> {
    let _guard = BUS.lock().unwrap();
    // SAFETY: data pointer/length are valid for the duration of the call.
    let ret = unsafe {
        sys::i2c_master_write_to_device(
            I2C_PORT,
            addr,
            data.as_ptr(),
            data.len(),
            I2C_TIMEOUT_MS / portTICK_PERIOD_MS(),
        )
    };
    if ret == sys::ESP_OK {
        Ok(())
    } else {
        Err(BusError)
    }
}

/// Read into `buf` from the device at `addr`.
#[cfg(target_os = "espidf")]
pub fn read(addr: u8, buf: &mut [u8]) -> Result<(), BusError> {
    let _guard = BUS.lock().unwrap();
    // SAFETY: buf pointer/length are valid for the duration of the call.
    let ret = unsafe {
        sys::i2c_master_read_from_device(
            I2C_PORT,
            addr,
            buf.as_mut_ptr(),
            buf.len(),
            I2C_TIMEOUT_MS / portTICK_PERIOD_MS(),
        )
    };
    if ret == sys::ESP_OK {
        Ok(())
    } else {
        Err(BusError)
    }
}

/// Write `data` then read into `buf` as one locked transaction pair.
#[cfg(target_os = "espidf")]
pub fn write_read(addr: u8, data: &[u8], buf: &mut [u8]) -> Result<(), BusError> {
    let _guard = BUS.lock().unwrap();
    // SAFETY: pointers/lengths are valid for the duration of the call.
    let ret = unsafe {
        sys::i2c_master_write_read_device(
            I2C_PORT,
            addr,
            data.as_ptr(),
            data.len(),
            buf.as_mut_ptr(),
            buf.len(),
            I2C_TIMEOUT_MS / portTICK_PERIOD_MS(),
        )
    };
    if ret == sys::ESP_OK {
        Ok(())
    } else {
        Err(BusError)
    }
}

#[cfg(target_os = "espidf")]
#[allow(non_snake_case)]
fn portTICK_PERIOD_MS() -> u32 {
    1000 / sys::configTICK_RATE_HZ
}

#[cfg(not(target_os = "espidf"))]
pub fn write(_addr: u8, _data: &[u8]) -> Result<(), BusError> {
    let _guard = BUS.lock().unwrap();
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn read(_addr: u8, buf: &mut [u8]) -> Result<(), BusError> {
    let _guard = BUS.lock().unwrap();
    buf.fill(0);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn write_read(_addr: u8, _data: &[u8], buf: &mut [u8]) -> Result<(), BusError> {
    let _guard = BUS.lock().unwrap();
    buf.fill(0);
    Ok(())
}
