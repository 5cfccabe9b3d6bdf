//! ADC128D818 driver: the six-channel system monitor ADC.
//!
//! Channels (board wiring): 0 power button sense, 1 charger STAT2, 2 battery
//! voltage, 3 power-enable sense, 4 charger STAT1, 5 temperature sensor.
//! The chip free-runs in continuous scan mode; reads return the latest
//! conversion.

#[cfg(target_os = "espidf")]
use crate::drivers::i2c;
use crate::error::ImagerError;

#[cfg(not(target_os = "espidf"))]
use std::sync::atomic::{AtomicU16, Ordering};

const ADC_ADDR: u8 = 0x1D;

pub const NUM_CHANNELS: usize = 6;

// Registers.
const REG_CONFIG: u8 = 0x00;
const REG_CONV_RATE: u8 = 0x07;
const REG_CH_DISABLE: u8 = 0x08;
const REG_ADV_CONFIG: u8 = 0x0B;
const REG_BUSY: u8 = 0x0C;
const REG_CH_BASE: u8 = 0x20;
const REG_MANUF_ID: u8 = 0x3E;
const REG_REV_ID: u8 = 0x3F;

const MANUF_ID: u8 = 0x01;
const REV_ID: u8 = 0x09;

const PWRUP_BUSY_MASK: u8 = 0x02;
const CFG_START_MASK: u8 = 0x01;
const CONV_CONTINUOUS: u8 = 0x01;
const ACFG_EXT_REF_MASK: u8 = 0x01;
const ACFG_MODE1_MASK: u8 = 0x02;
/// Enable channels 0-5 only.
const CH_DISABLE_MASK: u8 = 0xC0;

/// External voltage reference.
pub const EXT_VREF_V: f32 = 2.048;

/// Convert a 12-bit conversion to volts at the ADC pin.
pub fn to_volts(raw: u16) -> f32 {
    EXT_VREF_V * raw as f32 / 4095.0
}

pub struct Adc128d818 {
    #[cfg(not(target_os = "espidf"))]
    sim: [AtomicU16; NUM_CHANNELS],
}

impl Adc128d818 {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            sim: Default::default(),
        }
    }

    /// Verify the chip is there and configure continuous scanning of the
    /// six system channels against the external reference.
    #[cfg(target_os = "espidf")]
    pub fn init(&self) -> Result<(), ImagerError> {
        // Wait out the power-up phase.
        loop {
            if self.read_byte(REG_BUSY)? & PWRUP_BUSY_MASK == 0 {
                break;
            }
        }

        if self.read_byte(REG_MANUF_ID)? != MANUF_ID {
            return Err(ImagerError::CciTimeout);
        }
        if self.read_byte(REG_REV_ID)? != REV_ID {
            return Err(ImagerError::CciTimeout);
        }

        self.write_byte(REG_CONFIG, 0x00)?; // disable for configuration
        self.write_byte(REG_CONV_RATE, CONV_CONTINUOUS)?;
        self.write_byte(REG_CH_DISABLE, CH_DISABLE_MASK)?;
        self.write_byte(REG_ADV_CONFIG, ACFG_EXT_REF_MASK | ACFG_MODE1_MASK)?;
        self.write_byte(REG_CONFIG, CFG_START_MASK)?;
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn init(&self) -> Result<(), ImagerError> {
        Ok(())
    }

    /// Latest conversion for `channel` (12-bit).
    #[cfg(target_os = "espidf")]
    pub fn read_channel(&self, channel: usize) -> Result<u16, ImagerError> {
        debug_assert!(channel < NUM_CHANNELS);
        let mut buf = [0u8; 2];
        i2c::write_read(ADC_ADDR, &[REG_CH_BASE + channel as u8], &mut buf)
            .map_err(|_| ImagerError::CciTimeout)?;
        // 12-bit result, left-justified in 16 bits.
        Ok(u16::from_be_bytes(buf) >> 4)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn read_channel(&self, channel: usize) -> Result<u16, ImagerError> {
        Ok(self.sim[channel].load(Ordering::Relaxed))
    }

    #[cfg(target_os = "espidf")]
    fn read_byte(&self, reg: u8) -> Result<u8, ImagerError> {
        let mut buf = [0u8; 1];
        i2c::write_read(ADC_ADDR, &[reg], &mut buf).map_err(|_| ImagerError::CciTimeout)?;
        Ok(buf[0])
    }

    #[cfg(target_os = "espidf")]
    fn write_byte(&self, reg: u8, value: u8) -> Result<(), ImagerError> {
        i2c::write(ADC_ADDR, &[reg, value]).map_err(|_| ImagerError::CciTimeout)
    }

    /// Test hook: set a simulated channel conversion.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_set_channel(&self, channel: usize, raw: u16) {
        self.sim[channel].store(raw, Ordering::Relaxed);
    }

    /// Test hook: set a simulated channel from a pin voltage.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_set_volts(&self, channel: usize, volts: f32) {
        let raw = (volts / EXT_VREF_V * 4095.0).clamp(0.0, 4095.0) as u16;
        self.sim_set_channel(channel, raw);
    }
}

impl Default for Adc128d818 {
    fn default() -> Self {
        Self::new()
    }
}

// Device-only register constants, referenced on the host build.
#[cfg(not(target_os = "espidf"))]
const _: (u8, u8, u8, u8, u8, u8, u8, u8, u8, u8, u8, u8, u8, u8, u8, u8, u8) = (
    ADC_ADDR,
    REG_CONFIG,
    REG_CONV_RATE,
    REG_CH_DISABLE,
    REG_ADV_CONFIG,
    REG_BUSY,
    REG_CH_BASE,
    REG_MANUF_ID,
    REG_REV_ID,
    MANUF_ID,
    REV_ID,
    PWRUP_BUSY_MASK,
    CFG_START_MASK,
    CONV_CONTINUOUS,
    ACFG_EXT_REF_MASK,
    ACFG_MODE1_MASK,
    CH_DISABLE_MASK,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volts_conversion_spans_the_reference() {
        assert!(to_volts(0) < 0.001);
        assert!((to_volts(4095) - EXT_VREF_V).abs() < 0.001);
    }

    #[test]
    fn sim_channels_are_independent() {
        let adc = Adc128d818::new();
        adc.sim_set_channel(0, 100);
        adc.sim_set_channel(5, 4000);
        assert_eq!(adc.read_channel(0).unwrap(), 100);
        assert_eq!(adc.read_channel(5).unwrap(), 4000);
        assert_eq!(adc.read_channel(2).unwrap(), 0);
    }

    #[test]
    fn sim_volts_round_trip() {
        let adc = Adc128d818::new();
        adc.sim_set_volts(2, 1.0);
        let v = to_volts(adc.read_channel(2).unwrap());
        assert!((v - 1.0).abs() < 0.01);
    }
}
