//! Lepton CCI: the command-and-control register protocol over I2C.
//!
//! Commands are issued by loading the data registers, writing a command ID
//! to the command register and polling the status register until busy
//! deasserts.  GET and SET use separate command IDs throughout — including
//! for the OEM GPIO mode, where GET is `OEM_GET_GPIO_MODE` and SET is
//! `OEM_SET_GPIO_MODE`.

#[cfg(target_os = "espidf")]
use log::error;
use log::info;

use crate::config::GainMode;
#[cfg(target_os = "espidf")]
use crate::drivers::i2c;
use crate::error::ImagerError;
use crate::record::TlinearResolution;

#[cfg(not(target_os = "espidf"))]
use std::sync::Mutex;

const CCI_ADDRESS: u8 = 0x2A;
const CCI_WORD_LEN: u16 = 2;

// Registers.
const REG_STATUS: u16 = 0x0002;
const REG_COMMAND: u16 = 0x0004;
const REG_DATA_LENGTH: u16 = 0x0006;
const REG_DATA_0: u16 = 0x0008;

// Command IDs (module | command | type).
const CMD_AGC_SET_ENABLE_STATE: u16 = 0x0101;
const CMD_AGC_GET_ENABLE_STATE: u16 = 0x0100;
const CMD_SYS_RUN_PING: u16 = 0x0202;
const CMD_SYS_GET_AUX_TEMP: u16 = 0x0210;
const CMD_SYS_GET_FPA_TEMP: u16 = 0x0214;
const CMD_SYS_GET_GAIN_MODE: u16 = 0x0248;
const CMD_SYS_SET_GAIN_MODE: u16 = 0x0249;
const CMD_OEM_GET_GPIO_MODE: u16 = 0x4854;
const CMD_OEM_SET_GPIO_MODE: u16 = 0x4855;
const CMD_RAD_SET_RADIOMETRY_ENABLE: u16 = 0x4E11;
const CMD_RAD_GET_RADIOMETRY_ENABLE: u16 = 0x4E10;
const CMD_RAD_SET_TLINEAR_ENABLE: u16 = 0x4EC1;
const CMD_RAD_GET_TLINEAR_ENABLE: u16 = 0x4EC0;
const CMD_RAD_GET_TLINEAR_RESOLUTION: u16 = 0x4EC4;

/// GPIO3 drives vsync.
pub const GPIO_MODE_VSYNC: u32 = 5;

const BUSY_POLL_LIMIT: u32 = 1000;

pub struct Cci {
    #[cfg(not(target_os = "espidf"))]
    sim: Mutex<SimCci>,
}

#[cfg(not(target_os = "espidf"))]
struct SimCci {
    agc: u32,
    radiometry: u32,
    tlinear: u32,
    gain_mode: u32,
    gpio_mode: u32,
    fpa_temp_k100: u32,
    aux_temp_k100: u32,
}

impl Cci {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            sim: Mutex::new(SimCci {
                agc: 0,
                radiometry: 0,
                tlinear: 0,
                gain_mode: GainMode::Auto as u32,
                gpio_mode: 0,
                fpa_temp_k100: 30465, // 31.5 C
                aux_temp_k100: 30140, // 28.25 C
            }),
        }
    }

    /// Bring the sensor into the radiometric configuration this firmware
    /// relies on: TLinear output, AGC off, vsync on GPIO3.
    pub fn init(&self) -> Result<(), ImagerError> {
        self.run_ping()?;

        self.set_radiometry_enable(true)?;
        let mut rsp = self.get_radiometry_enable()?;
        info!("Lepton Radiometry = {rsp}");
        while rsp == 0 {
            info!("Retry Set Lepton Radiometry");
            self.set_radiometry_enable(true)?;
            rsp = self.get_radiometry_enable()?;
            info!("Lepton Radiometry = {rsp}");
        }

        self.set_tlinear_enable(true)?;
        info!("Lepton Radiometry TLinear = {}", self.get_tlinear_enable()?);

        self.set_agc_enable(false)?;
        info!("Lepton AGC = {}", self.get_agc_enable()?);

        self.set_gpio_mode(GPIO_MODE_VSYNC)?;
        info!("Lepton GPIO Mode = {}", self.get_gpio_mode()?);

        Ok(())
    }

    pub fn run_ping(&self) -> Result<(), ImagerError> {
        self.run_command(CMD_SYS_RUN_PING)
    }

    pub fn get_fpa_temp_k100(&self) -> Result<u32, ImagerError> {
        self.get_u32(CMD_SYS_GET_FPA_TEMP)
    }

    pub fn get_aux_temp_k100(&self) -> Result<u32, ImagerError> {
        self.get_u32(CMD_SYS_GET_AUX_TEMP)
    }

    pub fn get_gain_mode(&self) -> Result<GainMode, ImagerError> {
        Ok(GainMode::from_u8(self.get_u32(CMD_SYS_GET_GAIN_MODE)? as u8))
    }

    pub fn set_gain_mode(&self, mode: GainMode) -> Result<(), ImagerError> {
        self.set_u32(CMD_SYS_SET_GAIN_MODE, mode as u32)
    }

    pub fn get_tlinear_resolution(&self) -> Result<TlinearResolution, ImagerError> {
        // 0 => 0.1 K/count, 1 => 0.01 K/count.
        Ok(if self.get_u32(CMD_RAD_GET_TLINEAR_RESOLUTION)? == 0 {
            TlinearResolution::Deci
        } else {
            TlinearResolution::Centi
        })
    }

    pub fn set_radiometry_enable(&self, en: bool) -> Result<(), ImagerError> {
        self.set_u32(CMD_RAD_SET_RADIOMETRY_ENABLE, en as u32)
    }

    pub fn get_radiometry_enable(&self) -> Result<u32, ImagerError> {
        self.get_u32(CMD_RAD_GET_RADIOMETRY_ENABLE)
    }

    pub fn set_tlinear_enable(&self, en: bool) -> Result<(), ImagerError> {
        self.set_u32(CMD_RAD_SET_TLINEAR_ENABLE, en as u32)
    }

    pub fn get_tlinear_enable(&self) -> Result<u32, ImagerError> {
        self.get_u32(CMD_RAD_GET_TLINEAR_ENABLE)
    }

    pub fn set_agc_enable(&self, en: bool) -> Result<(), ImagerError> {
        self.set_u32(CMD_AGC_SET_ENABLE_STATE, en as u32)
    }

    pub fn get_agc_enable(&self) -> Result<u32, ImagerError> {
        self.get_u32(CMD_AGC_GET_ENABLE_STATE)
    }

    pub fn set_gpio_mode(&self, mode: u32) -> Result<(), ImagerError> {
        self.set_u32(CMD_OEM_SET_GPIO_MODE, mode)
    }

    pub fn get_gpio_mode(&self) -> Result<u32, ImagerError> {
        self.get_u32(CMD_OEM_GET_GPIO_MODE)
    }

    // ── Transaction primitives: ESP-IDF ───────────────────────

    #[cfg(target_os = "espidf")]
    fn write_register(&self, reg: u16, value: u16) -> Result<(), ImagerError> {
        let buf = [
            (reg >> 8) as u8,
            reg as u8,
            (value >> 8) as u8,
            value as u8,
        ];
        i2c::write(CCI_ADDRESS, &buf).map_err(|_| {
            error!("failed to write CCI register {reg:04x}");
            ImagerError::CciTimeout
        })
    }

    #[cfg(target_os = "espidf")]
    fn read_register(&self, reg: u16) -> Result<u16, ImagerError> {
        let addr = [(reg >> 8) as u8, reg as u8];
        let mut buf = [0u8; 2];
        i2c::write_read(CCI_ADDRESS, &addr, &mut buf).map_err(|_| {
            error!("failed to read CCI register {reg:04x}");
            ImagerError::CciTimeout
        })?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Poll STATUS until booted and not busy.  Returns the status word.
    #[cfg(target_os = "espidf")]
    fn wait_busy_clear(&self) -> Result<u16, ImagerError> {
        for _ in 0..BUSY_POLL_LIMIT {
            let status = self.read_register(REG_STATUS)?;
            if status & 0x0007 == 0x0006 {
                return Ok(status);
            }
        }
        Err(ImagerError::CciTimeout)
    }

    #[cfg(target_os = "espidf")]
    fn check_result(&self, status: u16) -> Result<(), ImagerError> {
        let code = (status >> 8) as u8;
        if code == 0 {
            Ok(())
        } else {
            // Lepton result codes are negative; report the magnitude.
            Err(ImagerError::CciResult(code.wrapping_neg()))
        }
    }

    #[cfg(target_os = "espidf")]
    fn run_command(&self, cmd: u16) -> Result<(), ImagerError> {
        self.wait_busy_clear()?;
        self.write_register(REG_COMMAND, cmd)?;
        let status = self.wait_busy_clear()?;
        self.check_result(status)
    }

    #[cfg(target_os = "espidf")]
    fn get_u32(&self, cmd: u16) -> Result<u32, ImagerError> {
        self.wait_busy_clear()?;
        self.write_register(REG_DATA_LENGTH, 2)?;
        self.write_register(REG_COMMAND, cmd)?;
        let status = self.wait_busy_clear()?;
        self.check_result(status)?;
        let ls = self.read_register(REG_DATA_0)? as u32;
        let ms = self.read_register(REG_DATA_0 + CCI_WORD_LEN)? as u32;
        Ok(ms << 16 | ls)
    }

    #[cfg(target_os = "espidf")]
    fn set_u32(&self, cmd: u16, value: u32) -> Result<(), ImagerError> {
        self.wait_busy_clear()?;
        self.write_register(REG_DATA_0, value as u16)?;
        self.write_register(REG_DATA_0 + CCI_WORD_LEN, (value >> 16) as u16)?;
        self.write_register(REG_DATA_LENGTH, 2)?;
        self.write_register(REG_COMMAND, cmd)?;
        let status = self.wait_busy_clear()?;
        self.check_result(status)
    }

    // ── Transaction primitives: host simulation ───────────────

    #[cfg(not(target_os = "espidf"))]
    fn run_command(&self, _cmd: u16) -> Result<(), ImagerError> {
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn get_u32(&self, cmd: u16) -> Result<u32, ImagerError> {
        let sim = self.sim.lock().unwrap();
        Ok(match cmd {
            CMD_AGC_GET_ENABLE_STATE => sim.agc,
            CMD_SYS_GET_AUX_TEMP => sim.aux_temp_k100,
            CMD_SYS_GET_FPA_TEMP => sim.fpa_temp_k100,
            CMD_SYS_GET_GAIN_MODE => sim.gain_mode,
            CMD_OEM_GET_GPIO_MODE => sim.gpio_mode,
            CMD_RAD_GET_RADIOMETRY_ENABLE => sim.radiometry,
            CMD_RAD_GET_TLINEAR_ENABLE => sim.tlinear,
            CMD_RAD_GET_TLINEAR_RESOLUTION => 1,
            _ => 0,
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn set_u32(&self, cmd: u16, value: u32) -> Result<(), ImagerError> {
        let mut sim = self.sim.lock().unwrap();
        match cmd {
            CMD_AGC_SET_ENABLE_STATE => sim.agc = value,
            CMD_SYS_SET_GAIN_MODE => sim.gain_mode = value,
            CMD_OEM_SET_GPIO_MODE => sim.gpio_mode = value,
            CMD_RAD_SET_RADIOMETRY_ENABLE => sim.radiometry = value,
            CMD_RAD_SET_TLINEAR_ENABLE => sim.tlinear = value,
            _ => {}
        }
        Ok(())
    }

    /// Test hook: steer the simulated sensor temperatures.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_set_temps(&self, fpa_k100: u32, aux_k100: u32) {
        let mut sim = self.sim.lock().unwrap();
        sim.fpa_temp_k100 = fpa_k100;
        sim.aux_temp_k100 = aux_k100;
    }
}

impl Default for Cci {
    fn default() -> Self {
        Self::new()
    }
}

// Keep the device-only constants referenced on the host build.
#[cfg(not(target_os = "espidf"))]
const _: (u16, u16, u16, u16, u16, u32, u8) = (
    REG_STATUS,
    REG_COMMAND,
    REG_DATA_LENGTH,
    REG_DATA_0,
    CCI_WORD_LEN,
    BUSY_POLL_LIMIT,
    CCI_ADDRESS,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_reaches_radiometric_config() {
        let cci = Cci::new();
        cci.init().unwrap();
        assert_eq!(cci.get_radiometry_enable().unwrap(), 1);
        assert_eq!(cci.get_tlinear_enable().unwrap(), 1);
        assert_eq!(cci.get_agc_enable().unwrap(), 0);
        assert_eq!(cci.get_gpio_mode().unwrap(), GPIO_MODE_VSYNC);
    }

    #[test]
    fn gain_mode_set_get() {
        let cci = Cci::new();
        cci.set_gain_mode(GainMode::Low).unwrap();
        assert_eq!(cci.get_gain_mode().unwrap(), GainMode::Low);
    }

    #[test]
    fn temps_convert_to_celsius_via_telemetry() {
        let cci = Cci::new();
        cci.sim_set_temps(27315, 27315);
        assert_eq!(cci.get_fpa_temp_k100().unwrap(), 27315);
    }
}
