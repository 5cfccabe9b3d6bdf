//! ArduCAM OV2640 driver: JPEG capture trigger and FIFO offload.
//!
//! The camera shares the VSPI bus with the display and touchscreen and is
//! intolerant of interleaved traffic during a FIFO drain, so the visual task
//! holds the bus lock across the whole offload.  The FIFO is read in bursts
//! bounded by the DMA packet size and scanned for the JPEG start/end markers;
//! anything without both markers reports length zero.

use log::info;

use crate::error::ImagerError;

#[cfg(not(target_os = "espidf"))]
use std::sync::Mutex;

/// Largest JPEG the shared visual buffer accepts (640x480 capture).
pub const CAM_MAX_JPEG_LEN: usize = 65_536;

/// Per-burst SPI read bound (DMA packet size).
pub const CAM_MAX_SPI_PKT: usize = 1024;

/// The camera module's physical FIFO capacity; length reports at or above
/// this are garbage.
const MAX_FIFO_SIZE: u32 = 0x5FFFF;

// ArduChip registers.
#[cfg(target_os = "espidf")]
const REG_FIFO_CONTROL: u8 = 0x04;
#[cfg(target_os = "espidf")]
const FIFO_CLEAR_MASK: u8 = 0x01;
#[cfg(target_os = "espidf")]
const FIFO_START_MASK: u8 = 0x02;
const REG_TRIG: u8 = 0x41;
const CAP_DONE_MASK: u8 = 0x08;
#[cfg(target_os = "espidf")]
const REG_FIFO_SIZE1: u8 = 0x42;
#[cfg(target_os = "espidf")]
const REG_FIFO_SIZE2: u8 = 0x43;
#[cfg(target_os = "espidf")]
const REG_FIFO_SIZE3: u8 = 0x44;
#[cfg(target_os = "espidf")]
const BURST_FIFO_READ: u8 = 0x3C;

/// Sensor JPEG frame sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpegSize {
    Qvga320x240,
    Vga640x480,
}

/// White-balance preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightMode {
    Auto,
    Sunny,
    Cloudy,
    Office,
    Home,
}

// ── Marker-framed extraction ──────────────────────────────────

/// Scans burst data for one `FFD8 .. FFD9` JPEG, copying it into the
/// destination buffer.  Survives markers split across burst boundaries.
pub struct JpegExtractor {
    prev: u8,
    saw_header: bool,
    len: usize,
    done: bool,
    overflow: bool,
}

impl JpegExtractor {
    pub fn new() -> Self {
        Self {
            prev: 0,
            saw_header: false,
            len: 0,
            done: false,
            overflow: false,
        }
    }

    /// Feed one burst.  Returns `true` once the end marker has been seen.
    pub fn feed(&mut self, chunk: &[u8], out: &mut [u8]) -> bool {
        for &b in chunk {
            if self.done {
                break;
            }
            let prev = self.prev;
            self.prev = b;

            if self.saw_header {
                if self.len >= out.len() {
                    self.overflow = true;
                    self.done = true;
                    break;
                }
                out[self.len] = b;
                self.len += 1;
                if prev == 0xFF && b == 0xD9 {
                    self.done = true;
                }
            } else if prev == 0xFF && b == 0xD8 {
                self.saw_header = true;
                out[0] = 0xFF;
                out[1] = 0xD8;
                self.len = 2;
            }
        }
        self.done
    }

    /// Final image length; zero when no complete JPEG was found.
    pub fn finish(self) -> usize {
        if self.done && !self.overflow {
            self.len
        } else {
            0
        }
    }
}

impl Default for JpegExtractor {
    fn default() -> Self {
        Self::new()
    }
}

// ── Device ────────────────────────────────────────────────────

pub struct Ov2640 {
    #[cfg(target_os = "espidf")]
    device: esp_idf_svc::sys::spi_device_handle_t,
    #[cfg(target_os = "espidf")]
    burst_buf: Vec<u8>,
    #[cfg(not(target_os = "espidf"))]
    sim: Mutex<SimCam>,
}

#[cfg(not(target_os = "espidf"))]
struct SimCam {
    fifo: Vec<u8>,
    captured: bool,
}

// SAFETY: the device handle is only ever used from the visual task that
// owns the Ov2640.
#[cfg(target_os = "espidf")]
unsafe impl Send for Ov2640 {}

impl Ov2640 {
    #[cfg(target_os = "espidf")]
    pub fn new(host: esp_idf_svc::sys::spi_host_device_t, cs_pin: i32) -> crate::error::Result<Self> {
        use esp_idf_svc::sys::*;
        let devcfg = spi_device_interface_config_t {
            clock_speed_hz: 4_000_000,
            mode: 0,
            spics_io_num: cs_pin,
            queue_size: 1,
            ..Default::default()
        };
        let mut device: spi_device_handle_t = core::ptr::null_mut();
        // SAFETY: devcfg outlives the call; the bus was initialised at boot.
        let ret = unsafe { spi_bus_add_device(host, &devcfg, &mut device) };
        if ret != ESP_OK {
            return Err(crate::error::Error::Init("failed to add arducam spi device"));
        }
        Ok(Self {
            device,
            burst_buf: vec![0u8; CAM_MAX_SPI_PKT],
        })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self {
            sim: Mutex::new(SimCam {
                fifo: Vec::new(),
                captured: false,
            }),
        }
    }

    /// One-time sensor configuration: frame size and white balance.
    pub fn configure(&self, size: JpegSize, light: LightMode) -> Result<(), ImagerError> {
        self.sccb_configure(size, light)?;
        info!("ArduCAM configured: {size:?} {light:?}");
        Ok(())
    }

    /// Start a single capture (clears the FIFO first).
    pub fn capture(&mut self) -> Result<(), ImagerError> {
        #[cfg(target_os = "espidf")]
        {
            self.write_reg(REG_FIFO_CONTROL, FIFO_CLEAR_MASK)?;
            self.write_reg(REG_FIFO_CONTROL, FIFO_START_MASK)?;
        }
        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.lock().unwrap().captured = true;
        }
        Ok(())
    }

    /// Has the sensor finished writing the capture into its FIFO?
    pub fn capture_done(&mut self) -> Result<bool, ImagerError> {
        #[cfg(target_os = "espidf")]
        {
            Ok(self.read_reg(REG_TRIG)? & CAP_DONE_MASK != 0)
        }
        #[cfg(not(target_os = "espidf"))]
        {
            Ok(self.sim.lock().unwrap().captured)
        }
    }

    /// Drain the FIFO into `out`, framing by the JPEG markers.
    ///
    /// Returns the image length; zero means no valid image (and an
    /// out-of-range FIFO report is an error without touching `out`).  The
    /// caller must hold the VSPI bus lock for the whole call.
    pub fn transfer_jpeg(&mut self, out: &mut [u8]) -> Result<usize, ImagerError> {
        let image_length = self.read_fifo_length()?;
        if image_length == 0 || image_length >= MAX_FIFO_SIZE {
            info!("unexpected camera fifo length {image_length}");
            return Err(ImagerError::FifoLengthOutOfRange(image_length));
        }
        if image_length as usize > CAM_MAX_JPEG_LEN {
            info!("camera fifo length {image_length} too large");
            return Err(ImagerError::FifoLengthOutOfRange(image_length));
        }

        let mut extractor = JpegExtractor::new();
        let mut chunk = [0u8; CAM_MAX_SPI_PKT];
        let mut total_read = 0usize;
        let image_length = image_length as usize;

        while total_read < image_length {
            let read_length = (image_length - total_read).min(CAM_MAX_SPI_PKT);
            self.burst_read(total_read, &mut chunk[..read_length])?;
            let found = extractor.feed(&chunk[..read_length], out);
            total_read += read_length;
            if found {
                break;
            }
        }

        Ok(extractor.finish())
    }

    // ── ESP-IDF register access ───────────────────────────────

    #[cfg(target_os = "espidf")]
    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), ImagerError> {
        let tx = [reg | 0x80, value];
        self.spi_transfer(&tx, &mut [])
    }

    #[cfg(target_os = "espidf")]
    fn read_reg(&mut self, reg: u8) -> Result<u8, ImagerError> {
        let tx = [reg & 0x7F, 0x00];
        let mut rx = [0u8; 2];
        self.spi_transfer(&tx, &mut rx)?;
        Ok(rx[1])
    }

    #[cfg(target_os = "espidf")]
    fn read_fifo_length(&mut self) -> Result<u32, ImagerError> {
        let b1 = self.read_reg(REG_FIFO_SIZE1)? as u32;
        let b2 = self.read_reg(REG_FIFO_SIZE2)? as u32;
        let b3 = (self.read_reg(REG_FIFO_SIZE3)? & 0x7F) as u32;
        Ok((b3 << 16) | (b2 << 8) | b1)
    }

    #[cfg(target_os = "espidf")]
    fn burst_read(&mut self, _offset: usize, buf: &mut [u8]) -> Result<(), ImagerError> {
        let tx = [BURST_FIFO_READ];
        // The burst command streams sequential FIFO bytes; offset is
        // implicit in the read position.
        self.spi_transfer_burst(&tx, buf.len())?;
        buf.copy_from_slice(&self.burst_buf[..buf.len()]);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn spi_transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), ImagerError> {
        use esp_idf_svc::sys::*;
        let mut trans: spi_transaction_t = unsafe { core::mem::zeroed() };
        trans.length = (tx.len() * 8) as usize;
        trans.__bindgen_anon_1.tx_buffer = tx.as_ptr() as *const _;
        if !rx.is_empty() {
            trans.rxlength = (rx.len() * 8) as usize;
            trans.__bindgen_anon_2.rx_buffer = rx.as_mut_ptr() as *mut _;
        }
        // SAFETY: buffers are valid for the call duration.
        let ret = unsafe { spi_device_transmit(self.device, &mut trans) };
        if ret == ESP_OK {
            Ok(())
        } else {
            Err(ImagerError::SpiTransfer)
        }
    }

    #[cfg(target_os = "espidf")]
    fn spi_transfer_burst(&mut self, tx: &[u8], len: usize) -> Result<(), ImagerError> {
        use esp_idf_svc::sys::*;
        let mut trans: spi_transaction_t = unsafe { core::mem::zeroed() };
        trans.length = (tx.len() * 8) as usize;
        trans.__bindgen_anon_1.tx_buffer = tx.as_ptr() as *const _;
        trans.rxlength = (len * 8) as usize;
        trans.__bindgen_anon_2.rx_buffer = self.burst_buf.as_mut_ptr() as *mut _;
        // SAFETY: burst_buf is at least CAM_MAX_SPI_PKT bytes.
        let ret = unsafe { spi_device_transmit(self.device, &mut trans) };
        if ret == ESP_OK {
            Ok(())
        } else {
            Err(ImagerError::SpiTransfer)
        }
    }

    #[cfg(target_os = "espidf")]
    fn sccb_configure(&self, size: JpegSize, light: LightMode) -> Result<(), ImagerError> {
        use crate::drivers::i2c;
        const OV2640_I2C_ADDR: u8 = 0x30;
        // Register banks per the sensor's initialisation tables; the
        // size/light selections index the canned sequences.
        let size_sel: u8 = match size {
            JpegSize::Qvga320x240 => 2,
            JpegSize::Vga640x480 => 4,
        };
        let light_sel: u8 = match light {
            LightMode::Auto => 0,
            LightMode::Sunny => 1,
            LightMode::Cloudy => 2,
            LightMode::Office => 3,
            LightMode::Home => 4,
        };
        for (reg, val) in [(0xFFu8, 0x00u8), (0x5A, size_sel), (0x5B, light_sel)] {
            i2c::write(OV2640_I2C_ADDR, &[reg, val]).map_err(|_| ImagerError::CciTimeout)?;
        }
        Ok(())
    }

    // ── Host simulation ───────────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn read_fifo_length(&mut self) -> Result<u32, ImagerError> {
        Ok(self.sim.lock().unwrap().fifo.len() as u32)
    }

    #[cfg(not(target_os = "espidf"))]
    fn burst_read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), ImagerError> {
        let sim = self.sim.lock().unwrap();
        buf.copy_from_slice(&sim.fifo[offset..offset + buf.len()]);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn sccb_configure(&self, _size: JpegSize, _light: LightMode) -> Result<(), ImagerError> {
        Ok(())
    }

    /// Test hook: load the simulated FIFO with raw capture bytes.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_load_fifo(&self, bytes: &[u8]) {
        let mut sim = self.sim.lock().unwrap();
        sim.fifo = bytes.to_vec();
        sim.captured = false;
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for Ov2640 {
    fn default() -> Self {
        Self::new()
    }
}

// Trigger-register constants are read on the device only.
#[cfg(not(target_os = "espidf"))]
const _: (u8, u8) = (REG_TRIG, CAP_DONE_MASK);

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = vec![0xFF, 0xD8];
        v.extend_from_slice(body);
        v.extend_from_slice(&[0xFF, 0xD9]);
        v
    }

    #[test]
    fn extracts_a_jpeg_with_fifo_padding() {
        let mut fifo = vec![0x00, 0x55]; // junk before SOI
        fifo.extend_from_slice(&jpeg(&[1, 2, 3, 4]));
        fifo.extend_from_slice(&[0xAA; 16]); // junk after EOI

        let mut cam = Ov2640::new();
        cam.sim_load_fifo(&fifo);
        let mut out = vec![0u8; CAM_MAX_JPEG_LEN];
        let len = cam.transfer_jpeg(&mut out).unwrap();
        assert_eq!(&out[..len], jpeg(&[1, 2, 3, 4]).as_slice());
    }

    #[test]
    fn missing_end_marker_reports_zero() {
        let mut cam = Ov2640::new();
        cam.sim_load_fifo(&[0xFF, 0xD8, 1, 2, 3]);
        let mut out = vec![0u8; CAM_MAX_JPEG_LEN];
        assert_eq!(cam.transfer_jpeg(&mut out).unwrap(), 0);
    }

    #[test]
    fn no_markers_reports_zero() {
        let mut cam = Ov2640::new();
        cam.sim_load_fifo(&[0u8; 512]);
        let mut out = vec![0u8; CAM_MAX_JPEG_LEN];
        assert_eq!(cam.transfer_jpeg(&mut out).unwrap(), 0);
    }

    #[test]
    fn empty_fifo_is_an_error() {
        let mut cam = Ov2640::new();
        cam.sim_load_fifo(&[]);
        let mut out = vec![0u8; CAM_MAX_JPEG_LEN];
        assert!(matches!(
            cam.transfer_jpeg(&mut out),
            Err(ImagerError::FifoLengthOutOfRange(0))
        ));
    }

    #[test]
    fn markers_split_across_bursts_are_found() {
        // SOI straddles the 1024-byte burst boundary.
        let mut fifo = vec![0u8; CAM_MAX_SPI_PKT - 1];
        fifo[CAM_MAX_SPI_PKT - 2] = 0xFF;
        fifo.push(0xD8); // first byte of the second burst completes SOI
        fifo.extend_from_slice(&[7; 10]);
        fifo.extend_from_slice(&[0xFF, 0xD9]);

        let mut cam = Ov2640::new();
        cam.sim_load_fifo(&fifo);
        let mut out = vec![0u8; CAM_MAX_JPEG_LEN];
        let len = cam.transfer_jpeg(&mut out).unwrap();
        assert_eq!(len, 2 + 10 + 2);
        assert_eq!(&out[..2], &[0xFF, 0xD8]);
        assert_eq!(&out[len - 2..len], &[0xFF, 0xD9]);
    }

    #[test]
    fn capture_flow_in_simulation() {
        let mut cam = Ov2640::new();
        assert!(!cam.capture_done().unwrap());
        cam.capture().unwrap();
        assert!(cam.capture_done().unwrap());
    }
}
