//! Lepton VoSPI: the video-over-SPI stream protocol.
//!
//! The sensor emits a 160x120 frame as four segments of 60 packets; each
//! 164-byte packet carries half a line of big-endian 16-bit pixels.  After
//! any stall (including the sensor's own flat-field correction) the stream
//! must be resynchronised: data is collected provisionally into segment-1
//! positions until a line-20 packet proves the segment valid.
//!
//! [`FrameAssembler`] is the pure protocol state machine; the SPI transport
//! and the vsync wait live in the thermal task.

use crate::config::GainMode;
use crate::error::ImagerError;
use crate::record::TlinearResolution;

pub const LEP_WIDTH: usize = 160;
pub const LEP_HEIGHT: usize = 120;
pub const LEP_NUM_PIXELS: usize = LEP_WIDTH * LEP_HEIGHT;
pub const LEP_PKT_LEN: usize = 164;

/// Pixel words per packet (half a line).
const PKT_WORDS: usize = (LEP_PKT_LEN - 4) / 2;
/// Rows per segment.
const SEG_ROWS: usize = 30;

/// The sensor's frame period (vsync rate).
pub const LEP_FRAME_USEC: u64 = 9450;
/// Per-segment transfer deadline, just under one frame period.
pub const LEP_MAX_FRAME_XFER_WAIT_USEC: u64 = 9250;
/// Vsync periods to keep retrying before declaring the acquisition failed
/// (covers resync and a flat-field correction pause).
pub const LEP_FAIL_VSYNC_COUNT: u32 = 36;

/// Words in the telemetry block.
pub const TELEMETRY_WORDS: usize = 80;

/// Byte source for raw VoSPI packets.
pub trait PacketSource {
    fn read_packet(&mut self, pkt: &mut [u8; LEP_PKT_LEN]) -> Result<(), ImagerError>;
}

/// Outcome of feeding one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    /// A discard packet; the stream is idle or resynchronising.  The caller
    /// applies its transfer deadline to these.
    Discard,
    /// Keep reading packets in this segment window.
    Continue,
    /// A line-59 packet closed this segment attempt.
    SegmentDone { frame_complete: bool },
    /// Repeated line number: stream garbage, abandon this segment window.
    Garbage,
}

/// Reassembles four 30-row segments into one radiometric frame.
///
/// Restartable and idempotent across failures — the internal state always
/// returns to "collecting segment 1" without external reset.
pub struct FrameAssembler {
    pixels: Box<[u16]>,
    cur_segment: u8,
    valid_region: bool,
    before_valid: bool,
    prev_line: Option<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            pixels: vec![0u16; LEP_NUM_PIXELS].into_boxed_slice(),
            cur_segment: 1,
            valid_region: false,
            before_valid: true,
            prev_line: None,
        }
    }

    /// Arm for one segment window (called at each vsync edge).
    pub fn begin_segment(&mut self) {
        self.prev_line = None;
        self.before_valid = true;
    }

    /// Completed frame pixels.  Only meaningful right after a
    /// `SegmentDone { frame_complete: true }`.
    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    /// Feed one raw packet.
    pub fn feed(&mut self, pkt: &[u8; LEP_PKT_LEN]) -> FeedEvent {
        // Discard packets have 0xF in the low nibble of the first byte.
        if pkt[0] & 0x0F == 0x0F {
            return FeedEvent::Discard;
        }

        let line = pkt[1];
        if self.prev_line == Some(line) {
            // Line numbers must always advance within a segment.
            return FeedEvent::Garbage;
        }
        self.prev_line = Some(line);

        if line == 20 {
            let segment = pkt[0] >> 4;
            if !self.valid_region {
                if segment == 1 {
                    self.before_valid = false;
                    self.valid_region = true;
                }
            } else if !(2..=4).contains(&segment) {
                // Out-of-sequence segment: abort the frame, collect into
                // segment-1 positions again.
                self.valid_region = false;
                self.cur_segment = 1;
            }
        }

        // Data before the line-20 verdict is stored provisionally in
        // segment-1 positions; it is overwritten if the verdict fails.
        if (self.before_valid || self.valid_region) && line <= 59 {
            self.copy_packet(line, pkt);
        }

        if line == 59 {
            let mut frame_complete = false;
            if self.valid_region {
                if self.cur_segment < 4 {
                    self.cur_segment += 1;
                } else {
                    frame_complete = true;
                    self.cur_segment = 1;
                    self.valid_region = false;
                }
            }
            return FeedEvent::SegmentDone { frame_complete };
        }

        FeedEvent::Continue
    }

    /// Write 80 consecutive big-endian words at the segment-relative offset.
    fn copy_packet(&mut self, line: u8, pkt: &[u8; LEP_PKT_LEN]) {
        let base = (self.cur_segment as usize - 1) * SEG_ROWS * LEP_WIDTH
            + line as usize * PKT_WORDS;
        let dst = &mut self.pixels[base..base + PKT_WORDS];
        for (word, bytes) in dst.iter_mut().zip(pkt[4..].chunks_exact(2)) {
            *word = u16::from_be_bytes([bytes[0], bytes[1]]);
        }
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

// ── Telemetry ─────────────────────────────────────────────────

/// Word offsets within the telemetry block (row A/B fields condensed into
/// one 80-word block).
const TELEM_STATUS: usize = 1;
const TELEM_FPA_TEMP_K100: usize = 24;
const TELEM_HOUSING_TEMP_K100: usize = 26;
const TELEM_TLINEAR_RES: usize = 49;
const TELEM_GAIN_MODE: usize = 50;
const TELEM_EFFECTIVE_GAIN: usize = 51;

const STATUS_VALID: u16 = 0x0001;

/// The 80-word telemetry block captured alongside each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Telemetry {
    pub words: [u16; TELEMETRY_WORDS],
}

impl Telemetry {
    /// An all-zero (invalid) block.
    pub fn empty() -> Self {
        Self {
            words: [0; TELEMETRY_WORDS],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.words[TELEM_STATUS] & STATUS_VALID != 0
    }

    /// Build a block from sensor status values.
    pub fn from_status(
        fpa_temp_k100: u16,
        housing_temp_k100: u16,
        gain_mode: GainMode,
        effective_gain: Option<GainMode>,
        resolution: TlinearResolution,
    ) -> Self {
        let mut words = [0u16; TELEMETRY_WORDS];
        words[TELEM_STATUS] = STATUS_VALID;
        words[TELEM_FPA_TEMP_K100] = fpa_temp_k100;
        words[TELEM_HOUSING_TEMP_K100] = housing_temp_k100;
        words[TELEM_TLINEAR_RES] = match resolution {
            TlinearResolution::Deci => 0,
            TlinearResolution::Centi => 1,
        };
        words[TELEM_GAIN_MODE] = gain_mode as u16;
        words[TELEM_EFFECTIVE_GAIN] = match effective_gain {
            Some(GainMode::Low) => 1,
            Some(_) => 0,
            None => 0xFFFF,
        };
        Self { words }
    }

    pub fn fpa_temp_c(&self) -> f32 {
        self.words[TELEM_FPA_TEMP_K100] as f32 / 100.0 - 273.15
    }

    pub fn housing_temp_c(&self) -> f32 {
        self.words[TELEM_HOUSING_TEMP_K100] as f32 / 100.0 - 273.15
    }

    pub fn resolution(&self) -> TlinearResolution {
        if self.words[TELEM_TLINEAR_RES] == 0 {
            TlinearResolution::Deci
        } else {
            TlinearResolution::Centi
        }
    }

    pub fn gain_mode(&self) -> GainMode {
        GainMode::from_u8(self.words[TELEM_GAIN_MODE] as u8)
    }

    /// Effective gain from telemetry; `None` when the block never carried
    /// one (renders as `"UNKNOWN"` in records).
    pub fn effective_gain(&self) -> Option<GainMode> {
        match self.words[TELEM_EFFECTIVE_GAIN] {
            0 if self.is_valid() => Some(GainMode::High),
            1 => Some(GainMode::Low),
            _ => None,
        }
    }

    /// Big-endian byte image for record encoding (160 bytes).
    pub fn to_be_bytes(&self, out: &mut Vec<u8>) {
        crate::record::words_to_be_bytes(&self.words, out);
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::empty()
    }
}

// ── SPI transport ─────────────────────────────────────────────

/// SPI packet source for the dedicated Lepton bus (half-duplex, mode 3).
#[cfg(target_os = "espidf")]
pub struct LeptonSpi {
    device: esp_idf_svc::sys::spi_device_handle_t,
}

// SAFETY: the device handle is only ever used from the thermal task that
// owns the LeptonSpi.
#[cfg(target_os = "espidf")]
unsafe impl Send for LeptonSpi {}

#[cfg(target_os = "espidf")]
impl LeptonSpi {
    pub const SPI_FREQ_HZ: i32 = 16_000_000;

    /// Add the Lepton to the already-initialised HSPI bus.
    pub fn new(host: esp_idf_svc::sys::spi_host_device_t, cs_pin: i32) -> crate::error::Result<Self> {
        use esp_idf_svc::sys::*;
        let devcfg = spi_device_interface_config_t {
            clock_speed_hz: Self::SPI_FREQ_HZ,
            mode: 3,
            spics_io_num: cs_pin,
            queue_size: 1,
            flags: SPI_DEVICE_HALFDUPLEX,
            cs_ena_pretrans: 10,
            ..Default::default()
        };
        let mut device: spi_device_handle_t = core::ptr::null_mut();
        // SAFETY: devcfg outlives the call; the bus was initialised at boot.
        let ret = unsafe { spi_bus_add_device(host, &devcfg, &mut device) };
        if ret != ESP_OK {
            return Err(crate::error::Error::Init("failed to add lepton spi device"));
        }
        Ok(Self { device })
    }
}

#[cfg(target_os = "espidf")]
impl PacketSource for LeptonSpi {
    fn read_packet(&mut self, pkt: &mut [u8; LEP_PKT_LEN]) -> Result<(), ImagerError> {
        use esp_idf_svc::sys::*;
        let mut trans: spi_transaction_t = unsafe { core::mem::zeroed() };
        trans.rxlength = (LEP_PKT_LEN * 8) as usize;
        trans.__bindgen_anon_2.rx_buffer = pkt.as_mut_ptr() as *mut _;
        // Queued transactions panic when a task yields mid-transfer; the
        // blocking call costs a little throughput and works.
        // SAFETY: trans and the rx buffer are valid for the call duration.
        let ret = unsafe { spi_device_transmit(self.device, &mut trans) };
        if ret == ESP_OK {
            Ok(())
        } else {
            Err(ImagerError::SpiTransfer)
        }
    }
}

/// Host stand-in for the sensor: emits an endless, well-formed VoSPI stream
/// with a fixed gradient scene.
#[cfg(not(target_os = "espidf"))]
pub struct SimLepton {
    segment: u8,
    line: u8,
}

#[cfg(not(target_os = "espidf"))]
impl SimLepton {
    pub fn new() -> Self {
        Self {
            segment: 1,
            line: 0,
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for SimLepton {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl PacketSource for SimLepton {
    fn read_packet(&mut self, pkt: &mut [u8; LEP_PKT_LEN]) -> Result<(), ImagerError> {
        pkt.fill(0);
        pkt[0] = self.segment << 4;
        pkt[1] = self.line;
        // Room-temperature TLinear gradient (0.01 K counts).
        let row = (self.segment as u16 - 1) * SEG_ROWS as u16 + self.line as u16 / 2;
        for (i, chunk) in pkt[4..].chunks_exact_mut(2).enumerate() {
            let v = 29_515 + row * 4 + i as u16;
            chunk.copy_from_slice(&v.to_be_bytes());
        }

        self.line += 1;
        if self.line == 60 {
            self.line = 0;
            self.segment = if self.segment == 4 { 1 } else { self.segment + 1 };
        }
        Ok(())
    }
}
