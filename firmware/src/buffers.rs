//! Shared image buffers with notification-gated ownership.
//!
//! All four buffers are allocated once at boot and live until shutdown.
//! The mutexes provide memory safety; *ownership* is carried by the signal
//! protocol: an imager owns its frame slot between request and
//! frame-signal, the orchestrator owns it between frame-signal and
//! display-done, and the two text buffers are each single-producer
//! (orchestrator) single-consumer.  Nothing polls — a consumer touches a
//! buffer only after the corresponding signal.

use std::sync::Mutex;

use crate::drivers::ov2640::CAM_MAX_JPEG_LEN;
use crate::drivers::vospi::{Telemetry, LEP_NUM_PIXELS};

/// Capacity of the record-text and response buffers: base64 of a maximum
/// JPEG plus the radiometric and telemetry payloads, metadata and JSON
/// overhead.
pub const TEXT_BUF_LEN: usize = 160 * 1024;

/// One completed radiometric frame plus its telemetry.
pub struct ThermalFrame {
    pub pixels: Box<[u16]>,
    pub telemetry: Telemetry,
}

impl ThermalFrame {
    fn new() -> Self {
        Self {
            pixels: vec![0u16; LEP_NUM_PIXELS].into_boxed_slice(),
            telemetry: Telemetry::empty(),
        }
    }
}

/// One captured JPEG and its actual length.
pub struct VisualFrame {
    pub jpeg: Box<[u8]>,
    pub len: usize,
}

impl VisualFrame {
    fn new() -> Self {
        Self {
            jpeg: vec![0u8; CAM_MAX_JPEG_LEN].into_boxed_slice(),
            len: 0,
        }
    }
}

/// Preallocated byte buffer for assembled record text.
pub struct TextBuffer {
    data: Vec<u8>,
}

impl TextBuffer {
    fn new() -> Self {
        Self {
            data: Vec::with_capacity(TEXT_BUF_LEN),
        }
    }

    /// Replace the contents.  Fails (without touching the buffer) when the
    /// payload exceeds the preallocated capacity.
    pub fn set(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > TEXT_BUF_LEN {
            return false;
        }
        self.data.clear();
        self.data.extend_from_slice(bytes);
        true
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The named shared buffers of the acquisition pipeline.
pub struct SharedBuffers {
    pub thermal: Mutex<ThermalFrame>,
    pub visual: Mutex<VisualFrame>,
    /// Record text bound for the file recorder.
    pub image_text: Mutex<TextBuffer>,
    /// Framed record text bound for the command responder.
    pub response: Mutex<TextBuffer>,
}

impl SharedBuffers {
    pub fn new() -> Self {
        Self {
            thermal: Mutex::new(ThermalFrame::new()),
            visual: Mutex::new(VisualFrame::new()),
            image_text: Mutex::new(TextBuffer::new()),
            response: Mutex::new(TextBuffer::new()),
        }
    }
}

impl Default for SharedBuffers {
    fn default() -> Self {
        Self::new()
    }
}
