//! Inter-activity signalling: per-activity 32-bit event bitsets.
//!
//! Every activity owns one [`SignalSet`].  Producers set bits (idempotent —
//! signalling the same event twice before the consumer runs delivers it
//! once); the owning activity drains all pending bits atomically with
//! [`SignalSet::take`] or blocks on [`SignalSet::wait`].  This reproduces the
//! at-most-once coalescing semantics of the original task-notification
//! scheme while keeping the event kinds typed.
//!
//! Event kinds are plain enums with a fixed mask per variant.  A drained
//! `u32` is interrogated with [`Pending::has`], so a consumer handles every
//! coalesced event from a single drain.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A drained set of signal bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending(pub u32);

impl Pending {
    pub fn has(self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// One activity's incoming signal word.
#[derive(Default)]
pub struct SignalSet {
    bits: Mutex<u32>,
    cv: Condvar,
}

impl SignalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bits.  Safe from any thread; wakes the owning activity.
    pub fn notify(&self, mask: u32) {
        let mut bits = self.bits.lock().unwrap();
        *bits |= mask;
        self.cv.notify_one();
    }

    /// Drain all pending bits without blocking.
    pub fn take(&self) -> Pending {
        let mut bits = self.bits.lock().unwrap();
        let p = Pending(*bits);
        *bits = 0;
        p
    }

    /// Block until at least one bit is set, then drain.
    pub fn wait(&self) -> Pending {
        let mut bits = self.bits.lock().unwrap();
        while *bits == 0 {
            bits = self.cv.wait(bits).unwrap();
        }
        let p = Pending(*bits);
        *bits = 0;
        p
    }

    /// Block up to `timeout` for a bit, then drain whatever is pending
    /// (possibly nothing).
    pub fn wait_timeout(&self, timeout: Duration) -> Pending {
        let mut bits = self.bits.lock().unwrap();
        if *bits == 0 {
            let (guard, _result) = self.cv.wait_timeout(bits, timeout).unwrap();
            bits = guard;
        }
        let p = Pending(*bits);
        *bits = 0;
        p
    }
}

// ── Orchestrator signals ──────────────────────────────────────

pub mod app {
    pub const SHUTDOWN: u32 = 0x0000_0001;
    pub const NEW_WIFI: u32 = 0x0000_0002;
    pub const SDCARD_PRESENT: u32 = 0x0000_0004;
    pub const SDCARD_MISSING: u32 = 0x0000_0008;
    pub const RECORD_BTN: u32 = 0x0000_0010;
    pub const START_RECORD: u32 = 0x0000_0020;
    pub const STOP_RECORD: u32 = 0x0000_0040;
    pub const RECORD_START: u32 = 0x0000_0100;
    pub const RECORD_NOSTART: u32 = 0x0000_0200;
    pub const RECORD_FAIL: u32 = 0x0000_0400;
    pub const RECORD_IMG_DONE: u32 = 0x0000_0800;
    pub const CAM_FRAME: u32 = 0x0000_1000;
    pub const CAM_FAIL: u32 = 0x0000_2000;
    pub const LEP_FRAME: u32 = 0x0000_4000;
    pub const LEP_FAIL: u32 = 0x0000_8000;
    pub const GUI_CAM_DONE: u32 = 0x0001_0000;
    pub const GUI_LEP_DONE: u32 = 0x0002_0000;
    pub const CMD_REQ: u32 = 0x0004_0000;
    pub const CMD_DONE: u32 = 0x0008_0000;
    pub const RECORD_PARM_UPD: u32 = 0x0010_0000;
}

// ── Imager driver signals ─────────────────────────────────────

pub mod imager {
    pub const GET_FRAME: u32 = 0x0000_0001;
}

// ── File recorder signals ─────────────────────────────────────

pub mod file {
    pub const START_RECORDING: u32 = 0x0000_0001;
    pub const STOP_RECORDING: u32 = 0x0000_0002;
    pub const NEW_IMAGE: u32 = 0x0000_0004;
}

// ── Command responder signals ─────────────────────────────────

pub mod cmd {
    pub const IMAGE_READY: u32 = 0x0000_0001;
}

// ── Display signals ───────────────────────────────────────────

pub mod gui {
    pub const SHUTDOWN: u32 = 0x0000_0001;
    pub const LEP_FRAME: u32 = 0x0000_0002;
    pub const CAM_FRAME: u32 = 0x0000_0004;
    pub const LED_ON: u32 = 0x0000_0010;
    pub const LED_OFF: u32 = 0x0000_0020;
    pub const INC_REC: u32 = 0x0000_0040;
    pub const CLR_REC: u32 = 0x0000_0080;
    pub const MESSAGEBOX: u32 = 0x0000_1000;
}

/// The full set of activity signal words, one per long-lived activity.
/// Constructed once at boot and shared by reference.
#[derive(Default)]
pub struct Signals {
    pub orchestrator: SignalSet,
    pub thermal: SignalSet,
    pub visual: SignalSet,
    pub recorder: SignalSet,
    pub responder: SignalSet,
    pub display: SignalSet,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn take_drains_and_clears() {
        let s = SignalSet::new();
        s.notify(app::CAM_FRAME);
        s.notify(app::LEP_FRAME);
        let p = s.take();
        assert!(p.has(app::CAM_FRAME));
        assert!(p.has(app::LEP_FRAME));
        assert!(!p.has(app::SHUTDOWN));
        assert!(s.take().is_empty());
    }

    #[test]
    fn set_is_idempotent() {
        let s = SignalSet::new();
        s.notify(app::CMD_REQ);
        s.notify(app::CMD_REQ);
        let p = s.take();
        assert_eq!(p.0, app::CMD_REQ);
    }

    #[test]
    fn wait_timeout_returns_empty_when_nothing_arrives() {
        let s = SignalSet::new();
        let p = s.wait_timeout(Duration::from_millis(10));
        assert!(p.is_empty());
    }

    #[test]
    fn wait_wakes_on_notify_from_another_thread() {
        let s = Arc::new(SignalSet::new());
        let s2 = Arc::clone(&s);
        let handle = thread::spawn(move || s2.wait());
        thread::sleep(Duration::from_millis(20));
        s.notify(file::NEW_IMAGE);
        let p = handle.join().unwrap();
        assert!(p.has(file::NEW_IMAGE));
    }

    #[test]
    fn concurrent_kinds_coalesce_into_one_drain() {
        let s = SignalSet::new();
        s.notify(app::SDCARD_PRESENT);
        s.notify(app::RECORD_IMG_DONE);
        s.notify(app::GUI_CAM_DONE);
        let p = s.take();
        assert!(p.has(app::SDCARD_PRESENT));
        assert!(p.has(app::RECORD_IMG_DONE));
        assert!(p.has(app::GUI_CAM_DONE));
    }
}
