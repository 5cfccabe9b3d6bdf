//! The persistent parameter store as an owning activity.
//!
//! Exactly one task touches the RTC SRAM: [`StoreTask`] owns the shadow
//! array and the DS3232 handle, and every other activity goes through a
//! cloneable [`StoreHandle`].  Reads are snapshot replies; writes are
//! change-set messages.  This replaces the original's "only one task writes
//! at a time" convention with something the compiler enforces.
//!
//! Device writes push only the dirtied region plus the checksum byte, to
//! keep I2C bus-lock time short.

pub mod layout;

use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender};
use std::sync::Arc;

use log::{error, info};

use crate::clock::ds3232::{Ds3232, SRAM_SIZE};
use crate::clock::time::TmElements;
use crate::config::OpState;
use crate::error::StoreError;
use crate::net::wifi::WifiInfo;
use layout::{PsArray, Span, SPAN_FULL};

/// Read-only view of everything the store holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub wifi: WifiInfo,
    pub rec_enable: bool,
    pub op: OpState,
}

enum Request {
    Snapshot(SyncSender<Snapshot>),
    SetWifi(WifiInfo),
    SetRecEnable(bool),
    SetOpState(OpState),
    /// RTC time write, routed here so only the store task drives the chip.
    SetTime(TmElements),
}

/// Cheap cloneable handle to the store task.
#[derive(Clone)]
pub struct StoreHandle {
    tx: Sender<Request>,
}

impl StoreHandle {
    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let (reply_tx, reply_rx) = sync_channel(1);
        self.tx
            .send(Request::Snapshot(reply_tx))
            .map_err(|_| StoreError::TaskGone)?;
        reply_rx.recv().map_err(|_| StoreError::TaskGone)
    }

    pub fn set_wifi(&self, info: WifiInfo) -> Result<(), StoreError> {
        self.tx
            .send(Request::SetWifi(info))
            .map_err(|_| StoreError::TaskGone)
    }

    pub fn set_rec_enable(&self, en: bool) -> Result<(), StoreError> {
        self.tx
            .send(Request::SetRecEnable(en))
            .map_err(|_| StoreError::TaskGone)
    }

    pub fn set_op_state(&self, op: OpState) -> Result<(), StoreError> {
        self.tx
            .send(Request::SetOpState(op))
            .map_err(|_| StoreError::TaskGone)
    }

    pub fn set_time(&self, te: TmElements) -> Result<(), StoreError> {
        self.tx
            .send(Request::SetTime(te))
            .map_err(|_| StoreError::TaskGone)
    }
}

/// The owning store activity.
pub struct StoreTask {
    rtc: Arc<Ds3232>,
    shadow: PsArray,
    rx: Receiver<Request>,
}

impl StoreTask {
    /// Load the shadow array from the RTC SRAM and validate it; a bad magic
    /// word or checksum reinitialises everything from defaults, and a
    /// version-1 layout is upgraded in place.
    pub fn new(rtc: Arc<Ds3232>, mac: [u8; 6]) -> Result<(Self, StoreHandle), StoreError> {
        let mut bytes = [0u8; SRAM_SIZE];
        rtc.read_sram(&mut bytes)?;
        let mut shadow = PsArray::new(bytes);

        if !shadow.is_valid() {
            info!("initialize persistent storage with default values");
            shadow.init_defaults(mac);
            write_span(&rtc, &shadow, SPAN_FULL)?;
        } else if shadow.version() == 1 {
            info!("upgrading persistent storage from version 1");
            shadow.upgrade_from_v1();
            write_span(&rtc, &shadow, SPAN_FULL)?;
        }

        let (tx, rx) = channel();
        Ok((Self { rtc, shadow, rx }, StoreHandle { tx }))
    }

    /// Serve requests until every handle is dropped.
    pub fn run(mut self) {
        while let Ok(req) = self.rx.recv() {
            self.handle(req);
        }
    }

    fn handle(&mut self, req: Request) {
        match req {
            Request::Snapshot(reply) => {
                let (op, repair_span) = self.shadow.op_state();
                if let Some(span) = repair_span {
                    self.commit(span);
                }
                let snap = Snapshot {
                    wifi: self.shadow.wifi_info(),
                    rec_enable: self.shadow.rec_enable(),
                    op,
                };
                // A dead requester is its own problem.
                let _ = reply.send(snap);
            }
            Request::SetWifi(info) => {
                let span = self.shadow.set_wifi_info(&info);
                self.commit(span);
            }
            Request::SetRecEnable(en) => {
                let span = self.shadow.set_rec_enable(en);
                self.commit(span);
            }
            Request::SetOpState(op) => {
                let span = self.shadow.set_op_state(&op);
                self.commit(span);
            }
            Request::SetTime(te) => {
                if crate::clock::time_set(&self.rtc, &te).is_err() {
                    error!("failed to update RTC time");
                }
            }
        }
    }

    fn commit(&mut self, span: Span) {
        if let Err(e) = write_span(&self.rtc, &self.shadow, span) {
            error!("failed to write persistent data to RTC SRAM: {e}");
        }
    }

    /// Test access to the shadow array.
    #[cfg(test)]
    fn shadow(&self) -> &PsArray {
        &self.shadow
    }
}

fn write_span(rtc: &Ds3232, shadow: &PsArray, span: Span) -> Result<(), StoreError> {
    rtc.write_sram(span.start, &shadow.0[span.start..span.start + span.len])?;
    if span.len < SRAM_SIZE {
        rtc.write_sram(SRAM_SIZE - 1, &shadow.0[SRAM_SIZE - 1..])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const MAC: [u8; 6] = [0x24, 0x6F, 0x28, 0xAA, 0x1B, 0xC3];

    fn spawn_store(rtc: Arc<Ds3232>) -> StoreHandle {
        let (task, handle) = StoreTask::new(rtc, MAC).unwrap();
        thread::spawn(move || task.run());
        handle
    }

    #[test]
    fn cold_boot_initialises_defaults() {
        let rtc = Arc::new(Ds3232::new());
        let handle = spawn_store(Arc::clone(&rtc));
        let snap = handle.snapshot().unwrap();
        assert_eq!(snap.wifi.ap_ssid.as_str(), "firecam-1BC4");
        assert!(!snap.rec_enable);
        assert_eq!(snap.op, OpState::default());

        // The device copy is complete and self-consistent.
        let mut bytes = [0u8; SRAM_SIZE];
        rtc.read_sram(&mut bytes).unwrap();
        assert!(PsArray::new(bytes).is_valid());
    }

    #[test]
    fn writes_survive_a_restart() {
        let rtc = Arc::new(Ds3232::new());
        {
            let handle = spawn_store(Arc::clone(&rtc));
            handle.set_rec_enable(true).unwrap();
            let mut op = OpState::default();
            op.record_interval = 60;
            handle.set_op_state(op).unwrap();
            // Synchronise on the queue before "rebooting".
            let _ = handle.snapshot().unwrap();
        }

        // Second boot over the same device state.
        let (task, _handle) = StoreTask::new(Arc::clone(&rtc), MAC).unwrap();
        assert!(task.shadow().is_valid());
        let (task_op, _) = {
            let mut shadow = PsArray::new(task.shadow().0);
            shadow.op_state()
        };
        assert!(task.shadow().rec_enable());
        assert_eq!(task_op.record_interval, 60);
    }

    #[test]
    fn corrupted_device_state_reinitialises() {
        let rtc = Arc::new(Ds3232::new());
        rtc.write_sram(0, &[0xDE, 0xAD]).unwrap();
        let handle = spawn_store(Arc::clone(&rtc));
        let snap = handle.snapshot().unwrap();
        assert_eq!(snap.op, OpState::default());
        let mut bytes = [0u8; SRAM_SIZE];
        rtc.read_sram(&mut bytes).unwrap();
        assert!(PsArray::new(bytes).is_valid());
    }

    #[test]
    fn set_wifi_masks_flags_to_user_bits() {
        let rtc = Arc::new(Ds3232::new());
        let handle = spawn_store(rtc);
        let mut info = handle.snapshot().unwrap().wifi;
        info.flags = 145; // bits 7, 4, 0 — plus nothing else survives
        handle.set_wifi(info).unwrap();
        assert_eq!(handle.snapshot().unwrap().wifi.flags, 0x91);
    }
}
