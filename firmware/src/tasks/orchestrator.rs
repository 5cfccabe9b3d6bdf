//! Orchestrator: the one-hertz frame-assembly rhythm and the recording
//! state machine.
//!
//! Runs a 50 ms tick.  At each top-of-second it asks both imagers for a
//! frame (skipping an imager whose previous frame the display has not yet
//! consumed), then waits for both to report — or for the 800 ms assembly
//! deadline — and builds the composite record from whatever arrived.
//! Completed records fan out to three independent consumers: the display
//! (per-imager, as frames arrive), the file recorder (when the recording
//! interval elapses) and the command responder (when a remote image request
//! is pending).
//!
//! Recording state survives crashes: the persistent auto-resume flag is set
//! on record start and cleared only by a clean stop, so a reboot — including
//! the deliberate one after a fatal write fault — resumes recording.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use crate::clock::time::{self, SecondTicker};
use crate::record::{self, LeptonMeta, RecordMeta};
use crate::signals::{app, cmd, file, gui, imager, Pending};
use crate::tasks::{CoreContext, SystemCtl};

/// Evaluation tick.
pub const EVAL_MSEC: u64 = 50;
/// Maximum wait within a one-second window before assembling whatever has
/// arrived.  Divisible by the tick.
pub const MAX_WAIT_MSEC: u64 = 800;
/// Settle time for the poweroff screen before the hold line drops.
const SHUTDOWN_PAINT_MSEC: u64 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleState {
    WaitTos,
    WaitImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReqState {
    Idle,
    Requested,
    Received,
    Failed,
}

pub struct Orchestrator {
    state: CycleState,
    ticker: SecondTicker,
    msec_count: u64,

    cam_req: ReqState,
    lep_req: ReqState,
    cam_gui_pending: bool,
    lep_gui_pending: bool,

    sdcard_present: bool,
    recording: bool,
    file_send_pending: bool,
    rec_arducam_en: bool,
    rec_lepton_en: bool,
    rec_seq_num: u32,
    rec_interval: u16,
    rec_interval_cnt: u16,

    cmd_requesting: bool,
    cmd_send_pending: bool,

    shutdown_requested: bool,

    // Payload scratch, reused every cycle.
    rad_scratch: Vec<u8>,
    telem_scratch: Vec<u8>,
}

impl Orchestrator {
    /// Build the orchestrator and, when the auto-resume flag is set from a
    /// previous life, self-send a start-record signal.
    pub fn new(ctx: &CoreContext) -> Self {
        let mut orch = Self {
            state: CycleState::WaitTos,
            ticker: SecondTicker::new(),
            msec_count: 0,
            cam_req: ReqState::Idle,
            lep_req: ReqState::Idle,
            cam_gui_pending: false,
            lep_gui_pending: false,
            sdcard_present: false,
            recording: false,
            file_send_pending: false,
            rec_arducam_en: true,
            rec_lepton_en: true,
            rec_seq_num: 0,
            rec_interval: 1,
            rec_interval_cnt: 0,
            cmd_requesting: false,
            cmd_send_pending: false,
            shutdown_requested: false,
            rad_scratch: Vec::new(),
            telem_scratch: Vec::new(),
        };

        if let Ok(snap) = ctx.store.snapshot() {
            orch.rec_arducam_en = snap.op.rec_arducam_enable;
            orch.rec_lepton_en = snap.op.rec_lepton_enable;
            orch.rec_interval = snap.op.record_interval;
            if snap.rec_enable {
                info!("restarting recording on powerup");
                ctx.sig.orchestrator.notify(app::START_RECORD);
            }
        }
        orch
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Act on one drained signal word.
    pub fn handle_signals(&mut self, ctx: &CoreContext, sys: &dyn SystemCtl, pending: Pending) {
        if pending.is_empty() {
            return;
        }

        if pending.has(app::SHUTDOWN) {
            if self.recording {
                self.stop_recording(ctx, sys, false);
            }
            self.shutdown_requested = true;
            // The run loop paints the poweroff screen and releases power.
            return;
        }

        // ── Visual imager ─────────────────────────────────────
        if pending.has(app::CAM_FRAME) {
            self.cam_req = ReqState::Received;
            if !self.cam_gui_pending {
                ctx.sig.display.notify(gui::CAM_FRAME);
                self.cam_gui_pending = true;
            }
        }
        if pending.has(app::CAM_FAIL) {
            self.cam_req = ReqState::Failed;
        }
        if pending.has(app::GUI_CAM_DONE) {
            self.cam_gui_pending = false;
        }

        // ── Thermal imager ────────────────────────────────────
        if pending.has(app::LEP_FRAME) {
            self.lep_req = ReqState::Received;
            if !self.lep_gui_pending {
                ctx.sig.display.notify(gui::LEP_FRAME);
                self.lep_gui_pending = true;
            }
        }
        if pending.has(app::LEP_FAIL) {
            self.lep_req = ReqState::Failed;
        }
        if pending.has(app::GUI_LEP_DONE) {
            self.lep_gui_pending = false;
        }

        // ── Record control ────────────────────────────────────
        if pending.has(app::RECORD_BTN) {
            if self.recording {
                self.stop_recording(ctx, sys, false);
            } else {
                self.start_recording(ctx, true);
            }
        }
        if pending.has(app::RECORD_PARM_UPD) {
            if let Ok(snap) = ctx.store.snapshot() {
                self.rec_arducam_en = snap.op.rec_arducam_enable;
                self.rec_lepton_en = snap.op.rec_lepton_enable;
                self.rec_interval = snap.op.record_interval;
            }
        }

        // ── Card and file recorder ────────────────────────────
        if pending.has(app::SDCARD_PRESENT) {
            self.sdcard_present = true;
        }
        if pending.has(app::SDCARD_MISSING) {
            self.sdcard_present = false;
        }
        if pending.has(app::RECORD_START) {
            self.recording = true;
            ctx.recording.store(true, Ordering::Relaxed);
            self.rec_seq_num = 1;
            self.rec_interval_cnt = 0;
            let _ = ctx.store.set_rec_enable(true);
            ctx.sig.display.notify(gui::LED_ON);
        }
        if pending.has(app::RECORD_NOSTART) {
            error!("recording session did not start");
        }
        if pending.has(app::RECORD_FAIL) {
            self.stop_recording(ctx, sys, true);
        }
        if pending.has(app::RECORD_IMG_DONE) {
            self.file_send_pending = false;
            // A final image-done arrives after a stop for the last file;
            // only a live session advances the counters.
            if self.recording {
                self.rec_seq_num += 1;
                ctx.sig.display.notify(gui::INC_REC);
            }
        }

        // ── Remote commands ───────────────────────────────────
        if pending.has(app::START_RECORD) {
            self.start_recording(ctx, false);
        }
        if pending.has(app::STOP_RECORD) {
            self.stop_recording(ctx, sys, false);
        }
        if pending.has(app::CMD_REQ) {
            self.cmd_requesting = true;
        }
        if pending.has(app::CMD_DONE) {
            self.cmd_send_pending = false;
        }

        // ── Wi-Fi reconfiguration ─────────────────────────────
        if pending.has(app::NEW_WIFI) {
            let reinit = match ctx.store.snapshot() {
                Ok(snap) => ctx.wifi.lock().unwrap().reinit(snap.wifi).is_ok(),
                Err(_) => false,
            };
            if !reinit {
                *ctx.msg_box.lock().unwrap() =
                    "Could not restart WiFi with the new configuration".into();
                ctx.sig.display.notify(gui::MESSAGEBOX);
            }
        }
    }

    /// One 50 ms evaluation of the cycle state machine.
    pub fn tick(&mut self, ctx: &CoreContext) {
        match self.state {
            CycleState::WaitTos => {
                if self.ticker.changed() {
                    self.msec_count = 0;
                    self.state = CycleState::WaitImage;

                    // Request a new frame only when the display has consumed
                    // the previous one; the buffers are shared.
                    if !self.cam_gui_pending {
                        ctx.sig.visual.notify(imager::GET_FRAME);
                        self.cam_req = ReqState::Requested;
                    } else {
                        self.cam_req = ReqState::Idle;
                    }
                    if !self.lep_gui_pending {
                        ctx.sig.thermal.notify(imager::GET_FRAME);
                        self.lep_req = ReqState::Requested;
                    } else {
                        self.lep_req = ReqState::Idle;
                    }
                }
            }

            CycleState::WaitImage => {
                if self.cam_req == ReqState::Received && self.lep_req == ReqState::Received {
                    // Both arrived: serve demand early, prioritising the
                    // recorder.
                    let recorder_ready = !self.file_send_pending && self.recording;
                    let responder_ready =
                        !self.recording && !self.cmd_send_pending && self.cmd_requesting;
                    if recorder_ready || responder_ready {
                        self.process_images(ctx, true, true);
                    }
                    self.state = CycleState::WaitTos;
                } else if self.msec_count >= MAX_WAIT_MSEC {
                    // Deadline: assemble whatever is here.
                    if self.recording || self.cmd_requesting {
                        self.process_images(
                            ctx,
                            self.cam_req == ReqState::Received,
                            self.lep_req == ReqState::Received,
                        );
                    }
                    self.state = CycleState::WaitTos;
                }
            }
        }
    }

    fn start_recording(&mut self, ctx: &CoreContext, from_gui: bool) {
        if self.recording {
            return;
        }
        if self.sdcard_present {
            ctx.sig.recorder.notify(file::START_RECORDING);
        } else if from_gui {
            *ctx.msg_box.lock().unwrap() = "Please insert a SD Card".into();
            ctx.sig.display.notify(gui::MESSAGEBOX);
        }
    }

    fn stop_recording(&mut self, ctx: &CoreContext, sys: &dyn SystemCtl, en_restart: bool) {
        if !self.recording {
            return;
        }
        self.recording = false;
        ctx.recording.store(false, Ordering::Relaxed);
        self.rec_seq_num = 0;
        self.rec_interval_cnt = 0;

        ctx.sig.recorder.notify(file::STOP_RECORDING);
        ctx.sig.display.notify(gui::LED_OFF);
        ctx.sig.display.notify(gui::CLR_REC);

        if !en_restart {
            // Normal stop: recording must not resume on the next boot.
            let _ = ctx.store.set_rec_enable(false);
        } else {
            // The auto-resume flag stays set; reboot and try again.
            error!("recording session failed - rebooting system");
            std::thread::sleep(Duration::from_millis(10));
            sys.restart();
        }
    }

    /// Assemble the composite record and fan it out.
    fn process_images(&mut self, ctx: &CoreContext, valid_cam: bool, valid_lep: bool) {
        let process_cam = valid_cam && (!self.recording || self.rec_arducam_en);
        let process_lep = valid_lep && (!self.recording || self.rec_lepton_en);

        let Ok(snap) = ctx.store.snapshot() else {
            return;
        };
        let batt = ctx.readings.batt();
        let te = time::now();

        let thermal = ctx.buf.thermal.lock().unwrap();
        let visual = ctx.buf.visual.lock().unwrap();

        let lepton = process_lep.then(|| {
            let t = &thermal.telemetry;
            LeptonMeta {
                fpa_temp_c: t.fpa_temp_c(),
                aux_temp_c: t.housing_temp_c(),
                lens_temp_c: ctx.readings.temp_c(),
                gain_mode: t.effective_gain(),
                resolution: t.resolution(),
            }
        });

        let meta = RecordMeta {
            camera: snap.wifi.active_ssid(),
            version: ctx.version,
            seq_num: self.rec_seq_num,
            te,
            batt,
            lepton,
        };

        let (radiometric, telemetry) = if process_lep {
            record::words_to_be_bytes(&thermal.pixels, &mut self.rad_scratch);
            thermal.telemetry.to_be_bytes(&mut self.telem_scratch);
            (
                Some(self.rad_scratch.as_slice()),
                Some(self.telem_scratch.as_slice()),
            )
        } else {
            (None, None)
        };
        let jpeg = process_cam.then(|| &visual.jpeg[..visual.len]);

        let json = record::build_image_record(&meta, jpeg, radiometric, telemetry);
        drop(visual);
        drop(thermal);

        // Recorder branch.
        if self.recording {
            self.rec_interval_cnt += 1;
            if self.rec_interval_cnt >= self.rec_interval && !self.file_send_pending {
                self.rec_interval_cnt = 0;
                if ctx.buf.image_text.lock().unwrap().set(json.as_bytes()) {
                    ctx.sig.recorder.notify(file::NEW_IMAGE);
                    self.file_send_pending = true;
                } else {
                    error!("record text too large for the image file buffer");
                }
            }
        }

        // Responder branch.
        if !self.cmd_send_pending && self.cmd_requesting {
            let framed = crate::proto::commands::frame(&json);
            if ctx.buf.response.lock().unwrap().set(&framed) {
                ctx.sig.responder.notify(cmd::IMAGE_READY);
                self.cmd_send_pending = true;
            } else {
                error!("record text too large for the response buffer");
            }
            self.cmd_requesting = false;
        }
    }

    /// One evaluation step: drain signals, advance the cycle state machine,
    /// account the elapsed tick.  The caller sleeps [`EVAL_MSEC`] between
    /// steps.
    pub fn step(&mut self, ctx: &CoreContext, sys: &dyn SystemCtl) {
        let pending = ctx.sig.orchestrator.take();
        self.handle_signals(ctx, sys, pending);
        if self.shutdown_requested {
            return;
        }
        self.tick(ctx);
        self.msec_count += EVAL_MSEC;
    }

    /// Task loop.
    pub fn run(mut self, ctx: Arc<CoreContext>, sys: &dyn SystemCtl) {
        info!("start task");
        // Let the other tasks come up first.
        std::thread::sleep(Duration::from_millis(100));

        loop {
            self.step(&ctx, sys);

            if self.shutdown_requested {
                // Give the display a moment to paint the poweroff screen,
                // then drop the hold line.  The user may still be pressing
                // the button and keeping us alive, so spin afterwards.
                ctx.sig.display.notify(gui::SHUTDOWN);
                std::thread::sleep(Duration::from_millis(SHUTDOWN_PAINT_MSEC));
                sys.power_off();
                loop {
                    std::thread::sleep(Duration::from_secs(1));
                }
            }

            std::thread::sleep(Duration::from_millis(EVAL_MSEC));
        }
    }
}
