//! File recorder: card presence, session lifecycle and bounded-write file
//! emission.
//!
//! Sessions are timestamped directories; files inside are grouped into
//! `group_NNNN` subdirectories of at most 100 entries so FAT directory
//! traversal cost stays flat.  The grouping is a performance invariant
//! only — consumers order files by the `img_MMMMM` sequence number alone.
//!
//! Card presence is probed every ~2 s while idle and never while recording
//! (a spuriously failing probe would race a legitimate write).  Any
//! non-progressing open or write reports a fatal failure; there is no
//! retry here — the orchestrator owns the recovery policy.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use crate::clock::time;
use crate::drivers::sdcard::SdCard;
use crate::error::CardError;
use crate::signals::{app, file};
use crate::tasks::CoreContext;

const EVAL_MSEC: u64 = 50;
/// Period between idle card-presence probes.
const CARD_CHECK_PERIOD_MSEC: u64 = 2000;
/// Per-call write bound, to limit stack/heap pressure and give the
/// filesystem driver room to progress.
pub const MAX_FILE_WRITE_LEN: usize = 4096;
/// Files per `group_NNNN` subdirectory.
pub const FILES_PER_SUBDIRECTORY: u32 = 100;

/// `group_NNNN` index for a file sequence number.
pub fn group_index(seq_num: u32) -> u32 {
    seq_num / FILES_PER_SUBDIRECTORY
}

pub fn group_dir_name(index: u32) -> String {
    format!("group_{index:04}")
}

pub fn image_file_name(seq_num: u32) -> String {
    format!("img_{seq_num:05}.json")
}

/// `session_YY_MM_DD_HH_MM_SS` from the current wall time.
pub fn session_dir_name() -> String {
    format!("session_{}", time::short_string(&time::now()))
}

pub struct Recorder {
    card: SdCard,
    recording: bool,
    session_path: PathBuf,
    seq_num: u32,
    /// Last group subdirectory created; -1 forces creation on first write.
    cur_group: i64,
    card_check_count: u32,
}

impl Recorder {
    pub fn new(card: SdCard) -> Self {
        Self {
            card,
            recording: false,
            session_path: PathBuf::new(),
            seq_num: 0,
            cur_group: -1,
            card_check_count: (CARD_CHECK_PERIOD_MSEC / EVAL_MSEC) as u32,
        }
    }

    pub fn card_present(&self) -> bool {
        self.card.present()
    }

    /// Mount the card and create the session directory.  A directory left
    /// over from the same timestamp is reused without error.
    pub fn setup_session(&mut self) -> Result<(), CardError> {
        if !self.card.present() {
            error!("attempted to start recording without a card - internal logic error");
            return Err(CardError::NotPresent);
        }
        self.card.mount()?;

        let dir = session_dir_name();
        let path = self.card.root().join(&dir);
        match fs::metadata(&path) {
            Ok(_) => {}
            Err(_) => {
                fs::create_dir_all(&path)
                    .map_err(|_| CardError::Directory(dir.clone()))?;
            }
        }

        self.session_path = path;
        self.cur_group = -1;
        self.seq_num = 1;
        self.recording = true;
        info!("start recording session: {dir}");
        Ok(())
    }

    /// Write one image record, creating the group subdirectory when the
    /// sequence number crosses a 100-file boundary.
    pub fn write_image(&mut self, record_text: &[u8]) -> Result<(), CardError> {
        let group = group_index(self.seq_num);
        if group as i64 != self.cur_group {
            let group_path = self.session_path.join(group_dir_name(group));
            if fs::metadata(&group_path).is_err() {
                fs::create_dir_all(&group_path)
                    .map_err(|_| CardError::Directory(group_dir_name(group)))?;
            }
            self.cur_group = group as i64;
        }

        let file_path = self
            .session_path
            .join(group_dir_name(group))
            .join(image_file_name(self.seq_num));
        let mut fp = File::create(&file_path)
            .map_err(|_| CardError::Write(file_path.display().to_string()))?;

        let mut offset = 0usize;
        while offset < record_text.len() {
            let len = (record_text.len() - offset).min(MAX_FILE_WRITE_LEN);
            fp.write_all(&record_text[offset..offset + len])
                .map_err(|_| CardError::Write(file_path.display().to_string()))?;
            offset += len;
        }

        self.seq_num += 1;
        Ok(())
    }

    pub fn stop_session(&mut self) {
        self.recording = false;
        self.seq_num = 0;
        self.card.unmount();
        info!("end recording session");
    }

    /// Idle-time presence probe; returns a transition to report.
    fn update_card_presence(&mut self) -> Option<bool> {
        self.card_check_count -= 1;
        if self.card_check_count > 0 {
            return None;
        }
        self.card_check_count = (CARD_CHECK_PERIOD_MSEC / EVAL_MSEC) as u32;

        if self.recording {
            return None;
        }
        if self.card.present() {
            if !self.card.check_still_present() {
                info!("SD card removed");
                return Some(false);
            }
        } else if self.card.check_inserted() {
            info!("SD card inserted");
            return Some(true);
        }
        None
    }
}

/// Task entry.
pub fn recorder_task(ctx: Arc<CoreContext>, card: SdCard) {
    info!("start task");
    let mut rec = Recorder::new(card);

    // Initial presence report; mount once so a blank card gets formatted
    // while nothing else is going on.
    if rec.card_present() {
        ctx.sig.orchestrator.notify(app::SDCARD_PRESENT);
        if rec.card.mount().is_ok() {
            rec.card.unmount();
        }
    } else {
        ctx.sig.orchestrator.notify(app::SDCARD_MISSING);
    }

    loop {
        let pending = ctx.sig.recorder.take();

        if pending.has(file::START_RECORDING) {
            match rec.setup_session() {
                Ok(()) => ctx.sig.orchestrator.notify(app::RECORD_START),
                Err(e) => {
                    error!("could not start recording session: {e}");
                    ctx.sig.orchestrator.notify(app::RECORD_NOSTART);
                }
            }
        }

        if pending.has(file::NEW_IMAGE) {
            let result = {
                let text = ctx.buf.image_text.lock().unwrap();
                rec.write_image(text.as_slice())
            };
            match result {
                Ok(()) => ctx.sig.orchestrator.notify(app::RECORD_IMG_DONE),
                Err(e) => {
                    error!("image write failed: {e}");
                    ctx.sig.orchestrator.notify(app::RECORD_FAIL);
                }
            }
        }

        if pending.has(file::STOP_RECORDING) {
            rec.stop_session();
        }

        if let Some(present) = rec.update_card_presence() {
            ctx.sig.orchestrator.notify(if present {
                app::SDCARD_PRESENT
            } else {
                app::SDCARD_MISSING
            });
        }

        std::thread::sleep(Duration::from_millis(EVAL_MSEC));
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    fn recorder_with_card(root: &std::path::Path) -> Recorder {
        Recorder::new(SdCard::with_sim_root(root))
    }

    #[test]
    fn naming_rules() {
        assert_eq!(group_index(1), 0);
        assert_eq!(group_index(99), 0);
        assert_eq!(group_index(100), 1);
        assert_eq!(group_dir_name(0), "group_0000");
        assert_eq!(group_dir_name(12), "group_0012");
        assert_eq!(image_file_name(1), "img_00001.json");
        assert_eq!(image_file_name(12345), "img_12345.json");
    }

    #[test]
    fn first_file_lands_in_group_zero_with_sequence_one() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = recorder_with_card(tmp.path());
        rec.setup_session().unwrap();
        rec.write_image(b"{\"metadata\":{}}").unwrap();

        assert!(rec.session_path.join("group_0000/img_00001.json").exists());
        assert_eq!(rec.seq_num, 2);
    }

    #[test]
    fn sequence_numbers_are_strictly_increasing_across_groups() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = recorder_with_card(tmp.path());
        rec.setup_session().unwrap();
        for _ in 0..205 {
            rec.write_image(b"x").unwrap();
        }
        // Files 1..=99 in group 0, 100..=199 in group 1, 200.. in group 2.
        assert!(rec.session_path.join("group_0000/img_00001.json").exists());
        assert!(rec.session_path.join("group_0000/img_00099.json").exists());
        assert!(rec.session_path.join("group_0001/img_00100.json").exists());
        assert!(rec.session_path.join("group_0001/img_00199.json").exists());
        assert!(rec.session_path.join("group_0002/img_00200.json").exists());
        assert!(rec.session_path.join("group_0002/img_00205.json").exists());
        assert!(!rec.session_path.join("group_0000/img_00100.json").exists());
    }

    #[test]
    fn large_record_is_written_whole_through_bounded_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = recorder_with_card(tmp.path());
        rec.setup_session().unwrap();

        let big: Vec<u8> = (0..3 * MAX_FILE_WRITE_LEN + 17).map(|i| i as u8).collect();
        rec.write_image(&big).unwrap();

        let path = rec.session_path.join("group_0000/img_00001.json");
        assert_eq!(fs::read(path).unwrap(), big);
    }

    #[test]
    fn existing_session_directory_is_reused() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = recorder_with_card(tmp.path());
        // Pre-create the directory that today's timestamp will produce.
        let pre = tmp.path().join(session_dir_name());
        fs::create_dir_all(&pre).unwrap();
        rec.setup_session().unwrap();
        assert!(rec.recording);
    }

    #[test]
    fn stop_resets_sequence() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = recorder_with_card(tmp.path());
        rec.setup_session().unwrap();
        rec.write_image(b"x").unwrap();
        rec.stop_session();
        assert_eq!(rec.seq_num, 0);
        assert!(!rec.recording);
    }

    #[test]
    fn setup_without_card_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut card = SdCard::with_sim_root(tmp.path());
        card.sim_presence().store(false, std::sync::atomic::Ordering::Relaxed);
        assert!(!card.check_still_present());
        let mut rec = Recorder::new(card);
        assert!(matches!(rec.setup_session(), Err(CardError::NotPresent)));
    }
}
