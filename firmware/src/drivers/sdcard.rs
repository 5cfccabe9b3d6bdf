//! SD card access: presence probing and mount lifecycle.
//!
//! Presence is probed with the cheapest command that reliably errors on a
//! removed card (reading the SD configuration register); insertion is
//! detected with the basic init command sequence.  On the host the card is a
//! directory whose presence tests can toggle.

#[cfg(not(target_os = "espidf"))]
use std::path::Path;
use std::path::PathBuf;

use log::{error, info};

use crate::error::CardError;

#[cfg(not(target_os = "espidf"))]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(not(target_os = "espidf"))]
use std::sync::Arc;

/// Filesystem root the card mounts at.
#[cfg(target_os = "espidf")]
const MOUNT_POINT: &str = "/sdcard";

pub struct SdCard {
    present: bool,
    mounted: bool,
    #[cfg(not(target_os = "espidf"))]
    sim_root: PathBuf,
    #[cfg(not(target_os = "espidf"))]
    sim_inserted: Arc<AtomicBool>,
}

impl SdCard {
    /// Register the SDMMC host and probe for a card.  Card absence is not
    /// an error at this stage.
    pub fn new() -> Self {
        let mut card = Self {
            present: false,
            mounted: false,
            #[cfg(not(target_os = "espidf"))]
            sim_root: std::env::temp_dir().join("firecam-sdcard"),
            #[cfg(not(target_os = "espidf"))]
            sim_inserted: Arc::new(AtomicBool::new(true)),
        };
        card.present = card.probe_init();
        if card.present {
            info!("SD card found");
        } else {
            info!("no SD card found");
        }
        card
    }

    /// Host test constructor with a dedicated backing directory.
    #[cfg(not(target_os = "espidf"))]
    pub fn with_sim_root(root: &Path) -> Self {
        let mut card = Self {
            present: false,
            mounted: false,
            sim_root: root.to_path_buf(),
            sim_inserted: Arc::new(AtomicBool::new(true)),
        };
        card.present = card.probe_init();
        card
    }

    /// Test hook: insert/remove this simulated card.  The returned handle
    /// outlives moves of the card into a task.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_presence(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.sim_inserted)
    }

    pub fn present(&self) -> bool {
        self.present
    }

    /// Cheap still-there probe for a card believed present.
    pub fn check_still_present(&mut self) -> bool {
        self.present = self.probe_scr();
        self.present
    }

    /// Probe for a newly inserted card and re-run initialisation.
    pub fn check_inserted(&mut self) -> bool {
        self.present = self.probe_init();
        self.present
    }

    /// Mount the filesystem, formatting a blank card.
    pub fn mount(&mut self) -> Result<(), CardError> {
        if !self.present {
            return Err(CardError::NotPresent);
        }
        self.platform_mount()?;
        self.mounted = true;
        Ok(())
    }

    pub fn unmount(&mut self) {
        if self.mounted {
            self.platform_unmount();
            self.mounted = false;
        }
    }

    /// Root path for session directories (valid while mounted).
    pub fn root(&self) -> PathBuf {
        #[cfg(target_os = "espidf")]
        {
            PathBuf::from(MOUNT_POINT)
        }
        #[cfg(not(target_os = "espidf"))]
        {
            self.sim_root.clone()
        }
    }

    // ── Platform: ESP-IDF ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn probe_init(&mut self) -> bool {
        use esp_idf_svc::sys::*;
        // SAFETY: sdmmc host/card structs are zero-initialised C state.
        unsafe {
            let mut card: sdmmc_card_t = core::mem::zeroed();
            let host = sdmmc_host_t {
                ..core::mem::zeroed()
            };
            sdmmc_card_init(&host, &mut card) == ESP_OK
        }
    }

    #[cfg(target_os = "espidf")]
    fn probe_scr(&mut self) -> bool {
        use esp_idf_svc::sys::*;
        // Reading the SCR times out quickly on a removed card without
        // disturbing a mounted filesystem.
        unsafe {
            let mut card: sdmmc_card_t = core::mem::zeroed();
            let mut scr = [0u8; 8];
            sdmmc_io_read_bytes(&mut card, 0, 0, scr.as_mut_ptr() as *mut _, scr.len())
                == ESP_OK
        }
    }

    #[cfg(target_os = "espidf")]
    fn platform_mount(&mut self) -> Result<(), CardError> {
        use esp_idf_svc::sys::*;
        let mount_config = esp_vfs_fat_sdmmc_mount_config_t {
            format_if_mount_failed: true,
            max_files: 5,
            allocation_unit_size: 16 * 1024,
            ..Default::default()
        };
        let mount_point =
            std::ffi::CString::new(MOUNT_POINT).map_err(|_| CardError::MountFailed)?;
        let mut card: *mut sdmmc_card_t = core::ptr::null_mut();
        // SAFETY: config structs outlive the call.
        let ret = unsafe {
            let host = sdmmc_host_t {
                ..core::mem::zeroed()
            };
            let slot = sdmmc_slot_config_t {
                ..core::mem::zeroed()
            };
            esp_vfs_fat_sdmmc_mount(
                mount_point.as_ptr(),
                &host,
                &slot as *const _ as *const _,
                &mount_config,
                &mut card,
            )
        };
        if ret == ESP_OK {
            Ok(())
        } else {
            error!("could not mount sd card ({ret})");
            self.present = false;
            Err(CardError::MountFailed)
        }
    }

    #[cfg(target_os = "espidf")]
    fn platform_unmount(&mut self) {
        // SAFETY: unmounting an unmounted filesystem returns an ignorable
        // error.
        unsafe {
            esp_idf_svc::sys::esp_vfs_fat_sdmmc_unmount();
        }
    }

    // ── Platform: host simulation ─────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn probe_init(&mut self) -> bool {
        self.sim_inserted.load(Ordering::Relaxed)
    }

    #[cfg(not(target_os = "espidf"))]
    fn probe_scr(&mut self) -> bool {
        self.sim_inserted.load(Ordering::Relaxed)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_mount(&mut self) -> Result<(), CardError> {
        std::fs::create_dir_all(&self.sim_root).map_err(|e| {
            error!("could not mount simulated card: {e}");
            CardError::MountFailed
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_unmount(&mut self) {}
}

impl Default for SdCard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_and_reinsertion_track_presence() {
        let tmp = tempfile::tempdir().unwrap();
        let mut card = SdCard::with_sim_root(tmp.path());
        let presence = card.sim_presence();
        assert!(card.present());

        presence.store(false, Ordering::Relaxed);
        assert!(!card.check_still_present());
        assert!(!card.present());

        presence.store(true, Ordering::Relaxed);
        assert!(card.check_inserted());
    }

    #[test]
    fn mount_requires_presence() {
        let tmp = tempfile::tempdir().unwrap();
        let mut card = SdCard::with_sim_root(tmp.path());
        let presence = card.sim_presence();
        presence.store(false, Ordering::Relaxed);
        assert!(!card.check_still_present());
        assert!(matches!(card.mount(), Err(CardError::NotPresent)));

        presence.store(true, Ordering::Relaxed);
        card.check_inserted();
        card.mount().unwrap();
        assert!(card.root().exists());
        card.unmount();
    }
}
