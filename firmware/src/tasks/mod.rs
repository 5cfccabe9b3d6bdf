//! The seven cooperating activities and the core context they share.
//!
//! The context is built once at boot and handed to every task entry point;
//! it owns the signal words, the shared buffers and the handles to the
//! store and Wi-Fi collaborators.  Nothing else is global.

pub mod display;
pub mod orchestrator;
pub mod recorder;
pub mod responder;
pub mod sampler;
pub mod thermal;
pub mod visual;

use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use crate::buffers::SharedBuffers;
use crate::net::wifi::Wifi;
use crate::signals::Signals;
use crate::store::StoreHandle;
use self::sampler::SensorReadings;

/// System-level control operations, abstracted so the orchestrator's
/// reboot/shutdown paths are host-testable.
pub trait SystemCtl: Send + Sync {
    /// Reboot the processor.  On the device this does not return.
    fn restart(&self);
    /// Release the power-hold line.
    fn power_off(&self);
}

pub struct EspSystemCtl;

impl SystemCtl for EspSystemCtl {
    fn restart(&self) {
        #[cfg(target_os = "espidf")]
        // SAFETY: plain reboot call; does not return.
        unsafe {
            esp_idf_svc::sys::esp_restart();
        }
        #[cfg(not(target_os = "espidf"))]
        log::error!("restart requested (simulation)");
    }

    fn power_off(&self) {
        crate::drivers::set_power_hold(false);
    }
}

/// Everything the activities share, constructed at boot.
pub struct CoreContext {
    pub sig: Signals,
    pub buf: SharedBuffers,
    pub store: StoreHandle,
    pub wifi: Mutex<Wifi>,
    pub readings: SensorReadings,
    /// Published by the orchestrator for `get_status`.
    pub recording: AtomicBool,
    /// Preset text for the display's message box, set before signalling
    /// [`crate::signals::gui::MESSAGEBOX`].
    pub msg_box: Mutex<String>,
    pub version: &'static str,
}

impl CoreContext {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            sig: Signals::new(),
            buf: SharedBuffers::new(),
            store,
            wifi: Mutex::new(Wifi::new()),
            readings: SensorReadings::new(),
            recording: AtomicBool::new(false),
            msg_box: Mutex::new(String::new()),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
