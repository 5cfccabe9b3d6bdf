//! Visual imager driver task.
//!
//! On demand: trigger one JPEG capture, poll for capture-complete (~300 ms
//! budget), then drain the FIFO into the shared visual buffer with the VSPI
//! bus held for the whole offload.  A zero-length result (no valid JPEG
//! markers, bad FIFO report, missed capture deadline) fails the request.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use crate::drivers::ov2640::{JpegSize, LightMode, Ov2640};
use crate::drivers::vspi_lock;
use crate::signals::app;
use crate::tasks::CoreContext;

/// Poll interval while waiting on the capture-done flag.
const JPEG_WAIT_MSEC: u64 = 10;
/// Capture-complete budget.
const MAX_JPEG_WAIT_MSEC: u64 = 300;

/// Task entry: configure the sensor once, then serve capture requests.
pub fn visual_task(ctx: Arc<CoreContext>, mut cam: Ov2640) {
    info!("start task");

    if let Err(e) = cam.configure(JpegSize::Vga640x480, LightMode::Sunny) {
        error!("camera configuration failed: {e}");
    }

    loop {
        // Block until the orchestrator wants an image.
        ctx.sig.visual.wait();
        capture_frame(&ctx, &mut cam);
    }
}

/// One capture: trigger, wait, drain, signal.
pub fn capture_frame(ctx: &CoreContext, cam: &mut Ov2640) {
    if let Err(e) = cam.capture() {
        error!("capture trigger failed: {e}");
        ctx.sig.orchestrator.notify(app::CAM_FAIL);
        return;
    }

    let mut wait_count = MAX_JPEG_WAIT_MSEC / JPEG_WAIT_MSEC;
    loop {
        match cam.capture_done() {
            Ok(true) => break,
            Ok(false) => {
                if wait_count == 0 {
                    error!("jpeg image not captured in time");
                    break;
                }
                wait_count -= 1;
                std::thread::sleep(Duration::from_millis(JPEG_WAIT_MSEC));
            }
            Err(e) => {
                error!("capture poll failed: {e}");
                break;
            }
        }
    }

    // The whole FIFO drain happens under the bus lock; display traffic
    // interleaved with the offload corrupts the camera's read-out.
    let len = {
        let _bus = vspi_lock();
        let mut frame = ctx.buf.visual.lock().unwrap();
        match cam.transfer_jpeg(&mut frame.jpeg) {
            Ok(len) => {
                frame.len = len;
                len
            }
            Err(e) => {
                error!("fifo drain failed: {e}");
                frame.len = 0;
                0
            }
        }
    };

    if len == 0 {
        error!("could not get jpeg image");
        ctx.sig.orchestrator.notify(app::CAM_FAIL);
    } else {
        ctx.sig.orchestrator.notify(app::CAM_FRAME);
    }
}
