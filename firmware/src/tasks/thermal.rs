//! Thermal imager driver task.
//!
//! Presents the orchestrator with one primitive: acquire-frame.  On each
//! request the task resynchronises with the VoSPI stream (spin on the vsync
//! line with short sleeps, stamp the rising edge in software) and
//! reassembles four segments into the shared thermal buffer.  If no valid
//! frame lands within [`LEP_FAIL_VSYNC_COUNT`] vsync periods — resync plus a
//! flat-field correction can eat many of them — the request fails.  Either
//! way exactly one terminal signal reaches the orchestrator.
//!
//! Runs at elevated priority on its own core; the per-segment deadline is a
//! hard sensor-protocol constraint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info};

use crate::config::GainMode;
use crate::drivers::cci::Cci;
use crate::drivers::vospi::{
    FeedEvent, FrameAssembler, PacketSource, Telemetry, LEP_FAIL_VSYNC_COUNT,
    LEP_MAX_FRAME_XFER_WAIT_USEC, LEP_PKT_LEN,
};
use crate::drivers::vsync_level;
use crate::signals::app;
use crate::tasks::CoreContext;

/// Sleep between vsync level polls, shorter than the ~9.45 ms frame period.
const VSYNC_POLL_MSEC: u64 = 9;

/// Task entry: serve acquire-frame requests forever.
pub fn thermal_task(ctx: Arc<CoreContext>, mut spi: impl PacketSource, cci: Arc<Cci>) {
    info!("start task");
    let mut asm = FrameAssembler::new();

    loop {
        // Block until the orchestrator wants an image.
        ctx.sig.thermal.wait();
        acquire_frame(&ctx, &mut asm, &mut spi, &cci);
    }
}

/// One acquisition: resynchronise, reassemble, deliver or fail.
pub fn acquire_frame(
    ctx: &CoreContext,
    asm: &mut FrameAssembler,
    spi: &mut impl PacketSource,
    cci: &Cci,
) {
    let mut vsync_count: u32 = 0;

    loop {
        // Wait for the sensor's vertical sync to rise.
        while !vsync_level() {
            std::thread::sleep(Duration::from_millis(VSYNC_POLL_MSEC));
        }
        let vsync_at = Instant::now();

        if transfer_segment(asm, spi, vsync_at) {
            deliver_frame(ctx, asm, cci);
            return;
        }

        // A valid frame should arrive within 12 vsync periods; resync and a
        // running FFC justify the extra margin before giving up.
        vsync_count += 1;
        if vsync_count == LEP_FAIL_VSYNC_COUNT {
            error!("could not get lepton image");
            ctx.sig.orchestrator.notify(app::LEP_FAIL);
            return;
        }
    }
}

/// Read packets for one segment window.  Returns true when this window
/// completed the frame.
fn transfer_segment(
    asm: &mut FrameAssembler,
    spi: &mut impl PacketSource,
    vsync_at: Instant,
) -> bool {
    let deadline = Duration::from_micros(LEP_MAX_FRAME_XFER_WAIT_USEC);
    let mut pkt = [0u8; LEP_PKT_LEN];

    asm.begin_segment();
    loop {
        if spi.read_packet(&mut pkt).is_err() {
            return false;
        }
        match asm.feed(&pkt) {
            FeedEvent::Discard => {
                // Only discard packets consult the deadline; a live segment
                // always runs to its line-59 verdict.
                if vsync_at.elapsed() > deadline {
                    return false;
                }
            }
            FeedEvent::Continue => {}
            FeedEvent::Garbage => return false,
            FeedEvent::SegmentDone { frame_complete } => return frame_complete,
        }
    }
}

/// Copy the completed frame and its telemetry into the shared buffer and
/// signal the orchestrator.
fn deliver_frame(ctx: &CoreContext, asm: &FrameAssembler, cci: &Cci) {
    let telemetry = read_telemetry(cci);
    {
        let mut frame = ctx.buf.thermal.lock().unwrap();
        frame.pixels.copy_from_slice(asm.pixels());
        frame.telemetry = telemetry;
    }
    ctx.sig.orchestrator.notify(app::LEP_FRAME);
}

/// Assemble the telemetry block from sensor status queries.  A CCI hiccup
/// yields an empty (invalid) block rather than a failed frame.
fn read_telemetry(cci: &Cci) -> Telemetry {
    let fpa = cci.get_fpa_temp_k100();
    let aux = cci.get_aux_temp_k100();
    let gain = cci.get_gain_mode();
    let resolution = cci.get_tlinear_resolution();

    match (fpa, aux, gain, resolution) {
        (Ok(fpa), Ok(aux), Ok(gain), Ok(resolution)) => {
            // In AUTO the sensor picks the applied gain itself; without a
            // telemetry row to report it, it stays unknown.
            let effective = match gain {
                GainMode::Auto => None,
                g => Some(g),
            };
            Telemetry::from_status(fpa as u16, aux as u16, gain, effective, resolution)
        }
        _ => {
            error!("telemetry status read failed");
            Telemetry::empty()
        }
    }
}
