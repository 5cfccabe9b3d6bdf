//! Display activity: consumes the shared frame buffers, renders them into
//! its own private RGB565 buffers and reports consumption back to the
//! orchestrator so the next frame can be requested.
//!
//! The touch screens themselves are a collaborator behind
//! [`DisplaySurface`]; this task owns the rendering (JPEG decode and
//! downsample for the visual path, min-max linearisation plus palette LUT
//! for the thermal path), the record counter and the message box plumbing.

use std::sync::Arc;

use log::{info, warn};

use crate::drivers::vospi::LEP_NUM_PIXELS;
use crate::render::jpeg::decode_to_rgb565;
use crate::render::palettes::Palette;
use crate::render::thermal::false_color;
use crate::signals::{app, gui};
use crate::tasks::CoreContext;

/// On-screen visual pane (the 640x480 capture is downsampled by two).
pub const DISP_CAM_WIDTH: usize = 320;
pub const DISP_CAM_HEIGHT: usize = 240;

/// Where rendered frames and UI intents land.  The LVGL screen stack
/// implements this on the device; tests use a recording stub.
pub trait DisplaySurface: Send {
    fn show_visual(&mut self, rgb565: &[u16], width: usize, height: usize);
    fn show_thermal(&mut self, rgb565: &[u16]);
    fn show_message_box(&mut self, msg: &str);
    fn set_record_led(&mut self, on: bool);
    fn set_record_count(&mut self, count: u32);
    fn show_poweroff_screen(&mut self);
}

/// Surface that only logs; used when the panel is absent (host runs).
pub struct LogSurface;

impl DisplaySurface for LogSurface {
    fn show_visual(&mut self, _rgb565: &[u16], width: usize, height: usize) {
        info!("display: visual {width}x{height}");
    }
    fn show_thermal(&mut self, _rgb565: &[u16]) {
        info!("display: thermal frame");
    }
    fn show_message_box(&mut self, msg: &str) {
        info!("display: message box '{msg}'");
    }
    fn set_record_led(&mut self, on: bool) {
        info!("display: record led {}", if on { "on" } else { "off" });
    }
    fn set_record_count(&mut self, count: u32) {
        info!("display: record count {count}");
    }
    fn show_poweroff_screen(&mut self) {
        info!("display: poweroff screen");
    }
}

pub struct DisplayState {
    cam_buf: Box<[u16]>,
    cam_scratch: Box<[u16]>,
    lep_buf: Box<[u16]>,
    lut: [u16; 256],
    lut_palette: Palette,
    record_count: u32,
}

impl DisplayState {
    pub fn new() -> Self {
        let initial = Palette::Fusion;
        Self {
            cam_buf: vec![0u16; DISP_CAM_WIDTH * DISP_CAM_HEIGHT].into_boxed_slice(),
            cam_scratch: vec![0u16; DISP_CAM_WIDTH * DISP_CAM_HEIGHT * 4].into_boxed_slice(),
            lep_buf: vec![0u16; LEP_NUM_PIXELS].into_boxed_slice(),
            lut: initial.lut(),
            lut_palette: initial,
            record_count: 0,
        }
    }

    fn ensure_palette(&mut self, palette: Palette) {
        if palette != self.lut_palette {
            self.lut = palette.lut();
            self.lut_palette = palette;
        }
    }

    /// Decode the shared JPEG and downsample into the visual pane buffer.
    /// Returns the pane dimensions, or `None` for an undecodable image.
    pub fn render_visual(&mut self, jpeg: &[u8]) -> Option<(usize, usize)> {
        let (w, h) = decode_to_rgb565(jpeg, &mut self.cam_scratch)?;
        let (w, h) = (w as usize, h as usize);

        if w <= DISP_CAM_WIDTH && h <= DISP_CAM_HEIGHT {
            self.cam_buf[..w * h].copy_from_slice(&self.cam_scratch[..w * h]);
            return Some((w, h));
        }

        // 2:1 decimation from the 640x480 capture.
        let out_w = (w / 2).min(DISP_CAM_WIDTH);
        let out_h = (h / 2).min(DISP_CAM_HEIGHT);
        for y in 0..out_h {
            for x in 0..out_w {
                self.cam_buf[y * out_w + x] = self.cam_scratch[(y * 2) * w + x * 2];
            }
        }
        Some((out_w, out_h))
    }

    /// False-colour the shared thermal frame with the active palette.
    pub fn render_thermal(&mut self, pixels: &[u16], palette: Palette) -> &[u16] {
        self.ensure_palette(palette);
        false_color(pixels, &self.lut, &mut self.lep_buf);
        &self.lep_buf
    }
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::new()
    }
}

/// Task entry.
pub fn display_task(ctx: Arc<CoreContext>, mut surface: impl DisplaySurface) {
    info!("start task");
    let mut state = DisplayState::new();

    loop {
        let pending = ctx.sig.display.wait();

        if pending.has(gui::SHUTDOWN) {
            // Paint the poweroff screen; the orchestrator cuts power after
            // its settle delay.
            surface.show_poweroff_screen();
            continue;
        }

        if pending.has(gui::CAM_FRAME) {
            {
                let frame = ctx.buf.visual.lock().unwrap();
                match state.render_visual(&frame.jpeg[..frame.len]) {
                    Some((w, h)) => surface.show_visual(&state.cam_buf[..w * h], w, h),
                    None => warn!("undisplayable jpeg frame"),
                }
            }
            ctx.sig.orchestrator.notify(app::GUI_CAM_DONE);
        }

        if pending.has(gui::LEP_FRAME) {
            let palette = ctx
                .store
                .snapshot()
                .map(|snap| snap.op.palette)
                .unwrap_or(Palette::Fusion);
            {
                let frame = ctx.buf.thermal.lock().unwrap();
                state.render_thermal(&frame.pixels, palette);
                surface.show_thermal(&state.lep_buf);
            }
            ctx.sig.orchestrator.notify(app::GUI_LEP_DONE);
        }

        if pending.has(gui::LED_ON) {
            surface.set_record_led(true);
        }
        if pending.has(gui::LED_OFF) {
            surface.set_record_led(false);
        }
        if pending.has(gui::INC_REC) {
            state.record_count += 1;
            surface.set_record_count(state.record_count);
        }
        if pending.has(gui::CLR_REC) {
            state.record_count = 0;
            surface.set_record_count(0);
        }
        if pending.has(gui::MESSAGEBOX) {
            let msg = ctx.msg_box.lock().unwrap().clone();
            surface.show_message_box(&msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::vospi::{LEP_HEIGHT, LEP_WIDTH};
    use crate::render::palettes::Palette;

    #[test]
    fn thermal_render_uses_the_selected_palette_range() {
        let mut state = DisplayState::new();
        let mut pixels = vec![29_000u16; LEP_NUM_PIXELS];
        pixels[0] = 28_000;
        pixels[LEP_NUM_PIXELS - 1] = 30_000;

        let out = state.render_thermal(&pixels, Palette::Grayscale);
        let lut = Palette::Grayscale.lut();
        assert_eq!(out[0], lut[0]);
        assert_eq!(out[LEP_NUM_PIXELS - 1], lut[255]);
        assert_eq!(out.len(), LEP_WIDTH * LEP_HEIGHT);
    }

    #[test]
    fn palette_switch_rebuilds_the_lut() {
        let mut state = DisplayState::new();
        let pixels = vec![29_000u16; LEP_NUM_PIXELS];
        let fusion_mid = state.render_thermal(&pixels, Palette::Fusion)[0];
        let gray_mid = state.render_thermal(&pixels, Palette::Grayscale)[0];
        assert_ne!(fusion_mid, gray_mid);
    }

    #[test]
    fn bad_jpeg_renders_nothing() {
        let mut state = DisplayState::new();
        assert!(state.render_visual(&[0x00, 0x11, 0x22]).is_none());
    }
}
