//! JPEG to RGB565 conversion for the display path.

use jpeg_decoder::{Decoder, PixelFormat};
use log::warn;

use super::palettes::rgb_to_16bit;

/// Decode `jpeg` and pack it into `out` as RGB565, row-major.
///
/// Returns the decoded `(width, height)`, or `None` when the stream is
/// malformed or does not fit `out`.  Grayscale JPEGs are expanded; CMYK and
/// 16-bit streams are rejected.
pub fn decode_to_rgb565(jpeg: &[u8], out: &mut [u16]) -> Option<(u16, u16)> {
    let mut decoder = Decoder::new(jpeg);
    let pixels = match decoder.decode() {
        Ok(p) => p,
        Err(e) => {
            warn!("jpeg decode failed: {e}");
            return None;
        }
    };
    let info = decoder.info()?;
    let n = info.width as usize * info.height as usize;
    if n > out.len() {
        warn!(
            "jpeg {}x{} too large for display buffer",
            info.width, info.height
        );
        return None;
    }

    match info.pixel_format {
        PixelFormat::RGB24 => {
            for (dst, rgb) in out[..n].iter_mut().zip(pixels.chunks_exact(3)) {
                *dst = rgb_to_16bit(rgb[0], rgb[1], rgb[2]);
            }
        }
        PixelFormat::L8 => {
            for (dst, &l) in out[..n].iter_mut().zip(pixels.iter()) {
                *dst = rgb_to_16bit(l, l, l);
            }
        }
        other => {
            warn!("unsupported jpeg pixel format {other:?}");
            return None;
        }
    }

    Some((info.width, info.height))
}
