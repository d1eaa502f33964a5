//! Deterministic test-pattern synthesis.
//!
//! Every frame is a horizontal colour gradient that scrolls with the
//! sequence number, crossed by a white scan line whose row also tracks the
//! sequence. Output depends only on the format and the sequence number.

use crate::format::{FourCc, PixFormat};

/// Horizontal scroll per frame, in gradient steps.
const SCROLL_PER_FRAME: u32 = 8;

#[inline(always)]
fn gradient(x: u32, y: u32, width: u32, height: u32, sequence: u32) -> (u8, u8, u8) {
    let shift = sequence.wrapping_mul(SCROLL_PER_FRAME);
    let r = ((x * 256 / width.max(1)).wrapping_add(shift) & 0xff) as u8;
    let g = ((y * 256 / height.max(1)) & 0xff) as u8;
    (r, g, 255 - r)
}

#[inline(always)]
fn pixel(x: u32, y: u32, format: &PixFormat, sequence: u32) -> (u8, u8, u8) {
    if y == sequence % format.height().max(1) {
        (255, 255, 255)
    } else {
        gradient(x, y, format.width(), format.height(), sequence)
    }
}

/// Limited-range BT.601 conversion.
#[inline(always)]
pub(crate) fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}

#[inline(always)]
fn rgb565(r: u8, g: u8, b: u8) -> [u8; 2] {
    let packed = ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3);
    packed.to_le_bytes()
}

/// Fill `dst` with frame `sequence` of the test pattern for `format`.
///
/// Writes exactly `format.size_image()` bytes and returns that count, or
/// `None` (writing nothing) when `dst` is too small or the encoding is not
/// one the pattern knows.
///
/// # Example
/// ```rust
/// use vcam_core::prelude::{FormatDescriptor, FourCc, PixFormat, fill_test_pattern};
///
/// let rgb = FormatDescriptor::lookup(FourCc::RGB24).unwrap();
/// let fmt = PixFormat::from_descriptor(rgb, 8, 4);
/// let mut a = vec![0u8; 96];
/// let mut b = vec![0u8; 96];
/// assert_eq!(fill_test_pattern(&mut a, &fmt, 5), Some(96));
/// fill_test_pattern(&mut b, &fmt, 5);
/// assert_eq!(a, b);
/// ```
pub fn fill_test_pattern(dst: &mut [u8], format: &PixFormat, sequence: u32) -> Option<usize> {
    let size = format.size_image() as usize;
    let stride = format.bytes_per_line() as usize;
    let dst = dst.get_mut(..size)?;
    if stride == 0 {
        return Some(0);
    }
    match format.code() {
        FourCc::RGB24 => {
            for (y, row) in dst.chunks_exact_mut(stride).enumerate() {
                for (x, px) in row.chunks_exact_mut(3).enumerate() {
                    let (r, g, b) = pixel(x as u32, y as u32, format, sequence);
                    px.copy_from_slice(&[r, g, b]);
                }
            }
        }
        FourCc::RGB565 => {
            for (y, row) in dst.chunks_exact_mut(stride).enumerate() {
                for (x, px) in row.chunks_exact_mut(2).enumerate() {
                    let (r, g, b) = pixel(x as u32, y as u32, format, sequence);
                    px.copy_from_slice(&rgb565(r, g, b));
                }
            }
        }
        FourCc::YUYV => {
            for (y, row) in dst.chunks_exact_mut(stride).enumerate() {
                let y = y as u32;
                let mut pairs = row.chunks_exact_mut(4);
                for (i, quad) in pairs.by_ref().enumerate() {
                    let x = i as u32 * 2;
                    let (y0, u0, v0) = {
                        let (r, g, b) = pixel(x, y, format, sequence);
                        rgb_to_yuv(r, g, b)
                    };
                    let (y1, u1, v1) = {
                        let (r, g, b) = pixel(x + 1, y, format, sequence);
                        rgb_to_yuv(r, g, b)
                    };
                    let u = ((u0 as u16 + u1 as u16) / 2) as u8;
                    let v = ((v0 as u16 + v1 as u16) / 2) as u8;
                    quad.copy_from_slice(&[y0, u, y1, v]);
                }
                // Odd width leaves a single pixel: luma plus its chroma sample.
                let tail = pairs.into_remainder();
                if tail.len() >= 2 {
                    let x = format.width() - 1;
                    let (r, g, b) = pixel(x, y, format, sequence);
                    let (luma, u, _) = rgb_to_yuv(r, g, b);
                    tail[0] = luma;
                    tail[1] = u;
                }
            }
        }
        _ => return None,
    }
    Some(size)
}
