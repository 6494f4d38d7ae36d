//! Conversion of raw camera layouts into interleaved RGBA8

use zune_jpeg::JpegDecoder;

use super::frame::{PixelFormat, RawFrame};
use crate::error::ConvertError;

/// Bytes per pixel of the display layout
pub const DISPLAY_BPP: usize = 4;

/// Convert `frame` into RGBA8, reusing `out`'s allocation.
///
/// Returns the output dimensions. On error `out` may hold partial data.
pub fn decode_frame(frame: &RawFrame, out: &mut Vec<u8>) -> Result<(u32, u32), ConvertError> {
    let (width, height) = (frame.meta.width as usize, frame.meta.height as usize);
    if width == 0 || height == 0 {
        return Err(ConvertError::ZeroSize);
    }
    let format = frame.meta.format;
    if format == PixelFormat::Mjpeg {
        return decode_jpeg(frame, out);
    }

    let stride = frame.row_stride();
    let row_bytes = width * format.bytes_per_pixel();
    let expected = stride * (height - 1) + row_bytes;
    if frame.data.len() < expected || stride < row_bytes {
        return Err(ConvertError::Truncated {
            format,
            expected,
            actual: frame.data.len(),
        });
    }

    out.resize(width * height * DISPLAY_BPP, 0);
    let data = &frame.data[..];
    let rows = data.chunks(stride).take(height);
    let out_rows = out.chunks_exact_mut(width * DISPLAY_BPP);

    match format {
        PixelFormat::Mono8 => {
            for (src, dst) in rows.zip(out_rows) {
                for (&v, px) in src[..row_bytes].iter().zip(dst.chunks_exact_mut(4)) {
                    px.copy_from_slice(&[v, v, v, 255]);
                }
            }
        }
        PixelFormat::Mono12 | PixelFormat::Mono16 => {
            // Scale down to 8 bits
            let shift = if format == PixelFormat::Mono12 { 4 } else { 8 };
            for (src, dst) in rows.zip(out_rows) {
                for (pair, px) in src[..row_bytes].chunks_exact(2).zip(dst.chunks_exact_mut(4)) {
                    let v = (u16::from_le_bytes([pair[0], pair[1]]) >> shift).min(255) as u8;
                    px.copy_from_slice(&[v, v, v, 255]);
                }
            }
        }
        PixelFormat::Rgb8 | PixelFormat::Bgr8 => {
            let swap = format == PixelFormat::Bgr8;
            for (src, dst) in rows.zip(out_rows) {
                for (c, px) in src[..row_bytes].chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
                    let (r, b) = if swap { (c[2], c[0]) } else { (c[0], c[2]) };
                    px.copy_from_slice(&[r, c[1], b, 255]);
                }
            }
        }
        PixelFormat::Rgba8 | PixelFormat::Bgra8 => {
            let swap = format == PixelFormat::Bgra8;
            for (src, dst) in rows.zip(out_rows) {
                dst.copy_from_slice(&src[..row_bytes]);
                if swap {
                    for px in dst.chunks_exact_mut(4) {
                        px.swap(0, 2);
                    }
                }
            }
        }
        PixelFormat::Yuyv => {
            for (src, dst) in rows.zip(out_rows) {
                yuyv_row(&src[..row_bytes], dst);
            }
        }
        PixelFormat::BayerRg8 => demosaic_rggb(data, stride, width, height, out),
        // Compressed, decoded before the packed path
        PixelFormat::Mjpeg => {}
    }

    Ok((width as u32, height as u32))
}

fn decode_jpeg(frame: &RawFrame, out: &mut Vec<u8>) -> Result<(u32, u32), ConvertError> {
    let mut decoder = JpegDecoder::new(&frame.data[..]);
    let rgb = decoder
        .decode()
        .map_err(|e| ConvertError::Jpeg(format!("{e:?}")))?;
    let (w, h) = decoder
        .dimensions()
        .ok_or_else(|| ConvertError::Jpeg("missing dimensions".into()))?;
    let (w, h) = (w as u32, h as u32);
    if (w, h) != (frame.meta.width, frame.meta.height) {
        return Err(ConvertError::JpegSize {
            width: frame.meta.width,
            height: frame.meta.height,
            actual_width: w,
            actual_height: h,
        });
    }

    out.resize(w as usize * h as usize * DISPLAY_BPP, 0);
    for (c, px) in rgb.chunks_exact(3).zip(out.chunks_exact_mut(4)) {
        px.copy_from_slice(&[c[0], c[1], c[2], 255]);
    }
    Ok((w, h))
}

/// BT.601 YUYV to RGBA for one row
fn yuyv_row(src: &[u8], dst: &mut [u8]) {
    for (yuyv, px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(8)) {
        let (u, v) = (yuyv[1] as i32 - 128, yuyv[3] as i32 - 128);
        for (i, &y) in [yuyv[0], yuyv[2]].iter().enumerate() {
            let c = 298 * (y as i32 - 16);
            let r = (c + 409 * v + 128) >> 8;
            let g = (c - 100 * u - 208 * v + 128) >> 8;
            let b = (c + 516 * u + 128) >> 8;
            px[i * 4..i * 4 + 4].copy_from_slice(&[clamp(r), clamp(g), clamp(b), 255]);
        }
    }
    // Odd width: last pixel has no chroma pair
    if src.len() % 4 == 2 {
        let y = src[src.len() - 2];
        let n = dst.len();
        dst[n - 4..].copy_from_slice(&[y, y, y, 255]);
    }
}

fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Nearest-neighbour demosaic of an RGGB mosaic, one 2x2 cell at a time
fn demosaic_rggb(data: &[u8], stride: usize, width: usize, height: usize, out: &mut [u8]) {
    let at = |x: usize, y: usize| data[y.min(height - 1) * stride + x.min(width - 1)];
    for cy in (0..height).step_by(2) {
        for cx in (0..width).step_by(2) {
            let r = at(cx, cy);
            let g = ((at(cx + 1, cy) as u16 + at(cx, cy + 1) as u16) / 2) as u8;
            let b = at(cx + 1, cy + 1);
            for y in cy..(cy + 2).min(height) {
                for x in cx..(cx + 2).min(width) {
                    let o = (y * width + x) * DISPLAY_BPP;
                    out[o..o + 4].copy_from_slice(&[r, g, b, 255]);
                }
            }
        }
    }
}
