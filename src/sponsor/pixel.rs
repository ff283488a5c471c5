//! Sponsor pattern baking: base64 upload -> pixel-art PNG on disk.
//!
//! Uploaded pattern images are downscaled to a fixed grid, quantized to a
//! small palette with ordered (Bayer) dithering, and written as PNGs under
//! the textures directory. Clients only ever receive URLs to the baked
//! files, never the raw upload.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Baked pattern edge length in pixels
pub const PATTERN_SIZE: u32 = 32;

/// The fixed bake palette (RGB)
const PALETTE: [[u8; 3]; 16] = [
    [0x00, 0x00, 0x00],
    [0x1d, 0x2b, 0x53],
    [0x7e, 0x25, 0x53],
    [0x00, 0x87, 0x51],
    [0xab, 0x52, 0x36],
    [0x5f, 0x57, 0x4f],
    [0xc2, 0xc3, 0xc7],
    [0xff, 0xf1, 0xe8],
    [0xff, 0x00, 0x4d],
    [0xff, 0xa3, 0x00],
    [0xff, 0xec, 0x27],
    [0x00, 0xe4, 0x36],
    [0x29, 0xad, 0xff],
    [0x83, 0x76, 0x9c],
    [0xff, 0x77, 0xa8],
    [0xff, 0xcc, 0xaa],
];

/// 4x4 Bayer threshold matrix
const BAYER: [[f32; 4]; 4] = [
    [0.0, 8.0, 2.0, 10.0],
    [12.0, 4.0, 14.0, 6.0],
    [3.0, 11.0, 1.0, 9.0],
    [15.0, 7.0, 13.0, 5.0],
];

/// Dither amplitude in 8-bit channel units
const DITHER_SPREAD: f32 = 48.0;

#[derive(Debug, Error)]
pub enum PixelError {
    #[error("invalid base64 pattern: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid PNG: {0}")]
    Decode(#[from] png::DecodingError),
    #[error("PNG encode failed: {0}")]
    Encode(#[from] png::EncodingError),
    #[error("unsupported bit depth")]
    UnsupportedDepth,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decode a base64 pattern (raw or data-URL), bake it, and write the PNG
pub fn bake_pattern(base64_data: &str, out_path: &Path) -> Result<(), PixelError> {
    let payload = base64_data
        .split_once("base64,")
        .map(|(_, rest)| rest)
        .unwrap_or(base64_data);
    let bytes = STANDARD.decode(payload.trim())?;

    let (pixels, width, height) = decode_rgba(&bytes)?;
    let small = downscale(&pixels, width, height, PATTERN_SIZE);
    let baked = quantize_dithered(&small, PATTERN_SIZE);
    encode_png(&baked, PATTERN_SIZE, out_path)
}

fn decode_rgba(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32), PixelError> {
    let decoder = png::Decoder::new(Cursor::new(bytes));
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf)?;
    if info.bit_depth != png::BitDepth::Eight {
        return Err(PixelError::UnsupportedDepth);
    }
    let data = &buf[..info.buffer_size()];

    let rgba = match info.color_type {
        png::ColorType::Rgba => data.to_vec(),
        png::ColorType::Rgb => data
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        png::ColorType::Grayscale => data.iter().flat_map(|&g| [g, g, g, 255]).collect(),
        png::ColorType::GrayscaleAlpha => data
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        png::ColorType::Indexed => {
            // read_info expands indexed images only when asked; treat as
            // unsupported rather than guessing the palette
            return Err(PixelError::UnsupportedDepth);
        }
    };
    Ok((rgba, info.width, info.height))
}

/// Nearest-neighbor downscale to size x size RGBA
fn downscale(pixels: &[u8], width: u32, height: u32, size: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        let sy = (y * height / size).min(height - 1);
        for x in 0..size {
            let sx = (x * width / size).min(width - 1);
            let idx = ((sy * width + sx) * 4) as usize;
            out.extend_from_slice(&pixels[idx..idx + 4]);
        }
    }
    out
}

/// Quantize to the fixed palette with ordered dithering; alpha snaps to
/// opaque/transparent
fn quantize_dithered(pixels: &[u8], size: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len());
    for y in 0..size {
        for x in 0..size {
            let idx = ((y * size + x) * 4) as usize;
            let threshold = (BAYER[(y % 4) as usize][(x % 4) as usize] / 16.0 - 0.5) * DITHER_SPREAD;

            let dithered = [
                (pixels[idx] as f32 + threshold).clamp(0.0, 255.0),
                (pixels[idx + 1] as f32 + threshold).clamp(0.0, 255.0),
                (pixels[idx + 2] as f32 + threshold).clamp(0.0, 255.0),
            ];
            let color = nearest_palette(dithered);
            let alpha = if pixels[idx + 3] >= 128 { 255 } else { 0 };
            out.extend_from_slice(&[color[0], color[1], color[2], alpha]);
        }
    }
    out
}

fn nearest_palette(rgb: [f32; 3]) -> [u8; 3] {
    let mut best = PALETTE[0];
    let mut best_dist = f32::MAX;
    for color in PALETTE {
        let dist = (rgb[0] - color[0] as f32).powi(2)
            + (rgb[1] - color[1] as f32).powi(2)
            + (rgb[2] - color[2] as f32).powi(2);
        if dist < best_dist {
            best_dist = dist;
            best = color;
        }
    }
    best
}

fn encode_png(pixels: &[u8], size: u32, out_path: &Path) -> Result<(), PixelError> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(out_path)?;
    let writer = std::io::BufWriter::new(file);
    let mut encoder = png::Encoder::new(writer, size, size);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut png_writer = encoder.write_header()?;
    png_writer.write_image_data(pixels)?;
    Ok(())
}
