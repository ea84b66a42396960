use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use std::io::Cursor;

pub const ALLOWED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Ceiling on the decoded RGBA working set. Scanned pages above this get
/// shrunk before they go to the recognition service.
const PIXEL_BUFFER_CEILING: usize = 24 * 1024 * 1024;
const SHRINK_FACTOR: f32 = 0.8;

pub struct PreparedImage {
    pub base64: String,
    pub mime: &'static str,
}

/// Validates an uploaded page and preprocesses it for recognition:
/// iterative downscale under the working-memory ceiling, grayscale with a
/// linear contrast stretch, PNG re-encode, base64.
pub fn prepare_for_recognition(
    bytes: &[u8],
    mime: &str,
    max_upload_bytes: usize,
) -> Result<PreparedImage> {
    if !ALLOWED_MIME_TYPES.contains(&mime) {
        return Err(Error::BadRequest(format!(
            "Unsupported image type: {} (expected JPEG, PNG or WebP)",
            mime
        )));
    }
    if bytes.len() > max_upload_bytes {
        return Err(Error::BadRequest(format!(
            "Image is too large: {} bytes (limit {})",
            bytes.len(),
            max_upload_bytes
        )));
    }

    let img = image::load_from_memory(bytes)
        .map_err(|e| Error::BadRequest(format!("Could not decode image: {}", e)))?;

    let img = shrink_to_ceiling(img, PIXEL_BUFFER_CEILING);
    let img = stretch_contrast(img);

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageOutputFormat::Png)
        .map_err(|e| Error::Internal(format!("Failed to re-encode image: {}", e)))?;

    Ok(PreparedImage {
        base64: BASE64.encode(buf.into_inner()),
        mime: "image/png",
    })
}

fn working_set(img: &DynamicImage) -> usize {
    img.width() as usize * img.height() as usize * 4
}

fn shrink_to_ceiling(mut img: DynamicImage, ceiling: usize) -> DynamicImage {
    while working_set(&img) > ceiling {
        let w = ((img.width() as f32 * SHRINK_FACTOR) as u32).max(1);
        let h = ((img.height() as f32 * SHRINK_FACTOR) as u32).max(1);
        if w == img.width() && h == img.height() {
            break;
        }
        img = img.resize(w, h, FilterType::Triangle);
    }
    img
}

/// Grayscale + per-pixel linear stretch over the observed luma range.
fn stretch_contrast(img: DynamicImage) -> DynamicImage {
    let mut gray = img.to_luma8();

    let (mut lo, mut hi) = (u8::MAX, u8::MIN);
    for pixel in gray.pixels() {
        lo = lo.min(pixel.0[0]);
        hi = hi.max(pixel.0[0]);
    }
    if hi <= lo {
        return DynamicImage::ImageLuma8(gray);
    }

    let range = (hi - lo) as u16;
    for pixel in gray.pixels_mut() {
        let v = (pixel.0[0] - lo) as u16;
        pixel.0[0] = ((v * 255) / range) as u8;
    }
    DynamicImage::ImageLuma8(gray)
}
