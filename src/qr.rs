use crate::errors::AuthError;
use image::{imageops, ImageBuffer, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;

pub const DEFAULT_SIZE: u32 = 256;
const MIN_SIZE: u32 = 64;
const MAX_SIZE: u32 = 2048;
const MARGIN_MODULES: u32 = 1;

/// Render `content` as a square QR code PNG, `size` pixels wide.
///
/// Size is clamped to [64, 2048] with 0 meaning the default. Modules are
/// whole pixels; the symbol is centred and the leftover is white padding.
/// A symbol too dense to fit gets one pixel per module and a larger image.
pub fn generate_png(content: &str, size: u32) -> Result<Vec<u8>, AuthError> {
    let image = generate_image(content, size)?;
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

pub fn generate_image(content: &str, size: u32) -> Result<ImageBuffer<Luma<u8>, Vec<u8>>, AuthError> {
    if content.trim().is_empty() {
        return Err(AuthError::BadRequest(
            "QR content must not be empty".to_string(),
        ));
    }
    let target = clamp_size(size);

    let code = QrCode::with_error_correction_level(content.as_bytes(), EcLevel::M)?;
    let modules = code.width() as u32 + 2 * MARGIN_MODULES;
    let module_px = (target / modules).max(1);

    let symbol = code
        .render::<Luma<u8>>()
        .quiet_zone(false)
        .module_dimensions(module_px, module_px)
        .build();

    let edge = modules * module_px;
    let canvas_px = target.max(edge);
    let mut canvas = ImageBuffer::from_pixel(canvas_px, canvas_px, Luma([255u8]));
    let offset = i64::from((canvas_px - edge) / 2 + MARGIN_MODULES * module_px);
    imageops::overlay(&mut canvas, &symbol, offset, offset);
    Ok(canvas)
}

fn clamp_size(size: u32) -> u32 {
    if size == 0 {
        DEFAULT_SIZE
    } else {
        size.clamp(MIN_SIZE, MAX_SIZE)
    }
}
