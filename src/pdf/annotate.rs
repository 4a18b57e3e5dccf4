//! Field box overlays on rendered pages

use crate::error::{Error, Result};
use crate::labels::FormField;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

const OUTLINE: Rgba<u8> = Rgba([255, 0, 0, 255]);
const OUTLINE_WIDTH: u32 = 2;

/// Draw a red outline around every field box and encode the result as PNG.
///
/// Boxes are expected in normalized top-left space, the same space the
/// matcher works in, so they scale directly onto the image.
pub fn annotate_fields(image: &DynamicImage, fields: &[FormField]) -> Result<Vec<u8>> {
    let mut canvas = image.to_rgba8();
    let (width, height) = canvas.dimensions();

    if width > 0 && height > 0 {
        for field in fields {
            let (left, top, right, bottom) = field.bounding_box.to_pixels(width, height);
            draw_outline(&mut canvas, left, top, right, bottom);
        }
    }

    encode_png(canvas)
}

fn draw_outline(canvas: &mut RgbaImage, left: u32, top: u32, right: u32, bottom: u32) {
    for offset in 0..OUTLINE_WIDTH {
        let (l, t) = (left + offset, top + offset);
        let (r, b) = (right.saturating_sub(offset), bottom.saturating_sub(offset));
        if l > r || t > b {
            break;
        }

        for x in l..=r {
            canvas.put_pixel(x, t, OUTLINE);
            canvas.put_pixel(x, b, OUTLINE);
        }
        for y in t..=b {
            canvas.put_pixel(l, y, OUTLINE);
            canvas.put_pixel(r, y, OUTLINE);
        }
    }
}

fn encode_png(canvas: RgbaImage) -> Result<Vec<u8>> {
    let mut png_bytes = Vec::new();
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut std::io::Cursor::new(&mut png_bytes), ImageFormat::Png)
        .map_err(|e| Error::Image {
            reason: format!("Failed to encode PNG: {}", e),
        })?;
    Ok(png_bytes)
}
