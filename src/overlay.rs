use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array2;
use thiserror::Error;

/// Fixed output canvas, matching the mask the segmentation model predicts.
pub const CANVAS: u32 = 256;

// addWeighted-style blend: the weights are applied as-is (their sum exceeds
// one) and each channel saturates at 255.
const IMAGE_WEIGHT: f32 = 0.7;
const MASK_WEIGHT: f32 = 0.7;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("mask is {got_height}x{got_width}, expected {CANVAS}x{CANVAS}")]
    MaskShape { got_height: usize, got_width: usize },
}

pub struct Overlay {
    pub image: RgbImage,
    /// True iff every mask entry is zero; drives the "NO MASK" notice.
    pub mask_empty: bool,
}

/// Resizes the original upload to the canvas and blends a red false-color
/// rendition of the mask over it.
pub fn compose(original: &DynamicImage, mask: &Array2<f32>) -> Result<Overlay, OverlayError> {
    let (height, width) = mask.dim();
    if (height as u32, width as u32) != (CANVAS, CANVAS) {
        return Err(OverlayError::MaskShape {
            got_height: height,
            got_width: width,
        });
    }

    let resized = original
        .resize_exact(CANVAS, CANVAS, FilterType::CatmullRom)
        .to_rgb8();

    let mut image = RgbImage::new(CANVAS, CANVAS);
    let mut mask_empty = true;
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let mask_value = mask[[y as usize, x as usize]];
        if mask_value > 0.0 {
            mask_empty = false;
        }

        let source = resized.get_pixel(x, y);
        pixel[0] = blend(source[0], mask_value * 255.0);
        pixel[1] = blend(source[1], 0.0);
        pixel[2] = blend(source[2], 0.0);
    }

    Ok(Overlay { image, mask_empty })
}

fn blend(image_value: u8, mask_value: f32) -> u8 {
    let blended = IMAGE_WEIGHT * image_value as f32 + MASK_WEIGHT * mask_value;
    blended.round().clamp(0.0, 255.0) as u8
}
