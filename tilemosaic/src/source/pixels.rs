//! RGBA8 buffer helpers shared by readers and the tile cache.

use image::imageops::{self, FilterType};
use image::RgbaImage;

/// Resamples `image` to exactly `width`×`height`.
pub fn resample(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    if image.width() == width * 2 && image.height() == height * 2 {
        return downsample_box_2x(image);
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Copies a sub-rectangle out of `image`.
pub fn crop(image: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> RgbaImage {
    imageops::crop_imm(image, x, y, width, height).to_image()
}

/// Pastes `part` into `target` with its upper-left corner at (x, y).
pub fn blit(target: &mut RgbaImage, part: &RgbaImage, x: u32, y: u32) {
    imageops::replace(target, part, x as i64, y as i64);
}

/// Halves both dimensions, averaging each 2×2 block.
pub fn downsample_box_2x(source: &RgbaImage) -> RgbaImage {
    let width = (source.width() / 2).max(1);
    let height = (source.height() / 2).max(1);
    let mut output = RgbaImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let sx = (x * 2).min(source.width() - 1);
            let sy = (y * 2).min(source.height() - 1);
            let sx1 = (sx + 1).min(source.width() - 1);
            let sy1 = (sy + 1).min(source.height() - 1);

            let block = [
                source.get_pixel(sx, sy),
                source.get_pixel(sx1, sy),
                source.get_pixel(sx, sy1),
                source.get_pixel(sx1, sy1),
            ];
            let mut avg = [0u8; 4];
            for (channel, out) in avg.iter_mut().enumerate() {
                let sum: u16 = block.iter().map(|p| p[channel] as u16).sum();
                *out = (sum / 4) as u8;
            }
            output.put_pixel(x, y, image::Rgba(avg));
        }
    }

    output
}
