// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Letterbox preprocessing into the model's CHW input tensor

use crate::error::{Error, Result};
use crate::projection::Letterbox;
use crate::types::ImageMeta;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage, RgbaImage};

/// `1x3xSxS` float tensor in `[0, 1]` and the transform that produced it
#[derive(Debug, Clone)]
pub struct LetterboxedTensor {
    pub data: Vec<f32>,
    pub letterbox: Letterbox,
}

impl LetterboxedTensor {
    pub fn shape(&self) -> [usize; 4] {
        let size = self.letterbox.input_size as usize;
        [1, 3, size, size]
    }
}

/// Resize RGBA pixels into a centered square on a black canvas
pub fn letterbox_tensor(
    rgba: &[u8],
    width: u32,
    height: u32,
    input_size: u32,
) -> Result<LetterboxedTensor> {
    if width == 0 || height == 0 || input_size == 0 {
        return Err(Error::InvalidImage(format!(
            "cannot letterbox {}x{} into {}",
            width, height, input_size
        )));
    }
    let source = RgbaImage::from_raw(width, height, rgba.to_vec()).ok_or_else(|| {
        Error::InvalidImage(format!(
            "expected {} RGBA bytes for {}x{}, got {}",
            width as usize * height as usize * 4,
            width,
            height,
            rgba.len()
        ))
    })?;

    let letterbox = Letterbox::fit(ImageMeta::new(width as f64, height as f64), input_size);
    let resized_w = ((width as f64 * letterbox.scale).round() as u32).clamp(1, input_size);
    let resized_h = ((height as f64 * letterbox.scale).round() as u32).clamp(1, input_size);

    let rgb = DynamicImage::ImageRgba8(source).to_rgb8();
    let resized = imageops::resize(&rgb, resized_w, resized_h, FilterType::Triangle);

    let mut canvas = RgbImage::new(input_size, input_size);
    imageops::replace(
        &mut canvas,
        &resized,
        letterbox.pad_x.floor() as i64,
        letterbox.pad_y.floor() as i64,
    );

    let plane = (input_size * input_size) as usize;
    let mut data = vec![0.0f32; plane * 3];
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let offset = (y * input_size + x) as usize;
        for channel in 0..3 {
            data[channel * plane + offset] = pixel.0[channel] as f32 / 255.0;
        }
    }

    Ok(LetterboxedTensor { data, letterbox })
}
