use std::fs;
use std::path::Path;

use image::{GrayImage, Luma};

use crate::dataset::{RawImage, IMAGE_SIZE};

/// Each digit pixel becomes a `SCALE x SCALE` square in the preview.
const SCALE: u32 = 10;

/// How intensities map to gray levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colormap {
    /// Low values are dark.
    Gray,
    /// Low values are light, the way printed digits look.
    Binary,
}

/// Save a digit as an enlarged grayscale image, stretching its values to the full 0-255 range.
pub fn save_digit<P: AsRef<Path>>(
    pixels: &[[f32; IMAGE_SIZE]; IMAGE_SIZE],
    colormap: Colormap,
    path: P,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = path.as_ref();

    // Ensure the output directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let pixels = stretch(pixels);
    let size = IMAGE_SIZE as u32 * SCALE;
    let img = GrayImage::from_fn(size, size, |x, y| {
        let value = pixels[(y / SCALE) as usize][(x / SCALE) as usize];
        match colormap {
            Colormap::Gray => Luma([value]),
            Colormap::Binary => Luma([255 - value]),
        }
    });

    img.save(path)?;
    log::info!("Saved preview {}", path.display());
    Ok(())
}

/// Save a raw dataset image.
pub fn save_raw_digit<P: AsRef<Path>>(
    image: &RawImage,
    colormap: Colormap,
    path: P,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut pixels = [[0f32; IMAGE_SIZE]; IMAGE_SIZE];
    for (row, raw) in pixels.iter_mut().zip(image.iter()) {
        for (pixel, value) in row.iter_mut().zip(raw.iter()) {
            *pixel = *value as f32;
        }
    }
    save_digit(&pixels, colormap, path)
}

/// Pixel values as a right-aligned text grid, one image row per line.
pub fn pixel_table<T: std::fmt::Display>(pixels: &[[T; IMAGE_SIZE]; IMAGE_SIZE]) -> String {
    pixels
        .iter()
        .map(|row| {
            row.iter()
                .map(|value| format!("{value:>4}"))
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalize values from 0 to 255
fn stretch(pixels: &[[f32; IMAGE_SIZE]; IMAGE_SIZE]) -> [[u8; IMAGE_SIZE]; IMAGE_SIZE] {
    let (min, max) = pixels
        .iter()
        .flatten()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), v| {
            (min.min(*v), max.max(*v))
        });
    let range = if max - min == 0.0 { 1.0 } else { max - min };

    let mut out = [[0u8; IMAGE_SIZE]; IMAGE_SIZE];
    for (row, values) in out.iter_mut().zip(pixels.iter()) {
        for (pixel, value) in row.iter_mut().zip(values.iter()) {
            *pixel = ((value - min) / range * 255.0).round() as u8;
        }
    }
    out
}
