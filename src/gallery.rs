//! Classic 3x3 and 5x5 image kernels applied to a photograph.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    tensor::{module::conv2d, ops::ConvOptions},
};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use thiserror::Error;

/// Photograph shown in the gallery.
pub const GALLERY_URL: &str = "https://images.unsplash.com/photo-1503023345310-bd7c1de61c7d?w=640";

const GUTTER: u32 = 8;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// A square, odd-sized weight matrix, row-major. Anchored at its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kernel {
    size: usize,
    weights: &'static [f32],
}

impl Kernel {
    pub const fn new(size: usize, weights: &'static [f32]) -> Self {
        assert!(size % 2 == 1, "Kernel size must be odd");
        assert!(weights.len() == size * size, "Kernel weights must fill a square");
        Self { size, weights }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn weights(&self) -> &'static [f32] {
        self.weights
    }
}

#[rustfmt::skip]
pub const SHARPEN: Kernel = Kernel::new(3, &[
     0.0, -1.0,  0.0,
    -1.0,  7.0, -1.0,
     0.0, -1.0,  0.0,
]);

#[rustfmt::skip]
pub const EDGE: Kernel = Kernel::new(3, &[
    -1.0, -1.0, -1.0,
    -1.0,  8.0, -1.0,
    -1.0, -1.0, -1.0,
]);

const BLUR_WEIGHTS: [f32; 9] = [1.0 / 9.0; 9];
pub const BLUR: Kernel = Kernel::new(3, &BLUR_WEIGHTS);

const BOX_BLUR_WEIGHTS: [f32; 25] = [1.0 / 25.0; 25];
pub const BOX_BLUR: Kernel = Kernel::new(5, &BOX_BLUR_WEIGHTS);

#[rustfmt::skip]
pub const EMBOSS: Kernel = Kernel::new(3, &[
    -2.0, -1.0, 0.0,
    -1.0,  1.0, 1.0,
     0.0,  1.0, 2.0,
]);

#[rustfmt::skip]
pub const OUTLINE: Kernel = Kernel::new(3, &[
    1.0,  1.0, 1.0,
    1.0, -8.0, 1.0,
    1.0,  1.0, 1.0,
]);

/// Horizontal derivative, for grayscale images.
#[rustfmt::skip]
pub const SOBEL_X: Kernel = Kernel::new(3, &[
    -1.0, 0.0, 1.0,
    -2.0, 0.0, 2.0,
    -1.0, 0.0, 1.0,
]);

/// How a gallery panel is derived from the photograph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Filter {
    Original,
    /// Every color channel convolved with the same kernel.
    Convolve(Kernel),
    /// Absolute horizontal gradient of the grayscale image.
    SobelX,
}

/// Panels in display order.
pub const FILTERS: [(&str, Filter); 8] = [
    ("Original", Filter::Original),
    ("Sharpened", Filter::Convolve(SHARPEN)),
    ("Edge Detection", Filter::Convolve(EDGE)),
    ("Blur (3x3)", Filter::Convolve(BLUR)),
    ("Box Blur (5x5)", Filter::Convolve(BOX_BLUR)),
    ("Emboss", Filter::Convolve(EMBOSS)),
    ("Outline", Filter::Convolve(OUTLINE)),
    ("Sobel X", Filter::SobelX),
];

#[derive(Debug, Clone)]
pub struct Panel {
    pub title: &'static str,
    pub image: RgbImage,
}

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("request to {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Downloads and decodes the photograph at `url`.
///
/// Failures are logged and yield `None`; the caller decides whether to go on without an image.
pub fn load_image_from_url(url: &str) -> Option<RgbImage> {
    match fetch(url) {
        Ok(bytes) => decode_image(&bytes),
        Err(err) => {
            log::error!("Failed to load image: {err}");
            None
        }
    }
}

fn fetch(url: &str) -> Result<Vec<u8>, GalleryError> {
    reqwest::blocking::get(url)
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.bytes())
        .map(|bytes| bytes.to_vec())
        .map_err(|source| GalleryError::Download {
            url: url.to_string(),
            source,
        })
}

/// Decodes an encoded image into 8-bit RGB channel order.
pub fn decode_image(bytes: &[u8]) -> Option<RgbImage> {
    match image::load_from_memory(bytes) {
        Ok(image) => Some(image.to_rgb8()),
        Err(err) => {
            log::error!("Failed to load image: image could not be decoded ({err})");
            None
        }
    }
}

/// Border extension that mirrors around the edge pixel without repeating it: `cb|abcd|cb`.
fn reflect_101(index: isize, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }

    let last = len as isize - 1;
    let mut i = index;
    while i < 0 || i > last {
        i = if i < 0 { -i } else { 2 * last - i };
    }
    i as usize
}

fn saturate(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Correlates each channel of an interleaved `[height, width, channels]` buffer with `kernel`.
///
/// The output has the input's size; borders are extended with [reflect_101].
fn convolve<B: Backend>(
    data: &[u8],
    [height, width, channels]: [usize; 3],
    kernel: &Kernel,
    device: &B::Device,
) -> Vec<f32> {
    let size = kernel.size();
    let radius = size / 2;
    let padded_height = height + 2 * radius;
    let padded_width = width + 2 * radius;

    let mut padded = Vec::with_capacity(padded_height * padded_width * channels);
    for y in 0..padded_height {
        let src_y = reflect_101(y as isize - radius as isize, height);
        for x in 0..padded_width {
            let src_x = reflect_101(x as isize - radius as isize, width);
            let offset = (src_y * width + src_x) * channels;
            padded.extend(data[offset..offset + channels].iter().map(|v| *v as f32));
        }
    }

    let input = Tensor::<B, 3>::from_data(
        TensorData::new(padded, [padded_height, padded_width, channels])
            .convert::<B::FloatElem>(),
        device,
    )
    .swap_dims(1, 2) // [H, C, W]
    .swap_dims(0, 1) // [C, H, W]
    .unsqueeze::<4>();

    let weight = Tensor::<B, 2>::from_data(
        TensorData::new(kernel.weights().to_vec(), [size, size]).convert::<B::FloatElem>(),
        device,
    )
    .reshape([1, 1, size, size]);
    // One group per channel, all sharing the kernel.
    let weight = Tensor::cat(vec![weight; channels], 0);

    let output = conv2d(
        input,
        weight,
        None,
        ConvOptions::new([1, 1], [0, 0], [1, 1], channels),
    );

    output
        .reshape([channels, height, width])
        .swap_dims(0, 1) // [H, C, W]
        .swap_dims(1, 2) // [H, W, C]
        .into_data()
        .convert::<f32>()
        .iter::<f32>()
        .collect()
}

/// Applies `kernel` to every channel, saturating the result to `u8`.
pub fn filter2d<B: Backend>(image: &RgbImage, kernel: &Kernel, device: &B::Device) -> RgbImage {
    let (width, height) = image.dimensions();
    let values = convolve::<B>(
        image.as_raw(),
        [height as usize, width as usize, 3],
        kernel,
        device,
    );

    RgbImage::from_fn(width, height, |x, y| {
        let i = ((y * width + x) * 3) as usize;
        Rgb([
            saturate(values[i]),
            saturate(values[i + 1]),
            saturate(values[i + 2]),
        ])
    })
}

/// Luma with the ITU-R BT.601 weights.
pub fn to_gray(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        Luma([saturate(0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)])
    })
}

/// Absolute horizontal Sobel gradient of the grayscale image.
pub fn sobel_x<B: Backend>(image: &RgbImage, device: &B::Device) -> GrayImage {
    let gray = to_gray(image);
    let (width, height) = gray.dimensions();
    let values = convolve::<B>(
        gray.as_raw(),
        [height as usize, width as usize, 1],
        &SOBEL_X,
        device,
    );

    GrayImage::from_fn(width, height, |x, y| {
        Luma([saturate(values[(y * width + x) as usize].abs())])
    })
}

pub fn apply<B: Backend>(image: &RgbImage, filter: &Filter, device: &B::Device) -> RgbImage {
    match filter {
        Filter::Original => image.clone(),
        Filter::Convolve(kernel) => filter2d::<B>(image, kernel, device),
        Filter::SobelX => DynamicImage::ImageLuma8(sobel_x::<B>(image, device)).to_rgb8(),
    }
}

/// The original photograph followed by every filter of [FILTERS], each applied independently.
pub fn build_gallery<B: Backend>(image: &RgbImage, device: &B::Device) -> Vec<Panel> {
    FILTERS
        .iter()
        .map(|(title, filter)| {
            log::info!("Applying {title}");
            Panel {
                title: *title,
                image: apply::<B>(image, filter, device),
            }
        })
        .collect()
}

/// Lays the panels out row by row, `columns` per row, on a white background.
pub fn compose_grid(panels: &[Panel], columns: usize) -> RgbImage {
    let columns = columns.max(1) as u32;
    let rows = (panels.len() as u32).div_ceil(columns);
    let cell_width = panels.iter().map(|p| p.image.width()).max().unwrap_or(0);
    let cell_height = panels.iter().map(|p| p.image.height()).max().unwrap_or(0);

    let mut canvas = RgbImage::from_pixel(
        columns * cell_width + (columns + 1) * GUTTER,
        rows * cell_height + (rows + 1) * GUTTER,
        BACKGROUND,
    );

    for (index, panel) in panels.iter().enumerate() {
        let column = index as u32 % columns;
        let row = index as u32 / columns;
        let x = GUTTER + column * (cell_width + GUTTER);
        let y = GUTTER + row * (cell_height + GUTTER);
        image::imageops::replace(&mut canvas, &panel.image, x as i64, y as i64);
    }

    canvas
}

/// File name fragment for a panel title, e.g. `Blur (3x3)` becomes `blur-3x3`.
fn slug(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Writes every panel and the 2x4 grid as PNG files in `dir`, returning the grid path.
pub fn save_gallery(panels: &[Panel], dir: impl AsRef<Path>) -> Result<PathBuf, GalleryError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|source| GalleryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let save = |image: &RgbImage, path: PathBuf| {
        image
            .save(&path)
            .map_err(|source| GalleryError::Encode { path, source })
    };

    for (index, panel) in panels.iter().enumerate() {
        let path = dir.join(format!("{index}-{}.png", slug(panel.title)));
        save(&panel.image, path)?;
    }

    let grid = dir.join("grid.png");
    save(&compose_grid(panels, 4), grid.clone())?;
    log::info!("Saved gallery of {} panels to {}", panels.len(), dir.display());

    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use rstest::rstest;
    use std::io::Cursor;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn constant(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    fn photo() -> RgbImage {
        RgbImage::from_fn(12, 9, |x, y| Rgb([(x * 20) as u8, (y * 25) as u8, 90]))
    }

    #[rstest]
    #[case(0, 5, 0)]
    #[case(4, 5, 4)]
    #[case(-1, 5, 1)]
    #[case(-2, 5, 2)]
    #[case(5, 5, 3)]
    #[case(6, 5, 2)]
    #[case(-2, 2, 0)]
    #[case(3, 1, 0)]
    fn reflects_without_repeating_the_edge(
        #[case] index: isize,
        #[case] len: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(reflect_101(index, len), expected);
    }

    #[rstest]
    #[case(BLUR, 60, 60)]
    #[case(BOX_BLUR, 60, 60)]
    #[case(EMBOSS, 60, 60)]
    #[case(EDGE, 60, 0)]
    #[case(OUTLINE, 60, 0)]
    #[case(SHARPEN, 50, 150)]
    #[case(SHARPEN, 100, 255)]
    fn kernels_on_constant_images(#[case] kernel: Kernel, #[case] value: u8, #[case] expected: u8) {
        let device = Default::default();
        let image = constant(7, 5, value);

        let filtered = filter2d::<TestBackend>(&image, &kernel, &device);

        assert_eq!(filtered.dimensions(), (7, 5));
        assert!(filtered.pixels().all(|p| p.0 == [expected; 3]));
    }

    #[test]
    fn filters_channels_independently() {
        let device = Default::default();
        let image = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));

        let filtered = filter2d::<TestBackend>(&image, &SHARPEN, &device);

        assert!(filtered.pixels().all(|p| p.0 == [30, 60, 90]));
    }

    #[test]
    fn large_kernel_on_tiny_image() {
        let device = Default::default();
        let image = constant(2, 3, 42);

        let filtered = filter2d::<TestBackend>(&image, &BOX_BLUR, &device);

        assert_eq!(filtered.dimensions(), (2, 3));
        assert!(filtered.pixels().all(|p| p.0 == [42; 3]));
    }

    #[test]
    fn sobel_x_measures_horizontal_gradient() {
        let device = Default::default();
        let ramp = RgbImage::from_fn(6, 4, |x, _| {
            let v = (x * 10) as u8;
            Rgb([v, v, v])
        });

        let gradient = sobel_x::<TestBackend>(&ramp, &device);

        assert_eq!(gradient.get_pixel(2, 1).0[0], 80);
        // Reflected borders mirror the neighbor, so the derivative vanishes there.
        assert_eq!(gradient.get_pixel(0, 1).0[0], 0);
        assert_eq!(gradient.get_pixel(5, 1).0[0], 0);
    }

    #[test]
    fn sobel_x_takes_absolute_value() {
        let device = Default::default();
        let ramp = RgbImage::from_fn(6, 4, |x, _| {
            let v = 200 - (x * 10) as u8;
            Rgb([v, v, v])
        });

        let gradient = sobel_x::<TestBackend>(&ramp, &device);

        assert_eq!(gradient.get_pixel(3, 2).0[0], 80);
    }

    #[test]
    fn gray_uses_bt601_weights() {
        let image = RgbImage::from_pixel(1, 1, Rgb([100, 200, 50]));

        assert_eq!(to_gray(&image).get_pixel(0, 0).0[0], 153);
    }

    #[test]
    fn gallery_has_eight_titled_panels() {
        let device = Default::default();
        let image = photo();

        let panels = build_gallery::<TestBackend>(&image, &device);

        let titles: Vec<_> = panels.iter().map(|p| p.title).collect();
        assert_eq!(
            titles,
            vec![
                "Original",
                "Sharpened",
                "Edge Detection",
                "Blur (3x3)",
                "Box Blur (5x5)",
                "Emboss",
                "Outline",
                "Sobel X"
            ]
        );
        assert_eq!(panels[0].image, image);
        assert!(panels.iter().all(|p| p.image.dimensions() == (12, 9)));
    }

    #[test]
    fn grid_is_two_rows_of_four() {
        let panels: Vec<_> = FILTERS
            .iter()
            .map(|(title, _)| Panel {
                title: *title,
                image: constant(10, 6, 0),
            })
            .collect();

        let grid = compose_grid(&panels, 4);

        assert_eq!(grid.dimensions(), (4 * 10 + 5 * GUTTER, 2 * 6 + 3 * GUTTER));
        assert_eq!(grid.get_pixel(0, 0), &BACKGROUND);
        assert_eq!(grid.get_pixel(GUTTER, GUTTER).0, [0, 0, 0]);
    }

    #[test]
    fn decodes_valid_images() {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(photo())
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let decoded = decode_image(&bytes).unwrap();

        assert_eq!(decoded, photo());
    }

    #[test]
    fn undecodable_content_yields_no_image() {
        assert!(decode_image(b"<html>not an image</html>").is_none());
    }

    #[test]
    fn unreachable_url_yields_no_image() {
        assert!(load_image_from_url("http://127.0.0.1:9/photo.jpg").is_none());
    }

    #[test]
    fn saves_panels_and_grid() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let panels = build_gallery::<TestBackend>(&photo(), &device);

        let grid = save_gallery(&panels, dir.path()).unwrap();

        assert!(grid.exists());
        assert!(dir.path().join("3-blur-3x3.png").exists());
        assert!(dir.path().join("7-sobel-x.png").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 9);
    }

    #[test]
    fn slugs_are_file_friendly() {
        assert_eq!(slug("Box Blur (5x5)"), "box-blur-5x5");
        assert_eq!(slug("Edge Detection"), "edge-detection");
    }
}
