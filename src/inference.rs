use std::path::Path;

use burn::{data::dataset::Dataset, prelude::*};
use image::{imageops::FilterType, DynamicImage, GrayImage, Luma};
use thiserror::Error;

use crate::data::{images_to_tensor, normalize};
use crate::dataset::{DigitItem, RawImage, IMAGE_SIZE};
use crate::model::Model;

/// A probability distribution over the digit classes.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// Index of the most probable class. Ties resolve to the lowest index.
    pub fn label(&self) -> usize {
        self.probabilities
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (index, p)| {
                if *p > best.1 {
                    (index, *p)
                } else {
                    best
                }
            })
            .0
    }

    /// Probability of the predicted class.
    pub fn confidence(&self) -> f32 {
        self.probabilities
            .get(self.label())
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("failed to open image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Class probabilities for each image of a `[batch, 28, 28, 1]` tensor.
pub fn predict<B: Backend>(model: &Model<B>, images: Tensor<B, 4>) -> Vec<Prediction> {
    let probabilities = model.probabilities(images);
    let [_, num_classes] = probabilities.dims();

    probabilities
        .into_data()
        .convert::<f32>()
        .iter::<f32>()
        .collect::<Vec<_>>()
        .chunks(num_classes)
        .map(|row| Prediction {
            probabilities: row.to_vec(),
        })
        .collect()
}

/// Predicts every item of a split, `batch_size` items at a time, in dataset order.
pub fn predict_dataset<B: Backend, D: Dataset<DigitItem>>(
    model: &Model<B>,
    dataset: &D,
    batch_size: usize,
    device: &B::Device,
) -> Vec<Prediction> {
    let batch_size = batch_size.max(1);
    let mut predictions = Vec::with_capacity(dataset.len());

    for start in (0..dataset.len()).step_by(batch_size) {
        let end = usize::min(start + batch_size, dataset.len());
        let images: Vec<_> = (start..end)
            .filter_map(|index| dataset.get(index))
            .map(|item| normalize(&item.image))
            .collect();

        if images.is_empty() {
            continue;
        }

        predictions.extend(predict(model, images_to_tensor(&images, device)));
    }

    predictions
}

/// Turns a free-form drawing into an MNIST-like image.
///
/// MNIST digits are bright strokes on a dark background. The drawing is laid over a white
/// canvas, inverted when that canvas is light, stretched so the strongest stroke reaches full
/// intensity, then resized to 28x28.
pub fn prepare_drawing(drawing: &DynamicImage) -> RawImage {
    let mut gray = flatten_on_white(drawing);

    let pixels = gray.as_raw();
    let mean = pixels.iter().map(|p| *p as u64).sum::<u64>() / pixels.len().max(1) as u64;
    if mean > 127 {
        image::imageops::invert(&mut gray);
    }

    // Mid-tone ink stays dim after inversion.
    let peak = gray.pixels().map(|p| p.0[0]).max().unwrap_or(0);
    if peak > 0 && peak < u8::MAX {
        for pixel in gray.pixels_mut() {
            pixel.0[0] = (pixel.0[0] as u32 * u8::MAX as u32 / peak as u32) as u8;
        }
    }

    let resized = image::imageops::resize(
        &gray,
        IMAGE_SIZE as u32,
        IMAGE_SIZE as u32,
        FilterType::Triangle,
    );

    let mut image = [[0u8; IMAGE_SIZE]; IMAGE_SIZE];
    for (x, y, pixel) in resized.enumerate_pixels() {
        image[y as usize][x as usize] = pixel.0[0];
    }
    image
}

/// BT.601 luma of `drawing` composited over white, so transparent areas read as blank paper.
fn flatten_on_white(drawing: &DynamicImage) -> GrayImage {
    let rgba = drawing.to_rgba8();

    GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        let alpha = a as f32 / 255.0;
        Luma([(luma * alpha + 255.0 * (1.0 - alpha)).round() as u8])
    })
}

/// Classifies the digit drawn in the image file at `path`.
pub fn classify_image_file<B: Backend>(
    model: &Model<B>,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<Prediction, InferenceError> {
    let path = path.as_ref();
    let drawing = image::open(path).map_err(|source| InferenceError::Image {
        path: path.display().to_string(),
        source,
    })?;

    let image = normalize(&prepare_drawing(&drawing));
    let prediction = predict(model, images_to_tensor(&[image], device))
        .into_iter()
        .next()
        .unwrap_or(Prediction {
            probabilities: Vec::new(),
        });

    log::info!(
        "Classified {} as {} ({:.1}%)",
        path.display(),
        prediction.label(),
        prediction.confidence() * 100.0
    );

    Ok(prediction)
}
