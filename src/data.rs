use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::dataset::{DigitItem, RawImage, IMAGE_SIZE};

/// Largest raw pixel intensity.
pub const MAX_INTENSITY: f32 = 255.0;

/// Pixel intensities rescaled to `[0.0, 1.0]`.
///
/// Only [normalize] produces this type, so an image cannot be rescaled twice.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    pixels: [[f32; IMAGE_SIZE]; IMAGE_SIZE],
}

/// Divides every intensity by 255.
pub fn normalize(image: &RawImage) -> NormalizedImage {
    let mut pixels = [[0f32; IMAGE_SIZE]; IMAGE_SIZE];
    for (row, raw) in pixels.iter_mut().zip(image.iter()) {
        for (pixel, value) in row.iter_mut().zip(raw.iter()) {
            *pixel = *value as f32 / MAX_INTENSITY;
        }
    }

    NormalizedImage { pixels }
}

impl NormalizedImage {
    pub fn pixels(&self) -> &[[f32; IMAGE_SIZE]; IMAGE_SIZE] {
        &self.pixels
    }

    /// The image as a `[height, width, channel = 1]` tensor.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        let data = TensorData::from(self.pixels).convert::<B::FloatElem>();
        Tensor::<B, 2>::from_data(data, device).reshape([IMAGE_SIZE, IMAGE_SIZE, 1])
    }
}

/// Stacks images into a `[batch, height, width, channel = 1]` tensor.
pub fn images_to_tensor<B: Backend>(
    images: &[NormalizedImage],
    device: &B::Device,
) -> Tensor<B, 4> {
    let images = images
        .iter()
        .map(|image| image.to_tensor::<B>(device))
        .collect();

    Tensor::stack(images, 0)
}

#[derive(Clone, Debug)]
pub struct DigitBatcher<B: Backend> {
    device: B::Device,
}

#[derive(Clone, Debug)]
pub struct DigitBatch<B: Backend> {
    /// Shape `[batch, 28, 28, 1]`, values in `[0, 1]`.
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> DigitBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<DigitItem, DigitBatch<B>> for DigitBatcher<B> {
    fn batch(&self, items: Vec<DigitItem>) -> DigitBatch<B> {
        let images: Vec<_> = items.iter().map(|item| normalize(&item.image)).collect();
        let images = images_to_tensor(&images, &self.device);

        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    TensorData::from([(item.label as i64).elem::<B::IntElem>()]),
                    &self.device,
                )
            })
            .collect();

        let targets = Tensor::cat(targets, 0);

        DigitBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn ramp() -> RawImage {
        let mut image = [[0u8; IMAGE_SIZE]; IMAGE_SIZE];
        for (y, row) in image.iter_mut().enumerate() {
            for (x, pixel) in row.iter_mut().enumerate() {
                *pixel = ((y * IMAGE_SIZE + x) % 256) as u8;
            }
        }
        image
    }

    #[test]
    fn normalized_values_are_in_unit_range() {
        let image = normalize(&ramp());

        assert!(image
            .pixels()
            .iter()
            .flatten()
            .all(|value| (0.0..=1.0).contains(value)));
        assert_eq!(image.pixels()[0][0], 0.0);
        assert_eq!(image.pixels()[9][3], 255.0 / MAX_INTENSITY);
    }

    #[test]
    fn tensor_layout_appends_a_channel_dimension() {
        let device = Default::default();
        let images = vec![normalize(&ramp()); 3];

        let tensor = images_to_tensor::<TestBackend>(&images, &device);

        assert_eq!(tensor.dims(), [3, IMAGE_SIZE, IMAGE_SIZE, 1]);
    }

    #[test]
    fn tensor_keeps_row_major_pixels() {
        let device = Default::default();
        let image = normalize(&ramp());

        let values = image
            .to_tensor::<TestBackend>(&device)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(values[IMAGE_SIZE + 2], (IMAGE_SIZE + 2) as f32 / MAX_INTENSITY);
    }

    #[test]
    fn batcher_produces_normalized_images_and_integer_targets() {
        let device = Default::default();
        let batcher = DigitBatcher::<TestBackend>::new(device);
        let items = vec![
            DigitItem {
                image: [[255; IMAGE_SIZE]; IMAGE_SIZE],
                label: 7,
            },
            DigitItem {
                image: ramp(),
                label: 2,
            },
        ];

        let batch = batcher.batch(items);

        assert_eq!(batch.images.dims(), [2, IMAGE_SIZE, IMAGE_SIZE, 1]);
        let max = batch.images.clone().max().into_scalar();
        let min = batch.images.min().into_scalar();
        assert_eq!(max, 1.0);
        assert_eq!(min, 0.0);

        let targets = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![7, 2]);
    }
}
