use std::sync::Arc;

use burn::data::dataset::transform::PartialDataset;
use burn::data::dataset::vision::{MnistDataset, MnistItem};
use burn::data::dataset::{Dataset, InMemDataset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side length of a digit image.
pub const IMAGE_SIZE: usize = 28;

/// Number of digit classes.
pub const NUM_CLASSES: usize = 10;

/// Raw grayscale intensities, row-major, `0..=255`.
pub type RawImage = [[u8; IMAGE_SIZE]; IMAGE_SIZE];

/// A labeled digit image.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DigitItem {
    /// Image as a 2D array of intensities.
    pub image: RawImage,

    /// Digit depicted by the image, in `0..=9`.
    pub label: u8,
}

/// Which half of the fixed MNIST partition to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }

    /// Number of items the standard dataset holds for this split.
    pub fn expected_len(&self) -> usize {
        match self {
            Split::Train => 60_000,
            Split::Test => 10_000,
        }
    }
}

/// Error type for [DigitDataset](DigitDataset).
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("{split} split holds {found} items, expected {expected}")]
    UnexpectedLength {
        split: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("label {label} at index {index} is outside 0..=9")]
    LabelOutOfRange { index: usize, label: u8 },

    #[error("pixel value {value} at index {index} is outside 0..=255")]
    PixelOutOfRange { index: usize, value: f32 },
}

/// The MNIST handwritten digits: 28x28 grayscale images in 10 classes, 60,000 for training and
/// 10,000 for testing.
///
/// Downloading and caching are left to burn's [MnistDataset]; its items are checked and stored
/// as integer intensities.
pub struct DigitDataset {
    dataset: InMemDataset<DigitItem>,
}

impl Dataset<DigitItem> for DigitDataset {
    fn get(&self, index: usize) -> Option<DigitItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl DigitDataset {
    /// Loads the training split.
    pub fn train() -> Result<Self, DatasetError> {
        Self::load(Split::Train)
    }

    /// Loads the test split.
    pub fn test() -> Result<Self, DatasetError> {
        Self::load(Split::Test)
    }

    /// Builds a dataset from items already in memory.
    pub fn from_items(items: Vec<DigitItem>) -> Self {
        Self {
            dataset: InMemDataset::new(items),
        }
    }

    /// Loads a split, downloading it first if it is not cached.
    pub fn load(split: Split) -> Result<Self, DatasetError> {
        let mnist = match split {
            Split::Train => MnistDataset::train(),
            Split::Test => MnistDataset::test(),
        };

        let items = from_mnist(mnist.iter())?;
        check_len(split, items.len())?;
        log::info!("Loaded {} split with {} items", split.name(), items.len());

        Ok(Self::from_items(items))
    }
}

/// Converts burn MNIST items, rejecting labels outside `0..=9` and intensities outside `0..=255`.
pub fn from_mnist<I>(items: I) -> Result<Vec<DigitItem>, DatasetError>
where
    I: IntoIterator<Item = MnistItem>,
{
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| to_digit_item(index, item))
        .collect()
}

fn to_digit_item(index: usize, item: MnistItem) -> Result<DigitItem, DatasetError> {
    if item.label as usize >= NUM_CLASSES {
        return Err(DatasetError::LabelOutOfRange {
            index,
            label: item.label,
        });
    }

    let mut image = [[0u8; IMAGE_SIZE]; IMAGE_SIZE];
    for (row, values) in image.iter_mut().zip(item.image.iter()) {
        for (pixel, value) in row.iter_mut().zip(values.iter()) {
            if !(0.0..=255.0).contains(value) {
                return Err(DatasetError::PixelOutOfRange {
                    index,
                    value: *value,
                });
            }
            *pixel = value.round() as u8;
        }
    }

    Ok(DigitItem {
        image,
        label: item.label,
    })
}

fn check_len(split: Split, found: usize) -> Result<(), DatasetError> {
    let expected = split.expected_len();
    if found != expected {
        return Err(DatasetError::UnexpectedLength {
            split: split.name(),
            expected,
            found,
        });
    }
    Ok(())
}

/// Number of items [split_validation] holds out of `len`.
pub fn validation_len(len: usize, fraction: f64) -> usize {
    (len as f64 * fraction.clamp(0.0, 1.0)).floor() as usize
}

/// Splits off the last `fraction` of `dataset` for validation.
///
/// Items keep their order: the training view covers `[0, len - n)` and the validation view
/// `[len - n, len)` with `n = floor(len * fraction)`.
pub fn split_validation<D>(
    dataset: D,
    fraction: f64,
) -> (
    PartialDataset<Arc<D>, DigitItem>,
    PartialDataset<Arc<D>, DigitItem>,
)
where
    D: Dataset<DigitItem>,
{
    let len = dataset.len();
    let boundary = len - validation_len(len, fraction);

    let dataset = Arc::new(dataset);
    let train = PartialDataset::new(dataset.clone(), 0, boundary);
    let valid = PartialDataset::new(dataset, boundary, len);

    (train, valid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mnist_item(value: f32, label: u8) -> MnistItem {
        MnistItem {
            image: [[value; IMAGE_SIZE]; IMAGE_SIZE],
            label,
        }
    }

    fn items(len: usize) -> Vec<DigitItem> {
        (0..len)
            .map(|i| DigitItem {
                image: [[i as u8; IMAGE_SIZE]; IMAGE_SIZE],
                label: (i % NUM_CLASSES) as u8,
            })
            .collect()
    }

    #[test]
    fn converts_mnist_items_to_integer_intensities() {
        let mut item = mnist_item(0.0, 7);
        item.image[0][1] = 255.0;
        item.image[1][0] = 127.6;

        let items = from_mnist(vec![item, mnist_item(3.0, 2)]).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, 7);
        assert_eq!(items[0].image[0][0], 0);
        assert_eq!(items[0].image[0][1], 255);
        assert_eq!(items[0].image[1][0], 128);
        assert_eq!(items[1].image[27][27], 3);
    }

    #[test]
    fn rejects_out_of_range_labels() {
        let err = from_mnist(vec![mnist_item(0.0, 3), mnist_item(0.0, 10)]).unwrap_err();

        assert!(matches!(
            err,
            DatasetError::LabelOutOfRange {
                index: 1,
                label: 10
            }
        ));
    }

    #[test]
    fn rejects_out_of_range_pixels() {
        let err = from_mnist(vec![mnist_item(256.0, 1)]).unwrap_err();

        assert!(matches!(err, DatasetError::PixelOutOfRange { index: 0, .. }));
    }

    #[test]
    fn split_sizes_are_fixed() {
        assert!(check_len(Split::Train, 60_000).is_ok());
        assert!(check_len(Split::Test, 10_000).is_ok());

        let err = check_len(Split::Train, 59_999).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::UnexpectedLength {
                split: "train",
                expected: 60_000,
                found: 59_999
            }
        ));
    }

    #[test]
    fn validation_split_holds_out_the_tail() {
        let dataset = DigitDataset::from_items(items(10));
        let (train, valid) = split_validation(dataset, 0.3);

        assert_eq!(train.len(), 7);
        assert_eq!(valid.len(), 3);
        assert_eq!(train.get(6).unwrap().image[0][0], 6);
        assert_eq!(valid.get(0).unwrap().image[0][0], 7);
        assert!(valid.get(3).is_none());
    }

    #[test]
    fn validation_split_of_standard_training_size() {
        let dataset = DigitDataset::from_items(items(Split::Train.expected_len()));
        let (train, valid) = split_validation(dataset, 0.3);

        assert_eq!(train.len(), 42_000);
        assert_eq!(valid.len(), 18_000);
    }

    #[test]
    #[ignore = "downloads MNIST"]
    fn standard_splits_have_fixed_sizes() {
        let train = DigitDataset::train().unwrap();
        let test = DigitDataset::test().unwrap();

        assert_eq!(train.len() + test.len(), 70_000);
        assert!(train.iter().all(|item| item.label < 10));
    }
}
