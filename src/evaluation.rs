use std::fmt::Display;
use std::sync::Arc;

use burn::{data::dataloader::DataLoader, nn::loss::CrossEntropyLossConfig, prelude::*};

use crate::data::DigitBatch;
use crate::model::Model;

/// Loss and accuracy over a whole split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Mean cross-entropy per item.
    pub loss: f64,
    /// Fraction of items whose argmax prediction matches the label, in `[0, 1]`.
    pub accuracy: f64,
    pub items: usize,
}

impl Display for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Test Loss = {:.4}, Test Accuracy = {:.2}% ({} items)",
            self.loss,
            self.accuracy * 100.0,
            self.items
        )
    }
}

/// Number of rows of `output` whose argmax equals the target.
pub fn num_correct<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predictions = output.argmax(1).squeeze::<1>(1);

    predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

/// Runs the model over every batch once. The model is only read.
pub fn evaluate<B: Backend>(
    model: &Model<B>,
    dataloader: &Arc<dyn DataLoader<DigitBatch<B>>>,
) -> Evaluation {
    let mut loss_sum = 0.0;
    let mut correct = 0;
    let mut items = 0;

    for batch in dataloader.iter() {
        let [batch_size, ..] = batch.images.dims();
        let output = model.forward(batch.images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), batch.targets.clone());

        loss_sum += loss.into_scalar().elem::<f64>() * batch_size as f64;
        correct += num_correct(output, batch.targets);
        items += batch_size;
    }

    if items == 0 {
        log::warn!("Evaluation ran on an empty split");
        return Evaluation {
            loss: 0.0,
            accuracy: 0.0,
            items,
        };
    }

    Evaluation {
        loss: loss_sum / items as f64,
        accuracy: correct as f64 / items as f64,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DigitBatcher;
    use crate::dataset::{DigitDataset, DigitItem, IMAGE_SIZE};
    use crate::model::ModelConfig;
    use burn::backend::NdArray;
    use burn::data::dataloader::DataLoaderBuilder;

    type TestBackend = NdArray<f32>;

    #[test]
    fn counts_matching_argmax() {
        let device = Default::default();
        let output = Tensor::<TestBackend, 2>::from_floats(
            [[0.1, 0.9, 0.0], [0.8, 0.1, 0.1], [0.2, 0.3, 0.5]],
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 2, 2], &device);

        assert_eq!(num_correct(output, targets), 2);
    }

    #[test]
    fn evaluates_every_item_once() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TestBackend>(&device);
        let items = (0..7)
            .map(|i| DigitItem {
                image: [[(i * 30) as u8; IMAGE_SIZE]; IMAGE_SIZE],
                label: i as u8,
            })
            .collect();
        let dataloader = DataLoaderBuilder::new(DigitBatcher::<TestBackend>::new(device))
            .batch_size(3)
            .build(DigitDataset::from_items(items));

        let evaluation = evaluate(&model, &dataloader);

        assert_eq!(evaluation.items, 7);
        assert!((0.0..=1.0).contains(&evaluation.accuracy));
        assert!(evaluation.loss.is_finite() && evaluation.loss > 0.0);
    }
}
