use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    module::AutodiffModule,
    optim::AdamConfig,
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{
        metric::{AccuracyMetric, LossMetric},
        LearnerBuilder,
    },
};
use thiserror::Error;

use crate::{
    data::{normalize, DigitBatcher},
    dataset::{split_validation, validation_len, DatasetError, DigitDataset},
    evaluation::{evaluate, Evaluation},
    inference::{predict_dataset, Prediction},
    model::{Model, ModelConfig},
    persist::{save_model, PersistError},
    show::{pixel_table, save_digit, save_raw_digit, Colormap},
};

/// Output folder of a training run, relative to the working directory.
pub const ARTIFACT_DIR: &str = "artifacts";

/// File name of the persisted model inside the artifact directory.
pub const MODEL_FILE_NAME: &str = "digit_model.bin";

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub optimizer: AdamConfig,
    #[config(default = 5)]
    pub num_epochs: usize,
    #[config(default = 32)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1.0e-3)]
    pub learning_rate: f64,
    /// Fraction at the end of the training split held out for validation.
    #[config(default = 0.3)]
    pub validation_split: f64,
}

impl TrainingConfig {
    /// Architecture and Adam settings of the reference digit classifier.
    pub fn digits() -> Self {
        Self::new(ModelConfig::new(), AdamConfig::new().with_epsilon(1e-7))
    }
}

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a full run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub train_items: usize,
    pub valid_items: usize,
    pub test_items: usize,
    pub evaluation: Evaluation,
    /// Prediction for the first test image, with its true label.
    pub sample: Option<(Prediction, u8)>,
    pub model_path: PathBuf,
}

fn create_artifact_dir(artifact_dir: &str) -> Result<(), TrainingError> {
    std::fs::create_dir_all(artifact_dir).map_err(|source| TrainingError::Io {
        path: PathBuf::from(artifact_dir),
        source,
    })
}

/// Trains a fresh model on the training split, validating each epoch on its held-out tail.
pub fn train<B: AutodiffBackend>(
    artifact_dir: &str,
    config: &TrainingConfig,
    dataset: DigitDataset,
    device: B::Device,
) -> Result<Model<B>, TrainingError> {
    create_artifact_dir(artifact_dir)?;
    let config_path = format!("{artifact_dir}/config.json");
    config
        .save(&config_path)
        .map_err(|source| TrainingError::Io {
            path: PathBuf::from(&config_path),
            source,
        })?;

    B::seed(config.seed);

    let (dataset_train, dataset_valid) = split_validation(dataset, config.validation_split);
    log::info!(
        "Training on {} items, validating on {}",
        dataset_train.len(),
        dataset_valid.len()
    );

    let batcher_train = DigitBatcher::<B>::new(device.clone());
    let batcher_valid = DigitBatcher::<B::InnerBackend>::new(device.clone());

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(dataset_train);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(dataset_valid);

    let learner = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .summary()
        .build(
            config.model.init::<B>(&device),
            config.optimizer.init(),
            config.learning_rate,
        );

    let now = Instant::now();
    let model_trained = learner.fit(dataloader_train, dataloader_valid);
    let elapsed = now.elapsed().as_secs();
    log::info!("Training completed in {}m{}s", elapsed / 60, elapsed % 60);

    Ok(model_trained)
}

fn save_previews(preview_dir: &Path, dataset: &DigitDataset, name: &str) {
    let Some(item) = dataset.get(0) else {
        return;
    };

    log::info!("First {name} image (label {}):\n{}", item.label, pixel_table(&item.image));
    let normalized = normalize(&item.image);

    let previews = [
        (format!("{name}-0.png"), Colormap::Gray, false),
        (format!("{name}-0-binary.png"), Colormap::Binary, false),
        (format!("{name}-0-normalized.png"), Colormap::Binary, true),
    ];

    for (file, colormap, normalized_values) in previews {
        let path = preview_dir.join(file);
        let result = if normalized_values {
            save_digit(normalized.pixels(), colormap, &path)
        } else {
            save_raw_digit(&item.image, colormap, &path)
        };

        // Previews are a side channel, a failure does not stop the run.
        if let Err(err) = result {
            log::warn!("Could not save preview {}: {err}", path.display());
        }
    }
}

/// Load, train, evaluate, predict and persist, in that order.
pub fn run<B: AutodiffBackend>(
    artifact_dir: &str,
    config: TrainingConfig,
    device: B::Device,
) -> Result<RunSummary, TrainingError> {
    create_artifact_dir(artifact_dir)?;

    let dataset_train = DigitDataset::train()?;
    let dataset_test = DigitDataset::test()?;
    println!("Total Training Sample = {}", dataset_train.len());
    println!("Total Testing Sample = {}", dataset_test.len());

    let preview_dir = Path::new(artifact_dir).join("preview");
    save_previews(&preview_dir, &dataset_train, "train");

    let train_items = dataset_train.len();
    let valid_items = validation_len(train_items, config.validation_split);

    let model = train::<B>(artifact_dir, &config, dataset_train, device.clone())?;
    let model = model.valid();

    let dataset_test = Arc::new(dataset_test);
    let batcher_test = DigitBatcher::<B::InnerBackend>::new(device.clone());
    let test_items = dataset_test.len();
    let dataloader_test = DataLoaderBuilder::new(batcher_test)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(dataset_test.clone());
    let evaluation = evaluate(&model, &dataloader_test);
    println!("{evaluation}");

    let predictions = predict_dataset(&model, dataset_test.as_ref(), config.batch_size, &device);
    save_previews(&preview_dir, &dataset_test, "test");

    let sample = predictions
        .first()
        .cloned()
        .zip(dataset_test.get(0).map(|item| item.label));
    if let Some((prediction, label)) = &sample {
        println!("Probabilities of the first test image: {:?}", prediction.probabilities);
        println!("Predicted {} Expected {}", prediction.label(), label);
    }

    let model_path = Path::new(artifact_dir).join(MODEL_FILE_NAME);
    save_model(&model, &config.model, &model_path)?;

    Ok(RunSummary {
        train_items: train_items - valid_items,
        valid_items,
        test_items,
        evaluation,
        sample,
        model_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DigitItem, IMAGE_SIZE};
    use burn::backend::{Autodiff, NdArray};
    use tempfile::TempDir;

    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn defaults_follow_the_reference_setup() {
        let config = TrainingConfig::digits();

        assert_eq!(config.num_epochs, 5);
        assert_eq!(config.validation_split, 0.3);
        assert_eq!(config.learning_rate, 1.0e-3);
        assert_eq!(config.model.num_classes, 10);
        assert_eq!(config.model.conv_channels, 64);
    }

    #[test]
    fn config_survives_a_json_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = TrainingConfig::digits().with_num_epochs(2);

        config.save(&path).unwrap();
        let loaded = TrainingConfig::load(&path).unwrap();

        assert_eq!(loaded.num_epochs, 2);
        assert_eq!(loaded.batch_size, config.batch_size);
        assert_eq!(loaded.model.dense_output, 32);
    }

    #[test]
    fn trains_a_tiny_dataset() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let artifact_dir = dir.path().to_str().unwrap();
        let config = TrainingConfig::digits()
            .with_num_epochs(1)
            .with_batch_size(4)
            .with_num_workers(1);
        let items = (0..20)
            .map(|i| DigitItem {
                image: [[(i * 12) as u8; IMAGE_SIZE]; IMAGE_SIZE],
                label: (i % 10) as u8,
            })
            .collect();

        TestAutodiffBackend::seed(config.seed);
        let untrained = config.model.init::<TestAutodiffBackend>(&device).valid();

        let trained = train::<TestAutodiffBackend>(
            artifact_dir,
            &config,
            DigitDataset::from_items(items),
            device.clone(),
        )
        .unwrap()
        .valid();

        assert!(dir.path().join("config.json").exists());
        let saved = TrainingConfig::load(dir.path().join("config.json")).unwrap();
        assert_eq!(saved.num_epochs, 1);

        let images = Tensor::<NdArray<f32>, 4>::ones([2, IMAGE_SIZE, IMAGE_SIZE, 1], &device);
        let before = untrained.forward(images.clone()).into_data().to_vec::<f32>().unwrap();
        let after = trained.forward(images).into_data().to_vec::<f32>().unwrap();
        assert_eq!(after.len(), 2 * 10);
        assert_ne!(before, after);
    }
}
