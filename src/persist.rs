use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use burn::{
    config::config_to_json,
    prelude::*,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Model, ModelConfig};

/// Default location of the trained model, relative to the working directory.
pub const MODEL_FILE: &str = "artifacts/digit_model.bin";

const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model file encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("model parameters could not be recorded: {0}")]
    Record(String),

    #[error("model architecture could not be read: {0}")]
    Config(String),

    #[error("unsupported model file version {0}, expected {FORMAT_VERSION}")]
    UnsupportedVersion(u32),
}

/// Single-file envelope: the architecture as JSON next to the full-precision parameters.
#[derive(Serialize, Deserialize)]
struct SavedModel {
    format_version: u32,
    config: String,
    weights: Vec<u8>,
}

/// Writes the architecture and parameters of `model` to `path`, creating parent directories.
pub fn save_model<B: Backend>(
    model: &Model<B>,
    config: &ModelConfig,
    path: impl AsRef<Path>,
) -> Result<(), PersistError> {
    let path = path.as_ref();
    let io_err = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent).map_err(io_err)?;
    }

    let weights = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.clone().into_record(), ())
        .map_err(|err| PersistError::Record(format!("{err:?}")))?;

    let saved = SavedModel {
        format_version: FORMAT_VERSION,
        config: config_to_json(config),
        weights,
    };

    let writer = BufWriter::new(File::create(path).map_err(io_err)?);
    bincode::serialize_into(writer, &saved)?;

    log::info!("Saved model to {}", path.display());
    Ok(())
}

/// Rebuilds a model from a file written by [save_model].
pub fn load_model<B: Backend>(
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<Model<B>, PersistError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let saved: SavedModel = bincode::deserialize_from(BufReader::new(file))?;
    if saved.format_version != FORMAT_VERSION {
        return Err(PersistError::UnsupportedVersion(saved.format_version));
    }

    let config = ModelConfig::load_binary(saved.config.as_bytes())
        .map_err(|err| PersistError::Config(format!("{err:?}")))?;
    let record = BinBytesRecorder::<FullPrecisionSettings>::default()
        .load(saved.weights, device)
        .map_err(|err| PersistError::Record(format!("{err:?}")))?;

    log::info!("Loaded model from {}", path.display());
    Ok(config.init::<B>(device).load_record(record))
}
