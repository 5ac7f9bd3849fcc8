use std::process::ExitCode;

use burn::backend::{ndarray::NdArrayDevice, NdArray};
use digit_recognition::{inference, logging, persist};

fn main() -> ExitCode {
    logging::install_console_logger();

    let mut args = std::env::args().skip(1);
    let Some(image_path) = args.next() else {
        eprintln!("Usage: infer <image> [model]");
        return ExitCode::FAILURE;
    };
    let model_path = args.next().unwrap_or_else(|| persist::MODEL_FILE.to_string());

    let device = NdArrayDevice::Cpu;
    let model = match persist::load_model::<NdArray>(&model_path, &device) {
        Ok(model) => model,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match inference::classify_image_file(&model, &image_path, &device) {
        Ok(prediction) => {
            println!(
                "Predicted {} ({:.1}%)",
                prediction.label(),
                prediction.confidence() * 100.0
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
