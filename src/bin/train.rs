use digit_recognition::{logging, training};

#[cfg(feature = "ndarray")]
mod ndarray {
    use burn::backend::{
        ndarray::{NdArray, NdArrayDevice},
        Autodiff,
    };

    pub fn run() -> Result<(), super::training::TrainingError> {
        let device = NdArrayDevice::Cpu;
        super::run::<Autodiff<NdArray>>(device)
    }
}

#[cfg(any(feature = "tch-gpu", feature = "tch-cpu"))]
mod tch {
    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };

    pub fn run() -> Result<(), super::training::TrainingError> {
        #[cfg(all(feature = "tch-gpu", not(target_os = "macos")))]
        let device = LibTorchDevice::Cuda(0);
        #[cfg(all(feature = "tch-gpu", target_os = "macos"))]
        let device = LibTorchDevice::Mps;
        #[cfg(not(feature = "tch-gpu"))]
        let device = LibTorchDevice::Cpu;

        super::run::<Autodiff<LibTorch>>(device)
    }
}

#[cfg(feature = "wgpu")]
mod wgpu {
    use burn::backend::{
        wgpu::{Wgpu, WgpuDevice},
        Autodiff,
    };

    pub fn run() -> Result<(), super::training::TrainingError> {
        let device = WgpuDevice::default();
        super::run::<Autodiff<Wgpu>>(device)
    }
}

fn run<B: burn::tensor::backend::AutodiffBackend>(
    device: B::Device,
) -> Result<(), training::TrainingError> {
    logging::install_file_logger(&format!("{}/experiment.log", training::ARTIFACT_DIR));

    let summary = training::run::<B>(
        training::ARTIFACT_DIR,
        training::TrainingConfig::digits(),
        device,
    )?;
    println!(
        "Trained on {} items, validated on {}, saved model to {}",
        summary.train_items,
        summary.valid_items,
        summary.model_path.display()
    );
    Ok(())
}

#[allow(unreachable_code)]
fn main() -> Result<(), training::TrainingError> {
    #[cfg(feature = "ndarray")]
    return ndarray::run();
    #[cfg(any(feature = "tch-gpu", feature = "tch-cpu"))]
    return tch::run();
    #[cfg(feature = "wgpu")]
    return wgpu::run();

    Ok(())
}
