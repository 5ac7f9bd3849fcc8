use burn::backend::{ndarray::NdArrayDevice, NdArray};
use digit_recognition::{gallery, logging};

const OUTPUT_DIR: &str = "artifacts/gallery";

fn main() -> Result<(), gallery::GalleryError> {
    logging::install_console_logger();

    let Some(image) = gallery::load_image_from_url(gallery::GALLERY_URL) else {
        log::warn!("No image to filter, skipping the gallery");
        return Ok(());
    };
    log::info!("Loaded {}x{} image", image.width(), image.height());

    let device = NdArrayDevice::Cpu;
    let panels = gallery::build_gallery::<NdArray>(&image, &device);
    let grid = gallery::save_gallery(&panels, OUTPUT_DIR)?;

    println!("Gallery written to {}", grid.display());
    Ok(())
}
