pub mod image_helper {
    use image::{ImageEncoder, RgbImage};
    use std::path::Path;

    /// Writes an RGB image (typically an outlined target) as PNG.
    pub fn save(path: &Path, image: &RgbImage) -> Result<(), image::error::ImageError> {
        let output = std::fs::File::create(path)?;
        let encoder = image::codecs::png::PngEncoder::new(output);

        encoder.write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )?;

        Ok(())
    }
}
