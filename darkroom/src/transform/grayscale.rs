//! Grayscale + resize transform on the `image` crate

use super::{TransformError, TransformExecutor};
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;

/// Converts an image to grayscale and resizes it to exact dimensions
///
/// The output is always JPEG. Decoding and encoding run on the blocking
/// thread pool so a large image never stalls the async workers.
///
/// # Examples
///
/// ```rust
/// use darkroom::transform::GrayscaleResize;
///
/// let transform = GrayscaleResize::new(800, 600);
/// assert_eq!(transform.dimensions(), (800, 600));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct GrayscaleResize {
    width: u32,
    height: u32,
    filter: FilterType,
}

impl GrayscaleResize {
    /// Creates a transform producing `width` x `height` images
    ///
    /// Uses `FilterType::Lanczos3` for high-quality resizing.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            filter: FilterType::Lanczos3,
        }
    }

    /// Uses a specific resize filter
    #[must_use]
    pub const fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// Target dimensions as `(width, height)`
    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn load_image(data: &[u8]) -> Result<DynamicImage, TransformError> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| TransformError::InvalidInput(format!("failed to read image: {e}")))?;

        reader
            .decode()
            .map_err(|e| TransformError::InvalidInput(format!("failed to decode image: {e}")))
    }

    fn run(self, input: &[u8]) -> Result<Vec<u8>, TransformError> {
        let img = Self::load_image(input)?;
        let output = img.grayscale().resize_exact(self.width, self.height, self.filter);

        let mut buffer = Vec::new();
        output
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
            .map_err(|e| TransformError::Failed(format!("failed to encode image: {e}")))?;
        Ok(buffer)
    }
}

impl Default for GrayscaleResize {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

#[async_trait]
impl TransformExecutor for GrayscaleResize {
    async fn apply(&self, input: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        let transform = *self;
        tokio::task::spawn_blocking(move || transform.run(&input))
            .await
            .map_err(|e| TransformError::Failed(format!("transform task aborted: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ColorType, ImageBuffer, Rgb};

    fn create_test_png(width: u32, height: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, _| Rgb([(x * 10 % 255) as u8, 0, 200]));

        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[tokio::test]
    async fn test_output_is_grayscale_jpeg_at_target_size() {
        let transform = GrayscaleResize::new(16, 12);

        let output = transform.apply(create_test_png(40, 20)).await.unwrap();

        assert_eq!(image::guess_format(&output).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 12));
        assert_eq!(decoded.color(), ColorType::L8);
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let transform = GrayscaleResize::default();

        let result = transform.apply(b"not an image".to_vec()).await;
        assert!(matches!(result, Err(TransformError::InvalidInput(_))));
    }

    #[test]
    fn test_default_matches_service_dimensions() {
        assert_eq!(GrayscaleResize::default().dimensions(), (800, 600));
    }
}
