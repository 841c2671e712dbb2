//! Frame decoding: image files, base64 payloads and data URLs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{imageops, imageops::FilterType, RgbImage};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("image file not found: {0}")]
    NotFound(String),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unreadable image: {0}")]
    Image(#[from] image::ImageError),
    #[error("empty image")]
    Empty,
}

/// Load an image file as RGB.
pub fn load_path(path: &Path) -> Result<RgbImage, FrameError> {
    if !path.exists() {
        return Err(FrameError::NotFound(path.display().to_string()));
    }
    let image = image::open(path)?.to_rgb8();
    non_empty(image)
}

/// Decode a base64 frame, accepting an optional `data:image/...;base64,` header.
pub fn decode_base64(payload: &str) -> Result<RgbImage, FrameError> {
    let bytes = STANDARD.decode(strip_data_url(payload).trim())?;
    let image = image::load_from_memory(&bytes)?.to_rgb8();
    non_empty(image)
}

fn strip_data_url(payload: &str) -> &str {
    if payload.starts_with("data:image") {
        payload.split_once(',').map(|(_, body)| body).unwrap_or(payload)
    } else {
        payload
    }
}

fn non_empty(image: RgbImage) -> Result<RgbImage, FrameError> {
    if image.width() == 0 || image.height() == 0 {
        Err(FrameError::Empty)
    } else {
        Ok(image)
    }
}

/// Shrink a frame by an integer factor for faster detection.
///
/// A factor of 1 returns a copy. Dimensions never drop below one pixel.
pub fn downscale(image: &RgbImage, factor: u32) -> RgbImage {
    if factor <= 1 {
        return image.clone();
    }
    let width = (image.width() / factor).max(1);
    let height = (image.height() / factor).max(1);
    imageops::resize(image, width, height, FilterType::Triangle)
}

#[cfg(test)]
pub(crate) fn encode_png_base64(image: &RgbImage) -> String {
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("png encoding");
    STANDARD.encode(bytes.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_decode_plain_base64() {
        let image = RgbImage::from_pixel(8, 6, Rgb([10, 20, 30]));
        let decoded = decode_base64(&encode_png_base64(&image)).unwrap();
        assert_eq!(decoded.dimensions(), (8, 6));
        assert_eq!(*decoded.get_pixel(3, 3), Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_data_url() {
        let image = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let payload = format!("data:image/png;base64,{}", encode_png_base64(&image));
        let decoded = decode_base64(&payload).unwrap();
        assert_eq!(decoded.dimensions(), (4, 4));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_base64("%%%not base64%%%"), Err(FrameError::Base64(_))));
        // Valid base64, not an image.
        let text = STANDARD.encode(b"hello world");
        assert!(matches!(decode_base64(&text), Err(FrameError::Image(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_path(Path::new("/nonexistent/face.jpg")).unwrap_err();
        assert!(matches!(err, FrameError::NotFound(_)));
    }

    #[test]
    fn test_downscale_quarter() {
        let image = RgbImage::new(640, 480);
        assert_eq!(downscale(&image, 4).dimensions(), (160, 120));
        assert_eq!(downscale(&image, 1).dimensions(), (640, 480));
        assert_eq!(downscale(&RgbImage::new(3, 3), 4).dimensions(), (1, 1));
    }
}
