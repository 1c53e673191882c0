//! Queue-fed ML stages: object detection and belt-status classification.

pub mod classifier;
pub mod detector;

pub use classifier::{ClassificationJob, ClassifierProcessor};
pub use detector::{DetectionJob, DetectorProcessor};

use image::RgbImage;

use crate::error::{PipelineError, Result};

/// Decode a JPEG frame into an RGB pixel matrix. RGBA and grayscale inputs
/// are converted on the way.
pub fn decode_frame(bytes: &[u8]) -> Result<RgbImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| PipelineError::Decode(e.to_string()))
}

#[cfg(test)]
pub(crate) fn encode_test_jpeg(width: u32, height: u32) -> bytes::Bytes {
    let img = RgbImage::from_pixel(width, height, image::Rgb([90, 120, 200]));
    let mut buf = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buf);
    image::codecs::jpeg::JpegEncoder::new(&mut cursor)
        .encode_image(&img)
        .expect("jpeg encode");
    bytes::Bytes::from(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_round_trips_a_jpeg() {
        let jpeg = encode_test_jpeg(8, 6);
        let image = decode_frame(&jpeg).unwrap();
        assert_eq!(image.dimensions(), (8, 6));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode_frame(b"definitely not a jpeg").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }
}
