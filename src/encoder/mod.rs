//! Image encoders and the shared decode → encode → normalize path.

pub mod clip;

use anyhow::{Context, Result};
use image::RgbImage;

use crate::embeddings::Embedding;

/// A model that maps an RGB image to a raw feature vector.
///
/// Implementations return unnormalized features; [`embed_image`] applies L2
/// normalization so every caller gets unit-norm output regardless of model.
pub trait ImageEncoder: Send + Sync {
    /// Width of the feature vectors this encoder produces.
    fn dimension(&self) -> usize;

    /// Runs the model on one image.
    fn encode(&self, image: &RgbImage) -> Result<Vec<f32>>;
}

/// Decodes image bytes into canonical 8-bit RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    anyhow::ensure!(!bytes.is_empty(), "image payload is empty");
    let image = image::load_from_memory(bytes).context("failed to decode image")?;
    Ok(image.to_rgb8())
}

/// Encodes and normalizes an already decoded image.
pub fn embed_image(encoder: &dyn ImageEncoder, image: &RgbImage) -> Result<Embedding> {
    let raw = encoder.encode(image)?;
    let embedding = Embedding::from_raw(raw).context("encoder produced an unusable vector")?;
    embedding
        .ensure_dimension(encoder.dimension())
        .context("encoder output has the wrong width")?;
    Ok(embedding)
}

/// Full embedding path shared by the vectorizer and the search API.
pub fn embed_image_bytes(encoder: &dyn ImageEncoder, bytes: &[u8]) -> Result<Embedding> {
    let image = decode_rgb(bytes)?;
    embed_image(encoder, &image)
}


#[cfg(test)]
mod tests {
    use super::testing::{png_bytes, MeanColorEncoder};
    use super::*;
    use crate::embeddings::{l2_norm, EMBEDDING_DIM};

    #[test]
    fn bytes_embed_to_unit_vectors() {
        let encoder = MeanColorEncoder {
            dimension: EMBEDDING_DIM,
        };
        let embedding = embed_image_bytes(&encoder, &png_bytes([200, 10, 30])).unwrap();
        assert_eq!(embedding.dimension(), EMBEDDING_DIM);
        assert!((l2_norm(embedding.as_slice()) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn undecodable_bytes_fail() {
        let encoder = MeanColorEncoder { dimension: 8 };
        assert!(embed_image_bytes(&encoder, b"definitely not an image").is_err());
        assert!(embed_image_bytes(&encoder, &[]).is_err());
    }

    #[test]
    fn grayscale_input_is_converted_to_rgb() {
        let gray = image::GrayImage::from_pixel(4, 4, image::Luma([128]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(gray)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        let rgb = decode_rgb(buf.get_ref()).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [128, 128, 128]);
    }
}
