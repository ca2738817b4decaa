//! CLIP ViT-B/32 image encoder running on candle.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use image::imageops::{self, FilterType};
use image::RgbImage;

use super::ImageEncoder;
use crate::embeddings::EMBEDDING_DIM;

/// Hugging Face repository holding the reference CLIP weights.
pub const DEFAULT_MODEL_ID: &str = "openai/clip-vit-base-patch32";
/// Revision of [`DEFAULT_MODEL_ID`] that ships `model.safetensors`.
pub const DEFAULT_MODEL_REVISION: &str = "refs/pr/15";

const WEIGHTS_FILE: &str = "model.safetensors";

/// Longest allowed `long / short` edge ratio before preprocessing.
///
/// Only the central square survives the crop, so cutting wider images down to
/// this ratio first bounds the resize buffer without touching ordinary photos.
pub const MAX_ASPECT_RATIO: u32 = 16;

/// Per-channel mean used by the CLIP image processor.
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
/// Per-channel standard deviation used by the CLIP image processor.
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Where to find the model weights.
#[derive(Debug, Clone)]
pub enum WeightsSource {
    /// Download (or reuse the cached copy) from the Hugging Face hub.
    Hub {
        /// Repository id.
        model_id: String,
        /// Git revision.
        revision: String,
    },
    /// Read a local safetensors file.
    File(PathBuf),
}

impl WeightsSource {
    /// Resolves the source to a local safetensors path.
    pub fn resolve(&self) -> Result<PathBuf> {
        match self {
            Self::File(path) => {
                anyhow::ensure!(
                    path.exists(),
                    "weights file {} does not exist",
                    path.display()
                );
                Ok(path.clone())
            }
            Self::Hub { model_id, revision } => {
                tracing::info!(%model_id, %revision, "fetching CLIP weights from the hub");
                let api = Api::new().context("failed to create Hugging Face API client")?;
                let repo = api.repo(Repo::with_revision(
                    model_id.clone(),
                    RepoType::Model,
                    revision.clone(),
                ));
                repo.get(WEIGHTS_FILE)
                    .with_context(|| format!("failed to download {WEIGHTS_FILE} from {model_id}"))
            }
        }
    }
}

/// CLIP vision tower plus projection, producing 512-wide image features.
pub struct ClipEncoder {
    model: ClipModel,
    device: Device,
    image_size: u32,
}

impl ClipEncoder {
    /// Loads the ViT-B/32 model on the CPU.
    pub fn load(source: &WeightsSource) -> Result<Self> {
        let path = source.resolve()?;
        Self::load_from_file(&path, Device::Cpu)
    }

    /// Loads weights from a safetensors file onto `device`.
    pub fn load_from_file(path: &Path, device: Device) -> Result<Self> {
        let config = ClipConfig::vit_base_patch32();
        tracing::info!(weights = %path.display(), ?device, "loading CLIP model");
        // SAFETY: the weights file is memory-mapped read-only and not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, &device) }
            .with_context(|| format!("failed to load weights from {}", path.display()))?;
        let model = ClipModel::new(vb, &config).context("failed to build CLIP model")?;
        Ok(Self {
            model,
            device,
            image_size: config.image_size as u32,
        })
    }

    fn pixel_tensor(&self, image: &RgbImage) -> Result<Tensor> {
        let size = self.image_size as usize;
        let pixels = preprocess(image, self.image_size)?;
        let tensor = Tensor::from_vec(pixels, (3, size, size), &self.device)?
            .unsqueeze(0)?;
        Ok(tensor)
    }
}

impl ImageEncoder for ClipEncoder {
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn encode(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let pixels = self.pixel_tensor(image)?;
        let features = self
            .model
            .get_image_features(&pixels)
            .context("CLIP forward pass failed")?;
        let features = features
            .to_dtype(DType::F32)?
            .to_device(&Device::Cpu)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        Ok(features)
    }
}

/// CLIP image preprocessing.
///
/// Resizes the shortest edge to `size` (Catmull-Rom, the bicubic filter of the
/// reference processor, long edge truncated the same way), center-crops to
/// `size x size`, rescales to `[0, 1]` and normalizes each channel with
/// [`CLIP_MEAN`] / [`CLIP_STD`]. Output is channel-first, `3 * size * size`
/// values. Images more elongated than [`MAX_ASPECT_RATIO`] are center-cropped
/// to that ratio before resizing.
pub fn preprocess(image: &RgbImage, size: u32) -> Result<Vec<f32>> {
    let (width, height) = image.dimensions();
    anyhow::ensure!(width > 0 && height > 0, "image has zero width or height");
    anyhow::ensure!(size > 0, "target size must be positive");

    let bounded;
    let source = match aspect_bounded_region(width, height) {
        Some((x, y, w, h)) => {
            bounded = imageops::crop_imm(image, x, y, w, h).to_image();
            &bounded
        }
        None => image,
    };

    let (resized_w, resized_h) = shortest_edge_dims(source.width(), source.height(), size);
    let resized = imageops::resize(source, resized_w, resized_h, FilterType::CatmullRom);
    let left = (resized_w - size) / 2;
    let top = (resized_h - size) / 2;
    let cropped = imageops::crop_imm(&resized, left, top, size, size).to_image();

    let plane = (size * size) as usize;
    let mut out = vec![0f32; 3 * plane];
    for (x, y, pixel) in cropped.enumerate_pixels() {
        let offset = (y * size + x) as usize;
        for channel in 0..3 {
            let value = f32::from(pixel.0[channel]) / 255.0;
            out[channel * plane + offset] = (value - CLIP_MEAN[channel]) / CLIP_STD[channel];
        }
    }
    Ok(out)
}

/// Central `(x, y, width, height)` region with at most [`MAX_ASPECT_RATIO`],
/// or `None` when the image is already within bounds.
fn aspect_bounded_region(width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let (short, long) = (width.min(height), width.max(height));
    let limit = short.saturating_mul(MAX_ASPECT_RATIO);
    if long <= limit {
        return None;
    }
    let offset = (long - limit) / 2;
    if width < height {
        Some((0, offset, width, limit))
    } else {
        Some((offset, 0, limit, height))
    }
}

fn shortest_edge_dims(width: u32, height: u32, size: u32) -> (u32, u32) {
    let scale = |long: u32, short: u32| -> u32 {
        let scaled = u64::from(long) * u64::from(size) / u64::from(short);
        u32::try_from(scaled).unwrap_or(u32::MAX).max(size)
    };
    if width <= height {
        (size, scale(height, width))
    } else {
        (scale(width, height), size)
    }
}
