//! Full extraction pipeline: detect faces, align the best one, encode.

use std::path::Path;

use image::DynamicImage;
use ort::session::Session;
use thiserror::Error;

use crate::detect;
use crate::encode::{self, Embedding};
use crate::model::{self, ModelError};

/// Typed failure modes of embedding extraction. Callers branch on these
/// instead of parsing error text.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no detectable face in image")]
    NoFace,
    #[error("model inference failed: {0}")]
    Inference(#[source] ort::Error),
    #[error("inference ran out of memory")]
    OutOfMemory,
    #[error("unexpected model output: {0}")]
    Output(String),
}

impl ExtractError {
    pub(crate) fn from_ort(err: ort::Error) -> Self {
        // ORT surfaces allocator exhaustion only through message text, so
        // this classification is a substring check.
        if is_alloc_failure(&err.to_string()) {
            return ExtractError::OutOfMemory;
        }
        ExtractError::Inference(err)
    }
}

fn is_alloc_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("out of memory")
        || lower.contains("outofmemory")
        || lower.contains("failed to allocate")
        || lower.contains("bad_alloc")
}

/// Detector and encoder sessions. Construct once per process; model
/// initialization is the expensive part.
pub struct FaceEngine {
    detector: Session,
    encoder: Session,
}

impl FaceEngine {
    pub fn new(detector_model: &Path, encoder_model: &Path) -> Result<Self, ModelError> {
        Ok(Self {
            detector: model::load_session(detector_model)?,
            encoder: model::load_session(encoder_model)?,
        })
    }

    /// Detect the best-scoring face, align it, and encode an embedding.
    ///
    /// `score_threshold` should be permissive: a weak detection of a blurry
    /// or partial face still produces an embedding. `NoFace` means nothing
    /// was detected at all.
    pub fn embed_best_face(
        &mut self,
        img: &DynamicImage,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Embedding, ExtractError> {
        let detections = detect::detect(&mut self.detector, img, score_threshold, nms_threshold)?;

        let best = detections
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .ok_or(ExtractError::NoFace)?;
        log::debug!("best detection score {:.3}", best.score);

        let aligned = encode::align(img, &best)?;
        encode::encode(&mut self.encoder, &aligned)
    }
}
