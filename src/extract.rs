//! The embedding-extractor seam.
//!
//! The pipeline driver works against this trait so tests can substitute a
//! deterministic extractor; production wires in the ONNX-backed engine,
//! constructed once per process.

use std::path::Path;

use facematch_vision::{model, Embedding, ExtractError, FaceEngine, ModelError};
use image::DynamicImage;

pub trait EmbeddingExtractor {
    fn extract(&mut self, img: &DynamicImage) -> Result<Embedding, ExtractError>;
}

pub struct OnnxExtractor {
    engine: FaceEngine,
    detection_score: f32,
    nms: f32,
}

impl OnnxExtractor {
    pub fn new(model_dir: &Path, detection_score: f32, nms: f32) -> Result<Self, ModelError> {
        let engine = FaceEngine::new(
            &model_dir.join(model::DETECTOR_MODEL),
            &model_dir.join(model::RECOGNITION_MODEL),
        )?;
        Ok(Self {
            engine,
            detection_score,
            nms,
        })
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn extract(&mut self, img: &DynamicImage) -> Result<Embedding, ExtractError> {
        self.engine
            .embed_best_face(img, self.detection_score, self.nms)
    }
}
