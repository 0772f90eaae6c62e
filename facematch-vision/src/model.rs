use std::path::{Path, PathBuf};

use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};
#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use thiserror::Error;

/// File names the detector and encoder are shipped under.
pub const DETECTOR_MODEL: &str = "face_detection_yunet_2023mar.onnx";
pub const RECOGNITION_MODEL: &str = "face_recognition_sface_2021dec.onnx";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("loading model {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: ort::Error,
    },
}

fn session_builder() -> Result<SessionBuilder, ort::Error> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

/// Load an ONNX model from disk. Model files are a deploy-time artifact;
/// a missing file must surface as a startup error, not a panic.
pub fn load_session(path: &Path) -> Result<Session, ModelError> {
    if !path.is_file() {
        return Err(ModelError::NotFound(path.to_path_buf()));
    }
    let mut builder = session_builder().map_err(|source| ModelError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    builder.commit_from_file(path).map_err(|source| ModelError::Load {
        path: path.to_path_buf(),
        source,
    })
}
