//! The result contract. Exactly one JSON record per invocation goes to the
//! primary channel (stdout); everything else belongs on stderr. Any stray
//! text on stdout corrupts the contract for the calling process.

use std::io::{self, Write};
use std::path::PathBuf;

use facematch_vision::{ExtractError, ModelError};
use serde::Serialize;
use thiserror::Error;

use crate::gallery::GalleryEntry;
use crate::matcher;

pub const NO_MATCH_MESSAGE: &str = "No matching person found in database.";

/// Every failure the pipeline can report, mapped 1:1 onto the wire
/// `errorType` strings the host application parses.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Face recognition model unavailable. Install the ONNX model files or set FACEMATCH_MODEL_DIR.")]
    ModelUnavailable(#[from] ModelError),
    #[error("Target image not found: {}", .0.display())]
    ImageNotFound(PathBuf),
    #[error("Database path not found: {}", .0.display())]
    DbPathNotFound(PathBuf),
    #[error("No images found in database path: {}", .path.display())]
    NoDbImages { path: PathBuf, found: Vec<String> },
    #[error("No face detected in the image. Please ensure the face is clearly visible.")]
    NoFaceDetected,
    #[error("model inference failed")]
    Inference(#[source] ExtractError),
    #[error("Out of memory. Try with smaller images or close other applications.")]
    OutOfMemory,
    #[error("{0}")]
    Processing(String),
}

impl PipelineError {
    pub fn processing(message: impl Into<String>) -> Self {
        PipelineError::Processing(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::ModelUnavailable(_) => ErrorKind::Import,
            PipelineError::ImageNotFound(_) => ErrorKind::ImageNotFound,
            PipelineError::DbPathNotFound(_) => ErrorKind::DbPathNotFound,
            PipelineError::NoDbImages { .. } => ErrorKind::NoDbImages,
            PipelineError::NoFaceDetected => ErrorKind::NoFaceDetected,
            PipelineError::Inference(_) => ErrorKind::Inference,
            PipelineError::OutOfMemory => ErrorKind::OutOfMemory,
            PipelineError::Processing(_) => ErrorKind::Processing,
        }
    }
}

impl From<ExtractError> for PipelineError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::NoFace => PipelineError::NoFaceDetected,
            ExtractError::OutOfMemory => PipelineError::OutOfMemory,
            other => PipelineError::Inference(other),
        }
    }
}

/// Wire names predate this implementation; the host parser switch-cases on
/// them, so they stay verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "IMPORT_ERROR")]
    Import,
    #[serde(rename = "IMAGE_NOT_FOUND")]
    ImageNotFound,
    #[serde(rename = "DB_PATH_NOT_FOUND")]
    DbPathNotFound,
    #[serde(rename = "NO_DB_IMAGES")]
    NoDbImages,
    #[serde(rename = "NO_FACE_DETECTED")]
    NoFaceDetected,
    #[serde(rename = "TENSORFLOW_ERROR")]
    Inference,
    #[serde(rename = "OUT_OF_MEMORY")]
    OutOfMemory,
    #[serde(rename = "PROCESSING_ERROR")]
    Processing,
}

#[derive(Debug, Serialize)]
pub struct MatchRecord {
    #[serde(rename = "match")]
    pub matched: bool,
    pub filename: String,
    #[serde(rename = "personIdentifier")]
    pub person_identifier: String,
    pub distance: f64,
    pub confidence: f64,
    #[serde(rename = "matchedFilePath")]
    pub matched_file_path: String,
}

#[derive(Debug, Serialize)]
pub struct NoMatchRecord {
    #[serde(rename = "match")]
    pub matched: bool,
    pub message: String,
    pub confidence: u8,
}

#[derive(Debug, Serialize)]
pub struct ErrorRecord {
    pub error: String,
    #[serde(rename = "errorType")]
    pub error_type: ErrorKind,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub matched: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(rename = "foundFiles", skip_serializing_if = "Option::is_none")]
    pub found_files: Option<Vec<String>>,
}

/// The one artifact that crosses the process boundary.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Report {
    Match(MatchRecord),
    NoMatch(NoMatchRecord),
    Error(ErrorRecord),
}

impl Report {
    pub fn matched(entry: &GalleryEntry, distance: f32) -> Self {
        Report::Match(MatchRecord {
            matched: true,
            filename: entry.file_name.clone(),
            person_identifier: entry.person_id.clone(),
            distance: round_to(f64::from(distance), 4),
            confidence: matcher::confidence(distance),
            matched_file_path: entry.path.display().to_string(),
        })
    }

    pub fn no_match() -> Self {
        Report::NoMatch(NoMatchRecord {
            matched: false,
            message: NO_MATCH_MESSAGE.to_string(),
            confidence: 0,
        })
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Report::Match(_) | Report::NoMatch(_) => 0,
            Report::Error(_) => 1,
        }
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let line = serde_json::to_string(self)?;
        writeln!(writer, "{line}")
    }

    /// Write the single result record to the primary channel.
    pub fn emit(&self) -> io::Result<()> {
        let stdout = io::stdout();
        self.write_to(stdout.lock())
    }
}

impl From<PipelineError> for Report {
    fn from(err: PipelineError) -> Self {
        let kind = err.kind();
        // Only processing-phase failures carry the match flag, mirroring
        // what the host parser already accepts.
        let matched = matches!(
            kind,
            ErrorKind::NoFaceDetected
                | ErrorKind::Inference
                | ErrorKind::OutOfMemory
                | ErrorKind::Processing
        )
        .then_some(false);

        let details = match &err {
            PipelineError::ModelUnavailable(source) => Some(source.to_string()),
            PipelineError::Inference(source) => Some(source.to_string()),
            _ => None,
        };
        let found_files = match &err {
            PipelineError::NoDbImages { found, .. } => Some(found.clone()),
            _ => None,
        };

        Report::Error(ErrorRecord {
            error: err.to_string(),
            error_type: kind,
            matched,
            details,
            found_files,
        })
    }
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
