//! Gallery enumeration: the directory of known-person reference images.

use std::fs;
use std::path::{Path, PathBuf};

use crate::report::PipelineError;

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "gif"];

/// One reference image. `person_id` is the filename stem; galleries name
/// files `<personId>[_label].<ext>` and callers may split the stem further.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub person_id: String,
}

impl GalleryEntry {
    pub fn from_path(path: PathBuf) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?.to_string();
        let person_id = path.file_stem()?.to_str()?.to_string();
        Some(Self {
            path,
            file_name,
            person_id,
        })
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Enumerate qualifying reference images, sorted by file name so repeated
/// runs and tie-breaks are deterministic across filesystems.
pub fn scan(dir: &Path) -> Result<Vec<GalleryEntry>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::DbPathNotFound(dir.to_path_buf()));
    }

    let read = fs::read_dir(dir).map_err(|err| {
        PipelineError::processing(format!("listing database path {}: {err}", dir.display()))
    })?;

    // Keep the raw listing too; it is the diagnostic payload of NO_DB_IMAGES.
    let mut listing = Vec::new();
    let mut entries = Vec::new();
    for item in read {
        let item = item.map_err(|err| {
            PipelineError::processing(format!("listing database path {}: {err}", dir.display()))
        })?;
        let path = item.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            listing.push(name.to_string());
        }
        if !path.is_file() || !is_image(&path) {
            continue;
        }
        if let Some(entry) = GalleryEntry::from_path(path) {
            entries.push(entry);
        }
    }

    if entries.is_empty() {
        listing.sort();
        return Err(PipelineError::NoDbImages {
            path: dir.to_path_buf(),
            found: listing,
        });
    }

    entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(entries)
}
