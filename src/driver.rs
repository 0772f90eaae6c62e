//! Pipeline sequencing: validate inputs, initialize the extractor, embed
//! probe and gallery, match, and hand back the one report to encode.
//!
//! Validation runs strictly before extractor initialization so a bad path
//! never pays model-load latency. Every failure becomes a typed
//! `PipelineError`; the caller encodes exactly one record either way.

use std::path::PathBuf;

use anyhow::{Context, Result};
use facematch_vision::Embedding;

use crate::cache::{self, EmbeddingCache};
use crate::extract::EmbeddingExtractor;
use crate::gallery::{self, GalleryEntry};
use crate::matcher::{self, EmbeddedEntry};
use crate::report::{PipelineError, Report};

pub struct Request {
    pub probe: PathBuf,
    pub gallery_dir: PathBuf,
    /// Cosine-distance rejection threshold.
    pub threshold: f32,
    pub use_cache: bool,
}

/// Run the pipeline to completion. Never returns an error: failures are
/// folded into the error report, with full detail logged to the diagnostic
/// channel only.
pub fn run<E, F>(request: &Request, init_extractor: F) -> Report
where
    E: EmbeddingExtractor,
    F: FnOnce() -> Result<E, PipelineError>,
{
    match identify(request, init_extractor) {
        Ok(report) => report,
        Err(err) => {
            log::error!("{err}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                log::error!("  caused by: {cause}");
                source = cause.source();
            }
            Report::from(err)
        }
    }
}

fn identify<E, F>(request: &Request, init_extractor: F) -> Result<Report, PipelineError>
where
    E: EmbeddingExtractor,
    F: FnOnce() -> Result<E, PipelineError>,
{
    if !request.probe.is_file() {
        return Err(PipelineError::ImageNotFound(request.probe.clone()));
    }
    let entries = gallery::scan(&request.gallery_dir)?;
    log::info!(
        "matching {} against {} gallery image(s)",
        request.probe.display(),
        entries.len()
    );

    let mut extractor = init_extractor()?;

    let probe_img = image::open(&request.probe).map_err(|err| {
        PipelineError::processing(format!(
            "decoding probe image {}: {err}",
            request.probe.display()
        ))
    })?;
    let probe = extractor.extract(&probe_img)?;
    drop(probe_img);

    let mut cache = if request.use_cache {
        EmbeddingCache::open(&request.gallery_dir)
    } else {
        EmbeddingCache::disabled()
    };
    cache.prune(|name| entries.iter().any(|e| e.file_name == name));

    let mut embedded = Vec::with_capacity(entries.len());
    for entry in entries {
        match gallery_embedding(&mut extractor, &mut cache, &entry) {
            Ok(embedding) => embedded.push(EmbeddedEntry { entry, embedding }),
            Err(err) => log::warn!("skipping gallery image {}: {err:#}", entry.file_name),
        }
    }
    if let Err(err) = cache.save() {
        log::warn!("could not persist embedding cache: {err:#}");
    }

    if embedded.is_empty() {
        log::warn!("no gallery image yielded an embedding");
        return Ok(Report::no_match());
    }

    match matcher::best_candidate(&probe, &embedded) {
        Some(candidate) if candidate.distance <= request.threshold => {
            log::info!(
                "matched {} at distance {:.4}",
                candidate.entry.file_name,
                candidate.distance
            );
            Ok(Report::matched(candidate.entry, candidate.distance))
        }
        Some(candidate) => {
            log::info!(
                "best candidate {} at distance {:.4} is beyond the rejection threshold {:.2}",
                candidate.entry.file_name,
                candidate.distance,
                request.threshold
            );
            Ok(Report::no_match())
        }
        None => Ok(Report::no_match()),
    }
}

/// Embed one gallery image, going through the cache when the file's mtime
/// is known and unchanged.
fn gallery_embedding<E: EmbeddingExtractor>(
    extractor: &mut E,
    cache: &mut EmbeddingCache,
    entry: &GalleryEntry,
) -> Result<Embedding> {
    let mtime = cache::mtime_secs(&entry.path);
    if let Some(mtime) = mtime {
        if let Some(hit) = cache.get(&entry.file_name, mtime) {
            log::debug!("cache hit for {}", entry.file_name);
            return Ok(hit);
        }
    }

    let img = image::open(&entry.path)
        .with_context(|| format!("decoding {}", entry.path.display()))?;
    let embedding = extractor
        .extract(&img)
        .with_context(|| format!("embedding {}", entry.path.display()))?;
    if let Some(mtime) = mtime {
        cache.insert(entry.file_name.clone(), mtime, &embedding);
    }
    Ok(embedding)
}
