//! Nearest-neighbor search over embedded gallery entries and the
//! distance-to-confidence mapping.

use facematch_vision::{cosine_distance, Embedding};

use crate::gallery::GalleryEntry;
use crate::report::round_to;

/// A gallery entry with its embedding computed.
pub struct EmbeddedEntry {
    pub entry: GalleryEntry,
    pub embedding: Embedding,
}

/// The nearest gallery entry and its cosine distance to the probe.
#[derive(Debug)]
pub struct MatchCandidate<'a> {
    pub entry: &'a GalleryEntry,
    pub distance: f32,
}

/// Minimum-distance entry. Strict less-than keeps the first-encountered
/// entry on ties, which together with the sorted gallery order makes
/// repeated runs deterministic.
pub fn best_candidate<'a>(
    probe: &Embedding,
    gallery: &'a [EmbeddedEntry],
) -> Option<MatchCandidate<'a>> {
    let mut best: Option<MatchCandidate<'a>> = None;
    for embedded in gallery {
        if embedded.embedding.len() != probe.len() {
            log::warn!(
                "skipping {}: embedding length {} does not match probe length {}",
                embedded.entry.file_name,
                embedded.embedding.len(),
                probe.len()
            );
            continue;
        }
        let distance = cosine_distance(probe, &embedded.embedding);
        if best.as_ref().map_or(true, |b| distance < b.distance) {
            best = Some(MatchCandidate {
                entry: &embedded.entry,
                distance,
            });
        }
    }
    best
}

/// Display confidence for a cosine distance: clamp(0, 100, (1-d)*100),
/// rounded to 2 decimal places. A bounded transform, not a probability.
pub fn confidence(distance: f32) -> f64 {
    let pct = (1.0 - f64::from(distance)) * 100.0;
    round_to(pct.clamp(0.0, 100.0), 2)
}
