//! End-to-end pipeline runs against temp galleries, with a deterministic
//! extractor injected through the driver seam.

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use facematch::driver::{self, Request};
use facematch::extract::EmbeddingExtractor;
use facematch::report::{PipelineError, Report};
use facematch::{Embedding, ExtractError};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

/// Maps the top-left pixel color to an embedding, so fixture images fully
/// determine distances. An all-black pixel counts as "no face".
#[derive(Clone, Default)]
struct FakeExtractor {
    calls: Rc<Cell<usize>>,
}

impl EmbeddingExtractor for FakeExtractor {
    fn extract(&mut self, img: &DynamicImage) -> Result<Embedding, ExtractError> {
        self.calls.set(self.calls.get() + 1);
        let px = img.get_pixel(0, 0);
        if px[0] == 0 && px[1] == 0 && px[2] == 0 {
            return Err(ExtractError::NoFace);
        }
        let raw = [px[0] as f32, px[1] as f32, px[2] as f32];
        let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        Ok(Embedding::from_raw(raw.iter().map(|v| v / norm).collect()))
    }
}

fn write_image(path: &Path, color: [u8; 3]) {
    RgbImage::from_pixel(8, 8, Rgb(color)).save(path).unwrap();
}

fn request(probe: &Path, gallery: &Path) -> Request {
    Request {
        probe: probe.to_path_buf(),
        gallery_dir: gallery.to_path_buf(),
        threshold: 0.68,
        use_cache: true,
    }
}

fn run_with(request: &Request, extractor: FakeExtractor) -> Report {
    driver::run(request, move || Ok(extractor))
}

fn to_json(report: &Report) -> serde_json::Value {
    let mut buf = Vec::new();
    report.write_to(&mut buf).unwrap();
    assert_eq!(buf.iter().filter(|&&b| b == b'\n').count(), 1);
    serde_json::from_slice(&buf).unwrap()
}

#[test]
fn finds_best_match() {
    let dir = tempfile::tempdir().unwrap();
    let gallery = dir.path().join("db");
    std::fs::create_dir(&gallery).unwrap();
    write_image(&gallery.join("007_jane.jpg"), [255, 0, 0]);
    write_image(&gallery.join("042_bob.png"), [0, 255, 0]);
    let probe = dir.path().join("probe.jpg");
    write_image(&probe, [250, 5, 5]);

    let report = run_with(&request(&probe, &gallery), FakeExtractor::default());
    let value = to_json(&report);

    assert_eq!(value["match"], true);
    assert_eq!(value["filename"], "007_jane.jpg");
    assert_eq!(value["personIdentifier"], "007_jane");
    assert!(value["matchedFilePath"]
        .as_str()
        .unwrap()
        .ends_with("007_jane.jpg"));

    let distance = value["distance"].as_f64().unwrap();
    let confidence = value["confidence"].as_f64().unwrap();
    assert!(distance < 0.1);
    assert!((confidence - (1.0 - distance) * 100.0).abs() < 0.02);
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn repeated_runs_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let gallery = dir.path().join("db");
    std::fs::create_dir(&gallery).unwrap();
    write_image(&gallery.join("007_jane.jpg"), [255, 0, 0]);
    write_image(&gallery.join("042_bob.png"), [0, 255, 0]);
    let probe = dir.path().join("probe.jpg");
    write_image(&probe, [200, 40, 40]);

    let req = request(&probe, &gallery);
    let first = to_json(&run_with(&req, FakeExtractor::default()));
    let second = to_json(&run_with(&req, FakeExtractor::default()));
    assert_eq!(first, second);
}

#[test]
fn no_match_beyond_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let gallery = dir.path().join("db");
    std::fs::create_dir(&gallery).unwrap();
    write_image(&gallery.join("007_jane.jpg"), [255, 0, 0]);
    let probe = dir.path().join("probe.jpg");
    write_image(&probe, [0, 0, 255]);

    let mut req = request(&probe, &gallery);
    req.threshold = 0.1;
    let report = run_with(&req, FakeExtractor::default());
    let value = to_json(&report);

    assert_eq!(value["match"], false);
    assert_eq!(value["message"], "No matching person found in database.");
    assert_eq!(value["confidence"], 0);
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn missing_probe_skips_extractor_init() {
    let dir = tempfile::tempdir().unwrap();
    let gallery = dir.path().join("db");
    std::fs::create_dir(&gallery).unwrap();
    write_image(&gallery.join("007_jane.jpg"), [255, 0, 0]);

    let req = request(&dir.path().join("absent.jpg"), &gallery);
    let mut initialized = false;
    let report = driver::run(&req, || {
        initialized = true;
        Ok(FakeExtractor::default())
    });

    assert!(!initialized);
    let value = to_json(&report);
    assert_eq!(value["errorType"], "IMAGE_NOT_FOUND");
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn missing_gallery_dir_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let probe = dir.path().join("probe.jpg");
    write_image(&probe, [255, 0, 0]);

    let req = request(&probe, &dir.path().join("absent"));
    let report = run_with(&req, FakeExtractor::default());
    assert_eq!(to_json(&report)["errorType"], "DB_PATH_NOT_FOUND");
}

#[test]
fn empty_gallery_reports_listing() {
    let dir = tempfile::tempdir().unwrap();
    let gallery = dir.path().join("db");
    std::fs::create_dir(&gallery).unwrap();
    std::fs::write(gallery.join("notes.txt"), "not an image").unwrap();
    let probe = dir.path().join("probe.jpg");
    write_image(&probe, [255, 0, 0]);

    let report = run_with(&request(&probe, &gallery), FakeExtractor::default());
    let value = to_json(&report);
    assert_eq!(value["errorType"], "NO_DB_IMAGES");
    assert_eq!(value["foundFiles"][0], "notes.txt");
}

#[test]
fn faceless_probe_is_an_error_not_a_match() {
    let dir = tempfile::tempdir().unwrap();
    let gallery = dir.path().join("db");
    std::fs::create_dir(&gallery).unwrap();
    write_image(&gallery.join("007_jane.jpg"), [255, 0, 0]);
    let probe = dir.path().join("probe.jpg");
    write_image(&probe, [0, 0, 0]);

    let report = run_with(&request(&probe, &gallery), FakeExtractor::default());
    let value = to_json(&report);
    assert_eq!(value["errorType"], "NO_FACE_DETECTED");
    assert_eq!(value["match"], false);
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn faceless_gallery_entry_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let gallery = dir.path().join("db");
    std::fs::create_dir(&gallery).unwrap();
    write_image(&gallery.join("000_void.jpg"), [0, 0, 0]);
    write_image(&gallery.join("007_jane.jpg"), [255, 0, 0]);
    let probe = dir.path().join("probe.jpg");
    write_image(&probe, [250, 5, 5]);

    let report = run_with(&request(&probe, &gallery), FakeExtractor::default());
    let value = to_json(&report);
    assert_eq!(value["match"], true);
    assert_eq!(value["filename"], "007_jane.jpg");
}

#[test]
fn second_run_reuses_cached_gallery_embeddings() {
    let dir = tempfile::tempdir().unwrap();
    let gallery = dir.path().join("db");
    std::fs::create_dir(&gallery).unwrap();
    write_image(&gallery.join("007_jane.jpg"), [255, 0, 0]);
    write_image(&gallery.join("042_bob.png"), [0, 255, 0]);
    let probe = dir.path().join("probe.jpg");
    write_image(&probe, [250, 5, 5]);

    let req = request(&probe, &gallery);

    let first = FakeExtractor::default();
    let first_calls = first.calls.clone();
    run_with(&req, first);
    assert_eq!(first_calls.get(), 3); // probe + 2 gallery images
    assert!(gallery.join(".embeddings.bin").is_file());

    let second = FakeExtractor::default();
    let second_calls = second.calls.clone();
    let report = run_with(&req, second);
    assert_eq!(second_calls.get(), 1); // probe only
    assert_eq!(to_json(&report)["filename"], "007_jane.jpg");
}

#[test]
fn no_cache_disables_the_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let gallery = dir.path().join("db");
    std::fs::create_dir(&gallery).unwrap();
    write_image(&gallery.join("007_jane.jpg"), [255, 0, 0]);
    let probe = dir.path().join("probe.jpg");
    write_image(&probe, [250, 5, 5]);

    let mut req = request(&probe, &gallery);
    req.use_cache = false;

    let first = FakeExtractor::default();
    let first_calls = first.calls.clone();
    run_with(&req, first);
    assert_eq!(first_calls.get(), 2);
    assert!(!gallery.join(".embeddings.bin").exists());

    let second = FakeExtractor::default();
    let second_calls = second.calls.clone();
    run_with(&req, second);
    assert_eq!(second_calls.get(), 2);
}

#[test]
fn model_init_failure_maps_to_import_error() {
    let dir = tempfile::tempdir().unwrap();
    let gallery = dir.path().join("db");
    std::fs::create_dir(&gallery).unwrap();
    write_image(&gallery.join("007_jane.jpg"), [255, 0, 0]);
    let probe = dir.path().join("probe.jpg");
    write_image(&probe, [255, 0, 0]);

    let req = request(&probe, &gallery);
    let report = driver::run(&req, || -> Result<FakeExtractor, PipelineError> {
        Err(PipelineError::ModelUnavailable(
            facematch_vision::ModelError::NotFound("models/absent.onnx".into()),
        ))
    });

    let value = to_json(&report);
    assert_eq!(value["errorType"], "IMPORT_ERROR");
    assert!(value["details"]
        .as_str()
        .unwrap()
        .contains("absent.onnx"));
    assert_eq!(report.exit_code(), 1);
}
