use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use facematch::{config, driver, extract::OnnxExtractor, report::PipelineError};
use log::warn;

#[derive(Parser)]
#[command(name = "facematch")]
#[command(
    version,
    about = "Identify the person in a probe photo against a gallery of reference photos"
)]
struct Cli {
    /// Probe image to identify
    probe: Option<PathBuf>,
    /// Directory of reference images, named <personId>[_label].<ext>
    gallery: Option<PathBuf>,
    /// Cosine-distance rejection threshold (overrides the config file)
    #[arg(long)]
    threshold: Option<f32>,
    /// Recompute gallery embeddings instead of reading the sidecar cache
    #[arg(long)]
    no_cache: bool,
    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    // Diagnostics go to stderr; stdout carries the single result record.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let report = build_report(cli);

    if let Err(err) = report.emit() {
        log::error!("failed to write result record: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::from(report.exit_code() as u8)
}

fn build_report(cli: Cli) -> facematch::report::Report {
    let cfg = match config::load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            log::error!("{err:#}");
            return PipelineError::processing(format!("loading config: {err}")).into();
        }
    };

    let (probe, gallery_dir) = match (cli.probe, cli.gallery) {
        (Some(probe), Some(gallery)) => (probe, gallery),
        _ => {
            // Bundled fallbacks, strictly for local testing.
            warn!("probe and gallery not both given, using default paths: test.jpeg, db");
            (PathBuf::from("test.jpeg"), PathBuf::from("db"))
        }
    };

    let request = driver::Request {
        probe,
        gallery_dir,
        threshold: cli.threshold.unwrap_or(cfg.threshold),
        use_cache: !cli.no_cache,
    };

    let model_dir = config::model_dir(&cfg);
    let detection_score = cfg.detection_score;
    let nms = cfg.nms;
    driver::run(&request, move || {
        OnnxExtractor::new(&model_dir, detection_score, nms).map_err(PipelineError::from)
    })
}
