pub mod cache;
pub mod config;
pub mod driver;
pub mod extract;
pub mod gallery;
pub mod matcher;
pub mod report;

// Re-export vision types for convenience
pub use facematch_vision::{cosine_distance, Embedding, ExtractError, FaceEngine};
