pub mod detect;
pub mod encode;
pub mod engine;
pub mod model;

// Re-export commonly used types
pub use detect::Detection;
pub use encode::{cosine_distance, Embedding};
pub use engine::{ExtractError, FaceEngine};
pub use model::ModelError;
