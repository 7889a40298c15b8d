pub mod capability;
pub mod config;
pub mod error;
pub mod index;
pub mod matcher;
pub mod server;

// Re-export vision types for convenience
pub use facefind_vision::{Detection, Embedding};

pub use capability::{FaceCapability, VisionCapability};
pub use error::{ExtractError, FindError, TrainingError};
pub use index::{IdentityIndex, IdentityRecord};
pub use matcher::{MatchOptions, MatchService};
