//! ShortsMaker Core Engine
//!
//! Turns a post into a narrated, captioned vertical video.
//! Handles transcript timing, caption chunking, overlay rendering,
//! composition and the lifecycle of every media handle a job opens.

pub mod captions;
pub mod ffmpeg;
pub mod fs;
pub mod pipeline;
pub mod process;
pub mod render;
pub mod resources;
pub mod script;
pub mod settings;
pub mod sources;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

#[cfg(test)]
mod tests_pipeline;
