//! Render Pipeline Module
//!
//! Turns caption cards and source media into the final video.
//!
//! # Modules
//!
//! - `overlay`: caption cards to timed drawtext layers
//! - `plan`: output timeline and background window selection
//! - `filter_graph`: FFmpeg filter graph construction
//! - `compositor`: encode, mux and atomic rename

mod compositor;
mod filter_graph;
mod overlay;
mod plan;

pub use compositor::{CompositionReport, VideoCompositor};
pub use filter_graph::{build_filter_graph, input_args, segment_input_args, speed_filter};
pub use overlay::{wrap_text, DrawTextLayer, FrameSize, OverlayClip, TimedOverlayRenderer};
pub use plan::{
    plan_composition, select_segment, CompositionOptions, CompositionPlan, CreditsPlacement,
    CreditsSource, MediaSegment, RenderJob, SourceDurations,
};
