//! ShortsMaker Core Type Definitions
//!
//! Defines fundamental types used throughout the project.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{CoreError, CoreResult};

// =============================================================================
// Time Types
// =============================================================================

/// Time in seconds (floating point)
pub type TimeSec = f64;

/// Formats seconds for FFmpeg arguments and filter expressions.
///
/// Microsecond precision; rounding to frame boundaries happens inside the encoder.
pub fn format_seconds(sec: TimeSec) -> String {
    let sec = if sec.is_finite() { sec.max(0.0) } else { 0.0 };
    format!("{:.6}", sec)
}

/// Returns the value if it is a finite, non-negative timestamp
pub fn valid_timestamp(value: Option<f64>) -> Option<TimeSec> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

// =============================================================================
// Interruption
// =============================================================================

/// Shared flag raised when the process is asked to stop (e.g. Ctrl-C).
///
/// Jobs are not cancellable mid-stage, but long-running steps poll this flag
/// and turn an interruption into an ordinary failure so every registered
/// resource is released.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with [`CoreError::Interrupted`] once the flag is raised
    pub fn check(&self) -> CoreResult<()> {
        if self.is_raised() {
            Err(CoreError::Interrupted)
        } else {
            Ok(())
        }
    }
}
