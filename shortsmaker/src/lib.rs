//! ShortsMaker Core Library
//!
//! Assembles narrated short-form vertical videos from a text post.
//! This library contains the word timing index, caption chunker, overlay
//! renderer, FFmpeg compositor, resource lifecycle manager and the
//! collaborators (Reddit, TikTok TTS, Whisper, Discord) that feed them.

pub mod core;

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;

use crate::core::settings::LoggingConfig;
use crate::core::{CoreError, CoreResult};

// =============================================================================
// Logging
// =============================================================================

/// Filter directive for a logging section: its level, or `error` when disabled
pub fn log_filter_directive(config: &LoggingConfig) -> String {
    if config.enable {
        config.level.to_ascii_lowercase()
    } else {
        "error".to_string()
    }
}

/// Installs the global subscriber: console on stderr plus `log_dir/log_file`.
///
/// `RUST_LOG` takes precedence over the configured level. Keep the returned
/// guard alive until exit so buffered file lines are flushed.
pub fn init_logging(config: &LoggingConfig, log_dir: &Path) -> CoreResult<WorkerGuard> {
    use tracing_subscriber::prelude::*;

    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::never(log_dir, &config.log_file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_filter_directive(config)))
        .map_err(|e| CoreError::Config(format!("invalid logging.level: {}", e)))?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);

    // Already initialized in tests or when embedded.
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(guard)
}
