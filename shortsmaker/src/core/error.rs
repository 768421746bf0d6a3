//! ShortsMaker Error Definitions
//!
//! Defines error types used throughout the project.

use std::fmt;

use thiserror::Error;

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    /// Malformed or missing transcript, empty text, invalid job input
    #[error("Input error: {0}")]
    Input(String),

    /// The timing index could not anchor any token
    #[error("Alignment error: {0}")]
    Alignment(String),

    /// Encode/mux failure or unreadable media source
    #[error("Composition error: {0}")]
    Composition(String),

    /// Handle acquisition or release failure
    #[error("Resource error: {0}")]
    Resource(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient failure of an external collaborator (network, external tool)
    #[error("Collaborator failed: {0}")]
    Collaborator(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Interrupted before the job completed")]
    Interrupted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`], reported alongside the failing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Alignment,
    Composition,
    Resource,
    NotFound,
    Collaborator,
    Config,
    Interrupted,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Input => "InputError",
            ErrorKind::Alignment => "AlignmentError",
            ErrorKind::Composition => "CompositionError",
            ErrorKind::Resource => "ResourceError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Collaborator => "CollaboratorError",
            ErrorKind::Config => "ConfigError",
            ErrorKind::Interrupted => "Interrupted",
            ErrorKind::Io => "IoError",
        };
        f.write_str(name)
    }
}

impl CoreError {
    /// Returns the error kind used in user-facing failure reports
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Input(_) | CoreError::JsonError(_) | CoreError::YamlError(_) => {
                ErrorKind::Input
            }
            CoreError::Alignment(_) => ErrorKind::Alignment,
            CoreError::Composition(_) => ErrorKind::Composition,
            CoreError::Resource(_) => ErrorKind::Resource,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Collaborator(_) => ErrorKind::Collaborator,
            CoreError::Config(_) => ErrorKind::Config,
            CoreError::Interrupted => ErrorKind::Interrupted,
            CoreError::IoError(_) => ErrorKind::Io,
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Only collaborator and IO failures qualify; composition is deterministic
    /// given identical inputs.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Collaborator(_) | CoreError::IoError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(CoreError::Input("x".into()).kind(), ErrorKind::Input);
        assert_eq!(
            CoreError::Composition("x".into()).kind(),
            ErrorKind::Composition
        );
        assert_eq!(CoreError::Interrupted.kind(), ErrorKind::Interrupted);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(CoreError::from(io).kind(), ErrorKind::Io);
    }

    #[test]
    fn test_only_collaborator_and_io_are_transient() {
        assert!(CoreError::Collaborator("timeout".into()).is_transient());
        assert!(!CoreError::Composition("x264 failed".into()).is_transient());
        assert!(!CoreError::Alignment("nothing anchored".into()).is_transient());
    }

    #[test]
    fn test_kind_display_names() {
        assert_eq!(ErrorKind::Composition.to_string(), "CompositionError");
        assert_eq!(ErrorKind::Alignment.to_string(), "AlignmentError");
    }
}
