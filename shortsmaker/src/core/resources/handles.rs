//! Concrete media handles registered with the resource manager.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{HandleKind, MediaHandle};

// =============================================================================
// Source Reader
// =============================================================================

/// Read-only handle on a source media file.
///
/// Opening the file up front proves the source is readable before any
/// encoder process is spawned.
#[derive(Debug)]
pub struct SourceReader {
    path: PathBuf,
    file: Option<File>,
    size: u64,
}

impl SourceReader {
    /// Opens `path` read-only and keeps the handle until release
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }
        Ok(Self {
            path,
            file: Some(file),
            size: meta.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes at the time the handle was opened
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl MediaHandle for SourceReader {
    fn kind(&self) -> HandleKind {
        HandleKind::SourceReader
    }

    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn release(&mut self) -> io::Result<()> {
        self.file.take();
        Ok(())
    }
}

// =============================================================================
// Scratch File
// =============================================================================

/// A file owned by the current job; deleted on release.
///
/// The file itself does not need to exist at registration time, so a
/// partial output can be registered before the encoder creates it.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    kind: HandleKind,
}

impl ScratchFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: HandleKind::ScratchFile,
        }
    }

    /// A caption surface (the text file a drawtext layer reads)
    pub fn surface(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: HandleKind::RenderSurface,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MediaHandle for ScratchFile {
    fn kind(&self) -> HandleKind {
        self.kind
    }

    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn release(&mut self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// Scratch Directory
// =============================================================================

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Per-job scratch directory, removed recursively on release.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Creates a fresh, uniquely named directory under `parent`
    pub fn create(parent: &Path, prefix: &str) -> io::Result<Self> {
        std::fs::create_dir_all(parent)?;
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let seq = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = parent.join(format!(
            "{}-{}-{}-{}",
            prefix,
            stamp,
            std::process::id(),
            seq
        ));
        std::fs::create_dir(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside the directory
    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }
}

impl MediaHandle for ScratchDir {
    fn kind(&self) -> HandleKind {
        HandleKind::ScratchDir
    }

    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn release(&mut self) -> io::Result<()> {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
