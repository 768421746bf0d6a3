//! Resource Lifecycle Management
//!
//! Every stage that opens a media handle (source reader, rendering surface,
//! scratch file) registers it with a [`ResourceLifecycleManager`]. On normal
//! completion or on any failure path the manager releases all registered
//! handles exactly once, in reverse registration order.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut resources = ResourceLifecycleManager::new();
//! let scratch = ScratchDir::create(&cache_dir, "job")?;
//! let dir = scratch.path().to_path_buf();
//! resources.register(scratch);
//! resources.register(SourceReader::open(&bg_video)?);
//! // ... run stages ...
//! resources.release_all()?; // or simply drop `resources`
//! ```

mod handles;

pub use handles::{ScratchDir, ScratchFile, SourceReader};

use std::fmt;

use tracing::{debug, warn};

use crate::core::{CoreError, CoreResult};

// =============================================================================
// Handle Trait
// =============================================================================

/// Category of a registered handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Read-only handle on a source media file
    SourceReader,
    /// Per-card caption surface (text file read by drawtext)
    RenderSurface,
    /// Intermediate file (filter script, encoder log, partial output)
    ScratchFile,
    /// Per-job scratch directory
    ScratchDir,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleKind::SourceReader => "source-reader",
            HandleKind::RenderSurface => "render-surface",
            HandleKind::ScratchFile => "scratch-file",
            HandleKind::ScratchDir => "scratch-dir",
        };
        f.write_str(name)
    }
}

/// A media handle whose release must be guaranteed
pub trait MediaHandle: Send {
    /// Handle category (used for logging and reports)
    fn kind(&self) -> HandleKind;

    /// Human-readable label, usually the path
    fn label(&self) -> String;

    /// Releases the underlying resource. Called at most once by the manager.
    fn release(&mut self) -> std::io::Result<()>;
}

/// Identifier returned by [`ResourceLifecycleManager::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(usize);

struct Registered {
    id: HandleId,
    handle: Box<dyn MediaHandle>,
}

/// Outcome of a bulk release
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseSummary {
    /// Number of handles released by this call
    pub released: usize,
}

// =============================================================================
// Manager
// =============================================================================

/// Tracks open media handles and guarantees their release.
#[derive(Default)]
pub struct ResourceLifecycleManager {
    handles: Vec<Option<Registered>>,
    next_id: usize,
}

impl ResourceLifecycleManager {
    /// Creates an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handle; it will be released by `release_all` or on drop.
    pub fn register<H: MediaHandle + 'static>(&mut self, handle: H) -> HandleId {
        let id = HandleId(self.next_id);
        self.next_id += 1;
        debug!(kind = %handle.kind(), label = %handle.label(), "Registered handle");
        self.handles.push(Some(Registered {
            id,
            handle: Box::new(handle),
        }));
        id
    }

    /// Number of handles not yet released
    pub fn live_count(&self) -> usize {
        self.handles.iter().filter(|h| h.is_some()).count()
    }

    /// Number of live handles of the given kind
    pub fn live_count_of(&self, kind: HandleKind) -> usize {
        self.handles
            .iter()
            .flatten()
            .filter(|r| r.handle.kind() == kind)
            .count()
    }

    /// Releases a single handle ahead of the bulk release.
    ///
    /// Releasing an id twice is a no-op.
    pub fn release(&mut self, id: HandleId) -> CoreResult<()> {
        let slot = self
            .handles
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|r| r.id == id));

        match slot.and_then(Option::take) {
            Some(mut registered) => release_one(&mut registered).map_err(|msg| {
                CoreError::Resource(format!("Failed to release handle: {}", msg))
            }),
            None => Ok(()),
        }
    }

    /// Releases every live handle in reverse registration order.
    ///
    /// All handles are attempted even when some fail; failures are reported
    /// together as a single [`CoreError::Resource`].
    pub fn release_all(&mut self) -> CoreResult<ReleaseSummary> {
        let mut failures = Vec::new();
        let mut released = 0;

        for slot in self.handles.iter_mut().rev() {
            if let Some(mut registered) = slot.take() {
                released += 1;
                if let Err(msg) = release_one(&mut registered) {
                    failures.push(msg);
                }
            }
        }
        self.handles.clear();

        if failures.is_empty() {
            Ok(ReleaseSummary { released })
        } else {
            Err(CoreError::Resource(format!(
                "{} of {} handle(s) failed to release: {}",
                failures.len(),
                released,
                failures.join("; ")
            )))
        }
    }
}

fn release_one(registered: &mut Registered) -> Result<(), String> {
    let kind = registered.handle.kind();
    let label = registered.handle.label();
    match registered.handle.release() {
        Ok(()) => {
            debug!(%kind, %label, "Released handle");
            Ok(())
        }
        Err(e) => {
            warn!(%kind, %label, "Failed to release handle: {}", e);
            Err(format!("{} {}: {}", kind, label, e))
        }
    }
}

impl Drop for ResourceLifecycleManager {
    fn drop(&mut self) {
        if self.live_count() == 0 {
            return;
        }
        if let Err(e) = self.release_all() {
            warn!("Release on drop incomplete: {}", e);
        }
    }
}

impl fmt::Debug for ResourceLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLifecycleManager")
            .field("live", &self.live_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl MediaHandle for Recorder {
        fn kind(&self) -> HandleKind {
            HandleKind::ScratchFile
        }

        fn label(&self) -> String {
            self.name.to_string()
        }

        fn release(&mut self) -> std::io::Result<()> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                Err(std::io::Error::other("boom"))
            } else {
                Ok(())
            }
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    ) -> Recorder {
        Recorder {
            name,
            log: Arc::clone(log),
            fail,
        }
    }

    #[test]
    fn test_release_all_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ResourceLifecycleManager::new();
        manager.register(recorder("video", &log, false));
        manager.register(recorder("music", &log, false));
        manager.register(recorder("surface", &log, false));

        let summary = manager.release_all().unwrap();
        assert_eq!(summary.released, 3);
        assert_eq!(*log.lock().unwrap(), vec!["surface", "music", "video"]);
        assert_eq!(manager.live_count(), 0);
    }

    #[test]
    fn test_handles_released_exactly_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut manager = ResourceLifecycleManager::new();
            let first = manager.register(recorder("a", &log, false));
            manager.register(recorder("b", &log, false));

            manager.release(first).unwrap();
            manager.release(first).unwrap();
            manager.release_all().unwrap();
            // drop runs here with nothing left
        }
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_drop_releases_remaining_handles() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut manager = ResourceLifecycleManager::new();
            manager.register(recorder("reader", &log, false));
            manager.register(recorder("scratch", &log, false));
        }
        assert_eq!(*log.lock().unwrap(), vec!["scratch", "reader"]);
    }

    #[test]
    fn test_failed_release_does_not_stop_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ResourceLifecycleManager::new();
        manager.register(recorder("first", &log, false));
        manager.register(recorder("broken", &log, true));
        manager.register(recorder("last", &log, false));

        let err = manager.release_all().unwrap_err();
        assert!(matches!(err, CoreError::Resource(_)));
        assert!(err.to_string().contains("broken"));
        assert_eq!(*log.lock().unwrap(), vec!["last", "broken", "first"]);
        assert_eq!(manager.live_count(), 0);
    }

    #[test]
    fn test_release_on_panic_unwind() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = Arc::clone(&log);
        let result = std::panic::catch_unwind(move || {
            let mut manager = ResourceLifecycleManager::new();
            manager.register(recorder("surface", &inner, false));
            panic!("stage blew up");
        });
        assert!(result.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["surface"]);
    }

    #[test]
    fn test_live_count_by_kind() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ResourceLifecycleManager::new();
        manager.register(recorder("x", &log, false));
        assert_eq!(manager.live_count_of(HandleKind::ScratchFile), 1);
        assert_eq!(manager.live_count_of(HandleKind::SourceReader), 0);
    }
}
