//! Process spawning helpers.
//!
//! External tools (ffmpeg, ffprobe, yt-dlp) are spawned through these helpers
//! so that Windows does not flash a console window per invocation and so that
//! a child is never left running when the job unwinds.

use std::process::{Child, Command, ExitStatus};

use tracing::warn;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Apply platform-specific flags to a process command.
pub fn configure_std_command(cmd: &mut Command) {
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(target_os = "windows"))]
    let _ = cmd;
}

/// Owns a spawned child; kills and reaps it on drop unless it was waited for.
pub struct ChildGuard {
    child: Option<Child>,
    name: String,
}

impl ChildGuard {
    pub fn new(child: Child, name: impl Into<String>) -> Self {
        Self {
            child: Some(child),
            name: name.into(),
        }
    }

    /// Mutable access to the child (for taking stdout/stderr pipes)
    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Waits for the child to exit and disarms the guard.
    pub fn wait(mut self) -> std::io::Result<ExitStatus> {
        match self.child.take() {
            Some(mut child) => child.wait(),
            None => Err(std::io::Error::other("child already reaped")),
        }
    }

    /// Kills the child now and reaps it.
    pub fn kill(mut self) {
        if let Some(child) = self.child.take() {
            terminate(child, &self.name);
        }
    }
}

fn terminate(mut child: Child, name: &str) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if let Err(e) = child.kill() {
        warn!("Failed to kill {} (pid {}): {}", name, child.id(), e);
    }
    let _ = child.wait();
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(child) = self.child.take() {
            terminate(child, &self.name);
        }
    }
}
