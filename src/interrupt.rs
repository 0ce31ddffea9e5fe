//! Cooperative cancellation flag shared between host and kernel.
//!
//! The host may set the flag at any time. The kernel polls it between steps of
//! its own loop and gives up on the current command once it sees it set. No
//! poll frequency is guaranteed, so latency is unbounded but eventual.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::vfs::{Vfs, VfsError};

/// Marker mirror for kernels living outside the host process.
#[derive(Debug)]
struct Marker {
    vfs: Vfs,
    path: String,
}

#[derive(Debug, Clone, Default)]
pub struct InterruptChannel {
    flag: Arc<AtomicBool>,
    marker: Arc<Mutex<Option<Marker>>>,
}

impl InterruptChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the running command stop. Never produces an answer.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.mirror(true);
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
        self.mirror(false);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Kernel-side poll: returns whether the flag was set, and clears it.
    pub fn take(&self) -> bool {
        let was_set = self.flag.swap(false, Ordering::SeqCst);
        if was_set {
            self.mirror(false);
        }
        was_set
    }

    /// Mirror the flag into a marker file at `path` inside `vfs`. The marker
    /// exists exactly while the flag is set.
    pub fn attach_marker(&self, vfs: &Vfs, path: &str) -> Result<(), VfsError> {
        let vpath = vfs.virtual_path(path)?;
        let marker = Marker {
            vfs: vfs.clone(),
            path: vpath,
        };
        if self.is_set() {
            marker.vfs.put(&marker.path, b"1")?;
        } else {
            marker.vfs.remove(&marker.path)?;
        }
        let previous = self
            .marker
            .lock()
            .expect("interrupt lock poisoned")
            .replace(marker);
        if let Some(previous) = previous {
            previous.vfs.remove(&previous.path)?;
        }
        Ok(())
    }

    /// Host location of the marker file, if one is attached.
    pub fn marker_path(&self) -> Option<PathBuf> {
        let guard = self.marker.lock().expect("interrupt lock poisoned");
        guard.as_ref().and_then(|m| m.vfs.resolve(&m.path).ok())
    }

    fn mirror(&self, set: bool) {
        let guard = self.marker.lock().expect("interrupt lock poisoned");
        let Some(marker) = guard.as_ref() else {
            return;
        };
        let result = if set {
            marker.vfs.put(&marker.path, b"1").map(|_| ())
        } else {
            marker.vfs.remove(&marker.path).map(|_| ())
        };
        if let Err(e) = result {
            tracing::warn!("Failed to mirror interrupt flag: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_consumes_the_flag() {
        let channel = InterruptChannel::new();
        let kernel_side = channel.clone();
        assert!(!kernel_side.take());
        channel.set();
        assert!(kernel_side.take());
        assert!(!channel.is_set());
    }

    #[test]
    fn marker_follows_the_flag() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = Vfs::open(dir.path()).unwrap();
        let channel = InterruptChannel::new();
        channel.attach_marker(&vfs, "/.interrupt").unwrap();

        assert!(!vfs.exists("/.interrupt"));
        channel.set();
        assert!(vfs.exists("/.interrupt"));
        channel.clear();
        assert!(!vfs.exists("/.interrupt"));
    }
}
