//! Sandboxed filesystem shared with the kernel.
//!
//! Virtual paths are absolute, `/`-separated and map onto a host directory.
//! Relative paths land under the library root (`/lib` unless configured
//! otherwise). Writes are synchronous so the kernel observes them on its next
//! step.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

pub const DEFAULT_LIB_ROOT: &str = "/lib";

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("path '{0}' escapes the filesystem root")]
    Escape(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl VfsError {
    fn io(path: &str, source: io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}

/// Handle to the sandbox. Cheap to clone; all clones see the same files.
#[derive(Debug, Clone)]
pub struct Vfs {
    root: Arc<PathBuf>,
    lib_root: Arc<str>,
}

impl Vfs {
    /// Open (and create if needed) a sandbox rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, VfsError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| VfsError::io("/", e))?;
        Ok(Self {
            root: Arc::new(root),
            lib_root: Arc::from(DEFAULT_LIB_ROOT),
        })
    }

    pub fn with_lib_root(mut self, lib_root: &str) -> Self {
        let trimmed = lib_root.trim_end_matches('/');
        self.lib_root = if trimmed.starts_with('/') {
            Arc::from(trimmed)
        } else {
            Arc::from(format!("/{trimmed}"))
        };
        self
    }

    pub fn host_root(&self) -> &Path {
        &self.root
    }

    pub fn lib_root(&self) -> &str {
        &self.lib_root
    }

    /// Normalize `path` to an absolute virtual path.
    pub fn virtual_path(&self, path: &str) -> Result<String, VfsError> {
        let full = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.lib_root, path)
        };

        let mut parts: Vec<&str> = Vec::new();
        for part in full.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        return Err(VfsError::Escape(path.to_string()));
                    }
                }
                _ => parts.push(part),
            }
        }
        Ok(format!("/{}", parts.join("/")))
    }

    /// Host location backing a virtual path.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, VfsError> {
        let vpath = self.virtual_path(path)?;
        Ok(self.root.join(vpath.trim_start_matches('/')))
    }

    /// Write `content` at `path`, creating parent directories. Existing files
    /// are overwritten. Returns the normalized virtual path.
    pub fn put(&self, path: &str, content: impl AsRef<[u8]>) -> Result<String, VfsError> {
        let vpath = self.virtual_path(path)?;
        let host = self.resolve(&vpath)?;
        if let Some(parent) = host.parent() {
            fs::create_dir_all(parent).map_err(|e| VfsError::io(&vpath, e))?;
        }
        fs::write(&host, content).map_err(|e| VfsError::io(&vpath, e))?;
        tracing::trace!("vfs put {}", vpath);
        Ok(vpath)
    }

    /// Read a file. A missing file is `Ok(None)`, not an error.
    pub fn get(&self, path: &str) -> Result<Option<Vec<u8>>, VfsError> {
        let host = self.resolve(path)?;
        if !host.is_file() {
            return Ok(None);
        }
        match fs::read(&host) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VfsError::io(path, e)),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    /// Remove a file. Returns whether something was removed.
    pub fn remove(&self, path: &str) -> Result<bool, VfsError> {
        let host = self.resolve(path)?;
        match fs::remove_file(&host) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(VfsError::io(path, e)),
        }
    }

    /// Every file below `dir`, as sorted virtual paths.
    pub fn list(&self, dir: &str) -> Result<Vec<String>, VfsError> {
        let vdir = self.virtual_path(dir)?;
        let host = self.resolve(&vdir)?;
        let mut files = Vec::new();
        if host.is_dir() {
            walk(&host, &vdir, &mut files)?;
        }
        files.sort();
        Ok(files)
    }
}

fn walk(host: &Path, vdir: &str, out: &mut Vec<String>) -> Result<(), VfsError> {
    let entries = fs::read_dir(host).map_err(|e| VfsError::io(vdir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| VfsError::io(vdir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let vpath = if vdir == "/" {
            format!("/{name}")
        } else {
            format!("{vdir}/{name}")
        };
        let path = entry.path();
        if path.is_dir() {
            walk(&path, &vpath, out)?;
        } else {
            out.push(vpath);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_land_under_lib_root() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = Vfs::open(dir.path()).unwrap();
        assert_eq!(vfs.virtual_path("Init.vo").unwrap(), "/lib/Init.vo");
        assert_eq!(vfs.virtual_path("/tmp/x").unwrap(), "/tmp/x");
        assert_eq!(vfs.virtual_path("/a/./b/../c").unwrap(), "/a/c");
    }

    #[test]
    fn custom_lib_root_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = Vfs::open(dir.path()).unwrap().with_lib_root("coq/lib/");
        assert_eq!(vfs.lib_root(), "/coq/lib");
        assert_eq!(vfs.virtual_path("A.vo").unwrap(), "/coq/lib/A.vo");
    }

    #[test]
    fn escaping_the_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = Vfs::open(dir.path()).unwrap();
        assert!(matches!(
            vfs.virtual_path("/../etc/passwd"),
            Err(VfsError::Escape(_))
        ));
    }
}
