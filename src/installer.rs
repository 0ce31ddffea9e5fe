//! Installation of compiled-library packages into the sandbox.
//!
//! Each install is independent: it fetches one archive, unpacks it and writes
//! its files under the target directory, then reports `LibLoaded` or
//! `LibError` for that package alone.

use coqpod_core::protocol::Notice;
use futures::future::join_all;
use thiserror::Error;

use crate::events::{EventBus, PodEvent};
use crate::transport::{unpack, DownloadProgress, Fetcher, TransportError};
use crate::vfs::{Vfs, VfsError};

/// Marker for packages shipped alongside the kernel image.
pub const SHORTHAND_MARKER: char = '+';

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{uri}: {source}")]
    Transport {
        uri: String,
        #[source]
        source: TransportError,
    },

    #[error("{uri}: {source}")]
    Vfs {
        uri: String,
        #[source]
        source: VfsError,
    },

    #[error("{uri}: install task failed: {message}")]
    Task { uri: String, message: String },
}

impl InstallError {
    pub fn uri(&self) -> &str {
        match self {
            Self::Transport { uri, .. } | Self::Vfs { uri, .. } | Self::Task { uri, .. } => uri,
        }
    }
}

/// Expand `+name` to `<binary_root>/coq/<name>.coq-pkg`; other URIs are kept.
pub fn resolve_uri(uri: &str, binary_root: &str) -> String {
    match uri.strip_prefix(SHORTHAND_MARKER) {
        Some(name) => format!("{}/coq/{}.coq-pkg", binary_root.trim_end_matches('/'), name),
        None => uri.to_string(),
    }
}

/// Outcome of one install within a batch.
pub type InstallResult = Result<Vec<String>, InstallError>;

#[derive(Debug, Clone)]
pub struct Installer {
    fetcher: Fetcher,
    vfs: Vfs,
    events: EventBus,
    binary_root: String,
}

impl Installer {
    pub fn new(fetcher: Fetcher, vfs: Vfs, events: EventBus, binary_root: impl Into<String>) -> Self {
        Self {
            fetcher,
            vfs,
            events,
            binary_root: binary_root.into(),
        }
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Install one package under `dir`. Returns the virtual paths written.
    ///
    /// Failures are reported as `LibError` and returned to the caller.
    pub async fn install_package(&self, uri: &str, dir: &str) -> InstallResult {
        let result = self.try_install(uri, dir).await;
        match &result {
            Ok(files) => {
                tracing::info!("Installed {} ({} files)", uri, files.len());
                self.events
                    .publish(PodEvent::Message(Notice::LibLoaded(uri.to_string()).into()));
            }
            Err(e) => {
                tracing::error!("Failed to install {}: {}", uri, e);
                self.events.publish(PodEvent::Message(
                    Notice::LibError(uri.to_string(), e.to_string()).into(),
                ));
            }
        }
        result
    }

    /// Install every package concurrently and wait for all of them to settle.
    /// Results come back in the order of `uris`.
    pub async fn install_all(&self, uris: &[String], dir: &str) -> Vec<(String, InstallResult)> {
        let installs = uris.iter().map(|uri| async move {
            let result = self.install_package(uri, dir).await;
            (uri.clone(), result)
        });
        join_all(installs).await
    }

    async fn try_install(&self, uri: &str, dir: &str) -> InstallResult {
        let location = resolve_uri(uri, &self.binary_root);

        let events = self.events.clone();
        let progress_uri = uri.to_string();
        let mut report = move |download: DownloadProgress| {
            events.publish(PodEvent::Progress {
                uri: progress_uri.clone(),
                download,
            })
        };

        let bytes = self
            .fetcher
            .fetch(&location, Some(&mut report))
            .await
            .map_err(|source| InstallError::Transport {
                uri: uri.to_string(),
                source,
            })?;

        let vfs = self.vfs.clone();
        let target = dir.trim_start_matches('/').to_string();
        let owned_uri = uri.to_string();
        tokio::task::spawn_blocking(move || write_archive(&vfs, &owned_uri, &target, bytes))
            .await
            .map_err(|e| InstallError::Task {
                uri: uri.to_string(),
                message: e.to_string(),
            })?
    }
}

/// Unpack `bytes` and write every entry below `target`. All writes finish
/// before this returns.
fn write_archive(vfs: &Vfs, uri: &str, target: &str, bytes: Vec<u8>) -> InstallResult {
    let transport = |source| InstallError::Transport {
        uri: uri.to_string(),
        source,
    };

    let mut installed = Vec::new();
    for entry in unpack(bytes).map_err(transport)? {
        let (name, data) = entry.map_err(transport)?;
        let path = if target.is_empty() {
            name
        } else {
            format!("{}/{}", target.trim_end_matches('/'), name)
        };
        let vpath = vfs.put(&path, &data).map_err(|source| InstallError::Vfs {
            uri: uri.to_string(),
            source,
        })?;
        installed.push(vpath);
    }
    Ok(installed)
}
