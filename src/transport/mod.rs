//! Fetching of binary resources (kernel images, package archives).
//!
//! `http://` and `https://` URIs go through `reqwest`; `file://` URIs and bare
//! host paths are read from disk. Both support chunked reads with progress
//! reporting.

mod archive;

pub use archive::{unpack, ArchiveEntries};

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;

/// Chunk size for reads from disk.
const FILE_CHUNK: usize = 64 * 1024;

/// Upper bound on buffer space reserved from an announced size. Sizes come
/// from the remote side, so larger bodies grow as their chunks arrive.
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

pub(crate) fn prealloc(announced: u64) -> Vec<u8> {
    Vec::with_capacity(announced.min(MAX_PREALLOC) as usize)
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{uri}: HTTP {status}")]
    Status { uri: String, status: StatusCode },

    #[error("failed to read '{uri}': {source}")]
    Io {
        uri: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive entry '{0}' escapes its directory")]
    UnsafeEntry(String),
}

/// Progress of one in-flight fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Total size when the source announces it.
    pub total: Option<u64>,
    pub downloaded: u64,
}

pub type ProgressFn<'a> = &'a mut (dyn FnMut(DownloadProgress) + Send);

/// Fetches resources and keeps track of reads in flight.
#[derive(Debug, Clone, Default)]
pub struct Fetcher {
    client: Client,
    pending: Arc<Mutex<HashSet<u64>>>,
    next: Arc<AtomicU64>,
}

/// Registration of one read in the pending set; removed on drop whatever the
/// outcome of the read.
struct Pending {
    set: Arc<Mutex<HashSet<u64>>>,
    id: u64,
}

impl Drop for Pending {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("pending set lock poisoned")
            .remove(&self.id);
    }
}

impl Fetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reads currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().expect("pending set lock poisoned").len()
    }

    fn track(&self) -> Pending {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.pending
            .lock()
            .expect("pending set lock poisoned")
            .insert(id);
        Pending {
            set: self.pending.clone(),
            id,
        }
    }

    /// Retrieve the bytes behind `uri`, reporting progress after every chunk
    /// when `on_progress` is given.
    pub async fn fetch(
        &self,
        uri: &str,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<Vec<u8>, TransportError> {
        let _pending = self.track();
        tracing::debug!("Fetching {}", uri);
        if uri.starts_with("http://") || uri.starts_with("https://") {
            self.fetch_http(uri, on_progress).await
        } else {
            let path = uri.strip_prefix("file://").unwrap_or(uri);
            fetch_file(uri, path, on_progress).await
        }
    }

    async fn fetch_http(
        &self,
        uri: &str,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<Vec<u8>, TransportError> {
        let mut response = self.client.get(uri).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                uri: uri.to_string(),
                status,
            });
        }

        let Some(on_progress) = on_progress else {
            return Ok(response.bytes().await?.to_vec());
        };

        let total = response.content_length();
        let mut buf = prealloc(total.unwrap_or(0));
        let mut reported = false;
        while let Some(chunk) = response.chunk().await? {
            buf.extend_from_slice(&chunk);
            on_progress(DownloadProgress {
                total,
                downloaded: buf.len() as u64,
            });
            reported = true;
        }
        if !reported {
            on_progress(DownloadProgress {
                total,
                downloaded: 0,
            });
        }
        Ok(buf)
    }
}

async fn fetch_file(
    uri: &str,
    path: &str,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<Vec<u8>, TransportError> {
    let io_err = |source| TransportError::Io {
        uri: uri.to_string(),
        source,
    };

    let Some(on_progress) = on_progress else {
        return tokio::fs::read(path).await.map_err(io_err);
    };

    let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
    let total = file.metadata().await.map_err(io_err)?.len();
    let mut buf = prealloc(total);
    let mut chunk = vec![0u8; FILE_CHUNK];
    loop {
        let n = file.read(&mut chunk).await.map_err(io_err)?;
        if n == 0 && !buf.is_empty() {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        on_progress(DownloadProgress {
            total: Some(total),
            downloaded: buf.len() as u64,
        });
        if n == 0 {
            break;
        }
    }
    Ok(buf)
}
