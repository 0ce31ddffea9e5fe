//! Session manager: owns one kernel, its sandbox and its interrupt channel.
//!
//! Administrative messages (`LoadPkg`, `Put`, `Get`, `InterruptSetup`) are
//! handled here. Every other message is encoded and handed to the kernel
//! inside a single critical section, so the kernel never sees a second command
//! while one is running and commands are served in submission order. Each
//! answer is decoded and republished as a "message" event in the order the
//! kernel produced it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use coqpod_core::document::DocumentTree;
use coqpod_core::protocol::{
    Answer, CodecError, Command, HostMessage, InterruptConfig, Notice, StateId,
};
use futures::future::join_all;
use thiserror::Error;

use crate::config::PodConfig;
use crate::events::{EventBus, PodEvent, PodEvents};
use crate::installer::{InstallError, Installer};
use crate::interrupt::InterruptChannel;
use crate::kernel::{BootContext, Kernel, KernelError};
use crate::transport::{DownloadProgress, Fetcher, TransportError};
use crate::vfs::{Vfs, VfsError};

#[derive(Debug, Error)]
pub enum PodError {
    #[error("invalid command: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("kernel is not booted")]
    NotBooted,

    #[error("boot sequence did not establish a root state")]
    NoRoot,

    #[error("kernel task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct Pod {
    config: PodConfig,
    kernel: Arc<tokio::sync::Mutex<Box<dyn Kernel>>>,
    booted: AtomicBool,
    vfs: Vfs,
    events: EventBus,
    installer: Installer,
    interrupt: InterruptChannel,
    document: Arc<Mutex<DocumentTree>>,
}

impl Pod {
    /// Create a session around `kernel`. Nothing is started until [`Pod::boot`].
    pub fn new(config: PodConfig, kernel: Box<dyn Kernel>) -> Result<Self, PodError> {
        let vfs = Vfs::open(&config.vfs_root)?.with_lib_root(&config.lib_root);
        let events = EventBus::new();
        let installer = Installer::new(
            Fetcher::new(),
            vfs.clone(),
            events.clone(),
            config.binary_root.clone(),
        );
        Ok(Self {
            config,
            kernel: Arc::new(tokio::sync::Mutex::new(kernel)),
            booted: AtomicBool::new(false),
            vfs,
            events,
            installer,
            interrupt: InterruptChannel::new(),
            document: Arc::new(Mutex::new(DocumentTree::new())),
        })
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// Handle to the interrupt flag; may be set from any thread at any time.
    pub fn interrupt(&self) -> InterruptChannel {
        self.interrupt.clone()
    }

    pub fn subscribe(&self) -> PodEvents {
        self.events.subscribe()
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::SeqCst)
    }

    /// Host-side view of the live states, kept in step with the answers seen.
    pub fn document(&self) -> DocumentTree {
        self.document.lock().expect("document lock poisoned").clone()
    }

    /// Install the kernel image and its stubs, start the kernel and establish
    /// the root state. Packages listed in `init_pkgs` are installed afterwards.
    pub async fn boot(&self) -> Result<StateId, PodError> {
        let image = self.install_binary(&self.config.kernel_image, self.config.image_path.clone());
        let stubs = self
            .config
            .stubs
            .iter()
            .map(|stub| self.install_binary(stub, self.config.stub_path(stub)));
        let (image, stubs) = futures::join!(image, join_all(stubs));
        let image = image?;
        let stubs = stubs.into_iter().collect::<Result<Vec<_>, _>>()?;

        if let Some(marker) = &self.config.interrupt_marker {
            self.interrupt.attach_marker(&self.vfs, marker)?;
        }

        let ctx = BootContext {
            vfs: self.vfs.clone(),
            image,
            stubs,
            interrupt: self.interrupt.clone(),
        };
        let mut kernel = self.kernel.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || kernel.boot(&ctx)).await??;
        self.booted.store(true, Ordering::SeqCst);
        tracing::info!("Kernel booted from {}", self.config.kernel_image);

        let root = self
            .command(Command::Init)
            .await?
            .into_iter()
            .find_map(|answer| match answer {
                Answer::Ready(id) => Some(id),
                _ => None,
            })
            .ok_or(PodError::NoRoot)?;

        if !self.config.init_pkgs.is_empty() {
            let pkgs = self.config.init_pkgs.clone();
            self.install_packages(&pkgs, true).await?;
        }
        Ok(root)
    }

    async fn install_binary(&self, name: &str, vpath: String) -> Result<String, PodError> {
        let uri = self.config.locate(name);
        let events = self.events.clone();
        let progress_uri = uri.clone();
        let mut report = move |download: DownloadProgress| {
            events.publish(PodEvent::Progress {
                uri: progress_uri.clone(),
                download,
            })
        };
        let bytes = self
            .installer
            .fetcher()
            .fetch(&uri, Some(&mut report))
            .await?;
        Ok(self.vfs.put(&vpath, &bytes)?)
    }

    /// Process one host message.
    pub async fn send(&self, message: HostMessage) -> Result<(), PodError> {
        match message {
            HostMessage::LoadPkg(uris) => self.install_packages(&uris, true).await.map(|_| ()),
            HostMessage::Put(path, content) => {
                self.vfs.put(&path, content.as_bytes())?;
                Ok(())
            }
            HostMessage::Get(path) => {
                let content = self.vfs.get(&path)?;
                self.events
                    .publish(PodEvent::Message(Notice::Got(path, content).into()));
                Ok(())
            }
            HostMessage::InterruptSetup(config) => self.setup_interrupt(&config),
            HostMessage::Kernel(command) => self.command(command).await.map(|_| ()),
        }
    }

    fn setup_interrupt(&self, config: &InterruptConfig) -> Result<(), PodError> {
        if let Some(marker) = &config.marker {
            self.interrupt.attach_marker(&self.vfs, marker)?;
            tracing::debug!("Interrupt marker attached at {}", marker);
        }
        Ok(())
    }

    /// Run one kernel command and return its answers in production order.
    ///
    /// Malformed commands are rejected before reaching the kernel.
    pub async fn command(&self, command: Command) -> Result<Vec<Answer>, PodError> {
        command.validate()?;
        if !self.is_booted() {
            return Err(PodError::NotBooted);
        }
        let line = command.encode();

        let mut kernel = self.kernel.clone().lock_owned().await;
        tracing::debug!("Dispatching {}", command.tag());

        let events = self.events.clone();
        let document = self.document.clone();
        let interrupt = self.interrupt.clone();
        tokio::task::spawn_blocking(move || {
            let mut answers = Vec::new();
            let mut emit = |raw: String| {
                let answer = Answer::decode_or_exn(&raw);
                if let Answer::JsonExn(raw) = &answer {
                    tracing::warn!("Undecodable kernel output: {}", raw);
                }
                track(&document, &command, &answer);
                events.publish(PodEvent::Message(answer.clone().into()));
                answers.push(answer);
            };
            let result = kernel.post(&line, &interrupt, &mut emit);
            // A stale interrupt must not leak into the next command.
            interrupt.clear();
            result.map(|()| answers)
        })
        .await?
        .map_err(PodError::from)
    }

    /// Install every package concurrently. Once all have settled, refresh the
    /// kernel's load path (when `refresh` is set and the kernel is running)
    /// and publish `LoadedPkg` with the packages that succeeded. `LoadedPkg` is
    /// published even when the refresh fails. The first install failure, or
    /// else the refresh failure, is returned after that.
    pub async fn install_packages(
        &self,
        uris: &[String],
        refresh: bool,
    ) -> Result<Vec<String>, PodError> {
        let results = self
            .installer
            .install_all(uris, &self.config.pkg_dir)
            .await;

        let mut loaded = Vec::new();
        let mut first_failure = None;
        for (uri, result) in results {
            match result {
                Ok(_) => loaded.push(uri),
                Err(e) => {
                    first_failure.get_or_insert(e);
                }
            }
        }

        let mut refreshed = Ok(());
        if refresh {
            if self.is_booted() {
                refreshed = self.command(Command::RefreshLoadPath).await.map(|_| ());
                if let Err(e) = &refreshed {
                    tracing::error!("Load path refresh failed: {}", e);
                }
            } else {
                tracing::debug!("Kernel not booted, skipping load path refresh");
            }
        }

        self.events
            .publish(PodEvent::Message(Notice::LoadedPkg(loaded.clone()).into()));

        match first_failure {
            Some(e) => Err(e.into()),
            None => refreshed.map(|()| loaded),
        }
    }

    /// End the session: every subscription stream ends once drained.
    pub fn shutdown(&self) {
        self.events.close();
    }
}

impl Drop for Pod {
    fn drop(&mut self) {
        self.events.close();
    }
}

/// Keep the host-side document view in step with one answer.
fn track(document: &Mutex<DocumentTree>, command: &Command, answer: &Answer) {
    let mut doc = document.lock().expect("document lock poisoned");
    let result = match (command, answer) {
        (_, Answer::Ready(id)) => {
            doc.reset(*id);
            Ok(())
        }
        (
            Command::Add {
                edit_at,
                parent,
                text,
                ..
            },
            Answer::Added(id, _),
        ) => doc.insert(*id, *edit_at, *parent, text),
        (Command::Cancel(id), Answer::BackTo(tip)) => doc.cancel(*id).map(|ours| {
            if ours != *tip {
                tracing::warn!("Kernel reports tip {} after cancel, expected {}", tip, ours);
            }
        }),
        (
            _,
            Answer::CoqExn {
                rollback: Some((good, bad)),
                ..
            },
        ) => doc.rollback(*good, *bad),
        _ => Ok(()),
    };
    if let Err(e) = result {
        tracing::warn!("Document view out of sync: {}", e);
    }
}
