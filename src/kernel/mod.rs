//! The boundary to the proof kernel.
//!
//! A kernel is synchronous and cooperative: [`Kernel::post`] runs one command
//! to completion, emitting encoded answers as it goes, and polls the
//! [`InterruptChannel`] whenever it can stop early.

mod loopback;
mod process;

pub use loopback::LoopbackKernel;
pub use process::ProcessKernel;

use std::io;

use thiserror::Error;

use crate::interrupt::InterruptChannel;
use crate::vfs::{Vfs, VfsError};

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("kernel is not booted")]
    NotBooted,

    #[error("kernel image '{0}' is not installed")]
    MissingImage(String),

    #[error("kernel I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("kernel exited")]
    Exited,

    #[error(transparent)]
    Vfs(#[from] VfsError),
}

/// Everything a kernel needs to start.
#[derive(Debug, Clone)]
pub struct BootContext {
    pub vfs: Vfs,
    /// Virtual path of the installed kernel image.
    pub image: String,
    /// Virtual paths of preloaded native stubs.
    pub stubs: Vec<String>,
    pub interrupt: InterruptChannel,
}

pub trait Kernel: Send {
    /// Start the kernel from its installed image.
    fn boot(&mut self, ctx: &BootContext) -> Result<(), KernelError>;

    /// Run one encoded command to completion, passing each encoded answer to
    /// `emit` in production order.
    fn post(
        &mut self,
        command: &str,
        interrupt: &InterruptChannel,
        emit: &mut dyn FnMut(String),
    ) -> Result<(), KernelError>;
}
