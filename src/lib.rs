//! Host-side bridge to a sandboxed, cooperatively scheduled proof kernel.
//!
//! A [`pod::Pod`] boots the kernel from an image installed into its
//! [`vfs::Vfs`], installs compiled-library packages fetched through
//! [`transport`], forwards commands one at a time and republishes the kernel's
//! answers as events. The wire vocabulary lives in [`coqpod_core::protocol`].

pub mod cli;
pub mod config;
pub mod events;
pub mod installer;
pub mod interrupt;
pub mod kernel;
pub mod pod;
pub mod transport;
pub mod vfs;

pub use coqpod_core::{document, protocol};
