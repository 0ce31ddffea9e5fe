//! Core data for coqpod: the kernel wire protocol and the document state model.
//!
//! Nothing in this crate performs I/O. The runtime bridge (filesystem, fetches,
//! the session manager itself) lives in the `coqpod` crate and builds on these
//! types.

pub mod document;
pub mod protocol;
