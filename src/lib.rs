//! Merge already-sorted text files into one stream, like a `sort` of the
//! files that never reorders lines within a file and never holds a file in
//! memory. Each run of consecutive output lines from the same file is
//! prefixed by a `>>> path` header line.
//!
//! Memory use is linear in the number of files, not their sizes: every file
//! gets a fixed read buffer, and candidate lines are compared in place
//! through borrowed views. On Linux the files are read through an io_uring
//! with registered fds and buffers, so the kernel fills one half of a
//! file's double buffer while the merge still reads from the other; on
//! other platforms (or kernels without io_uring) the same merge runs on
//! plain blocking reads.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate enum_primitive;
#[macro_use]
extern crate failure;
extern crate libc;
#[macro_use]
extern crate log;
extern crate nix;

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;
#[cfg(test)]
extern crate rand;

pub mod error;
pub mod heap;
mod lines;
mod merge;
mod reader;
#[cfg(target_os = "linux")]
mod ring;
pub mod source;
#[cfg(target_os = "linux")]
mod sys;

use std::os::unix::io::RawFd;

pub use error::{Error, Result};
pub use merge::merge;

/// Which reading backend to use.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    /// io_uring where the kernel supports it, blocking reads otherwise.
    Auto,
    /// Blocking reads unconditionally.
    Blocking,
}

/// Knobs for one merge run.
#[derive(Clone, Copy, Debug)]
pub struct MergeConfig {
    /// How many bytes each read asks for. Per file, twice this much buffer
    /// memory is held.
    pub buffer_size: usize,
    pub backend: Backend,
    /// Where the merged stream goes.
    pub output: RawFd,
}

impl Default for MergeConfig {
    fn default() -> MergeConfig {
        MergeConfig {
            buffer_size: 64 * 1024,
            backend: Backend::Auto,
            output: libc::STDOUT_FILENO,
        }
    }
}
