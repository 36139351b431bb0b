//! Staging of output byte ranges for gathered writes.

use std::os::unix::io::RawFd;

use nix;
use nix::errno::Errno;
use nix::sys::uio::{writev, IoVec};

use error::{Error, Result};
use heap::Slice;

/// A fixed-capacity list of byte ranges waiting to be written with a single
/// `writev()`, flushed when full or when the merge loop is about to reuse
/// the buffers the ranges point into.
pub struct Lines {
    to_write: Vec<Slice>,
    capacity: usize,
    out: RawFd,
}

impl Lines {
    pub fn new(capacity: usize, out: RawFd) -> Lines {
        Lines {
            to_write: Vec::with_capacity(capacity),
            capacity,
            out,
        }
    }

    pub fn add(&mut self, slice: Slice) -> Result<()> {
        if self.to_write.len() == self.capacity {
            self.flush()?;
        }
        self.to_write.push(slice);
        Ok(())
    }

    /// Write out every staged range, resuming after partial writes.
    pub fn flush(&mut self) -> Result<()> {
        let mut completely_written = 0;
        while completely_written < self.to_write.len() {
            // NOTE(unsafe) staged slices stay alive until this flush; the
            // merge loop flushes before any buffer they point into is reused
            let gather: Vec<IoVec<&[u8]>> = self.to_write[completely_written..]
                .iter()
                .map(|slice| IoVec::from_slice(unsafe { slice.bytes() }))
                .collect();
            let mut written = match writev(self.out, &gather) {
                Ok(written) => written,
                Err(nix::Error::Sys(Errno::EINTR)) => continue,
                Err(inner) => return Err(Error::Write { inner }),
            };
            while completely_written < self.to_write.len()
                && written >= self.to_write[completely_written].len()
            {
                written -= self.to_write[completely_written].len();
                completely_written += 1;
            }
            if written != 0 {
                // a slice was written partially; resume from the rest of it
                let rest = self.to_write[completely_written].skip(written);
                self.to_write[completely_written] = rest;
            }
        }
        self.to_write.clear();
        Ok(())
    }
}
