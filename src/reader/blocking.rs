//! The synchronous fallback reader: plain open(2)/read(2)/close(2), used
//! where io_uring is unavailable. The merge sees the exact same `fill`
//! surface and produces the exact same output.

use std::os::unix::io::RawFd;

use nix;
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;

use error::{Error, Result};

pub struct BlockingReader {
    /// The fd is gone once its file has been read to the end.
    files: Vec<(String, Option<RawFd>)>,
}

fn close_file(path: &str, fd: RawFd) {
    if let Err(error) = unistd::close(fd) {
        warn!("Error closing {}: {}", path, error);
        // but don't stop
    }
}

impl BlockingReader {
    /// Open every file up front, like the ring reader's submitted opens.
    pub fn open(paths: &[String]) -> Result<BlockingReader> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            match open(path.as_str(), OFlag::O_RDONLY, Mode::empty()) {
                Ok(fd) => files.push((path.clone(), Some(fd))),
                Err(inner) => {
                    // the already opened files are closed by drop
                    return Err(Error::Open {
                        path: path.clone(),
                        inner,
                    });
                }
            }
        }
        Ok(BlockingReader { files })
    }

    pub fn fill(&mut self, file: usize, dest: &mut [u8]) -> Result<usize> {
        let (ref path, ref mut fd_slot) = self.files[file];
        let fd = match *fd_slot {
            Some(fd) => fd,
            None => return Ok(0),
        };
        loop {
            match unistd::read(fd, dest) {
                Ok(0) => {
                    close_file(path, fd);
                    *fd_slot = None;
                    return Ok(0);
                }
                Ok(bytes) => return Ok(bytes),
                Err(nix::Error::Sys(Errno::EINTR)) => continue,
                Err(inner) => {
                    return Err(Error::Read {
                        path: path.clone(),
                        inner,
                    })
                }
            }
        }
    }
}

impl Drop for BlockingReader {
    fn drop(&mut self) {
        for &mut (ref path, ref mut fd_slot) in &mut self.files {
            if let Some(fd) = fd_slot.take() {
                close_file(path, fd);
            }
        }
    }
}
