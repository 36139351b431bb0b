//! The two reading backends behind one surface: `fill(file, dest)` returns
//! how many bytes were placed at the start of `dest`, with 0 meaning the
//! file has been read to the end.

mod blocking;
#[cfg(target_os = "linux")]
mod uring;

pub use self::blocking::BlockingReader;
#[cfg(target_os = "linux")]
pub use self::uring::UringReader;

use super::{Backend, MergeConfig};
use error::Result;

pub enum Reader {
    #[cfg(target_os = "linux")]
    Ring(UringReader),
    Blocking(BlockingReader),
}

#[cfg(target_os = "linux")]
fn ring_reader(paths: &[String], buffer_size: usize) -> Result<Option<Reader>> {
    match UringReader::open(paths, buffer_size)? {
        Some(reader) => Ok(Some(Reader::Ring(reader))),
        None => {
            info!("io_uring is not available, falling back to blocking IO.");
            Ok(None)
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn ring_reader(_paths: &[String], _buffer_size: usize) -> Result<Option<Reader>> {
    Ok(None)
}

impl Reader {
    /// Open all the files with the configured backend. `Backend::Auto`
    /// means io_uring where the kernel has it, blocking reads otherwise.
    pub fn open(paths: &[String], config: &MergeConfig) -> Result<Reader> {
        match config.backend {
            Backend::Auto => {
                if let Some(reader) = ring_reader(paths, config.buffer_size)? {
                    return Ok(reader);
                }
                Ok(Reader::Blocking(BlockingReader::open(paths)?))
            }
            Backend::Blocking => Ok(Reader::Blocking(BlockingReader::open(paths)?)),
        }
    }

    pub fn fill(&mut self, file: usize, dest: &mut [u8]) -> Result<usize> {
        match *self {
            #[cfg(target_os = "linux")]
            Reader::Ring(ref mut reader) => reader.fill(file, dest),
            Reader::Blocking(ref mut reader) => reader.fill(file, dest),
        }
    }
}
