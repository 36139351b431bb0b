use std::result;

use nix;

pub type Result<T> = result::Result<T, Error>;

/// Everything that can stop a merge.
///
/// The errno is carried so messages render the OS text, and each variant
/// maps to a sysexits(3)-style process exit code for the binary.
#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "Failed to open {}: {}", path, inner)]
    Open { path: String, inner: nix::Error },

    #[fail(display = "Failed to read from {}: {}", path, inner)]
    Read { path: String, inner: nix::Error },

    #[fail(display = "Failed to write to the output: {}", inner)]
    Write { inner: nix::Error },

    /// An mmap() failed; covers the ring mappings and the registered
    /// read-buffer region.
    #[fail(display = "Failed to mmap {} of {} bytes: {}", what, bytes, inner)]
    Map {
        what: &'static str,
        bytes: usize,
        inner: nix::Error,
    },

    #[fail(display = "Failed to create an io_uring: {}", inner)]
    RingCreate { inner: nix::Error },

    /// An io_uring_register() step failed: restrictions, fd table, buffer
    /// or enabling the ring.
    #[fail(display = "Failed to {}: {}", what, inner)]
    RingRegister {
        what: &'static str,
        inner: nix::Error,
    },

    #[fail(display = "io_uring_enter() failed: {}", inner)]
    RingEnter { inner: nix::Error },

    /// The kernel handed back a completion whose user_data does not decode
    /// to any operation this program submits.
    #[fail(display = "Unknown completion tag {:#018x}", user_data)]
    UnknownCompletion { user_data: u64 },

    /// A completed read was bigger than the space the source buffer had
    /// left for it, which the buffer sizing is supposed to rule out.
    #[fail(
        display = "A completed read of {} bytes does not fit in the {} free buffer bytes",
        bytes, space
    )]
    ReadOverflow { bytes: usize, space: usize },

    /// More candidates than sources, which the per-source push discipline
    /// is supposed to rule out.
    #[fail(display = "The sorter is already full ({} entries)", capacity)]
    SorterFull { capacity: usize },
}

impl Error {
    /// The code the process should exit with, in the sysexits(3) tradition:
    /// unopenable input 2, I/O failure 74, memory exhaustion 69, failures
    /// setting up the ring 71, and broken internal invariants 70.
    pub fn exit_code(&self) -> i32 {
        match *self {
            Error::Open { .. } => 2,
            Error::Read { .. } | Error::Write { .. } => 74,
            Error::Map { .. } => 69,
            Error::RingCreate { .. } => 71,
            Error::RingRegister { .. }
            | Error::RingEnter { .. }
            | Error::UnknownCompletion { .. }
            | Error::ReadOverflow { .. }
            | Error::SorterFull { .. } => 70,
        }
    }
}

#[cfg(test)]
mod tests {
    use nix;
    use nix::errno::Errno;

    use super::Error;

    #[test]
    fn exit_codes_follow_sysexits() {
        let open = Error::Open {
            path: "missing".to_string(),
            inner: nix::Error::Sys(Errno::ENOENT),
        };
        assert_eq!(open.exit_code(), 2);
        assert_eq!(
            Error::Read {
                path: "input".to_string(),
                inner: nix::Error::Sys(Errno::EIO),
            }.exit_code(),
            74
        );
        assert_eq!(Error::SorterFull { capacity: 3 }.exit_code(), 70);
    }

    #[test]
    fn messages_name_the_file() {
        let error = Error::Open {
            path: "access.log".to_string(),
            inner: nix::Error::Sys(Errno::EACCES),
        };
        let message = format!("{}", error);
        assert!(message.contains("access.log"), "{}", message);
    }
}
