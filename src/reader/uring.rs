//! Reading many files at once through an io_uring with registered file
//! descriptors and one registered buffer region.
//!
//! Every file gets two half-slots of the region and alternates between
//! them: while the merge works on bytes from one half, the kernel can
//! already be filling the other. A completed read stays "on loan" until the
//! merge consumes it through [`fill`]; only then is the next read for that
//! file submitted, so no slot is ever overwritten while its bytes are still
//! unread and no file ever has more than one read in flight.

use std::ffi::CString;
use std::ptr;

use enum_primitive::FromPrimitive;
use libc;
use nix;
use nix::errno::Errno;

use error::{Error, Result};
use ring::Ring;
use sys;
use sys::{io_uring_sqe, SqeFlags};

enum_from_primitive! {
/// Which operation a completion belongs to; the high half of the user_data
/// tag. Reads alternate between the A and B half-slots.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Op {
    OpenFile = 0,
    ReadToBufferA = 1,
    ReadToBufferB = 2,
}
}

impl Op {
    fn other_buffer(&self) -> Op {
        match *self {
            Op::ReadToBufferA => Op::ReadToBufferB,
            Op::ReadToBufferB => Op::ReadToBufferA,
            Op::OpenFile => unreachable!("opens have no buffer"),
        }
    }
}

/// The 64-bit tag carried on every submission and returned on every
/// completion: file index in the low half, operation in the high half.
#[derive(Clone, Copy, Debug)]
struct Tag {
    file: u32,
    op: Op,
}

impl Tag {
    fn raw(&self) -> u64 {
        u64::from(self.file) | u64::from(self.op as u32) << 32
    }

    fn decode(user_data: u64) -> Result<Tag> {
        match Op::from_u32((user_data >> 32) as u32) {
            Some(op) => Ok(Tag {
                file: user_data as u32,
                op,
            }),
            None => Err(Error::UnknownCompletion { user_data }),
        }
    }
}

/// What the ring is doing for one file right now.
#[derive(Clone, Copy, Debug)]
enum FileState {
    /// A read is in flight; its completion has not been seen yet.
    Reading,
    /// A read into the given half finished and its bytes wait to be
    /// consumed. The slot is on loan: no new read touches it.
    Loaned { op: Op, bytes: usize },
    /// The last read returned zero bytes; the file is finished.
    Drained,
}

/// An anonymous mapping, unmapped when dropped.
struct Region {
    base: *mut u8,
    len: usize,
}

impl Region {
    fn anonymous(len: usize) -> Result<Region> {
        // NOTE(unsafe) fresh mapping, owned by the returned value
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Error::Map {
                what: "the read buffers",
                bytes: len,
                inner: nix::Error::Sys(Errno::last()),
            });
        }
        Ok(Region {
            base: base as *mut u8,
            len,
        })
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // NOTE(unsafe) unmapping exactly what was mapped
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}

pub struct UringReader {
    ring: Ring,
    files: usize,
    per_file_buffer_sz: usize,
    /// One anonymous mapping of 2·files·per_file_buffer_sz bytes,
    /// registered with the ring; file `i` reads into slot `i` (half A) and
    /// slot `i + files` (half B).
    registered_buffer: Region,
    /// The names as given, for headers and messages.
    names: Vec<String>,
    /// NUL-terminated copies the openat submissions point at.
    paths: Vec<CString>,
    /// Read offsets: the uring read operations don't advance any file
    /// position, so the next offset is tracked here per file.
    bytes_read: Vec<u64>,
    state: Vec<FileState>,
    open_files: usize,
}

impl UringReader {
    /// Set the ring up and submit the linked open+read pair for every file.
    ///
    /// Returns `Ok(None)` when the kernel has no io_uring, leaving the
    /// fallback to the caller.
    pub fn open(paths: &[String], per_file_buffer_sz: usize) -> Result<Option<UringReader>> {
        let files = paths.len();
        // need one extra entry to fit 2x the bigger half when odd
        let mut entries = files as u32;
        if entries & 1 != 0 {
            entries += 1;
        }
        let ring = match Ring::create(entries)? {
            Some(ring) => ring,
            None => return Ok(None),
        };

        let registered_buffer = Region::anonymous(2 * files * per_file_buffer_sz)?;

        ring.restrict_operations()?;
        ring.register_fd_slots(files)?;
        ring.register_buffer(registered_buffer.base, registered_buffer.len)?;
        ring.enable()?;

        let mut cpaths = Vec::with_capacity(files);
        for path in paths {
            match CString::new(path.as_str()) {
                Ok(cpath) => cpaths.push(cpath),
                Err(_) => {
                    return Err(Error::Open {
                        path: path.clone(),
                        inner: nix::Error::InvalidPath,
                    })
                }
            }
        }

        let mut reader = UringReader {
            ring,
            files,
            per_file_buffer_sz,
            registered_buffer,
            names: paths.to_vec(),
            paths: cpaths,
            bytes_read: vec![0; files],
            state: vec![FileState::Reading; files],
            open_files: 0,
        };
        reader.open_and_read_all()?;
        Ok(Some(reader))
    }

    fn slot_base(&self, file: usize, op: Op) -> *mut u8 {
        let slot = match op {
            Op::ReadToBufferA => file,
            Op::ReadToBufferB => file + self.files,
            Op::OpenFile => unreachable!("opens have no buffer"),
        };
        // NOTE(unsafe) slot stays inside the registered mapping
        unsafe { self.registered_buffer.base.add(slot * self.per_file_buffer_sz) }
    }

    /// Stage the linked pair for one file: an openat targeting the file's
    /// registered fd slot, then the first fixed read out of that slot.
    ///
    /// Registered file descriptors mean the read does not have to wait for
    /// the open to complete before it can be submitted, and with
    /// CQE_SKIP_SUCCESS a successful open posts no completion at all, so
    /// one completion-queue entry per file is enough.
    fn open_and_read(&mut self, file: usize, local_tail: &mut u32) {
        let mut open = io_uring_sqe::default();
        open.opcode = sys::IORING_OP_OPENAT;
        open.fd = libc::AT_FDCWD;
        open.addr = self.paths[file].as_ptr() as u64;
        open.op_flags = libc::O_RDONLY as u32;
        open.file_index = file as u32 + 1; // slots are 1-based here
        open.flags = (SqeFlags::IO_LINK | SqeFlags::CQE_SKIP_SUCCESS).bits();
        open.user_data = Tag {
            file: file as u32,
            op: Op::OpenFile,
        }.raw();
        self.ring.stage(&open, local_tail);
        self.open_files += 1;

        let mut read = io_uring_sqe::default();
        read.opcode = sys::IORING_OP_READ_FIXED;
        read.fd = file as i32;
        read.flags = SqeFlags::FIXED_FILE.bits();
        read.addr = self.slot_base(file, Op::ReadToBufferA) as u64;
        read.len = self.per_file_buffer_sz as u32;
        read.off = 0;
        read.buf_index = 0;
        read.user_data = Tag {
            file: file as u32,
            op: Op::ReadToBufferA,
        }.raw();
        self.ring.stage(&read, local_tail);
    }

    /// Submit the pairs in two halves so the submission queue (sized like
    /// the completion queue) always has room, then wait for every file's
    /// first completion.
    fn open_and_read_all(&mut self) -> Result<()> {
        let mut tail = self.ring.tail();
        for file in 0..self.files / 2 {
            self.open_and_read(file, &mut tail);
        }
        self.ring.commit(tail);
        self.ring.enter(0)?;

        let mut tail = self.ring.tail();
        for file in self.files / 2..self.files {
            self.open_and_read(file, &mut tail);
        }
        self.ring.commit(tail);
        self.ring.enter(self.files as u32)
    }

    /// Queue the read for the half-slot that just came off loan.
    fn read_other_half(&mut self, file: usize, op: Op) -> Result<()> {
        let mut read = io_uring_sqe::default();
        read.opcode = sys::IORING_OP_READ_FIXED;
        read.fd = file as i32;
        read.flags = SqeFlags::FIXED_FILE.bits();
        read.addr = self.slot_base(file, op) as u64;
        read.len = self.per_file_buffer_sz as u32;
        read.off = self.bytes_read[file];
        read.buf_index = 0;
        read.user_data = Tag {
            file: file as u32,
            op,
        }.raw();
        let mut tail = self.ring.tail();
        self.ring.stage(&read, &mut tail);
        self.ring.commit(tail);
        // submit right away so the kernel reads while the merge goes on
        self.ring.enter(0)
    }

    /// Move every ready completion into the per-file loan table.
    fn drain_completions(&mut self) -> Result<()> {
        while let Some(cqe) = self.ring.next_completion() {
            let tag = Tag::decode(cqe.user_data)?;
            let file = tag.file as usize;
            if file >= self.files {
                return Err(Error::UnknownCompletion {
                    user_data: cqe.user_data,
                });
            }
            match tag.op {
                Op::OpenFile => {
                    if cqe.res < 0 {
                        return Err(Error::Open {
                            path: self.names[file].clone(),
                            inner: nix::Error::Sys(Errno::from_i32(-cqe.res)),
                        });
                    }
                    // success events are skipped on recent kernels; older
                    // ones still post them, so just move on
                }
                op => {
                    if cqe.res == -libc::ECANCELED {
                        // the linked open failed; its own completion
                        // carries the real error
                        warn!("A read for {} was canceled.", self.names[file]);
                    } else if cqe.res < 0 {
                        return Err(Error::Read {
                            path: self.names[file].clone(),
                            inner: nix::Error::Sys(Errno::from_i32(-cqe.res)),
                        });
                    } else if cqe.res == 0 {
                        self.open_files -= 1;
                        debug!(
                            "{} finished after {} bytes ({} files still open)",
                            self.names[file], self.bytes_read[file], self.open_files
                        );
                        self.state[file] = FileState::Drained;
                    } else {
                        self.bytes_read[file] += cqe.res as u64;
                        self.state[file] = FileState::Loaned {
                            op,
                            bytes: cqe.res as usize,
                        };
                    }
                }
            }
        }
        Ok(())
    }

    /// Hand the next completed read for `file` to the caller, copying it
    /// into `dest` and starting the read of the other half-slot. Blocks on
    /// the ring while the file's read is still in flight. Returns 0 at end
    /// of file.
    pub fn fill(&mut self, file: usize, dest: &mut [u8]) -> Result<usize> {
        loop {
            match self.state[file] {
                FileState::Drained => return Ok(0),
                FileState::Loaned { op, bytes } => {
                    if bytes > dest.len() {
                        return Err(Error::ReadOverflow {
                            bytes,
                            space: dest.len(),
                        });
                    }
                    // NOTE(unsafe) the loaned slot holds `bytes` valid bytes
                    // and nothing writes to it while it is on loan
                    unsafe {
                        ptr::copy_nonoverlapping(self.slot_base(file, op), dest.as_mut_ptr(), bytes);
                    }
                    self.state[file] = FileState::Reading;
                    self.read_other_half(file, op.other_buffer())?;
                    return Ok(bytes);
                }
                FileState::Reading => {
                    self.ring.enter(1)?;
                    self.drain_completions()?;
                }
            }
        }
    }
}

