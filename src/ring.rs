//! Ownership and plumbing of one io_uring: creation, the three shared
//! memory mappings, operation restrictions, registered files and buffers,
//! and the head/tail cursor discipline shared with the kernel.

use std::mem::size_of;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use libc;
use nix;
use nix::errno::Errno;

use error::{Error, Result};
use sys;
use sys::{io_uring_cqe, io_uring_params, io_uring_restriction, io_uring_sqe};
use sys::{EnterFlags, Features, SetupFlags, SqeFlags};

/// An enabled-on-demand io_uring restricted to linked openat and
/// fixed-buffer reads.
///
/// The submission tail and completion head/tail live in memory shared with
/// the kernel; all accesses go through atomics with release stores on the
/// producer side and acquire loads on the consumer side.
pub struct Ring {
    ring_fd: RawFd,
    sq_ptr: *mut libc::c_void,
    sq_len: usize,
    cq_ptr: *mut libc::c_void,
    cq_len: usize,
    sqes: *mut io_uring_sqe,
    sqes_len: usize,
    sring_array: *mut u32,
    sring_tail: *const AtomicU32,
    sring_mask: u32,
    cqes: *const io_uring_cqe,
    cring_head: *const AtomicU32,
    cring_tail: *const AtomicU32,
    cring_mask: u32,
    /// Submission entries staged since io_uring_enter() was last called,
    /// passed to io_uring_enter() and decremented by what it consumed.
    to_submit: u32,
}

fn map(ring_fd: RawFd, what: &'static str, bytes: usize, offset: i64) -> Result<*mut libc::c_void> {
    // NOTE(unsafe) mapping a fresh range chosen by the kernel
    let mapped = unsafe {
        libc::mmap(
            ptr::null_mut(),
            bytes,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_POPULATE,
            ring_fd,
            offset as libc::off_t,
        )
    };
    if mapped == libc::MAP_FAILED {
        return Err(Error::Map {
            what,
            bytes,
            inner: nix::Error::Sys(Errno::last()),
        });
    }
    Ok(mapped)
}

impl Ring {
    /// Create a disabled ring with `entries` submission and completion
    /// slots and map its shared memory.
    ///
    /// Returns `Ok(None)` when the kernel has no io_uring support at all,
    /// so the caller can fall back to blocking reads.
    pub fn create(entries: u32) -> Result<Option<Ring>> {
        let mut flags =
            SetupFlags::CQSIZE | SetupFlags::R_DISABLED | SetupFlags::SUBMIT_ALL
                | SetupFlags::COOP_TASKRUN;
        loop {
            let mut params = io_uring_params::default();
            params.cq_entries = entries;
            params.flags = flags.bits();
            // NOTE(unsafe) the kernel fills params in; a plain syscall otherwise
            let ring_fd = unsafe { sys::io_uring_setup(entries, &mut params) };
            if ring_fd >= 0 {
                info!(
                    "Got uring with {} sqes and {} cqes (wanted {}).",
                    params.sq_entries, params.cq_entries, entries
                );
                return Ring::from_parts(ring_fd, &params).map(Some);
            }
            match Errno::last() {
                // ENOSYS means no io_uring in the kernel; EPERM is how
                // sandboxes and the io_uring_disabled sysctl say no
                Errno::ENOSYS | Errno::EPERM => return Ok(None),
                // kernels before 5.18/5.19 reject the optional flags
                Errno::EINVAL if flags.intersects(SetupFlags::SUBMIT_ALL | SetupFlags::COOP_TASKRUN) => {
                    flags.remove(SetupFlags::SUBMIT_ALL | SetupFlags::COOP_TASKRUN);
                }
                errno => {
                    return Err(Error::RingCreate {
                        inner: nix::Error::Sys(errno),
                    })
                }
            }
        }
    }

    fn from_parts(ring_fd: RawFd, params: &io_uring_params) -> Result<Ring> {
        let mut sring_sz =
            params.sq_off.array as usize + params.sq_entries as usize * size_of::<u32>();
        let mut cring_sz =
            params.cq_off.cqes as usize + params.cq_entries as usize * size_of::<io_uring_cqe>();

        // With the single-mmap feature one mapping covers both rings;
        // without it (kernels < 5.4) the completion ring is mapped apart.
        let features = Features::from_bits_truncate(params.features);
        if features.contains(Features::SINGLE_MMAP) {
            if cring_sz > sring_sz {
                sring_sz = cring_sz;
            }
            cring_sz = sring_sz;
        }

        let sq_ptr = map(ring_fd, "the submission queue", sring_sz, sys::IORING_OFF_SQ_RING)?;
        let cq_ptr = if features.contains(Features::SINGLE_MMAP) {
            sq_ptr
        } else {
            map(ring_fd, "the completion queue", cring_sz, sys::IORING_OFF_CQ_RING)?
        };

        let sqes_len = params.sq_entries as usize * size_of::<io_uring_sqe>();
        let sqes = map(ring_fd, "the submission entries", sqes_len, sys::IORING_OFF_SQES)?;

        // NOTE(unsafe) the offsets come from the kernel for these mappings
        unsafe {
            let sq_base = sq_ptr as *mut u8;
            let cq_base = cq_ptr as *mut u8;
            Ok(Ring {
                ring_fd,
                sq_ptr,
                sq_len: sring_sz,
                cq_ptr,
                cq_len: cring_sz,
                sqes: sqes as *mut io_uring_sqe,
                sqes_len,
                sring_array: sq_base.add(params.sq_off.array as usize) as *mut u32,
                sring_tail: sq_base.add(params.sq_off.tail as usize) as *const AtomicU32,
                sring_mask: *(sq_base.add(params.sq_off.ring_mask as usize) as *const u32),
                cqes: cq_base.add(params.cq_off.cqes as usize) as *const io_uring_cqe,
                cring_head: cq_base.add(params.cq_off.head as usize) as *const AtomicU32,
                cring_tail: cq_base.add(params.cq_off.tail as usize) as *const AtomicU32,
                cring_mask: *(cq_base.add(params.cq_off.ring_mask as usize) as *const u32),
                to_submit: 0,
            })
        }
    }

    /// Limit the ring to the operations and sqe flags this program uses.
    /// Must happen while the ring is still disabled.
    pub fn restrict_operations(&self) -> Result<()> {
        let allowed_flags = SqeFlags::IO_LINK | SqeFlags::CQE_SKIP_SUCCESS | SqeFlags::FIXED_FILE;
        let restrictions = [
            io_uring_restriction {
                opcode: sys::IORING_RESTRICTION_SQE_FLAGS_ALLOWED,
                op: allowed_flags.bits(),
                ..Default::default()
            },
            io_uring_restriction {
                opcode: sys::IORING_RESTRICTION_SQE_OP,
                op: sys::IORING_OP_OPENAT,
                ..Default::default()
            },
            io_uring_restriction {
                opcode: sys::IORING_RESTRICTION_SQE_OP,
                op: sys::IORING_OP_READ_FIXED,
                ..Default::default()
            },
        ];
        self.register(
            "restrict IO operations",
            sys::IORING_REGISTER_RESTRICTIONS,
            restrictions.as_ptr() as *const libc::c_void,
            restrictions.len() as libc::c_uint,
        )
    }

    /// Register `count` sparse file descriptor slots, so opens can target a
    /// slot before they complete.
    pub fn register_fd_slots(&self, count: usize) -> Result<()> {
        let sparse = vec![-1 as libc::c_int; count];
        self.register(
            "register fd slots",
            sys::IORING_REGISTER_FILES,
            sparse.as_ptr() as *const libc::c_void,
            count as libc::c_uint,
        )
    }

    /// Register the single buffer region every fixed read targets.
    pub fn register_buffer(&self, base: *mut u8, bytes: usize) -> Result<()> {
        let region = libc::iovec {
            iov_base: base as *mut libc::c_void,
            iov_len: bytes,
        };
        self.register(
            "register the read buffer",
            sys::IORING_REGISTER_BUFFERS,
            &region as *const libc::iovec as *const libc::c_void,
            1,
        )
    }

    /// Let submissions through. The restrictions are locked in from here on.
    pub fn enable(&self) -> Result<()> {
        self.register("enable the ring", sys::IORING_REGISTER_ENABLE_RINGS, ptr::null(), 0)
    }

    fn register(
        &self,
        what: &'static str,
        opcode: libc::c_uint,
        arg: *const libc::c_void,
        nr_args: libc::c_uint,
    ) -> Result<()> {
        // NOTE(unsafe) arg lifetime covers the call; the kernel copies it
        let ret = unsafe { sys::io_uring_register(self.ring_fd, opcode, arg, nr_args) };
        if ret < 0 {
            return Err(Error::RingRegister {
                what,
                inner: nix::Error::Sys(Errno::last()),
            });
        }
        Ok(())
    }

    /// The current submission tail, for staging a batch locally before one
    /// release-store publishes all of it.
    pub fn tail(&self) -> u32 {
        // NOTE(unsafe) this side is the only producer
        unsafe { (*self.sring_tail).load(Ordering::Relaxed) }
    }

    /// Write one entry at the local tail without publishing it yet.
    pub fn stage(&mut self, sqe: &io_uring_sqe, local_tail: &mut u32) {
        let index = *local_tail & self.sring_mask;
        // NOTE(unsafe) index is masked into the mapped arrays
        unsafe {
            ptr::write(self.sqes.add(index as usize), *sqe);
            ptr::write(self.sring_array.add(index as usize), index);
        }
        *local_tail = local_tail.wrapping_add(1);
        self.to_submit += 1;
    }

    /// Publish every entry staged so far to the kernel.
    pub fn commit(&self, local_tail: u32) {
        // NOTE(unsafe) release pairs with the kernel's acquire of the tail
        unsafe { (*self.sring_tail).store(local_tail, Ordering::Release) };
    }

    /// Hand staged submissions to the kernel, waiting until at least
    /// `min_complete` completions are available when it is non-zero.
    pub fn enter(&mut self, min_complete: u32) -> Result<()> {
        let flags = if min_complete > 0 {
            EnterFlags::GETEVENTS
        } else {
            if self.to_submit == 0 {
                return Ok(());
            }
            EnterFlags::empty()
        };
        loop {
            // NOTE(unsafe) plain syscall; the rings it walks are mapped above
            let consumed = unsafe {
                sys::io_uring_enter(self.ring_fd, self.to_submit, min_complete, flags.bits())
            };
            if consumed < 0 {
                match Errno::last() {
                    Errno::EINTR => continue,
                    errno => {
                        return Err(Error::RingEnter {
                            inner: nix::Error::Sys(errno),
                        })
                    }
                }
            }
            if (consumed as u32) < self.to_submit {
                debug!(
                    "io_uring_enter() took {} of {} submissions",
                    consumed, self.to_submit
                );
            }
            self.to_submit -= consumed as u32;
            if self.to_submit == 0 {
                return Ok(());
            }
        }
    }

    /// Take the next completion off the ring, if one is ready.
    pub fn next_completion(&self) -> Option<io_uring_cqe> {
        // NOTE(unsafe) acquire on the tail pairs with the kernel's release;
        // head is only advanced past entries that have been copied out
        unsafe {
            let head = (*self.cring_head).load(Ordering::Acquire);
            let tail = (*self.cring_tail).load(Ordering::Acquire);
            if head == tail {
                return None;
            }
            let cqe = ptr::read(self.cqes.add((head & self.cring_mask) as usize));
            (*self.cring_head).store(head.wrapping_add(1), Ordering::Release);
            Some(cqe)
        }
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        // NOTE(unsafe) unmapping exactly what was mapped in from_parts
        unsafe {
            libc::munmap(self.sqes as *mut libc::c_void, self.sqes_len);
            libc::munmap(self.sq_ptr, self.sq_len);
            if self.cq_ptr != self.sq_ptr {
                libc::munmap(self.cq_ptr, self.cq_len);
            }
        }
        if let Err(error) = nix::unistd::close(self.ring_fd) {
            warn!("Error closing the uring: {}", error);
        }
    }
}
