//! The io_uring system interface: setup parameters, submission and
//! completion entry layouts, register opcodes and the syscall wrappers glibc
//! does not provide.
//!
//! Only the slice of the interface this program submits is defined here:
//! openat and fixed-buffer reads, restrictions, registered files/buffers,
//! and the ring geometry needed to mmap and drive the queues.

#![allow(non_camel_case_types)]

use libc::{
    c_int, c_uint, c_void, syscall, SYS_io_uring_enter, SYS_io_uring_register, SYS_io_uring_setup,
};

pub const IORING_OFF_SQ_RING: i64 = 0;
pub const IORING_OFF_CQ_RING: i64 = 0x8000000;
pub const IORING_OFF_SQES: i64 = 0x10000000;

pub const IORING_OP_READ_FIXED: u8 = 4;
pub const IORING_OP_OPENAT: u8 = 18;

pub const IORING_REGISTER_BUFFERS: c_uint = 0;
pub const IORING_REGISTER_FILES: c_uint = 2;
pub const IORING_REGISTER_RESTRICTIONS: c_uint = 11;
pub const IORING_REGISTER_ENABLE_RINGS: c_uint = 12;

/// Restrict which submission opcodes the ring accepts.
pub const IORING_RESTRICTION_SQE_OP: u16 = 1;
/// Restrict which sqe flag bits the ring accepts.
pub const IORING_RESTRICTION_SQE_FLAGS_ALLOWED: u16 = 2;

bitflags! {
    /// io_uring_setup() flags.
    pub struct SetupFlags: u32 {
        /// Size the completion queue from cq_entries instead of doubling
        /// the submission queue size.
        const CQSIZE = 1 << 3;
        /// Create the ring disabled so restrictions can be registered
        /// before any submission is possible.
        const R_DISABLED = 1 << 6;
        /// Don't stop submitting a batch when one entry fails. (5.18)
        const SUBMIT_ALL = 1 << 7;
        /// Don't interrupt the task for completions it will poll anyway. (5.19)
        const COOP_TASKRUN = 1 << 8;
    }
}

bitflags! {
    /// Per-submission-entry flags.
    pub struct SqeFlags: u8 {
        /// The fd field is an index into the registered file table.
        const FIXED_FILE = 1 << 0;
        /// Chain the next entry after this one; a failure cancels the rest
        /// of the chain.
        const IO_LINK = 1 << 2;
        /// Don't post a completion event when this entry succeeds. (5.17;
        /// older kernels may still post one, which must be tolerated.)
        const CQE_SKIP_SUCCESS = 1 << 6;
    }
}

bitflags! {
    /// io_uring_enter() flags.
    pub struct EnterFlags: u32 {
        /// Wait until at least min_complete completions are available.
        const GETEVENTS = 1 << 0;
    }
}

bitflags! {
    /// Feature bits reported back from io_uring_setup().
    pub struct Features: u32 {
        /// One mmap() covers both the submission and the completion ring.
        const SINGLE_MMAP = 1 << 0;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct io_sqring_offsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub flags: u32,
    pub dropped: u32,
    pub array: u32,
    pub resv1: u32,
    pub user_addr: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct io_cqring_offsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub overflow: u32,
    pub cqes: u32,
    pub flags: u32,
    pub resv1: u32,
    pub user_addr: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct io_uring_params {
    pub sq_entries: u32,
    pub cq_entries: u32,
    pub flags: u32,
    pub sq_thread_cpu: u32,
    pub sq_thread_idle: u32,
    pub features: u32,
    pub wq_fd: u32,
    pub resv: [u32; 3],
    pub sq_off: io_sqring_offsets,
    pub cq_off: io_cqring_offsets,
}

/// A submission queue entry.
///
/// The kernel header expresses several of these fields as unions; the
/// members this program uses never overlap, so each union is flattened to
/// the one member read for our opcodes: `off` is the read offset, `addr`
/// the buffer or pathname pointer, `op_flags` the open flags, and
/// `file_index` the 1-based registered-fd slot an openat installs into.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct io_uring_sqe {
    pub opcode: u8,
    pub flags: u8,
    pub ioprio: u16,
    pub fd: i32,
    pub off: u64,
    pub addr: u64,
    pub len: u32,
    pub op_flags: u32,
    pub user_data: u64,
    pub buf_index: u16,
    pub personality: u16,
    pub file_index: u32,
    pub addr3: u64,
    pub __pad2: [u64; 1],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct io_uring_cqe {
    pub user_data: u64,
    pub res: i32,
    pub flags: u32,
}

/// One entry of an IORING_REGISTER_RESTRICTIONS array. The kernel unions
/// the register-op/sqe-op/sqe-flags byte; `op` stands in for all three.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct io_uring_restriction {
    pub opcode: u16,
    pub op: u8,
    pub resv: u8,
    pub resv2: [u32; 3],
}

pub unsafe fn io_uring_setup(entries: u32, params: *mut io_uring_params) -> c_int {
    syscall(SYS_io_uring_setup, entries, params) as c_int
}

pub unsafe fn io_uring_register(
    ring_fd: c_int,
    opcode: c_uint,
    arg: *const c_void,
    nr_args: c_uint,
) -> c_int {
    syscall(SYS_io_uring_register, ring_fd, opcode, arg, nr_args) as c_int
}

pub unsafe fn io_uring_enter(
    ring_fd: c_int,
    to_submit: c_uint,
    min_complete: c_uint,
    flags: c_uint,
) -> c_int {
    let sig: *const c_void = ::std::ptr::null();
    syscall(
        SYS_io_uring_enter,
        ring_fd,
        to_submit,
        min_complete,
        flags,
        sig,
        0 as usize,
    ) as c_int
}

#[cfg(test)]
mod tests {
    use std::mem::size_of;

    use super::*;

    // the kernel rejects or misreads wrongly sized structs, so pin the ABI
    #[test]
    fn struct_sizes_match_the_kernel_abi() {
        assert_eq!(size_of::<io_uring_sqe>(), 64);
        assert_eq!(size_of::<io_uring_cqe>(), 16);
        assert_eq!(size_of::<io_uring_params>(), 120);
        assert_eq!(size_of::<io_uring_restriction>(), 16);
    }
}
