//! POSIX errno values
//!
//! Standard error codes returned by the operations in this crate, matching
//! the codes the teaching OS's syscall surface collapses every failure to
//! (spec.md §7 — there is no error-object channel to user space).

/// Bad file descriptor
pub const EBADF: i32 = 9;

/// Resource temporarily unavailable (would block)
#[allow(dead_code)]
pub const EAGAIN: i32 = 11;

/// Cannot allocate memory
pub const ENOMEM: i32 = 12;

/// Bad address (null pointer / null buffer)
pub const EFAULT: i32 = 14;

/// Broken pipe: reader end has closed
pub const EPIPE: i32 = 32;

/// Invalid argument
pub const EINVAL: i32 = 22;

/// Not a socket / wrong socket type for this operation
pub const ENOTSOCK: i32 = 88;

/// Address already in use (port occupied by another listener)
pub const EADDRINUSE: i32 = 98;

/// Transport endpoint is not connected (operation needs a peer socket)
pub const ENOTCONN: i32 = 107;

/// Connection timed out (connect() deadline expired)
pub const ETIMEDOUT: i32 = 110;

/// Too many open "files" (descriptor exhaustion)
pub const EMFILE: i32 = 24;
