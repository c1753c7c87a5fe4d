//! Tunable constants for the IPC core.
//!
//! Mirrors `kernel_pipe.h`'s `PIPE_BUFFER_SIZE` and `kernel_socket.h`'s port
//! namespace: plain `const`s, no runtime configuration layer. This is a
//! kernel tunable, not application configuration.

/// Capacity of a pipe's ring buffer. One slot is always reserved to tell
/// "full" apart from "empty" using indices alone (spec.md §3).
pub const PIPE_BUFFER_SIZE: usize = 4096;

/// Reserved sentinel meaning "no port" — the value a socket is created with
/// when it will only ever become a peer via `accept()`.
pub const NOPORT: u32 = 0;

/// Highest legal port number. The source's port namespace is a flat array
/// indexed `0..=MAX_PORT`; this implementation keeps the same upper bound.
pub const MAX_PORT: u32 = 1024;

/// Sentinel returned in place of a descriptor on failure.
pub const NOFILE: i32 = -1;

/// Sentinel returned in place of a thread id on failure. `thread::create_thread`
/// reports failure through `Result::Err` rather than this raw value (spec.md
/// §6's "thread id / NOTHREAD" collapses to the idiomatic `Err` arm here);
/// kept as the literal constant spec.md names for callers building their own
/// syscall-shaped boundary on top of this crate.
#[allow(dead_code)]
pub const NOTHREAD: i64 = -1;

/// Maximum number of descriptor slots in a `StreamTable` (spec.md §6).
pub const MAX_STREAMS: usize = 256;
