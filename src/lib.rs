//! In-kernel IPC core: bounded pipes, stream sockets, and thread join/detach,
//! hosted on `std::sync::{Mutex, Condvar}` and `std::thread` in place of the
//! teaching kernel's own scheduler and condition-variable primitive (out of
//! scope per spec.md §1; see SPEC_FULL.md §0 for the hosting model).
//!
//! - [`pipe`] — bounded single-reader/single-writer byte-stream pipes.
//! - [`socket`] — unbound/listener/peer stream sockets layered over pipes.
//! - [`thread`] — cooperative join/detach synchronization for threads.
//! - [`stream`] — the descriptor table and per-role operation dispatch that
//!   ties the three together, realizing spec.md §6's external contract.

pub mod config;
pub mod errno;
pub mod pipe;
pub mod socket;
pub mod stream;
pub mod thread;
