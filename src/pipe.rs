//! Bounded single-reader/single-writer byte-stream pipe.
//!
//! Grounded on `kernel_pipe.c`/`kernel_pipe.h` (tinyos3) for the exact
//! blocking discipline and on `kernel/src/ipc/pipe.rs` /
//! `kernel/src/ipc/fd.rs` (the teacher) for the Rust shape: a ring buffer
//! behind a shared control block, reached through two half-ownership
//! handles whose `Drop` performs the endpoint close. Unlike the teacher's
//! `PipeBuffer` (which reports "would block" as `Err(EAGAIN)` for a
//! non-blocking caller to retry), this module blocks the calling thread on
//! a condition variable, matching spec.md's `kernel_wait`/`kernel_broadcast`
//! contract directly: the teacher has no condvar, so the scheduler+condvar
//! external collaborator named in spec.md §1 is realized here with
//! `std::sync::Condvar`, the hosted equivalent of that contract (see
//! SPEC_FULL.md §0).

use std::sync::{Arc, Condvar, Mutex};

use crate::config::PIPE_BUFFER_SIZE as CAP;
use crate::errno::{EBADF, EPIPE};

struct Inner {
    buffer: Box<[u8; CAP]>,
    r_pos: usize,
    w_pos: usize,
    reader_present: bool,
    writer_present: bool,
}

impl Inner {
    fn is_empty(&self) -> bool {
        self.r_pos == self.w_pos
    }

    fn is_full(&self) -> bool {
        (self.w_pos + 1) % CAP == self.r_pos
    }
}

/// The shared pipe control block. Freed when both endpoints have closed.
struct PipeControlBlock {
    inner: Mutex<Inner>,
    has_data: Condvar,
    has_space: Condvar,
}

/// Create a new pipe, returning its reader and writer endpoints.
pub fn pipe() -> (PipeReader, PipeWriter) {
    let cb = Arc::new(PipeControlBlock {
        inner: Mutex::new(Inner {
            buffer: Box::new([0u8; CAP]),
            r_pos: 0,
            w_pos: 0,
            reader_present: true,
            writer_present: true,
        }),
        has_data: Condvar::new(),
        has_space: Condvar::new(),
    });
    (PipeReader { cb: cb.clone() }, PipeWriter { cb })
}

/// The read endpoint of a pipe. Dropping it closes the reader side.
pub struct PipeReader {
    cb: Arc<PipeControlBlock>,
}

/// The write endpoint of a pipe. Dropping it closes the writer side.
pub struct PipeWriter {
    cb: Arc<PipeControlBlock>,
}

impl PipeReader {
    /// Read up to `buf.len()` bytes. Returns `Ok(0)` on clean EOF (writer
    /// gone and buffer drained), `Ok(n)` for `n` bytes read, or `Err(errno)`.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, i32> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut guard = self.cb.inner.lock().unwrap();
        if !guard.reader_present {
            return Err(EBADF);
        }

        let mut i = 0;
        while i < buf.len() {
            if guard.is_empty() && !guard.writer_present {
                // EOF: nothing buffered and no writer will ever add more.
                break;
            }

            while guard.is_empty() && guard.writer_present {
                self.cb.has_space.notify_all();
                guard = self.cb.has_data.wait(guard).unwrap();
            }

            if guard.is_empty() && !guard.writer_present {
                break;
            }

            buf[i] = guard.buffer[guard.r_pos];
            guard.r_pos = (guard.r_pos + 1) % CAP;
            i += 1;
        }

        self.cb.has_space.notify_all();
        log::debug!("pipe_read: returned {} bytes", i);
        Ok(i)
    }
}

impl PipeWriter {
    /// Write up to `buf.len()` bytes. Returns `Ok(n)`. A short count (less
    /// than `buf.len()`) means the writer end was closed concurrently by
    /// another alias of this endpoint mid-transfer; `Err(EPIPE)` means the
    /// reader end closed mid-transfer, in which case bytes already written
    /// are lost to the caller (matches POSIX `EPIPE` at a byte boundary).
    pub fn write(&self, buf: &[u8]) -> Result<usize, i32> {
        let mut guard = self.cb.inner.lock().unwrap();
        if !guard.reader_present || !guard.writer_present {
            return Err(EPIPE);
        }

        let mut i = 0;
        while i < buf.len() {
            while guard.is_full() && guard.reader_present {
                self.cb.has_data.notify_all();
                guard = self.cb.has_space.wait(guard).unwrap();
            }

            if !guard.reader_present {
                return Err(EPIPE);
            }
            if !guard.writer_present {
                return Ok(i);
            }

            guard.buffer[guard.w_pos] = buf[i];
            guard.w_pos = (guard.w_pos + 1) % CAP;
            i += 1;
        }

        self.cb.has_data.notify_all();
        log::debug!("pipe_write: wrote {} bytes", i);
        Ok(i)
    }
}

impl PipeReader {
    /// Close the reader endpoint in place without dropping the handle.
    ///
    /// Used by `shutdown(SHUTDOWN_READ)` on a peer socket (spec.md §4.2.7,
    /// §9 open question): the socket keeps holding this `PipeReader`, and a
    /// further `read()` through it must observe the endpoint as absent and
    /// return `EBADF` rather than EOF. Idempotent.
    pub fn shutdown(&self) {
        let mut guard = self.cb.inner.lock().unwrap();
        guard.reader_present = false;
        drop(guard);
        self.cb.has_space.notify_all();
    }
}

impl PipeWriter {
    /// Close the writer endpoint in place without dropping the handle.
    ///
    /// Used by `shutdown(SHUTDOWN_WRITE)`: the socket keeps holding this
    /// `PipeWriter`, and a further `write()` through it must observe the
    /// endpoint as absent and return `EPIPE`. Idempotent.
    pub fn shutdown(&self) {
        let mut guard = self.cb.inner.lock().unwrap();
        guard.writer_present = false;
        drop(guard);
        self.cb.has_data.notify_all();
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
