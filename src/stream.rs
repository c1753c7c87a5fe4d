//! Stream adapter glue: per-role operation dispatch over a descriptor table.
//!
//! Generalizes the teacher's `FdKind`/`FileDescriptor`/`FdTable`
//! (`kernel/src/ipc/fd.rs`) from a fixed enum of I/O kinds into a
//! `StreamObject` trait with three concrete implementors, realizing
//! spec.md §6's stream-layer contract (`reserve`/`get`/`decref`) and its
//! operations tables (pipe reader / pipe writer / socket) well enough to
//! exercise the whole core end to end without reimplementing the
//! process-wide descriptor table spec.md places out of scope.

use std::sync::{Arc, Mutex};

use crate::config::MAX_STREAMS;
use crate::errno::{EBADF, EINVAL, EMFILE};
use crate::pipe::{PipeReader, PipeWriter};
use crate::socket::Socket;

/// Operations a descriptor dispatches to its underlying stream object.
/// `open` from spec.md's table has no counterpart here: every descriptor
/// in this crate is created already-open by `pipe()`/`socket()`/`accept()`,
/// never reopened by path, so default-failing it costs nothing.
pub trait StreamObject: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> Result<usize, i32> {
        let _ = buf;
        Err(EINVAL)
    }
    fn write(&self, buf: &[u8]) -> Result<usize, i32> {
        let _ = buf;
        Err(EINVAL)
    }
    fn close(&self) -> Result<(), i32> {
        Ok(())
    }
}

/// Pipe reader table entry: read succeeds, write fails.
pub struct PipeReaderOps(pub Arc<PipeReader>);

impl StreamObject for PipeReaderOps {
    fn read(&self, buf: &mut [u8]) -> Result<usize, i32> {
        self.0.read(buf)
    }
    fn close(&self) -> Result<(), i32> {
        self.0.shutdown();
        Ok(())
    }
}

/// Pipe writer table entry: write succeeds, read fails.
pub struct PipeWriterOps(pub Arc<PipeWriter>);

impl StreamObject for PipeWriterOps {
    fn write(&self, buf: &[u8]) -> Result<usize, i32> {
        self.0.write(buf)
    }
    fn close(&self) -> Result<(), i32> {
        self.0.shutdown();
        Ok(())
    }
}

/// Socket table entry: read/write forward to the peer pipes; close tears
/// down per `Socket::close`'s type-dependent behavior.
pub struct SocketOps(pub Arc<Socket>);

impl StreamObject for SocketOps {
    fn read(&self, buf: &mut [u8]) -> Result<usize, i32> {
        self.0.read(buf)
    }
    fn write(&self, buf: &[u8]) -> Result<usize, i32> {
        self.0.write(buf)
    }
    fn close(&self) -> Result<(), i32> {
        self.0.close()
    }
}

struct Entry {
    object: Arc<dyn StreamObject>,
    refcount: u32,
}

/// A process's descriptor table: small integers naming stream objects.
pub struct StreamTable {
    slots: Mutex<Vec<Option<Entry>>>,
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTable {
    pub fn new() -> Self {
        StreamTable {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Atomically reserve a fresh descriptor for each of `objects`, in
    /// order. On descriptor exhaustion, rolls back every descriptor it
    /// already installed in this call and fails the whole reservation —
    /// matching spec.md §6's "atomic reservation of n fresh pairs".
    pub fn reserve(&self, objects: Vec<Arc<dyn StreamObject>>) -> Result<Vec<i32>, i32> {
        let mut slots = self.slots.lock().unwrap();
        let mut out = Vec::with_capacity(objects.len());
        for object in objects {
            let fd = match slots.iter().position(Option::is_none) {
                Some(i) => i,
                None if slots.len() < MAX_STREAMS => {
                    slots.push(None);
                    slots.len() - 1
                }
                None => {
                    for fd in out {
                        let fd: i32 = fd;
                        slots[fd as usize] = None;
                    }
                    return Err(EMFILE);
                }
            };
            slots[fd] = Some(Entry { object, refcount: 1 });
            out.push(fd as i32);
        }
        Ok(out)
    }

    /// Resolve a descriptor to its stream object.
    pub fn get(&self, fd: i32) -> Option<Arc<dyn StreamObject>> {
        if fd < 0 {
            return None;
        }
        let slots = self.slots.lock().unwrap();
        slots.get(fd as usize)?.as_ref().map(|e| e.object.clone())
    }

    /// Release one reference to `fd`. Closes the underlying object and
    /// frees the slot once the last reference is gone.
    pub fn decref(&self, fd: i32) -> Result<(), i32> {
        if fd < 0 {
            return Err(EBADF);
        }
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(fd as usize).ok_or(EBADF)?;
        let entry = slot.as_mut().ok_or(EBADF)?;
        entry.refcount -= 1;
        if entry.refcount == 0 {
            let object = slot.take().unwrap().object;
            drop(slots);
            return object.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe;

    #[test]
    fn pipe_descriptors_echo_through_the_table() {
        let table = StreamTable::new();
        let (reader, writer) = pipe::pipe();
        let fds = table
            .reserve(vec![
                Arc::new(PipeReaderOps(Arc::new(reader))),
                Arc::new(PipeWriterOps(Arc::new(writer))),
            ])
            .unwrap();
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let write_obj = table.get(write_fd).unwrap();
        assert_eq!(write_obj.write(b"hi").unwrap(), 2);
        table.decref(write_fd).unwrap();

        let read_obj = table.get(read_fd).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(read_obj.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"hi");
        assert_eq!(read_obj.read(&mut buf).unwrap(), 0);
        table.decref(read_fd).unwrap();
    }

    #[test]
    fn decref_on_unknown_descriptor_fails() {
        let table = StreamTable::new();
        assert_eq!(table.decref(3).unwrap_err(), EBADF);
    }

    #[test]
    fn get_after_decref_returns_none() {
        let table = StreamTable::new();
        let (reader, _writer) = pipe::pipe();
        let fd = table
            .reserve(vec![Arc::new(PipeReaderOps(Arc::new(reader)))])
            .unwrap()[0];
        table.decref(fd).unwrap();
        assert!(table.get(fd).is_none());
    }
}
