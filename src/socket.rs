//! Stream sockets: unbound / listener / peer, layered over two pipes.
//!
//! Grounded on `kernel_socket.c`/`kernel_socket.h` (tinyos3) for the exact
//! rendezvous protocol (`sys_Listen`/`sys_Accept`/`sys_Connect`/`sys_ShutDown`)
//! and on `kernel/src/socket/mod.rs` (the teacher's port-keyed registry
//! pattern) and `kernel/src/socket/unix.rs` (a peer built from a shared
//! buffer pair) for Rust shape.
//!
//! Two of spec.md §9's open design notes are resolved here in favor of the
//! safer alternative the notes themselves suggest:
//! - `accept`'s wait predicate uses the listener's own `closed` flag,
//!   broadcast under the same queue mutex, rather than re-querying the
//!   global port table on every wakeup.
//! - the peer cross-reference is a `Mutex<Weak<Socket>>`. The source nulls
//!   it under the *other* socket's exclusion to stop a second `close` from
//!   reaching through to already-freed pipes — a hazard that does not exist
//!   here, because `PipeReader::shutdown`/`PipeWriter::shutdown` are
//!   idempotent and Rust's `Arc` frees the control block exactly once
//!   regardless of call order. So each peer tears down only its own two
//!   endpoints and clears only its own mirror; no cross-socket lock is ever
//!   taken in `close`, which also sidesteps the lock-ordering question the
//!   source's comment raises for a concurrent close/close race.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

use crate::config::{MAX_PORT, NOFILE, NOPORT};
use crate::errno::{EADDRINUSE, EINVAL, ENOTCONN, ENOTSOCK, ETIMEDOUT};
use crate::pipe::{self, PipeReader, PipeWriter};

/// Which half (or both) of a peer connection `shutdown` affects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownHow {
    Read,
    Write,
    Both,
}

struct PeerState {
    peer: Mutex<Weak<Socket>>,
    write_pipe: Arc<PipeWriter>,
    read_pipe: Arc<PipeReader>,
}

struct ListenerQueue {
    requests: VecDeque<Arc<ConnectionRequest>>,
    closed: bool,
}

struct Listener {
    queue: Mutex<ListenerQueue>,
    req_available: Condvar,
}

struct RequestState {
    admitted: bool,
    rejected: bool,
}

struct ConnectionRequest {
    /// The connecter's own socket; wired into `peer_s` once admitted.
    client: Arc<Socket>,
    state: Mutex<RequestState>,
    connected_cv: Condvar,
}

enum SocketKind {
    Unbound,
    Listener(Arc<Listener>),
    Peer(PeerState),
}

/// A stream socket: unbound, a listener bound to a port, or a connected peer.
pub struct Socket {
    port: u32,
    /// In-progress blocking operations holding a reference to this socket
    /// (accept waiters, connect waiters). Diagnostic bookkeeping; nothing in
    /// this implementation gates destruction on it reaching zero, since
    /// `Arc` already keeps a socket alive for as long as a waiter holds it.
    refcount: AtomicU32,
    kind: Mutex<SocketKind>,
}

fn port_table() -> &'static Mutex<HashMap<u32, Arc<Socket>>> {
    static TABLE: OnceLock<Mutex<HashMap<u32, Arc<Socket>>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Create a new unbound socket. `port` may be `NOPORT` if this socket will
/// only ever become a peer via `accept`; binding happens at `listen`, not
/// here.
pub fn socket(port: u32) -> Result<Arc<Socket>, i32> {
    if port > MAX_PORT {
        return Err(EINVAL);
    }
    Ok(Arc::new(Socket {
        port,
        refcount: AtomicU32::new(0),
        kind: Mutex::new(SocketKind::Unbound),
    }))
}

impl Socket {
    /// Bind this socket to its port and start accepting connections.
    pub fn listen(self: &Arc<Self>) -> Result<(), i32> {
        if self.port == NOPORT {
            return Err(EINVAL);
        }
        let mut kind = self.kind.lock().unwrap();
        if !matches!(*kind, SocketKind::Unbound) {
            return Err(EINVAL);
        }

        let mut table = port_table().lock().unwrap();
        if table.contains_key(&self.port) {
            return Err(EADDRINUSE);
        }
        table.insert(self.port, self.clone());
        drop(table);

        *kind = SocketKind::Listener(Arc::new(Listener {
            queue: Mutex::new(ListenerQueue {
                requests: VecDeque::new(),
                closed: false,
            }),
            req_available: Condvar::new(),
        }));
        log::info!("listen: port {} now accepting", self.port);
        Ok(())
    }

    /// Block until a connecter arrives or this listener is closed, then
    /// build the peer pair and return the server-side socket.
    pub fn accept(self: &Arc<Self>) -> Result<Arc<Socket>, i32> {
        let listener = {
            let kind = self.kind.lock().unwrap();
            match &*kind {
                SocketKind::Listener(l) => l.clone(),
                _ => return Err(NOFILE),
            }
        };

        self.refcount.fetch_add(1, Ordering::SeqCst);

        let mut q = listener.queue.lock().unwrap();
        let request = loop {
            if let Some(req) = q.requests.pop_front() {
                break req;
            }
            if q.closed {
                self.refcount.fetch_sub(1, Ordering::SeqCst);
                log::warn!("accept: listener on port {} closed while waiting", self.port);
                return Err(NOFILE);
            }
            q = listener.req_available.wait(q).unwrap();
        };
        drop(q);

        request.state.lock().unwrap().admitted = true;

        let server_socket = match socket(NOPORT) {
            Ok(s) => s,
            Err(_) => {
                let mut st = request.state.lock().unwrap();
                st.admitted = false;
                drop(st);
                request.connected_cv.notify_all();
                self.refcount.fetch_sub(1, Ordering::SeqCst);
                return Err(NOFILE);
            }
        };
        let client_socket = request.client.clone();

        // P1: server writes, client reads. P2: client writes, server reads.
        let (p1_reader, p1_writer) = pipe::pipe();
        let (p2_reader, p2_writer) = pipe::pipe();
        let p1_reader = Arc::new(p1_reader);
        let p1_writer = Arc::new(p1_writer);
        let p2_reader = Arc::new(p2_reader);
        let p2_writer = Arc::new(p2_writer);

        *server_socket.kind.lock().unwrap() = SocketKind::Peer(PeerState {
            peer: Mutex::new(Arc::downgrade(&client_socket)),
            write_pipe: p1_writer,
            read_pipe: p2_reader,
        });
        *client_socket.kind.lock().unwrap() = SocketKind::Peer(PeerState {
            peer: Mutex::new(Arc::downgrade(&server_socket)),
            write_pipe: p2_writer,
            read_pipe: p1_reader,
        });

        request.connected_cv.notify_all();
        self.refcount.fetch_sub(1, Ordering::SeqCst);
        log::info!("accept: admitted connection on port {}", self.port);
        Ok(server_socket)
    }

    /// Read from the inbound pipe of a connected peer socket.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, i32> {
        let read_pipe = {
            let kind = self.kind.lock().unwrap();
            match &*kind {
                SocketKind::Peer(peer) => peer.read_pipe.clone(),
                _ => return Err(ENOTCONN),
            }
        };
        read_pipe.read(buf)
    }

    /// Write to the outbound pipe of a connected peer socket.
    pub fn write(&self, buf: &[u8]) -> Result<usize, i32> {
        let write_pipe = {
            let kind = self.kind.lock().unwrap();
            match &*kind {
                SocketKind::Peer(peer) => peer.write_pipe.clone(),
                _ => return Err(ENOTCONN),
            }
        };
        write_pipe.write(buf)
    }

    /// Half- or fully-close a connected peer socket.
    pub fn shutdown(&self, how: ShutdownHow) -> Result<(), i32> {
        if how == ShutdownHow::Both {
            return self.close();
        }
        let kind = self.kind.lock().unwrap();
        match &*kind {
            SocketKind::Peer(peer) => {
                match how {
                    ShutdownHow::Read => peer.read_pipe.shutdown(),
                    ShutdownHow::Write => peer.write_pipe.shutdown(),
                    ShutdownHow::Both => unreachable!(),
                }
                Ok(())
            }
            _ => Err(ENOTCONN),
        }
    }

    /// Close this socket, tearing down its role-specific payload.
    pub fn close(&self) -> Result<(), i32> {
        let mut kind = self.kind.lock().unwrap();
        let previous = std::mem::replace(&mut *kind, SocketKind::Unbound);
        drop(kind);

        match previous {
            SocketKind::Unbound => {}
            SocketKind::Listener(listener) => {
                port_table().lock().unwrap().remove(&self.port);
                let mut q = listener.queue.lock().unwrap();
                q.closed = true;
                for req in q.requests.drain(..) {
                    let mut st = req.state.lock().unwrap();
                    st.rejected = true;
                    drop(st);
                    req.connected_cv.notify_all();
                }
                drop(q);
                listener.req_available.notify_all();
                log::info!("close: listener on port {} removed", self.port);
            }
            SocketKind::Peer(peer) => {
                peer.read_pipe.shutdown();
                peer.write_pipe.shutdown();
                *peer.peer.lock().unwrap() = Weak::new();
                log::debug!("close: peer socket torn down");
            }
        }
        Ok(())
    }

    /// Connect an unbound socket to a listener on `port`, waiting up to
    /// `timeout` for an accepter. Returns `Ok(())` once admitted.
    pub fn connect(self: &Arc<Self>, port: u32, timeout: Duration) -> Result<(), i32> {
        if port == NOPORT || port > MAX_PORT {
            return Err(EINVAL);
        }
        {
            let kind = self.kind.lock().unwrap();
            if !matches!(*kind, SocketKind::Unbound) {
                return Err(EINVAL);
            }
        }

        let listener_socket = port_table()
            .lock()
            .unwrap()
            .get(&port)
            .cloned()
            .ok_or(EINVAL)?;
        let listener = {
            let kind = listener_socket.kind.lock().unwrap();
            match &*kind {
                SocketKind::Listener(l) => l.clone(),
                _ => return Err(ENOTSOCK),
            }
        };

        self.refcount.fetch_add(1, Ordering::SeqCst);

        let request = Arc::new(ConnectionRequest {
            client: self.clone(),
            state: Mutex::new(RequestState {
                admitted: false,
                rejected: false,
            }),
            connected_cv: Condvar::new(),
        });

        listener.queue.lock().unwrap().requests.push_back(request.clone());
        listener.req_available.notify_all();

        let deadline = Instant::now() + timeout;
        let mut state = request.state.lock().unwrap();
        while !state.admitted && !state.rejected {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, result) = request
                .connected_cv
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
            if result.timed_out() {
                break;
            }
        }
        let admitted = state.admitted;
        drop(state);

        self.refcount.fetch_sub(1, Ordering::SeqCst);

        // Idempotent: harmless if accept() already popped this request.
        listener
            .queue
            .lock()
            .unwrap()
            .requests
            .retain(|r| !Arc::ptr_eq(r, &request));

        if admitted {
            log::info!("connect: admitted on port {}", port);
            Ok(())
        } else {
            log::warn!("connect: refused or timed out on port {}", port);
            Err(ETIMEDOUT)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn listener_rendezvous_both_directions() {
        let listener = socket(7).unwrap();
        listener.listen().unwrap();

        let accepter = {
            let listener = listener.clone();
            thread::spawn(move || listener.accept().unwrap())
        };

        let client = socket(NOPORT).unwrap();
        client.connect(7, Duration::from_secs(1)).unwrap();

        let server = accepter.join().unwrap();

        server.write(b"ping").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(client.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"ping");

        client.write(b"pong").unwrap();
        let mut buf2 = [0u8; 4];
        assert_eq!(server.read(&mut buf2).unwrap(), 4);
        assert_eq!(&buf2, b"pong");

        listener.close().unwrap();
    }

    #[test]
    fn connect_with_no_listener_times_out() {
        let client = socket(NOPORT).unwrap();
        let start = Instant::now();
        let err = client.connect(999, Duration::from_millis(50)).unwrap_err();
        assert_eq!(err, EINVAL);
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn connect_times_out_when_nobody_accepts() {
        let listener = socket(8).unwrap();
        listener.listen().unwrap();

        let client = socket(NOPORT).unwrap();
        let start = Instant::now();
        let err = client.connect(8, Duration::from_millis(50)).unwrap_err();
        assert_eq!(err, ETIMEDOUT);
        assert!(start.elapsed() >= Duration::from_millis(40));

        listener.close().unwrap();
    }

    #[test]
    fn closing_listener_wakes_accepter_and_connecter() {
        let listener = socket(9).unwrap();
        listener.listen().unwrap();

        let accepter = {
            let listener = listener.clone();
            thread::spawn(move || listener.accept())
        };
        let connecter = {
            let client = socket(NOPORT).unwrap();
            thread::spawn(move || client.connect(9, Duration::from_secs(30)))
        };

        thread::sleep(Duration::from_millis(20));
        listener.close().unwrap();

        assert_eq!(accepter.join().unwrap().unwrap_err(), NOFILE);
        assert_eq!(connecter.join().unwrap().unwrap_err(), ETIMEDOUT);
    }

    #[test]
    fn second_listener_on_same_port_is_rejected() {
        let a = socket(10).unwrap();
        a.listen().unwrap();
        let b = socket(10).unwrap();
        assert_eq!(b.listen().unwrap_err(), EADDRINUSE);
        a.close().unwrap();
    }

    #[test]
    fn shutdown_read_then_read_is_error_not_eof() {
        let listener = socket(11).unwrap();
        listener.listen().unwrap();
        let accepter = {
            let listener = listener.clone();
            thread::spawn(move || listener.accept().unwrap())
        };
        let client = socket(NOPORT).unwrap();
        client.connect(11, Duration::from_secs(1)).unwrap();
        let server = accepter.join().unwrap();

        client.shutdown(ShutdownHow::Read).unwrap();
        let mut buf = [0u8; 4];
        assert!(client.read(&mut buf).is_err());

        listener.close().unwrap();
        server.close().unwrap();
    }

    #[test]
    fn shutdown_write_then_write_is_epipe() {
        let listener = socket(12).unwrap();
        listener.listen().unwrap();
        let accepter = {
            let listener = listener.clone();
            thread::spawn(move || listener.accept().unwrap())
        };
        let client = socket(NOPORT).unwrap();
        client.connect(12, Duration::from_secs(1)).unwrap();
        let server = accepter.join().unwrap();

        client.shutdown(ShutdownHow::Write).unwrap();
        assert_eq!(
            client.write(b"x").unwrap_err(),
            crate::errno::EPIPE
        );

        listener.close().unwrap();
        server.close().unwrap();
    }

    #[test]
    fn read_write_on_non_peer_socket_fails() {
        let s = socket(NOPORT).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(s.read(&mut buf).unwrap_err(), ENOTCONN);
        assert_eq!(s.write(b"x").unwrap_err(), ENOTCONN);
    }
}
