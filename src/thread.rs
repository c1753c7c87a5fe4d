//! Cooperative join/detach synchronization for kernel-style threads.
//!
//! Grounded on `kernel_threads.c` (`sys_CreateThread`/`sys_ThreadJoin`/
//! `sys_ThreadDetach`/`sys_ThreadExit`) for exact semantics and on
//! `kernel/src/task/kthread.rs` for Rust shape: an `Arc`-shared control
//! block, a registry keyed by thread id, and a handle type wrapping the
//! `Arc`. Unlike the teacher's `Kthread` (join-only: no `detach`, and a
//! control block that outlives its thread indefinitely), this module keeps
//! the full PTCB discipline from the source — `detached`, `refcount`, and
//! the race where a concurrent `detach` wakes a blocked joiner with a
//! distinct return value — and frees the block as soon as the last
//! referrer (the exiting thread or the last joiner) is done with it.
//!
//! `create_thread`'s `task`/`argl`/`args` triple collapses to a single
//! `FnOnce() -> i32` closure here; closures already capture their
//! environment, so a separate argument buffer adds nothing in Rust.
//!
//! spec.md lists "the currently running thread accessor" as an external
//! collaborator whose contract, not implementation, is in scope; it is
//! realized here as a thread-local set at thread start.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread as std_thread;

use crate::errno::EINVAL;

pub type Tid = i64;

thread_local! {
    static CURRENT_TID: Cell<Tid> = const { Cell::new(0) };
}

/// The thread id of the calling thread, or `0` if it was not created via
/// [`ProcessGroup::create_thread`] (e.g. the test harness's main thread).
pub fn current_tid() -> Tid {
    CURRENT_TID.with(|c| c.get())
}

struct ThreadBlock {
    exited: bool,
    detached: bool,
    exitval: i32,
    refcount: u32,
}

struct ThreadControl {
    state: Mutex<ThreadBlock>,
    exit_cv: Condvar,
}

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

fn registry() -> &'static Mutex<HashMap<Tid, Arc<ThreadControl>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<Tid, Arc<ThreadControl>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Process-exit cleanup hook, run on the last thread of a process to exit.
///
/// `sys_ThreadExit` reparents orphaned children to init, releases the
/// process argument buffer, and decref's every open descriptor through the
/// stream layer — all out of scope for this crate (spec.md §1). This trait
/// keeps that shape visible and testable without reimplementing the
/// process manager; supply [`NoopLifecycle`] where the behavior genuinely
/// doesn't matter.
pub trait ProcessLifecycle: Send + Sync {
    fn on_last_thread_exit(&self);
}

/// A [`ProcessLifecycle`] that does nothing.
pub struct NoopLifecycle;

impl ProcessLifecycle for NoopLifecycle {
    fn on_last_thread_exit(&self) {}
}

/// A minimal process: a named group of threads sharing one lifecycle hook.
pub struct ProcessGroup {
    threads: Mutex<Vec<Tid>>,
    /// Every tid this process has ever spawned, for the final registry sweep
    /// in `exit_current` — `threads` itself is drained down to empty as each
    /// thread exits, so it can't be reused to name "every thread" afterward.
    all_threads: Mutex<Vec<Tid>>,
    lifecycle: Box<dyn ProcessLifecycle>,
}

impl ProcessGroup {
    pub fn new(lifecycle: Box<dyn ProcessLifecycle>) -> Arc<Self> {
        Arc::new(ProcessGroup {
            threads: Mutex::new(Vec::new()),
            all_threads: Mutex::new(Vec::new()),
            lifecycle,
        })
    }

    /// Spawn `task` as a new thread of this process, returning its thread
    /// id. Fails only if the underlying OS thread spawn fails (resource
    /// exhaustion) — the nearest hosted analogue of the source's thread
    /// table being full.
    pub fn create_thread<F>(self: &Arc<Self>, task: F) -> Result<Tid, i32>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let tid = NEXT_TID.fetch_add(1, Ordering::SeqCst) as Tid;
        let control = Arc::new(ThreadControl {
            state: Mutex::new(ThreadBlock {
                exited: false,
                detached: false,
                exitval: 0,
                refcount: 0,
            }),
            exit_cv: Condvar::new(),
        });
        registry().lock().unwrap().insert(tid, control.clone());
        self.threads.lock().unwrap().push(tid);
        self.all_threads.lock().unwrap().push(tid);

        let process = self.clone();
        std_thread::Builder::new()
            .spawn(move || {
                CURRENT_TID.with(|c| c.set(tid));
                let code = task();
                exit_current(tid, code, &process);
            })
            .map_err(|_| EINVAL)?;

        log::debug!("create_thread: spawned tid {}", tid);
        Ok(tid)
    }

    /// Block until `tid` — a thread of *this* process — has exited, then
    /// return its exit value.
    ///
    /// Fails if `tid` is not in this process's thread list (`rlist_find(&
    /// CURPROC->ptcb_list, ...)` in the source), if the caller names itself,
    /// or if the target gets detached while this call is waiting. A `tid`
    /// belonging to some other process is rejected the same way a wholly
    /// unknown one is — this is what scopes `join` to "the current
    /// process's thread list" per spec.md §4.3.
    pub fn join(&self, tid: Tid) -> Result<i32, i32> {
        if tid == current_tid() {
            return Err(EINVAL);
        }
        if !self.all_threads.lock().unwrap().contains(&tid) {
            return Err(EINVAL);
        }

        let control = registry().lock().unwrap().get(&tid).cloned().ok_or(EINVAL)?;

        let mut state = control.state.lock().unwrap();
        if state.detached {
            return Err(EINVAL);
        }
        state.refcount += 1;
        while !state.exited && !state.detached {
            state = control.exit_cv.wait(state).unwrap();
        }
        state.refcount -= 1;

        if state.detached {
            let refcount = state.refcount;
            drop(state);
            // Lost the race to a concurrent detach. No one else will free
            // this block on our behalf once we return: the exiting thread
            // only frees detached blocks at refcount == 0 (see
            // exit_current), and we may be observing this after that check
            // already ran and saw refcount > 0.
            if refcount == 0 {
                registry().lock().unwrap().remove(&tid);
            }
            return Err(EINVAL);
        }

        let exitval = state.exitval;
        let refcount = state.refcount;
        drop(state);

        if refcount == 0 {
            registry().lock().unwrap().remove(&tid);
        }
        Ok(exitval)
    }
}

fn exit_current(tid: Tid, code: i32, process: &Arc<ProcessGroup>) {
    let control = match registry().lock().unwrap().get(&tid).cloned() {
        Some(c) => c,
        None => return,
    };

    {
        let mut state = control.state.lock().unwrap();
        state.exitval = code;
        state.exited = true;
    }
    control.exit_cv.notify_all();
    log::debug!("thread_exit: tid {} exited with code {}", tid, code);

    let was_last = {
        let mut threads = process.threads.lock().unwrap();
        threads.retain(|&t| t != tid);
        threads.is_empty()
    };
    if was_last {
        log::info!("thread_exit: last thread of process exited, running process cleanup");
        process.lifecycle.on_last_thread_exit();
        // The process is now a zombie: no future join can legally name any
        // of its threads, so any block a joiner never claimed is freed here
        // rather than leaking (kernel_threads.c's "clean up non-freed
        // PTCBs" at process exit).
        let mut reg = registry().lock().unwrap();
        for t in process.all_threads.lock().unwrap().iter() {
            reg.remove(t);
        }
    }

    // A detached thread can never be joined (ProcessGroup::join rejects it
    // before touching refcount), so once refcount drops to zero nothing
    // will ever free it — the exiting thread must. A joinable thread's
    // block must survive here even at refcount == 0: a joiner may still
    // arrive later and needs to read exitval, so only join (or the
    // last-thread cleanup above) frees those.
    let should_free = {
        let state = control.state.lock().unwrap();
        state.detached && state.refcount == 0
    };
    if should_free {
        registry().lock().unwrap().remove(&tid);
    }
}

/// Convert `tid` to detached: it can no longer be joined, and any joiner
/// currently waiting on it wakes immediately and fails. Idempotent: a
/// second call (or a call after the target has exited) fails without side
/// effect.
pub fn thread_detach(tid: Tid) -> Result<(), i32> {
    let control = registry().lock().unwrap().get(&tid).cloned().ok_or(EINVAL)?;
    let mut state = control.state.lock().unwrap();
    if state.exited || state.detached {
        return Err(EINVAL);
    }
    state.detached = true;
    drop(state);
    control.exit_cv.notify_all();
    log::debug!("thread_detach: tid {} detached", tid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn join_returns_exit_value() {
        let process = ProcessGroup::new(Box::new(NoopLifecycle));
        let tid = process.create_thread(|| 42).unwrap();
        assert_eq!(process.join(tid).unwrap(), 42);
    }

    #[test]
    fn join_on_self_fails() {
        let process = ProcessGroup::new(Box::new(NoopLifecycle));
        let inner = process.clone();
        let tid = process.create_thread(move || {
            let err = inner.join(current_tid()).unwrap_err();
            assert_eq!(err, EINVAL);
            0
        }).unwrap();
        process.join(tid).unwrap();
    }

    #[test]
    fn join_rejects_thread_of_another_process() {
        let owner = ProcessGroup::new(Box::new(NoopLifecycle));
        let other = ProcessGroup::new(Box::new(NoopLifecycle));
        let tid = owner.create_thread(|| 0).unwrap();
        assert_eq!(other.join(tid).unwrap_err(), EINVAL);
        owner.join(tid).unwrap();
    }

    #[test]
    fn detach_wakes_concurrent_joiner_with_error() {
        let process = ProcessGroup::new(Box::new(NoopLifecycle));
        let tid = process
            .create_thread(|| {
                thread::sleep(Duration::from_millis(100));
                7
            })
            .unwrap();

        let joiner = {
            let process = process.clone();
            thread::spawn(move || process.join(tid))
        };
        thread::sleep(Duration::from_millis(20));
        thread_detach(tid).unwrap();

        assert_eq!(joiner.join().unwrap().unwrap_err(), EINVAL);
        // The detached thread still runs to completion cleanly.
        thread::sleep(Duration::from_millis(150));
    }

    #[test]
    fn double_detach_is_idempotent_failure() {
        let process = ProcessGroup::new(Box::new(NoopLifecycle));
        let tid = process
            .create_thread(|| {
                thread::sleep(Duration::from_millis(50));
                0
            })
            .unwrap();
        thread_detach(tid).unwrap();
        assert_eq!(thread_detach(tid).unwrap_err(), EINVAL);
    }

    #[test]
    fn last_thread_of_process_runs_cleanup_hook() {
        struct FlagLifecycle(Arc<AtomicBool>);
        impl ProcessLifecycle for FlagLifecycle {
            fn on_last_thread_exit(&self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let ran = Arc::new(AtomicBool::new(false));
        let process = ProcessGroup::new(Box::new(FlagLifecycle(ran.clone())));

        let t1 = process.create_thread(|| 0).unwrap();
        let t2 = process.create_thread(|| 0).unwrap();
        process.join(t1).unwrap();
        process.join(t2).unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(ran.load(Ordering::SeqCst));
    }
}
