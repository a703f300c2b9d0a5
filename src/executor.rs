//! Single-threaded serial executor (strand).
//!
//! All state owned by a channel, its shared outstations and their
//! per-connection sessions is mutated only from tasks running on the
//! channel's executor. Tasks run one at a time, in the order they were
//! submitted.
//!
//! - [`Executor::post`] queues a task and returns immediately.
//! - [`Executor::return_from`] runs a task and blocks the caller until its
//!   result is available. Called from the executor thread itself it runs
//!   the task inline, so nested round trips cannot deadlock.

use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Dnp3Error, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a strand executor. Cloning shares the same thread.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    tx: mpsc::UnboundedSender<Task>,
    thread_id: ThreadId,
}

impl Executor {
    /// Spawn a new executor thread.
    ///
    /// The thread exits once every handle is dropped and the queue drains.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Some(task) = rx.blocking_recv() {
                    task();
                }
            })?;

        let thread_id = handle.thread().id();
        Ok(Self {
            inner: Arc::new(Inner {
                name,
                tx,
                thread_id,
            }),
        })
    }

    /// Executor (and thread) name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Check if the caller is running on this executor.
    #[inline]
    pub fn is_running_in_thread(&self) -> bool {
        std::thread::current().id() == self.inner.thread_id
    }

    /// Queue a task. Returns false if the executor has stopped.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.tx.send(Box::new(task)).is_ok()
    }

    /// Run a task on the executor and wait for its result.
    pub fn return_from<R, F>(&self, task: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_running_in_thread() {
            return Ok(task());
        }

        let (tx, rx) = oneshot::channel();
        let queued = self.post(move || {
            let _ = tx.send(task());
        });
        if !queued {
            return Err(Dnp3Error::ExecutorStopped);
        }

        futures::executor::block_on(rx).map_err(|_| Dnp3Error::ExecutorStopped)
    }

    /// Run a task on the executor and wait for it to complete.
    pub fn block_until<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.return_from(task)
    }

    /// Like [`block_until`](Self::block_until), but a task the executor can
    /// no longer run is run on the calling thread instead.
    pub fn block_until_or_inline<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(task)));
        let queued = slot.clone();
        let result = self.block_until(move || {
            let task = queued.lock().take();
            if let Some(task) = task {
                task();
            }
        });

        if result.is_err() {
            let task = slot.lock().take();
            if let Some(task) = task {
                task();
            }
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.inner.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_return_from_runs_on_executor_thread() {
        let executor = Executor::new("strand-test").unwrap();
        assert!(!executor.is_running_in_thread());

        let inner = executor.clone();
        let on_thread = executor
            .return_from(move || inner.is_running_in_thread())
            .unwrap();
        assert!(on_thread);

        let name = executor
            .return_from(|| std::thread::current().name().map(str::to_owned))
            .unwrap();
        assert_eq!(name.as_deref(), Some("strand-test"));
    }

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let executor = Executor::new("fifo").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let order = order.clone();
            assert!(executor.post(move || order.lock().push(i)));
        }

        executor.block_until(|| ()).unwrap();
        let order = order.lock();
        assert_eq!(*order, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_nested_round_trip_runs_inline() {
        let executor = Executor::new("nested").unwrap();
        let inner = executor.clone();

        let value = executor
            .return_from(move || inner.return_from(|| 21).unwrap() * 2)
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_concurrent_callers_are_serialized() {
        let executor = Executor::new("serial").unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let executor = executor.clone();
                let active = active.clone();
                let max_active = max_active.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let active = active.clone();
                        let max_active = max_active.clone();
                        executor
                            .block_until(move || {
                                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                                max_active.fetch_max(now, Ordering::SeqCst);
                                active.fetch_sub(1, Ordering::SeqCst);
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stopped_executor_reports_error() {
        let executor = Executor::new("panics").unwrap();
        executor.post(|| panic!("task failure stops the strand"));

        let err = executor.return_from(|| 1).unwrap_err();
        assert!(err.is_shutdown_error());
        assert!(!executor.post(|| ()));
    }

    #[test]
    fn test_block_until_or_inline_runs_exactly_once() {
        let executor = Executor::new("inline-live").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let inner = executor.clone();
        executor.block_until_or_inline(move || {
            assert!(inner.is_running_in_thread());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let stopped = Executor::new("inline-stopped").unwrap();
        stopped.post(|| panic!("task failure stops the strand"));
        let caller = std::thread::current().id();
        let counter = runs.clone();
        stopped.block_until_or_inline(move || {
            assert_eq!(std::thread::current().id(), caller);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
