//! Named single-threaded work queues.
//!
//! Recognition, revalidation, and event delivery each run on their own
//! dedicated queue. The separation is load-bearing: recognition tasks may
//! block on the operation gate, and event delivery must keep draining while
//! they do.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};

use crossbeam_channel::Sender;

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static POOL_TAG: Cell<Option<&'static str>> = const { Cell::new(None) };
}

/// Returns the name of the work queue the current thread belongs to, if any.
pub(crate) fn current_pool_tag() -> Option<&'static str> {
    POOL_TAG.with(|tag| tag.get())
}

/// A queue of jobs serviced by one background thread, in posting order.
///
/// Dropping the queue closes the channel and joins the thread, so any job
/// already started runs to completion first.
pub(crate) struct WorkQueue {
    name: &'static str,

    // `sender` must drop before `_thread`: closing the channel is what ends
    // the worker loop, and the jod_thread handle joins on drop.
    sender: Sender<Job>,
    _thread: jod_thread::JoinHandle<()>,
}

impl WorkQueue {
    pub fn new(name: &'static str) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        let thread = jod_thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                POOL_TAG.with(|tag| tag.set(Some(name)));

                while let Ok(job) = receiver.recv() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        log::error!("A queued task panicked; the queue keeps running");
                    }
                }
            })
            .unwrap_or_else(|err| panic!("could not spawn {name} worker: {err}"));

        WorkQueue {
            name,
            sender,
            _thread: thread,
        }
    }

    /// Enqueues a job and returns a handle that can be waited on.
    pub fn post<F: FnOnce() + Send + 'static>(&self, job: F) -> TaskHandle {
        let handle = TaskHandle::new();
        let completion = handle.clone();

        let wrapped: Job = Box::new(move || {
            // Mark the task done even if the job panics, so waiters are
            // never stranded.
            let _guard = CompletionGuard(completion);
            job();
        });

        if self.sender.send(wrapped).is_err() {
            log::warn!("Task posted to {} after shutdown; dropped", self.name);
            handle.mark_done();
        }

        handle
    }
}

struct CompletionGuard(TaskHandle);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.mark_done();
    }
}

/// Completion handle for a posted task.
#[derive(Clone)]
pub struct TaskHandle {
    state: Arc<TaskState>,
}

struct TaskState {
    done: Mutex<bool>,
    on_done: Condvar,
}

impl TaskHandle {
    fn new() -> Self {
        TaskHandle {
            state: Arc::new(TaskState {
                done: Mutex::new(false),
                on_done: Condvar::new(),
            }),
        }
    }

    /// A handle that is already complete. Returned by operations that ran
    /// inline instead of being queued.
    pub(crate) fn finished() -> Self {
        let handle = TaskHandle::new();
        handle.mark_done();
        handle
    }

    fn mark_done(&self) {
        let mut done = self.state.done.lock().unwrap_or_else(|e| e.into_inner());
        *done = true;
        self.state.on_done.notify_all();
    }

    pub fn is_done(&self) -> bool {
        *self.state.done.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks until the task has run.
    pub fn wait(&self) {
        let mut done = self.state.done.lock().unwrap_or_else(|e| e.into_inner());
        while !*done {
            done = self
                .state
                .on_done
                .wait(done)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_jobs_in_posting_order() {
        let queue = WorkQueue::new("test-order");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut last = None;
        for i in 0..10 {
            let seen = Arc::clone(&seen);
            last = Some(queue.post(move || seen.lock().unwrap().push(i)));
        }

        last.unwrap().wait();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn worker_thread_carries_pool_tag() {
        let queue = WorkQueue::new("test-tag");

        let tag = Arc::new(Mutex::new(None));
        let tag_clone = Arc::clone(&tag);
        queue
            .post(move || {
                *tag_clone.lock().unwrap() = current_pool_tag();
            })
            .wait();

        assert_eq!(*tag.lock().unwrap(), Some("test-tag"));
        assert_eq!(current_pool_tag(), None);
    }

    #[test]
    fn panicking_job_completes_its_handle() {
        let queue = WorkQueue::new("test-panic");
        let handle = queue.post(|| panic!("boom"));
        handle.wait();

        // The queue still services later jobs.
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        queue.post(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        })
        .wait();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finished_handle_does_not_block() {
        let handle = TaskHandle::finished();
        assert!(handle.is_done());
        handle.wait();
    }
}
