//! Access to the monitored thread.
//!
//! The watchdog never touches the monitored thread directly. It hands a task
//! to a [`MainThreadProbe`] and waits for the task to report back.
//! [`MonitoredThread`] is a stand-in UI thread: a named thread draining a task
//! queue, used by the demo binary and the tests.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use log::{debug, warn};

/// Work item executed on the monitored thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait MainThreadProbe: Send + Sync {
    /// Run `task` exactly once, eventually, on the monitored thread.
    fn schedule_on_monitored_thread(&self, task: Task);
}

/// A dedicated thread that runs queued tasks in order.
pub struct MonitoredThread {
    tx: Option<Sender<Task>>,
    handle: Option<JoinHandle<()>>,
}

impl MonitoredThread {
    /// # Errors
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<Task>();
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            for task in rx {
                task();
            }
            debug!("monitored thread drained, exiting");
        })?;
        Ok(Self { tx: Some(tx), handle: Some(handle) })
    }

    /// Queue arbitrary work, e.g. a simulated stall.
    pub fn run(&self, task: impl FnOnce() + Send + 'static) {
        self.schedule_on_monitored_thread(Box::new(task));
    }
}

impl MainThreadProbe for MonitoredThread {
    fn schedule_on_monitored_thread(&self, task: Task) {
        let Some(tx) = &self.tx else { return };
        if tx.send(task).is_err() {
            warn!("monitored thread is gone, task dropped");
        }
    }
}

impl Drop for MonitoredThread {
    fn drop(&mut self) {
        // Closing the queue lets the thread finish what is already queued.
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("monitored thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_tasks_run_in_order_on_named_thread() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let thread = MonitoredThread::spawn("ui").unwrap();

        for i in 0..5 {
            let seen = Arc::clone(&seen);
            thread.run(move || {
                let name = thread::current().name().map(str::to_string);
                seen.lock().unwrap().push((i, name));
            });
        }
        drop(thread);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        for (expected, (i, name)) in seen.iter().enumerate() {
            assert_eq!(*i, expected);
            assert_eq!(name.as_deref(), Some("ui"));
        }
    }

    #[test]
    fn test_drop_runs_queued_work() {
        let count = Arc::new(AtomicUsize::new(0));
        let thread = MonitoredThread::spawn("ui").unwrap();
        for _ in 0..100 {
            let count = Arc::clone(&count);
            thread.run(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(thread);
        assert_eq!(count.load(Ordering::SeqCst), 100);
    }
}
