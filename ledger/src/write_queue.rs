//! Serialization of the ledger's write transactions.
//!
//! The block processor and the cementer both write to the store. Each
//! acquires a [`WriteGuard`] for its [`Writer`] before committing, and the
//! queue hands out guards one at a time in arrival order.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// Distinct areas where write locking is done. Order is irrelevant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Writer {
    ConfirmationHeight,
    ProcessBatch,
    /// Used in tests to emulate a write lock.
    Testing,
}

/// Held while writing. Dropping it lets the next queued writer proceed.
pub struct WriteGuard {
    guard_finish_callback: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl WriteGuard {
    fn new(guard_finish_callback: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self {
            guard_finish_callback: Some(guard_finish_callback),
        }
    }

    pub fn release(&mut self) {
        if let Some(callback) = self.guard_finish_callback.take() {
            callback();
        }
    }

    pub fn is_owned(&self) -> bool {
        self.guard_finish_callback.is_some()
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.release();
    }
}

struct WriteQueueData {
    queue: Mutex<VecDeque<Writer>>,
    condition: Condvar,
}

pub struct WriteQueue {
    data: Arc<WriteQueueData>,
    guard_finish_callback: Arc<dyn Fn() + Send + Sync>,
}

impl WriteQueue {
    pub fn new() -> Self {
        let data = Arc::new(WriteQueueData {
            queue: Mutex::new(VecDeque::new()),
            condition: Condvar::new(),
        });

        let data_clone = Arc::clone(&data);

        Self {
            data,
            guard_finish_callback: Arc::new(move || {
                data_clone.queue.lock().unwrap().pop_front();
                data_clone.condition.notify_all();
            }),
        }
    }

    /// Blocks until `writer` is at the head of the queue. Other writers wait
    /// until the returned guard is dropped.
    pub fn wait(&self, writer: Writer) -> WriteGuard {
        let mut queue = self.data.queue.lock().unwrap();
        debug_assert!(queue.iter().all(|w| *w != writer));

        if !queue.contains(&writer) {
            queue.push_back(writer);
        }

        let _queue = self
            .data
            .condition
            .wait_while(queue, |queue| queue.front() != Some(&writer))
            .unwrap();

        self.create_write_guard()
    }

    /// Returns a guard if `writer` is at the front of the queue. Otherwise
    /// the writer stays queued and `None` is returned.
    pub fn try_lock(&self, writer: Writer) -> Option<WriteGuard> {
        if self.process(writer) {
            Some(self.pop())
        } else {
            None
        }
    }

    /// Enqueue `writer` if it is not already waiting. True if it is now at the front.
    pub fn process(&self, writer: Writer) -> bool {
        let mut queue = self.data.queue.lock().unwrap();
        if !queue.contains(&writer) {
            queue.push_back(writer);
        }
        queue.front() == Some(&writer)
    }

    /// True if `writer` is anywhere in the queue.
    pub fn contains(&self, writer: Writer) -> bool {
        self.data.queue.lock().unwrap().contains(&writer)
    }

    /// Doesn't actually pop anything until the returned guard is dropped.
    pub fn pop(&self) -> WriteGuard {
        self.create_write_guard()
    }

    fn create_write_guard(&self) -> WriteGuard {
        WriteGuard::new(Arc::clone(&self.guard_finish_callback))
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn guard_release_admits_next_writer() {
        let queue = WriteQueue::new();
        let guard = queue.wait(Writer::ProcessBatch);
        assert!(guard.is_owned());

        assert!(queue.try_lock(Writer::ConfirmationHeight).is_none());
        assert!(queue.contains(Writer::ConfirmationHeight));

        drop(guard);
        let guard = queue.try_lock(Writer::ConfirmationHeight);
        assert!(guard.is_some());
        drop(guard);
        assert!(!queue.contains(Writer::ConfirmationHeight));
    }

    #[test]
    fn wait_blocks_until_front() {
        let queue = Arc::new(WriteQueue::new());
        let guard = queue.wait(Writer::Testing);
        let acquired = Arc::new(AtomicBool::new(false));

        let handle = {
            let queue = Arc::clone(&queue);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _guard = queue.wait(Writer::ConfirmationHeight);
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(guard);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn released_guard_is_not_owned() {
        let queue = WriteQueue::new();
        let mut guard = queue.wait(Writer::Testing);
        guard.release();
        assert!(!guard.is_owned());
        assert!(!queue.contains(Writer::Testing));
    }
}
