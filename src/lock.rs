//! # Single-Writer / Multi-Reader Lock
//!
//! Every set owns one of these (through the database's lock registry), and
//! a process-wide instance guards the root tree and the commit transition.
//! Multiple readers proceed concurrently; a writer excludes readers and
//! other writers.
//!
//! ## Fairness
//!
//! Preference alternates between queued readers and queued writers on each
//! writer exit. While preference is with writers and a writer is queued,
//! arriving readers wait — so a steady reader stream cannot starve writers,
//! and the flip on writer exit keeps a writer stream from starving readers.
//!
//! Guards release on drop. The lock is not reentrant: a thread acquiring
//! the same lock twice (write-then-anything, or read-then-write) deadlocks,
//! as does upgrading. Callers hold these locks for short, bounded critical
//! sections.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LockState {
    active_readers: usize,
    writer_active: bool,
    waiting_readers: usize,
    waiting_writers: usize,
    prefer_writers: bool,
}

#[derive(Debug, Default)]
pub struct OneWriterLock {
    state: Mutex<LockState>,
    readers: Condvar,
    writers: Condvar,
}

impl OneWriterLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> ReadGuard<'_> {
        let mut state = self.state.lock();
        while state.writer_active || (state.prefer_writers && state.waiting_writers > 0) {
            state.waiting_readers += 1;
            self.readers.wait(&mut state);
            state.waiting_readers -= 1;
        }
        state.active_readers += 1;
        ReadGuard { lock: self }
    }

    pub fn write(&self) -> WriteGuard<'_> {
        let mut state = self.state.lock();
        while state.writer_active || state.active_readers > 0 {
            state.waiting_writers += 1;
            self.writers.wait(&mut state);
            state.waiting_writers -= 1;
        }
        state.writer_active = true;
        WriteGuard { lock: self }
    }

    fn release_read(&self) {
        let mut state = self.state.lock();
        state.active_readers -= 1;
        if state.active_readers == 0 {
            self.writers.notify_one();
        }
    }

    fn release_write(&self) {
        let mut state = self.state.lock();
        state.writer_active = false;
        state.prefer_writers = !state.prefer_writers;
        drop(state);
        // Wake both classes; the reader gate re-checks preference, and a
        // woken writer re-checks for active readers.
        self.readers.notify_all();
        self.writers.notify_one();
    }
}

pub struct ReadGuard<'a> {
    lock: &'a OneWriterLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

pub struct WriteGuard<'a> {
    lock: &'a OneWriterLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}
