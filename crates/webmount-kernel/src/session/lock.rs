//! Writer-preferring async read/write lock with upgrade and downgrade.
//!
//! The lock guards no data of its own. The session keeps its cookie jar and
//! credentials in short-lived mutexes and uses this lock to decide *who* may
//! touch them: readers may merge cookies, only a writer may clear or replace
//! the jar or change credentials.
//!
//! Rules:
//! - any number of readers while no writer is pending or active;
//! - a pending writer blocks new readers but waits for active ones;
//! - upgrade (reader → writer) and downgrade (writer → reader) switch modes
//!   under the internal mutex, so no other writer slips in between.
//!
//! Holds are RAII guards. Holding a mode twice from the same task deadlocks;
//! that is a usage error, not something the lock detects.

use parking_lot::Mutex;
use std::fmt;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    /// Pending plus active writers.
    writers: usize,
    writing: bool,
}

/// Async read/write lock with writer preference and mode switching.
#[derive(Default)]
pub struct UpgradableRwLock {
    state: Mutex<LockState>,
    changed: Notify,
}

impl fmt::Debug for UpgradableRwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("UpgradableRwLock")
            .field("readers", &state.readers)
            .field("writers", &state.writers)
            .field("writing", &state.writing)
            .finish()
    }
}

impl UpgradableRwLock {
    /// Create an unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a shared hold.
    pub async fn read(&self) -> ReadHold<'_> {
        self.wait_until(|s| {
            if s.writers == 0 {
                s.readers += 1;
                true
            } else {
                false
            }
        })
        .await;
        ReadHold { lock: self }
    }

    /// Acquire an exclusive hold.
    pub async fn write(&self) -> WriteHold<'_> {
        self.state.lock().writers += 1;
        let pending = PendingWriter { lock: self };
        self.claim_write().await;
        pending.into_active()
    }

    /// Current number of active readers.
    pub fn reader_count(&self) -> usize {
        self.state.lock().readers
    }

    /// Returns true while a writer holds the lock.
    pub fn is_writing(&self) -> bool {
        self.state.lock().writing
    }

    async fn claim_write(&self) {
        self.wait_until(|s| {
            if s.readers == 0 && !s.writing {
                s.writing = true;
                true
            } else {
                false
            }
        })
        .await;
    }

    /// Wait until `try_take` succeeds under the internal mutex.
    async fn wait_until(&self, mut try_take: impl FnMut(&mut LockState) -> bool) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the
            // await is not lost.
            notified.as_mut().enable();
            if try_take(&mut self.state.lock()) {
                return;
            }
            notified.await;
        }
    }

    fn release_read(&self) {
        let mut state = self.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            drop(state);
            self.changed.notify_waiters();
        }
    }

    fn release_write(&self) {
        {
            let mut state = self.state.lock();
            state.writers -= 1;
            state.writing = false;
        }
        self.changed.notify_waiters();
    }
}

/// A shared hold. Released on drop.
#[must_use = "the hold is released as soon as it is dropped"]
pub struct ReadHold<'a> {
    lock: &'a UpgradableRwLock,
}

impl<'a> ReadHold<'a> {
    /// Trade this shared hold for an exclusive one.
    ///
    /// The reader slot is released and the writer registered in one step, so
    /// new readers are blocked from that moment on. Other readers that were
    /// already active finish first.
    pub async fn upgrade(self) -> WriteHold<'a> {
        let lock = self.lock;
        std::mem::forget(self);
        {
            let mut state = lock.state.lock();
            state.readers -= 1;
            state.writers += 1;
        }
        lock.changed.notify_waiters();
        let pending = PendingWriter { lock };
        lock.claim_write().await;
        pending.into_active()
    }
}

impl Drop for ReadHold<'_> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

impl fmt::Debug for ReadHold<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReadHold")
    }
}

/// An exclusive hold. Released on drop.
#[must_use = "the hold is released as soon as it is dropped"]
pub struct WriteHold<'a> {
    lock: &'a UpgradableRwLock,
}

impl<'a> WriteHold<'a> {
    /// Trade this exclusive hold for a shared one without a gap.
    pub fn downgrade(self) -> ReadHold<'a> {
        let lock = self.lock;
        std::mem::forget(self);
        {
            let mut state = lock.state.lock();
            state.writers -= 1;
            state.writing = false;
            state.readers += 1;
        }
        lock.changed.notify_waiters();
        ReadHold { lock }
    }
}

impl Drop for WriteHold<'_> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

impl fmt::Debug for WriteHold<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WriteHold")
    }
}

/// Registered-but-not-yet-active writer; unregisters if the wait is cancelled.
struct PendingWriter<'a> {
    lock: &'a UpgradableRwLock,
}

impl<'a> PendingWriter<'a> {
    fn into_active(self) -> WriteHold<'a> {
        let lock = self.lock;
        std::mem::forget(self);
        WriteHold { lock }
    }
}

impl Drop for PendingWriter<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.lock.state.lock();
            state.writers -= 1;
        }
        self.lock.changed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_many_readers() {
        let lock = UpgradableRwLock::new();
        let a = lock.read().await;
        let b = lock.read().await;
        assert_eq!(lock.reader_count(), 2);
        drop(a);
        drop(b);
        assert_eq!(lock.reader_count(), 0);
    }

    #[tokio::test]
    async fn test_writer_waits_for_readers() {
        let lock = Arc::new(UpgradableRwLock::new());
        let reader = lock.read().await;

        let acquired = Arc::new(AtomicBool::new(false));
        let task = {
            let lock = lock.clone();
            let acquired = acquired.clone();
            tokio::spawn(async move {
                let _w = lock.write().await;
                acquired.store(true, Ordering::SeqCst);
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!acquired.load(Ordering::SeqCst));
        drop(reader);
        task.await.unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_pending_writer_blocks_new_readers() {
        let lock = Arc::new(UpgradableRwLock::new());
        let first = lock.read().await;

        let writer = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let _w = lock.write().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let reader_in = Arc::new(AtomicBool::new(false));
        let reader = {
            let lock = lock.clone();
            let reader_in = reader_in.clone();
            tokio::spawn(async move {
                let _r = lock.read().await;
                reader_in.store(true, Ordering::SeqCst);
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!reader_in.load(Ordering::SeqCst));

        drop(first);
        writer.await.unwrap();
        reader.await.unwrap();
        assert!(reader_in.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_upgrade_and_downgrade() {
        let lock = UpgradableRwLock::new();
        let read = lock.read().await;
        let write = read.upgrade().await;
        assert!(lock.is_writing());
        assert_eq!(lock.reader_count(), 0);
        let read = write.downgrade();
        assert!(!lock.is_writing());
        assert_eq!(lock.reader_count(), 1);
        drop(read);
        assert_eq!(lock.reader_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_upgrades_do_not_deadlock() {
        let lock = Arc::new(UpgradableRwLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            let inside = inside.clone();
            tasks.push(tokio::spawn(async move {
                let read = lock.read().await;
                let write = read.upgrade().await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                drop(write.downgrade());
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(lock.reader_count(), 0);
        assert!(!lock.is_writing());
    }

    #[tokio::test]
    async fn test_cancelled_writer_unregisters() {
        let lock = UpgradableRwLock::new();
        let reader = lock.read().await;
        let attempt = tokio::time::timeout(Duration::from_millis(10), lock.write()).await;
        assert!(attempt.is_err());
        drop(reader);
        // A leaked pending writer would block this forever.
        let _again = lock.read().await;
    }
}
