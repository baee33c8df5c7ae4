//! Bookkeeping for running scripts: live process groups and launch slots

use libc;

use std::collections::HashSet;
use std::io;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Sends `SIGKILL` to every process in group `pgid`
pub fn kill_group(pgid: u32) -> io::Result<()> {
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    }
    else {
        Err(io::Error::last_os_error())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The process groups of scripts currently running, so shutdown can kill
/// them
#[derive(Debug, Default)]
pub struct ProcessTracker {
    groups: Mutex<HashSet<u32>>
}

impl ProcessTracker {
    pub fn new() -> ProcessTracker {
        ProcessTracker { groups: Mutex::new(HashSet::new()) }
    }

    /// Tracks `pgid` until the returned guard is dropped
    pub fn register(&self, pgid: u32) -> Registration {
        lock(&self.groups).insert(pgid);
        Registration { tracker: self, pgid }
    }

    pub fn len(&self) -> usize {
        lock(&self.groups).len()
    }

    /// Kills every tracked group
    pub fn kill_all(&self) {
        let groups = lock(&self.groups);
        for &pgid in groups.iter() {
            match kill_group(pgid) {
                Ok(()) => info!("Killed CGI process group {}", pgid),
                Err(e) => debug!("Could not kill process group {}: {}", pgid, e)
            }
        }
    }
}

pub struct Registration<'a> {
    tracker: &'a ProcessTracker,
    pgid: u32
}

impl<'a> Drop for Registration<'a> {
    fn drop(&mut self) {
        lock(&self.tracker.groups).remove(&self.pgid);
    }
}

/// A counting semaphore bounding how many scripts run at once
#[derive(Debug)]
pub struct Slots {
    available: Mutex<usize>,
    freed: Condvar
}

impl Slots {
    pub fn new(count: usize) -> Slots {
        Slots {
            available: Mutex::new(count),
            freed: Condvar::new()
        }
    }

    /// Waits for a free slot until `deadline`; `None` if none came up
    pub fn acquire(&self, deadline: Instant) -> Option<Slot> {
        let mut available = lock(&self.available);

        while *available == 0 {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            available = self.freed.wait_timeout(available, deadline - now)
                .unwrap_or_else(PoisonError::into_inner).0;
        }

        *available -= 1;
        Some(Slot { slots: self })
    }
}

/// A held launch slot, released on drop
pub struct Slot<'a> {
    slots: &'a Slots
}

impl<'a> Drop for Slot<'a> {
    fn drop(&mut self) {
        *lock(&self.slots.available) += 1;
        self.slots.freed.notify_one();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn registrations_are_released() {
        let tracker = ProcessTracker::new();
        {
            let _a = tracker.register(1_000_001);
            let _b = tracker.register(1_000_002);
            assert_eq!(tracker.len(), 2);
        }
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn slots_time_out_when_exhausted() {
        let slots = Slots::new(1);
        let held = slots.acquire(Instant::now() + Duration::from_secs(1));
        assert!(held.is_some());

        let start = Instant::now();
        assert!(slots.acquire(start + Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));

        drop(held);
        assert!(slots.acquire(Instant::now() + Duration::from_secs(1)).is_some());
    }

    #[test]
    fn waiting_for_a_slot_wakes_on_release() {
        let slots = Arc::new(Slots::new(1));
        let held = slots.acquire(Instant::now() + Duration::from_secs(1));

        let waiter = {
            let slots = slots.clone();
            thread::spawn(move || {
                slots.acquire(Instant::now() + Duration::from_secs(10)).is_some()
            })
        };

        thread::sleep(Duration::from_millis(50));
        drop(held);
        assert!(waiter.join().unwrap());
    }
}
