//! Waiter queues for `memory.atomic.wait` and `memory.atomic.notify`.
//!
//! Waiters are keyed by the absolute address of the memory word. Each
//! waiter parks on its own condvar, so `notify n` can wake exactly `n`
//! threads in FIFO order without thundering-herd wakeups.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// The outcome of an atomic wait, with the values the wasm instruction
/// returns.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum WaitResult {
    /// Woken by a notify.
    Ok = 0,
    /// The value at the address did not match the expected value.
    Mismatch = 1,
    /// The timeout expired.
    TimedOut = 2,
}

struct Waiter {
    notified: Mutex<bool>,
    condvar: Condvar,
}

/// A table of parked threads.
#[derive(Default)]
pub struct ParkingSpot {
    waiters: Mutex<HashMap<usize, VecDeque<Arc<Waiter>>>>,
}

impl ParkingSpot {
    pub fn new() -> ParkingSpot {
        ParkingSpot::default()
    }

    /// `memory.atomic.wait32` on the word at `addr`.
    pub fn wait32(
        &self,
        addr: &AtomicU32,
        expected: u32,
        timeout: Option<Duration>,
    ) -> WaitResult {
        self.wait(addr.as_ptr() as usize, timeout, || {
            addr.load(Ordering::SeqCst) == expected
        })
    }

    /// `memory.atomic.wait64` on the word at `addr`.
    pub fn wait64(
        &self,
        addr: &AtomicU64,
        expected: u64,
        timeout: Option<Duration>,
    ) -> WaitResult {
        self.wait(addr.as_ptr() as usize, timeout, || {
            addr.load(Ordering::SeqCst) == expected
        })
    }

    fn wait(
        &self,
        key: usize,
        timeout: Option<Duration>,
        validate: impl FnOnce() -> bool,
    ) -> WaitResult {
        let deadline = timeout.map(|t| Instant::now() + t);
        let waiter = Arc::new(Waiter {
            notified: Mutex::new(false),
            condvar: Condvar::new(),
        });

        {
            let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
            // The value check happens while holding the table lock, so a
            // concurrent write-then-notify cannot slip between the check
            // and the enqueue.
            if !validate() {
                return WaitResult::Mismatch;
            }
            waiters.entry(key).or_default().push_back(waiter.clone());
        }

        let mut notified = waiter.notified.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if *notified {
                return WaitResult::Ok;
            }
            match deadline {
                None => {
                    notified = waiter
                        .condvar
                        .wait(notified)
                        .unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _timeout) = waiter
                        .condvar
                        .wait_timeout(notified, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    notified = guard;
                }
            }
        }
        drop(notified);

        // Timed out: dequeue ourselves unless a notify got there first.
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(queue) = waiters.get_mut(&key) {
            if let Some(position) = queue.iter().position(|w| Arc::ptr_eq(w, &waiter)) {
                queue.remove(position);
                if queue.is_empty() {
                    waiters.remove(&key);
                }
                return WaitResult::TimedOut;
            }
        }
        WaitResult::Ok
    }

    /// `memory.atomic.notify`: wakes up to `count` waiters parked on
    /// `key`, returning how many were woken.
    pub fn notify(&self, key: usize, count: u32) -> u32 {
        let mut woken = 0;
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(queue) = waiters.get_mut(&key) {
            while woken < count {
                let waiter = match queue.pop_front() {
                    Some(waiter) => waiter,
                    None => break,
                };
                let mut notified = waiter.notified.lock().unwrap_or_else(|e| e.into_inner());
                *notified = true;
                waiter.condvar.notify_one();
                woken += 1;
            }
            if queue.is_empty() {
                waiters.remove(&key);
            }
        }
        woken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn mismatch_returns_immediately() {
        let spot = ParkingSpot::new();
        let word = AtomicU32::new(1);
        assert_eq!(spot.wait32(&word, 0, None), WaitResult::Mismatch);
    }

    #[test]
    fn timeout_expires() {
        let spot = ParkingSpot::new();
        let word = AtomicU32::new(0);
        let result = spot.wait32(&word, 0, Some(Duration::from_millis(10)));
        assert_eq!(result, WaitResult::TimedOut);
    }

    #[test]
    fn notify_wakes_waiter() {
        let spot = Arc::new(ParkingSpot::new());
        let word = Arc::new(AtomicU32::new(0));
        let thread = {
            let spot = spot.clone();
            let word = word.clone();
            std::thread::spawn(move || spot.wait32(&word, 0, None))
        };
        let key = word.as_ptr() as usize;
        // Spin until the waiter has parked.
        while spot.notify(key, 1) == 0 {
            std::thread::yield_now();
        }
        assert_eq!(thread.join().unwrap(), WaitResult::Ok);
    }

    #[test]
    fn notify_counts_woken() {
        let spot = ParkingSpot::new();
        assert_eq!(spot.notify(0x1000, 4), 0);
    }
}
