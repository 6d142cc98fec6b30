use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A classic counting semaphore built on a `Mutex` + `Condvar`.
///
/// [`ConnectionFactory`](crate::connection_factory::ConnectionFactory) uses
/// one of these to let a single thread block until *any* of several
/// connections' queues has a packet ready, without polling each queue in
/// turn: every queue's push notifies the same semaphore.
pub struct Semaphore {
    count: Mutex<u64>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new(initial: u64) -> Semaphore {
        Semaphore {
            count: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }

    /// Increment the count and wake one waiter.
    pub fn notify(&self) {
        {
            let mut count = self.count.lock().unwrap();
            *count += 1;
        }
        self.cv.notify_one();
    }

    /// Block until the count is positive, then decrement it.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cv.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Block until the count is positive or `timeout` elapses. Returns
    /// `true` and decrements the count on success, `false` on timeout.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.wait_until(Instant::now() + timeout)
    }

    /// Block until the count is positive or `deadline` passes. Returns
    /// `true` and decrements the count on success, `false` on timeout.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut count = self.count.lock().unwrap();
        loop {
            if *count > 0 {
                *count -= 1;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.cv.wait_timeout(count, deadline - now).unwrap();
            count = guard;
            if result.timed_out() && *count == 0 {
                return false;
            }
        }
    }
}
