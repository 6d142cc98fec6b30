use std::collections::BinaryHeap;
use std::cmp::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::packet::Packet;

/// A packet plus the `(priority, ticket)` key used to order it in the
/// [`PriorityQueue`].
struct QueuedPacket {
    packet: Arc<Packet>,
    priority: i16,
    ticket: u64,
}

/// Compare two ticket numbers as a wrapping 64-bit counter: `a` is
/// considered "earlier" (i.e. greater priority for our purposes, since the
/// queue should drain the earliest ticket first among equal priorities) iff
/// the wrapping difference `a - b` falls in the upper half of the range,
/// meaning `a` is "behind" `b` by less than half the counter space.
fn ticket_is_earlier(a: u64, b: u64) -> bool {
    a.wrapping_sub(b) > u64::MAX / 2
}

impl PartialEq for QueuedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.ticket == other.ticket
    }
}
impl Eq for QueuedPacket {}

impl PartialOrd for QueuedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedPacket {
    /// Ordering used by the max-heap `BinaryHeap`: higher priority is
    /// "greater"; on a tie, the earlier ticket is "greater" (so it is
    /// popped first).
    fn cmp(&self, other: &Self) -> Ordering {
        if self.priority != other.priority {
            return self.priority.cmp(&other.priority);
        }
        if self.ticket == other.ticket {
            return Ordering::Equal;
        }
        if ticket_is_earlier(self.ticket, other.ticket) {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }
}

struct State {
    queue: BinaryHeap<QueuedPacket>,
    ticket: u64,
    running: bool,
}

/// A threadsafe, FIFO-within-priority blocking queue of packets.
///
/// `pop` returns packets in non-increasing priority order; among packets of
/// equal priority it returns them in the order they were `push`ed, using a
/// wrap-safe comparison of the monotonically increasing ticket counter so
/// the queue tolerates the counter wrapping after `u64::MAX` pushes.
pub struct PriorityQueue {
    state: Mutex<State>,
    cv: Condvar,
    on_push: Box<dyn Fn() + Send + Sync>,
}

impl PriorityQueue {
    /// Construct an empty, running queue. `on_push` is called (outside of
    /// the queue's lock) once per successful `push`, used by
    /// [`ConnectionFactory`](crate::connection_factory::ConnectionFactory)
    /// to notify its shared semaphore.
    pub fn new<F>(on_push: F) -> PriorityQueue
    where
        F: Fn() + Send + Sync + 'static,
    {
        PriorityQueue {
            state: Mutex::new(State {
                queue: BinaryHeap::new(),
                ticket: 0,
                running: true,
            }),
            cv: Condvar::new(),
            on_push: Box::new(on_push),
        }
    }

    /// Construct an empty, running queue with no push notification.
    pub fn unnotified() -> PriorityQueue {
        PriorityQueue::new(|| {})
    }

    /// Enqueue `packet` with the given `priority`, stamping it onto the
    /// packet itself as well as the queue's ordering key.
    pub fn push(&self, packet: Arc<Packet>, priority: i16) {
        packet.set_priority(priority);
        {
            let mut state = self.state.lock().unwrap();
            let ticket = state.ticket;
            state.ticket = state.ticket.wrapping_add(1);
            state.queue.push(QueuedPacket {
                packet,
                priority,
                ticket,
            });
        }
        self.cv.notify_one();
        (self.on_push)();
    }

    /// Block up to `timeout` for a packet to become available, returning it
    /// or `None` on timeout or after [`shutdown`](Self::shutdown). A
    /// `timeout` of `Duration::ZERO` polls without blocking.
    pub fn pop(&self, timeout: Duration) -> Option<Arc<Packet>> {
        let mut state = self.state.lock().unwrap();
        if state.running && state.queue.is_empty() && !timeout.is_zero() {
            let (guard, _timeout_result) = self
                .cv
                .wait_timeout_while(state, timeout, |s| s.running && s.queue.is_empty())
                .unwrap();
            state = guard;
        }
        if state.running {
            state.queue.pop().map(|qp| qp.packet)
        } else {
            None
        }
    }

    /// Unblock all current and future waiters; `pop` will return `None`
    /// immediately from now on.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.running = false;
        }
        self.cv.notify_all();
    }
}
