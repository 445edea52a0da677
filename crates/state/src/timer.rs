//! Millisecond-granularity one-shot/repeating timer queue (§4.6).
//!
//! Grounded on the same single-dedicated-worker-thread idiom
//! `plugin::legacy`'s hook dispatcher and `runtime`'s reaper use elsewhere
//! in this core rather than pulling in `tokio::time`, since the supervisor's
//! concurrency model outside the runtime driver's own calls is OS threads
//! plus mutexes (§5), not an async runtime. A single background thread owns
//! a min-heap of pending deadlines; `cancel_timer` is a synchronization
//! point, except when invoked from inside the firing handler itself, where
//! that would deadlock against the very thread doing the cancelling.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Opaque handle returned by [`TimerQueue::start_timer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TimerId(u64);

type Handler = Box<dyn FnMut() -> bool + Send>;

struct Entry {
    handler: Handler,
    period: Option<Duration>,
    executing: bool,
}

struct State {
    next_id: u64,
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    entries: HashMap<u64, Entry>,
    shutdown: bool,
}

/// Owns the background timer thread. Dropping it stops the thread and drops
/// every still-pending handler without running it.
pub struct TimerQueue {
    state: Arc<Mutex<State>>,
    cv: Arc<Condvar>,
    worker: Option<thread::JoinHandle<()>>,
    worker_id: ThreadId,
}

impl TimerQueue {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(State {
            next_id: 1,
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
            shutdown: false,
        }));
        let cv = Arc::new(Condvar::new());

        let worker_state = state.clone();
        let worker_cv = cv.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        let worker = thread::Builder::new()
            .name("dobby-timers".into())
            .spawn(move || {
                tx.send(thread::current().id()).ok();
                Self::run(worker_state, worker_cv);
            })
            .expect("spawn timer worker thread");
        let worker_id = rx.recv().expect("timer worker reports its thread id");

        Self { state, cv, worker: Some(worker), worker_id }
    }

    fn run(state: Arc<Mutex<State>>, cv: Arc<Condvar>) {
        loop {
            let mut guard = state.lock().unwrap();
            if guard.shutdown {
                return;
            }
            let now = Instant::now();
            let wait_until = match guard.heap.peek() {
                None => None,
                Some(Reverse((deadline, _))) if *deadline <= now => None,
                Some(Reverse((deadline, _))) => Some(*deadline),
            };

            let (mut guard, _timed_out) = match wait_until {
                None if guard.heap.is_empty() => {
                    let (g, _) = cv.wait_timeout(guard, Duration::from_secs(3600)).unwrap();
                    (g, false)
                }
                None => (guard, false),
                Some(deadline) => {
                    let dur = deadline.saturating_duration_since(now);
                    cv.wait_timeout(guard, dur).unwrap()
                }
            };

            if guard.shutdown {
                return;
            }

            let due = matches!(
                guard.heap.peek(),
                Some(Reverse((deadline, _))) if *deadline <= Instant::now()
            );
            if !due {
                continue;
            }
            let Reverse((_, id)) = guard.heap.pop().unwrap();
            let entry = match guard.entries.get_mut(&id) {
                Some(e) => e,
                None => continue, // cancelled between scheduling and firing
            };
            entry.executing = true;
            let mut handler = std::mem::replace(&mut entry.handler, Box::new(|| false));
            drop(guard);

            let keep_going = handler();

            let mut guard = state.lock().unwrap();
            match guard.entries.get_mut(&id) {
                None => {} // cancelled mid-flight; cancel_timer already removed it
                Some(entry) => {
                    entry.executing = false;
                    entry.handler = handler;
                    match entry.period {
                        Some(period) if keep_going => {
                            let next = Instant::now() + period;
                            guard.heap.push(Reverse((next, id)));
                        }
                        _ => {
                            guard.entries.remove(&id);
                        }
                    }
                }
            }
            cv.notify_all();
        }
    }

    /// Schedules `handler` to run once after `delay`.
    pub fn start_one_shot<F>(&self, delay: Duration, handler: F) -> TimerId
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.schedule(delay, None, Box::new(handler))
    }

    /// Schedules `handler` to run every `period`, starting after the first
    /// `period` elapses. Stops re-arming once `handler` returns `false`,
    /// equivalent to an implicit `cancel_timer` from inside the handler.
    pub fn start_repeating<F>(&self, period: Duration, handler: F) -> TimerId
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.schedule(period, Some(period), Box::new(handler))
    }

    fn schedule(&self, delay: Duration, period: Option<Duration>, handler: Handler) -> TimerId {
        let mut guard = self.state.lock().unwrap();
        let id = guard.next_id;
        guard.next_id += 1;
        guard.entries.insert(id, Entry { handler, period, executing: false });
        guard.heap.push(Reverse((Instant::now() + delay, id)));
        drop(guard);
        self.cv.notify_all();
        TimerId(id)
    }

    /// Cancels `timer`. Returns `true` if it was pending or mid-flight and
    /// has now been removed, `false` if it had already fired (one-shot) or
    /// was unknown. Blocks until an in-flight handler finishes, unless
    /// called from inside that handler itself, in which case the call is
    /// rejected immediately (returns `false`) rather than deadlocking.
    pub fn cancel_timer(&self, timer: TimerId) -> bool {
        if thread::current().id() == self.worker_id {
            return false;
        }
        let mut guard = self.state.lock().unwrap();
        loop {
            match guard.entries.get(&timer.0) {
                None => return false,
                Some(entry) if !entry.executing => {
                    guard.entries.remove(&timer.0);
                    return true;
                }
                Some(_) => {
                    guard = self.cv.wait(guard).unwrap();
                }
            }
        }
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        {
            let mut guard = self.state.lock().unwrap();
            guard.shutdown = true;
        }
        self.cv.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn one_shot_fires_exactly_once() {
        let queue = TimerQueue::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        queue.start_one_shot(Duration::from_millis(10), move || {
            c.fetch_add(1, Ordering::SeqCst);
            false
        });
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeating_stops_when_handler_returns_false() {
        let queue = TimerQueue::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        queue.start_repeating(Duration::from_millis(10), move || {
            c.fetch_add(1, Ordering::SeqCst) < 2
        });
        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cancel_before_first_fire_prevents_the_handler_from_running() {
        let queue = TimerQueue::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let id = queue.start_one_shot(Duration::from_millis(200), move || {
            c.fetch_add(1, Ordering::SeqCst);
            false
        });
        assert!(queue.cancel_timer(id));
        thread::sleep(Duration::from_millis(300));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
