//! One worker thread draining a deadline-ordered message queue.
//!
//! Every long-lived collaborator (the engine, each decoder, the renderer,
//! the driver's notification pump) owns exactly one `Looper`. Handlers
//! never call each other's methods directly across thread boundaries; they
//! post `Message`s and the looper dispatches them to a [`Handler`] in
//! program order among equal deadlines, and in deadline order otherwise —
//! mirroring `foundation/Looper`'s `ALooperRoster`-free, single-queue-per-
//! handler design.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::trace;

use crate::error::LooperError;
use crate::message::{HandlerId, Message, ReplyToken};

/// Implemented by whatever logic a looper's thread should run on each
/// dispatched message. `on_message` runs on the looper's own thread; it
/// must not block on another looper's reply without going through
/// [`ReplyToken`], or the two loopers can deadlock each other.
pub trait Handler: Send {
    fn on_message(&mut self, msg: Message);
}

struct QueuedMessage(Message, u64);

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline && self.1 == other.1
    }
}
impl Eq for QueuedMessage {}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; invert so the earliest deadline (and,
        // among ties, the lowest sequence number — i.e. FIFO) pops first.
        other
            .0
            .deadline
            .cmp(&self.0.deadline)
            .then_with(|| other.1.cmp(&self.1))
    }
}

struct Shared {
    queue: Mutex<BinaryHeap<QueuedMessage>>,
    cond: Condvar,
    stopping: AtomicBool,
}

/// A handle to a running looper. Cloning shares the same underlying thread
/// and queue; dropping all handles does not stop the thread — call
/// [`Looper::stop`] explicitly, matching the original's explicit
/// `start()`/`stop()` lifecycle rather than an RAII-joins-on-drop one,
/// since handlers frequently outlive any single reference to their looper.
pub struct Looper {
    id: HandlerId,
    shared: Arc<Shared>,
    seq: AtomicU64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Looper {
    /// Spawn a worker thread running `handler.on_message` for every message
    /// whose deadline has elapsed, in deadline/FIFO order.
    pub fn spawn(name: &str, mut handler: Box<dyn Handler>) -> Arc<Self> {
        let id = HandlerId::next();
        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            cond: Condvar::new(),
            stopping: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let thread_name = name.to_string();
        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run_loop(&worker_shared, handler.as_mut(), &thread_name))
            .expect("failed to spawn looper thread");

        Arc::new(Self {
            id,
            shared,
            seq: AtomicU64::new(0),
            join: Mutex::new(Some(join)),
        })
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Enqueue `msg` to fire after `delay` (zero for "as soon as possible").
    /// Returns [`LooperError::TargetGone`] once [`Looper::stop`] has been
    /// called; the caller should treat this the same as the original
    /// treats `post()` on a dead looper — a silent no-op from the sender's
    /// point of view, reported here so tests can assert on it.
    pub fn post(&self, mut msg: Message, delay: Duration) -> Result<(), LooperError> {
        if self.shared.stopping.load(Ordering::Acquire) {
            return Err(LooperError::TargetGone);
        }
        msg.deadline = Instant::now() + delay;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut queue = self.shared.queue.lock().unwrap();
        queue.push(QueuedMessage(msg, seq));
        self.shared.cond.notify_one();
        Ok(())
    }

    /// Enqueue `msg` for immediate (next-iteration) dispatch.
    pub fn post_now(&self, msg: Message) -> Result<(), LooperError> {
        self.post(msg, Duration::ZERO)
    }

    /// Create a fresh one-shot reply mailbox for a synchronous call.
    pub fn create_reply_token() -> ReplyToken {
        ReplyToken::new()
    }

    /// Stop dispatching after the current message, drop all queued
    /// messages and join the worker thread. Idempotent.
    pub fn stop(&self) {
        if self.shared.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.clear();
        }
        self.shared.cond.notify_all();
        if let Some(handle) = self.join.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Looper {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: &Shared, handler: &mut dyn Handler, name: &str) {
    loop {
        let msg = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if shared.stopping.load(Ordering::Acquire) {
                    return;
                }
                match queue.peek() {
                    None => {
                        queue = shared.cond.wait(queue).unwrap();
                    }
                    Some(head) => {
                        let now = Instant::now();
                        if head.0.deadline <= now {
                            break queue.pop().unwrap().0;
                        }
                        let wait_for = head.0.deadline - now;
                        let (guard, _) = shared.cond.wait_timeout(queue, wait_for).unwrap();
                        queue = guard;
                    }
                }
            }
        };
        trace!("{name}: dispatching what={}", msg.what);
        handler.on_message(msg);
    }
}
