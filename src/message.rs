//! The envelope every looper posts, schedules and dispatches.
//!
//! A `Message` carries a `what` tag (the meaning is owned by the receiving
//! handler), a small bag of scalar/opaque payload slots, a target handler,
//! an optional reply token, and a deadline the looper's queue orders on.
//! This mirrors `foundation/Message`/`foundation/Looper` from the actor the
//! spec describes: handlers never call each other directly, they only ever
//! exchange `Message`s through a `Looper`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::LooperError;
use crate::format::{Format, Packet};

/// Opaque, cheaply-cloneable payload slot.
///
/// Scalars copy; `Bytes`/`Format`/`Packet` are reference-counted or owned
/// buffers that move rather than deep-copy on `dup()`, matching the
/// original's distinction between by-value and by-object message arguments.
#[derive(Debug, Clone)]
pub enum Payload {
    Int(i32),
    Long(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Bytes(Bytes),
    Format(Format),
    Packet(Packet),
}

impl Payload {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Payload::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Payload::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Payload::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Payload::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Monotonically increasing id handed out by [`HandlerId::next`].
///
/// Used both to identify registered handlers and as the generation tag a
/// handler stamps into outgoing messages, so a looper can drop messages
/// addressed to a stale incarnation of itself (e.g. a decoder that was
/// torn down and re-created for the same track).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(pub u64);

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

impl HandlerId {
    pub fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// One-shot mailbox for a synchronous request/reply round trip.
///
/// `awaitResponse` blocks on a condition variable distinct from the
/// looper's main event queue condition, so a reply can be delivered from
/// another thread without racing the handler that is still draining its
/// queue.
pub struct ReplyToken {
    inner: Arc<ReplyInner>,
}

struct ReplyInner {
    lock: Mutex<Option<Message>>,
    cond: Condvar,
}

impl fmt::Debug for ReplyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyToken").finish_non_exhaustive()
    }
}

impl Clone for ReplyToken {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ReplyToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ReplyInner {
                lock: Mutex::new(None),
                cond: Condvar::new(),
            }),
        }
    }

    /// Deliver `reply`, waking exactly one waiter. Idempotent only in the
    /// sense that a second call overwrites the mailbox; a handler must post
    /// a reply to a given token at most once.
    pub fn post_reply(&self, reply: Message) {
        let mut slot = self.inner.lock.lock().unwrap();
        *slot = Some(reply);
        self.inner.cond.notify_all();
    }

    /// Block until a reply arrives or `timeout` elapses.
    pub fn await_response(&self, timeout: Option<Duration>) -> Result<Message, LooperError> {
        let mut slot = self.inner.lock.lock().unwrap();
        loop {
            if let Some(msg) = slot.take() {
                return Ok(msg);
            }
            match timeout {
                None => slot = self.inner.cond.wait(slot).unwrap(),
                Some(d) => {
                    let (guard, result) = self.inner.cond.wait_timeout(slot, d).unwrap();
                    slot = guard;
                    if result.timed_out() && slot.is_none() {
                        return Err(LooperError::NoReply);
                    }
                }
            }
        }
    }
}

impl Default for ReplyToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A scheduled unit of work addressed to a [`crate::looper::Looper`].
///
/// `deadline` is absolute; `Looper::post` with a relative delay computes it
/// at enqueue time. `generation` lets a handler stamp its current
/// incarnation number so it can cheaply reject messages meant for an
/// earlier one (see `Engine`'s per-decoder generation counters).
#[derive(Clone)]
pub struct Message {
    pub what: i32,
    pub target: HandlerId,
    pub generation: u64,
    pub deadline: Instant,
    pub reply_to: Option<ReplyToken>,
    payload: HashMap<&'static str, Payload>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("what", &self.what)
            .field("target", &self.target)
            .field("generation", &self.generation)
            .field("has_reply_to", &self.reply_to.is_some())
            .field("payload_keys", &self.payload.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Message {
    pub fn new(what: i32, target: HandlerId) -> Self {
        Self {
            what,
            target,
            generation: 0,
            deadline: Instant::now(),
            reply_to: None,
            payload: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn set(mut self, key: &'static str, value: Payload) -> Self {
        self.payload.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Payload> {
        self.payload.get(key)
    }

    pub fn take(&mut self, key: &str) -> Option<Payload> {
        self.payload.remove(key)
    }

    /// A reply message addressed back to whoever sent `self`, if any.
    pub fn new_reply(&self, what: i32) -> Message {
        Message::new(what, self.target)
    }

    /// Shallow clone: scalar payload values copy, `Bytes`/`Format`/`Packet`
    /// share their underlying storage rather than deep-copying it. Matches
    /// `Message::dup()`'s "copy the envelope, not the media" semantics.
    #[must_use]
    pub fn dup(&self) -> Message {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrips_scalars() {
        let msg = Message::new(1, HandlerId::next())
            .set("count", Payload::Int(7))
            .set("rate", Payload::Float(1.5));
        assert_eq!(msg.get("count").unwrap().as_i32(), Some(7));
        assert_eq!(msg.get("rate").unwrap().as_f64(), Some(1.5));
        assert!(msg.get("missing").is_none());
    }

    #[test]
    fn reply_token_delivers_across_threads() {
        let token = ReplyToken::new();
        let sender = token.clone();
        let target = HandlerId::next();
        std::thread::spawn(move || {
            sender.post_reply(Message::new(99, target));
        });
        let reply = token.await_response(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(reply.what, 99);
    }

    #[test]
    fn await_response_times_out_without_reply() {
        let token = ReplyToken::new();
        let err = token.await_response(Some(Duration::from_millis(10)));
        assert!(matches!(err, Err(LooperError::NoReply)));
    }

    #[test]
    fn dup_shares_bytes_storage() {
        let buf = Bytes::from_static(b"abc");
        let msg = Message::new(1, HandlerId::next()).set("buf", Payload::Bytes(buf.clone()));
        let copy = msg.dup();
        match copy.get("buf").unwrap() {
            Payload::Bytes(b) => assert_eq!(b.as_ptr(), buf.as_ptr()),
            _ => panic!("expected bytes"),
        }
    }
}
