//! Anchored media-time ↔ real-time conversion under a variable playback
//! rate, translated near-verbatim from `foundation/MediaClock`'s algorithm
//! into checked Rust arithmetic.
//!
//! The clock holds one anchor point (a media time that corresponded to a
//! real time, as of the last `update_anchor`), a playback rate, and a set
//! of pending timers. Everything else — `media_time`, `real_time_for` — is
//! derived from that anchor by linear extrapolation at the current rate.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ClockError;
use crate::message::{HandlerId, Message, Payload};

/// Anchor updates that move the derived `now_media` by less than this are
/// noise (e.g. audio sink latency jitter) and are dropped rather than
/// shifting the anchor, matching `kAnchorFluctuationAllowedUs` — made
/// tunable via [`crate::config::EngineConfig::anchor_fluctuation_us`]
/// rather than hard-coded.
pub const DEFAULT_ANCHOR_FLUCTUATION_US: i64 = 10_000;

/// Why a timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerReason {
    /// The clock reached the timer's target media time.
    Reached,
    /// The clock was reset or re-anchored in a way that invalidates the
    /// timer's originally scheduled real time; the caller should
    /// recompute and re-add it if still needed.
    Reset,
}

struct PendingTimer {
    target: HandlerId,
    what: i32,
    media_time_us: i64,
    /// Extra real-time delay layered on top of the computed fire time
    /// (e.g. "fire N ms before presentation to prime hardware").
    adjust_real_us: i64,
    generation: u64,
    seq: u64,
}

struct ScheduledTimer {
    real_time_us: i64,
    seq: u64,
    timer: PendingTimer,
}

impl PartialEq for ScheduledTimer {
    fn eq(&self, other: &Self) -> bool {
        self.real_time_us == other.real_time_us && self.seq == other.seq
    }
}
impl Eq for ScheduledTimer {}
impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .real_time_us
            .cmp(&self.real_time_us)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct State {
    anchor_media_us: Option<i64>,
    anchor_real_us: i64,
    max_media_us: i64,
    starting_media_us: i64,
    rate: f64,
    generation: u64,
    fluctuation_allowed_us: i64,
    timers: BinaryHeap<ScheduledTimer>,
}

/// Fired timers a caller should deliver as `Message`s to their targets.
/// Separated from the clock's internal lock so delivery never happens
/// while holding it.
pub struct FiredTimer {
    pub target: HandlerId,
    pub what: i32,
    pub reason: TimerReason,
    pub media_time_us: i64,
}

/// Thread-safe anchored clock. Cloning shares the same underlying state.
#[derive(Clone)]
pub struct MediaClock {
    state: Arc<Mutex<State>>,
    seq: Arc<AtomicU64>,
}

impl MediaClock {
    pub fn new(fluctuation_allowed_us: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                anchor_media_us: None,
                anchor_real_us: 0,
                max_media_us: i64::MAX,
                starting_media_us: 0,
                rate: 1.0,
                generation: 0,
                fluctuation_allowed_us,
                timers: BinaryHeap::new(),
            })),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Re-anchor the clock: media time `anchor_media_us` corresponds to
    /// real time `anchor_real_us`. Updates smaller than
    /// `fluctuation_allowed_us`, measured against what the old anchor would
    /// have predicted for `anchor_real_us`, are dropped as noise. Returns
    /// the timers that fire as a result (their target real time has
    /// already elapsed) wrapped as [`FiredTimer`] with reason `Reached`.
    /// Rejects negative `anchor_media_us`/`anchor_real_us`: an anchor must
    /// satisfy `anchorMediaUs >= 0 && anchorRealUs >= 0`.
    pub fn update_anchor(
        &self,
        anchor_media_us: i64,
        anchor_real_us: i64,
        max_media_us: i64,
    ) -> Result<Vec<FiredTimer>, ClockError> {
        if anchor_media_us < 0 || anchor_real_us < 0 {
            return Err(ClockError::BadValue);
        }

        let mut st = self.state.lock();

        if let Some(old_anchor_media) = st.anchor_media_us {
            let old_now_media =
                old_anchor_media + scale(anchor_real_us - st.anchor_real_us, st.rate);
            if (old_now_media - anchor_media_us).abs() < st.fluctuation_allowed_us {
                st.max_media_us = max_media_us;
                return Ok(self.process_timers_locked(&mut st));
            }
        }

        st.anchor_media_us = Some(anchor_media_us.max(st.starting_media_us));
        st.anchor_real_us = anchor_real_us;
        st.max_media_us = max_media_us;
        st.generation = st.generation.wrapping_add(1);
        Ok(self.process_timers_locked(&mut st))
    }

    /// Change the playback rate, preserving the media time the clock would
    /// report *right now* as the new anchor point so playback doesn't jump.
    pub fn set_playback_rate(&self, rate: f64) -> Result<Vec<FiredTimer>, ClockError> {
        if rate < 0.0 {
            return Err(ClockError::BadValue);
        }
        let mut st = self.state.lock();
        if let Some(anchor_media) = st.anchor_media_us {
            let now_real = now_us();
            let now_media = anchor_media + scale(now_real - st.anchor_real_us, st.rate);
            st.anchor_media_us = Some(now_media);
            st.anchor_real_us = now_real;
        }
        st.rate = rate;
        st.generation = st.generation.wrapping_add(1);
        Ok(self.process_timers_locked(&mut st))
    }

    pub fn playback_rate(&self) -> f64 {
        self.state.lock().rate
    }

    /// The current media time, extrapolated from the anchor at the
    /// current rate and clamped to `[starting, max]`.
    pub fn media_time(&self) -> Result<i64, ClockError> {
        self.media_time_at(now_us())
    }

    pub fn media_time_at(&self, real_us: i64) -> Result<i64, ClockError> {
        let st = self.state.lock();
        let anchor_media = st.anchor_media_us.ok_or(ClockError::NoInit)?;
        let media = anchor_media + scale(real_us - st.anchor_real_us, st.rate);
        Ok(media.clamp(st.starting_media_us, st.max_media_us))
    }

    /// The real time at which `target_media_us` will be reached, given the
    /// current anchor and rate. Errors if the clock has no anchor or the
    /// rate is zero (paused — media time never advances).
    pub fn real_time_for(&self, target_media_us: i64) -> Result<i64, ClockError> {
        let st = self.state.lock();
        let anchor_media = st.anchor_media_us.ok_or(ClockError::NoInit)?;
        if st.rate <= 0.0 {
            return Err(ClockError::BadValue);
        }
        let delta_media = target_media_us - anchor_media;
        Ok(st.anchor_real_us + scale(delta_media, 1.0 / st.rate))
    }

    pub fn set_starting_media_time(&self, starting_media_us: i64) {
        let mut st = self.state.lock();
        st.starting_media_us = starting_media_us;
    }

    /// Schedule `target` to receive a `Message { what }` when the clock
    /// reaches `media_time_us` (plus `adjust_real_us`, which may be
    /// negative to fire early). If the time has already passed, returns
    /// it as already fired.
    #[allow(clippy::too_many_arguments)]
    pub fn add_timer(
        &self,
        target: HandlerId,
        what: i32,
        media_time_us: i64,
        adjust_real_us: i64,
        generation: u64,
    ) -> Vec<FiredTimer> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut st = self.state.lock();
        let timer = PendingTimer {
            target,
            what,
            media_time_us,
            adjust_real_us,
            generation,
            seq,
        };
        match real_time_for_locked(&st, media_time_us) {
            Ok(real_time_us) => {
                st.timers.push(ScheduledTimer {
                    real_time_us: real_time_us + adjust_real_us,
                    seq,
                    timer,
                });
                self.process_timers_locked(&mut st)
            }
            Err(_) => {
                // No anchor yet: stash with a real time of "now" so it
                // fires as soon as the next anchor update processes it.
                st.timers.push(ScheduledTimer {
                    real_time_us: now_us(),
                    seq,
                    timer,
                });
                Vec::new()
            }
        }
    }

    /// Drop every pending timer, delivering them with reason `Reset` so
    /// callers can re-derive and re-add what's still needed. Used on
    /// flush/seek/surface-swap.
    pub fn reset(&self) -> Vec<FiredTimer> {
        let mut st = self.state.lock();
        st.anchor_media_us = None;
        st.max_media_us = i64::MAX;
        st.starting_media_us = 0;
        st.generation = st.generation.wrapping_add(1);
        st.timers
            .drain()
            .map(|t| FiredTimer {
                target: t.timer.target,
                what: t.timer.what,
                reason: TimerReason::Reset,
                media_time_us: t.timer.media_time_us,
            })
            .collect()
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    fn process_timers_locked(&self, st: &mut State) -> Vec<FiredTimer> {
        let now = now_us();
        let mut fired = Vec::new();
        while let Some(top) = st.timers.peek() {
            if top.real_time_us > now {
                break;
            }
            let entry = st.timers.pop().unwrap();
            fired.push(FiredTimer {
                target: entry.timer.target,
                what: entry.timer.what,
                reason: TimerReason::Reached,
                media_time_us: entry.timer.media_time_us,
            });
        }
        fired
    }
}

fn real_time_for_locked(st: &State, target_media_us: i64) -> Result<i64, ClockError> {
    let anchor_media = st.anchor_media_us.ok_or(ClockError::NoInit)?;
    if st.rate <= 0.0 {
        return Err(ClockError::BadValue);
    }
    let delta_media = target_media_us - anchor_media;
    Ok(st.anchor_real_us + scale(delta_media, 1.0 / st.rate))
}

fn scale(delta_us: i64, rate: f64) -> i64 {
    (delta_us as f64 * rate).round() as i64
}

fn now_us() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

/// Convert a fired timer into a deliverable message (caller posts it to the
/// appropriate looper).
pub fn fired_timer_to_message(fired: &FiredTimer) -> Message {
    Message::new(fired.what, fired.target).set(
        "media_time_us",
        Payload::Long(fired.media_time_us),
    )
}
