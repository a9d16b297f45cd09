//! Audio output queue, adapted from the teacher's
//! `rusty_backend::sink::Sink` free-running queue to a clock-paced one: the
//! renderer pulls frames against `MediaClock` deadlines instead of the sink
//! free-running ahead of playback.

use std::collections::VecDeque;

use crate::format::Frame;

/// Playback settings a sink exposes to the renderer, mirroring
/// `Renderer::setPlaybackSettings`/`getPlaybackSettings` (volume plus an
/// audio-describable subset of the clock's rate).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSettings {
    pub volume: f32,
    pub muted: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
        }
    }
}

/// Where decoded audio frames go before a platform backend consumes them.
/// A real implementation would hand `AudioSink::pull` frames to a cpal /
/// alsa / coreaudio stream callback; this crate ships only the queueing
/// discipline, matching the spec's boundary between engine/renderer logic
/// and platform audio I/O.
pub trait AudioSink: Send {
    fn queue(&mut self, frame: Frame);
    fn settings(&self) -> PlaybackSettings;
    fn set_settings(&mut self, settings: PlaybackSettings);
    /// Drop everything queued but not yet consumed (flush/seek).
    fn clear(&mut self);
    /// True once every queued frame has actually been played out, used to
    /// gate `AudioRenderingStart`/EOS delivery the way the original waits
    /// for the sink's `getTimestamp` to catch up before declaring audio
    /// EOS reached.
    fn is_drained(&self) -> bool;
    /// PTS of the next frame still queued, if any, without consuming it.
    fn peek_front_pts(&self) -> Option<i64>;
    /// Remove and return the next queued frame, consuming it.
    fn pop_front(&mut self) -> Option<Frame>;
}

/// In-process queue-backed sink good enough to drive the renderer's timing
/// logic in tests without a platform audio backend.
pub struct QueueSink {
    queue: VecDeque<Frame>,
    settings: PlaybackSettings,
}

impl QueueSink {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            settings: PlaybackSettings::default(),
        }
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for QueueSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for QueueSink {
    fn queue(&mut self, frame: Frame) {
        self.queue.push_back(frame);
    }

    fn settings(&self) -> PlaybackSettings {
        self.settings
    }

    fn set_settings(&mut self, settings: PlaybackSettings) {
        self.settings = settings;
    }

    fn clear(&mut self) {
        self.queue.clear();
    }

    fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    fn peek_front_pts(&self) -> Option<i64> {
        self.queue.front().map(|f| f.pts_us)
    }

    fn pop_front(&mut self) -> Option<Frame> {
        self.queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::TrackKind;

    #[test]
    fn queue_sink_drains_in_fifo_order() {
        let mut sink = QueueSink::new();
        sink.queue(Frame::eos(TrackKind::Audio, 1));
        sink.queue(Frame::eos(TrackKind::Audio, 2));
        assert_eq!(sink.pop().unwrap().pts_us, 1);
        assert_eq!(sink.pop().unwrap().pts_us, 2);
        assert!(sink.is_drained());
    }

    #[test]
    fn clear_empties_queue_and_reports_drained() {
        let mut sink = QueueSink::new();
        sink.queue(Frame::eos(TrackKind::Audio, 1));
        sink.clear();
        assert!(sink.is_drained());
    }
}
