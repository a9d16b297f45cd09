//! Clock-synced audio/video presentation, grounded on `render/Rendered`'s
//! interface and on the teacher's sink-driven audio path for the audio
//! half; the video half schedules presentation against [`MediaClock`]
//! timers the way `MediaCodecVideoRenderer` schedules
//! `onMessageReceived(kWhatRender)` against `mMediaClock`.

use std::collections::VecDeque;

use log::debug;

use crate::clock::MediaClock;
use crate::format::{Frame, TrackKind};
use crate::sink::{AudioSink, PlaybackSettings};
use crate::surface::SurfaceHandle;

/// Why the renderer reported an event back to the engine, matching the
/// `RendererNotify` arms `onMessageReceived` switches on.
#[derive(Debug, Clone, PartialEq)]
pub enum RendererEvent {
    Eos(TrackKind),
    FlushComplete(TrackKind),
    VideoRenderingStart,
    MediaRenderingStart,
    AudioTearDown,
}

/// Drives presentation of decoded frames against a shared [`MediaClock`].
/// Audio frames are queued to an [`AudioSink`]; video frames are held
/// until their PTS is due, then handed to the attached [`SurfaceHandle`].
/// This combines both tracks in one renderer rather than splitting them,
/// matching the original's single `Renderer` owning both an audio and
/// video path behind one clock.
pub struct Renderer {
    clock: MediaClock,
    audio_sink: Box<dyn AudioSink>,
    surface: SurfaceHandle,
    video_queue: VecDeque<Frame>,
    video_eos_queued: bool,
    audio_eos_reported: bool,
    video_eos_reported: bool,
    first_audio_frame_after_anchor: bool,
    first_video_frame_rendered: bool,
    paused: bool,
    /// Set by a `Closest`-mode seek: frames queued on this track with a PTS
    /// earlier than the hint are pre-roll the demuxer had to decode through
    /// to reach a keyframe, and are dropped rather than presented, per
    /// `SeekMode::Closest`'s "resume-at" contract. Cleared the first time a
    /// frame at or past the hint is queued.
    skip_audio_before_us: Option<i64>,
    skip_video_before_us: Option<i64>,
}

impl Renderer {
    pub fn new(clock: MediaClock, audio_sink: Box<dyn AudioSink>) -> Self {
        Self {
            clock,
            audio_sink,
            surface: SurfaceHandle::empty(),
            video_queue: VecDeque::new(),
            video_eos_queued: false,
            audio_eos_reported: false,
            video_eos_reported: false,
            first_audio_frame_after_anchor: true,
            first_video_frame_rendered: false,
            paused: false,
            skip_audio_before_us: None,
            skip_video_before_us: None,
        }
    }

    /// Arm (or disarm, with `None`) the pre-roll skip for `kind`: frames
    /// queued with an earlier PTS than `hint` are dropped rather than
    /// presented, until one at or past it arrives.
    pub fn set_resume_at_hint(&mut self, kind: TrackKind, hint: Option<i64>) {
        match kind {
            TrackKind::Audio => self.skip_audio_before_us = hint,
            TrackKind::Video => self.skip_video_before_us = hint,
        }
    }

    pub fn attach_surface(&mut self, surface: SurfaceHandle) {
        self.surface = surface;
    }

    pub fn set_playback_settings(&mut self, settings: PlaybackSettings) {
        self.audio_sink.set_settings(settings);
    }

    pub fn playback_settings(&self) -> PlaybackSettings {
        self.audio_sink.settings()
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Queue a decoded audio frame. The first frame queued after a flush
    /// anchors the clock to its PTS, mirroring the original's "first
    /// sample after flush establishes the new anchor" rule. Frames are
    /// drained by [`Renderer::drain_due_audio`], which the caller should
    /// invoke from its own tick alongside [`Renderer::render_due_video`].
    pub fn queue_audio(&mut self, frame: Frame) -> Vec<RendererEvent> {
        if frame.is_eos {
            self.audio_sink.queue(frame);
            return Vec::new();
        }
        if let Some(threshold) = self.skip_audio_before_us {
            if frame.pts_us < threshold {
                return Vec::new();
            }
            self.skip_audio_before_us = None;
        }
        let mut events = Vec::new();
        if self.first_audio_frame_after_anchor {
            // A negative PTS would reject the anchor; nothing upstream
            // produces one, so there is no fallback anchor to fall back to
            // here, only a dropped `MediaRenderingStart`.
            if self
                .clock
                .update_anchor(frame.pts_us, now_us(), i64::MAX)
                .is_ok()
            {
                self.first_audio_frame_after_anchor = false;
                events.push(RendererEvent::MediaRenderingStart);
            }
        }
        self.audio_sink.queue(frame);
        events
    }

    /// Pop audio frames from the sink whose PTS has already elapsed against
    /// the clock, mirroring [`Renderer::render_due_video`]'s due-check for
    /// the video side. The EOS marker is popped like any other frame (its
    /// PTS is the track's end time) and reports `Eos(Audio)` exactly once
    /// once the clock actually reaches it, rather than the moment it's
    /// queued.
    pub fn drain_due_audio(&mut self) -> Vec<RendererEvent> {
        if self.paused {
            return Vec::new();
        }
        let mut events = Vec::new();
        let Ok(now_media) = self.clock.media_time() else {
            return events;
        };
        while let Some(pts) = self.audio_sink.peek_front_pts() {
            if pts > now_media {
                break;
            }
            let Some(frame) = self.audio_sink.pop_front() else {
                break;
            };
            if frame.is_eos && !self.audio_eos_reported {
                self.audio_eos_reported = true;
                events.push(RendererEvent::Eos(TrackKind::Audio));
            }
        }
        events
    }

    /// Queue a decoded video frame for later presentation once its PTS is
    /// due. Frames are drained by [`Renderer::render_due_video`], which the
    /// caller should invoke from its own tick (e.g. the engine's looper
    /// timer, as `onMessageReceived(kWhatRender)` does).
    pub fn queue_video(&mut self, frame: Frame) {
        if frame.is_eos {
            self.video_eos_queued = true;
        } else if let Some(threshold) = self.skip_video_before_us {
            if frame.pts_us < threshold {
                return;
            }
            self.skip_video_before_us = None;
        }
        self.video_queue.push_back(frame);
    }

    /// Present every queued video frame whose PTS has already elapsed
    /// against the clock. Returns the events produced (first-frame start,
    /// EOS once the EOS marker itself is reached).
    pub fn render_due_video(&mut self) -> Vec<RendererEvent> {
        if self.paused {
            return Vec::new();
        }
        let mut events = Vec::new();
        let Ok(now_media) = self.clock.media_time() else {
            return events;
        };
        while let Some(front) = self.video_queue.front() {
            if front.is_eos {
                self.video_queue.pop_front();
                if !self.video_eos_reported {
                    self.video_eos_reported = true;
                    events.push(RendererEvent::Eos(TrackKind::Video));
                }
                continue;
            }
            if front.pts_us > now_media {
                break;
            }
            let frame = self.video_queue.pop_front().unwrap();
            self.surface.present(&frame);
            if !self.first_video_frame_rendered {
                self.first_video_frame_rendered = true;
                events.push(RendererEvent::VideoRenderingStart);
            }
        }
        events
    }

    /// Drop all queued-but-unpresented frames for `kind` and reset that
    /// track's EOS bookkeeping, in preparation for a flush. Returns
    /// `FlushComplete` immediately since this renderer has no in-flight
    /// hardware buffers to wait for.
    pub fn flush(&mut self, kind: TrackKind) -> RendererEvent {
        match kind {
            TrackKind::Audio => {
                self.audio_sink.clear();
                self.audio_eos_reported = false;
                self.first_audio_frame_after_anchor = true;
                self.skip_audio_before_us = None;
            }
            TrackKind::Video => {
                self.video_queue.clear();
                self.video_eos_queued = false;
                self.video_eos_reported = false;
                self.first_video_frame_rendered = false;
                self.skip_video_before_us = None;
            }
        }
        debug!("renderer flushed {kind:?}");
        RendererEvent::FlushComplete(kind)
    }

    pub fn audio_tear_down(&mut self) -> RendererEvent {
        self.audio_sink.clear();
        RendererEvent::AudioTearDown
    }
}

fn now_us() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}
