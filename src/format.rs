//! Track metadata and timestamped media buffers.
//!
//! `Format` is the demuxer's description of a track's codec/geometry;
//! `Packet` is what a [`crate::source::Source`] hands to a decoder, and
//! `Frame` is what a decoder hands to a [`crate::renderer::Renderer`]. Both
//! carry a monotonic presentation timestamp in microseconds, matching the
//! original's `kKeyTime`/`mediaTimeUs` convention throughout.

use bytes::Bytes;

/// Which elementary stream a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Static description of one demuxed track.
#[derive(Debug, Clone, PartialEq)]
pub struct Format {
    pub kind: TrackKind,
    pub mime: String,
    /// Audio: samples per second. Video: unused (0).
    pub sample_rate: u32,
    /// Audio: interleaved channel count. Video: unused (0).
    pub channels: u32,
    /// Video: pixel dimensions. Audio: unused (0, 0).
    pub width: u32,
    pub height: u32,
    /// Codec-specific initialization data (e.g. ALAC magic cookie, AAC
    /// `AudioSpecificConfig`), opaque to everything but the decoder.
    pub codec_private: Bytes,
}

impl Format {
    pub fn audio(mime: impl Into<String>, sample_rate: u32, channels: u32) -> Self {
        Self {
            kind: TrackKind::Audio,
            mime: mime.into(),
            sample_rate,
            channels,
            width: 0,
            height: 0,
            codec_private: Bytes::new(),
        }
    }

    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            kind: TrackKind::Video,
            mime: mime.into(),
            sample_rate: 0,
            channels: 0,
            width,
            height,
            codec_private: Bytes::new(),
        }
    }
}

/// A compressed access unit as produced by a [`crate::source::Source`].
#[derive(Debug, Clone)]
pub struct Packet {
    pub pts_us: i64,
    pub is_key_frame: bool,
    pub is_eos: bool,
    pub data: Bytes,
}

impl Packet {
    pub fn eos(pts_us: i64) -> Self {
        Self {
            pts_us,
            is_key_frame: false,
            is_eos: true,
            data: Bytes::new(),
        }
    }
}

/// A decoded, presentation-ready frame as produced by a decoder.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: TrackKind,
    pub pts_us: i64,
    pub is_eos: bool,
    /// Audio: interleaved PCM samples (f32). Video: opaque surface-ready
    /// buffer handed to `VideoSurface::present`.
    pub data: Bytes,
    pub sample_rate: u32,
    pub channels: u32,
}

impl Frame {
    pub fn eos(kind: TrackKind, pts_us: i64) -> Self {
        Self {
            kind,
            pts_us,
            is_eos: true,
            data: Bytes::new(),
            sample_rate: 0,
            channels: 0,
        }
    }
}
