//! Demuxer abstraction: pulls compressed packets per track from a
//! container, grounded on `source/Source`'s interface and on the teacher's
//! Symphonia-based `rusty_backend::decoder` for how a concrete, file-backed
//! implementation adapts a pull-style demux API to this crate's actor
//! style.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode as SymphoniaSeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::SourceError;
use crate::format::{Format, Packet, TrackKind};

/// How a seek should resolve against the container's sync points, mirroring
/// `Source::SeekMode` from the original demuxer interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    PreviousSync,
    NextSync,
    ClosestSync,
    Closest,
    /// Seek to an exact frame index rather than a timestamp. This crate's
    /// `Source::seek_to` is time-based throughout, so a caller that only
    /// has a frame index is expected to resolve it to a timestamp first;
    /// kept as a tag because `original_source`'s `SeekMode` enum lists it
    /// and other collaborators may need to distinguish it from `Closest`.
    FrameIndex,
}

/// Events a [`Source`] reports asynchronously (instantiation readiness,
/// discontinuities, EOS) — the demux-side half of the notification traffic
/// the engine's `onSourceNotify` switch handles.
#[derive(Debug, Clone)]
pub enum SourceNotify {
    Prepared(Result<(), SourceError>),
    Duration(i64),
}

/// Pull-style demuxer: the engine drives it, it never posts packets on its
/// own initiative (unlike decoders/renderer, which run their own looper).
pub trait Source: Send {
    /// Begin reading headers/metadata; idempotent once prepared.
    fn prepare(&mut self) -> Result<(), SourceError>;
    fn track_count(&self) -> usize;
    fn format(&self, track: usize) -> Option<&Format>;
    fn duration_us(&self) -> Option<i64>;
    /// Pull the next packet for `track`, or `Ok(None)` if starved (caller
    /// should retry later, matching `feedMoreTSData`'s pull-when-idle
    /// contract rather than pushing from a background thread).
    fn read_packet(&mut self, track: usize) -> Result<Option<Packet>, SourceError>;
    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> Result<(), SourceError>;
}

/// Index of the audio/video track kind a concrete `Source` exposes, in
/// demux order.
pub fn track_kind_of(fmt: &Format) -> TrackKind {
    fmt.kind
}

/// File-backed source built on Symphonia's format-agnostic demux API,
/// grounded on the probe/format-reader setup in the teacher's
/// `SymphoniaDecoder::new`.
pub struct FileSource {
    reader: Option<Box<dyn FormatReader>>,
    formats: Vec<Format>,
    track_ids: Vec<u32>,
    pending: Vec<VecDeque<Packet>>,
    duration_us: Option<i64>,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|e| SourceError::Io(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(BufReader::new(file)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|_| SourceError::InvalidFormat)?;

        let reader = probed.format;
        let mut formats = Vec::new();
        let mut track_ids = Vec::new();
        for track in reader.tracks() {
            if track.codec_params.codec == CODEC_TYPE_NULL {
                continue;
            }
            let params = &track.codec_params;
            let kind = if params.sample_rate.is_some() {
                TrackKind::Audio
            } else {
                TrackKind::Video
            };
            let fmt = match kind {
                TrackKind::Audio => Format::audio(
                    format!("{:?}", params.codec),
                    params.sample_rate.unwrap_or(0),
                    params.channels.map(|c| c.count() as u32).unwrap_or(0),
                ),
                TrackKind::Video => Format::video(
                    format!("{:?}", params.codec),
                    params.width.unwrap_or(0),
                    params.height.unwrap_or(0),
                ),
            };
            formats.push(fmt);
            track_ids.push(track.id);
        }

        let duration_us = reader.default_track().and_then(|t| {
            let tb = t.codec_params.time_base?;
            let frames = t.codec_params.n_frames?;
            let time = tb.calc_time(frames);
            Some((time.seconds as i64) * 1_000_000 + (time.frac * 1_000_000.0) as i64)
        });

        let pending = track_ids.iter().map(|_| VecDeque::new()).collect();

        Ok(Self {
            reader: Some(reader),
            formats,
            track_ids,
            pending,
            duration_us,
        })
    }

    fn track_index(&self, id: u32) -> Option<usize> {
        self.track_ids.iter().position(|&t| t == id)
    }

    fn fill_one(&mut self) -> Result<bool, SourceError> {
        let reader = self.reader.as_mut().ok_or(SourceError::EndOfStream)?;
        match reader.next_packet() {
            Ok(packet) => {
                if let Some(idx) = self.track_index(packet.track_id()) {
                    let tb = reader
                        .tracks()
                        .iter()
                        .find(|t| t.id == packet.track_id())
                        .and_then(|t| t.codec_params.time_base);
                    let pts_us = tb
                        .map(|tb| {
                            let time = tb.calc_time(packet.ts());
                            time.seconds as i64 * 1_000_000 + (time.frac * 1_000_000.0) as i64
                        })
                        .unwrap_or(0);
                    self.pending[idx].push_back(Packet {
                        pts_us,
                        is_key_frame: packet.trimmed() == 0,
                        is_eos: false,
                        data: bytes::Bytes::copy_from_slice(packet.data.as_ref()),
                    });
                }
                Ok(true)
            }
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                Ok(false)
            }
            Err(SymphoniaError::ResetRequired) => Ok(false),
            Err(e) => Err(SourceError::Unknown(e.to_string())),
        }
    }
}

impl Source for FileSource {
    fn prepare(&mut self) -> Result<(), SourceError> {
        if self.reader.is_some() {
            Ok(())
        } else {
            Err(SourceError::InvalidFormat)
        }
    }

    fn track_count(&self) -> usize {
        self.formats.len()
    }

    fn format(&self, track: usize) -> Option<&Format> {
        self.formats.get(track)
    }

    fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    fn read_packet(&mut self, track: usize) -> Result<Option<Packet>, SourceError> {
        if track >= self.pending.len() {
            return Err(SourceError::InvalidFormat);
        }
        loop {
            if let Some(pkt) = self.pending[track].pop_front() {
                return Ok(Some(pkt));
            }
            if !self.fill_one()? {
                return Ok(None);
            }
        }
    }

    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> Result<(), SourceError> {
        let reader = self.reader.as_mut().ok_or(SourceError::InvalidFormat)?;
        let symphonia_mode = match mode {
            SeekMode::PreviousSync | SeekMode::ClosestSync | SeekMode::FrameIndex => {
                SymphoniaSeekMode::Accurate
            }
            SeekMode::NextSync | SeekMode::Closest => SymphoniaSeekMode::Coarse,
        };
        let seconds = time_us as f64 / 1_000_000.0;
        reader
            .seek(
                symphonia_mode,
                SeekTo::Time {
                    time: symphonia::core::units::Time::from(seconds),
                    track_id: None,
                },
            )
            .map_err(|e| SourceError::Unknown(e.to_string()))?;
        for q in &mut self.pending {
            q.clear();
        }
        Ok(())
    }
}

/// In-memory scripted source for tests: replays a fixed packet list per
/// track, optionally simulating `WouldBlock` until `ready_after` calls to
/// `read_packet` have been made. Grounded on the deterministic test doubles
/// pattern used throughout the teacher's playback test modules.
pub struct ScriptedSource {
    formats: Vec<Format>,
    tracks: Vec<VecDeque<Packet>>,
    duration_us: Option<i64>,
    ready_after: usize,
    calls: usize,
}

impl ScriptedSource {
    pub fn new(formats: Vec<Format>, tracks: Vec<Vec<Packet>>, duration_us: Option<i64>) -> Self {
        Self {
            formats,
            tracks: tracks.into_iter().map(VecDeque::from).collect(),
            duration_us,
            ready_after: 0,
            calls: 0,
        }
    }

    pub fn with_ready_after(mut self, calls: usize) -> Self {
        self.ready_after = calls;
        self
    }
}

impl Source for ScriptedSource {
    fn prepare(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    fn track_count(&self) -> usize {
        self.formats.len()
    }

    fn format(&self, track: usize) -> Option<&Format> {
        self.formats.get(track)
    }

    fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    fn read_packet(&mut self, track: usize) -> Result<Option<Packet>, SourceError> {
        self.calls += 1;
        if self.calls <= self.ready_after {
            return Ok(None);
        }
        let queue = self.tracks.get_mut(track).ok_or(SourceError::InvalidFormat)?;
        Ok(queue.pop_front())
    }

    fn seek_to(&mut self, _time_us: i64, _mode: SeekMode) -> Result<(), SourceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_source_reports_would_block_then_packets() {
        let fmt = Format::audio("audio/wav", 44_100, 2);
        let packets = vec![Packet {
            pts_us: 0,
            is_key_frame: true,
            is_eos: false,
            data: bytes::Bytes::from_static(b"x"),
        }];
        let mut source = ScriptedSource::new(vec![fmt], vec![packets], Some(1_000_000))
            .with_ready_after(1);

        assert!(source.read_packet(0).unwrap().is_none());
        assert!(source.read_packet(0).unwrap().is_some());
        assert!(source.read_packet(0).unwrap().is_none());
    }
}
