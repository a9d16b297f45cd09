//! Client-facing status codes and per-collaborator error enums.
//!
//! `Status` is the taxonomy from the driver's public surface; every other
//! error type in this crate converts into it at the boundary where it
//! becomes client-visible (see `engine::Engine` notification handling).

use thiserror::Error;

/// Client-facing status/result code.
///
/// Mirrors the driver's error taxonomy: most calls either succeed or fail
/// fast with `InvalidOperation` when the state machine disallows the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Status {
    #[error("ok")]
    Ok,
    #[error("operation not permitted in current state")]
    InvalidOperation,
    #[error("unknown error")]
    UnknownError,
    #[error("invalid argument")]
    BadValue,
    #[error("not initialized")]
    NoInit,
    #[error("would block")]
    WouldBlock,
    #[error("end of stream")]
    EndOfStream,
    #[error("invalid format")]
    InvalidFormat,
    #[error("buffer full")]
    BufferFull,
    #[error("timed out")]
    Timeout,
}

impl Status {
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

/// Errors produced by [`crate::clock::MediaClock`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("clock is not anchored")]
    NoInit,
    #[error("negative time or rate supplied")]
    BadValue,
}

impl From<ClockError> for Status {
    fn from(e: ClockError) -> Self {
        match e {
            ClockError::NoInit => Status::NoInit,
            ClockError::BadValue => Status::BadValue,
        }
    }
}

/// Errors produced by [`crate::looper::Looper`] post/await operations.
#[derive(Debug, Clone, Error)]
pub enum LooperError {
    #[error("target looper has been shut down")]
    TargetGone,
    #[error("reply never arrived before the looper stopped")]
    NoReply,
}

/// Errors a demuxing [`crate::source::Source`] can surface.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("unsupported container or codec")]
    InvalidFormat,
    #[error("end of stream")]
    EndOfStream,
    #[error("i/o error: {0}")]
    Io(String),
    #[error("unknown source error: {0}")]
    Unknown(String),
}

impl From<SourceError> for Status {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::InvalidFormat => Status::InvalidFormat,
            SourceError::EndOfStream => Status::EndOfStream,
            SourceError::Io(_) | SourceError::Unknown(_) => Status::UnknownError,
        }
    }
}

/// Errors a track decoder can surface via `DecoderNotify::Error`.
#[derive(Debug, Clone, Error)]
pub enum DecoderError {
    #[error("unsupported or malformed bitstream: {0}")]
    InvalidFormat(String),
    #[error("decoder i/o error: {0}")]
    Io(String),
    #[error("unknown decoder error: {0}")]
    Unknown(String),
}

impl From<DecoderError> for Status {
    fn from(e: DecoderError) -> Self {
        match e {
            DecoderError::InvalidFormat(_) => Status::InvalidFormat,
            DecoderError::Io(_) | DecoderError::Unknown(_) => Status::UnknownError,
        }
    }
}
