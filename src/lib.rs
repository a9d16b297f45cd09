//! Event-driven playback orchestrator: a demuxing source feeds two
//! independent decoders (audio/video), a single [`clock::MediaClock`]
//! keeps their output in sync, and a [`renderer::Renderer`] presents the
//! result — all driven by a message-passing engine behind the blocking,
//! synchronous [`driver::Driver`] facade.

pub mod clock;
pub mod config;
pub mod decoder;
pub mod driver;
pub mod engine;
pub mod error;
pub mod format;
pub mod looper;
pub mod message;
pub mod renderer;
pub mod sink;
pub mod source;
pub mod surface;

pub use driver::{Driver, DriverState};
pub use error::Status;
pub use format::{Format, Frame, Packet, TrackKind};
pub use surface::VideoSurface;
