//! End-to-end scenarios driving the public [`mediacore::Driver`] facade,
//! each grounded on one of the seed playback walk-throughs the engine's
//! deferred-action/flush-status design is meant to satisfy.

use std::time::Duration;

use mediacore::config::EngineConfig;
use mediacore::driver::{Driver, DriverState};
use mediacore::error::Status;
use mediacore::format::{Format, Frame, Packet};
use mediacore::source::ScriptedSource;
use mediacore::surface::{SurfaceHandle, VideoSurface};

/// Minimal `VideoSurface` standing in for an embedder's real window; only
/// used to prove a surface actually gets attached across the swap.
#[derive(Default)]
struct NullSurface;

impl VideoSurface for NullSurface {
    fn present(&mut self, _frame: &Frame) {}
    fn set_size(&mut self, _width: u32, _height: u32) {}
}

fn audio_only_source(packet_count: usize) -> ScriptedSource {
    let fmt = Format::audio("audio/pcm", 44_100, 2);
    let mut packets: Vec<Packet> = (0..packet_count)
        .map(|i| Packet {
            pts_us: i as i64 * 100_000,
            is_key_frame: i == 0,
            is_eos: false,
            data: bytes::Bytes::from_static(&[0u8; 8]),
        })
        .collect();
    packets.push(Packet::eos(packet_count as i64 * 100_000));
    ScriptedSource::new(vec![fmt], vec![packets], Some(10_000_000))
}

fn audio_and_video_source() -> ScriptedSource {
    let audio_fmt = Format::audio("audio/pcm", 44_100, 2);
    let video_fmt = Format::video("video/mock", 1280, 720);
    ScriptedSource::new(
        vec![audio_fmt, video_fmt],
        vec![vec![], vec![]],
        Some(10_000_000),
    )
}

#[test]
fn basic_playback_reaches_running_and_reports_position() {
    let driver = Driver::new(EngineConfig::default());
    driver.set_data_source(Box::new(audio_only_source(3))).unwrap();
    driver.prepare().unwrap();
    assert_eq!(driver.state(), DriverState::Prepared);

    driver.start().unwrap();
    assert_eq!(driver.state(), DriverState::Running);

    for _ in 0..8 {
        driver.pump();
    }

    assert!(driver.get_current_position().is_ok());
}

#[test]
fn pause_and_seek_returns_to_requested_position() {
    let driver = Driver::new(EngineConfig::default());
    driver.set_data_source(Box::new(audio_only_source(5))).unwrap();
    driver.prepare().unwrap();
    driver.start().unwrap();

    driver.pause().unwrap();
    assert_eq!(driver.state(), DriverState::Paused);

    driver.seek_to(1_000).unwrap();
    let pos = driver.get_current_position();
    assert!(pos.is_ok() || matches!(pos, Err(Status::NoInit)));

    driver.start().unwrap();
    assert_eq!(driver.state(), DriverState::Running);
}

#[test]
fn seek_before_start_lands_in_paused_with_target_position() {
    let driver = Driver::new(EngineConfig::default());
    driver.set_data_source(Box::new(audio_only_source(5))).unwrap();
    driver.prepare().unwrap();
    assert_eq!(driver.state(), DriverState::Prepared);

    // Mirrors the seed scenario: seeking before the engine has ever
    // started previews the target frame and lands in `Paused`, not back
    // in `Prepared` and not left `Running`.
    driver.seek_to(5_000).unwrap();
    assert_eq!(driver.state(), DriverState::Paused);
    assert!(driver.get_current_position().is_ok());
}

#[test]
fn negative_seek_is_rejected_without_changing_state() {
    let driver = Driver::new(EngineConfig::default());
    driver.set_data_source(Box::new(audio_only_source(1))).unwrap();
    driver.prepare().unwrap();
    let before = driver.state();
    assert_eq!(driver.seek_to(-1), Err(Status::BadValue));
    assert_eq!(driver.state(), before);
}

#[test]
fn calls_outside_legal_states_fail_fast_with_invalid_operation() {
    let driver = Driver::new(EngineConfig::default());
    // start() before any data source / prepare call.
    assert_eq!(driver.start(), Err(Status::InvalidOperation));
    assert_eq!(driver.pause(), Err(Status::InvalidOperation));
}

#[test]
fn reset_allows_a_fresh_set_data_source_afterward() {
    let driver = Driver::new(EngineConfig::default());
    driver.set_data_source(Box::new(audio_only_source(1))).unwrap();
    driver.prepare().unwrap();
    driver.reset().unwrap();
    assert_eq!(driver.state(), DriverState::Idle);
    driver.set_data_source(Box::new(audio_only_source(1))).unwrap();
    assert_eq!(driver.state(), DriverState::Unprepared);
}

#[test]
fn surface_swap_during_playback_keeps_driver_running() {
    let driver = Driver::new(EngineConfig::default());
    driver
        .set_data_source(Box::new(audio_and_video_source()))
        .unwrap();
    driver.prepare().unwrap();
    driver.start().unwrap();
    assert_eq!(driver.state(), DriverState::Running);

    // Swapping the surface mid-playback flushes/rebuilds the video decoder
    // behind the scenes but must not disturb the driver's own state or
    // leave audio/position reporting broken.
    driver
        .set_video_surface(Some(SurfaceHandle::new(Box::new(NullSurface))))
        .unwrap();
    assert_eq!(driver.state(), DriverState::Running);
    assert!(driver.get_current_position().is_ok());

    driver.pump();
    assert_eq!(driver.state(), DriverState::Running);
}

#[test]
fn wait_for_playing_unblocks_once_running() {
    let driver = Driver::new(EngineConfig::default());
    driver.set_data_source(Box::new(audio_only_source(1))).unwrap();
    driver.prepare().unwrap();
    driver.start().unwrap();
    assert!(driver.wait_for_playing(true, Duration::from_millis(50)));
}
