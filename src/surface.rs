//! Opaque video presentation target.
//!
//! The spec's caller owns whatever windowing system it lives in (a GUI
//! window, a framebuffer, a test harness); this crate never names one,
//! resolving the "surface/window type" open question by only depending on
//! a trait object the caller supplies.

use std::fmt;

use crate::format::Frame;

/// Something a decoded video frame can be presented to. Implementations
/// are supplied by the embedder; this crate ships none beyond the test
/// double below.
pub trait VideoSurface: Send {
    fn present(&mut self, frame: &Frame);
    fn set_size(&mut self, width: u32, height: u32);
}

/// RAII handle around a caller-supplied surface. Dropping it releases the
/// surface, matching the original's `setVideoSurfaceTexture(NULL)`
/// teardown path on disconnect.
pub struct SurfaceHandle {
    surface: Option<Box<dyn VideoSurface>>,
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceHandle")
            .field("attached", &self.surface.is_some())
            .finish()
    }
}

impl SurfaceHandle {
    pub fn new(surface: Box<dyn VideoSurface>) -> Self {
        Self {
            surface: Some(surface),
        }
    }

    pub fn empty() -> Self {
        Self { surface: None }
    }

    pub fn is_attached(&self) -> bool {
        self.surface.is_some()
    }

    pub fn present(&mut self, frame: &Frame) {
        if let Some(surface) = self.surface.as_mut() {
            surface.present(frame);
        }
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        if let Some(surface) = self.surface.as_mut() {
            surface.set_size(width, height);
        }
    }

    /// Swap in a new surface, releasing the old one. Used by the
    /// `SetVideoSurface` deferred action.
    pub fn replace(&mut self, surface: Option<Box<dyn VideoSurface>>) {
        self.surface = surface;
    }
}

impl Default for SurfaceHandle {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    pub struct RecordingSurface {
        pub frames: Arc<Mutex<Vec<i64>>>,
        pub sizes: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl VideoSurface for RecordingSurface {
        fn present(&mut self, frame: &Frame) {
            self.frames.lock().unwrap().push(frame.pts_us);
        }

        fn set_size(&mut self, width: u32, height: u32) {
            self.sizes.lock().unwrap().push((width, height));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingSurface;
    use super::*;
    use crate::format::TrackKind;

    #[test]
    fn empty_handle_drops_presented_frames_silently() {
        let mut handle = SurfaceHandle::empty();
        handle.present(&Frame::eos(TrackKind::Video, 0));
        assert!(!handle.is_attached());
    }

    #[test]
    fn replace_swaps_and_releases_previous_surface() {
        let a = RecordingSurface::default();
        let mut handle = SurfaceHandle::new(Box::new(a.clone()));
        handle.present(&Frame::eos(TrackKind::Video, 10));
        assert_eq!(*a.frames.lock().unwrap(), vec![10]);

        handle.replace(None);
        handle.present(&Frame::eos(TrackKind::Video, 20));
        assert_eq!(*a.frames.lock().unwrap(), vec![10]);
    }
}
