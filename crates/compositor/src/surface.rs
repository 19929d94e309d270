//! Dirty-tracking render surface.
//!
//! `RenderSurface` decides *when* to recomposite and hands finished frames
//! to a display sink; the actual pixel work lives behind the [`Compositor`]
//! trait. The surface is a plain value with no toolkit ties: a host widget
//! forwards property assignments into the setters and drives composites from
//! its own loop, so the state machine stays unit-testable without a GPU or a
//! window.
//!
//! Composites run through an explicit two-phase protocol
//! ([`begin_composite`](RenderSurface::begin_composite) /
//! [`finish_composite`](RenderSurface::finish_composite)) because GPU
//! submission may be asynchronous relative to the presentation context. The
//! `Compositing` state gates overlapping submissions; property changes that
//! land mid-flight coalesce into a single follow-up pass using only the
//! latest values.

use std::sync::Arc;

use crate::error::CompositeError;
use crate::types::{Frame, PixelImage, TintColor};

/// Produces a composited frame from a source image and tint parameters.
pub trait Compositor {
    fn composite(
        &mut self,
        image: &PixelImage,
        tint: TintColor,
        intensity: f32,
    ) -> Result<Frame, CompositeError>;
}

/// Where finished (or fallback) frames are handed off for display.
pub trait DisplaySink {
    fn present(&mut self, frame: &Frame);
}

/// Lifecycle of the surface between property changes and composites.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceState {
    Idle,
    Dirty,
    Compositing,
    Error,
}

/// Snapshot of the values one composite pass should use.
#[derive(Clone, Debug)]
pub struct CompositeRequest {
    pub image: Arc<PixelImage>,
    pub tint: TintColor,
    pub intensity: f32,
}

pub struct RenderSurface<S: DisplaySink> {
    state: SurfaceState,
    image: Option<Arc<PixelImage>>,
    tint: TintColor,
    intensity: f32,
    // One coalesced follow-up pass while Compositing; rapid changes collapse
    // into it rather than queueing a composite per change.
    pending: bool,
    last_frame: Option<Frame>,
    last_error: Option<CompositeError>,
    sink: S,
    on_error: Option<Box<dyn FnMut(&CompositeError)>>,
}

impl<S: DisplaySink> RenderSurface<S> {
    pub fn new(sink: S) -> Self {
        Self {
            state: SurfaceState::Idle,
            image: None,
            tint: TintColor::WHITE,
            intensity: 0.0,
            pending: false,
            last_frame: None,
            last_error: None,
            sink,
            on_error: None,
        }
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn tint_color(&self) -> TintColor {
        self.tint
    }

    pub fn tint_intensity(&self) -> f32 {
        self.intensity
    }

    /// The most recent error, cleared by the next successful composite.
    pub fn last_error(&self) -> Option<&CompositeError> {
        self.last_error.as_ref()
    }

    /// The last frame published to the sink, if any composite has succeeded.
    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    /// Registers a callback invoked whenever a composite fails.
    pub fn on_error<F>(&mut self, callback: F)
    where
        F: FnMut(&CompositeError) + 'static,
    {
        self.on_error = Some(Box::new(callback));
    }

    /// Replaces the source image. Setting an equal image is a no-op.
    pub fn set_image(&mut self, image: Arc<PixelImage>) {
        if let Some(current) = &self.image {
            if Arc::ptr_eq(current, &image) || **current == *image {
                return;
            }
        }
        self.image = Some(image);
        self.mark_changed();
    }

    /// Replaces the tint color. Setting an equal color is a no-op.
    pub fn set_tint_color(&mut self, tint: TintColor) {
        if self.tint == tint {
            return;
        }
        self.tint = tint;
        self.mark_changed();
    }

    /// Replaces the tint intensity. Setting an equal value is a no-op.
    pub fn set_tint_intensity(&mut self, intensity: f32) {
        if self.intensity == intensity {
            return;
        }
        self.intensity = intensity;
        self.mark_changed();
    }

    /// Called when the surface is attached to a display; forces a first
    /// paint even if no property has changed yet.
    pub fn attach(&mut self) {
        self.force_dirty();
    }

    /// Forces a recomposite with unchanged values, e.g. after the underlying
    /// host surface resized or was recreated.
    pub fn invalidate(&mut self) {
        self.force_dirty();
    }

    fn mark_changed(&mut self) {
        match self.state {
            SurfaceState::Idle | SurfaceState::Error => {
                self.state = SurfaceState::Dirty;
            }
            SurfaceState::Compositing => {
                self.pending = true;
            }
            SurfaceState::Dirty => {}
        }
    }

    fn force_dirty(&mut self) {
        match self.state {
            SurfaceState::Compositing => self.pending = true,
            _ => self.state = SurfaceState::Dirty,
        }
    }

    /// Claims the dirty state for one composite pass.
    ///
    /// Returns a snapshot of the current values and transitions to
    /// `Compositing`, or `None` when the surface is not dirty or has no
    /// image yet (it then stays dirty until one arrives).
    pub fn begin_composite(&mut self) -> Option<CompositeRequest> {
        if self.state != SurfaceState::Dirty {
            return None;
        }
        let image = self.image.as_ref()?;
        self.state = SurfaceState::Compositing;
        Some(CompositeRequest {
            image: Arc::clone(image),
            tint: self.tint,
            intensity: self.intensity,
        })
    }

    /// Completes the pass claimed by [`begin_composite`](Self::begin_composite).
    ///
    /// On success the frame is published and retained as last-known-good; on
    /// failure the last-known-good frame (or the untinted source, on a first
    /// paint) is published instead, so the display never goes blank. Either
    /// way a coalesced change that arrived mid-pass re-dirties the surface.
    pub fn finish_composite(&mut self, result: Result<Frame, CompositeError>) {
        if self.state != SurfaceState::Compositing {
            tracing::warn!(state = ?self.state, "finish_composite without a pass in flight");
            return;
        }
        let had_pending = std::mem::take(&mut self.pending);
        match result {
            Ok(frame) => {
                self.sink.present(&frame);
                self.last_frame = Some(frame);
                self.last_error = None;
                self.state = if had_pending {
                    SurfaceState::Dirty
                } else {
                    SurfaceState::Idle
                };
            }
            Err(error) => {
                tracing::warn!(error = %error, "composite failed; presenting fallback frame");
                if let Some(last) = &self.last_frame {
                    self.sink.present(last);
                } else if let Some(image) = &self.image {
                    self.sink.present(&Frame::untinted(image));
                }
                if let Some(callback) = self.on_error.as_mut() {
                    callback(&error);
                }
                self.last_error = Some(error);
                self.state = if had_pending {
                    SurfaceState::Dirty
                } else {
                    SurfaceState::Error
                };
            }
        }
    }

    /// Runs composite passes synchronously until the surface settles.
    ///
    /// Convenience for hosts whose compositor blocks on submission; stops on
    /// the first failure instead of retrying in a loop.
    pub fn drive<C: Compositor>(&mut self, compositor: &mut C) {
        while let Some(request) = self.begin_composite() {
            let result = compositor.composite(&request.image, request.tint, request.intensity);
            let failed = result.is_err();
            self.finish_composite(result);
            if failed {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Compositor double that counts calls and returns scripted results.
    struct ScriptedCompositor {
        calls: Vec<CompositeRequest>,
        fail_next: Option<CompositeError>,
    }

    impl ScriptedCompositor {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                fail_next: None,
            }
        }
    }

    impl Compositor for ScriptedCompositor {
        fn composite(
            &mut self,
            image: &PixelImage,
            tint: TintColor,
            intensity: f32,
        ) -> Result<Frame, CompositeError> {
            self.calls.push(CompositeRequest {
                image: Arc::new(image.clone()),
                tint,
                intensity,
            });
            if let Some(error) = self.fail_next.take() {
                return Err(error);
            }
            // Encode the intensity into the first byte so frames from
            // different passes are distinguishable.
            let mut pixels = image.pixels().to_vec();
            pixels[0] = (intensity * 255.0) as u8;
            Ok(Frame {
                width: image.width(),
                height: image.height(),
                pixels,
            })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        presented: Rc<RefCell<Vec<Frame>>>,
    }

    impl DisplaySink for RecordingSink {
        fn present(&mut self, frame: &Frame) {
            self.presented.borrow_mut().push(frame.clone());
        }
    }

    fn test_image() -> Arc<PixelImage> {
        Arc::new(PixelImage::from_rgba8(2, 2, vec![10; 16]).unwrap())
    }

    fn surface_with_image() -> (RenderSurface<RecordingSink>, RecordingSink) {
        let sink = RecordingSink::default();
        let mut surface = RenderSurface::new(sink.clone());
        surface.set_image(test_image());
        (surface, sink)
    }

    #[test]
    fn setter_marks_dirty_and_drive_composites_once() {
        let (mut surface, sink) = surface_with_image();
        assert_eq!(surface.state(), SurfaceState::Dirty);
        let mut compositor = ScriptedCompositor::new();
        surface.drive(&mut compositor);
        assert_eq!(surface.state(), SurfaceState::Idle);
        assert_eq!(compositor.calls.len(), 1);
        assert_eq!(sink.presented.borrow().len(), 1);
    }

    #[test]
    fn identical_values_do_not_recomposite() {
        let (mut surface, _sink) = surface_with_image();
        let mut compositor = ScriptedCompositor::new();
        surface.drive(&mut compositor);

        surface.set_image(test_image());
        surface.set_tint_color(TintColor::WHITE);
        surface.set_tint_intensity(0.0);
        assert_eq!(surface.state(), SurfaceState::Idle);
        surface.drive(&mut compositor);
        assert_eq!(compositor.calls.len(), 1);
    }

    #[test]
    fn setting_the_same_value_twice_composites_once() {
        let (mut surface, _sink) = surface_with_image();
        let mut compositor = ScriptedCompositor::new();
        surface.drive(&mut compositor);

        surface.set_tint_intensity(0.7);
        surface.set_tint_intensity(0.7);
        surface.drive(&mut compositor);
        assert_eq!(compositor.calls.len(), 2);
    }

    #[test]
    fn invalidate_forces_recomposite_with_unchanged_values() {
        let (mut surface, _sink) = surface_with_image();
        let mut compositor = ScriptedCompositor::new();
        surface.drive(&mut compositor);
        assert_eq!(surface.state(), SurfaceState::Idle);

        surface.invalidate();
        assert_eq!(surface.state(), SurfaceState::Dirty);
        surface.drive(&mut compositor);
        assert_eq!(compositor.calls.len(), 2);
    }

    #[test]
    fn attach_triggers_first_paint() {
        let sink = RecordingSink::default();
        let mut surface = RenderSurface::new(sink.clone());
        surface.set_image(test_image());
        let mut compositor = ScriptedCompositor::new();
        surface.drive(&mut compositor);
        assert_eq!(compositor.calls.len(), 1);

        surface.attach();
        surface.drive(&mut compositor);
        assert_eq!(compositor.calls.len(), 2);
    }

    #[test]
    fn changes_during_compositing_coalesce_into_one_pass() {
        let (mut surface, _sink) = surface_with_image();
        let request = surface.begin_composite().expect("dirty surface");
        assert_eq!(surface.state(), SurfaceState::Compositing);

        // Three rapid changes while the pass is in flight.
        surface.set_tint_intensity(0.2);
        surface.set_tint_intensity(0.5);
        surface.set_tint_color(TintColor::new(1.0, 0.0, 0.0));
        assert_eq!(surface.state(), SurfaceState::Compositing);

        let mut compositor = ScriptedCompositor::new();
        let first = compositor.composite(&request.image, request.tint, request.intensity);
        surface.finish_composite(first);
        assert_eq!(surface.state(), SurfaceState::Dirty);

        surface.drive(&mut compositor);
        assert_eq!(surface.state(), SurfaceState::Idle);
        // One initial pass plus exactly one coalesced follow-up.
        assert_eq!(compositor.calls.len(), 2);
        let follow_up = &compositor.calls[1];
        assert_eq!(follow_up.intensity, 0.5);
        assert_eq!(follow_up.tint, TintColor::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn no_composite_without_an_image() {
        let sink = RecordingSink::default();
        let mut surface = RenderSurface::new(sink);
        surface.attach();
        assert_eq!(surface.state(), SurfaceState::Dirty);
        assert!(surface.begin_composite().is_none());
        assert_eq!(surface.state(), SurfaceState::Dirty);
    }

    #[test]
    fn failure_presents_last_known_good_frame() {
        let (mut surface, sink) = surface_with_image();
        let mut compositor = ScriptedCompositor::new();
        surface.drive(&mut compositor);
        let good_frame = sink.presented.borrow().last().unwrap().clone();

        surface.set_tint_intensity(0.9);
        compositor.fail_next = Some(CompositeError::DeviceUnavailable {
            reason: "adapter lost".into(),
        });
        surface.drive(&mut compositor);

        assert_eq!(surface.state(), SurfaceState::Error);
        assert!(matches!(
            surface.last_error(),
            Some(CompositeError::DeviceUnavailable { .. })
        ));
        // The failing pass re-presented the last good frame, unchanged.
        assert_eq!(sink.presented.borrow().last().unwrap(), &good_frame);
    }

    #[test]
    fn first_paint_failure_presents_untinted_source() {
        let (mut surface, sink) = surface_with_image();
        let mut compositor = ScriptedCompositor::new();
        compositor.fail_next = Some(CompositeError::DeviceUnavailable {
            reason: "no adapter".into(),
        });
        surface.drive(&mut compositor);

        assert_eq!(surface.state(), SurfaceState::Error);
        let presented = sink.presented.borrow();
        assert_eq!(presented.len(), 1);
        assert_eq!(presented[0], Frame::untinted(&test_image()));
    }

    #[test]
    fn error_callback_fires_and_setter_recovers_from_error() {
        let (mut surface, _sink) = surface_with_image();
        let errors = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&errors);
        surface.on_error(move |_| *counter.borrow_mut() += 1);

        let mut compositor = ScriptedCompositor::new();
        compositor.fail_next = Some(CompositeError::InvalidImage {
            reason: "zero area".into(),
        });
        surface.drive(&mut compositor);
        assert_eq!(*errors.borrow(), 1);
        assert_eq!(surface.state(), SurfaceState::Error);

        surface.set_tint_intensity(0.3);
        assert_eq!(surface.state(), SurfaceState::Dirty);
        surface.drive(&mut compositor);
        assert_eq!(surface.state(), SurfaceState::Idle);
        assert!(surface.last_error().is_none());
    }

    #[test]
    fn failed_pass_with_coalesced_change_goes_straight_to_dirty() {
        let (mut surface, _sink) = surface_with_image();
        let _request = surface.begin_composite().expect("dirty surface");
        surface.set_tint_intensity(0.4);

        surface.finish_composite(Err(CompositeError::DeviceUnavailable {
            reason: "lost".into(),
        }));
        assert_eq!(surface.state(), SurfaceState::Dirty);
    }
}
