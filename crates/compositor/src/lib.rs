//! Tinted-image compositing core.
//!
//! The crate splits the "show an image with a color wash over it" problem
//! into two halves:
//!
//! ```text
//!   host widget / CLI
//!          │ setters, attach(), invalidate()
//!          ▼
//!   RenderSurface ──(begin/finish composite)──▶ TintCompositor ──▶ wgpu
//!          │                                          │
//!          └──▶ DisplaySink::present(frame) ◀── Frame readback
//! ```
//!
//! [`RenderSurface`] owns the dirty-tracking state machine: it decides when
//! a recomposite is due, coalesces rapid property changes into a single
//! follow-up pass, and falls back to the last-known-good frame when a pass
//! fails. [`TintCompositor`] owns the GPU work: an offscreen WGSL pass
//! evaluating `mix(source, tint, intensity)` per pixel with alpha
//! passthrough. The two meet only at the [`Compositor`] trait, so the state
//! machine tests never need a GPU and a host can substitute its own
//! compositing backend.

mod color;
mod error;
mod gpu;
mod surface;
mod types;

pub use error::CompositeError;
pub use gpu::{GpuContext, TintCompositor};
pub use surface::{CompositeRequest, Compositor, DisplaySink, RenderSurface, SurfaceState};
pub use types::{Frame, PixelImage, TintColor, BYTES_PER_PIXEL};
