//! Offscreen GPU path for tint compositing.
//!
//! - `context` owns wgpu instance/adapter/device acquisition; the compositor
//!   renders headless, so no surface or swapchain is involved.
//! - `pipeline` builds the single WGSL render pipeline that evaluates
//!   `mix(source, tint, intensity)` per pixel.
//! - `target` holds the dimension-keyed, reusable texture/readback set.
//! - `compositor` glues them into [`TintCompositor`], the production
//!   implementation of the `Compositor` trait.

mod compositor;
mod context;
mod pipeline;
mod target;

pub use compositor::TintCompositor;
pub use context::GpuContext;
