use std::sync::mpsc;

use crate::error::CompositeError;
use crate::surface::Compositor;
use crate::types::{Frame, PixelImage, TintColor, BYTES_PER_PIXEL};

use super::context::GpuContext;
use super::pipeline::{TintPipeline, TintUniforms};
use super::target::TintTarget;

/// GPU compositor blending a source image with a flat tint.
///
/// Holds no state between composites beyond the reusable target set, so it
/// is safe to call repeatedly with changing parameters. One instance belongs
/// to one render surface; the target buffers are never shared.
pub struct TintCompositor {
    context: GpuContext,
    pipeline: TintPipeline,
    uniform_buffer: wgpu::Buffer,
    target: Option<TargetSet>,
}

struct TargetSet {
    target: TintTarget,
    bind_group: wgpu::BindGroup,
}

impl TintCompositor {
    /// Acquires a headless GPU context and builds the tint pipeline.
    pub fn acquire() -> Result<Self, CompositeError> {
        Ok(Self::new(GpuContext::acquire()?))
    }

    pub fn new(context: GpuContext) -> Self {
        let pipeline = TintPipeline::new(&context.device);
        let uniform_buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tint uniform buffer"),
            size: std::mem::size_of::<TintUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            context,
            pipeline,
            uniform_buffer,
            target: None,
        }
    }

    /// Blends `image` with `tint` at `intensity` and reads the result back.
    ///
    /// Tint channels and intensity are clamped to `[0, 1]` before use. The
    /// output frame matches the source dimensions; alpha passes through
    /// unmodified.
    pub fn composite(
        &mut self,
        image: &PixelImage,
        tint: TintColor,
        intensity: f32,
    ) -> Result<Frame, CompositeError> {
        let width = image.width();
        let height = image.height();
        if width == 0 || height == 0 {
            return Err(CompositeError::InvalidImage {
                reason: format!("image has zero area ({width}x{height})"),
            });
        }
        let max = self.context.max_texture_dimension();
        if width > max || height > max {
            return Err(CompositeError::InvalidImage {
                reason: format!("image {width}x{height} exceeds GPU texture limit {max}"),
            });
        }

        let device = &self.context.device;
        let queue = &self.context.queue;

        let set = match self.target.take() {
            Some(set) if set.target.matches(width, height) => self.target.insert(set),
            previous => {
                if previous.is_some() {
                    tracing::debug!(width, height, "source dimensions changed; reallocating tint target");
                }
                let target = TintTarget::new(device, width, height);
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("tint bind group"),
                    layout: &self.pipeline.bind_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&target.source_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: self.uniform_buffer.as_entire_binding(),
                        },
                    ],
                });
                self.target.insert(TargetSet { target, bind_group })
            }
        };

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &set.target.source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.pixels(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * BYTES_PER_PIXEL),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        let tint = tint.clamped();
        let uniforms = TintUniforms {
            tint: [tint.red, tint.green, tint.blue, intensity.clamp(0.0, 1.0)],
        };
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tint encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("tint pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &set.target.color_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline.pipeline);
            pass.set_bind_group(0, &set.bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &set.target.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &set.target.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(set.target.padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let slice = set.target.readback.slice(..);
        let (map_tx, map_rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = map_tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| CompositeError::DeviceUnavailable {
                reason: format!("device poll failed: {err}"),
            })?;
        map_rx
            .recv()
            .map_err(|_| CompositeError::DeviceUnavailable {
                reason: "readback mapping callback was dropped".into(),
            })?
            .map_err(|err| CompositeError::DeviceUnavailable {
                reason: format!("readback mapping failed: {err}"),
            })?;

        let row_bytes = (width * BYTES_PER_PIXEL) as usize;
        let padded = set.target.padded_bytes_per_row as usize;
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in 0..height as usize {
                let start = row * padded;
                pixels.extend_from_slice(&mapped[start..start + row_bytes]);
            }
        }
        set.target.readback.unmap();

        Ok(Frame {
            width,
            height,
            pixels,
        })
    }
}

impl Compositor for TintCompositor {
    fn composite(
        &mut self,
        image: &PixelImage,
        tint: TintColor,
        intensity: f32,
    ) -> Result<Frame, CompositeError> {
        TintCompositor::composite(self, image, tint, intensity)
    }
}
