use crate::error::CompositeError;

/// Headless device/queue pair shared by every composite on one surface.
///
/// Acquisition failures surface as [`CompositeError::DeviceUnavailable`] so
/// the owning surface can fall back to the untinted image instead of going
/// blank.
pub struct GpuContext {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    limits: wgpu::Limits,
}

impl GpuContext {
    /// Acquires an adapter and device with no window surface attached.
    pub fn acquire() -> Result<Self, CompositeError> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|err| CompositeError::DeviceUnavailable {
            reason: format!("no suitable GPU adapter: {err}"),
        })?;

        let adapter_info = adapter.get_info();
        tracing::debug!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            "selected GPU adapter"
        );

        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("tint compositor device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|err| CompositeError::DeviceUnavailable {
            reason: format!("failed to create GPU device: {err}"),
        })?;

        Ok(Self {
            device,
            queue,
            limits,
        })
    }

    pub(crate) fn max_texture_dimension(&self) -> u32 {
        self.limits.max_texture_dimension_2d
    }
}
