//! GPU device and window surface setup

use std::sync::Arc;

use winit::window::Window;

use super::error::PresenterError;
use super::timer;

/// Device, queue and the adapter they came from
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// Preferred surface format (sRGB when available)
    pub surface_format: wgpu::TextureFormat,
    /// Whether upload timing queries were enabled on the device
    pub timestamps_enabled: bool,
}

/// The window's swap chain
pub struct WindowSurface {
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    /// Create a device able to present to `window`. Timestamp queries are
    /// requested only when `want_timestamps` is set and the adapter has them.
    pub async fn new(window: Arc<Window>, want_timestamps: bool) -> Result<(Self, WindowSurface), PresenterError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(PresenterError::NoAdapter)?;

        tracing::info!("Using GPU: {}", adapter.get_info().name);
        tracing::info!("Backend: {:?}", adapter.get_info().backend);

        let timestamps_enabled = want_timestamps && adapter.features().contains(timer::REQUIRED_FEATURES);
        if want_timestamps && !timestamps_enabled {
            tracing::warn!("Adapter lacks timestamp queries inside encoders; upload timing disabled");
        }
        let required_features = if timestamps_enabled {
            timer::REQUIRED_FEATURES
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Framepace Device"),
                    required_features,
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or(PresenterError::NoSurfaceFormat)?;
        tracing::info!("Surface format: {:?}", surface_format);

        // Pacing is done by the transport; avoid blocking on vsync where possible
        let present_mode = if surface_caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
            wgpu::PresentMode::Mailbox
        } else if surface_caps.present_modes.contains(&wgpu::PresentMode::Immediate) {
            wgpu::PresentMode::Immediate
        } else {
            wgpu::PresentMode::Fifo
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let context = Self {
            instance,
            adapter,
            device,
            queue,
            surface_format,
            timestamps_enabled,
        };
        Ok((context, WindowSurface { surface, config }))
    }
}

impl WindowSurface {
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if self.config.width == width && self.config.height == height {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(device, &self.config);
    }

    /// Configure again with the current size (after Lost/Outdated)
    pub fn reconfigure(&self, device: &wgpu::Device) {
        self.surface.configure(device, &self.config);
    }
}
