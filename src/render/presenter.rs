//! Frame presenter
//!
//! Uploads RGBA frames through a pair of ping-pong staging buffers into a
//! texture and draws it as an aspect-fitted quad.
//!
//! Each present writes the new frame into the write buffer and copies the
//! previous frame from the read buffer into the texture, so a frame reaches
//! the screen one present after it was handed in. The first present after
//! `initialize` fills both buffers so the first draw shows real content.

use std::sync::Arc;

use wgpu::util::DeviceExt;
use winit::window::Window;

use super::error::PresenterError;
use super::gpu_context::{GpuContext, WindowSurface};
use super::staging::{pad_rows, padded_bytes_per_row, staging_size, PingPong};
use super::timer::UploadTimer;
use super::transform::{fit_matrix, TransformUniform};
use crate::media::VideoFrame;
use crate::playback::FramePresenter;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [1.0, -1.0], uv: [1.0, 1.0] },
    QuadVertex { position: [1.0, 1.0], uv: [1.0, 0.0] },
    QuadVertex { position: [-1.0, 1.0], uv: [0.0, 0.0] },
];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Per-video GPU resources, rebuilt when the video size changes
struct FrameResources {
    staging: [wgpu::Buffer; 2],
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    ping_pong: PingPong,
    primed: bool,
    width: u32,
    height: u32,
    padded_row: u32,
    scratch: Vec<u8>,
}

pub struct Presenter {
    frame: Option<FrameResources>,
    timer: Option<UploadTimer>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    transform_buffer: wgpu::Buffer,
    surface: WindowSurface,
    gpu: GpuContext,
    window: Arc<Window>,
}

impl Presenter {
    /// Set up the device, surface and pipeline for `window`. Call
    /// `initialize` with the video size before presenting.
    pub async fn new(window: Arc<Window>, upload_timing: bool) -> Result<Self, PresenterError> {
        let (gpu, surface) = GpuContext::new(Arc::clone(&window), upload_timing).await?;
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Video Quad Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/video_quad.wgsl").into()),
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Video Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Video Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Video Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
        };

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Video Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: gpu.surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Indices"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });
        let transform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Transform"),
            contents: bytemuck::bytes_of(&TransformUniform::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Ok(Self {
            frame: None,
            timer: None,
            pipeline,
            bind_group_layout,
            sampler,
            vertex_buffer,
            index_buffer,
            transform_buffer,
            surface,
            gpu,
            window,
        })
    }

    fn create_frame_resources(&self, width: u32, height: u32) -> FrameResources {
        let device = &self.gpu.device;
        let size = staging_size(width, height);

        let staging = [0, 1].map(|i| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("Frame Staging {}", i)),
                size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        });

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Video Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Video Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.transform_buffer.as_entire_binding(),
                },
            ],
        });

        FrameResources {
            staging,
            texture,
            bind_group,
            ping_pong: PingPong::new(),
            primed: false,
            width,
            height,
            padded_row: padded_bytes_per_row(width),
            scratch: Vec::new(),
        }
    }

    /// Acquire the next swap chain image, reconfiguring a lost surface
    fn acquire(&mut self) -> Result<wgpu::SurfaceTexture, PresenterError> {
        match self.surface.surface.get_current_texture() {
            Ok(output) => Ok(output),
            Err(e @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                tracing::debug!("Surface {:?}, reconfiguring", e);
                self.surface.reconfigure(&self.gpu.device);
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Draw the texture; when `upload_from` is set, first copy that staging
    /// buffer into the texture
    fn draw(&mut self, output: wgpu::SurfaceTexture, upload_from: Option<usize>) {
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Present Encoder"),
            });

        if let (Some(frame), Some(read)) = (self.frame.as_ref(), upload_from) {
            let timed = self.timer.as_mut().is_some_and(|t| t.begin(&mut encoder));
            encoder.copy_buffer_to_texture(
                wgpu::TexelCopyBufferInfo {
                    buffer: &frame.staging[read],
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(frame.padded_row),
                        rows_per_image: Some(frame.height),
                    },
                },
                wgpu::TexelCopyTextureInfo {
                    texture: &frame.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: frame.width,
                    height: frame.height,
                    depth_or_array_layers: 1,
                },
            );
            if timed {
                if let Some(timer) = self.timer.as_mut() {
                    timer.end(&mut encoder);
                }
            }
        }

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Video Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some(frame) = self.frame.as_ref() {
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &frame.bind_group, &[]);
                pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
                pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
                pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
            }
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        self.window.pre_present_notify();
        output.present();

        if let Some(timer) = self.timer.as_mut() {
            timer.after_submit();
            if let Some(ms) = timer.poll(&self.gpu.device) {
                tracing::debug!(upload_ms = ms, "Frame upload");
            }
        }
    }
}

impl FramePresenter for Presenter {
    fn initialize(&mut self, width: u32, height: u32) -> Result<(), PresenterError> {
        if width == 0 || height == 0 {
            return Err(PresenterError::FrameSize {
                expected: (1, 1),
                actual: (width, height),
            });
        }
        self.frame = Some(self.create_frame_resources(width, height));
        if self.gpu.timestamps_enabled {
            self.timer = UploadTimer::new(&self.gpu.device, &self.gpu.queue);
        }
        tracing::info!("Presenter initialized for {}x{}", width, height);
        Ok(())
    }

    fn present_frame(&mut self, video: &VideoFrame) -> Result<(), PresenterError> {
        let frame = self.frame.as_mut().ok_or(PresenterError::NotInitialized)?;
        if (video.width, video.height) != (frame.width, frame.height) {
            return Err(PresenterError::FrameSize {
                expected: (frame.width, frame.height),
                actual: (video.width, video.height),
            });
        }
        let row_bytes = video.stride();
        let rows = frame.height as usize;
        if video.data.len() < row_bytes * rows {
            return Err(PresenterError::FrameData {
                expected: row_bytes * rows,
                actual: video.data.len(),
            });
        }

        let output = self.acquire()?;

        let frame = self.frame.as_mut().ok_or(PresenterError::NotInitialized)?;
        let bytes = pad_rows(&video.data, row_bytes, frame.padded_row as usize, rows, &mut frame.scratch);
        let write = frame.ping_pong.write_index();
        let read = frame.ping_pong.read_index();
        self.gpu.queue.write_buffer(&frame.staging[write], 0, bytes);
        if !frame.primed {
            self.gpu.queue.write_buffer(&frame.staging[read], 0, bytes);
            frame.primed = true;
        }

        self.draw(output, Some(read));

        if let Some(frame) = self.frame.as_mut() {
            frame.ping_pong.swap();
        }
        Ok(())
    }

    fn present_last_frame(&mut self) -> Result<(), PresenterError> {
        let output = self.acquire()?;
        self.draw(output, None);
        Ok(())
    }

    fn update_transform(&mut self, window_width: u32, window_height: u32, video_width: u32, video_height: u32) {
        let uniform = TransformUniform::new(fit_matrix(window_width, window_height, video_width, video_height));
        self.gpu
            .queue
            .write_buffer(&self.transform_buffer, 0, bytemuck::bytes_of(&uniform));
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface.resize(&self.gpu.device, width, height);
    }

    fn teardown(&mut self) {
        if self.frame.take().is_some() {
            tracing::debug!("Presenter frame resources released");
        }
        self.timer = None;
    }
}
