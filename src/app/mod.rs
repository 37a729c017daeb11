//! Application state holding the wgpu graphics context
//!
//! Owns the window surface, the present pipeline that draws the composed
//! canvas, the egui integration and the frame [`Pipeline`] with its native
//! collaborators.

pub mod pipeline;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::camera::{CameraSession, FacingMode, NativeMediaDevices, SessionConfig};
use crate::capture::{CaptureController, FfmpegEncoder, FileDownloads};
use crate::detect::{
    DetectionOverlay, DetectionScheduler, DetectionWorker, DetectorConfig, ObjectDetector,
    YoloDetector,
};
use crate::error::AppError;
use crate::render::{BeautyFilter, BeautySettings, FrameCompositor, FrameFilter, Watermark};
use crate::settings::AppSettings;
use crate::shaders;
use crate::telemetry::DebugConsole;
use crate::ui::{self, UiActions, UiState};

pub use pipeline::{DetectorStatus, Pipeline};

type NativePipeline = Pipeline<NativeMediaDevices, DetectionWorker, FfmpegEncoder, FileDownloads>;

/// GPU copy of the composed canvas
struct CanvasTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

/// Main application state
pub struct App {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,

    // Present pipeline (canvas -> window)
    present_pipeline: wgpu::RenderPipeline,
    present_bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    canvas: Option<CanvasTexture>,
    uploaded_version: u64,

    beauty_filter: Option<BeautyFilter>,
    pipeline: NativePipeline,
    settings: AppSettings,

    // Debug panel
    console: DebugConsole,
    show_console: bool,
    /// Central area left by the egui panels, in points
    video_rect: Option<egui::Rect>,

    // egui integration
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,

    // Frame timing
    fps: f64,
    last_fps_update: Instant,
    frames_since_update: u64,
}

impl App {
    /// Create the graphics context, open the camera and start the detector
    pub async fn new(
        window: Arc<Window>,
        settings: AppSettings,
        console: DebugConsole,
    ) -> Result<Self, AppError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| AppError::Graphics(format!("failed to create surface: {}", e)))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| AppError::Graphics("no suitable GPU adapter".to_string()))?;

        tracing::info!("Using GPU: {}", adapter.get_info().name);
        tracing::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Smart Camera Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| AppError::Graphics(format!("failed to create device: {}", e)))?;
        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| AppError::Graphics("surface reports no formats".to_string()))?;

        tracing::info!("Surface format: {:?}", surface_format);

        let present_mode = if surface_caps
            .present_modes
            .contains(&wgpu::PresentMode::Mailbox)
        {
            wgpu::PresentMode::Mailbox
        } else {
            wgpu::PresentMode::Fifo
        };

        tracing::info!("Present mode: {:?}", present_mode);

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
            desired_maximum_frame_latency: 1,
        };

        surface.configure(&device, &config);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Canvas Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let present_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Present Shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::PASSTHROUGH_SHADER.into()),
        });

        let present_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Present Bind Group Layout"),
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
                ],
            });

        let present_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Present Pipeline Layout"),
                bind_group_layouts: &[&present_bind_group_layout],
                push_constant_ranges: &[],
            });

        let present_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Present Pipeline"),
            layout: Some(&present_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &present_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &present_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        // Beauty filter (optional; the raw frame is shown if it fails)
        let shader_override = settings.beauty_shader_path.as_ref().map(PathBuf::from);
        let beauty_source = shaders::load_beauty_shader(shader_override.as_deref());
        let beauty_result = BeautyFilter::new(device.clone(), queue.clone(), &beauty_source);

        // egui
        let egui_ctx = egui::Context::default();
        let mut style = (*egui_ctx.style()).clone();
        style.visuals.window_shadow = egui::epaint::Shadow::NONE;
        egui_ctx.set_style(style);

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        let pipeline = Self::build_pipeline(&settings)?;

        let now = Instant::now();
        let mut app = Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            present_pipeline,
            present_bind_group_layout,
            sampler,
            canvas: None,
            uploaded_version: 0,
            beauty_filter: None,
            pipeline,
            settings,
            console,
            show_console: false,
            video_rect: None,
            egui_ctx,
            egui_state,
            egui_renderer,
            fps: 0.0,
            last_fps_update: now,
            frames_since_update: 0,
        };

        match beauty_result {
            Ok(filter) => app.beauty_filter = Some(filter),
            Err(e) => app.pipeline.notifications_mut().report(&e),
        }

        app.pipeline.start_camera(FacingMode::Front, now);
        Ok(app)
    }

    fn build_pipeline(settings: &AppSettings) -> Result<NativePipeline, AppError> {
        let session = CameraSession::new(
            NativeMediaDevices,
            SessionConfig {
                ideal_width: settings.ideal_width,
                ideal_height: settings.ideal_height,
                audio: settings.capture_audio,
                force_mobile_controls: settings.force_mobile_controls,
            },
        );

        let detector_config = DetectorConfig::from_settings(settings);
        let worker = DetectionWorker::spawn(move || {
            YoloDetector::load(detector_config).map(|d| Box::new(d) as Box<dyn ObjectDetector>)
        })?;

        let watermark = settings.watermark_path.as_ref().and_then(|path| {
            match Watermark::load(
                Path::new(path),
                settings.watermark_width_percent,
                settings.watermark_margin,
            ) {
                Ok(watermark) => Some(watermark),
                Err(e) => {
                    tracing::warn!("Watermark {} not loaded, skipping: {}", path, e);
                    None
                }
            }
        });

        let downloads = FileDownloads::new(settings.recordings_dir());
        tracing::info!("Recordings will be saved to {}", downloads.dir().display());

        let capture = CaptureController::new(
            FfmpegEncoder::detect(),
            downloads,
            settings.recording_formats.clone(),
            settings.recording_fps,
        );

        Ok(Pipeline::new(
            session,
            worker,
            DetectionScheduler::new(settings.detection_interval()),
            DetectionOverlay::default(),
            FrameCompositor::new(settings.ideal_width, settings.ideal_height, watermark),
            capture,
            BeautySettings::new(settings.beauty_enabled, settings.beauty_strength),
        ))
    }

    /// Handle a window event, returning true if egui consumed it
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(&self.window, event);
        response.consumed
    }

    /// Resize the surface
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Get current size
    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn toggle_beauty(&mut self) {
        if self.beauty_filter.is_some() {
            self.pipeline.toggle_beauty();
        }
    }

    pub fn toggle_recording(&mut self) {
        self.pipeline.toggle_recording(Instant::now());
    }

    /// Switch front/back where supported
    pub fn switch_camera(&mut self) {
        self.pipeline.switch_camera(Instant::now());
    }

    /// Save any recording, release devices and persist settings
    pub fn shutdown(&mut self) {
        if let Some(path) = self.pipeline.shutdown() {
            tracing::info!("Recording saved on exit: {}", path.display());
        }

        let beauty = self.pipeline.beauty();
        self.settings.beauty_enabled = beauty.enabled;
        self.settings.beauty_strength = beauty.strength_percent();
        if let Err(e) = self.settings.save() {
            tracing::warn!("Failed to save settings: {}", e);
        }
    }

    /// Copy the canvas to the GPU if it changed since the last upload
    fn upload_canvas(&mut self) {
        let version = self.pipeline.canvas_version();
        if version == self.uploaded_version {
            return;
        }
        let canvas = self.pipeline.canvas();
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        let needs_new_texture = match &self.canvas {
            None => true,
            Some(existing) => {
                let size = existing.texture.size();
                size.width != width || size.height != height
            }
        };

        if needs_new_texture {
            tracing::info!("Creating canvas texture: {}x{}", width, height);

            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Canvas Texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Canvas Bind Group"),
                layout: &self.present_bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });

            self.canvas = Some(CanvasTexture {
                texture,
                bind_group,
            });
        }

        if let Some(target) = &self.canvas {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &target.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                canvas.as_raw(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * 4),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
        self.uploaded_version = version;
    }

    /// Viewport for the canvas in physical pixels, clamped to the surface
    fn video_viewport(&self) -> Option<(f32, f32, f32, f32)> {
        let canvas = self.canvas.as_ref()?;
        let size = canvas.texture.size();
        let ppp = self.egui_ctx.pixels_per_point();

        let area = self.video_rect.unwrap_or_else(|| {
            egui::Rect::from_min_size(
                egui::Pos2::ZERO,
                egui::vec2(
                    self.config.width as f32 / ppp,
                    self.config.height as f32 / ppp,
                ),
            )
        });
        let fitted = ui::fit_rect((size.width, size.height), area);

        let surface_w = self.config.width as f32;
        let surface_h = self.config.height as f32;
        let x = (fitted.min.x * ppp).clamp(0.0, surface_w);
        let y = (fitted.min.y * ppp).clamp(0.0, surface_h);
        let w = (fitted.width() * ppp).min(surface_w - x);
        let h = (fitted.height() * ppp).min(surface_h - y);
        (w >= 1.0 && h >= 1.0).then_some((x, y, w, h))
    }

    /// Run one tick and render a frame
    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let now = Instant::now();
        let filter = self
            .beauty_filter
            .as_mut()
            .map(|f| f as &mut dyn FrameFilter);
        self.pipeline.tick(now, filter);
        self.upload_canvas();

        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present Pass"),
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

            if let (Some(canvas), Some((x, y, w, h))) = (&self.canvas, self.video_viewport()) {
                render_pass.set_viewport(x, y, w, h, 0.0, 1.0);
                render_pass.set_pipeline(&self.present_pipeline);
                render_pass.set_bind_group(0, &canvas.bind_group, &[]);
                render_pass.draw(0..3, 0..1);
            }
        }

        let actions = self.render_ui(&mut encoder, &view, now);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        self.apply_actions(actions);
        self.update_fps();

        Ok(())
    }

    fn render_ui(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        now: Instant,
    ) -> UiActions {
        let raw_input = self.egui_state.take_egui_input(&self.window);

        let notices = self.pipeline.notifications_mut().active(now);
        let console_lines = if self.show_console {
            self.console.snapshot()
        } else {
            Vec::new()
        };

        let session = self.pipeline.session();
        let state = UiState {
            fps: self.fps,
            camera_label: session.camera_label(),
            facing: session.facing(),
            can_switch: session.can_switch(),
            beauty: self.pipeline.beauty(),
            beauty_available: self.beauty_filter.is_some(),
            recording: self.pipeline.is_recording(),
            timer_text: self.pipeline.timer_text(),
            detector: self.pipeline.detector_status(),
            first_seen: self.pipeline.first_seen(),
            console: &console_lines,
            show_console: self.show_console,
            notices: &notices,
        };

        let mut actions = UiActions::default();
        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            actions = ui::draw(ctx, &state);
        });
        drop(state);

        self.egui_state
            .handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: full_output.pixels_per_point,
        };

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &paint_jobs,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("egui Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
                .forget_lifetime();

            self.egui_renderer
                .render(&mut render_pass, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        actions
    }

    fn apply_actions(&mut self, actions: UiActions) {
        if actions.video_rect.is_some() {
            self.video_rect = actions.video_rect;
        }
        if let Some(enabled) = actions.beauty_enabled {
            self.pipeline.set_beauty_enabled(enabled);
        }
        if let Some(strength) = actions.beauty_strength {
            self.pipeline.set_beauty_strength(strength);
        }
        if actions.switch_camera {
            self.switch_camera();
        }
        if actions.toggle_recording {
            self.toggle_recording();
        }
        if actions.toggle_console {
            self.show_console = !self.show_console;
        }
        if actions.clear_console {
            self.console.clear();
        }
        if actions.dismiss_notices {
            self.pipeline.notifications_mut().dismiss_all();
        }
    }

    fn update_fps(&mut self) {
        self.frames_since_update += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = self.frames_since_update as f64 / elapsed;
            self.frames_since_update = 0;
            self.last_fps_update = now;
        }
    }
}
