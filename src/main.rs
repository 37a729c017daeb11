//! Smart Camera - Main Entry Point
//!
//! Webcam viewer with live object detection, a GPU beauty filter and
//! recording of the composed canvas.

use std::sync::Arc;
use std::time::{Duration, Instant};

use smart_camera::settings::AppSettings;
use smart_camera::telemetry::{self, DebugConsole, LogConfig};
use smart_camera::App;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

const WINDOW_TITLE: &str = "Smart Camera";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;

/// Application state machine
enum AppState {
    /// Initial state before window is created
    Uninitialized,
    /// Window and graphics context are ready
    Running { window: Arc<Window>, app: Box<App> },
    /// Startup failed or shutdown has run
    Stopped,
}

/// Main application handler implementing winit's ApplicationHandler trait
struct SmartCameraApp {
    state: AppState,
    /// Taken when the App is created
    settings: Option<AppSettings>,
    console: DebugConsole,
    frame_duration: Duration,
    next_redraw_at: Instant,
}

impl SmartCameraApp {
    fn new(settings: AppSettings, console: DebugConsole) -> Self {
        let fps = settings.target_fps.max(1) as u64;
        Self {
            state: AppState::Uninitialized,
            settings: Some(settings),
            console,
            frame_duration: Duration::from_nanos(1_000_000_000 / fps),
            next_redraw_at: Instant::now(),
        }
    }

    fn shutdown(&mut self) {
        if let AppState::Running { app, .. } = &mut self.state {
            app.shutdown();
        }
        self.state = AppState::Stopped;
    }
}

impl ApplicationHandler for SmartCameraApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if !matches!(self.state, AppState::Uninitialized) {
            return;
        }
        let Some(settings) = self.settings.take() else {
            return;
        };

        tracing::info!("Creating window...");
        let window_attributes = WindowAttributes::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(DEFAULT_WIDTH, DEFAULT_HEIGHT));

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                tracing::error!("Failed to create window: {}", e);
                self.state = AppState::Stopped;
                event_loop.exit();
                return;
            }
        };

        tracing::info!(
            "Window created: {}x{}",
            window.inner_size().width,
            window.inner_size().height
        );

        match pollster::block_on(App::new(window.clone(), settings, self.console.clone())) {
            Ok(app) => {
                tracing::info!("Smart Camera ready");
                tracing::info!(
                    "Space: beauty filter, R: record, S: switch camera, F11: fullscreen, Esc: quit"
                );
                self.state = AppState::Running {
                    window,
                    app: Box::new(app),
                };
            }
            Err(e) => {
                tracing::error!(kind = e.kind(), "Startup failed: {}", e);
                self.state = AppState::Stopped;
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let AppState::Running { window, app } = &mut self.state else {
            return;
        };

        // Let egui handle the event first
        let egui_consumed = app.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                tracing::info!("Close requested, exiting...");
                event_loop.exit();
            }

            // Keyboard shortcuts only when egui doesn't want the key
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } if !egui_consumed => match key_code {
                KeyCode::Escape => {
                    tracing::info!("Escape pressed, exiting...");
                    event_loop.exit();
                }
                KeyCode::F11 => {
                    if window.fullscreen().is_some() {
                        window.set_fullscreen(None);
                        tracing::info!("Exiting fullscreen");
                    } else {
                        window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                        tracing::info!("Entering fullscreen");
                    }
                }
                KeyCode::Space => app.toggle_beauty(),
                KeyCode::KeyR => app.toggle_recording(),
                KeyCode::KeyS => app.switch_camera(),
                _ => {}
            },

            WindowEvent::Resized(physical_size) => {
                app.resize(physical_size);
            }

            WindowEvent::RedrawRequested => match app.render() {
                Ok(_) => {}
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    tracing::warn!("Surface lost, reconfiguring...");
                    app.resize(app.size());
                }
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    tracing::error!("Out of GPU memory!");
                    event_loop.exit();
                }
                Err(e) => {
                    tracing::warn!("Surface error: {:?}", e);
                }
            },

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let AppState::Running { window, .. } = &self.state else {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        };

        // Drive redraws at the target frame rate
        let now = Instant::now();
        if now >= self.next_redraw_at {
            window.request_redraw();
            self.next_redraw_at += self.frame_duration;

            // Reset if too far behind
            if now > self.next_redraw_at + self.frame_duration * 2 {
                self.next_redraw_at = now + self.frame_duration;
            }
        }

        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_redraw_at));
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        tracing::info!("Shutting down");
        self.shutdown();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = AppSettings::load();

    let console = DebugConsole::default();
    let log_config = LogConfig {
        file_enabled: settings.log_to_file,
        ..LogConfig::default()
    };
    let _log_guard = telemetry::init_logging(&log_config, Some(console.clone()))?;

    tracing::info!("Smart Camera v{}", env!("CARGO_PKG_VERSION"));

    let event_loop = EventLoop::new().map_err(|e| e.to_string())?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = SmartCameraApp::new(settings, console);
    event_loop
        .run_app(&mut app)
        .map_err(|e| e.to_string())?;
    Ok(())
}
