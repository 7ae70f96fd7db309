// =============================================================================
// VULKAN RENDERER DEMO
// =============================================================================
//
// Drives the device/swapchain/frame lifecycle manager from a winit event loop.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit App (window, resize, close)                              │
// │    └── Renderer (swapchain chain, frame loop)                   │
// │          └── DeviceContext (instance, device, queue)            │
// │                └── Demo scene (buffers, descriptors, pipelines) │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Acquire swapchain image (fence), stall until the queue is idle
// 2. Write uniforms, record compute + render pass
// 3. Submit, signalling render-finished
// 4. Present, recreating the swapchain if it went stale
//
// =============================================================================

mod demo;

use anyhow::{Context, Result};
use demo::Scene;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;
use vk_renderer::backend::{DeviceContext, FrameStatus, Renderer, ShaderLibrary, WindowProvider};
use vk_renderer::config::Config;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting Vulkan renderer");
    log::info!(
        "Window: {}x{}, {} frame(s) in flight",
        config.window.width,
        config.window.height,
        config.graphics.frames_in_flight
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Initialization failures end the loop and surface here
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging with optional file output
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    // Create/clear log file if enabled, then mirror every record into it
    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Vulkan Renderer Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(LogTee { file })));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

/// Writes log output to stderr and the log file
struct LogTee {
    file: File,
}

impl Write for LogTee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// GPU-side state, torn down explicitly in dependency order
struct Gpu {
    scene: Option<Scene>,
    renderer: Renderer,
    context: Arc<DeviceContext>,
}

impl Gpu {
    fn new(config: &Config, window: &Window) -> Result<Self> {
        let window_provider: &dyn WindowProvider = window;
        let context = DeviceContext::new(&config.device_settings(), Some(window_provider))
            .context("Failed to create device context")?;

        let mut renderer = Renderer::new(Arc::clone(&context), config.renderer_settings())
            .context("Failed to create renderer")?;
        renderer
            .bind_surface(window)
            .context("Failed to bind window surface")?;

        let shaders = ShaderLibrary::new(&config.shaders.directory);
        let scene = Scene::new(&renderer, &shaders, config.pipeline_options())
            .context("Failed to create demo scene")?;

        Ok(Self {
            scene: Some(scene),
            renderer,
            context,
        })
    }

    fn destroy(mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("Device wait before cleanup failed: {}", e);
        }
        if let Some(scene) = self.scene.take() {
            scene.destroy(&self.renderer);
        }
        self.renderer.destroy();

        let errors = self.context.validation_error_count();
        if errors > 0 {
            log::warn!("{} validation error(s) reported during the run", errors);
        }
    }
}

struct App {
    config: Config,
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    fatal: Option<anyhow::Error>,

    // FPS tracking
    start: Instant,
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            window: None,
            gpu: None,
            fatal: None,
            start: now,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    /// Render one frame. Returns whether anything was presented.
    fn render_frame(&mut self) -> Result<bool> {
        let (Some(window), Some(gpu)) = (&self.window, &mut self.gpu) else {
            return Ok(false);
        };
        let Some(scene) = gpu.scene.as_mut() else {
            return Ok(false);
        };

        let Some(frame) = gpu.renderer.begin_frame(&**window)? else {
            return Ok(false);
        };

        let time = self.start.elapsed().as_secs_f32();
        scene.record(&gpu.renderer, &frame, time, self.config.graphics.clear_color)?;

        let status = gpu.renderer.end_frame(&**window, frame, &[])?;
        Ok(status == FrameStatus::Presented)
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }
            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn shutdown(&mut self) {
        if let Some(gpu) = self.gpu.take() {
            gpu.destroy();
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_resizable(self.config.window.resizable)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fatal = Some(anyhow::Error::new(e).context("Failed to create window"));
                event_loop.exit();
                return;
            }
        };

        match Gpu::new(&self.config, &window) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:#}", e);
                self.fatal = Some(e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(gpu) = &mut self.gpu {
                    gpu.renderer.request_recreate();
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => {
                    log::error!("Render error: {:#}", e);
                    self.fatal = Some(e);
                    self.shutdown();
                    event_loop.exit();
                }
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown();
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_tee_mirrors_into_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let mut tee = LogTee {
            file: File::create(&path).unwrap(),
        };

        writeln!(tee, "[INFO] Renderer created").unwrap();
        tee.flush().unwrap();

        let logged = std::fs::read_to_string(&path).unwrap();
        assert_eq!(logged, "[INFO] Renderer created\n");
    }
}
