// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use plasma_core::init_tracing;
use plasma_render::{Engine, RenderSize, Vertex};
use plasma_render_vk::{
    RawWindowSurface, VkDeviceConfig, VkGraphicsDevice, WindowSurface, DEFAULT_FRAGMENT_SHADER,
    DEFAULT_VERTEX_SHADER,
};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use plasma_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, default_value = "plasma.toml")]
    config: PathBuf,

    /// Exit after this many presented frames
    #[arg(long)]
    frames: Option<u64>,

    /// Force the Vulkan validation layer on
    #[arg(long)]
    validation: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "plasma".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
struct RenderCfg {
    clear_color: [f32; 4],
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    frame_timeout_ms: Option<u64>,
    validation: Option<bool>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vertex_shader: PathBuf::from(DEFAULT_VERTEX_SHADER),
            fragment_shader: PathBuf::from(DEFAULT_FRAGMENT_SHADER),
            frame_timeout_ms: None,
            validation: None,
        }
    }
}

impl RenderCfg {
    fn device_config(&self, title: &str, force_validation: bool) -> VkDeviceConfig {
        let defaults = VkDeviceConfig::default();
        VkDeviceConfig {
            app_name: title.to_string(),
            vertex_shader: self.vertex_shader.clone(),
            fragment_shader: self.fragment_shader.clone(),
            clear_color: self.clear_color,
            frame_timeout: self.frame_timeout_ms.map(Duration::from_millis),
            validation: force_validation || self.validation.unwrap_or(defaults.validation),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
struct AppCfg {
    #[serde(default)]
    window: WindowCfg,
    #[serde(default)]
    render: RenderCfg,
}

fn parse_cfg(text: &str, origin: &Path) -> AppCfg {
    match toml::from_str::<AppCfg>(text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("config {}: {e}; using defaults", origin.display());
            AppCfg::default()
        }
    }
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s, path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("no {}, using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("config {}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

// Uploaded on attach; the fixed pipeline draws its own triangle.
const TRIANGLE: [Vertex; 3] = [
    Vertex::new(0.0, -0.5, 0.0),
    Vertex::new(0.5, 0.5, 0.0),
    Vertex::new(-0.5, 0.5, 0.0),
];

fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

struct App {
    cfg: AppCfg,
    force_validation: bool,
    frame_limit: Option<u64>,

    window: Option<Arc<Window>>,
    engine: Option<Engine<VkGraphicsDevice>>,

    exiting: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(
                self.cfg.window.width,
                self.cfg.window.height,
            ));
        let window = event_loop
            .create_window(attrs)
            .map_err(|e| anyhow!("create_window: {e}"))?;
        let window = Arc::new(window);
        let size = render_size(window.inner_size());

        let device_cfg = self
            .cfg
            .render
            .device_config(&self.cfg.window.title, self.force_validation);
        let mut engine = Engine::new(VkGraphicsDevice::new(device_cfg));

        let surface: Box<dyn WindowSurface> =
            Box::new(RawWindowSurface::new(Arc::clone(&window), size));
        engine
            .attach_window(Some(surface))
            .context("attach window")?;
        engine.upload_mesh(&TRIANGLE).context("upload mesh")?;
        info!(
            "device = {}, mesh = {} vertices",
            engine.device_name(),
            engine.device().mesh_vertex_count()
        );

        window.request_redraw();
        self.window = Some(window);
        self.engine = Some(engine);
        Ok(())
    }

    fn stop(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(mut engine) = self.engine.take() {
            if let Err(e) = engine.shutdown() {
                error!("shutdown: {e}");
            }
            info!("frame stats: {:?}", engine.device().frame_stats());
        }
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Err(e) = self.start(event_loop) {
            error!("startup failed: {e:#}");
            self.stop(event_loop);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.stop(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let size = render_size(new_size);
                info!("Resized → {}x{}", size.width, size.height);
                if let Some(engine) = &mut self.engine {
                    if let Err(e) = engine.resize(size) {
                        error!("resize: {e}");
                    }
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                let Some(engine) = &mut self.engine else {
                    return;
                };
                match engine.run_frame() {
                    Ok(()) => self.frames = self.frames.saturating_add(1),
                    Err(e) => error!("render error: {e} ({})", e.code()),
                }

                let presented = engine.device().frame_stats().presents;
                if self.frame_limit.is_some_and(|limit| presented >= limit) {
                    info!("presented {presented} frames, exiting");
                    self.stop(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        let paused = self
            .engine
            .as_ref()
            .is_some_and(|e| e.device().is_paused());
        if !paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        cfg: load_cfg(&args.config),
        force_validation: args.validation,
        frame_limit: args.frames,
        window: None,
        engine: None,
        exiting: false,
        frames: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}
