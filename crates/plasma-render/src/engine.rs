// SPDX-License-Identifier: CEPL-1.0
use tracing::{error, info, warn};

use crate::{GraphicsDevice, RenderError, RenderSize, SurfaceProvider, Vertex};

/// Owns one graphics device and the window surface it presents into.
///
/// The surface is kept alive for as long as the device may reference it and
/// is released only after the device has shut down.
pub struct Engine<D: GraphicsDevice> {
    device: D,
    surface: Option<Box<D::Surface>>,
    running: bool,
}

impl<D: GraphicsDevice> Engine<D> {
    pub fn new(device: D) -> Self {
        info!("engine: created ({:?} backend)", device.capabilities().backend);
        Self {
            device,
            surface: None,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn device_name(&self) -> &str {
        self.device.device_name()
    }

    /// Initializes the device against `surface`. Running is set only when
    /// every step succeeds; on failure the partially built device is released.
    pub fn attach_window(&mut self, surface: Option<Box<D::Surface>>) -> Result<(), RenderError> {
        let Some(mut surface) = surface else {
            warn!("engine: attach_window called without a surface");
            return Err(RenderError::InvalidArgument(
                "no surface provider supplied".into(),
            ));
        };
        if self.running {
            return Err(RenderError::InvalidArgument(
                "a window is already attached".into(),
            ));
        }

        match self.bring_up(surface.as_mut()) {
            Ok(()) => {
                self.surface = Some(surface);
                self.running = true;
                info!("engine: running on {}", self.device.device_name());
                Ok(())
            }
            Err(e) => {
                error!("engine: failed to attach window: {e}");
                if let Err(teardown) = self.device.shutdown() {
                    warn!("engine: teardown after failed attach: {teardown}");
                }
                Err(e)
            }
        }
    }

    fn bring_up(&mut self, surface: &mut D::Surface) -> Result<(), RenderError> {
        let extensions = surface.required_extensions()?;
        self.device.add_extensions(&extensions);
        self.device.initialize()?;
        self.device.create_surface(surface)
    }

    pub fn upload_mesh(&mut self, vertices: &[Vertex]) -> Result<(), RenderError> {
        self.device.upload_mesh_data(vertices)
    }

    /// Draws one frame when a window is attached.
    pub fn run_frame(&mut self) -> Result<(), RenderError> {
        if !self.running {
            return Err(RenderError::InitializationFailed(
                "engine is not running".into(),
            ));
        }
        self.device.draw_frame()
    }

    pub fn resize(&mut self, size: RenderSize) -> Result<(), RenderError> {
        if !self.running {
            return Ok(());
        }
        self.device.resize(size)
    }

    /// Stops rendering and releases the device before the surface. Idempotent.
    pub fn shutdown(&mut self) -> Result<(), RenderError> {
        if self.running {
            info!("engine: shutting down");
        }
        self.running = false;
        let result = self.device.shutdown();
        self.surface = None;
        result
    }
}

impl<D: GraphicsDevice> Drop for Engine<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("engine: shutdown on drop failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BackendKind, DeviceCapabilities, ResultCode};
    use std::cell::RefCell;
    use std::ffi::CStr;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct FakeSurface {
        size: RenderSize,
    }

    impl SurfaceProvider for FakeSurface {
        fn required_extensions(&self) -> Result<Vec<&'static CStr>, RenderError> {
            Ok(vec![c"VK_KHR_surface", c"VK_KHR_wayland_surface"])
        }

        fn size(&self) -> RenderSize {
            self.size
        }
    }

    #[derive(Default)]
    struct FakeDevice {
        log: Log,
        fail_initialize: bool,
        fail_surface: bool,
        live: bool,
    }

    impl FakeDevice {
        fn push(&self, s: impl Into<String>) {
            self.log.borrow_mut().push(s.into());
        }
    }

    impl GraphicsDevice for FakeDevice {
        type Surface = FakeSurface;

        fn capabilities(&self) -> DeviceCapabilities {
            DeviceCapabilities {
                backend: BackendKind::Vulkan,
                frames_in_flight: 1,
                binds_mesh_data: false,
            }
        }

        fn add_extensions(&mut self, names: &[&CStr]) {
            self.push(format!("extensions:{}", names.len()));
        }

        fn initialize(&mut self) -> Result<(), RenderError> {
            self.push("initialize");
            if self.fail_initialize {
                return Err(RenderError::NotSupported("no adapters".into()));
            }
            self.live = true;
            Ok(())
        }

        fn create_surface(&mut self, surface: &mut FakeSurface) -> Result<(), RenderError> {
            self.push(format!(
                "surface:{}x{}",
                surface.size.width, surface.size.height
            ));
            if self.fail_surface {
                return Err(RenderError::InitializationFailed(
                    "no present family".into(),
                ));
            }
            Ok(())
        }

        fn upload_mesh_data(&mut self, vertices: &[Vertex]) -> Result<(), RenderError> {
            self.push(format!("mesh:{}", vertices.len()));
            Ok(())
        }

        fn draw_frame(&mut self) -> Result<(), RenderError> {
            self.push("draw");
            Ok(())
        }

        fn resize(&mut self, size: RenderSize) -> Result<(), RenderError> {
            self.push(format!("resize:{}x{}", size.width, size.height));
            Ok(())
        }

        fn device_name(&self) -> &str {
            "fake gpu"
        }

        fn shutdown(&mut self) -> Result<(), RenderError> {
            if self.live {
                self.push("shutdown");
                self.live = false;
            }
            Ok(())
        }
    }

    fn surface() -> Option<Box<FakeSurface>> {
        Some(Box::new(FakeSurface {
            size: RenderSize::new(1920, 1080),
        }))
    }

    #[test]
    fn attach_without_surface_fails_and_stays_stopped() {
        let mut engine = Engine::new(FakeDevice::default());
        let err = engine.attach_window(None).unwrap_err();
        assert_eq!(err.code(), ResultCode::InvalidArgument);
        assert!(!engine.is_running());
        assert!(engine.device().log.borrow().is_empty());
    }

    #[test]
    fn attach_runs_extensions_initialize_surface_in_order() {
        let log = Log::default();
        let mut engine = Engine::new(FakeDevice {
            log: log.clone(),
            ..Default::default()
        });
        engine.attach_window(surface()).unwrap();
        assert!(engine.is_running());
        assert_eq!(
            *log.borrow(),
            vec!["extensions:2", "initialize", "surface:1920x1080"]
        );
    }

    #[test]
    fn failed_initialize_leaves_engine_stopped() {
        let log = Log::default();
        let mut engine = Engine::new(FakeDevice {
            log: log.clone(),
            fail_initialize: true,
            ..Default::default()
        });
        let err = engine.attach_window(surface()).unwrap_err();
        assert_eq!(err.code(), ResultCode::NotSupported);
        assert!(!engine.is_running());
        assert!(!log.borrow().iter().any(|e| e.starts_with("surface")));
    }

    #[test]
    fn failed_surface_releases_device() {
        let log = Log::default();
        let mut engine = Engine::new(FakeDevice {
            log: log.clone(),
            fail_surface: true,
            ..Default::default()
        });
        assert!(engine.attach_window(surface()).is_err());
        assert!(!engine.is_running());
        assert_eq!(log.borrow().last().map(String::as_str), Some("shutdown"));
    }

    #[test]
    fn frames_require_a_running_engine() {
        let mut engine = Engine::new(FakeDevice::default());
        assert_eq!(
            engine.run_frame().unwrap_err().code(),
            ResultCode::InitializationFailed
        );
        engine.attach_window(surface()).unwrap();
        engine.run_frame().unwrap();
        engine.run_frame().unwrap();
        let draws = engine
            .device()
            .log
            .borrow()
            .iter()
            .filter(|e| *e == "draw")
            .count();
        assert_eq!(draws, 2);
    }

    #[test]
    fn shutdown_twice_is_a_no_op() {
        let log = Log::default();
        let mut engine = Engine::new(FakeDevice {
            log: log.clone(),
            ..Default::default()
        });
        engine.attach_window(surface()).unwrap();
        engine.shutdown().unwrap();
        engine.shutdown().unwrap();
        assert!(!engine.is_running());
        let shutdowns = log.borrow().iter().filter(|e| *e == "shutdown").count();
        assert_eq!(shutdowns, 1);
        drop(engine);
        let shutdowns = log.borrow().iter().filter(|e| *e == "shutdown").count();
        assert_eq!(shutdowns, 1);
    }

    #[test]
    fn resize_is_forwarded_only_while_running() {
        let log = Log::default();
        let mut engine = Engine::new(FakeDevice {
            log: log.clone(),
            ..Default::default()
        });
        engine.resize(RenderSize::new(640, 480)).unwrap();
        assert!(log.borrow().is_empty());
        engine.attach_window(surface()).unwrap();
        engine.resize(RenderSize::new(640, 480)).unwrap();
        assert_eq!(log.borrow().last().map(String::as_str), Some("resize:640x480"));
    }
}
