// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;

mod engine;
mod error;

pub use engine::Engine;
pub use error::{RenderError, ResultCode};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized or collapsed drawable has nothing to present into.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Position-only vertex. Accepted by [`GraphicsDevice::upload_mesh_data`];
/// the fixed pipeline does not bind it yet.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vertex {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Vulkan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub backend: BackendKind,
    pub frames_in_flight: u32,
    /// Uploaded vertices are consumed by draws.
    pub binds_mesh_data: bool,
}

/// Platform side of a window: what the backend needs to know before it can present.
pub trait SurfaceProvider {
    /// Instance extensions the backend must enable to create this surface.
    fn required_extensions(&self) -> Result<Vec<&'static CStr>, RenderError>;

    /// Current drawable size in pixels.
    fn size(&self) -> RenderSize;
}

/// Capability interface the engine drives. One backend exists today.
pub trait GraphicsDevice {
    type Surface: SurfaceProvider + ?Sized;

    fn capabilities(&self) -> DeviceCapabilities;

    /// Queue instance extensions for the next [`initialize`](Self::initialize).
    fn add_extensions(&mut self, names: &[&CStr]);

    fn initialize(&mut self) -> Result<(), RenderError>;

    /// Binds the device to `surface` and builds everything that presents into it.
    fn create_surface(&mut self, surface: &mut Self::Surface) -> Result<(), RenderError>;

    fn upload_mesh_data(&mut self, vertices: &[Vertex]) -> Result<(), RenderError>;

    fn draw_frame(&mut self) -> Result<(), RenderError>;

    /// Records a new drawable size; surface-dependent state is rebuilt lazily.
    fn resize(&mut self, size: RenderSize) -> Result<(), RenderError>;

    fn device_name(&self) -> &str;

    /// Releases every GPU object. Calling it again is a no-op.
    fn shutdown(&mut self) -> Result<(), RenderError>;
}
