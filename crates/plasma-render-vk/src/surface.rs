// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use plasma_render::{RenderError, RenderSize, SurfaceProvider};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::VkResultExt;

/// A surface provider that can mint a `VkSurfaceKHR`.
///
/// The device takes ownership of the returned handle and destroys it during
/// teardown, after the logical device and before the instance.
pub trait WindowSurface: SurfaceProvider {
    fn create_surface(
        &mut self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR, RenderError>;

    /// Last handle produced by [`create_surface`](Self::create_surface), or null.
    fn surface_handle(&self) -> vk::SurfaceKHR;
}

/// Window-system integration through `raw-window-handle`; covers every
/// platform `ash-window` knows about.
pub struct RawWindowSurface<W> {
    window: Arc<W>,
    size: RenderSize,
    handle: vk::SurfaceKHR,
}

impl<W: HasWindowHandle + HasDisplayHandle> RawWindowSurface<W> {
    pub fn new(window: Arc<W>, size: RenderSize) -> Self {
        Self {
            window,
            size,
            handle: vk::SurfaceKHR::null(),
        }
    }
}

fn handle_error(e: raw_window_handle::HandleError) -> RenderError {
    RenderError::InvalidArgument(format!("window handle unavailable: {e}"))
}

impl<W: HasWindowHandle + HasDisplayHandle> SurfaceProvider for RawWindowSurface<W> {
    fn required_extensions(&self) -> Result<Vec<&'static CStr>, RenderError> {
        let display = self.window.display_handle().map_err(handle_error)?.as_raw();
        let names = ash_window::enumerate_required_extensions(display)
            .vk_context("enumerate_required_extensions")?;
        // The names are 'static C strings owned by ash.
        Ok(names
            .iter()
            .map(|&p| -> &'static CStr { unsafe { CStr::from_ptr(p) } })
            .collect())
    }

    fn size(&self) -> RenderSize {
        self.size
    }
}

impl<W: HasWindowHandle + HasDisplayHandle> WindowSurface for RawWindowSurface<W> {
    fn create_surface(
        &mut self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR, RenderError> {
        let display = self.window.display_handle().map_err(handle_error)?.as_raw();
        let window = self.window.window_handle().map_err(handle_error)?.as_raw();
        let surface = unsafe { ash_window::create_surface(entry, instance, display, window, None) }
            .vk_context("ash_window::create_surface")?;
        self.handle = surface;
        Ok(surface)
    }

    fn surface_handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{
        DisplayHandle, HandleError, RawDisplayHandle, WaylandDisplayHandle, WindowHandle,
    };
    use std::ptr::NonNull;

    struct HeadlessWayland;

    impl HasDisplayHandle for HeadlessWayland {
        fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
            let raw = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(NonNull::dangling()));
            Ok(unsafe { DisplayHandle::borrow_raw(raw) })
        }
    }

    impl HasWindowHandle for HeadlessWayland {
        fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
            Err(HandleError::Unavailable)
        }
    }

    #[test]
    fn wayland_needs_surface_and_wayland_surface_extensions() {
        let surface = RawWindowSurface::new(Arc::new(HeadlessWayland), RenderSize::new(800, 600));
        let names = surface.required_extensions().unwrap();
        assert!(names.contains(&c"VK_KHR_surface"));
        assert!(names.contains(&c"VK_KHR_wayland_surface"));
        assert_eq!(surface.surface_handle(), vk::SurfaceKHR::null());
        assert_eq!(surface.size(), RenderSize::new(800, 600));
    }
}
