// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;

use ash::khr::surface;
use ash::vk;
use plasma_render::RenderError;
use tracing::info;

use crate::error::VkResultExt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyCaps {
    pub graphics: bool,
    pub present: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    /// Image sharing for chain images: exclusive on one family, concurrent across two.
    pub fn sharing_mode(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.is_shared() {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (vk::SharingMode::CONCURRENT, self.unique())
        }
    }
}

/// First graphics family and first present family. No fallback: a device
/// that cannot present to the surface is rejected.
pub fn resolve_queue_families(caps: &[QueueFamilyCaps]) -> Result<QueueFamilies, RenderError> {
    let graphics = caps.iter().position(|c| c.graphics).ok_or_else(|| {
        RenderError::InitializationFailed("adapter has no graphics queue family".into())
    })?;
    let present = caps.iter().position(|c| c.present).ok_or_else(|| {
        RenderError::InitializationFailed("no queue family can present to the surface".into())
    })?;
    Ok(QueueFamilies {
        graphics: graphics as u32,
        present: present as u32,
    })
}

/// The physical GPU chosen for this engine.
#[derive(Clone, Debug)]
pub struct Adapter {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub families: Vec<QueueFamilyCaps>,
}

impl Adapter {
    /// Picks the first enumerated adapter. There is deliberately no scoring.
    pub unsafe fn select_first(instance: &ash::Instance) -> Result<Self, RenderError> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .vk_context("vkEnumeratePhysicalDevices")?;
        let handle = first_adapter(devices)?;

        let props = unsafe { instance.get_physical_device_properties(handle) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let families = unsafe { instance.get_physical_device_queue_family_properties(handle) }
            .iter()
            .map(|q| QueueFamilyCaps {
                graphics: q.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                present: false,
            })
            .collect::<Vec<_>>();

        info!(
            "vk: adapter selected: {name} ({} queue families)",
            families.len()
        );
        Ok(Self {
            handle,
            name,
            families,
        })
    }

    /// Fills in per-family presentation support against `surface`.
    pub unsafe fn probe_present_support(
        &mut self,
        loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(), RenderError> {
        for (i, caps) in self.families.iter_mut().enumerate() {
            caps.present = unsafe {
                loader.get_physical_device_surface_support(self.handle, i as u32, surface)
            }
            .vk_context("vkGetPhysicalDeviceSurfaceSupportKHR")?;
        }
        Ok(())
    }
}

fn first_adapter<T>(adapters: Vec<T>) -> Result<T, RenderError> {
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::NotSupported("no Vulkan adapters found".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use plasma_render::ResultCode;

    fn fam(graphics: bool, present: bool) -> QueueFamilyCaps {
        QueueFamilyCaps { graphics, present }
    }

    #[test]
    fn first_graphics_and_first_present_win() {
        let caps = [
            fam(false, false),
            fam(true, false),
            fam(true, true),
            fam(false, true),
        ];
        let q = resolve_queue_families(&caps).unwrap();
        assert_eq!(q, QueueFamilies { graphics: 1, present: 2 });
        assert!(!q.is_shared());
        assert_eq!(q.unique(), vec![1, 2]);
    }

    #[test]
    fn shared_family_uses_exclusive_sharing() {
        let q = resolve_queue_families(&[fam(true, true)]).unwrap();
        assert!(q.is_shared());
        let (mode, indices) = q.sharing_mode();
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());
    }

    #[test]
    fn split_families_share_concurrently() {
        let q = QueueFamilies {
            graphics: 0,
            present: 3,
        };
        let (mode, indices) = q.sharing_mode();
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, vec![0, 3]);
    }

    #[test]
    fn missing_present_family_fails_initialization() {
        let err = resolve_queue_families(&[fam(true, false), fam(false, false)]).unwrap_err();
        assert_eq!(err.code(), ResultCode::InitializationFailed);
    }

    #[test]
    fn missing_graphics_family_fails_initialization() {
        let err = resolve_queue_families(&[fam(false, true)]).unwrap_err();
        assert_eq!(err.code(), ResultCode::InitializationFailed);
    }

    #[test]
    fn empty_adapter_list_is_not_supported() {
        let err = first_adapter::<u32>(Vec::new()).unwrap_err();
        assert_eq!(err.code(), ResultCode::NotSupported);
        assert_eq!(first_adapter(vec![7, 8]).unwrap(), 7);
    }
}
