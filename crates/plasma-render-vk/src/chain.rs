// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use plasma_render::{RenderError, RenderSize};
use tracing::{debug, info};

use crate::adapter::QueueFamilies;
use crate::error::VkResultExt;

pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// `current_extent.width == u32::MAX` means the surface size follows the
/// swapchain, so the drawable size is clamped into the advertised range.
pub fn resolve_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: drawable
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: drawable
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// The extent to build against, or `None` while the surface has zero area.
/// Some platforms report a fixed 0x0 extent for a minimized window.
pub fn drawable_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    drawable: RenderSize,
) -> Option<vk::Extent2D> {
    let extent = resolve_extent(caps, drawable);
    (extent.width != 0 && extent.height != 0).then_some(extent)
}

/// One more than the minimum, capped by the maximum when there is one (0 = unbounded).
pub fn resolve_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        wanted
    } else {
        wanted.min(caps.max_image_count)
    }
}

pub fn select_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, RenderError> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space)
        .or_else(|| formats.first().copied())
        .ok_or_else(|| RenderError::NotSupported("surface advertises no formats".into()))
}

/// Swapchain plus one view per image. Not built while the surface is 0x0.
pub struct ChainTier {
    device: ash::Device,
    loader: swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl ChainTier {
    pub unsafe fn build(
        device: &ash::Device,
        loader: &swapchain::Device,
        surface_loader: &ash::khr::surface::Instance,
        adapter: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        families: QueueFamilies,
        drawable: RenderSize,
    ) -> Result<Option<Self>, RenderError> {
        let caps = unsafe { surface_loader.get_physical_device_surface_capabilities(adapter, surface) }
            .vk_context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(adapter, surface) }
            .vk_context("vkGetPhysicalDeviceSurfaceFormatsKHR")?;

        let Some(extent) = drawable_extent(&caps, drawable) else {
            debug!("vk: surface reports a 0x0 extent, chain not built");
            return Ok(None);
        };
        let surface_format = select_surface_format(&formats)?;
        let image_count = resolve_image_count(&caps);
        let (sharing_mode, family_indices) = families.sharing_mode();

        let sci = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface,
            min_image_count: image_count,
            image_format: surface_format.format,
            image_color_space: surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_indices.len() as u32,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: vk::PresentModeKHR::FIFO,
            clipped: vk::TRUE,
            ..Default::default()
        };

        let mut tier = Self {
            device: device.clone(),
            loader: loader.clone(),
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            views: Vec::new(),
            format: surface_format.format,
            extent,
        };

        tier.swapchain = unsafe { loader.create_swapchain(&sci, None) }
            .vk_context("vkCreateSwapchainKHR")?;
        tier.images = unsafe { loader.get_swapchain_images(tier.swapchain) }
            .vk_context("vkGetSwapchainImagesKHR")?;

        for &image in &tier.images {
            let vci = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: surface_format.format,
                components: vk::ComponentMapping::default(),
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = unsafe { device.create_image_view(&vci, None) }
                .vk_context("vkCreateImageView")?;
            tier.views.push(view);
        }

        info!(
            "vk: chain {}x{} {:?}, {} images (requested {image_count})",
            extent.width,
            extent.height,
            surface_format.format,
            tier.images.len()
        );
        Ok(Some(tier))
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for ChainTier {
    fn drop(&mut self) {
        unsafe {
            for view in self.views.drain(..) {
                if view != vk::ImageView::null() {
                    self.device.destroy_image_view(view, None);
                }
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
        debug!("vk: chain destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: (u32, u32), max: (u32, u32), current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    fn counts(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    #[test]
    fn sentinel_extent_follows_drawable() {
        let c = caps((1, 1), (4096, 4096), (u32::MAX, u32::MAX));
        let e = resolve_extent(&c, RenderSize::new(1920, 1080));
        assert_eq!((e.width, e.height), (1920, 1080));
    }

    #[test]
    fn sentinel_extent_is_clamped() {
        let c = caps((64, 64), (1024, 768), (u32::MAX, u32::MAX));
        let e = resolve_extent(&c, RenderSize::new(1920, 10));
        assert_eq!((e.width, e.height), (1024, 64));
    }

    #[test]
    fn fixed_extent_wins_over_drawable() {
        let c = caps((1, 1), (4096, 4096), (800, 600));
        let e = resolve_extent(&c, RenderSize::new(1920, 1080));
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn resolved_extent_stays_in_range() {
        let c = caps((16, 32), (2000, 1500), (u32::MAX, u32::MAX));
        for w in [0, 15, 16, 17, 640, 1999, 2000, 2001, 9999] {
            for h in [0, 31, 32, 480, 1500, 1501] {
                let e = resolve_extent(&c, RenderSize::new(w, h));
                assert!((16..=2000).contains(&e.width), "{w}x{h} -> {e:?}");
                assert!((32..=1500).contains(&e.height), "{w}x{h} -> {e:?}");
            }
        }
    }

    #[test]
    fn zero_area_surface_has_no_drawable_extent() {
        // minimized window: fixed 0x0 extent while the last resize was non-zero
        let c = caps((0, 0), (4096, 4096), (0, 0));
        assert_eq!(drawable_extent(&c, RenderSize::new(1280, 720)), None);

        let c = caps((0, 0), (4096, 4096), (1280, 0));
        assert_eq!(drawable_extent(&c, RenderSize::new(1280, 720)), None);

        let c = caps((0, 0), (4096, 4096), (u32::MAX, u32::MAX));
        assert_eq!(drawable_extent(&c, RenderSize::new(0, 720)), None);

        let e = drawable_extent(&c, RenderSize::new(1280, 720)).unwrap();
        assert_eq!((e.width, e.height), (1280, 720));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        assert_eq!(resolve_image_count(&counts(2, 3)), 3);
        assert_eq!(resolve_image_count(&counts(1, 0)), 2);
        assert_eq!(resolve_image_count(&counts(3, 3)), 3);
        for min in 1..6 {
            for max in (min + 1)..10 {
                let n = resolve_image_count(&counts(min, max));
                assert!(min + 1 <= n && n <= max);
            }
        }
    }

    #[test]
    fn preferred_format_is_picked_when_advertised() {
        let other = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let f = select_surface_format(&[other, PREFERRED_FORMAT]).unwrap();
        assert_eq!(f.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let first = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        // right format, wrong color space
        let near = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        };
        let f = select_surface_format(&[first, near]).unwrap();
        assert_eq!(f.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn no_formats_is_an_error() {
        assert!(select_surface_format(&[]).is_err());
    }
}
