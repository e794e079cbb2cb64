// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr, CString};

use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use plasma_render::RenderError;
use tracing::{debug, error, info, trace, warn};

use crate::error::VkResultExt;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || unsafe { (*data).p_message }.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

fn has_name(names: impl IntoIterator<Item = [std::ffi::c_char; 256]>, wanted: &CStr) -> bool {
    names
        .into_iter()
        .any(|raw| unsafe { CStr::from_ptr(raw.as_ptr()) } == wanted)
}

/// Loader entry, instance, and the optional validation messenger.
pub struct InstanceTier {
    pub entry: Entry,
    pub instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl InstanceTier {
    /// STRICT ORDER: the instance must exist before any surface or adapter query.
    pub unsafe fn create(
        app_name: &str,
        extensions: &[CString],
        validation: bool,
    ) -> Result<Self, RenderError> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::NotSupported(format!("Vulkan loader: {e}")))?;

        let app = CString::new(app_name)
            .map_err(|_| RenderError::InvalidArgument("app name contains NUL".into()))?;
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app.as_ptr(),
            application_version: 0,
            p_engine_name: app.as_ptr(),
            engine_version: 0,
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };

        let mut ext_ptrs: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|e| e.as_ptr()).collect();
        let mut layer_ptrs: Vec<*const std::ffi::c_char> = Vec::new();

        let mut want_messenger = false;
        if validation {
            let layers = unsafe { entry.enumerate_instance_layer_properties() }
                .vk_context("vkEnumerateInstanceLayerProperties")?;
            if has_name(layers.iter().map(|l| l.layer_name), VALIDATION_LAYER) {
                layer_ptrs.push(VALIDATION_LAYER.as_ptr());
            } else {
                warn!("vk: validation requested but {VALIDATION_LAYER:?} is not installed");
            }

            let exts = unsafe { entry.enumerate_instance_extension_properties(None) }
                .vk_context("vkEnumerateInstanceExtensionProperties")?;
            if has_name(exts.iter().map(|e| e.extension_name), debug_utils::NAME) {
                if !extensions.iter().any(|e| e.as_c_str() == debug_utils::NAME) {
                    ext_ptrs.push(debug_utils::NAME.as_ptr());
                }
                want_messenger = true;
            }
        }

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            enabled_layer_count: layer_ptrs.len() as u32,
            pp_enabled_layer_names: layer_ptrs.as_ptr(),
            ..Default::default()
        };
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .vk_context("vkCreateInstance")?;

        let mut tier = Self {
            entry,
            instance,
            debug: None,
        };

        if want_messenger {
            let loader = debug_utils::Instance::new(&tier.entry, &tier.instance);
            let ci = vk::DebugUtilsMessengerCreateInfoEXT {
                s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_callback),
                ..Default::default()
            };
            match unsafe { loader.create_debug_utils_messenger(&ci, None) } {
                Ok(m) => tier.debug = Some((loader, m)),
                Err(e) => warn!("vk: debug messenger unavailable: {e:?}"),
            }
        }

        info!(
            "vk: instance created ({} extensions, validation={})",
            ext_ptrs.len(),
            !layer_ptrs.is_empty()
        );
        Ok(tier)
    }
}

impl Drop for InstanceTier {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                if messenger != vk::DebugUtilsMessengerEXT::null() {
                    loader.destroy_debug_utils_messenger(messenger, None);
                }
            }
            self.instance.destroy_instance(None);
        }
        debug!("vk: instance destroyed");
    }
}

/// The window surface. Destroyed after the logical device, before the instance.
pub struct SurfaceTier {
    pub loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl SurfaceTier {
    pub fn new(tier: &InstanceTier, surface: vk::SurfaceKHR) -> Self {
        Self {
            loader: surface::Instance::new(&tier.entry, &tier.instance),
            surface,
        }
    }
}

impl Drop for SurfaceTier {
    fn drop(&mut self) {
        if self.surface != vk::SurfaceKHR::null() {
            unsafe { self.loader.destroy_surface(self.surface, None) };
            self.surface = vk::SurfaceKHR::null();
            debug!("vk: surface destroyed");
        }
    }
}
