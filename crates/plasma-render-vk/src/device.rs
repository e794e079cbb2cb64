// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use plasma_render::{RenderError, Vertex};
use tracing::{debug, info};

use crate::adapter::{Adapter, QueueFamilies};
use crate::error::VkResultExt;

/// Host-visible vertex storage. Not bound by the fixed pipeline.
struct MeshBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    vertex_count: u32,
}

impl MeshBuffer {
    unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            if self.buffer != vk::Buffer::null() {
                device.destroy_buffer(self.buffer, None);
            }
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
            }
        }
    }
}

pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// Swaps `slot` for a freshly made value. An occupied slot is only
/// replaced after `idle` succeeds; on any failure the slot keeps what it had.
fn replace_after_idle<T>(
    slot: &mut Option<T>,
    idle: impl FnOnce() -> Result<(), RenderError>,
    make: impl FnOnce() -> Result<T, RenderError>,
    destroy: impl FnOnce(T),
) -> Result<(), RenderError> {
    if slot.is_some() {
        idle()?;
    }
    let fresh = make()?;
    if let Some(old) = slot.replace(fresh) {
        destroy(old);
    }
    Ok(())
}

/// Logical device, its queues, the graphics command pool, and device-scoped buffers.
pub struct DeviceTier {
    pub device: ash::Device,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,
    pub command_pool: vk::CommandPool,
    memory_props: vk::PhysicalDeviceMemoryProperties,
    mesh: Option<MeshBuffer>,
}

impl DeviceTier {
    /// Requests one queue from each distinct family.
    pub unsafe fn create(
        instance: &ash::Instance,
        adapter: &Adapter,
        families: QueueFamilies,
    ) -> Result<Self, RenderError> {
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures::default();
        let device_exts = [swapchain::NAME.as_ptr()];
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        let device = unsafe { instance.create_device(adapter.handle, &dinfo, None) }
            .vk_context("vkCreateDevice")?;
        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };
        let swapchain_loader = swapchain::Device::new(instance, &device);
        let memory_props = unsafe { instance.get_physical_device_memory_properties(adapter.handle) };

        let mut tier = Self {
            device,
            families,
            graphics_queue,
            present_queue,
            swapchain_loader,
            command_pool: vk::CommandPool::null(),
            memory_props,
            mesh: None,
        };

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: families.graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        tier.command_pool = unsafe { tier.device.create_command_pool(&pool_info, None) }
            .vk_context("vkCreateCommandPool")?;

        info!(
            "vk: logical device ready (graphics family {}, present family {})",
            families.graphics, families.present
        );
        Ok(tier)
    }

    pub unsafe fn wait_idle(&self) -> Result<(), RenderError> {
        unsafe { self.device.device_wait_idle() }.vk_context("vkDeviceWaitIdle")
    }

    pub fn mesh_vertex_count(&self) -> u32 {
        self.mesh.as_ref().map_or(0, |m| m.vertex_count)
    }

    /// Copies `vertices` into a fresh host-visible vertex buffer, replacing
    /// any previous upload once the device is idle.
    pub unsafe fn upload_mesh(&mut self, vertices: &[Vertex]) -> Result<(), RenderError> {
        if vertices.is_empty() {
            return Err(RenderError::InvalidArgument("mesh has no vertices".into()));
        }
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let mut slot = self.mesh.take();
        let result = replace_after_idle(
            &mut slot,
            || unsafe { self.wait_idle() },
            || unsafe { self.create_host_buffer(bytes, vertices.len() as u32) },
            |old| unsafe { old.destroy(&self.device) },
        );
        self.mesh = slot;
        result?;
        debug!("vk: uploaded {} vertices ({} bytes)", vertices.len(), bytes.len());
        Ok(())
    }

    unsafe fn create_host_buffer(
        &self,
        bytes: &[u8],
        vertex_count: u32,
    ) -> Result<MeshBuffer, RenderError> {
        let d = &self.device;
        let size = bytes.len() as vk::DeviceSize;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let mut mesh = MeshBuffer {
            buffer: unsafe { d.create_buffer(&bci, None) }.vk_context("vkCreateBuffer")?,
            memory: vk::DeviceMemory::null(),
            vertex_count,
        };

        let result = (|| -> Result<(), RenderError> {
            let req = unsafe { d.get_buffer_memory_requirements(mesh.buffer) };
            let memory_type_index = find_memory_type(
                &self.memory_props,
                req.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .ok_or_else(|| RenderError::NotSupported("no host-visible memory type".into()))?;
            let alloc = vk::MemoryAllocateInfo {
                s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                allocation_size: req.size,
                memory_type_index,
                ..Default::default()
            };
            mesh.memory =
                unsafe { d.allocate_memory(&alloc, None) }.vk_context("vkAllocateMemory")?;
            unsafe { d.bind_buffer_memory(mesh.buffer, mesh.memory, 0) }
                .vk_context("vkBindBufferMemory")?;

            let ptr = unsafe { d.map_memory(mesh.memory, 0, size, vk::MemoryMapFlags::empty()) }
                .vk_context("vkMapMemory")?;
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
                d.unmap_memory(mesh.memory);
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok(mesh),
            Err(e) => {
                unsafe { mesh.destroy(d) };
                Err(e)
            }
        }
    }
}

impl Drop for DeviceTier {
    fn drop(&mut self) {
        unsafe {
            if let Some(mesh) = self.mesh.take() {
                mesh.destroy(&self.device);
            }
            if self.command_pool != vk::CommandPool::null() {
                self.device.destroy_command_pool(self.command_pool, None);
                self.command_pool = vk::CommandPool::null();
            }
            self.device.destroy_device(None);
        }
        debug!("vk: logical device destroyed");
    }
}
