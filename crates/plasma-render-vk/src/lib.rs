// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend for the plasma engine.
//!
//! GPU objects are grouped into ownership tiers (see [`tiers`]). The device
//! builds them bottom-up and tears them down newest first.
#![deny(unsafe_op_in_unsafe_fn)]

use std::ffi::{CStr, CString};

use plasma_render::{
    BackendKind, DeviceCapabilities, GraphicsDevice, RenderError, RenderSize, Vertex,
};
use tracing::{debug, error, info, warn};

mod adapter;
mod chain;
mod commands;
mod config;
mod device;
mod error;
mod frame;
mod instance;
mod pipeline;
mod surface;
pub mod tiers;

pub use config::{VkDeviceConfig, DEFAULT_FRAGMENT_SHADER, DEFAULT_VERTEX_SHADER};
pub use error::{map_vk, VkResultExt};
pub use frame::{FrameStage, FrameStats};
pub use surface::{RawWindowSurface, WindowSurface};

use adapter::{resolve_queue_families, Adapter};
use chain::ChainTier;
use device::DeviceTier;
use frame::{run_frame, FrameTier, VkFrame};
use instance::{InstanceTier, SurfaceTier};
use pipeline::PipelineTier;
use tiers::{Tier, TierStack};

/// Reported by [`GraphicsDevice::device_name`] until an adapter is selected.
pub const DEFAULT_DEVICE_NAME: &str = "Vulkan Backend";

pub struct VkGraphicsDevice {
    config: VkDeviceConfig,
    extensions: Vec<CString>,
    adapter: Option<Adapter>,
    name: String,

    // Declared newest tier first; `shutdown` unwinds the stack explicitly.
    pipeline: Option<PipelineTier>,
    frame: Option<FrameTier>,
    chain: Option<ChainTier>,
    device: Option<DeviceTier>,
    surface: Option<SurfaceTier>,
    instance: Option<InstanceTier>,
    tiers: TierStack,

    drawable: RenderSize,
    needs_rebuild: bool,
    stats: FrameStats,
}

impl VkGraphicsDevice {
    pub fn new(config: VkDeviceConfig) -> Self {
        Self {
            config,
            extensions: Vec::new(),
            adapter: None,
            name: DEFAULT_DEVICE_NAME.to_string(),
            pipeline: None,
            frame: None,
            chain: None,
            device: None,
            surface: None,
            instance: None,
            tiers: TierStack::default(),
            drawable: RenderSize::default(),
            needs_rebuild: false,
            stats: FrameStats::default(),
        }
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.stats
    }

    /// Instance extensions requested so far, in insertion order.
    pub fn extensions(&self) -> &[CString] {
        &self.extensions
    }

    /// Vertices held by the last successful upload.
    pub fn mesh_vertex_count(&self) -> u32 {
        self.device.as_ref().map_or(0, DeviceTier::mesh_vertex_count)
    }

    /// Rendering is paused while the drawable has zero area.
    pub fn is_paused(&self) -> bool {
        self.drawable.is_empty()
    }

    pub fn wait_idle(&self) -> Result<(), RenderError> {
        match &self.device {
            Some(device) => unsafe { device.wait_idle() },
            None => Ok(()),
        }
    }

    fn release(&mut self, tier: Tier) {
        debug!("vk: releasing {tier:?} tier");
        match tier {
            Tier::Pipeline => self.pipeline = None,
            Tier::Frame => self.frame = None,
            Tier::Chain => self.chain = None,
            Tier::Device => self.device = None,
            Tier::Surface => self.surface = None,
            Tier::Instance => self.instance = None,
        }
    }

    /// Builds chain, frame and pipeline tiers against the current drawable.
    /// A zero-area drawable leaves them unbuilt until the next resize; a
    /// zero-area surface leaves them unbuilt and retries on the next frame.
    fn build_surface_tiers(&mut self) -> Result<(), RenderError> {
        if self.drawable.is_empty() {
            info!("vk: drawable is 0x0, rendering paused");
            self.needs_rebuild = true;
            return Ok(());
        }
        let (Some(adapter), Some(surface), Some(device)) =
            (&self.adapter, &self.surface, &self.device)
        else {
            return Err(RenderError::InitializationFailed(
                "surface tiers need a logical device".into(),
            ));
        };

        let built = unsafe {
            ChainTier::build(
                &device.device,
                &device.swapchain_loader,
                &surface.loader,
                adapter.handle,
                surface.surface,
                device.families,
                self.drawable,
            )
        }?;
        let Some(chain) = built else {
            self.needs_rebuild = true;
            return Ok(());
        };
        self.chain = Some(chain);
        self.tiers.push(Tier::Chain);

        let image_count = self.chain.as_ref().map_or(0, ChainTier::image_count);
        let frame = unsafe { FrameTier::build(&device.device, device.command_pool, image_count) }?;
        self.frame = Some(frame);
        self.tiers.push(Tier::Frame);

        let Some(chain) = &self.chain else {
            return Err(RenderError::Failure("chain tier vanished".into()));
        };
        let pipeline = unsafe {
            PipelineTier::build(
                &device.device,
                chain.format,
                chain.extent,
                &chain.views,
                &self.config.vertex_shader,
                &self.config.fragment_shader,
            )
        }?;
        self.pipeline = Some(pipeline);
        self.tiers.push(Tier::Pipeline);

        self.needs_rebuild = false;
        Ok(())
    }

    /// Drops everything built on the chain and builds it again.
    pub fn rebuild_chain(&mut self) -> Result<(), RenderError> {
        if !self.tiers.contains(Tier::Device) {
            return Err(RenderError::InitializationFailed(
                "no logical device to rebuild on".into(),
            ));
        }
        // STRICT: nothing may be in flight while chain-dependent handles die.
        self.wait_idle()?;
        for tier in self.tiers.unwind_through(Tier::Chain) {
            self.release(tier);
        }
        self.build_surface_tiers()?;
        if self.tiers.contains(Tier::Chain) {
            self.stats.chain_rebuilds += 1;
        }
        Ok(())
    }

    /// An instance without a selected adapter is left over from a failed
    /// `initialize` and does not count.
    fn is_initialized(&self) -> bool {
        self.tiers.contains(Tier::Instance) && self.adapter.is_some()
    }
}

impl Default for VkGraphicsDevice {
    fn default() -> Self {
        Self::new(VkDeviceConfig::default())
    }
}

impl GraphicsDevice for VkGraphicsDevice {
    type Surface = dyn WindowSurface;

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            backend: BackendKind::Vulkan,
            frames_in_flight: 1,
            binds_mesh_data: false,
        }
    }

    fn add_extensions(&mut self, names: &[&CStr]) {
        for &name in names {
            if !self.extensions.iter().any(|e| e.as_c_str() == name) {
                self.extensions.push(name.to_owned());
            }
        }
    }

    fn initialize(&mut self) -> Result<(), RenderError> {
        if self.is_initialized() {
            debug!("vk: initialize called twice; keeping the existing instance");
            return Ok(());
        }
        for tier in self.tiers.unwind_through(Tier::Instance) {
            self.release(tier);
        }
        let instance = unsafe {
            InstanceTier::create(&self.config.app_name, &self.extensions, self.config.validation)
        }?;
        self.instance = Some(instance);
        self.tiers.push(Tier::Instance);

        let Some(instance) = &self.instance else {
            return Err(RenderError::Failure("instance tier vanished".into()));
        };
        let adapter = match unsafe { Adapter::select_first(&instance.instance) } {
            Ok(adapter) => adapter,
            Err(e) => {
                for tier in self.tiers.unwind_through(Tier::Instance) {
                    self.release(tier);
                }
                return Err(e);
            }
        };
        self.name = adapter.name.clone();
        self.adapter = Some(adapter);
        Ok(())
    }

    fn create_surface(&mut self, surface: &mut Self::Surface) -> Result<(), RenderError> {
        let Some(instance) = &self.instance else {
            return Err(RenderError::InitializationFailed(
                "initialize must run before create_surface".into(),
            ));
        };
        if self.tiers.contains(Tier::Surface) {
            return Err(RenderError::InvalidArgument(
                "a surface is already bound".into(),
            ));
        }

        let handle = surface.create_surface(&instance.entry, &instance.instance)?;
        let tier = SurfaceTier::new(instance, handle);
        self.surface = Some(tier);
        self.tiers.push(Tier::Surface);
        self.drawable = surface.size();

        let (Some(adapter), Some(surface_tier)) = (self.adapter.as_mut(), &self.surface) else {
            return Err(RenderError::InitializationFailed(
                "no adapter selected".into(),
            ));
        };
        unsafe { adapter.probe_present_support(&surface_tier.loader, surface_tier.surface) }?;
        let families = resolve_queue_families(&adapter.families)?;

        let Some(instance) = &self.instance else {
            return Err(RenderError::Failure("instance tier vanished".into()));
        };
        let device = unsafe { DeviceTier::create(&instance.instance, adapter, families) }?;
        self.device = Some(device);
        self.tiers.push(Tier::Device);

        self.build_surface_tiers()
    }

    fn upload_mesh_data(&mut self, vertices: &[Vertex]) -> Result<(), RenderError> {
        if vertices.is_empty() {
            return Err(RenderError::InvalidArgument("mesh has no vertices".into()));
        }
        let Some(device) = self.device.as_mut() else {
            return Err(RenderError::InitializationFailed(
                "no logical device for mesh upload".into(),
            ));
        };
        unsafe { device.upload_mesh(vertices) }
    }

    fn draw_frame(&mut self) -> Result<(), RenderError> {
        if !self.tiers.contains(Tier::Device) {
            return Err(RenderError::InitializationFailed(
                "draw_frame before create_surface".into(),
            ));
        }
        if self.is_paused() {
            return Ok(());
        }
        if self.needs_rebuild || !self.tiers.contains(Tier::Pipeline) {
            self.rebuild_chain()?;
        }

        let (Some(device), Some(chain), Some(frame), Some(pipeline)) =
            (&self.device, &self.chain, &self.frame, &self.pipeline)
        else {
            if self.needs_rebuild {
                // surface is 0x0; try again next frame
                return Ok(());
            }
            return Err(RenderError::Failure("frame tiers missing after rebuild".into()));
        };
        let mut ops = VkFrame {
            device,
            chain,
            frame,
            pipeline,
            clear_color: self.config.clear_color,
        };

        match run_frame(&mut ops, self.config.timeout_ns(), &mut self.stats) {
            Ok(outcome) => {
                if outcome.chain_is_stale() {
                    debug!("vk: chain stale after frame ({outcome:?}), rebuilding next frame");
                    self.needs_rebuild = true;
                }
                Ok(())
            }
            Err(failure) => {
                if failure.needs_rebuild() {
                    self.needs_rebuild = true;
                }
                if failure.error.is_recoverable() && self.needs_rebuild {
                    warn!("vk: {failure}; chain will be rebuilt");
                    return Ok(());
                }
                error!("vk: {failure}");
                Err(failure.error)
            }
        }
    }

    fn resize(&mut self, size: RenderSize) -> Result<(), RenderError> {
        if size == self.drawable {
            return Ok(());
        }
        if size.is_empty() {
            info!("vk: drawable {}x{}, pausing", size.width, size.height);
        } else if self.drawable.is_empty() {
            info!("vk: drawable {}x{}, resuming", size.width, size.height);
        }
        self.drawable = size;
        self.needs_rebuild = true;
        Ok(())
    }

    fn device_name(&self) -> &str {
        &self.name
    }

    fn shutdown(&mut self) -> Result<(), RenderError> {
        if self.tiers.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.wait_idle() {
            warn!("vk: wait idle before teardown failed: {e}");
        }
        // STRICT ORDER: newest tier first.
        while let Some(tier) = self.tiers.pop() {
            self.release(tier);
        }
        self.adapter = None;
        self.name = DEFAULT_DEVICE_NAME.to_string();
        self.needs_rebuild = false;
        info!("vk: device shut down");
        Ok(())
    }
}

impl Drop for VkGraphicsDevice {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("vk: shutdown on drop failed: {e}");
        }
    }
}
