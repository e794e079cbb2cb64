// SPDX-License-Identifier: CEPL-1.0
//! Single in-flight frame protocol.
//!
//! One fence and two semaphores are reused every frame. The ordering lives in
//! [`run_frame`], generic over [`FrameOps`] so the Vulkan calls and the
//! protocol can be exercised separately.

use ash::vk;
use plasma_render::RenderError;
use thiserror::Error;
use tracing::debug;

use crate::chain::ChainTier;
use crate::commands::{self, RecordTarget};
use crate::device::DeviceTier;
use crate::error::{map_vk, VkResultExt};
use crate::pipeline::PipelineTier;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameStage {
    Wait,
    Acquire,
    Record,
    Submit,
    Present,
}

#[derive(Debug, Error)]
#[error("frame failed during {stage:?}: {error}")]
pub struct FrameFailure {
    pub stage: FrameStage,
    #[source]
    pub error: RenderError,
}

impl FrameFailure {
    fn at(stage: FrameStage) -> impl FnOnce(RenderError) -> Self {
        move |error| Self { stage, error }
    }

    /// Once the fence has been reset the frame slot is only usable again
    /// after the chain and frame tiers are rebuilt.
    pub fn needs_rebuild(&self) -> bool {
        self.stage >= FrameStage::Record || matches!(self.error, RenderError::ChainOutOfDate)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { index: u32 },
    /// Presented, but the chain no longer matches the surface.
    PresentedStale { index: u32 },
    /// Acquire reported the chain out of date; nothing was submitted.
    Skipped,
}

impl FrameOutcome {
    pub fn chain_is_stale(&self) -> bool {
        !matches!(self, FrameOutcome::Presented { .. })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub fence_waits: u64,
    pub fence_resets: u64,
    pub image_acquires: u64,
    pub submits: u64,
    pub presents: u64,
    pub chain_rebuilds: u64,
}

pub trait FrameOps {
    fn wait_fence(&mut self, timeout_ns: u64) -> Result<(), RenderError>;
    fn reset_fence(&mut self) -> Result<(), RenderError>;
    fn acquire(&mut self, timeout_ns: u64) -> Result<Acquired, RenderError>;
    fn record(&mut self, index: u32) -> Result<(), RenderError>;
    fn submit(&mut self, index: u32) -> Result<(), RenderError>;
    /// Returns `true` when the present was suboptimal.
    fn present(&mut self, index: u32) -> Result<bool, RenderError>;
}

/// STRICT ORDER: wait fence, acquire, reset fence, record, submit, present.
///
/// The fence is reset only after an image was acquired, so an acquire that
/// bails out leaves the fence signaled for the next frame.
pub fn run_frame<O: FrameOps + ?Sized>(
    ops: &mut O,
    timeout_ns: u64,
    stats: &mut FrameStats,
) -> Result<FrameOutcome, FrameFailure> {
    ops.wait_fence(timeout_ns)
        .map_err(FrameFailure::at(FrameStage::Wait))?;
    stats.fence_waits += 1;

    let (index, acquire_suboptimal) = match ops.acquire(timeout_ns) {
        Ok(Acquired::Image { index, suboptimal }) => (index, suboptimal),
        Ok(Acquired::OutOfDate) | Err(RenderError::ChainOutOfDate) => {
            return Ok(FrameOutcome::Skipped)
        }
        Err(e) => return Err(FrameFailure::at(FrameStage::Acquire)(e)),
    };
    stats.image_acquires += 1;

    // The acquired image is abandoned from here on, so failures count as Record.
    ops.reset_fence()
        .map_err(FrameFailure::at(FrameStage::Record))?;
    stats.fence_resets += 1;

    ops.record(index)
        .map_err(FrameFailure::at(FrameStage::Record))?;
    ops.submit(index)
        .map_err(FrameFailure::at(FrameStage::Submit))?;
    stats.submits += 1;

    let present_suboptimal = ops
        .present(index)
        .map_err(FrameFailure::at(FrameStage::Present))?;
    stats.presents += 1;

    if acquire_suboptimal || present_suboptimal {
        Ok(FrameOutcome::PresentedStale { index })
    } else {
        Ok(FrameOutcome::Presented { index })
    }
}

/// Image-available and render-finished semaphores plus the in-flight fence.
pub struct FrameSyncSet {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// Per-image command buffers and the single sync set.
pub struct FrameTier {
    device: ash::Device,
    pool: vk::CommandPool,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub sync: FrameSyncSet,
}

impl FrameTier {
    pub unsafe fn build(
        device: &ash::Device,
        pool: vk::CommandPool,
        image_count: usize,
    ) -> Result<Self, RenderError> {
        let mut tier = Self {
            device: device.clone(),
            pool,
            command_buffers: Vec::new(),
            sync: FrameSyncSet {
                image_available: vk::Semaphore::null(),
                render_finished: vk::Semaphore::null(),
                in_flight: vk::Fence::null(),
            },
        };

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: image_count as u32,
            ..Default::default()
        };
        let sem_ci = vk::SemaphoreCreateInfo::default();
        // Created signaled so the first wait returns at once.
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        unsafe {
            tier.command_buffers = device
                .allocate_command_buffers(&alloc_info)
                .vk_context("vkAllocateCommandBuffers")?;
            tier.sync.image_available = device
                .create_semaphore(&sem_ci, None)
                .vk_context("vkCreateSemaphore")?;
            tier.sync.render_finished = device
                .create_semaphore(&sem_ci, None)
                .vk_context("vkCreateSemaphore")?;
            tier.sync.in_flight = device
                .create_fence(&fence_ci, None)
                .vk_context("vkCreateFence")?;
        }
        debug!("vk: frame tier ready ({image_count} command buffers)");
        Ok(tier)
    }
}

impl Drop for FrameTier {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;
            if !self.command_buffers.is_empty() {
                d.free_command_buffers(self.pool, &self.command_buffers);
                self.command_buffers.clear();
            }
            if self.sync.image_available != vk::Semaphore::null() {
                d.destroy_semaphore(self.sync.image_available, None);
                self.sync.image_available = vk::Semaphore::null();
            }
            if self.sync.render_finished != vk::Semaphore::null() {
                d.destroy_semaphore(self.sync.render_finished, None);
                self.sync.render_finished = vk::Semaphore::null();
            }
            if self.sync.in_flight != vk::Fence::null() {
                d.destroy_fence(self.sync.in_flight, None);
                self.sync.in_flight = vk::Fence::null();
            }
        }
        debug!("vk: frame tier destroyed");
    }
}

/// [`FrameOps`] over the live tiers.
pub struct VkFrame<'a> {
    pub device: &'a DeviceTier,
    pub chain: &'a ChainTier,
    pub frame: &'a FrameTier,
    pub pipeline: &'a PipelineTier,
    pub clear_color: [f32; 4],
}

impl VkFrame<'_> {
    fn slot<T: Copy>(items: &[T], index: u32) -> Result<T, RenderError> {
        items.get(index as usize).copied().ok_or_else(|| {
            RenderError::Failure(format!("image index {index} outside the chain"))
        })
    }
}

impl FrameOps for VkFrame<'_> {
    fn wait_fence(&mut self, timeout_ns: u64) -> Result<(), RenderError> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.frame.sync.in_flight], true, timeout_ns)
        }
        .vk_context("vkWaitForFences")
    }

    fn reset_fence(&mut self) -> Result<(), RenderError> {
        unsafe { self.device.device.reset_fences(&[self.frame.sync.in_flight]) }
            .vk_context("vkResetFences")
    }

    fn acquire(&mut self, timeout_ns: u64) -> Result<Acquired, RenderError> {
        let res = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.chain.swapchain,
                timeout_ns,
                self.frame.sync.image_available,
                vk::Fence::null(),
            )
        };
        match res {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(map_vk("vkAcquireNextImageKHR", e)),
        }
    }

    fn record(&mut self, index: u32) -> Result<(), RenderError> {
        let target = RecordTarget {
            render_pass: self.pipeline.render_pass,
            framebuffer: Self::slot(&self.pipeline.framebuffers, index)?,
            pipeline: self.pipeline.pipeline,
            extent: self.chain.extent,
            clear_color: self.clear_color,
        };
        let cmd = Self::slot(&self.frame.command_buffers, index)?;
        unsafe { commands::record(&self.device.device, cmd, &target) }
    }

    fn submit(&mut self, index: u32) -> Result<(), RenderError> {
        let cmd = Self::slot(&self.frame.command_buffers, index)?;
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.frame.sync.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &self.frame.sync.render_finished,
            ..Default::default()
        };
        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                std::slice::from_ref(&submit),
                self.frame.sync.in_flight,
            )
        }
        .vk_context("vkQueueSubmit")
    }

    fn present(&mut self, index: u32) -> Result<bool, RenderError> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.frame.sync.render_finished,
            swapchain_count: 1,
            p_swapchains: &self.chain.swapchain,
            p_image_indices: &index,
            ..Default::default()
        };
        unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.present_queue, &present)
        }
        .vk_context("vkQueuePresentKHR")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plasma_render::ResultCode;
    use std::collections::{HashSet, VecDeque};

    /// Scripted GPU: submitted work stays pending until the fence is waited on.
    #[derive(Default)]
    struct ScriptedGpu {
        images: u32,
        next_image: u32,
        fence_signaled: bool,
        pending: HashSet<u32>,
        acquires: VecDeque<Result<Acquired, RenderError>>,
        submit_failures: VecDeque<bool>,
        presents: VecDeque<Result<bool, RenderError>>,
        image_available_signals: u64,
        render_finished_signals: u64,
        calls: Vec<&'static str>,
    }

    impl ScriptedGpu {
        fn new(images: u32) -> Self {
            Self {
                images,
                fence_signaled: true,
                ..Default::default()
            }
        }
    }

    impl FrameOps for ScriptedGpu {
        fn wait_fence(&mut self, _timeout_ns: u64) -> Result<(), RenderError> {
            self.calls.push("wait");
            if !self.fence_signaled {
                return Err(RenderError::Timeout("fence"));
            }
            self.pending.clear();
            Ok(())
        }

        fn reset_fence(&mut self) -> Result<(), RenderError> {
            self.calls.push("reset");
            self.fence_signaled = false;
            Ok(())
        }

        fn acquire(&mut self, _timeout_ns: u64) -> Result<Acquired, RenderError> {
            self.calls.push("acquire");
            if let Some(scripted) = self.acquires.pop_front() {
                return scripted;
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.images;
            self.image_available_signals += 1;
            Ok(Acquired::Image {
                index,
                suboptimal: false,
            })
        }

        fn record(&mut self, index: u32) -> Result<(), RenderError> {
            self.calls.push("record");
            assert!(
                !self.pending.contains(&index),
                "image {index} re-recorded while in flight"
            );
            Ok(())
        }

        fn submit(&mut self, index: u32) -> Result<(), RenderError> {
            self.calls.push("submit");
            if self.submit_failures.pop_front().unwrap_or(false) {
                return Err(RenderError::Backend {
                    call: "vkQueueSubmit",
                    detail: "ERROR_DEVICE_LOST".into(),
                });
            }
            self.pending.insert(index);
            self.render_finished_signals += 1;
            self.fence_signaled = true;
            Ok(())
        }

        fn present(&mut self, _index: u32) -> Result<bool, RenderError> {
            self.calls.push("present");
            self.presents.pop_front().unwrap_or(Ok(false))
        }
    }

    #[test]
    fn n_frames_signal_and_reset_everything_n_times() {
        let mut gpu = ScriptedGpu::new(3);
        let mut stats = FrameStats::default();
        for _ in 0..10 {
            let outcome = run_frame(&mut gpu, u64::MAX, &mut stats).unwrap();
            assert!(!outcome.chain_is_stale());
        }
        assert_eq!(stats.fence_waits, 10);
        assert_eq!(stats.fence_resets, 10);
        assert_eq!(stats.image_acquires, 10);
        assert_eq!(stats.submits, 10);
        assert_eq!(stats.presents, 10);
        assert_eq!(gpu.image_available_signals, 10);
        assert_eq!(gpu.render_finished_signals, 10);
    }

    #[test]
    fn steps_run_in_protocol_order() {
        let mut gpu = ScriptedGpu::new(2);
        run_frame(&mut gpu, u64::MAX, &mut FrameStats::default()).unwrap();
        assert_eq!(
            gpu.calls,
            ["wait", "acquire", "reset", "record", "submit", "present"]
        );
    }

    #[test]
    fn single_image_chain_never_overlaps_recordings() {
        let mut gpu = ScriptedGpu::new(1);
        let mut stats = FrameStats::default();
        for _ in 0..5 {
            assert_eq!(
                run_frame(&mut gpu, u64::MAX, &mut stats).unwrap(),
                FrameOutcome::Presented { index: 0 }
            );
        }
    }

    #[test]
    fn out_of_date_acquire_skips_without_touching_the_fence() {
        let mut gpu = ScriptedGpu::new(2);
        gpu.acquires.push_back(Ok(Acquired::OutOfDate));
        let mut stats = FrameStats::default();
        let outcome = run_frame(&mut gpu, u64::MAX, &mut stats).unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped);
        assert!(outcome.chain_is_stale());
        assert_eq!(gpu.calls, ["wait", "acquire"]);
        assert_eq!(stats.fence_resets, 0);
        assert_eq!(stats.submits, 0);
        // fence still signaled: the next frame proceeds
        run_frame(&mut gpu, u64::MAX, &mut stats).unwrap();
        assert_eq!(stats.presents, 1);
    }

    #[test]
    fn suboptimal_acquire_presents_then_reports_stale() {
        let mut gpu = ScriptedGpu::new(2);
        gpu.acquires.push_back(Ok(Acquired::Image {
            index: 1,
            suboptimal: true,
        }));
        let mut stats = FrameStats::default();
        let outcome = run_frame(&mut gpu, u64::MAX, &mut stats).unwrap();
        assert_eq!(outcome, FrameOutcome::PresentedStale { index: 1 });
        assert_eq!(stats.presents, 1);
    }

    #[test]
    fn suboptimal_present_reports_stale() {
        let mut gpu = ScriptedGpu::new(2);
        gpu.presents.push_back(Ok(true));
        let outcome = run_frame(&mut gpu, u64::MAX, &mut FrameStats::default()).unwrap();
        assert!(outcome.chain_is_stale());
    }

    #[test]
    fn submit_failure_skips_present_and_asks_for_rebuild() {
        let mut gpu = ScriptedGpu::new(2);
        gpu.submit_failures.push_back(true);
        let mut stats = FrameStats::default();
        let failure = run_frame(&mut gpu, u64::MAX, &mut stats).unwrap_err();
        assert_eq!(failure.stage, FrameStage::Submit);
        assert!(failure.needs_rebuild());
        assert_eq!(failure.error.code(), ResultCode::Failure);
        assert!(!gpu.calls.contains(&"present"));
        assert_eq!(stats.presents, 0);
    }

    #[test]
    fn out_of_date_present_is_recoverable() {
        let mut gpu = ScriptedGpu::new(2);
        gpu.presents.push_back(Err(RenderError::ChainOutOfDate));
        let mut stats = FrameStats::default();
        let failure = run_frame(&mut gpu, u64::MAX, &mut stats).unwrap_err();
        assert_eq!(failure.stage, FrameStage::Present);
        assert!(failure.needs_rebuild());
        assert!(failure.error.is_recoverable());
        assert_eq!(stats.submits, 1);
    }

    #[test]
    fn fence_timeout_surfaces_as_timeout() {
        let mut gpu = ScriptedGpu::new(2);
        gpu.fence_signaled = false;
        let failure = run_frame(&mut gpu, 1_000, &mut FrameStats::default()).unwrap_err();
        assert_eq!(failure.stage, FrameStage::Wait);
        assert_eq!(failure.error.code(), ResultCode::Timeout);
        assert!(!failure.needs_rebuild());
    }

    #[test]
    fn acquire_timeout_leaves_fence_signaled() {
        let mut gpu = ScriptedGpu::new(2);
        gpu.acquires.push_back(Err(RenderError::Timeout("acquire")));
        let failure = run_frame(&mut gpu, 1_000, &mut FrameStats::default()).unwrap_err();
        assert_eq!(failure.stage, FrameStage::Acquire);
        assert!(gpu.fence_signaled);
    }
}
