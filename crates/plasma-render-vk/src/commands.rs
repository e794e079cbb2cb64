// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use plasma_render::RenderError;

use crate::error::VkResultExt;

/// Everything one recording needs, borrowed from the chain and pipeline tiers.
#[derive(Clone, Copy, Debug)]
pub struct RecordTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// STRICT ORDER: reset, begin, render pass, bind, draw(3), end pass, end.
/// The caller must have waited on the frame fence so `cmd` is not pending.
pub unsafe fn record(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target: &RecordTarget,
) -> Result<(), RenderError> {
    unsafe {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .vk_context("vkResetCommandBuffer")?;

        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device
            .begin_command_buffer(cmd, &begin)
            .vk_context("vkBeginCommandBuffer")?;

        let clear = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: target.clear_color,
            },
        };
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: target.render_pass,
            framebuffer: target.framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            },
            clear_value_count: 1,
            p_clear_values: &clear,
            ..Default::default()
        };
        device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, target.pipeline);
        device.cmd_draw(cmd, 3, 1, 0, 0);
        device.cmd_end_render_pass(cmd);

        device
            .end_command_buffer(cmd)
            .vk_context("vkEndCommandBuffer")
    }
}
