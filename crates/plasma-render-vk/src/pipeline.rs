// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::Cursor;
use std::path::Path;

use ash::util::read_spv;
use ash::vk;
use plasma_render::RenderError;
use tracing::{debug, info};

use crate::error::{map_vk, VkResultExt};

const SHADER_ENTRY: &std::ffi::CStr = c"main";

/// Reads a SPIR-V binary into words. A missing file is `NotFound`.
pub fn load_shader(path: &Path) -> Result<Vec<u32>, RenderError> {
    let bytes = fs::read(path).map_err(|e| RenderError::from_io(path, e))?;
    read_spv(&mut Cursor::new(&bytes[..])).map_err(|e| RenderError::from_io(path, e))
}

unsafe fn create_shader_module(
    device: &ash::Device,
    code: &[u32],
) -> Result<vk::ShaderModule, RenderError> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: std::mem::size_of_val(code),
        ..Default::default()
    };
    unsafe { device.create_shader_module(&ci, None) }.vk_context("vkCreateShaderModule")
}

/// Render pass, one framebuffer per chain view, layout and the graphics pipeline.
pub struct PipelineTier {
    device: ash::Device,
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl PipelineTier {
    /// STRICT ORDER: render pass, framebuffers, layout, pipeline. The render
    /// pass format must match the chain images.
    pub unsafe fn build(
        device: &ash::Device,
        format: vk::Format,
        extent: vk::Extent2D,
        views: &[vk::ImageView],
        vertex_shader: &Path,
        fragment_shader: &Path,
    ) -> Result<Self, RenderError> {
        let vs_code = load_shader(vertex_shader)?;
        let fs_code = load_shader(fragment_shader)?;

        let mut tier = Self {
            device: device.clone(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::with_capacity(views.len()),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
        };

        unsafe {
            tier.render_pass = create_render_pass(device, format)?;
            for &view in views {
                let fci = vk::FramebufferCreateInfo {
                    s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                    render_pass: tier.render_pass,
                    attachment_count: 1,
                    p_attachments: &view,
                    width: extent.width,
                    height: extent.height,
                    layers: 1,
                    ..Default::default()
                };
                let fb = device
                    .create_framebuffer(&fci, None)
                    .vk_context("vkCreateFramebuffer")?;
                tier.framebuffers.push(fb);
            }

            let layout_info = vk::PipelineLayoutCreateInfo {
                s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
                ..Default::default()
            };
            tier.layout = device
                .create_pipeline_layout(&layout_info, None)
                .vk_context("vkCreatePipelineLayout")?;

            let vs = create_shader_module(device, &vs_code)?;
            let fs = match create_shader_module(device, &fs_code) {
                Ok(m) => m,
                Err(e) => {
                    device.destroy_shader_module(vs, None);
                    return Err(e);
                }
            };
            let created = create_pipeline(device, tier.render_pass, tier.layout, extent, vs, fs);
            device.destroy_shader_module(vs, None);
            device.destroy_shader_module(fs, None);
            tier.pipeline = created?;
        }

        info!(
            "vk: pipeline ready ({} framebuffers, {}x{})",
            tier.framebuffers.len(),
            extent.width,
            extent.height
        );
        Ok(tier)
    }
}

unsafe fn create_render_pass(
    device: &ash::Device,
    format: vk::Format,
) -> Result<vk::RenderPass, RenderError> {
    let color = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        ..Default::default()
    };
    // Image layout transition waits for the acquire semaphore's stage.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let rpci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { device.create_render_pass(&rpci, None) }.vk_context("vkCreateRenderPass")
}

unsafe fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
) -> Result<vk::Pipeline, RenderError> {
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: SHADER_ENTRY.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: SHADER_ENTRY.as_ptr(),
            ..Default::default()
        },
    ];

    // Vertices come from the vertex shader itself.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };

    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    let pipelines = unsafe {
        device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        )
    }
    .map_err(|(_, err)| map_vk("vkCreateGraphicsPipelines", err))?;
    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::Failure("driver returned no pipeline".into()))
}

impl Drop for PipelineTier {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;
            if self.pipeline != vk::Pipeline::null() {
                d.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.layout != vk::PipelineLayout::null() {
                d.destroy_pipeline_layout(self.layout, None);
                self.layout = vk::PipelineLayout::null();
            }
            for fb in self.framebuffers.drain(..) {
                d.destroy_framebuffer(fb, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                d.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
        }
        debug!("vk: pipeline destroyed");
    }
}
