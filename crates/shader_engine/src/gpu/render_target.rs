//! Offscreen render targets
//!
//! The colour and depth attachments, the render pass and framebuffer that draw
//! into them, and the host-visible readback buffer every job copies its result
//! into.

use ash::vk;
use std::sync::Arc;

use super::buffer::HOST_MEMORY;
use super::{Buffer, GpuContext, ImageResource, VulkanError, VulkanResult};

/// Colour target format
pub const COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Size of the compute output block
pub const OUTPUT_BLOCK_SIZE: usize = 64;

/// Bytes needed for a raw RGBA readback
pub fn rgba_len(extent: vk::Extent2D) -> usize {
    extent.width as usize * extent.height as usize * 4
}

/// Bytes needed for a planar 4:2:0 readback
pub fn planar_len(extent: vk::Extent2D) -> usize {
    let luma = extent.width as usize * extent.height as usize;
    luma + 2 * (luma / 4)
}

/// Colour/depth attachments plus the readback buffer
pub struct RenderTargets {
    context: Arc<GpuContext>,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    readback: Buffer,
    color: ImageResource,
    depth: ImageResource,
    extent: vk::Extent2D,
}

impl RenderTargets {
    /// Allocate targets of the given size
    pub fn new(context: &Arc<GpuContext>, extent: vk::Extent2D) -> VulkanResult<Self> {
        let color = ImageResource::new(
            context,
            extent,
            COLOR_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::STORAGE,
            vk::ImageAspectFlags::COLOR,
        )?;

        let depth_format = select_depth_format(context)?;
        let depth = ImageResource::new(
            context,
            extent,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;

        // Large enough for RGBA, planar output and the compute block alike
        let readback_size = rgba_len(extent).max(OUTPUT_BLOCK_SIZE);
        let readback = Buffer::new(
            context,
            readback_size as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_DST,
            HOST_MEMORY,
        )?;
        log::info!("Readback buffer: {} bytes for {}x{}", readback_size, extent.width, extent.height);

        let render_pass = create_render_pass(context, COLOR_FORMAT, depth_format)?;

        let attachments = [color.view(), depth.view()];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = match unsafe { context.device().create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                unsafe { context.device().destroy_render_pass(render_pass, None) };
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            context: Arc::clone(context),
            render_pass,
            framebuffer,
            readback,
            color,
            depth,
            extent,
        })
    }

    /// Render pass drawing into the targets
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Framebuffer over colour and depth
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Colour attachment
    pub fn color(&self) -> &ImageResource {
        &self.color
    }

    /// Depth attachment
    pub fn depth(&self) -> &ImageResource {
        &self.depth
    }

    /// Host-visible readback buffer
    pub fn readback(&self) -> &Buffer {
        &self.readback
    }

    /// Target size
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Full-target render area
    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    /// Opaque black colour and far-plane depth
    pub fn clear_values() -> [vk::ClearValue; 2] {
        [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 1.0] },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ]
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        unsafe {
            let device = self.context.device();
            device.destroy_framebuffer(self.framebuffer, None);
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

fn select_depth_format(context: &GpuContext) -> VulkanResult<vk::Format> {
    [vk::Format::D32_SFLOAT, vk::Format::D16_UNORM]
        .into_iter()
        .find(|&format| {
            let properties = unsafe {
                context.instance().get_physical_device_format_properties(context.physical_device(), format)
            };
            properties.optimal_tiling_features.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(VulkanError::InvalidOperation {
            reason: "no supported depth attachment format".to_string(),
        })
}

fn create_render_pass(context: &GpuContext, color_format: vk::Format, depth_format: vk::Format) -> VulkanResult<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .build(),
        vk::AttachmentDescription::builder()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build(),
    ];

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let subpasses = [vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref)
        .build()];

    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let dependencies = [
        // Previous readback copy or encode pass must finish before the clear
        vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::COMPUTE_SHADER)
            .dst_stage_mask(attachment_stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build(),
        // Colour writes visible to the copy or encode pass that follows
        vk::SubpassDependency::builder()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::COMPUTE_SHADER)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::SHADER_READ)
            .build(),
    ];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe {
        context.device().create_render_pass(&render_pass_info, None)
            .map_err(VulkanError::Api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readback_lengths() {
        let extent = vk::Extent2D { width: 64, height: 64 };
        assert_eq!(rgba_len(extent), 64 * 64 * 4);
        assert_eq!(planar_len(extent), 64 * 64 * 3 / 2);
    }

    #[test]
    fn test_planar_length_matches_plane_offsets() {
        let extent = vk::Extent2D { width: 320, height: 240 };
        let luma = 320 * 240;
        // Y, then Cr at w*h, then Cb at w*h*1.25
        assert_eq!(planar_len(extent), luma + luma / 4 + luma / 4);
        assert_eq!(luma + luma / 4, luma * 5 / 4);
    }
}
