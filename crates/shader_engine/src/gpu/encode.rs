//! Planar 4:2:0 encode pass
//!
//! A fixed compute pipeline that reads the colour target as a storage image and
//! writes full-resolution luma plus half-resolution Cr and Cb planes, which are
//! then copied back to back into the readback buffer.

use ash::vk;
use std::sync::Arc;

use super::commands::LayoutTransition;
use super::descriptor::encode_layout;
use super::{
    CommandRecorder, ComputePipeline, DescriptorPool, DescriptorSetLayout, DescriptorSetWriter, GpuContext,
    ImageResource, PipelineLayout, RenderTargets, ShaderModule, VulkanError, VulkanResult,
};

/// GLSL source of the encode shader
pub const ENCODE_SHADER_SOURCE: &str = include_str!("../../shaders/encode_yuv420p.comp");

const WORKGROUP_SIZE: u32 = 8;

/// Byte offsets of the Y, Cr and Cb planes inside the readback buffer
pub fn plane_offsets(extent: vk::Extent2D) -> [vk::DeviceSize; 3] {
    let luma = vk::DeviceSize::from(extent.width) * vk::DeviceSize::from(extent.height);
    [0, luma, luma + luma / 4]
}

/// Y/Cr/Cb storage images and the compute pipeline that fills them
pub struct EncodePipeline {
    pipeline: ComputePipeline,
    pipeline_layout: PipelineLayout,
    _set_layout: DescriptorSetLayout,
    set: vk::DescriptorSet,
    planes: [ImageResource; 3],
    extent: vk::Extent2D,
}

impl EncodePipeline {
    /// Create the planes and pipeline for `targets`
    ///
    /// `spirv` is the compiled [`ENCODE_SHADER_SOURCE`]. Width and height of the
    /// targets must be even.
    pub fn new(
        context: &Arc<GpuContext>,
        pool: &DescriptorPool,
        targets: &RenderTargets,
        spirv: &[u32],
    ) -> VulkanResult<Self> {
        let extent = targets.extent();
        if extent.width % 2 != 0 || extent.height % 2 != 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("planar output needs even dimensions, got {}x{}", extent.width, extent.height),
            });
        }

        let chroma_extent = vk::Extent2D {
            width: extent.width / 2,
            height: extent.height / 2,
        };
        let plane = |plane_extent| {
            ImageResource::new(
                context,
                plane_extent,
                vk::Format::R8_UNORM,
                vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC,
                vk::ImageAspectFlags::COLOR,
            )
        };
        let planes = [plane(extent)?, plane(chroma_extent)?, plane(chroma_extent)?];

        let set_layout = encode_layout().build(context)?;
        let set = pool.allocate(&set_layout)?;
        DescriptorSetWriter::new()
            .write_storage_image(set, 0, targets.color().view())
            .write_storage_image(set, 1, planes[0].view())
            .write_storage_image(set, 2, planes[1].view())
            .write_storage_image(set, 3, planes[2].view())
            .update(context);

        let pipeline_layout = PipelineLayout::new(context, &[set_layout.handle()])?;
        let module = ShaderModule::from_words(context, spirv)?;
        let pipeline = ComputePipeline::new(context, &pipeline_layout, &module)?;

        log::debug!("Encode pipeline ready for {}x{}", extent.width, extent.height);

        Ok(Self {
            pipeline,
            pipeline_layout,
            _set_layout: set_layout,
            set,
            planes,
            extent,
        })
    }

    /// Record the encode pass after the render pass has finished
    ///
    /// Expects the colour image in TRANSFER_SRC_OPTIMAL (the render pass final
    /// layout) and leaves the three planes copied into `readback`.
    pub fn record(&self, recorder: &mut CommandRecorder, color: vk::Image, readback: vk::Buffer) {
        recorder.transition_image(color, LayoutTransition {
            old_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            new_layout: vk::ImageLayout::GENERAL,
            src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        });
        for plane in &self.planes {
            recorder.transition_image(plane.image(), LayoutTransition {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::GENERAL,
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::SHADER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            });
        }

        recorder.bind_pipeline(vk::PipelineBindPoint::COMPUTE, self.pipeline.handle());
        recorder.bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, self.pipeline_layout.handle(), &[self.set]);
        recorder.dispatch(
            (self.extent.width / 2).div_ceil(WORKGROUP_SIZE),
            (self.extent.height / 2).div_ceil(WORKGROUP_SIZE),
            1,
        );

        for (plane, offset) in self.planes.iter().zip(plane_offsets(self.extent)) {
            recorder.transition_image(plane.image(), LayoutTransition {
                old_layout: vk::ImageLayout::GENERAL,
                new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                src_access: vk::AccessFlags::SHADER_WRITE,
                dst_access: vk::AccessFlags::TRANSFER_READ,
                src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            });
            recorder.copy_image_to_buffer(
                plane.image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                readback,
                offset,
                plane.extent(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_offsets() {
        let offsets = plane_offsets(vk::Extent2D { width: 64, height: 32 });
        assert_eq!(offsets, [0, 2048, 2560]);
    }

    #[test]
    fn test_shader_source_embedded() {
        assert!(ENCODE_SHADER_SOURCE.starts_with("#version 450"));
        assert!(ENCODE_SHADER_SOURCE.contains("binding = 3"));
    }
}
