//! Command buffer management
//!
//! Type-safe command buffer recording. Frame command buffers are recorded once
//! and resubmitted for every frame; uploads use [`OneShotCommands`].

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use super::{GpuContext, VulkanError, VulkanResult, COLOR_RANGE};

/// Image layout transition description for [`CommandRecorder::transition_image`]
#[derive(Debug, Clone, Copy)]
pub struct LayoutTransition {
    /// Layout before the barrier
    pub old_layout: vk::ImageLayout,
    /// Layout after the barrier
    pub new_layout: vk::ImageLayout,
    /// Accesses that must complete first
    pub src_access: vk::AccessFlags,
    /// Accesses that wait on the barrier
    pub dst_access: vk::AccessFlags,
    /// Stage producing `src_access`
    pub src_stage: vk::PipelineStageFlags,
    /// Stage consuming `dst_access`
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    /// UNDEFINED to TRANSFER_DST before a staging upload
    pub const UPLOAD_BEGIN: Self = Self {
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::TRANSFER_WRITE,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_stage: vk::PipelineStageFlags::TRANSFER,
    };

    /// TRANSFER_DST to SHADER_READ_ONLY after a staging upload
    pub const UPLOAD_END: Self = Self {
        old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        src_access: vk::AccessFlags::TRANSFER_WRITE,
        dst_access: vk::AccessFlags::SHADER_READ,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::from_raw(
            vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw() | vk::PipelineStageFlags::COMPUTE_SHADER.as_raw(),
        ),
    };
}

/// Type-safe command buffer recorder
pub struct CommandRecorder {
    context: Arc<GpuContext>,
    command_buffer: vk::CommandBuffer,
    recording: bool,
}

impl CommandRecorder {
    /// Wrap an allocated command buffer
    pub fn new(context: Arc<GpuContext>, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            context,
            command_buffer,
            recording: false,
        }
    }

    /// Begin command recording
    ///
    /// Pass `ONE_TIME_SUBMIT` for uploads; frame command buffers begin with no
    /// flags so they can be resubmitted.
    pub fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> VulkanResult<&mut Self> {
        if self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer already recording".to_string()
            });
        }

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);

        unsafe {
            self.context.device().begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        self.recording = true;
        Ok(self)
    }

    /// End command recording and hand back the finished buffer
    pub fn end(mut self) -> VulkanResult<vk::CommandBuffer> {
        if !self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string()
            });
        }

        unsafe {
            self.context.device().end_command_buffer(self.command_buffer)
                .map_err(VulkanError::Api)?;
        }

        self.recording = false;
        Ok(self.command_buffer)
    }

    /// Begin render pass
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) -> VulkanResult<ActiveRenderPass<'_>> {
        if !self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string()
            });
        }

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.context.device().cmd_begin_render_pass(
                self.command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );
        }

        Ok(ActiveRenderPass { recorder: self })
    }

    /// Bind a pipeline
    pub fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.context.device().cmd_bind_pipeline(self.command_buffer, bind_point, pipeline);
        }
    }

    /// Bind descriptor sets starting at set 0
    pub fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.context.device().cmd_bind_descriptor_sets(
                self.command_buffer, bind_point, layout, 0, sets, &[],
            );
        }
    }

    /// Record a compute dispatch
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe {
            self.context.device().cmd_dispatch(self.command_buffer, x, y, z);
        }
    }

    /// Copy a region between buffers
    pub fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy) {
        unsafe {
            self.context.device().cmd_copy_buffer(self.command_buffer, src, dst, &[region]);
        }
    }

    /// Fill `size` bytes of a buffer with a repeated word
    pub fn fill_buffer(&mut self, buffer: vk::Buffer, size: vk::DeviceSize, data: u32) {
        unsafe {
            self.context.device().cmd_fill_buffer(self.command_buffer, buffer, 0, size, data);
        }
    }

    /// Copy a tightly packed buffer into the full extent of an image
    pub fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        extent: vk::Extent2D,
    ) {
        let region = full_image_copy(0, extent);
        unsafe {
            self.context.device().cmd_copy_buffer_to_image(self.command_buffer, src, dst, layout, &[region]);
        }
    }

    /// Copy the full extent of an image into a buffer at `offset`
    pub fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        layout: vk::ImageLayout,
        dst: vk::Buffer,
        offset: vk::DeviceSize,
        extent: vk::Extent2D,
    ) {
        let region = full_image_copy(offset, extent);
        unsafe {
            self.context.device().cmd_copy_image_to_buffer(self.command_buffer, src, layout, dst, &[region]);
        }
    }

    /// Record a color image layout transition
    pub fn transition_image(&mut self, image: vk::Image, transition: LayoutTransition) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(transition.old_layout)
            .new_layout(transition.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(COLOR_RANGE)
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access)
            .build();

        unsafe {
            self.context.device().cmd_pipeline_barrier(
                self.command_buffer,
                transition.src_stage,
                transition.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Record a global memory barrier
    pub fn memory_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_access: vk::AccessFlags,
    ) {
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();

        unsafe {
            self.context.device().cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }
}

fn full_image_copy(buffer_offset: vk::DeviceSize, extent: vk::Extent2D) -> vk::BufferImageCopy {
    vk::BufferImageCopy::builder()
        .buffer_offset(buffer_offset)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .build()
}

/// Active render pass, ended when dropped
pub struct ActiveRenderPass<'a> {
    recorder: &'a mut CommandRecorder,
}

impl<'a> ActiveRenderPass<'a> {
    /// Bind graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.recorder.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
    }

    /// Bind graphics descriptor sets
    pub fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]) {
        self.recorder.bind_descriptor_sets(vk::PipelineBindPoint::GRAPHICS, layout, sets);
    }

    /// Bind vertex buffers
    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            self.recorder.context.device().cmd_bind_vertex_buffers(
                self.recorder.command_buffer, first_binding, buffers, offsets,
            );
        }
    }

    /// Bind index buffer
    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.recorder.context.device().cmd_bind_index_buffer(
                self.recorder.command_buffer, buffer, offset, index_type,
            );
        }
    }

    /// Draw indexed
    pub fn draw_indexed(&mut self, index_count: u32) {
        unsafe {
            self.recorder.context.device().cmd_draw_indexed(
                self.recorder.command_buffer, index_count, 1, 0, 0, 0,
            );
        }
    }
}

impl<'a> Drop for ActiveRenderPass<'a> {
    fn drop(&mut self) {
        unsafe {
            self.recorder.context.device().cmd_end_render_pass(self.recorder.command_buffer);
        }
    }
}

/// One-time upload command buffer, submitted on the transfer queue
///
/// The buffer returns to the pool when this value is dropped, submitted or not.
pub struct OneShotCommands {
    context: Arc<GpuContext>,
    recorder: Option<CommandRecorder>,
    command_buffer: vk::CommandBuffer,
}

impl OneShotCommands {
    /// Allocate a command buffer and begin recording
    pub fn begin(context: &Arc<GpuContext>) -> VulkanResult<Self> {
        let command_buffer = context.allocate_command_buffer()?;
        let mut recorder = CommandRecorder::new(Arc::clone(context), command_buffer);
        if let Err(e) = recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT) {
            context.free_command_buffer(command_buffer);
            return Err(e);
        }

        Ok(Self {
            context: Arc::clone(context),
            recorder: Some(recorder),
            command_buffer,
        })
    }

    /// Recorder for the upload commands
    pub fn recorder(&mut self) -> VulkanResult<&mut CommandRecorder> {
        self.recorder.as_mut().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "One-shot commands already submitted".to_string()
        })
    }

    /// End recording, submit on the transfer queue and wait for the transfer fence
    pub fn submit(mut self) -> VulkanResult<Duration> {
        let recorder = self.recorder.take().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "One-shot commands already submitted".to_string()
        })?;
        let command_buffer = recorder.end()?;
        self.context.submit_transfer(command_buffer)
    }
}

impl Drop for OneShotCommands {
    fn drop(&mut self) {
        self.context.free_command_buffer(self.command_buffer);
    }
}
