//! Shader backend
//!
//! Owns every device-level object a job touches: the render targets, the one
//! shared descriptor set, the uniform and output buffers, the current graphics
//! and compute pipelines and the two reusable primary command buffers.
//!
//! Nothing here locks. Every method mutates shared device state, so callers
//! must serialize jobs (see [`crate::jobs::JobGate`]).

use ash::vk;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::gpu::buffer::HOST_MEMORY;
use crate::gpu::commands::LayoutTransition;
use crate::gpu::descriptor::{compute_layout, shared_layout};
use crate::gpu::render_target::{planar_len, rgba_len, OUTPUT_BLOCK_SIZE};
use crate::gpu::{
    Buffer, CommandRecorder, ComputePipeline, ContextOptions, DescriptorPool, DescriptorSetLayout,
    DescriptorSetWriter, EncodePipeline, FrameStats, GpuContext, GraphicsPipeline, ImageResource, MeshData,
    MeshResource, OneShotCommands, PipelineLayout, RasterOptions, ReadbackGuard, RenderTargets, Sampler,
    ShaderModule, VulkanError,
};
use crate::jobs::JobError;
use crate::output::OutputStorage;
use crate::shader::{ShaderCompiler, ShaderRef, ShaderStage};
use crate::uniforms::UniformBlock;

/// Layout of the bytes a render produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Top-to-bottom RGBA8, 4 bytes per pixel
    Rgba,
    /// Y plane, then Cr, then Cb (4:2:0)
    Yuv420p,
}

/// Which mesh a graphics command buffer draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawMesh {
    /// The generated default grid
    Grid,
    /// The last mesh passed to [`ShaderBackend::upload_mesh`]
    Uploaded,
}

/// An owned copy of one rendered frame
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    /// RGBA or planar bytes
    pub pixels: Vec<u8>,
    /// Wait latency
    pub stats: FrameStats,
}

/// An owned copy of one compute dispatch's output block
#[derive(Debug, Clone, Copy)]
pub struct ComputedOutput {
    /// The 64-byte block
    pub output: OutputStorage,
    /// Wait latency
    pub stats: FrameStats,
}

/// Device-level state for running shader jobs
pub struct ShaderBackend {
    compiler: ShaderCompiler,
    render_commands: vk::CommandBuffer,
    compute_commands: vk::CommandBuffer,
    recorded_render: Option<OutputFormat>,
    recorded_compute: bool,
    graphics_pipeline: Option<GraphicsPipeline>,
    compute_pipeline: Option<ComputePipeline>,
    encode: Option<EncodePipeline>,
    graphics_layout: PipelineLayout,
    compute_pipeline_layout: PipelineLayout,
    shared_set: vk::DescriptorSet,
    compute_set: vk::DescriptorSet,
    _pool: DescriptorPool,
    _shared_layout: DescriptorSetLayout,
    _compute_layout: DescriptorSetLayout,
    grid: MeshResource,
    mesh: Option<MeshResource>,
    texture: Option<ImageResource>,
    placeholder: ImageResource,
    sampler: Sampler,
    uniforms: Buffer,
    storage: Buffer,
    targets: RenderTargets,
    context: Arc<GpuContext>,
}

impl ShaderBackend {
    /// Create the device context and every long-lived resource
    pub fn new(config: &EngineConfig) -> Result<Self, JobError> {
        let context = GpuContext::new(&ContextOptions::from_config(config))?;
        Self::with_context(context, config)
    }

    /// Build the backend on an existing context
    pub fn with_context(context: Arc<GpuContext>, config: &EngineConfig) -> Result<Self, JobError> {
        let extent = vk::Extent2D {
            width: config.image.width,
            height: config.image.height,
        };
        let compiler = ShaderCompiler::new(config.shaders_dir(), config.include_dir());

        let targets = RenderTargets::new(&context, extent)?;

        let uniforms = Buffer::new(
            &context,
            std::mem::size_of::<UniformBlock>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            HOST_MEMORY,
        )?;
        uniforms.write_bytes(0, UniformBlock::default().as_bytes())?;
        let storage = Buffer::new(
            &context,
            OUTPUT_BLOCK_SIZE as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        log::info!("Uniform buffer: {} bytes, output storage: {} bytes", uniforms.size(), storage.size());

        let sampler = Sampler::new(&context)?;
        let placeholder = upload_texture(&context, 1, 1, &[255, 255, 255, 255])?;

        let grid_mesh = MeshData::grid(config.grid.subdivisions)
            .map_err(|e| JobError::Config(format!("grid: {}", e)))?;
        let grid = MeshResource::upload(&context, &grid_mesh)?;

        let shared_layout = shared_layout().build(&context)?;
        let compute_layout = compute_layout().build(&context)?;
        let pool = DescriptorPool::new(&context)?;
        let shared_set = pool.allocate(&shared_layout)?;
        let compute_set = pool.allocate(&compute_layout)?;

        DescriptorSetWriter::new()
            .write_sampled_image(shared_set, 0, placeholder.view(), sampler.handle())
            .write_uniform_buffer(shared_set, 1, uniforms.handle(), uniforms.size())
            .write_storage_buffer(compute_set, 0, storage.handle(), storage.size())
            .write_storage_image(compute_set, 1, targets.color().view())
            .update(&context);

        let graphics_layout = PipelineLayout::new(&context, &[shared_layout.handle()])?;
        let compute_pipeline_layout =
            PipelineLayout::new(&context, &[shared_layout.handle(), compute_layout.handle()])?;

        let encode = if extent.width % 2 == 0 && extent.height % 2 == 0 {
            let spirv = compiler
                .compile_glsl(ShaderStage::Compute, crate::gpu::encode::ENCODE_SHADER_SOURCE)
                .map_err(|e| JobError::Compile(format!("encode: {}", e)))?;
            Some(EncodePipeline::new(&context, &pool, &targets, &spirv)?)
        } else {
            log::warn!("{}x{} has odd dimensions; planar output is disabled", extent.width, extent.height);
            None
        };

        let render_commands = context.allocate_command_buffer()?;
        let compute_commands = match context.allocate_command_buffer() {
            Ok(buffer) => buffer,
            Err(e) => {
                context.free_command_buffer(render_commands);
                return Err(e.into());
            }
        };

        Ok(Self {
            compiler,
            render_commands,
            compute_commands,
            recorded_render: None,
            recorded_compute: false,
            graphics_pipeline: None,
            compute_pipeline: None,
            encode,
            graphics_layout,
            compute_pipeline_layout,
            shared_set,
            compute_set,
            _pool: pool,
            _shared_layout: shared_layout,
            _compute_layout: compute_layout,
            grid,
            mesh: None,
            texture: None,
            placeholder,
            sampler,
            uniforms,
            storage,
            targets,
            context,
        })
    }

    /// Shared device context
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// Render target size
    pub fn extent(&self) -> vk::Extent2D {
        self.targets.extent()
    }

    /// True when the target size allows planar output
    pub fn supports_planar(&self) -> bool {
        self.encode.is_some()
    }

    /// Compile both stages and rebuild the graphics pipeline
    ///
    /// Either stage failing leaves the current pipeline in place. The error
    /// message is prefixed with the failing stage (`"vertex: "`/`"fragment: "`).
    pub fn upload_shader_mix(
        &mut self,
        vertex: &ShaderRef,
        fragment: &ShaderRef,
        options: RasterOptions,
    ) -> Result<(), JobError> {
        let vertex_words = self.compile_stage(vertex, ShaderStage::Vertex)?;
        let fragment_words = self.compile_stage(fragment, ShaderStage::Fragment)?;

        let vertex_module = ShaderModule::from_words(&self.context, &vertex_words)?;
        let fragment_module = ShaderModule::from_words(&self.context, &fragment_words)?;
        let pipeline = GraphicsPipeline::new(
            &self.context,
            &self.graphics_layout,
            self.targets.render_pass(),
            self.targets.extent(),
            &vertex_module,
            &fragment_module,
            options,
        )?;

        // The old pipeline goes only once the new one exists
        self.graphics_pipeline = Some(pipeline);
        self.recorded_render = None;
        log::info!("Graphics pipeline rebuilt");
        Ok(())
    }

    /// Compile the compute stage and rebuild the compute pipeline
    pub fn upload_compute_shader(&mut self, shader: &ShaderRef) -> Result<(), JobError> {
        let words = self.compile_stage(shader, ShaderStage::Compute)?;
        let module = ShaderModule::from_words(&self.context, &words)?;
        let pipeline = ComputePipeline::new(&self.context, &self.compute_pipeline_layout, &module)?;

        self.compute_pipeline = Some(pipeline);
        self.recorded_compute = false;
        log::info!("Compute pipeline rebuilt");
        Ok(())
    }

    fn compile_stage(&self, shader: &ShaderRef, expected: ShaderStage) -> Result<Vec<u32>, JobError> {
        if shader.stage != expected {
            return Err(JobError::InvalidInput(format!(
                "{}: got a {} shader", expected, shader.stage
            )));
        }
        self.compiler.compile(shader).map_err(|e| JobError::from_shader(expected, e))
    }

    /// Upload an RGBA8 texture and bind it at set 0, binding 0
    ///
    /// `rgba` must hold exactly `width * height * 4` bytes.
    pub fn upload_image(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<(), JobError> {
        check_texture_size(width, height, rgba.len())?;

        let texture = upload_texture(&self.context, width, height, rgba)?;
        self.bind_texture(texture.view());
        self.texture = Some(texture);
        log::debug!("Uploaded {}x{} texture", width, height);
        Ok(())
    }

    /// Rebind the 1×1 white placeholder texture
    pub fn reset_image(&mut self) {
        if self.texture.is_some() {
            self.bind_texture(self.placeholder.view());
            self.texture = None;
        }
    }

    fn bind_texture(&mut self, view: vk::ImageView) {
        DescriptorSetWriter::new()
            .write_sampled_image(self.shared_set, 0, view, self.sampler.handle())
            .update(&self.context);
        // Recorded buffers reference the set and are invalid after an update
        self.recorded_render = None;
        self.recorded_compute = false;
    }

    /// Upload a caller-supplied mesh, replacing the previous one
    pub fn upload_mesh(&mut self, mesh: &MeshData) -> Result<(), JobError> {
        let resource = MeshResource::upload(&self.context, mesh)?;
        self.mesh = Some(resource);
        self.recorded_render = None;
        Ok(())
    }

    /// Release the uploaded mesh
    pub fn clear_mesh(&mut self) {
        self.mesh = None;
        self.recorded_render = None;
    }

    /// Record the graphics command buffer
    pub fn build_command_buffer(&mut self, mesh: DrawMesh, format: OutputFormat) -> Result<(), JobError> {
        let pipeline = self.graphics_pipeline.as_ref()
            .ok_or_else(|| JobError::InvalidInput("no graphics shader uploaded".to_string()))?;
        let mesh = match mesh {
            DrawMesh::Grid => &self.grid,
            DrawMesh::Uploaded => self.mesh.as_ref()
                .ok_or_else(|| JobError::InvalidInput("no mesh uploaded".to_string()))?,
        };
        let encode = match format {
            OutputFormat::Rgba => None,
            OutputFormat::Yuv420p => Some(self.encode.as_ref().ok_or_else(|| {
                JobError::InvalidInput("planar output needs an even width and height".to_string())
            })?),
        };

        self.recorded_render = None;
        let mut recorder = CommandRecorder::new(Arc::clone(&self.context), self.render_commands);
        recorder.begin(vk::CommandBufferUsageFlags::empty())?;
        {
            let clear_values = RenderTargets::clear_values();
            let mut pass = recorder.begin_render_pass(
                self.targets.render_pass(),
                self.targets.framebuffer(),
                self.targets.render_area(),
                &clear_values,
            )?;
            pass.bind_pipeline(pipeline.handle());
            pass.bind_descriptor_sets(self.graphics_layout.handle(), &[self.shared_set]);
            pass.bind_vertex_buffers(0, &mesh.vertex_buffers(), &[0, 0, 0]);
            pass.bind_index_buffer(mesh.index_buffer(), 0, vk::IndexType::UINT16);
            pass.draw_indexed(mesh.index_count());
        }

        let color = self.targets.color();
        let readback = self.targets.readback().handle();
        match encode {
            None => recorder.copy_image_to_buffer(
                color.image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                readback,
                0,
                color.extent(),
            ),
            Some(encode) => encode.record(&mut recorder, color.image(), readback),
        }
        recorder.memory_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::HOST,
            vk::AccessFlags::HOST_READ,
        );
        recorder.end()?;

        self.recorded_render = Some(format);
        log::debug!("Recorded graphics command buffer ({:?}, {} indices)", format, mesh.index_count());
        Ok(())
    }

    /// Record the compute command buffer dispatching `x`×`y`×`z` workgroups
    pub fn build_compute_command_buffer(&mut self, x: u32, y: u32, z: u32) -> Result<(), JobError> {
        let pipeline = self.compute_pipeline.as_ref()
            .ok_or_else(|| JobError::InvalidInput("no compute shader uploaded".to_string()))?;
        if x == 0 || y == 0 || z == 0 {
            return Err(JobError::InvalidInput(format!("dispatch size {}x{}x{} is empty", x, y, z)));
        }

        self.recorded_compute = false;
        let mut recorder = CommandRecorder::new(Arc::clone(&self.context), self.compute_commands);
        recorder.begin(vk::CommandBufferUsageFlags::empty())?;

        recorder.fill_buffer(self.storage.handle(), self.storage.size(), 0);
        recorder.memory_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        );
        recorder.transition_image(self.targets.color().image(), LayoutTransition {
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::GENERAL,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        });

        recorder.bind_pipeline(vk::PipelineBindPoint::COMPUTE, pipeline.handle());
        recorder.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            self.compute_pipeline_layout.handle(),
            &[self.shared_set, self.compute_set],
        );
        recorder.dispatch(x, y, z);

        recorder.memory_barrier(
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        );
        recorder.copy_buffer(self.storage.handle(), self.targets.readback().handle(), vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: self.storage.size(),
        });
        recorder.memory_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::HOST,
            vk::AccessFlags::HOST_READ,
        );
        recorder.end()?;

        self.recorded_compute = true;
        log::debug!("Recorded compute command buffer ({}x{}x{})", x, y, z);
        Ok(())
    }

    /// Write the uniform block read by the next submission
    pub fn update_uniforms(&mut self, block: UniformBlock) -> Result<(), JobError> {
        self.uniforms.write_bytes(0, block.as_bytes())?;
        Ok(())
    }

    /// Submit the graphics command buffer and map its output
    ///
    /// The guard exposes exactly `width*height*4` bytes (RGBA) or
    /// `width*height*3/2` bytes (planar) and unmaps when dropped.
    pub fn render_frame(&mut self) -> Result<ReadbackGuard<'_>, JobError> {
        let format = self.recorded_render
            .ok_or_else(|| JobError::InvalidInput("graphics command buffer not built".to_string()))?;

        let gpu_wait = self.context.submit_render(self.render_commands)?;
        let stats = FrameStats { gpu_wait };
        log::debug!("Frame finished, GPU wait {:?}", gpu_wait);

        let len = match format {
            OutputFormat::Rgba => rgba_len(self.extent()),
            OutputFormat::Yuv420p => planar_len(self.extent()),
        };
        let mapped = self.targets.readback().map()?;
        Ok(ReadbackGuard::new(mapped, len, stats))
    }

    /// [`Self::render_frame`] copied into an owned buffer
    pub fn render_frame_to_vec(&mut self) -> Result<RenderedFrame, JobError> {
        let guard = self.render_frame()?;
        Ok(RenderedFrame {
            pixels: guard.bytes().to_vec(),
            stats: guard.stats(),
        })
    }

    /// Submit the compute command buffer and read back the output block
    ///
    /// Compute and graphics share the render fence; jobs never overlap, so a
    /// separate compute fence would never be waited on concurrently.
    pub fn do_computation(&mut self) -> Result<ComputedOutput, JobError> {
        if !self.recorded_compute {
            return Err(JobError::InvalidInput("compute command buffer not built".to_string()));
        }

        let gpu_wait = self.context.submit_render(self.compute_commands)?;
        log::debug!("Dispatch finished, GPU wait {:?}", gpu_wait);

        let mapped = self.targets.readback().map()?;
        let guard = ReadbackGuard::new(mapped, OUTPUT_BLOCK_SIZE, FrameStats { gpu_wait });
        Ok(ComputedOutput {
            output: OutputStorage::from_bytes(guard.bytes()),
            stats: guard.stats(),
        })
    }
}

impl Drop for ShaderBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.context.device().device_wait_idle();
        }
        self.context.free_command_buffer(self.render_commands);
        self.context.free_command_buffer(self.compute_commands);
    }
}

/// Reject texture dimensions that do not match the RGBA8 byte count
pub(crate) fn check_texture_size(width: u32, height: u32, len: usize) -> Result<(), JobError> {
    let expected = width as usize * height as usize * 4;
    if width == 0 || height == 0 || len != expected {
        return Err(JobError::InvalidInput(format!(
            "texture {}x{} needs {} bytes, got {}", width, height, expected, len
        )));
    }
    Ok(())
}

/// Staging upload of an RGBA8 texture, left in SHADER_READ_ONLY_OPTIMAL
fn upload_texture(context: &Arc<GpuContext>, width: u32, height: u32, rgba: &[u8]) -> Result<ImageResource, VulkanError> {
    let extent = vk::Extent2D { width, height };
    let staging = Buffer::with_data(context, rgba, vk::BufferUsageFlags::TRANSFER_SRC)?;
    let image = ImageResource::new(
        context,
        extent,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        vk::ImageAspectFlags::COLOR,
    )?;

    let mut commands = OneShotCommands::begin(context)?;
    {
        let recorder = commands.recorder()?;
        recorder.transition_image(image.image(), LayoutTransition::UPLOAD_BEGIN);
        recorder.copy_buffer_to_image(staging.handle(), image.image(), vk::ImageLayout::TRANSFER_DST_OPTIMAL, extent);
        recorder.transition_image(image.image(), LayoutTransition::UPLOAD_END);
    }
    commands.submit()?;
    Ok(image)
}
