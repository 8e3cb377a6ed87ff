//! Shader modules and pipeline construction
//!
//! Pipelines are rebuilt in full on every shader upload; nothing is cached.

use ash::vk;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{GpuContext, VulkanError, VulkanResult};

const ENTRY_POINT: &std::ffi::CStr = c"main";

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    context: Arc<GpuContext>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a shader module from SPIR-V words
    pub fn from_words(context: &Arc<GpuContext>, words: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);

        let module = unsafe {
            context.device().create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { context: Arc::clone(context), module })
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_shader_module(self.module, None);
        }
    }
}

/// Pipeline layout wrapper
pub struct PipelineLayout {
    context: Arc<GpuContext>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Create a layout over the given descriptor set layouts, in set order
    pub fn new(context: &Arc<GpuContext>, set_layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts);

        let layout = unsafe {
            context.device().create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { context: Arc::clone(context), layout })
    }

    /// Get pipeline layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Which triangle faces the rasterizer discards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CullMode {
    /// Discard front faces (the default; with Vulkan's downward Y this keeps
    /// triangles that wind counter-clockwise in clip space)
    #[default]
    Front,
    /// Discard back faces
    Back,
    /// Draw everything
    None,
}

impl CullMode {
    fn to_vk(self) -> vk::CullModeFlags {
        match self {
            Self::Front => vk::CullModeFlags::FRONT,
            Self::Back => vk::CullModeFlags::BACK,
            Self::None => vk::CullModeFlags::NONE,
        }
    }
}

/// Per-job rasterizer options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterOptions {
    /// Face culling
    pub cull: CullMode,
    /// Depth test with LESS_OR_EQUAL (and depth writes) when true
    pub depth_test: bool,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            cull: CullMode::Front,
            depth_test: true,
        }
    }
}

/// Vertex input: three tightly packed attribute streams
fn vertex_input() -> ([vk::VertexInputBindingDescription; 3], [vk::VertexInputAttributeDescription; 3]) {
    let streams = [
        (vk::Format::R32G32B32_SFLOAT, 12),
        (vk::Format::R32G32_SFLOAT, 8),
        (vk::Format::R32G32B32_SFLOAT, 12),
    ];

    let bindings = [0u32, 1, 2].map(|i| vk::VertexInputBindingDescription {
        binding: i,
        stride: streams[i as usize].1,
        input_rate: vk::VertexInputRate::VERTEX,
    });
    let attributes = [0u32, 1, 2].map(|i| vk::VertexInputAttributeDescription {
        location: i,
        binding: i,
        format: streams[i as usize].0,
        offset: 0,
    });
    (bindings, attributes)
}

/// Graphics pipeline with a fixed viewport covering the render target
pub struct GraphicsPipeline {
    context: Arc<GpuContext>,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Build a graphics pipeline
    pub fn new(
        context: &Arc<GpuContext>,
        layout: &PipelineLayout,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        vertex: &ShaderModule,
        fragment: &ShaderModule,
        options: RasterOptions,
    ) -> VulkanResult<Self> {
        let stages = [
            vertex.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let (bindings, attributes) = vertex_input();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(options.cull.to_vk())
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(options.depth_test)
            .depth_write_enable(options.depth_test)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(
                vk::ColorComponentFlags::R | vk::ColorComponentFlags::G | vk::ColorComponentFlags::B | vk::ColorComponentFlags::A,
            )
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(layout.handle())
            .render_pass(render_pass)
            .subpass(0);

        let result = unsafe {
            context.device().create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info.build()],
                None,
            )
        };

        let pipeline = first_pipeline(context, result)?;
        log::debug!("Built graphics pipeline ({:?})", options);
        Ok(Self { context: Arc::clone(context), pipeline })
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_pipeline(self.pipeline, None);
        }
    }
}

/// Single-stage compute pipeline
pub struct ComputePipeline {
    context: Arc<GpuContext>,
    pipeline: vk::Pipeline,
}

impl ComputePipeline {
    /// Build a compute pipeline
    pub fn new(context: &Arc<GpuContext>, layout: &PipelineLayout, module: &ShaderModule) -> VulkanResult<Self> {
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(module.stage_info(vk::ShaderStageFlags::COMPUTE))
            .layout(layout.handle());

        let result = unsafe {
            context.device().create_compute_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info.build()],
                None,
            )
        };

        let pipeline = first_pipeline(context, result)?;
        log::debug!("Built compute pipeline");
        Ok(Self { context: Arc::clone(context), pipeline })
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_pipeline(self.pipeline, None);
        }
    }
}

/// Take the single pipeline out of a create call, destroying partial results on failure
fn first_pipeline(
    context: &GpuContext,
    result: Result<Vec<vk::Pipeline>, (Vec<vk::Pipeline>, vk::Result)>,
) -> VulkanResult<vk::Pipeline> {
    match result {
        Ok(pipelines) => pipelines.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "driver returned no pipeline".to_string(),
        }),
        Err((pipelines, code)) => {
            for pipeline in pipelines.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                unsafe { context.device().destroy_pipeline(pipeline, None) };
            }
            if code == vk::Result::PIPELINE_COMPILE_REQUIRED {
                log::error!("Pipeline creation returned PIPELINE_COMPILE_REQUIRED");
                Err(VulkanError::PipelineCompileRequired)
            } else {
                Err(VulkanError::Api(code))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_raster_options() {
        let options = RasterOptions::default();
        assert_eq!(options.cull, CullMode::Front);
        assert!(options.depth_test);
    }

    #[test]
    fn test_cull_mode_flags() {
        assert_eq!(CullMode::Front.to_vk(), vk::CullModeFlags::FRONT);
        assert_eq!(CullMode::Back.to_vk(), vk::CullModeFlags::BACK);
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
    }

    #[test]
    fn test_raster_options_from_toml() {
        let options: RasterOptions = toml::from_str("cull = \"none\"\ndepth_test = false").unwrap();
        assert_eq!(options, RasterOptions { cull: CullMode::None, depth_test: false });

        let partial: RasterOptions = toml::from_str("cull = \"back\"").unwrap();
        assert!(partial.depth_test);
    }

    #[test]
    fn test_vertex_input_layout() {
        let (bindings, attributes) = vertex_input();
        assert_eq!(bindings.map(|b| b.stride), [12, 8, 12]);
        assert_eq!(attributes.map(|a| a.location), [0, 1, 2]);
        assert_eq!(attributes[1].format, vk::Format::R32G32_SFLOAT);
    }
}
