//! Descriptor set layouts, pool and writes
//!
//! The engine uses three fixed sets, allocated once: the shared texture +
//! uniform set (set 0 of both pipelines), the compute job set (set 1 of the
//! compute pipeline) and the encode set used by the planar converter.

use ash::vk;
use std::sync::Arc;

use super::{GpuContext, VulkanError, VulkanResult};

/// Stages that see the shared set
pub const SHARED_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw()
        | vk::ShaderStageFlags::FRAGMENT.as_raw()
        | vk::ShaderStageFlags::COMPUTE.as_raw(),
);

/// Descriptor set layout builder for creating reusable layouts
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, binding: u32, descriptor_type: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build()
        );
        self
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags)
    }

    /// Add a storage buffer binding
    pub fn add_storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::STORAGE_BUFFER, stage_flags)
    }

    /// Add a storage image binding
    pub fn add_storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::STORAGE_IMAGE, stage_flags)
    }

    /// Bindings added so far
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Build the descriptor set layout
    pub fn build(self, context: &Arc<GpuContext>) -> VulkanResult<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&self.bindings);

        let layout = unsafe { context.device().create_descriptor_set_layout(&layout_info, None) }
            .map_err(VulkanError::Api)?;

        Ok(DescriptorSetLayout {
            context: Arc::clone(context),
            layout,
        })
    }
}

/// Layout of the shared set: texture at binding 0, uniforms at binding 1
pub fn shared_layout() -> DescriptorSetLayoutBuilder {
    DescriptorSetLayoutBuilder::new()
        .add_combined_image_sampler(0, SHARED_STAGES)
        .add_uniform_buffer(1, SHARED_STAGES)
}

/// Layout of the compute job set: output block at binding 0, colour target at binding 1
pub fn compute_layout() -> DescriptorSetLayoutBuilder {
    DescriptorSetLayoutBuilder::new()
        .add_storage_buffer(0, vk::ShaderStageFlags::COMPUTE)
        .add_storage_image(1, vk::ShaderStageFlags::COMPUTE)
}

/// Layout of the encode set: colour source then the Y, Cr and Cb planes
pub fn encode_layout() -> DescriptorSetLayoutBuilder {
    (0..4).fold(DescriptorSetLayoutBuilder::new(), |builder, binding| {
        builder.add_storage_image(binding, vk::ShaderStageFlags::COMPUTE)
    })
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    context: Arc<GpuContext>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool sized for the engine's three sets
pub struct DescriptorPool {
    context: Arc<GpuContext>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a new descriptor pool
    pub fn new(context: &Arc<GpuContext>) -> VulkanResult<Self> {
        let size = |ty, descriptor_count| vk::DescriptorPoolSize { ty, descriptor_count };
        let pool_sizes = [
            size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
            size(vk::DescriptorType::UNIFORM_BUFFER, 1),
            size(vk::DescriptorType::STORAGE_BUFFER, 1),
            // Compute colour target plus encode source and three planes
            size(vk::DescriptorType::STORAGE_IMAGE, 5),
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(3)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { context.device().create_descriptor_pool(&pool_info, None) }
            .map_err(VulkanError::Api)?;

        Ok(Self { context: Arc::clone(context), pool })
    }

    /// Allocate one descriptor set with the given layout
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.context.device().allocate_descriptor_sets(&alloc_info) }
            .map_err(VulkanError::Api)?;
        sets.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "driver returned no descriptor set".to_string(),
        })
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_descriptor_pool(self.pool, None);
        }
    }
}

enum PendingWrite {
    Buffer(vk::DescriptorType, vk::DescriptorBufferInfo),
    Image(vk::DescriptorType, vk::DescriptorImageInfo),
}

/// Descriptor set writer collecting writes for one `update_descriptor_sets` call
#[derive(Default)]
pub struct DescriptorSetWriter {
    writes: Vec<(vk::DescriptorSet, u32, PendingWrite)>,
}

impl DescriptorSetWriter {
    /// Create a new descriptor set writer
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(mut self, set: vk::DescriptorSet, binding: u32, ty: vk::DescriptorType, buffer: vk::Buffer, range: vk::DeviceSize) -> Self {
        let info = vk::DescriptorBufferInfo { buffer, offset: 0, range };
        self.writes.push((set, binding, PendingWrite::Buffer(ty, info)));
        self
    }

    /// Write a uniform buffer binding
    pub fn write_uniform_buffer(self, set: vk::DescriptorSet, binding: u32, buffer: vk::Buffer, range: vk::DeviceSize) -> Self {
        self.buffer(set, binding, vk::DescriptorType::UNIFORM_BUFFER, buffer, range)
    }

    /// Write a storage buffer binding
    pub fn write_storage_buffer(self, set: vk::DescriptorSet, binding: u32, buffer: vk::Buffer, range: vk::DeviceSize) -> Self {
        self.buffer(set, binding, vk::DescriptorType::STORAGE_BUFFER, buffer, range)
    }

    /// Write a combined image sampler binding (shader-read-only layout)
    pub fn write_sampled_image(mut self, set: vk::DescriptorSet, binding: u32, view: vk::ImageView, sampler: vk::Sampler) -> Self {
        let info = vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        self.writes.push((set, binding, PendingWrite::Image(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, info)));
        self
    }

    /// Write a storage image binding (general layout)
    pub fn write_storage_image(mut self, set: vk::DescriptorSet, binding: u32, view: vk::ImageView) -> Self {
        let info = vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: view,
            image_layout: vk::ImageLayout::GENERAL,
        };
        self.writes.push((set, binding, PendingWrite::Image(vk::DescriptorType::STORAGE_IMAGE, info)));
        self
    }

    /// Execute all write operations
    pub fn update(self, context: &GpuContext) {
        // The infos live in `self.writes`, which is not touched while the write structs exist
        let writes: Vec<vk::WriteDescriptorSet> = self.writes.iter()
            .map(|(set, binding, pending)| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(*set)
                    .dst_binding(*binding)
                    .dst_array_element(0);
                match pending {
                    PendingWrite::Buffer(ty, info) => builder
                        .descriptor_type(*ty)
                        .buffer_info(std::slice::from_ref(info))
                        .build(),
                    PendingWrite::Image(ty, info) => builder
                        .descriptor_type(*ty)
                        .image_info(std::slice::from_ref(info))
                        .build(),
                }
            })
            .collect();

        unsafe {
            context.device().update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_layout_bindings() {
        let builder = shared_layout();
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert!(bindings[1].stage_flags.contains(vk::ShaderStageFlags::COMPUTE));
    }

    #[test]
    fn test_compute_layout_bindings() {
        let builder = compute_layout();
        let bindings = builder.bindings();
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
    }

    #[test]
    fn test_encode_layout_has_four_storage_images() {
        let builder = encode_layout();
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 4);
        assert!(bindings.iter().enumerate().all(|(i, b)| {
            b.binding == i as u32 && b.descriptor_type == vk::DescriptorType::STORAGE_IMAGE
        }));
    }
}
