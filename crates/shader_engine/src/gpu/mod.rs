//! Vulkan backend primitives
//!
//! Low-level wrappers that own one Vulkan object each and release it on drop.
//! Every wrapper keeps an `Arc<GpuContext>` so the device always outlives the
//! objects created from it.

use ash::vk;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod context;
pub mod commands;
pub mod buffer;
pub mod image;
pub mod descriptor;
pub mod mesh;
pub mod pipeline;
pub mod render_target;
pub mod encode;
pub mod readback;

pub use context::{ContextOptions, FenceWait, GpuContext};
pub use commands::{CommandRecorder, LayoutTransition, OneShotCommands};
pub use buffer::{Buffer, MappedMemory};
pub use image::{ImageResource, Sampler};
pub use descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter};
pub use mesh::{MeshData, MeshError, MeshResource, MeshUploadError};
pub use pipeline::{ComputePipeline, CullMode, GraphicsPipeline, PipelineLayout, RasterOptions, ShaderModule};
pub use render_target::RenderTargets;
pub use encode::EncodePipeline;
pub use readback::{FrameStats, ReadbackGuard};

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// The Vulkan loader could not be found or initialised
    #[error("Failed to load Vulkan: {0}")]
    Loader(String),

    /// No physical device was enumerated
    #[error("No Vulkan physical device available")]
    NoPhysicalDevice,

    /// The selected device has no queue family with the given capability
    #[error("No {0} queue family found")]
    NoQueueFamily(&'static str),

    /// No memory type matches both the resource and the requested properties
    #[error("No suitable memory type found (type bits {type_bits:#b}, properties {properties:?})")]
    NoSuitableMemoryType {
        /// Memory type bits the resource accepts
        type_bits: u32,
        /// Property flags that were required
        properties: vk::MemoryPropertyFlags,
    },

    /// The driver asked for a pipeline compile the engine cannot perform
    #[error("Pipeline creation returned PIPELINE_COMPILE_REQUIRED")]
    PipelineCompileRequired,

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// A bounded fence wait expired
    #[error("GPU did not signal completion within {waited:?}")]
    Timeout {
        /// How long the host waited
        waited: Duration,
    },
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Full-image color subresource range (one mip, one layer)
pub(crate) const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};
