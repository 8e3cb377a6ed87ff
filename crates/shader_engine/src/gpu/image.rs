//! Owned GPU images
//!
//! Wraps the create → allocate → bind → view sequence for device-local 2D
//! images, plus the texture sampler.

use ash::vk;
use std::sync::Arc;

use super::{GpuContext, VulkanError, VulkanResult};

/// Device-local 2D image with backing memory and a view
pub struct ImageResource {
    context: Arc<GpuContext>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    aspect: vk::ImageAspectFlags,
    extent: vk::Extent2D,
}

impl ImageResource {
    /// Create an image in UNDEFINED layout
    pub fn new(
        context: &Arc<GpuContext>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("image extent {}x{} is empty", extent.width, extent.height),
            });
        }

        let device = context.device();
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            device.create_image(&image_info, None)
                .map_err(VulkanError::Api)?
        };

        let mem_requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = context
            .find_memory_type(mem_requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(mem_requirements.size)
                    .memory_type_index(memory_type_index);
                unsafe { device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        // From here on Drop releases whatever has been created
        let mut this = Self {
            context: Arc::clone(context),
            image,
            memory,
            view: vk::ImageView::null(),
            format,
            usage,
            aspect,
            extent,
        };

        unsafe {
            device.bind_image_memory(image, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        this.view = unsafe {
            device.create_image_view(&view_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(this)
    }

    /// Image handle
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Image view handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Usage flags the image was created with
    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    /// Aspect covered by the view
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    /// Width and height
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for ImageResource {
    fn drop(&mut self) {
        unsafe {
            let device = self.context.device();
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
            }
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Texture sampler: linear filtering, repeat addressing
pub struct Sampler {
    context: Arc<GpuContext>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Create the texture sampler
    pub fn new(context: &Arc<GpuContext>) -> VulkanResult<Self> {
        let sampler_create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::NEVER)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

        let sampler = unsafe {
            context.device().create_sampler(&sampler_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            context: Arc::clone(context),
            sampler,
        })
    }

    /// Sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_sampler(self.sampler, None);
        }
    }
}
