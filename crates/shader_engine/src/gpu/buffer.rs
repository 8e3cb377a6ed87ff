//! Buffer management for vertex data, uniforms, staging and readback
//!
//! Every buffer owns exactly one dedicated memory allocation.

use ash::vk;
use std::sync::Arc;

use super::{GpuContext, VulkanError, VulkanResult};

/// Host-visible, host-coherent memory: writes need no explicit flush
pub const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Buffer wrapper with memory management
pub struct Buffer {
    context: Arc<GpuContext>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a new buffer with memory allocation
    pub fn new(
        context: &Arc<GpuContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let device = context.device();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device.create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = context
            .find_memory_type(mem_requirements.memory_type_bits, properties)
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(mem_requirements.size)
                    .memory_type_index(memory_type_index);
                unsafe { device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let this = Self {
            context: Arc::clone(context),
            buffer,
            memory,
            size,
        };

        unsafe {
            device.bind_buffer_memory(buffer, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        Ok(this)
    }

    /// Host-visible buffer pre-filled with `data`
    pub fn with_data(context: &Arc<GpuContext>, data: &[u8], usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        let buffer = Self::new(context, data.len() as vk::DeviceSize, usage, HOST_MEMORY)?;
        buffer.write_bytes(0, data)?;
        Ok(buffer)
    }

    /// Map the whole buffer; unmapped when the guard drops
    pub fn map(&self) -> VulkanResult<MappedMemory<'_>> {
        let ptr = unsafe {
            self.context.device().map_memory(
                self.memory,
                0,
                self.size,
                vk::MemoryMapFlags::empty()
            ).map_err(VulkanError::Api)?
        };

        Ok(MappedMemory {
            buffer: self,
            ptr: ptr.cast::<u8>(),
            len: self.size as usize,
        })
    }

    /// Write bytes at `offset`
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> VulkanResult<()> {
        let end = offset.checked_add(data.len()).filter(|&end| end as vk::DeviceSize <= self.size);
        let Some(end) = end else {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes at {} overflows {}-byte buffer", data.len(), offset, self.size),
            });
        };

        let mut mapped = self.map()?;
        mapped.as_mut_slice()[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            let device = self.context.device();
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Mapped view of a host-visible [`Buffer`]
pub struct MappedMemory<'a> {
    buffer: &'a Buffer,
    ptr: *mut u8,
    len: usize,
}

impl MappedMemory<'_> {
    /// Read access to the mapped bytes
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Write access to the mapped bytes
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        unsafe {
            self.buffer.context.device().unmap_memory(self.buffer.memory);
        }
    }
}
