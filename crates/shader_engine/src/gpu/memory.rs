//! Memory type selection

use ash::vk;
use super::{VulkanError, VulkanResult};

/// Find the first memory type accepted by `type_bits` that has all of `required`
///
/// Failure means the driver cannot back the resource at all; callers treat it
/// as a device error, never as bad input.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && memory_properties.memory_types[i as usize].property_flags.contains(required)
        })
        .ok_or(VulkanError::NoSuitableMemoryType { type_bits, properties: required })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        for (i, f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = *f;
        }
        props.memory_type_count = flags.len() as u32;
        props
    }

    #[test]
    fn test_picks_first_matching_type() {
        let props = table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(), 0);
    }

    #[test]
    fn test_respects_type_bits() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = table(&[host, host]);

        assert_eq!(find_memory_type(&props, 0b10, host).unwrap(), 1);
    }

    #[test]
    fn test_missing_type_is_an_error() {
        let props = table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        let err = find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        assert!(matches!(err, VulkanError::NoSuitableMemoryType { type_bits: 1, .. }));
    }

    #[test]
    fn test_types_beyond_count_are_ignored() {
        let mut props = table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;

        assert!(find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }
}
