// Memory type selection
//
// A memory type qualifies when its bit is set in the resource's
// memoryTypeBits and its property flags are a superset of the request.
// The lowest qualifying index always wins, so selection is deterministic.

use ash::vk;

use super::error::{RendererError, Result};

pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = memory_properties
        .memory_type_count
        .min(vk::MAX_MEMORY_TYPES as u32);
    (0..count).find(|&i| {
        type_bits & (1 << i) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// Like [`find_memory_type`] but an error when nothing qualifies
pub fn require_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    find_memory_type(memory_properties, type_bits, required).ok_or(
        RendererError::NoSuitableMemoryType {
            type_bits,
            flags: required,
        },
    )
}

/// Try `preferred` first, then settle for `fallback`
pub fn find_memory_type_preferring(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    preferred: vk::MemoryPropertyFlags,
    fallback: vk::MemoryPropertyFlags,
) -> Result<u32> {
    find_memory_type(memory_properties, type_bits, preferred)
        .map(Ok)
        .unwrap_or_else(|| require_memory_type(memory_properties, type_bits, fallback))
}

pub fn memory_type_flags(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    index: u32,
) -> vk::MemoryPropertyFlags {
    memory_properties.memory_types[index as usize].property_flags
}
