// Descriptor set layouts, pools and sets
//
// Pools declare up front whether sets are freed one by one or only by
// resetting the whole pool; the flag is derived from that choice.

use ash::vk;

use super::buffer::Buffer;
use super::error::{RendererError, Result};
use super::tracker::ObjectKind;
use super::DeviceContext;

/// How sets allocated from a pool are given back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorSetFreeMode {
    /// Sets may be freed individually (`FREE_DESCRIPTOR_SET`)
    Individual,
    /// Sets are only released by resetting or destroying the pool
    PoolReset,
}

impl DescriptorSetFreeMode {
    pub fn pool_flags(self) -> vk::DescriptorPoolCreateFlags {
        match self {
            Self::Individual => vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            Self::PoolReset => vk::DescriptorPoolCreateFlags::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DescriptorPool {
    pub handle: vk::DescriptorPool,
    pub free_mode: DescriptorSetFreeMode,
    pub max_sets: u32,
}

/// A single-descriptor binding visible to `stages`
pub fn layout_binding(
    binding: u32,
    descriptor_type: vk::DescriptorType,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding {
    vk::DescriptorSetLayoutBinding::builder()
        .binding(binding)
        .descriptor_type(descriptor_type)
        .descriptor_count(1)
        .stage_flags(stages)
        .build()
}

pub fn create_descriptor_set_layout(
    context: &DeviceContext,
    bindings: &[vk::DescriptorSetLayoutBinding],
) -> Result<vk::DescriptorSetLayout> {
    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
    let layout = unsafe {
        context
            .device()
            .create_descriptor_set_layout(&layout_info, None)
    }?;
    context.tracker().created(ObjectKind::DescriptorSetLayout);
    Ok(layout)
}

pub fn destroy_descriptor_set_layout(context: &DeviceContext, layout: vk::DescriptorSetLayout) {
    unsafe {
        context
            .device()
            .destroy_descriptor_set_layout(layout, None)
    };
    context.tracker().destroyed(ObjectKind::DescriptorSetLayout);
}

pub fn create_descriptor_pool(
    context: &DeviceContext,
    pool_sizes: &[vk::DescriptorPoolSize],
    max_sets: u32,
    free_mode: DescriptorSetFreeMode,
) -> Result<DescriptorPool> {
    let create_info = vk::DescriptorPoolCreateInfo::builder()
        .flags(free_mode.pool_flags())
        .max_sets(max_sets)
        .pool_sizes(pool_sizes);

    let handle = unsafe { context.device().create_descriptor_pool(&create_info, None) }?;
    context.tracker().created(ObjectKind::DescriptorPool);

    Ok(DescriptorPool {
        handle,
        free_mode,
        max_sets,
    })
}

/// Destroying the pool releases every set still allocated from it
pub fn destroy_descriptor_pool(context: &DeviceContext, pool: DescriptorPool) {
    unsafe { context.device().destroy_descriptor_pool(pool.handle, None) };
    context.tracker().destroyed(ObjectKind::DescriptorPool);
}

pub fn allocate_descriptor_set(
    context: &DeviceContext,
    layout: vk::DescriptorSetLayout,
    pool: &DescriptorPool,
) -> Result<vk::DescriptorSet> {
    let layouts = [layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(pool.handle)
        .set_layouts(&layouts);

    let sets = unsafe { context.device().allocate_descriptor_sets(&alloc_info) }?;
    sets.into_iter()
        .next()
        .ok_or(RendererError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
}

/// Return one set to an [`DescriptorSetFreeMode::Individual`] pool
pub fn free_descriptor_set(
    context: &DeviceContext,
    pool: &DescriptorPool,
    set: vk::DescriptorSet,
) -> Result<()> {
    if pool.free_mode != DescriptorSetFreeMode::Individual {
        return Err(RendererError::IndividualFreeNotAllowed.reported());
    }
    unsafe { context.device().free_descriptor_sets(pool.handle, &[set]) }?;
    Ok(())
}

pub fn reset_descriptor_pool(context: &DeviceContext, pool: &DescriptorPool) -> Result<()> {
    unsafe {
        context
            .device()
            .reset_descriptor_pool(pool.handle, vk::DescriptorPoolResetFlags::empty())
    }?;
    Ok(())
}

/// Point `binding` of `set` at the whole of `buffer`
pub fn write_buffer_descriptor(
    context: &DeviceContext,
    set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    buffer: &Buffer,
) {
    let buffer_info = buffer.descriptor_info();
    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .buffer_info(std::slice::from_ref(&buffer_info))
        .build();

    unsafe { context.device().update_descriptor_sets(&[write], &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_mode_maps_to_pool_flags() {
        assert_eq!(
            DescriptorSetFreeMode::Individual.pool_flags(),
            vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET
        );
        assert!(DescriptorSetFreeMode::PoolReset.pool_flags().is_empty());
    }

    #[test]
    fn binding_holds_one_descriptor() {
        let binding = layout_binding(
            2,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX,
        );
        assert_eq!(binding.binding, 2);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::VERTEX);
    }
}
