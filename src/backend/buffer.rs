// Buffer allocation for vertex, index, storage and uniform data
//
// Creation order: buffer -> requirements -> memory type -> allocate -> bind.
// A Buffer is only handed out after its memory is bound. Destruction runs
// the other way round: memory is freed before the handle is destroyed.

use ash::vk;
use std::ptr::NonNull;

use super::error::{RendererError, Result};
use super::memory;
use super::tracker::ObjectKind;
use super::DeviceContext;

/// A buffer handle with its own dedicated, bound memory
#[derive(Debug)]
pub struct Buffer {
    pub handle: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub usage: vk::BufferUsageFlags,
    pub size: vk::DeviceSize,
    memory_type_index: u32,
    memory_flags: vk::MemoryPropertyFlags,
    mapped: Option<NonNull<u8>>,
}

impl Buffer {
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    pub fn memory_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_flags
    }

    pub fn is_host_visible(&self) -> bool {
        self.memory_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Descriptor info covering the whole buffer
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.handle,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    fn check_range(&self, offset: vk::DeviceSize, len: usize) -> Result<()> {
        let len = len as vk::DeviceSize;
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(RendererError::OutOfBounds {
                offset,
                len,
                size: self.size,
            }
            .reported()),
        }
    }
}

/// Create a buffer of `size` bytes backed by the lowest memory type that
/// satisfies `memory_flags`
pub fn create_buffer(
    context: &DeviceContext,
    usage: vk::BufferUsageFlags,
    size: vk::DeviceSize,
    memory_flags: vk::MemoryPropertyFlags,
) -> Result<Buffer> {
    let device = context.device();
    let queue_family_indices = [context.queue_family_index()];

    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .queue_family_indices(&queue_family_indices);

    let handle = unsafe { device.create_buffer(&buffer_info, None) }?;

    let requirements = unsafe { device.get_buffer_memory_requirements(handle) };

    let memory_type_index = match memory::require_memory_type(
        context.memory_properties(),
        requirements.memory_type_bits,
        memory_flags,
    ) {
        Ok(index) => index,
        Err(e) => {
            unsafe { device.destroy_buffer(handle, None) };
            return Err(e);
        }
    };

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.destroy_buffer(handle, None) };
            return Err(e.into());
        }
    };

    if let Err(e) = unsafe { device.bind_buffer_memory(handle, memory, 0) } {
        unsafe {
            device.free_memory(memory, None);
            device.destroy_buffer(handle, None);
        }
        return Err(e.into());
    }

    context.tracker().created(ObjectKind::Buffer);
    context.tracker().created(ObjectKind::DeviceMemory);

    log::debug!(
        "Created buffer {:?}: {} bytes, usage {:?}, memory type {}",
        handle,
        size,
        usage,
        memory_type_index
    );

    Ok(Buffer {
        handle,
        memory,
        usage,
        size,
        memory_type_index,
        memory_flags: memory::memory_type_flags(context.memory_properties(), memory_type_index),
        mapped: None,
    })
}

/// Create a host-visible, coherent buffer and fill it with `data`
pub fn upload_to_buffer<T: bytemuck::Pod>(
    context: &DeviceContext,
    usage: vk::BufferUsageFlags,
    data: &[T],
) -> Result<Buffer> {
    let bytes: &[u8] = bytemuck::cast_slice(data);

    let mut buffer = create_buffer(
        context,
        usage,
        bytes.len().max(1) as vk::DeviceSize,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    if let Err(e) = write_buffer(context, &mut buffer, 0, bytes) {
        destroy_buffer(context, buffer);
        return Err(e);
    }

    Ok(buffer)
}

/// Free the memory, then destroy the handle. The GPU must be done with it.
pub fn destroy_buffer(context: &DeviceContext, mut buffer: Buffer) {
    if buffer.is_mapped() {
        log::warn!("Destroying buffer {:?} while it is still mapped", buffer.handle);
        let _ = unmap_buffer(context, &mut buffer);
    }

    unsafe {
        context.device().free_memory(buffer.memory, None);
        context.device().destroy_buffer(buffer.handle, None);
    }

    context.tracker().destroyed(ObjectKind::DeviceMemory);
    context.tracker().destroyed(ObjectKind::Buffer);
}

/// Map the whole buffer for host access. Only one mapping may be live at a
/// time; call [`unmap_buffer`] when done.
pub fn map_buffer<'a>(context: &DeviceContext, buffer: &'a mut Buffer) -> Result<&'a mut [u8]> {
    if !buffer.is_host_visible() {
        return Err(RendererError::NotHostVisible(buffer.memory_flags).reported());
    }
    if buffer.is_mapped() {
        return Err(RendererError::AlreadyMapped.reported());
    }

    let device = context.device();
    let ptr = unsafe {
        device.map_memory(
            buffer.memory,
            0,
            vk::WHOLE_SIZE,
            vk::MemoryMapFlags::empty(),
        )
    }? as *mut u8;

    let ptr = match NonNull::new(ptr) {
        Some(ptr) => ptr,
        None => {
            unsafe { device.unmap_memory(buffer.memory) };
            return Err(RendererError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
    };

    if !buffer
        .memory_flags
        .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    {
        let range = whole_range(buffer.memory);
        if let Err(e) = unsafe { device.invalidate_mapped_memory_ranges(&[range]) } {
            unsafe { device.unmap_memory(buffer.memory) };
            return Err(e.into());
        }
    }

    buffer.mapped = Some(ptr);
    Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), buffer.size as usize) })
}

/// Flush (for non-coherent memory) and unmap
pub fn unmap_buffer(context: &DeviceContext, buffer: &mut Buffer) -> Result<()> {
    if buffer.mapped.take().is_none() {
        return Err(RendererError::NotMapped.reported());
    }

    let device = context.device();
    let flushed = if buffer
        .memory_flags
        .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    {
        Ok(())
    } else {
        unsafe { device.flush_mapped_memory_ranges(&[whole_range(buffer.memory)]) }
    };

    unsafe { device.unmap_memory(buffer.memory) };
    flushed?;
    Ok(())
}

/// Copy `data` into the buffer at `offset` through a short-lived mapping
pub fn write_buffer(
    context: &DeviceContext,
    buffer: &mut Buffer,
    offset: vk::DeviceSize,
    data: &[u8],
) -> Result<()> {
    buffer.check_range(offset, data.len())?;
    let start = offset as usize;
    let mapped = map_buffer(context, buffer)?;
    mapped[start..start + data.len()].copy_from_slice(data);
    unmap_buffer(context, buffer)
}

/// Copy `out.len()` bytes starting at `offset` out of the buffer
pub fn read_buffer(
    context: &DeviceContext,
    buffer: &mut Buffer,
    offset: vk::DeviceSize,
    out: &mut [u8],
) -> Result<()> {
    buffer.check_range(offset, out.len())?;
    let start = offset as usize;
    let mapped = map_buffer(context, buffer)?;
    out.copy_from_slice(&mapped[start..start + out.len()]);
    unmap_buffer(context, buffer)
}

fn whole_range(memory: vk::DeviceMemory) -> vk::MappedMemoryRange {
    vk::MappedMemoryRange::builder()
        .memory(memory)
        .offset(0)
        .size(vk::WHOLE_SIZE)
        .build()
}
