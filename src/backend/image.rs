// 2D images with dedicated memory and a default view
//
// Used for the depth/stencil attachment; the same path serves any other
// device-local render target.

use ash::vk;

use super::error::Result;
use super::memory;
use super::tracker::ObjectKind;
use super::DeviceContext;

#[derive(Debug)]
pub struct Image {
    pub handle: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub aspect: vk::ImageAspectFlags,
    memory_type_index: u32,
}

impl Image {
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }
}

/// Create an optimal-tiling 2D image, bind device-local memory (any allowed
/// type if none is device local) and create a view over `aspect`
pub fn create_image_2d(
    context: &DeviceContext,
    format: vk::Format,
    extent: vk::Extent2D,
    usage: vk::ImageUsageFlags,
    aspect: vk::ImageAspectFlags,
) -> Result<Image> {
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

    let handle = unsafe { device.create_image(&image_info, None) }?;
    let requirements = unsafe { device.get_image_memory_requirements(handle) };

    let memory_type_index = match memory::find_memory_type_preferring(
        context.memory_properties(),
        requirements.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        vk::MemoryPropertyFlags::empty(),
    ) {
        Ok(index) => index,
        Err(e) => {
            unsafe { device.destroy_image(handle, None) };
            return Err(e);
        }
    };

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.destroy_image(handle, None) };
            return Err(e.into());
        }
    };

    let bound = unsafe { device.bind_image_memory(handle, memory, 0) }
        .map_err(Into::into)
        .and_then(|_| create_image_view(context, handle, format, aspect));

    let view = match bound {
        Ok(view) => view,
        Err(e) => {
            unsafe {
                device.free_memory(memory, None);
                device.destroy_image(handle, None);
            }
            return Err(e);
        }
    };

    context.tracker().created(ObjectKind::Image);
    context.tracker().created(ObjectKind::DeviceMemory);

    log::debug!(
        "Created image {:?}: {}x{} {:?}, memory type {}",
        handle,
        extent.width,
        extent.height,
        format,
        memory_type_index
    );

    Ok(Image {
        handle,
        memory,
        view,
        format,
        extent,
        aspect,
        memory_type_index,
    })
}

/// View, then memory, then the image itself
pub fn destroy_image(context: &DeviceContext, image: Image) {
    destroy_image_view(context, image.view);
    unsafe {
        context.device().free_memory(image.memory, None);
        context.device().destroy_image(image.handle, None);
    }
    context.tracker().destroyed(ObjectKind::DeviceMemory);
    context.tracker().destroyed(ObjectKind::Image);
}

/// A single-mip, single-layer 2D view with identity swizzle
pub fn create_image_view(
    context: &DeviceContext,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    let view = unsafe { context.device().create_image_view(&create_info, None) }?;
    context.tracker().created(ObjectKind::ImageView);
    Ok(view)
}

pub fn destroy_image_view(context: &DeviceContext, view: vk::ImageView) {
    unsafe { context.device().destroy_image_view(view, None) };
    context.tracker().destroyed(ObjectKind::ImageView);
}
