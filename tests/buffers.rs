// Allocator behaviour against a real device

mod common;

use ash::vk;
use glam::Mat4;
use vk_renderer::backend::tracker::ObjectKind;
use raw_window_handle::{
    RawDisplayHandle, RawWindowHandle, XlibDisplayHandle, XlibWindowHandle,
};
use vk_renderer::backend::{
    buffer, descriptor, image, ErrorKind, FrameState, Renderer, RendererError, RendererSettings,
    WindowProvider,
};

const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

#[test]
#[ignore = "Requires GPU hardware"]
fn uniform_round_trip_through_mapping() {
    let context = common::headless_context();
    let baseline = context.tracker().snapshot();

    let transforms = [Mat4::IDENTITY; 3];
    let bytes: &[u8] = bytemuck::cast_slice(&transforms);
    assert_eq!(bytes.len(), 192);

    let mut ubo =
        buffer::create_buffer(&context, vk::BufferUsageFlags::UNIFORM_BUFFER, 192, HOST).unwrap();
    assert!(ubo.is_host_visible());
    assert!(ubo.memory_flags().contains(HOST));

    let mapped = buffer::map_buffer(&context, &mut ubo).unwrap();
    mapped[..192].copy_from_slice(bytes);
    buffer::unmap_buffer(&context, &mut ubo).unwrap();

    let mapped = buffer::map_buffer(&context, &mut ubo).unwrap();
    assert_eq!(&mapped[..192], bytes);
    buffer::unmap_buffer(&context, &mut ubo).unwrap();

    buffer::destroy_buffer(&context, ubo);
    assert!(context.tracker().report_leaks(&baseline));
    assert_eq!(context.validation_error_count(), 0);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn mapping_discipline_is_enforced() {
    let context = common::headless_context();

    let mut ubo =
        buffer::create_buffer(&context, vk::BufferUsageFlags::UNIFORM_BUFFER, 64, HOST).unwrap();
    assert!(matches!(
        buffer::unmap_buffer(&context, &mut ubo),
        Err(RendererError::NotMapped)
    ));

    buffer::map_buffer(&context, &mut ubo).unwrap();
    let err = buffer::map_buffer(&context, &mut ubo).unwrap_err();
    assert!(matches!(err, RendererError::AlreadyMapped));
    assert_eq!(err.kind(), ErrorKind::Programmer);
    buffer::unmap_buffer(&context, &mut ubo).unwrap();

    let err = buffer::write_buffer(&context, &mut ubo, 60, &[0u8; 8]).unwrap_err();
    assert!(matches!(err, RendererError::OutOfBounds { size: 64, .. }));
    assert!(!ubo.is_mapped());

    buffer::destroy_buffer(&context, ubo);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn device_local_buffers_cannot_be_mapped() {
    let context = common::headless_context();
    let props = context.memory_properties();
    let host_visible_everywhere = (0..props.memory_type_count).all(|i| {
        props.memory_types[i as usize]
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    });
    if host_visible_everywhere {
        // Unified memory without a device-only type
        return;
    }

    let mut buffer = buffer::create_buffer(
        &context,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        256,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .unwrap();
    if !buffer.is_host_visible() {
        assert!(matches!(
            buffer::map_buffer(&context, &mut buffer),
            Err(RendererError::NotHostVisible(_))
        ));
    }
    buffer::destroy_buffer(&context, buffer);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn create_destroy_cycles_leave_no_handles() {
    let context = common::headless_context();
    let baseline = context.tracker().snapshot();

    for i in 0..64u64 {
        let data: Vec<u32> = (0..(i as u32 + 1) * 16).collect();
        let mut buffer =
            buffer::upload_to_buffer(&context, vk::BufferUsageFlags::VERTEX_BUFFER, &data).unwrap();
        let mut out = vec![0u8; 4];
        buffer::read_buffer(&context, &mut buffer, 4, &mut out).unwrap();
        assert_eq!(u32::from_le_bytes([out[0], out[1], out[2], out[3]]), 1);
        buffer::destroy_buffer(&context, buffer);

        let depth = image::create_image_2d(
            &context,
            vk::Format::D16_UNORM,
            vk::Extent2D {
                width: 64 + i as u32,
                height: 64,
            },
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )
        .unwrap();
        image::destroy_image(&context, depth);
    }

    assert_eq!(context.tracker().live(ObjectKind::Buffer), 0);
    assert_eq!(context.tracker().live(ObjectKind::DeviceMemory), 0);
    assert!(context.tracker().report_leaks(&baseline));
    assert_eq!(context.validation_error_count(), 0);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn descriptor_pool_free_mode_is_respected() {
    let context = common::headless_context();
    let layout = descriptor::create_descriptor_set_layout(
        &context,
        &[descriptor::layout_binding(
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX,
        )],
    )
    .unwrap();
    let sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 2,
    }];

    let individual = descriptor::create_descriptor_pool(
        &context,
        &sizes,
        2,
        descriptor::DescriptorSetFreeMode::Individual,
    )
    .unwrap();
    let set = descriptor::allocate_descriptor_set(&context, layout, &individual).unwrap();
    descriptor::free_descriptor_set(&context, &individual, set).unwrap();

    let reset_only = descriptor::create_descriptor_pool(
        &context,
        &sizes,
        2,
        descriptor::DescriptorSetFreeMode::PoolReset,
    )
    .unwrap();
    let set = descriptor::allocate_descriptor_set(&context, layout, &reset_only).unwrap();
    assert!(matches!(
        descriptor::free_descriptor_set(&context, &reset_only, set),
        Err(RendererError::IndividualFreeNotAllowed)
    ));
    descriptor::reset_descriptor_pool(&context, &reset_only).unwrap();

    descriptor::destroy_descriptor_pool(&context, individual);
    descriptor::destroy_descriptor_pool(&context, reset_only);
    descriptor::destroy_descriptor_set_layout(&context, layout);
    assert_eq!(context.validation_error_count(), 0);
}

/// A window the headless context was never told about
struct UnboundWindow;

impl WindowProvider for UnboundWindow {
    fn raw_display_handle(&self) -> RawDisplayHandle {
        RawDisplayHandle::Xlib(XlibDisplayHandle::empty())
    }

    fn raw_window_handle(&self) -> RawWindowHandle {
        RawWindowHandle::Xlib(XlibWindowHandle::empty())
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        (640, 480)
    }
}

#[test]
#[ignore = "Requires GPU hardware"]
fn headless_context_refuses_presentation() {
    let context = common::headless_context();
    assert!(!context.is_presentable());
    let baseline = context.tracker().snapshot();

    let mut renderer = Renderer::new(context.clone(), RendererSettings::default()).unwrap();
    let err = renderer.bind_surface(&UnboundWindow).unwrap_err();
    assert!(matches!(err, RendererError::NotPresentable));
    assert_eq!(err.kind(), ErrorKind::Programmer);
    assert!(!renderer.is_ready());

    // A failed frame leaves the loop able to try again
    for _ in 0..2 {
        assert!(matches!(
            renderer.begin_frame(&UnboundWindow),
            Err(RendererError::NotPresentable)
        ));
        assert_eq!(renderer.state(), FrameState::Idle);
    }

    drop(renderer);
    assert!(context.tracker().report_leaks(&baseline));
}
