// Full frame loop against a real window. winit allows one event loop per
// process, so everything that needs a surface runs in this single test.

mod common;

use ash::vk;
use glam::Mat4;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;
use vk_renderer::backend::descriptor::{self, DescriptorPool, DescriptorSetFreeMode};
use vk_renderer::backend::tracker::ObjectKind;
use vk_renderer::backend::{
    sync, Buffer, DeviceContext, Frame, FrameState, FrameStatus, GraphicsPipelineOptions,
    Pipeline, Renderer, RendererError, RendererSettings, ShaderLibrary, ShaderModule,
    VertexLayout, WindowProvider,
};

const CLEAR: [f32; 4] = [0.1, 0.1, 0.15, 1.0];

/// Same window handles, but reports no client area
struct Minimized<'a>(&'a dyn WindowProvider);

impl WindowProvider for Minimized<'_> {
    fn raw_display_handle(&self) -> RawDisplayHandle {
        self.0.raw_display_handle()
    }

    fn raw_window_handle(&self) -> RawWindowHandle {
        self.0.raw_window_handle()
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        (0, 0)
    }
}

/// One depth-tested triangle drawn with the mesh shaders
struct Triangle {
    vert: ShaderModule,
    frag: ShaderModule,
    set_layout: vk::DescriptorSetLayout,
    pool: DescriptorPool,
    set: vk::DescriptorSet,
    uniform: Buffer,
    vertices: Buffer,
    pipeline: Option<Pipeline>,
}

impl Triangle {
    fn new(renderer: &Renderer) -> Self {
        let context = renderer.context();
        let shaders = ShaderLibrary::new(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders"));
        let vert = shaders.load(context, "mesh.vert").unwrap();
        let frag = shaders.load(context, "mesh.frag").unwrap();

        let mut uniform = renderer
            .create_buffer(
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                3 * 64,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .unwrap();
        renderer
            .write_buffer(&mut uniform, 0, bytemuck::cast_slice(&[Mat4::IDENTITY; 3]))
            .unwrap();

        // position.xyzw, normal.xyzw
        let data: [[f32; 8]; 3] = [
            [0.0, -0.5, 0.5, 1.0, 0.0, 0.0, 1.0, 0.0],
            [0.5, 0.5, 0.5, 1.0, 0.0, 0.0, 1.0, 0.0],
            [-0.5, 0.5, 0.5, 1.0, 0.0, 0.0, 1.0, 0.0],
        ];
        let vertices = renderer
            .upload_to_buffer(vk::BufferUsageFlags::VERTEX_BUFFER, &data)
            .unwrap();

        let set_layout = descriptor::create_descriptor_set_layout(
            context,
            &[descriptor::layout_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX,
            )],
        )
        .unwrap();
        let pool = descriptor::create_descriptor_pool(
            context,
            &[vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
            }],
            1,
            DescriptorSetFreeMode::PoolReset,
        )
        .unwrap();
        let set = descriptor::allocate_descriptor_set(context, set_layout, &pool).unwrap();
        descriptor::write_buffer_descriptor(
            context,
            set,
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            &uniform,
        );

        let mut triangle = Self {
            vert,
            frag,
            set_layout,
            pool,
            set,
            uniform,
            vertices,
            pipeline: None,
        };
        triangle.ensure_pipeline(renderer);
        triangle
    }

    /// Rebuild against the renderer's current render pass when it changed
    fn ensure_pipeline(&mut self, renderer: &Renderer) {
        if let Some(pipeline) = self.pipeline {
            if pipeline.render_pass == renderer.render_pass() {
                return;
            }
            renderer.destroy_pipeline(pipeline);
        }

        let layout = VertexLayout::new(32)
            .attribute(vk::Format::R32G32B32A32_SFLOAT, 0)
            .attribute(vk::Format::R32G32B32A32_SFLOAT, 16);
        let options = GraphicsPipelineOptions {
            descriptor_set_layouts: vec![self.set_layout],
            ..Default::default()
        };
        let pipeline = renderer
            .create_graphics_pipeline(
                &[&self.vert, &self.frag],
                &layout,
                vk::PrimitiveTopology::TRIANGLE_LIST,
                &options,
            )
            .unwrap();
        assert_eq!(pipeline.render_pass, renderer.render_pass());
        self.pipeline = Some(pipeline);
    }

    fn draw(&mut self, renderer: &Renderer, frame: &Frame) {
        self.ensure_pipeline(renderer);
        let pipeline = self.pipeline.unwrap();
        let device = renderer.context().device();

        renderer.begin_render_pass(frame, CLEAR);
        pipeline.bind(device, frame.command_buffer);
        pipeline.bind_descriptor_set(device, frame.command_buffer, self.set);
        unsafe {
            device.cmd_bind_vertex_buffers(frame.command_buffer, 0, &[self.vertices.handle], &[0]);
            device.cmd_draw(frame.command_buffer, 3, 1, 0, 0);
        }
        renderer.end_render_pass(frame);
    }

    fn destroy(self, renderer: &Renderer) {
        let context = renderer.context();
        context.wait_idle().unwrap();
        if let Some(pipeline) = self.pipeline {
            renderer.destroy_pipeline(pipeline);
        }
        self.vert.destroy(context);
        self.frag.destroy(context);
        descriptor::destroy_descriptor_pool(context, self.pool);
        descriptor::destroy_descriptor_set_layout(context, self.set_layout);
        renderer.destroy_buffer(self.uniform);
        renderer.destroy_buffer(self.vertices);
    }
}

/// Render `frames` frames, signalling `extra[slot]` from each submission when
/// given. Returns how many were presented.
fn render(
    renderer: &mut Renderer,
    window: &dyn WindowProvider,
    triangle: &mut Triangle,
    frames: usize,
    extra: &[vk::Semaphore],
) -> usize {
    let mut presented = 0;
    for _ in 0..frames {
        let Some(frame) = renderer.begin_frame(window).unwrap() else {
            continue;
        };
        assert_eq!(renderer.state(), FrameState::Recording);
        assert_eq!(renderer.active_framebuffer(), Some(frame.framebuffer));
        assert!(frame.slot() < renderer.frames_in_flight() as usize);

        triangle.draw(renderer, &frame);

        let signal: Vec<vk::Semaphore> = extra.get(frame.slot()).copied().into_iter().collect();
        if renderer.end_frame(window, frame, &signal).unwrap() == FrameStatus::Presented {
            presented += 1;
        }
        assert_eq!(renderer.state(), FrameState::Idle);
        assert_eq!(renderer.active_framebuffer(), None);
    }
    presented
}

fn single_frame_in_flight(context: &Arc<DeviceContext>, window: &dyn WindowProvider) {
    let mut renderer = Renderer::new(Arc::clone(context), RendererSettings::default()).unwrap();
    renderer.bind_surface(window).unwrap();
    assert!(renderer.is_ready());
    assert!(renderer.swapchain_image_count() >= 2);
    assert_eq!(renderer.framebuffer_count(), renderer.swapchain_image_count());
    assert_eq!(context.tracker().live(ObjectKind::Surface), 1);
    let format = renderer.surface_format().unwrap();
    assert_ne!(format.format, vk::Format::UNDEFINED);

    let mut triangle = Triangle::new(&renderer);
    assert_eq!(context.tracker().live(ObjectKind::Pipeline), 1);

    // 100 frames drawing the triangle
    assert!(render(&mut renderer, window, &mut triangle, 100, &[]) > 0);

    // Recreating twice with an unchanged size is safe and keeps the invariants
    let extent = renderer.extent();
    for _ in 0..2 {
        assert_eq!(
            renderer.recreate_swapchain(window).unwrap(),
            FrameStatus::Recreated
        );
        assert_eq!(renderer.extent(), extent);
        assert_eq!(renderer.framebuffer_count(), renderer.swapchain_image_count());
        assert_eq!(context.tracker().live(ObjectKind::Surface), 1);
        assert_eq!(context.tracker().live(ObjectKind::Swapchain), 1);

        triangle.ensure_pipeline(&renderer);
        assert_eq!(
            triangle.pipeline.map(|pipeline| pipeline.render_pass),
            Some(renderer.render_pass())
        );
        assert_eq!(context.tracker().live(ObjectKind::Pipeline), 1);
        assert_eq!(context.tracker().live(ObjectKind::PipelineLayout), 1);
    }
    assert!(render(&mut renderer, window, &mut triangle, 10, &[]) > 0);

    // A minimized window tears the chain down and skips frames
    let minimized = Minimized(window);
    assert_eq!(
        renderer.recreate_swapchain(&minimized).unwrap(),
        FrameStatus::Skipped
    );
    assert!(!renderer.is_ready());
    assert_eq!(context.tracker().live(ObjectKind::Surface), 0);
    assert_eq!(context.tracker().live(ObjectKind::Framebuffer), 0);
    assert!(renderer.begin_frame(&minimized).unwrap().is_none());
    assert_eq!(renderer.last_status(), FrameStatus::Skipped);
    assert_eq!(renderer.state(), FrameState::Idle);

    // Restored: the next frame rebuilds, the one after renders
    assert!(renderer.begin_frame(window).unwrap().is_none());
    assert_eq!(renderer.last_status(), FrameStatus::Recreated);
    assert!(renderer.is_ready());
    assert!(render(&mut renderer, window, &mut triangle, 10, &[]) > 0);

    // Frame discipline
    let frame = loop {
        if let Some(frame) = renderer.begin_frame(window).unwrap() {
            break frame;
        }
    };
    assert!(matches!(
        renderer.begin_frame(window),
        Err(RendererError::InvalidFrameState { .. })
    ));
    assert!(matches!(
        renderer.recreate_swapchain(window),
        Err(RendererError::InvalidFrameState { .. })
    ));
    triangle.draw(&renderer, &frame);
    renderer.end_frame(window, frame, &[]).unwrap();
    assert_eq!(renderer.state(), FrameState::Idle);

    triangle.destroy(&renderer);
    assert_eq!(context.tracker().live(ObjectKind::Pipeline), 0);
    assert_eq!(context.tracker().live(ObjectKind::PipelineLayout), 0);
}

fn two_frames_in_flight(context: &Arc<DeviceContext>, window: &dyn WindowProvider) {
    let settings = RendererSettings {
        frames_in_flight: 2,
        ..Default::default()
    };
    let mut renderer = Renderer::new(Arc::clone(context), settings).unwrap();
    assert_eq!(renderer.frames_in_flight(), 2);
    renderer.bind_surface(window).unwrap();

    let mut triangle = Triangle::new(&renderer);
    let extra = [
        sync::create_semaphore(context).unwrap(),
        sync::create_semaphore(context).unwrap(),
    ];

    assert!(render(&mut renderer, window, &mut triangle, 60, &extra) > 0);
    assert_eq!(
        renderer.recreate_swapchain(window).unwrap(),
        FrameStatus::Recreated
    );
    assert!(render(&mut renderer, window, &mut triangle, 20, &extra) > 0);

    triangle.destroy(&renderer);
    for semaphore in extra {
        sync::destroy_semaphore(context, semaphore);
    }
}

#[test]
#[ignore = "Requires GPU hardware"]
fn frame_loop_lifecycle() {
    let event_loop = common::event_loop();
    let window = common::window(&event_loop, 640, 480);
    let window: &dyn WindowProvider = &window;

    let context = DeviceContext::new(&common::settings(), Some(window)).unwrap();
    assert!(context.is_presentable());
    let baseline = context.tracker().snapshot();

    single_frame_in_flight(&context, window);
    assert!(context.tracker().report_leaks(&baseline));

    two_frames_in_flight(&context, window);
    assert!(context.tracker().report_leaks(&baseline));
    assert_eq!(context.validation_error_count(), 0);
}
