// Demo scene: a grid mesh animated by a compute shader
//
// Per frame:
// 1. Host writes the transforms into this slot's uniform buffer
// 2. Compute pass rewrites the vertex buffer from the rest positions
// 3. Barrier: compute writes -> vertex attribute reads
// 4. Render pass draws the grid with depth testing

use anyhow::{bail, Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use vk_renderer::backend::descriptor::{self, DescriptorPool, DescriptorSetFreeMode};
use vk_renderer::backend::{
    sync, Buffer, Frame, GraphicsPipelineOptions, Pipeline, Renderer, ShaderLibrary,
    ShaderModule, VertexLayout,
};

/// Grid resolution (vertices per side)
const GRID_SIZE: u32 = 64;
const WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec4,
    pub normal: Vec4,
}

impl Vertex {
    pub fn layout() -> VertexLayout {
        VertexLayout::new(std::mem::size_of::<Vertex>() as u32)
            .attribute(vk::Format::R32G32B32A32_SFLOAT, 0)
            .attribute(vk::Format::R32G32B32A32_SFLOAT, 16)
    }
}

/// Matches the `Transforms` block in mesh.vert
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Transforms {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl Transforms {
    pub fn at(time: f32, aspect: f32) -> Self {
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect.max(0.01), 0.1, 100.0);
        // Vulkan clip space has Y pointing down
        proj.y_axis.y *= -1.0;

        Self {
            model: Mat4::from_rotation_y(time * 0.2),
            view: Mat4::look_at_rh(Vec3::new(0.0, 1.6, 2.6), Vec3::ZERO, Vec3::Y),
            proj,
        }
    }
}

/// A flat grid over [-1, 1] in XZ, two triangles per cell
pub fn grid(size: u32) -> (Vec<Vertex>, Vec<u32>) {
    let size = size.max(2);
    let step = 2.0 / (size - 1) as f32;

    let vertices = (0..size * size)
        .map(|i| {
            let (x, z) = (i % size, i / size);
            Vertex {
                position: Vec4::new(-1.0 + x as f32 * step, 0.0, -1.0 + z as f32 * step, 1.0),
                normal: Vec4::new(0.0, 1.0, 0.0, 0.0),
            }
        })
        .collect();

    let mut indices = Vec::with_capacity(((size - 1) * (size - 1) * 6) as usize);
    for z in 0..size - 1 {
        for x in 0..size - 1 {
            let i = z * size + x;
            indices.extend_from_slice(&[i, i + size, i + 1, i + 1, i + size, i + size + 1]);
        }
    }

    (vertices, indices)
}

// Indices into `Scene::static_buffers`
const REST_BUFFER: usize = 0;
const VERTEX_BUFFER: usize = 1;
const INDEX_BUFFER: usize = 2;

/// Everything the demo draws with. Starts empty and is filled in step by
/// step, so [`Scene::destroy`] can release a partially built scene.
pub struct Scene {
    static_buffers: Vec<Buffer>,
    uniform_buffers: Vec<Buffer>,
    vertex_buffer: vk::Buffer,
    index_buffer: vk::Buffer,
    vertex_count: u32,
    index_count: u32,

    set_layouts: Vec<vk::DescriptorSetLayout>,
    pool: Option<DescriptorPool>,
    graphics_sets: Vec<vk::DescriptorSet>,
    compute_set: vk::DescriptorSet,

    vert: Option<ShaderModule>,
    frag: Option<ShaderModule>,
    options: GraphicsPipelineOptions,
    graphics: Option<Pipeline>,
    compute: Option<Pipeline>,
}

impl Scene {
    pub fn new(
        renderer: &Renderer,
        shaders: &ShaderLibrary,
        options: GraphicsPipelineOptions,
    ) -> Result<Self> {
        let mut scene = Self {
            static_buffers: Vec::new(),
            uniform_buffers: Vec::new(),
            vertex_buffer: vk::Buffer::null(),
            index_buffer: vk::Buffer::null(),
            vertex_count: 0,
            index_count: 0,
            set_layouts: Vec::new(),
            pool: None,
            graphics_sets: Vec::new(),
            compute_set: vk::DescriptorSet::null(),
            vert: None,
            frag: None,
            options,
            graphics: None,
            compute: None,
        };

        if let Err(e) = scene.build(renderer, shaders) {
            scene.destroy(renderer);
            return Err(e);
        }
        Ok(scene)
    }

    fn build(&mut self, renderer: &Renderer, shaders: &ShaderLibrary) -> Result<()> {
        let context = renderer.context();
        let slots = renderer.frames_in_flight() as usize;

        let (vertices, indices) = grid(GRID_SIZE);
        log::info!(
            "Demo grid: {} vertices, {} triangles",
            vertices.len(),
            indices.len() / 3
        );
        self.vertex_count = vertices.len() as u32;
        self.index_count = indices.len() as u32;

        self.static_buffers
            .push(renderer.upload_to_buffer(vk::BufferUsageFlags::STORAGE_BUFFER, &vertices)?);
        self.static_buffers.push(renderer.upload_to_buffer(
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER,
            &vertices,
        )?);
        self.static_buffers
            .push(renderer.upload_to_buffer(vk::BufferUsageFlags::INDEX_BUFFER, &indices)?);
        self.vertex_buffer = self.static_buffers[VERTEX_BUFFER].handle;
        self.index_buffer = self.static_buffers[INDEX_BUFFER].handle;

        for _ in 0..slots {
            self.uniform_buffers.push(renderer.create_buffer(
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                std::mem::size_of::<Transforms>() as vk::DeviceSize,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?);
        }

        let graphics_set_layout = descriptor::create_descriptor_set_layout(
            context,
            &[descriptor::layout_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX,
            )],
        )?;
        self.set_layouts.push(graphics_set_layout);
        let compute_set_layout = descriptor::create_descriptor_set_layout(
            context,
            &[
                descriptor::layout_binding(
                    0,
                    vk::DescriptorType::STORAGE_BUFFER,
                    vk::ShaderStageFlags::COMPUTE,
                ),
                descriptor::layout_binding(
                    1,
                    vk::DescriptorType::STORAGE_BUFFER,
                    vk::ShaderStageFlags::COMPUTE,
                ),
            ],
        )?;
        self.set_layouts.push(compute_set_layout);

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: slots as u32,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 2,
            },
        ];
        let pool = self.pool.insert(descriptor::create_descriptor_pool(
            context,
            &pool_sizes,
            slots as u32 + 1,
            DescriptorSetFreeMode::PoolReset,
        )?);

        for uniform in &self.uniform_buffers {
            let set = descriptor::allocate_descriptor_set(context, graphics_set_layout, pool)?;
            descriptor::write_buffer_descriptor(
                context,
                set,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                uniform,
            );
            self.graphics_sets.push(set);
        }

        self.compute_set = descriptor::allocate_descriptor_set(context, compute_set_layout, pool)?;
        descriptor::write_buffer_descriptor(
            context,
            self.compute_set,
            0,
            vk::DescriptorType::STORAGE_BUFFER,
            &self.static_buffers[REST_BUFFER],
        );
        descriptor::write_buffer_descriptor(
            context,
            self.compute_set,
            1,
            vk::DescriptorType::STORAGE_BUFFER,
            &self.static_buffers[VERTEX_BUFFER],
        );

        self.vert = Some(shaders.load(context, "mesh.vert").context("Loading mesh.vert")?);
        self.frag = Some(shaders.load(context, "mesh.frag").context("Loading mesh.frag")?);
        let comp = shaders.load(context, "wave.comp").context("Loading wave.comp")?;

        let push_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: std::mem::size_of::<f32>() as u32,
        };
        let compute = renderer.create_compute_pipeline(&comp, &[compute_set_layout], Some(push_range));
        comp.destroy(context);
        self.compute = Some(compute?);

        self.options.descriptor_set_layouts = vec![graphics_set_layout];
        self.ensure_graphics_pipeline(renderer)
    }

    /// (Re)build the graphics pipeline when the render pass has changed
    fn ensure_graphics_pipeline(&mut self, renderer: &Renderer) -> Result<()> {
        let render_pass = renderer.render_pass();
        if render_pass == vk::RenderPass::null() {
            return Ok(());
        }
        if let Some(pipeline) = self.graphics {
            if pipeline.render_pass == render_pass {
                return Ok(());
            }
            renderer.destroy_pipeline(pipeline);
            self.graphics = None;
        }

        let (Some(vert), Some(frag)) = (&self.vert, &self.frag) else {
            bail!("Scene shaders are not loaded");
        };
        let pipeline = renderer.create_graphics_pipeline(
            &[vert, frag],
            &Vertex::layout(),
            vk::PrimitiveTopology::TRIANGLE_LIST,
            &self.options,
        )?;
        self.graphics = Some(pipeline);
        Ok(())
    }

    pub fn record(
        &mut self,
        renderer: &Renderer,
        frame: &Frame,
        time: f32,
        clear_color: [f32; 4],
    ) -> Result<()> {
        self.ensure_graphics_pipeline(renderer)?;
        let graphics = self
            .graphics
            .context("No graphics pipeline for the current render pass")?;
        let compute = self.compute.context("No compute pipeline")?;

        let context = renderer.context();
        let device = context.device();
        let cmd = frame.command_buffer;
        let slot = frame.slot();

        let aspect = frame.extent.width as f32 / frame.extent.height.max(1) as f32;
        let transforms = Transforms::at(time, aspect);
        renderer.write_buffer(
            &mut self.uniform_buffers[slot],
            0,
            bytemuck::bytes_of(&transforms),
        )?;

        // Previous frame's vertex fetch must finish before the compute pass
        // overwrites the buffer
        sync::memory_barrier(
            device,
            cmd,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::VERTEX_INPUT,
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        );

        compute.bind(device, cmd);
        compute.bind_descriptor_set(device, cmd, self.compute_set);
        unsafe {
            device.cmd_push_constants(
                cmd,
                compute.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&time),
            );
            device.cmd_dispatch(cmd, self.vertex_count.div_ceil(WORKGROUP_SIZE), 1, 1);
        }

        sync::compute_to_vertex_barrier(device, cmd);
        sync::host_write_barrier(
            device,
            cmd,
            vk::AccessFlags::UNIFORM_READ,
            vk::PipelineStageFlags::VERTEX_SHADER,
        );

        renderer.begin_render_pass(frame, clear_color);
        graphics.bind(device, cmd);
        graphics.bind_descriptor_set(device, cmd, self.graphics_sets[slot]);
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
        }
        renderer.end_render_pass(frame);

        Ok(())
    }

    /// Release everything built so far; the device must be idle
    pub fn destroy(self, renderer: &Renderer) {
        let context = renderer.context();

        for pipeline in self.graphics.into_iter().chain(self.compute) {
            renderer.destroy_pipeline(pipeline);
        }
        for module in self.vert.into_iter().chain(self.frag) {
            module.destroy(context);
        }

        if let Some(pool) = self.pool {
            descriptor::destroy_descriptor_pool(context, pool);
        }
        for layout in self.set_layouts {
            descriptor::destroy_descriptor_set_layout(context, layout);
        }

        for buffer in self.uniform_buffers.into_iter().chain(self.static_buffers) {
            renderer.destroy_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_and_uniform_sizes_match_shaders() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(Vertex::layout().stride, 32);
        assert_eq!(std::mem::size_of::<Transforms>(), 3 * 64);
    }

    #[test]
    fn grid_indices_stay_in_range() {
        let (vertices, indices) = grid(4);
        assert_eq!(vertices.len(), 16);
        assert_eq!(indices.len(), 3 * 3 * 6);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let transforms = Transforms::at(0.0, 16.0 / 9.0);
        assert!(transforms.proj.y_axis.y < 0.0);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn failed_build_releases_partial_scene() {
        use vk_renderer::backend::{DeviceContext, DeviceSettings, RendererSettings};

        let context = DeviceContext::new(&DeviceSettings::default(), None).unwrap();
        let renderer =
            Renderer::new(std::sync::Arc::clone(&context), RendererSettings::default()).unwrap();
        let baseline = context.tracker().snapshot();

        // Buffers, layouts and the pool exist by the time the shaders are missed
        let empty = tempfile::tempdir().unwrap();
        let shaders = ShaderLibrary::new(empty.path());
        let err = Scene::new(&renderer, &shaders, GraphicsPipelineOptions::default())
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("mesh.vert"));

        assert!(context.tracker().report_leaks(&baseline));
    }
}
