// Graphics and compute pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, depth/stencil, blending.
// Viewport and scissor are dynamic so pipelines survive swapchain resizes.

use ash::vk;

use super::error::Result;
use super::shader::ShaderModule;
use super::tracker::ObjectKind;
use super::DeviceContext;

/// Interleaved vertex layout at binding 0
#[derive(Debug, Clone, Default)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexLayout {
    pub fn new(stride: u32) -> Self {
        Self {
            stride,
            attributes: Vec::new(),
        }
    }

    /// Append an attribute at the next location
    pub fn attribute(mut self, format: vk::Format, offset: u32) -> Self {
        let location = self.attributes.len() as u32;
        self.attributes.push(
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(location)
                .format(format)
                .offset(offset)
                .build(),
        );
        self
    }

    pub fn binding_descriptions(&self) -> Vec<vk::VertexInputBindingDescription> {
        if self.stride == 0 {
            return Vec::new();
        }
        vec![vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(self.stride)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()]
    }
}

/// Fixed-function knobs for [`create_graphics_pipeline`]
#[derive(Debug, Clone)]
pub struct GraphicsPipelineOptions {
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_compare_op: vk::CompareOp,
    pub descriptor_set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_range: Option<vk::PushConstantRange>,
}

impl Default for GraphicsPipelineOptions {
    fn default() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_compare_op: vk::CompareOp::LESS,
            descriptor_set_layouts: Vec::new(),
            push_constant_range: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Pipeline {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub bind_point: vk::PipelineBindPoint,
    /// Null for compute pipelines
    pub render_pass: vk::RenderPass,
}

impl Pipeline {
    pub fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe { device.cmd_bind_pipeline(cmd, self.bind_point, self.handle) };
    }

    pub fn bind_descriptor_set(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            device.cmd_bind_descriptor_sets(cmd, self.bind_point, self.layout, 0, &[set], &[])
        };
    }
}

pub const DYNAMIC_STATES: [vk::DynamicState; 2] =
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

fn create_pipeline_layout(
    context: &DeviceContext,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_range: Option<vk::PushConstantRange>,
) -> Result<vk::PipelineLayout> {
    let push_constant_ranges: Vec<_> = push_constant_range.into_iter().collect();
    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(&push_constant_ranges);

    let layout = unsafe { context.device().create_pipeline_layout(&layout_info, None) }?;
    context.tracker().created(ObjectKind::PipelineLayout);
    Ok(layout)
}

fn destroy_pipeline_layout(context: &DeviceContext, layout: vk::PipelineLayout) {
    unsafe { context.device().destroy_pipeline_layout(layout, None) };
    context.tracker().destroyed(ObjectKind::PipelineLayout);
}

pub fn create_graphics_pipeline(
    context: &DeviceContext,
    stages: &[&ShaderModule],
    vertex_layout: &VertexLayout,
    topology: vk::PrimitiveTopology,
    render_pass: vk::RenderPass,
    options: &GraphicsPipelineOptions,
) -> Result<Pipeline> {
    let shader_stages: Vec<_> = stages.iter().map(|module| module.stage_info()).collect();

    // Vertex input
    let bindings = vertex_layout.binding_descriptions();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&vertex_layout.attributes);

    // Input assembly
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(topology)
        .primitive_restart_enable(false);

    // Counts only; the rectangles are set per frame
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&DYNAMIC_STATES);

    // Rasterization
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(options.cull_mode)
        .front_face(options.front_face)
        .depth_bias_enable(false);

    // Multisampling (disabled)
    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(options.depth_compare_op)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    // Color blending (no blending, opaque)
    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    let layout = create_pipeline_layout(
        context,
        &options.descriptor_set_layouts,
        options.push_constant_range,
    )?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let created = unsafe {
        context
            .device()
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    let handle = match created {
        Ok(pipelines) => pipelines[0],
        Err((_, e)) => {
            destroy_pipeline_layout(context, layout);
            return Err(e.into());
        }
    };
    context.tracker().created(ObjectKind::Pipeline);

    log::debug!("Created graphics pipeline {:?} ({} stages)", handle, stages.len());

    Ok(Pipeline {
        handle,
        layout,
        bind_point: vk::PipelineBindPoint::GRAPHICS,
        render_pass,
    })
}

pub fn create_compute_pipeline(
    context: &DeviceContext,
    stage: &ShaderModule,
    descriptor_set_layouts: &[vk::DescriptorSetLayout],
    push_constant_range: Option<vk::PushConstantRange>,
) -> Result<Pipeline> {
    let layout = create_pipeline_layout(context, descriptor_set_layouts, push_constant_range)?;

    let pipeline_info = vk::ComputePipelineCreateInfo::builder()
        .stage(stage.stage_info())
        .layout(layout)
        .build();

    let created = unsafe {
        context
            .device()
            .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    let handle = match created {
        Ok(pipelines) => pipelines[0],
        Err((_, e)) => {
            destroy_pipeline_layout(context, layout);
            return Err(e.into());
        }
    };
    context.tracker().created(ObjectKind::Pipeline);

    log::debug!("Created compute pipeline {:?}", handle);

    Ok(Pipeline {
        handle,
        layout,
        bind_point: vk::PipelineBindPoint::COMPUTE,
        render_pass: vk::RenderPass::null(),
    })
}

/// Pipeline first, then its layout. Descriptor set layouts are left alone.
pub fn destroy_pipeline(context: &DeviceContext, pipeline: Pipeline) {
    unsafe { context.device().destroy_pipeline(pipeline.handle, None) };
    context.tracker().destroyed(ObjectKind::Pipeline);
    destroy_pipeline_layout(context, pipeline.layout);
}

/// Viewport covering `extent` with the full depth range
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_assigns_sequential_locations() {
        let layout = VertexLayout::new(32)
            .attribute(vk::Format::R32G32B32A32_SFLOAT, 0)
            .attribute(vk::Format::R32G32B32A32_SFLOAT, 16);

        assert_eq!(layout.attributes.len(), 2);
        assert_eq!(layout.attributes[0].location, 0);
        assert_eq!(layout.attributes[1].location, 1);
        assert_eq!(layout.attributes[1].offset, 16);
        assert!(layout.attributes.iter().all(|a| a.binding == 0));

        let bindings = layout.binding_descriptions();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 32);
        assert_eq!(bindings[0].input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn empty_layout_has_no_binding() {
        assert!(VertexLayout::default().binding_descriptions().is_empty());
    }

    #[test]
    fn default_options() {
        let options = GraphicsPipelineOptions::default();
        assert_eq!(options.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(options.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(options.depth_compare_op, vk::CompareOp::LESS);
    }

    #[test]
    fn viewport_and_scissor_cover_extent() {
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let viewport = full_viewport(extent);
        assert_eq!((viewport.width, viewport.height), (640.0, 480.0));
        assert_eq!(viewport.max_depth, 1.0);
        assert_eq!(full_scissor(extent).extent, extent);
    }
}
