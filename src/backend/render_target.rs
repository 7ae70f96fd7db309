// Render target assembly: depth buffer, render pass, framebuffers
//
// Attachment order is fixed: depth/stencil is attachment 0, color is
// attachment 1. Framebuffers and clear values follow the same order.

use ash::vk;

use super::error::{RendererError, Result};
use super::image::{self, Image};
use super::tracker::ObjectKind;
use super::DeviceContext;

pub const DEPTH_ATTACHMENT: u32 = 0;
pub const COLOR_ATTACHMENT: u32 = 1;

/// Probed in order; the first with optimal-tiling attachment support wins
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D16_UNORM,
];

pub fn select_depth_format(
    mut format_properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format> {
    DEPTH_FORMAT_CANDIDATES
        .iter()
        .copied()
        .find(|&format| {
            format_properties(format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(RendererError::NoDepthFormat)
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::S8_UINT
    )
}

pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Attachment descriptions indexed by [`DEPTH_ATTACHMENT`] and [`COLOR_ATTACHMENT`]
pub fn attachment_descriptions(
    color_format: vk::Format,
    depth_format: vk::Format,
) -> [vk::AttachmentDescription; 2] {
    let depth = vk::AttachmentDescription::builder()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::STORE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let mut descriptions = [vk::AttachmentDescription::default(); 2];
    descriptions[DEPTH_ATTACHMENT as usize] = depth;
    descriptions[COLOR_ATTACHMENT as usize] = color;
    descriptions
}

/// Framebuffer attachments in render pass declaration order
pub fn framebuffer_attachments(
    depth_view: vk::ImageView,
    color_view: vk::ImageView,
) -> [vk::ImageView; 2] {
    let mut views = [vk::ImageView::null(); 2];
    views[DEPTH_ATTACHMENT as usize] = depth_view;
    views[COLOR_ATTACHMENT as usize] = color_view;
    views
}

/// Clear values in attachment order: depth 1.0 / stencil 0, then color
pub fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    let mut values = [vk::ClearValue::default(); 2];
    values[DEPTH_ATTACHMENT as usize] = vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: 0,
        },
    };
    values[COLOR_ATTACHMENT as usize] = vk::ClearValue {
        color: vk::ClearColorValue { float32: color },
    };
    values
}

/// External -> subpass 0 dependency.
///
/// The color side orders the acquired image's layout transition before the
/// first write. The depth image is shared by every frame in flight, so its
/// clear also waits on the previous frame's late fragment test writes.
pub fn subpass_dependency() -> vk::SubpassDependency {
    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;

    vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(attachment_stages)
        .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_stage_mask(attachment_stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build()
}

pub fn create_render_pass(
    context: &DeviceContext,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass> {
    let attachments = attachment_descriptions(color_format, depth_format);

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(COLOR_ATTACHMENT)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(DEPTH_ATTACHMENT)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .depth_stencil_attachment(&depth_attachment_ref)
        .build();

    let subpasses = &[subpass];
    let dependencies = &[subpass_dependency()];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    let render_pass = unsafe { context.device().create_render_pass(&render_pass_info, None) }?;
    context.tracker().created(ObjectKind::RenderPass);
    Ok(render_pass)
}

/// One framebuffer per swapchain view, all sharing the depth view
pub fn create_framebuffers(
    context: &DeviceContext,
    render_pass: vk::RenderPass,
    depth_view: vk::ImageView,
    color_views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(color_views.len());

    for &color_view in color_views {
        let attachments = framebuffer_attachments(depth_view, color_view);
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match unsafe { context.device().create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => {
                context.tracker().created(ObjectKind::Framebuffer);
                framebuffers.push(framebuffer);
            }
            Err(e) => {
                destroy_framebuffers(context, &mut framebuffers);
                return Err(e.into());
            }
        }
    }

    Ok(framebuffers)
}

fn destroy_framebuffers(context: &DeviceContext, framebuffers: &mut Vec<vk::Framebuffer>) {
    for framebuffer in framebuffers.drain(..) {
        unsafe { context.device().destroy_framebuffer(framebuffer, None) };
        context.tracker().destroyed(ObjectKind::Framebuffer);
    }
}

/// Everything the render pass writes into for one swapchain generation.
///
/// The parts are released separately so the renderer can interleave them
/// with the swapchain's own teardown; each release is idempotent.
pub struct RenderTarget {
    pub depth_format: vk::Format,
    pub extent: vk::Extent2D,
    depth: Option<Image>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

impl RenderTarget {
    pub fn build(
        context: &DeviceContext,
        color_format: vk::Format,
        color_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let depth_format = select_depth_format(|format| context.format_properties(format))?;
        log::info!("Depth format: {:?}", depth_format);

        let depth = image::create_image_2d(
            context,
            depth_format,
            extent,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            depth_aspect(depth_format),
        )?;

        let mut target = Self {
            depth_format,
            extent,
            depth: Some(depth),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
        };

        let assembled = create_render_pass(context, color_format, depth_format).and_then(|pass| {
            target.render_pass = pass;
            create_framebuffers(context, pass, target.depth_view(), color_views, extent)
        });

        match assembled {
            Ok(framebuffers) => {
                target.framebuffers = framebuffers;
                log::info!(
                    "Render target ready: {}x{}, {} framebuffers",
                    extent.width,
                    extent.height,
                    target.framebuffers.len()
                );
                Ok(target)
            }
            Err(e) => {
                target.destroy(context);
                Err(e)
            }
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    pub fn depth_view(&self) -> vk::ImageView {
        self.depth
            .as_ref()
            .map_or(vk::ImageView::null(), |depth| depth.view)
    }

    pub fn release_framebuffers(&mut self, context: &DeviceContext) {
        destroy_framebuffers(context, &mut self.framebuffers);
    }

    pub fn release_render_pass(&mut self, context: &DeviceContext) {
        if self.render_pass != vk::RenderPass::null() {
            unsafe { context.device().destroy_render_pass(self.render_pass, None) };
            context.tracker().destroyed(ObjectKind::RenderPass);
            self.render_pass = vk::RenderPass::null();
        }
    }

    pub fn release_depth(&mut self, context: &DeviceContext) {
        if let Some(depth) = self.depth.take() {
            image::destroy_image(context, depth);
        }
    }

    pub fn destroy(&mut self, context: &DeviceContext) {
        self.release_framebuffers(context);
        self.release_render_pass(context);
        self.release_depth(context);
    }
}
