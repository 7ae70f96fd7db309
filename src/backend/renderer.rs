// Frame loop controller
//
// Owns everything tied to one swapchain generation (surface, swapchain,
// render target, per-slot sync) plus the command pool, and drives the
// acquire -> record -> submit -> present protocol over a single queue.
//
// With one frame in flight the loop stalls on queue idle after every
// acquire, so the CPU never records while the GPU still reads last frame's
// buffers. More slots trade that stall for a per-slot submit fence.

use ash::vk;
use std::sync::Arc;

use super::buffer::{self, Buffer};
use super::error::{RendererError, Result};
use super::frame::{Frame, FrameState, FrameStatus};
use super::image::{self, Image};
use super::pipeline::{self, GraphicsPipelineOptions, Pipeline, VertexLayout};
use super::render_target::{self, RenderTarget};
use super::shader::ShaderModule;
use super::surface::{Surface, WindowProvider};
use super::swapchain::{PresentOutcome, Swapchain};
use super::sync::{self, FrameSync};
use super::tracker::ObjectKind;
use super::DeviceContext;

#[derive(Debug, Clone)]
pub struct RendererSettings {
    /// Requested swapchain length, clamped to what the surface allows
    pub swapchain_images: u32,
    pub frames_in_flight: u32,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            swapchain_images: 2,
            frames_in_flight: 1,
        }
    }
}

/// One step of swapchain-chain teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStage {
    Sync,
    Framebuffers,
    RenderPass,
    DepthResources,
    ImageViews,
    Swapchain,
    Surface,
}

/// Dependents before what they reference
pub const SWAPCHAIN_TEARDOWN_ORDER: [TeardownStage; 7] = [
    TeardownStage::Sync,
    TeardownStage::Framebuffers,
    TeardownStage::RenderPass,
    TeardownStage::DepthResources,
    TeardownStage::ImageViews,
    TeardownStage::Swapchain,
    TeardownStage::Surface,
];

pub struct Renderer {
    context: Arc<DeviceContext>,
    settings: RendererSettings,

    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,

    surface: Option<Surface>,
    swapchain: Option<Swapchain>,
    target: Option<RenderTarget>,
    sync: Vec<FrameSync>,

    state: FrameState,
    slot: usize,
    active_image: Option<u32>,
    recreate_requested: bool,
    deferred: bool,
    last_status: FrameStatus,
}

impl Renderer {
    pub fn new(context: Arc<DeviceContext>, settings: RendererSettings) -> Result<Self> {
        let settings = RendererSettings {
            frames_in_flight: settings.frames_in_flight.max(1),
            ..settings
        };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(context.queue_family_index());
        let command_pool = unsafe { context.device().create_command_pool(&pool_info, None) }?;
        context.tracker().created(ObjectKind::CommandPool);

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(settings.frames_in_flight);
        let command_buffers = match unsafe { context.device().allocate_command_buffers(&alloc_info) }
        {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { context.device().destroy_command_pool(command_pool, None) };
                context.tracker().destroyed(ObjectKind::CommandPool);
                return Err(e.into());
            }
        };

        log::info!(
            "Renderer created: {} frame(s) in flight, {} swapchain images requested",
            settings.frames_in_flight,
            settings.swapchain_images
        );

        Ok(Self {
            context,
            settings,
            command_pool,
            command_buffers,
            surface: None,
            swapchain: None,
            target: None,
            sync: Vec::new(),
            state: FrameState::Idle,
            slot: 0,
            active_image: None,
            recreate_requested: false,
            deferred: false,
            last_status: FrameStatus::Presented,
        })
    }

    /// Bind the window and build the swapchain chain for it. A minimized
    /// window defers the build to the first frame with a real size.
    pub fn bind_surface(&mut self, window: &dyn WindowProvider) -> Result<()> {
        self.ensure_presentable()?;
        if self.surface.is_some() {
            self.recreate_swapchain(window)?;
            return Ok(());
        }
        if is_zero_size(window.framebuffer_size()) {
            log::info!("Window has no area; deferring swapchain creation");
            self.deferred = true;
            return Ok(());
        }
        self.build_presentation(window)
    }

    /// Wait idle, tear the whole swapchain chain down and build it again
    pub fn recreate_swapchain(&mut self, window: &dyn WindowProvider) -> Result<FrameStatus> {
        if !matches!(self.state, FrameState::Idle | FrameState::Recreate) {
            return Err(RendererError::InvalidFrameState {
                expected: FrameState::Idle.name(),
                found: self.state.name(),
            }
            .reported());
        }

        self.context.wait_idle()?;
        self.teardown_swapchain();
        self.state = FrameState::Idle;
        self.recreate_requested = false;

        let size = window.framebuffer_size();
        let status = if is_zero_size(size) {
            log::debug!("Swapchain rebuild deferred until the window has a size");
            self.deferred = true;
            FrameStatus::Skipped
        } else {
            log::info!("Recreating swapchain for {}x{}", size.0, size.1);
            self.build_presentation(window)?;
            FrameStatus::Recreated
        };
        self.last_status = status;
        Ok(status)
    }

    /// Rebuild at the start of the next frame (e.g. after a resize event)
    pub fn request_recreate(&mut self) {
        self.recreate_requested = true;
    }

    fn ensure_presentable(&self) -> Result<()> {
        if self.context.is_presentable() {
            Ok(())
        } else {
            Err(RendererError::NotPresentable.reported())
        }
    }

    fn build_presentation(&mut self, window: &dyn WindowProvider) -> Result<()> {
        self.ensure_presentable()?;
        let result = self.try_build_presentation(window);
        if result.is_err() {
            self.teardown_swapchain();
        }
        result
    }

    fn try_build_presentation(&mut self, window: &dyn WindowProvider) -> Result<()> {
        let context = Arc::clone(&self.context);

        let surface = Surface::bind(&context, window)?;
        let surface_handle = surface.handle;
        self.surface = Some(surface);

        let support = self
            .surface
            .as_ref()
            .map(|surface| surface.query(&context))
            .transpose()?
            .unwrap_or_default();

        let swapchain = Swapchain::new(
            &context,
            surface_handle,
            &support,
            window.framebuffer_size(),
            self.settings.swapchain_images,
        )?;
        let target = RenderTarget::build(
            &context,
            swapchain.format.format,
            &swapchain.image_views,
            swapchain.extent,
        );
        self.swapchain = Some(swapchain);
        self.target = Some(target?);

        for _ in 0..self.settings.frames_in_flight {
            self.sync.push(FrameSync::new(&context)?);
        }

        debug_assert_eq!(self.framebuffer_count(), self.swapchain_image_count());
        self.slot = 0;
        self.deferred = false;
        Ok(())
    }

    fn teardown_swapchain(&mut self) {
        for stage in SWAPCHAIN_TEARDOWN_ORDER {
            self.release(stage);
        }
        self.active_image = None;
    }

    fn release(&mut self, stage: TeardownStage) {
        let context = &self.context;
        match stage {
            TeardownStage::Sync => {
                for sync in self.sync.drain(..) {
                    sync.destroy(context);
                }
            }
            TeardownStage::Framebuffers => {
                if let Some(target) = &mut self.target {
                    target.release_framebuffers(context);
                }
            }
            TeardownStage::RenderPass => {
                if let Some(target) = &mut self.target {
                    target.release_render_pass(context);
                }
            }
            TeardownStage::DepthResources => {
                if let Some(mut target) = self.target.take() {
                    target.release_depth(context);
                }
            }
            TeardownStage::ImageViews => {
                if let Some(swapchain) = &mut self.swapchain {
                    swapchain.destroy_views(context);
                }
            }
            TeardownStage::Swapchain => {
                if let Some(mut swapchain) = self.swapchain.take() {
                    swapchain.destroy_handle(context);
                }
            }
            TeardownStage::Surface => {
                if let Some(surface) = self.surface.take() {
                    surface.destroy(context);
                }
            }
        }
    }

    /// Acquire an image and start recording.
    ///
    /// Returns `None` when no frame can be rendered right now: the swapchain
    /// was just recreated or the window is minimized. [`Self::last_status`]
    /// tells which.
    ///
    /// A frame that failed partway leaves the loop in Idle or Recreate, so the
    /// next call either starts over or rebuilds the swapchain first.
    pub fn begin_frame(&mut self, window: &dyn WindowProvider) -> Result<Option<Frame>> {
        if self.state == FrameState::Recreate {
            self.recreate_swapchain(window)?;
            return Ok(None);
        }

        self.state
            .transition(FrameState::Idle, FrameState::Acquiring)?;
        self.acquire_and_record(window)
            .map_err(|err| self.abandon_frame(err))
    }

    fn acquire_and_record(&mut self, window: &dyn WindowProvider) -> Result<Option<Frame>> {
        if self.deferred && is_zero_size(window.framebuffer_size()) {
            self.state = FrameState::Idle;
            self.last_status = FrameStatus::Skipped;
            return Ok(None);
        }

        if self.recreate_requested || !self.is_ready() {
            self.state = FrameState::Recreate;
            self.recreate_swapchain(window)?;
            return Ok(None);
        }

        let slot = self.slot;
        let device = self.context.device();
        let (acquire_fence, submit_fence) = {
            let sync = &self.sync[slot];
            (sync.acquire_fence, sync.submit_fence)
        };

        if self.settings.frames_in_flight > 1 {
            // The slot's command buffer may still be executing
            unsafe { device.wait_for_fences(&[submit_fence], true, u64::MAX) }?;
        }

        let acquired = match &self.swapchain {
            Some(swapchain) => swapchain.acquire_next_image(&self.context, acquire_fence)?,
            None => (0, PresentOutcome::OutOfDate),
        };

        let image_index = match acquired {
            (_, PresentOutcome::OutOfDate) => {
                log::debug!("Swapchain out of date at acquire");
                self.state
                    .transition(FrameState::Acquiring, FrameState::Recreate)?;
                self.recreate_swapchain(window)?;
                return Ok(None);
            }
            (index, outcome) => {
                if outcome == PresentOutcome::Suboptimal {
                    self.recreate_requested = true;
                }
                index
            }
        };

        self.state
            .transition(FrameState::Acquiring, FrameState::Recording)?;

        sync::wait_and_reset_fence(device, acquire_fence)?;
        if self.settings.frames_in_flight == 1 {
            self.context.queue_wait_idle()?;
        }
        unsafe { device.reset_fences(&[submit_fence]) }?;

        let command_buffer = self.command_buffers[slot];
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(command_buffer, &begin_info)?;
        }

        let framebuffer = self
            .target
            .as_ref()
            .and_then(|target| target.framebuffer(image_index))
            .unwrap_or_default();
        self.active_image = Some(image_index);

        Ok(Some(Frame {
            image_index,
            command_buffer,
            framebuffer,
            extent: self.extent(),
            slot,
        }))
    }

    /// Begin the render pass on the frame's framebuffer and set the dynamic
    /// viewport and scissor to the full extent
    pub fn begin_render_pass(&self, frame: &Frame, clear_color: [f32; 4]) {
        let device = self.context.device();
        let clear_values = render_target::clear_values(clear_color);
        let render_area = pipeline::full_scissor(frame.extent);

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass())
            .framebuffer(frame.framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        unsafe {
            device.cmd_begin_render_pass(
                frame.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
            device.cmd_set_viewport(frame.command_buffer, 0, &[pipeline::full_viewport(frame.extent)]);
            device.cmd_set_scissor(frame.command_buffer, 0, &[render_area]);
        }
    }

    pub fn end_render_pass(&self, frame: &Frame) {
        unsafe { self.context.device().cmd_end_render_pass(frame.command_buffer) };
    }

    /// Submit the frame and present it.
    ///
    /// `signal_semaphores` are signalled by the submission next to the
    /// renderer's own semaphore, and present waits on all of them.
    pub fn end_frame(
        &mut self,
        window: &dyn WindowProvider,
        frame: Frame,
        signal_semaphores: &[vk::Semaphore],
    ) -> Result<FrameStatus> {
        self.state
            .transition(FrameState::Recording, FrameState::Submitted)?;
        self.submit_and_present(window, frame, signal_semaphores)
            .map_err(|err| self.abandon_frame(err))
    }

    fn submit_and_present(
        &mut self,
        window: &dyn WindowProvider,
        frame: Frame,
        signal_semaphores: &[vk::Semaphore],
    ) -> Result<FrameStatus> {
        let device = self.context.device();
        let sync = &self.sync[frame.slot];

        let mut signal = Vec::with_capacity(1 + signal_semaphores.len());
        signal.push(sync.render_finished);
        signal.extend_from_slice(signal_semaphores);

        let command_buffers = [frame.command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal)
            .build();

        unsafe {
            device.end_command_buffer(frame.command_buffer)?;
            device.queue_submit(self.context.queue(), &[submit_info], sync.submit_fence)?;
        }

        self.state
            .transition(FrameState::Submitted, FrameState::Presenting)?;

        let outcome = match &self.swapchain {
            Some(swapchain) => swapchain.present(&self.context, frame.image_index, &signal)?,
            None => PresentOutcome::OutOfDate,
        };

        self.active_image = None;
        self.slot = (self.slot + 1) % self.sync.len().max(1);

        if outcome.needs_recreate() || self.recreate_requested {
            log::debug!("Present reported {:?}; recreating swapchain", outcome);
            self.state
                .transition(FrameState::Presenting, FrameState::Recreate)?;
            return self.recreate_swapchain(window);
        }

        self.state
            .transition(FrameState::Presenting, FrameState::Idle)?;
        self.last_status = FrameStatus::Presented;
        Ok(FrameStatus::Presented)
    }

    /// Put the loop back where the next `begin_frame` can make progress
    fn abandon_frame(&mut self, err: RendererError) -> RendererError {
        log::warn!("Frame abandoned while {}: {}", self.state.name(), err);
        self.state = FrameState::after_failure(&err);
        self.active_image = None;
        // A failed acquire or submit leaves the slot's fences unsignaled
        self.recreate_requested = true;
        err
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.context
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn last_status(&self) -> FrameStatus {
        self.last_status
    }

    pub fn frames_in_flight(&self) -> u32 {
        self.settings.frames_in_flight
    }

    /// Swapchain chain exists and frames can be rendered
    pub fn is_ready(&self) -> bool {
        self.swapchain.is_some() && self.target.is_some() && !self.sync.is_empty()
    }

    /// Framebuffer of the image acquired by the frame being recorded
    pub fn active_framebuffer(&self) -> Option<vk::Framebuffer> {
        let image_index = self.active_image?;
        self.target.as_ref()?.framebuffer(image_index)
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.target
            .as_ref()
            .map_or(vk::RenderPass::null(), |target| target.render_pass())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map_or(vk::Extent2D::default(), |swapchain| swapchain.extent)
    }

    pub fn surface_format(&self) -> Option<vk::SurfaceFormatKHR> {
        self.swapchain.as_ref().map(|swapchain| swapchain.format)
    }

    pub fn swapchain_image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, Swapchain::image_count)
    }

    pub fn framebuffer_count(&self) -> usize {
        self.target
            .as_ref()
            .map_or(0, |target| target.framebuffers().len())
    }

    pub fn create_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        size: vk::DeviceSize,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<Buffer> {
        buffer::create_buffer(&self.context, usage, size, memory_flags)
    }

    pub fn upload_to_buffer<T: bytemuck::Pod>(
        &self,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Buffer> {
        buffer::upload_to_buffer(&self.context, usage, data)
    }

    pub fn destroy_buffer(&self, buffer: Buffer) {
        buffer::destroy_buffer(&self.context, buffer);
    }

    pub fn map_buffer<'a>(&self, buffer: &'a mut Buffer) -> Result<&'a mut [u8]> {
        buffer::map_buffer(&self.context, buffer)
    }

    pub fn unmap_buffer(&self, buffer: &mut Buffer) -> Result<()> {
        buffer::unmap_buffer(&self.context, buffer)
    }

    pub fn write_buffer(
        &self,
        buffer: &mut Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> Result<()> {
        buffer::write_buffer(&self.context, buffer, offset, data)
    }

    pub fn create_image_2d(
        &self,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Image> {
        image::create_image_2d(&self.context, format, extent, usage, aspect)
    }

    pub fn destroy_image(&self, image: Image) {
        image::destroy_image(&self.context, image);
    }

    /// Graphics pipeline against the current render pass
    pub fn create_graphics_pipeline(
        &self,
        stages: &[&ShaderModule],
        vertex_layout: &VertexLayout,
        topology: vk::PrimitiveTopology,
        options: &GraphicsPipelineOptions,
    ) -> Result<Pipeline> {
        pipeline::create_graphics_pipeline(
            &self.context,
            stages,
            vertex_layout,
            topology,
            self.render_pass(),
            options,
        )
    }

    pub fn create_compute_pipeline(
        &self,
        stage: &ShaderModule,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_range: Option<vk::PushConstantRange>,
    ) -> Result<Pipeline> {
        pipeline::create_compute_pipeline(
            &self.context,
            stage,
            descriptor_set_layouts,
            push_constant_range,
        )
    }

    pub fn destroy_pipeline(&self, pipeline: Pipeline) {
        pipeline::destroy_pipeline(&self.context, pipeline);
    }

    /// Wait for the device, then release the swapchain chain and the command
    /// pool. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.command_pool == vk::CommandPool::null() {
            return;
        }
        log::info!("Destroying renderer...");

        if let Err(e) = self.context.wait_idle() {
            log::error!("Device wait before teardown failed: {}", e);
        }
        self.teardown_swapchain();

        unsafe {
            let device = self.context.device();
            device.free_command_buffers(self.command_pool, &self.command_buffers);
            device.destroy_command_pool(self.command_pool, None);
        }
        self.context.tracker().destroyed(ObjectKind::CommandPool);
        self.command_buffers.clear();
        self.command_pool = vk::CommandPool::null();
        self.state = FrameState::Idle;
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn is_zero_size(size: (u32, u32)) -> bool {
    size.0 == 0 || size.1 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_runs_dependents_first() {
        use TeardownStage::*;
        assert_eq!(
            SWAPCHAIN_TEARDOWN_ORDER,
            [
                Sync,
                Framebuffers,
                RenderPass,
                DepthResources,
                ImageViews,
                Swapchain,
                Surface
            ]
        );
    }

    #[test]
    fn each_stage_appears_once() {
        for (i, stage) in SWAPCHAIN_TEARDOWN_ORDER.iter().enumerate() {
            assert!(!SWAPCHAIN_TEARDOWN_ORDER[i + 1..].contains(stage));
        }
    }

    #[test]
    fn default_settings_are_single_frame_double_buffered() {
        let settings = RendererSettings::default();
        assert_eq!(settings.frames_in_flight, 1);
        assert_eq!(settings.swapchain_images, 2);
    }

    #[test]
    fn minimized_window_has_no_size() {
        assert!(is_zero_size((0, 0)));
        assert!(is_zero_size((800, 0)));
        assert!(!is_zero_size((1, 1)));
    }
}
