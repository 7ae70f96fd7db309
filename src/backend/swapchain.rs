// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Owns no memory: images belong to the presentation engine, views to us.

use ash::vk;

use super::error::Result;
use super::image;
use super::surface::{self, SurfaceSupport};
use super::tracker::ObjectKind;
use super::DeviceContext;

/// Result of an acquire or present call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Ok,
    /// Still usable but no longer matches the surface
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_recreate(self) -> bool {
        self != Self::Ok
    }
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    pub fn new(
        context: &DeviceContext,
        surface: vk::SurfaceKHR,
        support: &SurfaceSupport,
        window_size: (u32, u32),
        requested_images: u32,
    ) -> Result<Self> {
        let caps = &support.capabilities;
        let format = surface::choose_surface_format(&support.formats)?;
        let present_mode = surface::choose_present_mode(&support.present_modes);
        let extent = surface::choose_extent(caps, window_size);
        let image_count = surface::clamp_image_count(requested_images, caps);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            format.format,
            present_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let loader = &context.extensions().swapchain;
        let handle = unsafe { loader.create_swapchain(&create_info, None) }?;
        context.tracker().created(ObjectKind::Swapchain);

        let mut swapchain = Self {
            handle,
            images: Vec::new(),
            image_views: Vec::new(),
            format,
            present_mode,
            extent,
        };

        if let Err(e) = swapchain.create_views(context) {
            swapchain.destroy_views(context);
            swapchain.destroy_handle(context);
            return Err(e);
        }

        log::info!("Created swapchain with {} images", swapchain.images.len());
        Ok(swapchain)
    }

    fn create_views(&mut self, context: &DeviceContext) -> Result<()> {
        self.images = unsafe { context.extensions().swapchain.get_swapchain_images(self.handle) }?;
        for &image in &self.images {
            let view = image::create_image_view(
                context,
                image,
                self.format.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            self.image_views.push(view);
        }
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image, signalling `fence` once it is ready
    pub fn acquire_next_image(
        &self,
        context: &DeviceContext,
        fence: vk::Fence,
    ) -> Result<(u32, PresentOutcome)> {
        let result = unsafe {
            context.extensions().swapchain.acquire_next_image(
                self.handle,
                u64::MAX,
                vk::Semaphore::null(),
                fence,
            )
        };

        match result {
            Ok((index, false)) => Ok((index, PresentOutcome::Ok)),
            Ok((index, true)) => Ok((index, PresentOutcome::Suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok((0, PresentOutcome::OutOfDate)),
            Err(e) => Err(e.into()),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        context: &DeviceContext,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            context
                .extensions()
                .swapchain
                .queue_present(context.queue(), &present_info)
        };

        match result {
            Ok(false) => Ok(PresentOutcome::Ok),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    pub fn destroy_views(&mut self, context: &DeviceContext) {
        for view in self.image_views.drain(..) {
            image::destroy_image_view(context, view);
        }
    }

    pub fn destroy_handle(&mut self, context: &DeviceContext) {
        if self.handle != vk::SwapchainKHR::null() {
            unsafe {
                context
                    .extensions()
                    .swapchain
                    .destroy_swapchain(self.handle, None)
            };
            context.tracker().destroyed(ObjectKind::Swapchain);
            self.handle = vk::SwapchainKHR::null();
            self.images.clear();
        }
    }
}
