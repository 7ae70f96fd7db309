// Window surface binding and swapchain negotiation rules
//
// The negotiation helpers are pure functions over what the driver reports, so
// the selection rules can be checked without a GPU.

use ash::vk;
use raw_window_handle::{
    HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle,
};

use super::error::{RendererError, Result};
use super::tracker::ObjectKind;
use super::DeviceContext;

/// What the manager needs from the platform window
pub trait WindowProvider {
    fn raw_display_handle(&self) -> RawDisplayHandle;
    fn raw_window_handle(&self) -> RawWindowHandle;
    /// Current client area in physical pixels
    fn framebuffer_size(&self) -> (u32, u32);
}

impl WindowProvider for winit::window::Window {
    fn raw_display_handle(&self) -> RawDisplayHandle {
        HasRawDisplayHandle::raw_display_handle(self)
    }

    fn raw_window_handle(&self) -> RawWindowHandle {
        HasRawWindowHandle::raw_window_handle(self)
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }
}

/// Create a platform surface for `window`. The caller owns the handle.
pub fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &dyn WindowProvider,
) -> Result<vk::SurfaceKHR> {
    let surface = unsafe {
        ash_window::create_surface(
            entry,
            instance,
            window.raw_display_handle(),
            window.raw_window_handle(),
            None,
        )
    }?;
    Ok(surface)
}

/// A window surface bound to a device context
pub struct Surface {
    pub handle: vk::SurfaceKHR,
}

impl Surface {
    /// Create the surface and check the context's queue family can present to it
    pub fn bind(context: &DeviceContext, window: &dyn WindowProvider) -> Result<Self> {
        let handle = create_surface(context.entry(), context.instance(), window)?;
        context.tracker().created(ObjectKind::Surface);
        let surface = Self { handle };

        let supported = unsafe {
            context.extensions().surface.get_physical_device_surface_support(
                context.physical_device(),
                context.queue_family_index(),
                handle,
            )
        };
        match supported {
            Ok(true) => Ok(surface),
            Ok(false) => {
                surface.destroy(context);
                Err(RendererError::SurfaceUnsupported {
                    queue_family: context.queue_family_index(),
                })
            }
            Err(e) => {
                surface.destroy(context);
                Err(e.into())
            }
        }
    }

    pub fn query(&self, context: &DeviceContext) -> Result<SurfaceSupport> {
        let loader = &context.extensions().surface;
        let physical_device = context.physical_device();
        unsafe {
            Ok(SurfaceSupport {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, self.handle)?,
                formats: loader.get_physical_device_surface_formats(physical_device, self.handle)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, self.handle)?,
            })
        }
    }

    pub fn destroy(self, context: &DeviceContext) {
        unsafe {
            context.extensions().surface.destroy_surface(self.handle, None);
        }
        context.tracker().destroyed(ObjectKind::Surface);
    }
}

/// Everything the driver reports about a surface
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// MAILBOX when offered, otherwise FIFO (always available)
pub fn choose_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The driver's first format, or BGRA8 UNORM / sRGB-nonlinear when it has no
/// preference
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    let first = formats.first().ok_or(RendererError::NoSurfaceFormat)?;
    if first.format == vk::Format::UNDEFINED {
        Ok(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        })
    } else {
        Ok(*first)
    }
}

/// `currentExtent` unless it is the u32::MAX sentinel, in which case the
/// window size clamped into the surface's supported range
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_size: (u32, u32),
) -> vk::Extent2D {
    let current = capabilities.current_extent;
    if current.width != u32::MAX && current.height != u32::MAX {
        return current;
    }
    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: window_size.0.clamp(min.width, max.width.max(min.width)),
        height: window_size.1.clamp(min.height, max.height.max(min.height)),
    }
}

/// Clamp a requested image count into `[min, max]`; `max == 0` means unbounded
pub fn clamp_image_count(requested: u32, capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = requested.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count = count.min(capabilities.max_image_count);
    }
    count
}
