// Vulkan Device Context - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Physical device selection (first device with a graphics+present family)
// - Logical device + single queue creation
// - Extension function table, resolved once
// - Live handle accounting shared by every other backend module

use ash::extensions::khr;
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use super::debug::{self, DebugMessenger, DebugState};
use super::error::{RendererError, Result};
use super::surface::{self, WindowProvider};
use super::tracker::ResourceTracker;

/// Startup parameters for [`DeviceContext::new`]
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub app_name: String,
    pub enable_validation: bool,
    /// Extra instance extensions on top of the window system's surface ones
    pub instance_extensions: Vec<&'static CStr>,
    /// Extra device extensions on top of VK_KHR_swapchain
    pub device_extensions: Vec<&'static CStr>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            app_name: "vk-renderer".to_string(),
            enable_validation: cfg!(debug_assertions),
            instance_extensions: Vec::new(),
            device_extensions: Vec::new(),
        }
    }
}

/// Extension entry points resolved once at context creation
pub struct ExtensionTable {
    pub surface: khr::Surface,
    pub swapchain: khr::Swapchain,
}

/// Device, queue and everything needed to talk to them.
///
/// Immutable once created; every other backend object borrows it and must be
/// destroyed before it.
pub struct DeviceContext {
    entry: Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    // Boxed so the pointer handed to the validation callback stays put
    debug_state: Box<DebugState>,

    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,

    device: ash::Device,
    queue: vk::Queue,
    queue_family_index: u32,

    extensions: ExtensionTable,
    presentable: bool,
    tracker: ResourceTracker,
}

impl DeviceContext {
    /// Create the device context.
    ///
    /// With a window, the selected queue family must be able to present to
    /// it. Without one (headless), the first graphics family is used and no
    /// swapchain extension is enabled.
    pub fn new(
        settings: &DeviceSettings,
        window: Option<&dyn WindowProvider>,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device context: {}", settings.app_name);

        let entry = unsafe { Entry::load() }
            .map_err(|e| RendererError::LoaderUnavailable(e.to_string()))?;

        let debug_state = Box::new(DebugState::new());
        let enable_validation =
            settings.enable_validation && Self::validation_layer_available(&entry)?;

        let instance = Self::create_instance(
            &entry,
            settings,
            window,
            enable_validation,
            &debug_state,
        )?;

        let debug = if enable_validation {
            match DebugMessenger::new(&entry, &instance, &debug_state) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let surface_loader = khr::Surface::new(&entry, &instance);

        let picked = Self::pick_physical_device(&entry, &instance, &surface_loader, window);
        let (physical_device, queue_family_index) = match picked {
            Ok(picked) => picked,
            Err(e) => {
                if let Some(debug) = &debug {
                    debug.destroy();
                }
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!("Device type: {}", device_type_name(properties.device_type));
        log::info!("API Version: {}", api_version_string(properties.api_version));
        log::info!("Queue family: {}", queue_family_index);

        let device = match Self::create_logical_device(
            &instance,
            physical_device,
            queue_family_index,
            settings,
            window.is_some(),
        ) {
            Ok(device) => device,
            Err(e) => {
                if let Some(debug) = &debug {
                    debug.destroy();
                }
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let extensions = ExtensionTable {
            surface: surface_loader,
            swapchain: khr::Swapchain::new(&instance, &device),
        };

        Ok(Arc::new(Self {
            entry,
            instance,
            debug,
            debug_state,
            physical_device,
            properties,
            memory_properties,
            device,
            queue,
            queue_family_index,
            extensions,
            presentable: window.is_some(),
            tracker: ResourceTracker::new(),
        }))
    }

    fn validation_layer_available(entry: &Entry) -> Result<bool> {
        let layers = entry.enumerate_instance_layer_properties()?;
        let mut found = false;
        for layer in &layers {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            log::debug!("Instance layer: {}", name.to_string_lossy());
            found |= name == debug::VALIDATION_LAYER;
        }
        if !found {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        Ok(found)
    }

    fn create_instance(
        entry: &Entry,
        settings: &DeviceSettings,
        window: Option<&dyn WindowProvider>,
        enable_validation: bool,
        debug_state: &DebugState,
    ) -> Result<ash::Instance> {
        let app_name = CString::new(settings.app_name.as_str())
            .unwrap_or_else(|_| CString::from(c"vk-renderer"));
        let engine_name = c"vk-renderer";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extensions: Vec<*const c_char> = Vec::new();
        if let Some(window) = window {
            let surface_exts = ash_window::enumerate_required_extensions(window.raw_display_handle())?;
            extensions.extend_from_slice(surface_exts);
        }
        extensions.extend(settings.instance_extensions.iter().map(|e| e.as_ptr()));
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![debug::VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        // Chained so instance creation and destruction are validated too
        let mut instance_debug_info = debug::messenger_create_info(debug_state);

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);
        if enable_validation {
            create_info = create_info.push_next(&mut instance_debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }?;
        Ok(instance)
    }

    fn pick_physical_device(
        entry: &Entry,
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        window: Option<&dyn WindowProvider>,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;
        if devices.is_empty() {
            return Err(RendererError::DeviceUnavailable(
                "no Vulkan-capable GPU found".to_string(),
            ));
        }

        // Presentation support is a property of (device, family, window), so
        // check through a throwaway surface for the target window.
        let present_check = match window {
            Some(window) => Some(surface::create_surface(entry, instance, window)?),
            None => None,
        };

        let mut picked = None;
        for &physical_device in &devices {
            let families = unsafe {
                instance.get_physical_device_queue_family_properties(physical_device)
            };
            let family = select_queue_family(&families, |index| match present_check {
                Some(surface) => unsafe {
                    surface_loader
                        .get_physical_device_surface_support(physical_device, index, surface)
                        .unwrap_or(false)
                },
                None => true,
            });
            if let Some(family) = family {
                picked = Some((physical_device, family));
                break;
            }
        }

        if let Some(surface) = present_check {
            unsafe { surface_loader.destroy_surface(surface, None) };
        }

        picked.ok_or_else(|| {
            RendererError::DeviceUnavailable(format!(
                "none of {} devices has a queue family with graphics and present support",
                devices.len()
            ))
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        settings: &DeviceSettings,
        presentable: bool,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)
            .build();

        let mut extensions: Vec<*const c_char> = Vec::new();
        if presentable {
            extensions.push(khr::Swapchain::name().as_ptr());
        }
        extensions.extend(settings.device_extensions.iter().map(|e| e.as_ptr()));

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }?;
        Ok(device)
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    pub fn extensions(&self) -> &ExtensionTable {
        &self.extensions
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    /// Created with a window, so the swapchain extension is enabled
    pub fn is_presentable(&self) -> bool {
        self.presentable
    }

    /// Validation errors reported since creation (always 0 without validation)
    pub fn validation_error_count(&self) -> u32 {
        self.debug_state.error_count()
    }

    /// Wait for the device to be idle (e.g., before teardown)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    pub fn queue_wait_idle(&self) -> Result<()> {
        unsafe { self.device.queue_wait_idle(self.queue) }?;
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device context...");

        let _ = self.wait_idle();

        let live = self.tracker.snapshot();
        if live.total() > 0 {
            log::warn!("{} Vulkan objects still live at device destruction", live.total());
            self.tracker.report_leaks(&Default::default());
        }

        unsafe {
            self.device.destroy_device(None);
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// First family with graphics support that can also present
pub fn select_queue_family(
    families: &[vk::QueueFamilyProperties],
    mut can_present: impl FnMut(u32) -> bool,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .filter(|(_, family)| {
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|(index, _)| index as u32)
        .find(|&index| can_present(index))
}

pub fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::OTHER => "Other",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Type not implemented",
    }
}

pub fn api_version_string(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn skips_graphics_family_that_cannot_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 16),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let picked = select_queue_family(&families, |index| index == 1);
        assert_eq!(picked, Some(1));
    }

    #[test]
    fn present_only_family_is_not_enough() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::COMPUTE, 2),
        ];
        assert_eq!(select_queue_family(&families, |_| true), None);
    }

    #[test]
    fn picks_lowest_qualifying_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        assert_eq!(select_queue_family(&families, |_| true), Some(1));
    }

    #[test]
    fn readable_device_info() {
        assert_eq!(
            device_type_name(vk::PhysicalDeviceType::DISCRETE_GPU),
            "Discrete GPU"
        );
        assert_eq!(
            api_version_string(vk::make_api_version(0, 1, 3, 250)),
            "1.3.250"
        );
    }
}
