// Validation layer messenger
//
// The callback gets a pointer to a DebugState owned by the DeviceContext
// through p_user_data, so there is no process-wide callback state.

use ash::extensions::ext::DebugUtils;
use ash::vk;
use parking_lot::Mutex;
use std::ffi::{c_void, CStr};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Debug, Default, Clone)]
pub struct DebugCounters {
    pub errors: u32,
    pub warnings: u32,
    pub last_error: Option<String>,
}

/// Per-context sink for validation messages
#[derive(Debug, Default)]
pub struct DebugState {
    counters: Mutex<DebugCounters>,
}

impl DebugState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_count(&self) -> u32 {
        self.counters.lock().errors
    }

    pub fn counters(&self) -> DebugCounters {
        self.counters.lock().clone()
    }

    fn record(&self, severity: vk::DebugUtilsMessageSeverityFlagsEXT, message: &str) {
        match severity {
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
                log::error!("[Vulkan] {}", message);
                let mut counters = self.counters.lock();
                counters.errors += 1;
                counters.last_error = Some(message.to_owned());
            }
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
                log::warn!("[Vulkan] {}", message);
                self.counters.lock().warnings += 1;
            }
            vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
                log::info!("[Vulkan] {}", message);
            }
            _ => {
                log::debug!("[Vulkan] {}", message);
            }
        }
    }
}

/// Messenger settings. `state` must outlive the messenger it is passed to.
pub fn messenger_create_info(state: &DebugState) -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .user_data(state as *const DebugState as *mut c_void)
        .build()
}

pub struct DebugMessenger {
    pub loader: DebugUtils,
    pub messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        state: &DebugState,
    ) -> Result<Self, vk::Result> {
        let loader = DebugUtils::new(entry, instance);
        let create_info = messenger_create_info(state);
        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }?;
        Ok(Self { loader, messenger })
    }

    pub fn destroy(&self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match (p_user_data as *const DebugState).as_ref() {
        Some(state) => state.record(message_severity, &message),
        None => log::warn!("[Vulkan] {}", message),
    }

    // Let the call continue to the next layer
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_errors_and_warnings_separately() {
        let state = DebugState::new();
        state.record(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING, "slow path");
        state.record(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR, "bad handle");
        state.record(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE, "noise");

        let counters = state.counters();
        assert_eq!(counters.errors, 1);
        assert_eq!(counters.warnings, 1);
        assert_eq!(counters.last_error.as_deref(), Some("bad handle"));
    }

    #[test]
    fn callback_routes_to_user_data() {
        let state = DebugState::new();
        let text = c"VUID-test";
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: text.as_ptr(),
            ..Default::default()
        };
        let ret = unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                &state as *const DebugState as *mut c_void,
            )
        };
        assert_eq!(ret, vk::FALSE);
        assert_eq!(state.error_count(), 1);
    }
}
