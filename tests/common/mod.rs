// Shared setup for tests that need a real device

use std::sync::Arc;
use vk_renderer::backend::{DeviceContext, DeviceSettings};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowAttributes};

pub fn settings() -> DeviceSettings {
    DeviceSettings {
        app_name: "vk-renderer-tests".to_string(),
        enable_validation: true,
        ..Default::default()
    }
}

pub fn headless_context() -> Arc<DeviceContext> {
    DeviceContext::new(&settings(), None).expect("headless device context")
}

/// Test harness threads are not the main thread, so opt out of that check
#[allow(dead_code)]
pub fn event_loop() -> EventLoop<()> {
    let mut builder = EventLoop::builder();
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        winit::platform::x11::EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
    }
    #[cfg(target_os = "windows")]
    {
        winit::platform::windows::EventLoopBuilderExtWindows::with_any_thread(&mut builder, true);
    }
    builder.build().expect("event loop")
}

#[allow(dead_code, deprecated)]
pub fn window(event_loop: &EventLoop<()>, width: u32, height: u32) -> Window {
    event_loop
        .create_window(
            WindowAttributes::default()
                .with_title("vk-renderer test")
                .with_inner_size(winit::dpi::PhysicalSize::new(width, height)),
        )
        .expect("test window")
}
