//! Vulkan device, swapchain and per-frame resource lifecycle management.

pub mod backend;
pub mod config;
