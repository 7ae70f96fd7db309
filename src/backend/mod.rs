// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with explicit ownership and teardown
// order. The device context is created first and dropped last; everything
// else borrows it.

pub mod buffer;
pub mod debug;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod image;
pub mod memory;
pub mod pipeline;
pub mod render_target;
pub mod renderer;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod tracker;

pub use buffer::Buffer;
pub use device::{DeviceContext, DeviceSettings};
pub use error::{ErrorKind, RendererError, Result};
pub use frame::{Frame, FrameState, FrameStatus};
pub use image::Image;
pub use pipeline::{GraphicsPipelineOptions, Pipeline, VertexLayout};
pub use renderer::{Renderer, RendererSettings};
pub use shader::{ShaderLibrary, ShaderModule};
pub use surface::WindowProvider;
