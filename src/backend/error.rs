// Renderer error taxonomy
//
// Every failure the manager reports falls into one of four kinds:
// - FatalInit: startup negotiation failed, the process should exit
// - Recreate: swapchain out of date, handled internally by the frame loop
// - Programmer: call discipline violated (double map, bad frame state, ...)
// - Runtime: a Vulkan call failed for some other reason

use ash::vk;
use thiserror::Error;

/// Broad classification of a [`RendererError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    FatalInit,
    Recreate,
    Programmer,
    Runtime,
}

#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Failed to load Vulkan library: {0}")]
    LoaderUnavailable(String),

    #[error("No suitable GPU found: {0}")]
    DeviceUnavailable(String),

    #[error("Queue family {queue_family} cannot present to the window surface")]
    SurfaceUnsupported { queue_family: u32 },

    #[error("Surface does not report any formats")]
    NoSurfaceFormat,

    #[error("No depth/stencil format supports optimal-tiling attachment use")]
    NoDepthFormat,

    #[error("No memory type matches bits {type_bits:#b} with flags {flags:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("Device context was created without a window and cannot present")]
    NotPresentable,

    #[error("Buffer is already mapped")]
    AlreadyMapped,

    #[error("Buffer is not mapped")]
    NotMapped,

    #[error("Buffer memory is not host visible ({0:?})")]
    NotHostVisible(vk::MemoryPropertyFlags),

    #[error("Access of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfBounds {
        offset: vk::DeviceSize,
        len: vk::DeviceSize,
        size: vk::DeviceSize,
    },

    #[error("Invalid frame state: expected {expected}, found {found}")]
    InvalidFrameState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Descriptor pool was not created for individual set freeing")]
    IndividualFreeNotAllowed,

    #[error("Shader '{name}': {source}")]
    Shader {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

impl RendererError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LoaderUnavailable(_)
            | Self::DeviceUnavailable(_)
            | Self::SurfaceUnsupported { .. }
            | Self::NoSurfaceFormat
            | Self::NoDepthFormat
            | Self::NoSuitableMemoryType { .. } => ErrorKind::FatalInit,
            Self::AlreadyMapped
            | Self::NotMapped
            | Self::NotHostVisible(_)
            | Self::OutOfBounds { .. }
            | Self::InvalidFrameState { .. }
            | Self::IndividualFreeNotAllowed
            | Self::NotPresentable => ErrorKind::Programmer,
            Self::Shader { .. } => ErrorKind::Runtime,
            Self::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR) => ErrorKind::Recreate,
            Self::Vulkan(_) => ErrorKind::Runtime,
        }
    }

    /// Log programmer errors loudly before handing them back; they point at a
    /// call-discipline bug rather than a driver condition.
    pub(crate) fn reported(self) -> Self {
        if self.kind() == ErrorKind::Programmer {
            log::error!("Renderer misuse: {}", self);
        }
        self
    }
}

pub type Result<T> = std::result::Result<T, RendererError>;
