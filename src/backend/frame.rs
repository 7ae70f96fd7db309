// Frame loop state
//
// Idle -> Acquiring -> Recording -> Submitted -> Presenting -> Idle
//
// Acquire and present may instead land in Recreate when the swapchain no
// longer matches the surface; recreation brings the loop back to Idle.

use ash::vk;

use super::error::{RendererError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
    Recreate,
}

impl FrameState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Acquiring => "Acquiring",
            Self::Recording => "Recording",
            Self::Submitted => "Submitted",
            Self::Presenting => "Presenting",
            Self::Recreate => "Recreate",
        }
    }

    /// Move from `from` to `to`, or report misuse when the loop is elsewhere
    pub fn transition(&mut self, from: FrameState, to: FrameState) -> Result<()> {
        if *self != from {
            return Err(RendererError::InvalidFrameState {
                expected: from.name(),
                found: self.name(),
            }
            .reported());
        }
        *self = to;
        Ok(())
    }

    /// Where the loop lands after a frame fails partway. Surface-class
    /// failures go through recreation; anything else starts over from Idle.
    pub fn after_failure(err: &RendererError) -> FrameState {
        match err {
            RendererError::Vulkan(
                vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR,
            ) => Self::Recreate,
            _ => Self::Idle,
        }
    }
}

/// A frame being recorded. Handed out by `begin_frame`, consumed by `end_frame`.
#[derive(Debug)]
pub struct Frame {
    pub image_index: u32,
    pub command_buffer: vk::CommandBuffer,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub(crate) slot: usize,
}

impl Frame {
    /// Sync slot in `0..frames_in_flight`; per-frame host data indexes by it
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// Outcome of a frame or recreation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// The swapchain was rebuilt; nothing was presented
    Recreated,
    /// Window is minimized; the swapchain is torn down until it has a size
    Skipped,
}
