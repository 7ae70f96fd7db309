// Synchronization primitives
//
// Fences and semaphores for GPU-CPU and GPU-GPU sync, plus the pipeline
// barriers the frame loop needs between host, compute and vertex stages.

use ash::vk;

use super::error::Result;
use super::tracker::ObjectKind;
use super::DeviceContext;

/// Per-slot synchronization objects
pub struct FrameSync {
    /// Signalled by image acquisition
    pub acquire_fence: vk::Fence,
    /// Signalled by submission, waited on by present
    pub render_finished: vk::Semaphore,
    /// Signalled when the slot's submission retires; starts signalled
    pub submit_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(context: &DeviceContext) -> Result<Self> {
        let device = context.device();
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let unsignaled = vk::FenceCreateInfo::builder();
        let signaled = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let acquire_fence = unsafe { device.create_fence(&unsignaled, None) }?;

        let render_finished = match unsafe { device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.destroy_fence(acquire_fence, None) };
                return Err(e.into());
            }
        };

        let submit_fence = match unsafe { device.create_fence(&signaled, None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe {
                    device.destroy_semaphore(render_finished, None);
                    device.destroy_fence(acquire_fence, None);
                }
                return Err(e.into());
            }
        };

        context.tracker().created_n(ObjectKind::Fence, 2);
        context.tracker().created(ObjectKind::Semaphore);

        Ok(Self {
            acquire_fence,
            render_finished,
            submit_fence,
        })
    }

    pub fn destroy(&self, context: &DeviceContext) {
        let device = context.device();
        unsafe {
            device.destroy_fence(self.acquire_fence, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.submit_fence, None);
        }
        context.tracker().destroyed_n(ObjectKind::Fence, 2);
        context.tracker().destroyed(ObjectKind::Semaphore);
    }
}

pub fn create_semaphore(context: &DeviceContext) -> Result<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    let semaphore = unsafe { context.device().create_semaphore(&semaphore_info, None) }?;
    context.tracker().created(ObjectKind::Semaphore);
    Ok(semaphore)
}

pub fn destroy_semaphore(context: &DeviceContext, semaphore: vk::Semaphore) {
    unsafe { context.device().destroy_semaphore(semaphore, None) };
    context.tracker().destroyed(ObjectKind::Semaphore);
}

pub fn wait_and_reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    unsafe {
        device.wait_for_fences(&[fence], true, u64::MAX)?;
        device.reset_fences(&[fence])?;
    }
    Ok(())
}

/// Make host writes visible to `dst_access` at `dst_stage`, e.g. a uniform
/// buffer written through a mapping and read by the vertex shader
pub fn host_write_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    dst_access: vk::AccessFlags,
    dst_stage: vk::PipelineStageFlags,
) {
    memory_barrier(
        device,
        cmd,
        vk::AccessFlags::HOST_WRITE,
        vk::PipelineStageFlags::HOST,
        dst_access,
        dst_stage,
    );
}

/// Compute shader storage writes consumed as vertex attributes
pub fn compute_to_vertex_barrier(device: &ash::Device, cmd: vk::CommandBuffer) {
    memory_barrier(
        device,
        cmd,
        vk::AccessFlags::SHADER_WRITE,
        vk::PipelineStageFlags::COMPUTE_SHADER,
        vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        vk::PipelineStageFlags::VERTEX_INPUT,
    );
}

pub fn memory_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src_access: vk::AccessFlags,
    src_stage: vk::PipelineStageFlags,
    dst_access: vk::AccessFlags,
    dst_stage: vk::PipelineStageFlags,
) {
    let barrier = vk::MemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[barrier],
            &[],
            &[],
        );
    }
}
