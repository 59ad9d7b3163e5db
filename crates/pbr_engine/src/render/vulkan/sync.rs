//! Semaphores and fences
//!
//! Semaphores order GPU work (image acquired, pass rendered, image presented);
//! the single in-flight fence keeps the CPU at most one frame ahead so uniform
//! blocks can be rewritten in place.

use ash::{vk, Device};

use crate::render::vulkan::{VulkanError, VulkanResult};

/// GPU-side ordering between submissions
pub struct Semaphore {
    device: Device,
    raw: vk::Semaphore,
}

impl Semaphore {
    /// Unsignaled binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let raw = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .map_err(VulkanError::Api)?;
        Ok(Self { device, raw })
    }

    /// Raw handle, valid while `self` lives
    pub fn handle(&self) -> vk::Semaphore {
        self.raw
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.raw, None) };
    }
}

/// Host-visible completion signal for one submission
pub struct Fence {
    device: Device,
    raw: vk::Fence,
}

impl Fence {
    /// Fence starting unsignaled, or signaled so the first wait returns at once
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let mut flags = vk::FenceCreateFlags::empty();
        if signaled {
            flags |= vk::FenceCreateFlags::SIGNALED;
        }
        let info = vk::FenceCreateInfo::builder().flags(flags);
        let raw = unsafe { device.create_fence(&info, None) }.map_err(VulkanError::Api)?;
        Ok(Self { device, raw })
    }

    /// Block the calling thread until the GPU signals
    pub fn wait(&self) -> VulkanResult<()> {
        unsafe { self.device.wait_for_fences(&[self.raw], true, u64::MAX) }.map_err(VulkanError::Api)
    }

    /// Back to unsignaled; only call once the next submission is certain
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[self.raw]) }.map_err(VulkanError::Api)
    }

    /// Raw handle, valid while `self` lives
    pub fn handle(&self) -> vk::Fence {
        self.raw
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.destroy_fence(self.raw, None) };
    }
}

/// What the frame driver waits on between frames
///
/// Render passes own their render-complete semaphores (one per swapchain
/// image), so only the acquire semaphore and the in-flight fence live here.
pub struct FrameSync {
    /// Signaled once the acquired swapchain image may be written
    pub image_available: Semaphore,
    /// Signaled when the last frame's submission retires
    pub in_flight: Fence,
}

impl FrameSync {
    /// Acquire semaphore plus a pre-signaled fence
    pub fn new(device: Device) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device, true)?,
        })
    }
}
