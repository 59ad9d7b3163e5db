//! Framebuffers

use ash::{vk, Device};

use crate::render::vulkan::{VulkanError, VulkanResult};

/// One set of attachment views bound to a render pass, destroyed on drop
pub struct Framebuffer {
    device: Device,
    raw: vk::Framebuffer,
}

impl Framebuffer {
    /// Single-layer framebuffer; `views` must follow the render pass attachment order
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let raw = unsafe { device.create_framebuffer(&info, None) }.map_err(VulkanError::Api)?;
        log::trace!(
            "[PASS] Framebuffer {}x{} over {} attachments",
            extent.width,
            extent.height,
            views.len()
        );
        Ok(Self { device, raw })
    }

    /// Raw handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.raw
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_framebuffer(self.raw, None) };
    }
}
