//! Vulkan backend
//!
//! Device bootstrap, RAII wrappers around raw handles and the builders the
//! render passes are assembled from.

pub mod allocator;
pub mod buffer;
pub mod context;
pub mod descriptor;
pub mod framebuffer;
pub mod image;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod window;

pub use buffer::{Buffer, HostMemory};
pub use context::{clamp_sample_count, LogicalDevice, PhysicalDeviceInfo, VulkanContext, VulkanError, VulkanInstance, VulkanResult};
pub use descriptor::{binding_kinds, check_shape, BindingKind, BindingList, DescriptorPool, DescriptorSetLayout};
pub use framebuffer::Framebuffer;
pub use image::{Image, ImageDescription, ImageView, Sampler};
pub use shader::{BlendMode, Pipeline, PipelineDescription, ShaderModule, ShaderPair};
pub use swapchain::{Swapchain, SwapchainStatus};
pub use sync::{Fence, FrameSync, Semaphore};
pub use window::{Window, WindowError, WindowResult};
