//! Vulkan context management
//!
//! The device context is the one value every GPU component borrows: instance,
//! surface, physical and logical device, graphics/present queues and the
//! command pool used for one-time and per-pass command buffers. It is created
//! once, passed by reference, and destroyed last.

#[cfg(debug_assertions)]
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;
use ash::{Device, Entry, Instance};
use std::ffi::{CStr, CString};
use thiserror::Error;

use crate::assets::AssetError;
use crate::core::config::RendererConfig;
use crate::render::vulkan::window::Window;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Resource with specified ID could not be found
    #[error("Resource not found: {id}")]
    ResourceNotFound {
        /// The identifier that was looked up
        id: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// The device cannot use a format the way it was requested
    #[error("Unsupported format {format:?}: {reason}")]
    UnsupportedFormat {
        /// Offending format
        format: vk::Format,
        /// Missing capability
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// An asset needed by a GPU resource failed to load
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// Font loading or glyph rasterization failed
    #[error("Font error: {0}")]
    Font(String),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Debug utilities extension (debug builds)
    #[cfg(debug_assertions)]
    pub debug_utils: Option<DebugUtils>,
    /// Debug messenger handle (debug builds)
    #[cfg(debug_assertions)]
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance, with validation layers when requested in debug builds
    pub fn new(window: &Window, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e)))?;

        let app_name_cstr = c_string(app_name)?;
        let engine_name_cstr = c_string("pbr_engine")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let required_extensions = window
            .get_required_instance_extensions()
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to get required extensions: {}", e)))?;
        let cstr_extensions = required_extensions
            .iter()
            .map(|ext| c_string(ext))
            .collect::<VulkanResult<Vec<_>>>()?;

        #[allow(unused_mut)] // Mutable in debug builds for adding debug extensions
        let mut extensions: Vec<*const std::os::raw::c_char> = cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();

        let validation = cfg!(debug_assertions) && enable_validation;

        #[cfg(debug_assertions)]
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if validation {
            vec![c_string("VK_LAYER_KHRONOS_validation")?]
        } else {
            vec![]
        };
        let layer_names_ptrs: Vec<*const std::os::raw::c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };

        #[cfg(debug_assertions)]
        let (debug_utils, debug_messenger) = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let debug_messenger = Self::setup_debug_messenger(&debug_utils)?;
            (Some(debug_utils), Some(debug_messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            #[cfg(debug_assertions)]
            debug_utils,
            #[cfg(debug_assertions)]
            debug_messenger,
        })
    }

    #[cfg(debug_assertions)]
    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            #[cfg(debug_assertions)]
            if let (Some(debug_utils), Some(debug_messenger)) = (&self.debug_utils, &self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(*debug_messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

fn c_string(text: &str) -> VulkanResult<CString> {
    CString::new(text).map_err(|e| VulkanError::InitializationFailed(format!("Invalid name {:?}: {}", text, e)))
}

/// Debug callback for validation layers
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *callback_data;
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[VULKAN] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[VULKAN] {:?} - {}", message_type, message);
    } else {
        log::debug!("[VULKAN] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick a device with graphics, presentation and swapchain support, discrete GPUs first
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }.map_err(VulkanError::Api)?;

        let chosen = devices
            .into_iter()
            .filter_map(|device| match Self::evaluate_device(instance, device, surface, surface_loader) {
                Ok(info) => Some(info),
                Err(e) => {
                    log::debug!("[VULKAN] Skipping device: {}", e);
                    None
                }
            })
            .min_by_key(|info| device_rank(info.properties.device_type))
            .ok_or_else(|| VulkanError::InitializationFailed("no suitable GPU".to_string()))?;

        let name = unsafe { CStr::from_ptr(chosen.properties.device_name.as_ptr()) };
        log::info!("[VULKAN] Selected GPU: {}", name.to_string_lossy());
        Ok(chosen)
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let support = queue_families
            .iter()
            .enumerate()
            .map(|(index, family)| -> VulkanResult<(vk::QueueFlags, bool)> {
                let present = unsafe {
                    surface_loader.get_physical_device_surface_support(device, index as u32, surface)
                }
                .map_err(VulkanError::Api)?;
                Ok((family.queue_flags, present))
            })
            .collect::<VulkanResult<Vec<_>>>()?;
        let (graphics_family, present_family) = pick_queue_families(&support).ok_or_else(|| {
            VulkanError::InitializationFailed("no graphics and present queue families".to_string())
        })?;

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let has_swapchain = extensions.iter().any(|available| {
            let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Err(VulkanError::InitializationFailed("VK_KHR_swapchain missing".to_string()));
        }
        if features.sampler_anisotropy == vk::FALSE {
            return Err(VulkanError::InitializationFailed("no sampler anisotropy".to_string()));
        }

        Ok(Self {
            device,
            properties,
            features,
            graphics_family,
            present_family,
        })
    }
}

/// Lower is preferred
fn device_rank(device_type: vk::PhysicalDeviceType) -> u8 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        _ => 3,
    }
}

/// Graphics and present family indices, preferring one family that does both
///
/// `families` holds each family's queue flags and whether it can present to
/// the surface.
pub fn pick_queue_families(families: &[(vk::QueueFlags, bool)]) -> Option<(u32, u32)> {
    let graphics = |flags: &vk::QueueFlags| flags.contains(vk::QueueFlags::GRAPHICS);
    if let Some(both) = families.iter().position(|(flags, present)| graphics(flags) && *present) {
        return Some((both as u32, both as u32));
    }
    let graphics_family = families.iter().position(|(flags, _)| graphics(flags))?;
    let present_family = families.iter().position(|(_, present)| *present)?;
    Some((graphics_family as u32, present_family as u32))
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
}

impl LogicalDevice {
    /// Create a new logical device with required queues
    pub fn new(instance: &Instance, physical_device_info: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let mut families = vec![physical_device_info.graphics_family, physical_device_info.present_family];
        families.dedup();

        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true)
            .sample_rate_shading(physical_device_info.features.sample_rate_shading == vk::TRUE)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .create_device(physical_device_info.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(physical_device_info.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical_device_info.present_family, 0) };

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Power-of-two sample count no higher than `requested` or `max`
pub fn clamp_sample_count(requested: u32, max: vk::SampleCountFlags) -> vk::SampleCountFlags {
    let count = requested.clamp(1, max.as_raw().max(1));
    vk::SampleCountFlags::from_raw(1 << (u32::BITS - 1 - count.leading_zeros()))
}

/// Main Vulkan context that owns all core Vulkan resources
///
/// Field order is destruction order: the command pool and surface are
/// released in `Drop`, then the logical device, then the instance.
pub struct VulkanContext {
    command_pool: vk::CommandPool,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    swapchain_loader: SwapchainLoader,
    physical_device: PhysicalDeviceInfo,
    device: LogicalDevice,
    instance: VulkanInstance,
}

impl VulkanContext {
    /// Create a new Vulkan context for the window
    pub fn new(window: &mut Window, config: &RendererConfig) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, &config.application_name, config.validation)?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window
            .create_vulkan_surface(instance.instance.handle())
            .map_err(|e| VulkanError::InitializationFailed(format!("Surface creation: {}", e)))?;

        let physical_device = PhysicalDeviceInfo::select_suitable_device(&instance.instance, surface, &surface_loader)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device)?;
        let swapchain_loader = SwapchainLoader::new(&instance.instance, &device.device);

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(physical_device.graphics_family);
        let command_pool = unsafe {
            device
                .device
                .create_command_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        log::info!(
            "[VULKAN] Context ready (graphics family {}, present family {})",
            physical_device.graphics_family,
            physical_device.present_family
        );

        Ok(Self {
            command_pool,
            surface,
            surface_loader,
            swapchain_loader,
            physical_device,
            device,
            instance,
        })
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the logical device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Get the physical device info
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Get the surface handle
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get the surface loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// Get the swapchain loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Command pool shared by one-time and render-pass command buffers
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Block until the graphics queue has drained
    pub fn queue_wait_idle(&self) -> VulkanResult<()> {
        unsafe {
            self.device()
                .queue_wait_idle(self.graphics_queue())
                .map_err(VulkanError::Api)
        }
    }

    /// Block until the whole device is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device().device_wait_idle().map_err(VulkanError::Api) }
    }

    /// Highest sample count usable for both colour and depth attachments
    pub fn max_usable_sample_count(&self) -> vk::SampleCountFlags {
        let limits = &self.physical_device.properties.limits;
        let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
        [
            vk::SampleCountFlags::TYPE_64,
            vk::SampleCountFlags::TYPE_32,
            vk::SampleCountFlags::TYPE_16,
            vk::SampleCountFlags::TYPE_8,
            vk::SampleCountFlags::TYPE_4,
            vk::SampleCountFlags::TYPE_2,
        ]
        .into_iter()
        .find(|&count| counts.contains(count))
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
    }

    /// `requested` samples, lowered to what the device supports
    pub fn sample_count(&self, requested: u32) -> vk::SampleCountFlags {
        clamp_sample_count(requested, self.max_usable_sample_count())
    }

    /// Format properties of `format` on the selected device
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance()
                .get_physical_device_format_properties(self.physical_device.device, format)
        }
    }

    /// First of `candidates` supporting `features` with optimal tiling
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        features: vk::FormatFeatureFlags,
    ) -> VulkanResult<vk::Format> {
        candidates
            .iter()
            .copied()
            .find(|&format| self.format_properties(format).optimal_tiling_features.contains(features))
            .ok_or_else(|| VulkanError::UnsupportedFormat {
                format: candidates.first().copied().unwrap_or(vk::Format::UNDEFINED),
                reason: format!("none of {:?} support {:?}", candidates, features),
            })
    }

    /// Depth attachment format
    pub fn find_depth_format(&self) -> VulkanResult<vk::Format> {
        self.find_supported_format(
            &[
                vk::Format::D32_SFLOAT,
                vk::Format::D32_SFLOAT_S8_UINT,
                vk::Format::D24_UNORM_S8_UINT,
            ],
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    /// Find memory type with required properties
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        let mem_properties = unsafe {
            self.instance()
                .get_physical_device_memory_properties(self.physical_device.device)
        };

        (0..mem_properties.memory_type_count)
            .find(|&i| {
                (type_filter & (1 << i)) != 0
                    && mem_properties.memory_types[i as usize].property_flags.contains(properties)
            })
            .ok_or(VulkanError::NoSuitableMemoryType)
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
            self.device.device.destroy_command_pool(self.command_pool, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_count_is_clamped_to_device() {
        let max = vk::SampleCountFlags::TYPE_8;
        assert_eq!(clamp_sample_count(4, max), vk::SampleCountFlags::TYPE_4);
        assert_eq!(clamp_sample_count(16, max), vk::SampleCountFlags::TYPE_8);
        assert_eq!(clamp_sample_count(0, max), vk::SampleCountFlags::TYPE_1);
        assert_eq!(clamp_sample_count(6, max), vk::SampleCountFlags::TYPE_4);
        assert_eq!(clamp_sample_count(8, vk::SampleCountFlags::TYPE_1), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn test_queue_families_prefer_shared_family() {
        let families = [
            (vk::QueueFlags::TRANSFER, true),
            (vk::QueueFlags::GRAPHICS, false),
            (vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
        ];
        assert_eq!(pick_queue_families(&families), Some((2, 2)));
    }

    #[test]
    fn test_queue_families_split_or_missing() {
        let split = [(vk::QueueFlags::GRAPHICS, false), (vk::QueueFlags::TRANSFER, true)];
        assert_eq!(pick_queue_families(&split), Some((0, 1)));

        let headless = [(vk::QueueFlags::GRAPHICS, false)];
        assert_eq!(pick_queue_families(&headless), None);
    }
}
