/// VulkanContext - Shared device context for all Vulkan objects
///
/// Owns the instance, the selected physical device, the logical device,
/// the graphics queue and the GPU memory allocator. Immutable after
/// construction; shared via `Arc` by every backend component.

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use nebula_3d_engine::nebula3d::{Error, Result};
use nebula_3d_engine::{engine_error, engine_info};
use raw_window_handle::HasDisplayHandle;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use crate::vulkan_runtime::RuntimeConfig;

pub struct VulkanContext {
    /// Vulkan entry (needed for surface creation)
    pub entry: ash::Entry,
    /// Vulkan instance
    pub instance: ash::Instance,
    /// Selected physical device
    pub physical_device: vk::PhysicalDevice,
    pub physical_device_properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Vulkan logical device
    pub device: ash::Device,

    /// Graphics queue (also used for presentation when the family supports it)
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,

    /// Depth format supported by the device for optimal-tiling attachments
    pub depth_format: vk::Format,

    /// Surface extension loader
    pub surface_loader: ash::khr::surface::Instance,
    /// Swapchain extension loader
    pub swapchain_loader: ash::khr::swapchain::Device,

    /// GPU memory allocator (shared, requires mutex for thread safety)
    /// Wrapped in ManuallyDrop so it is dropped BEFORE the device is destroyed
    pub allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    /// Debug utils loader (for validation layers)
    debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
    /// Debug messenger handle
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanContext {
    /// Create the device context: instance, physical device selection,
    /// logical device, queue and allocator.
    ///
    /// # Arguments
    ///
    /// * `display` - Display handle used to enumerate the surface extensions
    /// * `config` - Runtime configuration (validation toggles)
    pub fn new<W: HasDisplayHandle>(display: &W, config: &RuntimeConfig) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load().map_err(|e| {
                engine_error!("nebula3d::vulkan", "Failed to load Vulkan library: {:?}", e);
                Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
            })?;

            let app_info = vk::ApplicationInfo::default()
                .application_name(c"Nebula3D Application")
                .application_version(vk::make_api_version(0, 1, 0, 0))
                .engine_name(c"Nebula3D")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_1);

            let display_handle = display.display_handle().map_err(|e| {
                engine_error!("nebula3d::vulkan", "Failed to get display handle: {}", e);
                Error::InitializationFailed(format!("Failed to get display handle: {}", e))
            })?;
            let mut extension_names =
                ash_window::enumerate_required_extensions(display_handle.as_raw())
                    .map_err(|e| {
                        engine_error!("nebula3d::vulkan", "Failed to get required extensions: {}", e);
                        Error::InitializationFailed(format!(
                            "Failed to get required extensions: {}",
                            e
                        ))
                    })?
                    .to_vec();

            if config.enable_validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }

            let layer_names = if config.enable_validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry.create_instance(&create_info, None).map_err(|e| {
                engine_error!("nebula3d::vulkan", "Failed to create Vulkan instance: {:?}", e);
                Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
            })?;

            // Setup debug messenger if validation is enabled
            let (debug_utils_loader, debug_messenger) = if config.enable_validation {
                let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);

                crate::debug::init_debug_config(crate::debug::Config {
                    panic_on_error: config.panic_on_validation_error,
                });

                let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                    )
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(crate::debug::vulkan_debug_callback));

                let messenger = debug_utils
                    .create_debug_utils_messenger(&debug_info, None)
                    .map_err(|e| {
                        engine_error!("nebula3d::vulkan", "Failed to create debug messenger: {:?}", e);
                        Error::InitializationFailed(format!(
                            "Failed to create debug messenger: {:?}",
                            e
                        ))
                    })?;

                (Some(debug_utils), Some(messenger))
            } else {
                (None, None)
            };

            // Pick a physical device with a graphics queue and swapchain support
            let (physical_device, graphics_queue_family) =
                Self::select_physical_device(&instance)?;

            let physical_device_properties =
                instance.get_physical_device_properties(physical_device);
            let memory_properties =
                instance.get_physical_device_memory_properties(physical_device);

            let device_name = physical_device_properties
                .device_name_as_c_str()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            engine_info!("nebula3d::vulkan", "Using GPU: {}", device_name);

            // Create the logical device with a single graphics queue
            let queue_priorities = [1.0];
            let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_queue_family)
                .queue_priorities(&queue_priorities)];

            let device_extension_names = vec![ash::khr::swapchain::NAME.as_ptr()];

            let supported_features = instance.get_physical_device_features(physical_device);
            let device_features = vk::PhysicalDeviceFeatures::default()
                .sampler_anisotropy(supported_features.sampler_anisotropy != 0);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .enabled_features(&device_features);

            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| {
                    engine_error!("nebula3d::vulkan", "Failed to create logical device: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create device: {:?}", e))
                })?;

            let graphics_queue = device.get_device_queue(graphics_queue_family, 0);

            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
            let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

            // Create GPU allocator
            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| {
                engine_error!("nebula3d::vulkan", "Failed to create GPU allocator: {:?}", e);
                Error::InitializationFailed(format!("Failed to create allocator: {:?}", e))
            })?;

            let depth_format = Self::find_supported_format(
                &instance,
                physical_device,
                &[vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT],
                vk::ImageTiling::OPTIMAL,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .ok_or_else(|| {
                engine_error!("nebula3d::vulkan", "No supported depth attachment format");
                Error::InitializationFailed("No supported depth attachment format".to_string())
            })?;

            Ok(Self {
                entry,
                instance,
                physical_device,
                physical_device_properties,
                memory_properties,
                device,
                graphics_queue,
                graphics_queue_family,
                depth_format,
                surface_loader,
                swapchain_loader,
                allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
                debug_utils_loader,
                debug_messenger,
            })
        }
    }

    /// Pick a physical device with a graphics queue family and swapchain
    /// support, preferring discrete GPUs.
    fn select_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32)> {
        unsafe {
            let physical_devices = instance.enumerate_physical_devices().map_err(|e| {
                engine_error!("nebula3d::vulkan", "Failed to enumerate physical devices: {:?}", e);
                Error::InitializationFailed(format!(
                    "Failed to enumerate physical devices: {:?}",
                    e
                ))
            })?;

            let mut fallback: Option<(vk::PhysicalDevice, u32)> = None;
            for physical_device in physical_devices {
                let queue_families =
                    instance.get_physical_device_queue_family_properties(physical_device);
                let graphics_family = queue_families
                    .iter()
                    .enumerate()
                    .find(|(_, qf)| {
                        qf.queue_count > 0 && qf.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    })
                    .map(|(i, _)| i as u32);
                let Some(graphics_family) = graphics_family else {
                    continue;
                };

                let extensions = instance
                    .enumerate_device_extension_properties(physical_device)
                    .unwrap_or_default();
                let supports_swapchain = extensions.iter().any(|ext| {
                    ext.extension_name_as_c_str()
                        .map(|name| name == ash::khr::swapchain::NAME)
                        .unwrap_or(false)
                });
                if !supports_swapchain {
                    continue;
                }

                let properties = instance.get_physical_device_properties(physical_device);
                if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
                    return Ok((physical_device, graphics_family));
                }
                if fallback.is_none() {
                    fallback = Some((physical_device, graphics_family));
                }
            }

            fallback.ok_or_else(|| {
                engine_error!("nebula3d::vulkan", "No suitable Vulkan device found");
                Error::InitializationFailed("No suitable Vulkan device found".to_string())
            })
        }
    }

    /// First format of `candidates` supporting `features` with `tiling`
    fn find_supported_format(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        for &format in candidates {
            let props = unsafe {
                instance.get_physical_device_format_properties(physical_device, format)
            };
            let supported = match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                _ => props.optimal_tiling_features.contains(features),
            };
            if supported {
                return Some(format);
            }
        }
        None
    }

}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            // The allocator holds device memory, so release it first
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);

            if let (Some(loader), Some(messenger)) =
                (&self.debug_utils_loader, self.debug_messenger)
            {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}
