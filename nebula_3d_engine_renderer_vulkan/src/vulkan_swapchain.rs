/// VulkanSwapChain - surface, swapchain images and the shared depth
/// attachment
///
/// Acquiring an image hands the acquire semaphore to the command pool so
/// the next submit waits on it. A SUBOPTIMAL acquire or present sets the
/// resize flag; the runtime rebuilds the swap chain at the next frame
/// boundary.

use ash::vk;
use nebula_3d_engine::nebula3d::render::{SamplerType, TextureFormat, TextureUsage};
use nebula_3d_engine::nebula3d::{Error, Result};
use nebula_3d_engine::{engine_bail, engine_err, engine_info, engine_warn};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::vulkan_command_pool::VulkanCommandPool;
use crate::vulkan_context::VulkanContext;
use crate::vulkan_render_target::VulkanAttachment;
use crate::vulkan_semaphore::VulkanSemaphore;
use crate::vulkan_texture::VulkanTexture;

pub struct VulkanSwapChain {
    device: ash::Device,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: VulkanTexture,
    acquire_semaphore: VulkanSemaphore,
    current_index: u32,
    suboptimal: bool,
    suboptimal_logged: bool,
}

impl VulkanSwapChain {
    pub fn new(
        context: &VulkanContext,
        cmdbuffer: vk::CommandBuffer,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        client_width: u32,
        client_height: u32,
    ) -> Result<Self> {
        let surface = unsafe {
            ash_window::create_surface(
                &context.entry,
                &context.instance,
                display_handle,
                window_handle,
                None,
            )
            .map_err(|e| engine_err!("nebula3d::vulkan", "Failed to create surface: {:?}", e))?
        };

        match Self::create_from_surface(context, cmdbuffer, surface, client_width, client_height) {
            Ok(swapchain) => Ok(swapchain),
            Err(e) => {
                unsafe { context.surface_loader.destroy_surface(surface, None) };
                Err(e)
            }
        }
    }

    fn create_from_surface(
        context: &VulkanContext,
        cmdbuffer: vk::CommandBuffer,
        surface: vk::SurfaceKHR,
        client_width: u32,
        client_height: u32,
    ) -> Result<Self> {
        let capabilities = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_capabilities(context.physical_device, surface)
                .map_err(|e| {
                    engine_err!("nebula3d::vulkan", "Failed to query surface: {:?}", e)
                })?
        };
        let formats = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_formats(context.physical_device, surface)
                .map_err(|e| {
                    engine_err!("nebula3d::vulkan", "Failed to query surface formats: {:?}", e)
                })?
        };
        if formats.is_empty() {
            engine_bail!("nebula3d::vulkan", "Surface reports no formats");
        }

        let surface_format = formats
            .iter()
            .find(|f| f.format == vk::Format::R8G8B8A8_UNORM)
            .or_else(|| {
                formats
                    .iter()
                    .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
            })
            .copied()
            .unwrap_or(formats[0]);

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: client_width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: client_height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let composite_alpha = if capabilities
            .supported_composite_alpha
            .contains(vk::CompositeAlphaFlagsKHR::INHERIT)
        {
            vk::CompositeAlphaFlagsKHR::INHERIT
        } else {
            vk::CompositeAlphaFlagsKHR::OPAQUE
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);

        let swapchain = unsafe {
            context
                .swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|e| {
                    engine_err!("nebula3d::vulkan", "Failed to create swapchain: {:?}", e)
                })?
        };

        let images = unsafe {
            context
                .swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(|e| {
                    engine_err!("nebula3d::vulkan", "Failed to get swapchain images: {:?}", e)
                })?
        };

        let mut views = Vec::with_capacity(images.len());
        for image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(*image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );
            let view = unsafe {
                context
                    .device
                    .create_image_view(&view_info, None)
                    .map_err(|e| {
                        engine_err!(
                            "nebula3d::vulkan",
                            "Failed to create swapchain image view: {:?}",
                            e
                        )
                    })?
            };
            views.push(view);
        }

        // Shared depth attachment, transitioned to its settled layout
        let depth_format = if context.depth_format == vk::Format::D24_UNORM_S8_UINT {
            TextureFormat::DEPTH24_STENCIL8
        } else {
            TextureFormat::DEPTH32F
        };
        let mut depth = VulkanTexture::new(
            context,
            cmdbuffer,
            SamplerType::Sampler2d,
            1,
            depth_format,
            1,
            extent.width,
            extent.height,
            1,
            TextureUsage::DEPTH_ATTACHMENT,
        )?;
        depth.transition_layout(cmdbuffer, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let acquire_semaphore = VulkanSemaphore::new(context.device.clone())?;

        engine_info!(
            "nebula3d::vulkan",
            "Swap chain created: {}x{}, {} images, format {:?}",
            extent.width,
            extent.height,
            images.len(),
            surface_format.format
        );

        Ok(Self {
            device: context.device.clone(),
            surface,
            swapchain,
            format: surface_format.format,
            extent,
            images,
            views,
            depth,
            acquire_semaphore,
            current_index: 0,
            suboptimal: false,
            suboptimal_logged: false,
        })
    }

    /// Rebuild the swapchain over the same surface, consuming self.
    /// Callers must have drained in-flight work first.
    pub fn recreate(
        mut self,
        context: &VulkanContext,
        cmdbuffer: vk::CommandBuffer,
        client_width: u32,
        client_height: u32,
    ) -> Result<Self> {
        unsafe {
            let _ = context.device.device_wait_idle();
        }
        let surface = self.surface;
        self.destroy_images(context);
        unsafe {
            context
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
        // The surface ownership moves to the new swap chain; drop the
        // rest of self (depth texture, semaphore) normally
        self.swapchain = vk::SwapchainKHR::null();
        self.surface = vk::SurfaceKHR::null();
        drop(self);
        Self::create_from_surface(context, cmdbuffer, surface, client_width, client_height)
    }

    /// Acquire the next image and hand the signal semaphore to the
    /// command pool
    pub fn acquire_next_image(
        &mut self,
        context: &VulkanContext,
        command_pool: &mut VulkanCommandPool,
    ) -> Result<()> {
        let acquire = unsafe {
            context.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                self.acquire_semaphore.handle(),
                vk::Fence::null(),
            )
        };
        match acquire {
            Ok((index, suboptimal)) => {
                self.current_index = index;
                if suboptimal {
                    if !self.suboptimal_logged {
                        engine_warn!("nebula3d::vulkan", "Swap chain is suboptimal");
                        self.suboptimal_logged = true;
                    }
                    self.suboptimal = true;
                }
                command_pool.set_acquire_next_image_signal(self.acquire_semaphore.handle());
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(Error::SwapChainOutOfDate),
            Err(e) => Err(engine_err!(
                "nebula3d::vulkan",
                "Failed to acquire swapchain image: {:?}",
                e
            )),
        }
    }

    /// Transition the current image for presentation
    pub fn make_presentable(&self, cmdbuffer: vk::CommandBuffer) {
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.images[self.current_index as usize])
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmdbuffer,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Present the current image. Returns true when the swap chain needs
    /// to be rebuilt.
    pub fn present(
        &mut self,
        context: &VulkanContext,
        wait_semaphore: Option<vk::Semaphore>,
    ) -> Result<bool> {
        let wait_semaphores: Vec<vk::Semaphore> = wait_semaphore.into_iter().collect();
        let swapchains = [self.swapchain];
        let indices = [self.current_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let result = unsafe {
            context
                .swapchain_loader
                .queue_present(context.graphics_queue, &present_info)
        };
        match result {
            Ok(suboptimal) => Ok(suboptimal || self.suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(engine_err!(
                "nebula3d::vulkan",
                "Failed to present: {:?}",
                e
            )),
        }
    }

    /// Whether the surface extent no longer matches the swap chain
    pub fn has_resized(&self, context: &VulkanContext) -> bool {
        let capabilities = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_capabilities(context.physical_device, self.surface)
        };
        match capabilities {
            Ok(caps) => {
                caps.current_extent.width != u32::MAX
                    && (caps.current_extent.width != self.extent.width
                        || caps.current_extent.height != self.extent.height)
            }
            Err(_) => false,
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn current_index(&self) -> usize {
        self.current_index as usize
    }

    /// The current image as a color attachment
    pub fn current_attachment(&self) -> VulkanAttachment {
        VulkanAttachment {
            image: self.images[self.current_index as usize],
            view: self.views[self.current_index as usize],
            format: self.format,
            samples: 1,
        }
    }

    pub fn depth_attachment(&self) -> VulkanAttachment {
        VulkanAttachment {
            image: self.depth.image(),
            view: self.depth.primary_view(),
            format: self.depth.format(),
            samples: 1,
        }
    }

    /// Destroy everything, waiting for the device to go idle first
    pub fn destroy(mut self, context: &VulkanContext) {
        unsafe {
            let _ = context.device.device_wait_idle();
        }
        self.destroy_images(context);
        unsafe {
            context
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None);
            context.surface_loader.destroy_surface(self.surface, None);
        }
        self.swapchain = vk::SwapchainKHR::null();
        self.surface = vk::SurfaceKHR::null();
    }

    fn destroy_images(&mut self, context: &VulkanContext) {
        for view in self.views.drain(..) {
            unsafe {
                context.device.destroy_image_view(view, None);
            }
        }
        // Swapchain images are owned by the swapchain itself
        self.images.clear();
    }
}
