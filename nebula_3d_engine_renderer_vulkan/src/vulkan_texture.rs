/// VulkanTexture - sampled and attachable images
///
/// Owns the image, its allocation and a set of cached views. Uploads
/// take the copy path when the host pixel format matches the device
/// format (modulo sRGB), and otherwise go through a linear staging image
/// and a blit, which performs the format conversion.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use nebula_3d_engine::{engine_err, engine_error};
use nebula_3d_engine::nebula3d::render::{
    FaceOffsets, PixelBufferDescriptor, SamplerType, TextureFormat, TextureUsage,
};
use nebula_3d_engine::nebula3d::{Error, Result};
use rustc_hash::FxHashMap;

use crate::vulkan_context::VulkanContext;
use crate::vulkan_memory_pool::VulkanMemoryPool;
use crate::vulkan_utils::{self, LayoutTransition};

/// Cache key for an image view over a subresource range
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
struct ViewKey {
    base_level: u32,
    level_count: u32,
    base_layer: u32,
    layer_count: u32,
}

pub struct VulkanTexture {
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    image: vk::Image,
    allocation: Option<Allocation>,
    format: vk::Format,
    target: SamplerType,
    usage: TextureUsage,
    aspect: vk::ImageAspectFlags,
    width: u32,
    height: u32,
    levels: u32,
    layers: u32,
    samples: u8,
    layout: vk::ImageLayout,
    primary_view: vk::ImageView,
    cached_views: FxHashMap<ViewKey, vk::ImageView>,
}

impl VulkanTexture {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: &VulkanContext,
        cmdbuffer: vk::CommandBuffer,
        target: SamplerType,
        levels: u32,
        format: TextureFormat,
        samples: u8,
        width: u32,
        height: u32,
        depth: u32,
        usage: TextureUsage,
    ) -> Result<Self> {
        let device = context.device.clone();
        let vk_format = vulkan_utils::texture_format_to_vk(format, context.depth_format);

        let (image_type, layers, extent_depth, flags) = match target {
            SamplerType::Sampler3d => (vk::ImageType::TYPE_3D, 1, depth, vk::ImageCreateFlags::empty()),
            SamplerType::SamplerCubemap => (
                vk::ImageType::TYPE_2D,
                6,
                1,
                vk::ImageCreateFlags::CUBE_COMPATIBLE,
            ),
            SamplerType::Sampler2dArray => {
                (vk::ImageType::TYPE_2D, depth.max(1), 1, vk::ImageCreateFlags::empty())
            }
            SamplerType::Sampler2d => (vk::ImageType::TYPE_2D, 1, 1, vk::ImageCreateFlags::empty()),
        };

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type)
            .format(vk_format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: extent_depth,
            })
            .mip_levels(levels)
            .array_layers(layers)
            .samples(vk::SampleCountFlags::from_raw(samples as u32))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(image_usage_to_vk(usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe {
            device
                .create_image(&image_info, None)
                .map_err(|e| engine_err!("nebula3d::vulkan", "Failed to create image: {:?}", e))?
        };
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = context
            .allocator
            .lock()
            .unwrap()
            .allocate(&AllocationCreateDesc {
                name: "texture",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { device.destroy_image(image, None) };
                engine_error!("nebula3d::vulkan", "Texture allocation failed: {:?}", e);
                Error::OutOfMemory
            })?;
        unsafe {
            device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .map_err(|e| {
                    engine_err!("nebula3d::vulkan", "Failed to bind image memory: {:?}", e)
                })?;
        }

        let aspect = aspect_for(format);
        let primary_view = create_view(
            &device,
            image,
            vk_format,
            aspect,
            view_type_for(target),
            0,
            levels,
            0,
            layers,
        )?;

        // The full-image view lives in the cache like any other, so the
        // primary view can be retargeted to a mip sub-range later
        let mut cached_views = FxHashMap::default();
        cached_views.insert(
            ViewKey {
                base_level: 0,
                level_count: levels,
                base_layer: 0,
                layer_count: layers,
            },
            primary_view,
        );

        let mut texture = Self {
            device,
            allocator: Arc::clone(&context.allocator),
            image,
            allocation: Some(allocation),
            format: vk_format,
            target,
            usage,
            aspect,
            width,
            height,
            levels,
            layers,
            samples,
            layout: vk::ImageLayout::UNDEFINED,
            primary_view,
            cached_views,
        };

        // Attachments start their life in their settled layout so render
        // passes can rely on it
        if usage.intersects(
            TextureUsage::COLOR_ATTACHMENT
                | TextureUsage::DEPTH_ATTACHMENT
                | TextureUsage::STENCIL_ATTACHMENT,
        ) {
            texture.transition_layout(cmdbuffer, vulkan_utils::texture_layout(usage));
        }

        Ok(texture)
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn usage(&self) -> TextureUsage {
        self.usage
    }

    pub fn samples(&self) -> u8 {
        self.samples
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn target(&self) -> SamplerType {
        self.target
    }

    /// View the texture is sampled through, covering the primary mip
    /// range (the whole image until `set_primary_range` narrows it)
    pub fn primary_view(&self) -> vk::ImageView {
        self.primary_view
    }

    /// Retarget the primary view to the mip range `[min_level, max_level]`.
    /// `max_level` is clamped to the texture's level count.
    pub fn set_primary_range(&mut self, min_level: u32, max_level: u32) -> Result<()> {
        let (base_level, level_count) = clamp_level_range(min_level, max_level, self.levels);
        let key = ViewKey {
            base_level,
            level_count,
            base_layer: 0,
            layer_count: self.layers,
        };
        if let Some(view) = self.cached_views.get(&key) {
            self.primary_view = *view;
            return Ok(());
        }
        let view = create_view(
            &self.device,
            self.image,
            self.format,
            self.aspect,
            view_type_for(self.target),
            base_level,
            level_count,
            0,
            self.layers,
        )?;
        self.cached_views.insert(key, view);
        self.primary_view = view;
        Ok(())
    }

    /// Layout the texture settles in between transfers
    pub fn settled_layout(&self) -> vk::ImageLayout {
        vulkan_utils::texture_layout(self.usage)
    }

    /// View over a single mip level / layer range, created on first use
    pub fn view(
        &mut self,
        base_level: u32,
        level_count: u32,
        base_layer: u32,
        layer_count: u32,
    ) -> Result<vk::ImageView> {
        let key = ViewKey {
            base_level,
            level_count,
            base_layer,
            layer_count,
        };
        if let Some(view) = self.cached_views.get(&key) {
            return Ok(*view);
        }
        let view = create_view(
            &self.device,
            self.image,
            self.format,
            self.aspect,
            if layer_count > 1 {
                view_type_for(self.target)
            } else {
                vk::ImageViewType::TYPE_2D
            },
            base_level,
            level_count,
            base_layer,
            layer_count,
        )?;
        self.cached_views.insert(key, view);
        Ok(view)
    }

    /// Every view the texture has created, for cache scrubbing on destroy
    pub fn all_views(&self) -> Vec<vk::ImageView> {
        self.cached_views.values().copied().collect()
    }

    /// Upload pixel data into one mip level of a 2D texture
    pub fn update_2d_image(
        &mut self,
        context: &VulkanContext,
        memory_pool: &mut VulkanMemoryPool,
        cmdbuffer: vk::CommandBuffer,
        data: &PixelBufferDescriptor,
        width: u32,
        height: u32,
        level: u32,
    ) -> Result<()> {
        self.update_3d_image(context, memory_pool, cmdbuffer, data, width, height, 1, level)
    }

    /// Upload pixel data into one mip level, `depth` slices deep. Format
    /// conversion through the blit path is supported for single slices
    /// only.
    #[allow(clippy::too_many_arguments)]
    pub fn update_3d_image(
        &mut self,
        context: &VulkanContext,
        memory_pool: &mut VulkanMemoryPool,
        cmdbuffer: vk::CommandBuffer,
        data: &PixelBufferDescriptor,
        width: u32,
        height: u32,
        depth: u32,
        level: u32,
    ) -> Result<()> {
        let host_format = vulkan_utils::pixel_format_to_vk(data.format, data.pixel_type);
        if host_format == vk::Format::UNDEFINED {
            return Err(Error::InvalidPrecondition(format!(
                "Unsupported pixel data {:?}/{:?}",
                data.format, data.pixel_type
            )));
        }

        if host_format == vulkan_utils::linear_format(self.format) {
            self.update_with_copy_buffer(memory_pool, cmdbuffer, data, width, height, depth, level)
        } else {
            if depth != 1 {
                return Err(Error::InvalidPrecondition(
                    "Pixel format conversion is only supported for single-slice uploads"
                        .to_string(),
                ));
            }
            self.update_with_blit_image(
                context,
                memory_pool,
                cmdbuffer,
                host_format,
                data,
                width,
                height,
                level,
            )
        }
    }

    /// Upload all six faces of one cubemap mip level. `face_offsets`
    /// locates each face's pixels inside `data`.
    pub fn update_cube_image(
        &mut self,
        memory_pool: &mut VulkanMemoryPool,
        cmdbuffer: vk::CommandBuffer,
        data: &PixelBufferDescriptor,
        face_offsets: &FaceOffsets,
        level: u32,
    ) -> Result<()> {
        if self.target != SamplerType::SamplerCubemap {
            return Err(Error::InvalidPrecondition(
                "Texture is not a cubemap".to_string(),
            ));
        }
        let staging = memory_pool.acquire_buffer(data.data.len() as u64)?;
        staging.write_bytes(&data.data, 0)?;
        let staging_buffer = staging.buffer;

        let width = (self.width >> level).max(1);
        let height = (self.height >> level).max(1);
        let regions: Vec<vk::BufferImageCopy> = (0..6)
            .map(|face| {
                vk::BufferImageCopy::default()
                    .buffer_offset(face_offsets.offsets[face])
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(self.aspect)
                            .mip_level(level)
                            .base_array_layer(face as u32)
                            .layer_count(1),
                    )
                    .image_extent(vk::Extent3D {
                        width,
                        height,
                        depth: 1,
                    })
            })
            .collect();

        self.transition_layout(cmdbuffer, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmdbuffer,
                staging_buffer,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
        }
        self.transition_layout(cmdbuffer, self.settled_layout());
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn update_with_copy_buffer(
        &mut self,
        memory_pool: &mut VulkanMemoryPool,
        cmdbuffer: vk::CommandBuffer,
        data: &PixelBufferDescriptor,
        width: u32,
        height: u32,
        depth: u32,
        level: u32,
    ) -> Result<()> {
        let staging = memory_pool.acquire_buffer(data.data.len() as u64)?;
        staging.write_bytes(&data.data, 0)?;
        let staging_buffer = staging.buffer;

        self.transition_layout(cmdbuffer, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(self.aspect)
                    .mip_level(level)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width,
                height,
                depth,
            });
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmdbuffer,
                staging_buffer,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        self.transition_layout(cmdbuffer, self.settled_layout());
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn update_with_blit_image(
        &mut self,
        context: &VulkanContext,
        memory_pool: &mut VulkanMemoryPool,
        cmdbuffer: vk::CommandBuffer,
        host_format: vk::Format,
        data: &PixelBufferDescriptor,
        width: u32,
        height: u32,
        level: u32,
    ) -> Result<()> {
        let staging = memory_pool.acquire_image(host_format, width, height)?;
        let staging_image = staging.image;

        // Fill the linear staging image row by row, honoring its row pitch
        let subresource = vk::ImageSubresource::default().aspect_mask(vk::ImageAspectFlags::COLOR);
        let layout = unsafe {
            context
                .device
                .get_image_subresource_layout(staging_image, subresource)
        };
        let row_bytes = width as usize * data.bytes_per_pixel();
        let mapped = staging.mapped_ptr()?;
        for row in 0..height as usize {
            let src_offset = row * row_bytes;
            if src_offset + row_bytes > data.data.len() {
                return Err(Error::InvalidPrecondition(
                    "Pixel buffer smaller than the update region".to_string(),
                ));
            }
            unsafe {
                std::ptr::copy_nonoverlapping(
                    data.data.as_ptr().add(src_offset),
                    mapped
                        .as_ptr()
                        .cast::<u8>()
                        .add(layout.offset as usize + row * layout.row_pitch as usize),
                    row_bytes,
                );
            }
        }

        // Staging image stays GENERAL so recycled images keep their host
        // written contents; texture goes to TRANSFER_DST for the blit
        if staging.layout() == vk::ImageLayout::PREINITIALIZED {
            vulkan_utils::transition_image_layout(
                &self.device,
                cmdbuffer,
                LayoutTransition {
                    image: staging_image,
                    old_layout: vk::ImageLayout::PREINITIALIZED,
                    new_layout: vk::ImageLayout::GENERAL,
                    subresources: full_color_range(),
                    src_stage: vk::PipelineStageFlags::HOST,
                    src_access: vk::AccessFlags::HOST_WRITE,
                    dst_stage: vk::PipelineStageFlags::TRANSFER,
                    dst_access: vk::AccessFlags::TRANSFER_READ,
                },
            );
            staging.set_layout(vk::ImageLayout::GENERAL);
        }
        self.transition_layout(cmdbuffer, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        let blit = vk::ImageBlit::default()
            .src_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .layer_count(1),
            )
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: width as i32,
                    y: height as i32,
                    z: 1,
                },
            ])
            .dst_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(self.aspect)
                    .mip_level(level)
                    .layer_count(1),
            )
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: width as i32,
                    y: height as i32,
                    z: 1,
                },
            ]);
        unsafe {
            self.device.cmd_blit_image(
                cmdbuffer,
                staging_image,
                vk::ImageLayout::GENERAL,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::NEAREST,
            );
        }
        self.transition_layout(cmdbuffer, self.settled_layout());
        Ok(())
    }

    /// Transition the whole image, deriving stages and access masks from
    /// the destination layout
    pub fn transition_layout(&mut self, cmdbuffer: vk::CommandBuffer, new_layout: vk::ImageLayout) {
        if self.layout == new_layout {
            return;
        }
        let (src_stage, src_access, dst_stage, dst_access) = match new_layout {
            vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_WRITE,
            ),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_READ,
            ),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL | vk::ImageLayout::GENERAL => (
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::AccessFlags::SHADER_READ,
            ),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            _ => (
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ),
        };
        vulkan_utils::transition_image_layout(
            &self.device,
            cmdbuffer,
            LayoutTransition {
                image: self.image,
                old_layout: self.layout,
                new_layout,
                subresources: vk::ImageSubresourceRange::default()
                    .aspect_mask(self.aspect)
                    .base_mip_level(0)
                    .level_count(self.levels)
                    .base_array_layer(0)
                    .layer_count(self.layers),
                src_stage,
                src_access,
                dst_stage,
                dst_access,
            },
        );
        self.layout = new_layout;
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe {
            // The primary view is one of the cached views
            for (_, view) in self.cached_views.drain() {
                self.device.destroy_image_view(view, None);
            }
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = self.allocator.lock().unwrap().free(allocation);
        }
        unsafe {
            self.device.destroy_image(self.image, None);
        }
    }
}

/// Native image usage derived from the engine texture usage
fn image_usage_to_vk(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::SAMPLEABLE) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::UPLOADABLE) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::COLOR_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        if usage.contains(TextureUsage::SUBPASS_INPUT) {
            flags |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
        }
    }
    if usage.contains(TextureUsage::STENCIL_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(TextureUsage::DEPTH_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
    }
    flags
}

fn aspect_for(format: TextureFormat) -> vk::ImageAspectFlags {
    match format {
        TextureFormat::DEPTH32F => vk::ImageAspectFlags::DEPTH,
        TextureFormat::DEPTH24_STENCIL8 => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

fn view_type_for(target: SamplerType) -> vk::ImageViewType {
    match target {
        SamplerType::Sampler2d => vk::ImageViewType::TYPE_2D,
        SamplerType::Sampler2dArray => vk::ImageViewType::TYPE_2D_ARRAY,
        SamplerType::SamplerCubemap => vk::ImageViewType::CUBE,
        SamplerType::Sampler3d => vk::ImageViewType::TYPE_3D,
    }
}

/// Base level and level count of a primary mip range, clamped to the
/// texture's level count
fn clamp_level_range(min_level: u32, max_level: u32, levels: u32) -> (u32, u32) {
    let max_level = max_level.min(levels - 1);
    let base_level = min_level.min(max_level);
    (base_level, max_level - base_level + 1)
}

fn full_color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .level_count(1)
        .layer_count(1)
}

#[allow(clippy::too_many_arguments)]
fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    view_type: vk::ImageViewType,
    base_level: u32,
    level_count: u32,
    base_layer: u32,
    layer_count: u32,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .base_mip_level(base_level)
                .level_count(level_count)
                .base_array_layer(base_layer)
                .layer_count(layer_count),
        );
    unsafe {
        device
            .create_image_view(&create_info, None)
            .map_err(|e| engine_err!("nebula3d::vulkan", "Failed to create image view: {:?}", e))
    }
}

// ============================================================================
// Tests
// ============================================================================
