/// VulkanRuntime - backend orchestrator
///
/// Owns the device context, the command buffer ring, the transient
/// staging memory pool and the pipeline, framebuffer and sampler caches,
/// and drives them through the frame loop. GPU resources created here
/// are owned by the caller and passed back in by reference; destroying
/// one scrubs its handles from the caches first.

use ash::vk;
use nebula_3d_engine::nebula3d::render::{
    AttributeArray, AttributeFlags, BlendFunction, BufferDescriptor, FaceOffsets, PipelineState,
    PixelBufferDescriptor, PixelDataFormat, PixelDataType, RenderPassParams, SamplerParams,
    SamplerType, TargetBufferFlags, TextureFormat, TextureUsage, COMMAND_BUFFER_COUNT,
    MAX_SUPPORTED_RENDER_TARGET_COUNT,
};
use nebula_3d_engine::nebula3d::{Error, Result};
use nebula_3d_engine::{engine_error, engine_info};
use raw_window_handle::{HasDisplayHandle, RawDisplayHandle, RawWindowHandle};

use crate::vulkan_buffer::{
    VulkanBufferObject, VulkanIndexBuffer, VulkanRenderPrimitive, VulkanUniformBuffer,
    VulkanVertexBuffer,
};
use crate::vulkan_command_pool::{VulkanCommandBuffer, VulkanCommandPool};
use crate::vulkan_context::VulkanContext;
use crate::vulkan_fence::VulkanFence;
use crate::vulkan_framebuffer_cache::{FramebufferInfo, RenderPassInfo, VulkanFramebufferCache};
use crate::vulkan_memory_pool::VulkanMemoryPool;
use crate::vulkan_pipeline_cache::{VulkanPipelineCache, VulkanRasterState};
use crate::vulkan_program::VulkanProgram;
use crate::vulkan_render_target::{target_rect, VulkanAttachment, VulkanRenderTarget};
use crate::vulkan_sampler_cache::VulkanSamplerCache;
use crate::vulkan_swapchain::VulkanSwapChain;
use crate::vulkan_texture::VulkanTexture;
use crate::vulkan_utils::{self, LayoutTransition};

/// Runtime configuration, fixed at initialization
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Enable the Vulkan validation layers and the debug messenger
    pub enable_validation: bool,
    /// Panic on the first validation error instead of logging it
    pub panic_on_validation_error: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(feature = "vulkan-validation"),
            panic_on_validation_error: false,
        }
    }
}

/// State of the render pass currently being recorded
struct RenderPassState {
    render_pass: vk::RenderPass,
    subpass: u32,
    samples: u8,
    color_target_count: u32,
    subpass_mask: u32,
    /// Color attachment views, readable as input attachments in the
    /// second subpass
    input_views: [vk::ImageView; MAX_SUPPORTED_RENDER_TARGET_COUNT],
    /// Offscreen attachment images returned to GENERAL when the pass ends
    readback_images: Vec<vk::Image>,
    /// Viewport rect in Vulkan coordinates, also the scissor bound
    viewport_rect: vk::Rect2D,
}

pub struct VulkanRuntime {
    command_pool: VulkanCommandPool,
    memory_pool: VulkanMemoryPool,
    framebuffer_cache: VulkanFramebufferCache,
    pipeline_cache: VulkanPipelineCache,
    sampler_cache: VulkanSamplerCache,
    swapchain: Option<VulkanSwapChain>,
    swapchain_rebuild_needed: bool,
    /// 1x1 opaque texture bound in place of missing sampler textures
    placeholder_texture: VulkanTexture,
    current_pass: Option<RenderPassState>,
    // Dropped last; everything above holds clones of its device/allocator
    context: VulkanContext,
}

impl VulkanRuntime {
    /// Initialize the backend: device context, command buffer ring,
    /// staging pool, caches and the placeholder texture.
    pub fn new<W: HasDisplayHandle>(display: &W, config: RuntimeConfig) -> Result<Self> {
        let context = VulkanContext::new(display, &config)?;
        let mut command_pool = VulkanCommandPool::new(&context)?;
        let mut memory_pool = VulkanMemoryPool::new(&context);
        let mut pipeline_cache = VulkanPipelineCache::new();

        let (command, rotated) = command_pool.get()?;
        if let Some(slot) = rotated {
            pipeline_cache.on_command_buffer(slot);
        }

        let mut placeholder_texture = VulkanTexture::new(
            &context,
            command.cmdbuffer,
            SamplerType::Sampler2d,
            1,
            TextureFormat::RGBA8,
            1,
            1,
            1,
            1,
            TextureUsage::SAMPLEABLE | TextureUsage::UPLOADABLE,
        )?;
        let pixel = PixelBufferDescriptor::new(
            vec![0, 0, 0, 255],
            PixelDataFormat::Rgba,
            PixelDataType::Ubyte,
        );
        placeholder_texture.update_2d_image(
            &context,
            &mut memory_pool,
            command.cmdbuffer,
            &pixel,
            1,
            1,
            0,
        )?;

        engine_info!("nebula3d::vulkan", "Vulkan runtime initialized");
        Ok(Self {
            command_pool,
            memory_pool,
            framebuffer_cache: VulkanFramebufferCache::new(),
            pipeline_cache,
            sampler_cache: VulkanSamplerCache::new(),
            swapchain: None,
            swapchain_rebuild_needed: false,
            placeholder_texture,
            current_pass: None,
            context,
        })
    }

    pub fn context(&self) -> &VulkanContext {
        &self.context
    }

    /// Begin recording on the ring's current command buffer, rotating to
    /// a fresh slot when none is active and clearing that slot's cached
    /// pipeline state.
    fn acquire_command_buffer(&mut self) -> Result<VulkanCommandBuffer> {
        let (command, rotated) = self.command_pool.get()?;
        if let Some(slot) = rotated {
            self.pipeline_cache.on_command_buffer(slot);
        }
        Ok(command)
    }

    fn current_command_buffer(&self) -> Result<VulkanCommandBuffer> {
        self.command_pool.current().ok_or_else(|| {
            Error::InvalidPrecondition("No command buffer is being recorded".to_string())
        })
    }

    // ------------------------------------------------------------------------
    // Swap chain
    // ------------------------------------------------------------------------

    pub fn create_swap_chain(
        &mut self,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        client_width: u32,
        client_height: u32,
    ) -> Result<()> {
        if let Some(old) = self.swapchain.take() {
            self.command_pool.wait()?;
            self.framebuffer_cache.reset(&self.context);
            old.destroy(&self.context);
        }
        let command = self.acquire_command_buffer()?;
        let swapchain = VulkanSwapChain::new(
            &self.context,
            command.cmdbuffer,
            display_handle,
            window_handle,
            client_width,
            client_height,
        )?;
        self.swapchain = Some(swapchain);
        self.swapchain_rebuild_needed = false;
        Ok(())
    }

    pub fn destroy_swap_chain(&mut self) -> Result<()> {
        if let Some(swapchain) = self.swapchain.take() {
            self.command_pool.wait()?;
            self.framebuffer_cache.reset(&self.context);
            swapchain.destroy(&self.context);
        }
        Ok(())
    }

    /// Rebuild the swap chain over the same surface and drop every cached
    /// framebuffer referencing the old images
    fn refresh_swapchain(&mut self) -> Result<()> {
        self.swapchain_rebuild_needed = false;
        let Some(swapchain) = self.swapchain.take() else {
            return Ok(());
        };
        self.command_pool.wait()?;
        let command = self.acquire_command_buffer()?;
        let extent = swapchain.extent();
        let rebuilt = swapchain.recreate(&self.context, command.cmdbuffer, extent.width, extent.height)?;
        self.swapchain = Some(rebuilt);
        self.framebuffer_cache.reset(&self.context);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Frame loop
    // ------------------------------------------------------------------------

    /// Make the swap chain current for the frame: rebuild it when the
    /// surface changed, then acquire the next image.
    pub fn begin_frame(&mut self) -> Result<()> {
        if self.swapchain.is_none() {
            return Err(Error::InvalidPrecondition(
                "No swap chain created".to_string(),
            ));
        }
        let resized = self
            .swapchain
            .as_ref()
            .is_some_and(|swapchain| swapchain.has_resized(&self.context));
        if self.swapchain_rebuild_needed || resized {
            self.refresh_swapchain()?;
        }

        let Some(swapchain) = self.swapchain.as_mut() else {
            return Err(Error::InvalidPrecondition(
                "No swap chain created".to_string(),
            ));
        };
        match swapchain.acquire_next_image(&self.context, &mut self.command_pool) {
            Ok(()) => Ok(()),
            Err(Error::SwapChainOutOfDate) => {
                self.refresh_swapchain()?;
                let Some(swapchain) = self.swapchain.as_mut() else {
                    return Err(Error::SwapChainOutOfDate);
                };
                swapchain.acquire_next_image(&self.context, &mut self.command_pool)
            }
            Err(e) => Err(e),
        }
    }

    /// End the frame: transition the swap image for presentation, submit
    /// the recorded work, collect garbage and present.
    pub fn commit(&mut self) -> Result<()> {
        if self.current_pass.is_some() {
            return Err(Error::InvalidPrecondition(
                "Cannot commit inside a render pass".to_string(),
            ));
        }
        if let (Some(swapchain), Some(command)) = (self.swapchain.as_ref(), self.command_pool.current())
        {
            swapchain.make_presentable(command.cmdbuffer);
        }
        if self.command_pool.flush()? {
            self.collect_garbage()?;
        }
        let finished = self.command_pool.take_finished_signal();
        let Some(swapchain) = self.swapchain.as_mut() else {
            return Err(Error::InvalidPrecondition(
                "No swap chain created".to_string(),
            ));
        };
        if swapchain.present(&self.context, finished)? {
            self.swapchain_rebuild_needed = true;
        }
        Ok(())
    }

    /// Submit the recorded work without presenting
    pub fn flush(&mut self) -> Result<()> {
        if self.command_pool.flush()? {
            self.collect_garbage()?;
        }
        Ok(())
    }

    /// Submit and wait for every submitted command buffer to retire
    pub fn finish(&mut self) -> Result<()> {
        self.flush()?;
        self.command_pool.wait()?;
        Ok(())
    }

    fn collect_garbage(&mut self) -> Result<()> {
        self.command_pool.gc()?;
        self.memory_pool.gc();
        self.framebuffer_cache.gc(&self.context);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------------

    pub fn create_uniform_buffer(&self, byte_count: u64) -> Result<VulkanUniformBuffer> {
        VulkanUniformBuffer::new(&self.context, byte_count)
    }

    pub fn load_uniform_buffer(
        &self,
        buffer: &VulkanUniformBuffer,
        data: &BufferDescriptor,
        byte_offset: u64,
    ) -> Result<()> {
        buffer.load(&data.data, byte_offset)
    }

    pub fn destroy_uniform_buffer(&mut self, buffer: VulkanUniformBuffer) {
        self.pipeline_cache.unbind_uniform_buffer(buffer.handle());
        drop(buffer);
    }

    pub fn create_buffer_object(&self, byte_count: u64) -> Result<VulkanBufferObject> {
        VulkanBufferObject::new(&self.context, byte_count)
    }

    pub fn update_buffer_object(
        &mut self,
        buffer: &VulkanBufferObject,
        data: &BufferDescriptor,
        byte_offset: u64,
    ) -> Result<()> {
        let command = self.acquire_command_buffer()?;
        buffer
            .buffer
            .upload(&mut self.memory_pool, command.cmdbuffer, &data.data, byte_offset)
    }

    /// Synchronously read a buffer object back. Stalls: submits the
    /// recorded work and waits before reading the staging copy.
    pub fn read_buffer_object(&mut self, buffer: &VulkanBufferObject) -> Result<Vec<u8>> {
        buffer
            .buffer
            .download(&mut self.command_pool, &mut self.memory_pool)
    }

    pub fn destroy_buffer_object(&mut self, buffer: VulkanBufferObject) {
        drop(buffer);
    }

    pub fn create_vertex_buffer(
        &self,
        vertex_count: u32,
        buffer_count: u8,
        attributes: AttributeArray,
    ) -> VulkanVertexBuffer {
        VulkanVertexBuffer::new(vertex_count, buffer_count, attributes)
    }

    pub fn destroy_vertex_buffer(&mut self, buffer: VulkanVertexBuffer) {
        drop(buffer);
    }

    pub fn create_index_buffer(
        &self,
        element_size: u32,
        index_count: u32,
    ) -> Result<VulkanIndexBuffer> {
        VulkanIndexBuffer::new(&self.context, element_size, index_count)
    }

    pub fn update_index_buffer(
        &mut self,
        buffer: &VulkanIndexBuffer,
        data: &BufferDescriptor,
        byte_offset: u64,
    ) -> Result<()> {
        let command = self.acquire_command_buffer()?;
        buffer
            .buffer
            .upload(&mut self.memory_pool, command.cmdbuffer, &data.data, byte_offset)
    }

    pub fn destroy_index_buffer(&mut self, buffer: VulkanIndexBuffer) {
        drop(buffer);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_texture(
        &mut self,
        target: SamplerType,
        levels: u32,
        format: TextureFormat,
        samples: u8,
        width: u32,
        height: u32,
        depth: u32,
        usage: TextureUsage,
    ) -> Result<VulkanTexture> {
        let command = self.acquire_command_buffer()?;
        VulkanTexture::new(
            &self.context,
            command.cmdbuffer,
            target,
            levels,
            format,
            samples,
            width,
            height,
            depth,
            usage,
        )
    }

    pub fn update_2d_image(
        &mut self,
        texture: &mut VulkanTexture,
        data: &PixelBufferDescriptor,
        width: u32,
        height: u32,
        level: u32,
    ) -> Result<()> {
        let command = self.acquire_command_buffer()?;
        texture.update_2d_image(
            &self.context,
            &mut self.memory_pool,
            command.cmdbuffer,
            data,
            width,
            height,
            level,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_3d_image(
        &mut self,
        texture: &mut VulkanTexture,
        data: &PixelBufferDescriptor,
        width: u32,
        height: u32,
        depth: u32,
        level: u32,
    ) -> Result<()> {
        let command = self.acquire_command_buffer()?;
        texture.update_3d_image(
            &self.context,
            &mut self.memory_pool,
            command.cmdbuffer,
            data,
            width,
            height,
            depth,
            level,
        )
    }

    pub fn update_cube_image(
        &mut self,
        texture: &mut VulkanTexture,
        data: &PixelBufferDescriptor,
        face_offsets: &FaceOffsets,
        level: u32,
    ) -> Result<()> {
        let command = self.acquire_command_buffer()?;
        texture.update_cube_image(
            &mut self.memory_pool,
            command.cmdbuffer,
            data,
            face_offsets,
            level,
        )
    }

    /// Narrow the texture's primary view to a mip sub-range. Samplers
    /// bound afterwards see only those levels.
    pub fn set_min_max_levels(
        &mut self,
        texture: &mut VulkanTexture,
        min_level: u32,
        max_level: u32,
    ) -> Result<()> {
        texture.set_primary_range(min_level, max_level)
    }

    pub fn destroy_texture(&mut self, texture: VulkanTexture) {
        for view in texture.all_views() {
            self.pipeline_cache.unbind_image_view(view);
        }
        drop(texture);
    }

    pub fn create_program(
        &self,
        name: &str,
        vertex_spirv: &[u8],
        fragment_spirv: &[u8],
        sampler_bindings: Vec<u32>,
    ) -> Result<VulkanProgram> {
        VulkanProgram::new(&self.context, name, vertex_spirv, fragment_spirv, sampler_bindings)
    }

    pub fn destroy_program(&mut self, program: VulkanProgram) {
        drop(program);
    }

    pub fn create_fence(&self, signaled: bool) -> Result<VulkanFence> {
        VulkanFence::new(self.context.device.clone(), signaled)
    }

    pub fn create_default_render_target(&self) -> VulkanRenderTarget {
        VulkanRenderTarget::new_default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        samples: u8,
        color: [VulkanAttachment; MAX_SUPPORTED_RENDER_TARGET_COUNT],
        color_formats: [Option<TextureFormat>; MAX_SUPPORTED_RENDER_TARGET_COUNT],
        depth: VulkanAttachment,
        depth_format: Option<TextureFormat>,
    ) -> Result<VulkanRenderTarget> {
        let command = self.acquire_command_buffer()?;
        VulkanRenderTarget::new_offscreen(
            &self.context,
            command.cmdbuffer,
            width,
            height,
            samples,
            color,
            color_formats,
            depth,
            depth_format,
        )
    }

    pub fn destroy_render_target(&mut self, target: VulkanRenderTarget) {
        drop(target);
    }

    pub fn create_render_primitive(&self) -> VulkanRenderPrimitive {
        VulkanRenderPrimitive::new()
    }

    pub fn destroy_render_primitive(&mut self, primitive: VulkanRenderPrimitive) {
        drop(primitive);
    }

    // ------------------------------------------------------------------------
    // Render passes
    // ------------------------------------------------------------------------

    /// Begin a render pass over `target`, building the cache keys from
    /// its attachments and the pass parameters.
    pub fn begin_render_pass(
        &mut self,
        target: &VulkanRenderTarget,
        params: &RenderPassParams,
    ) -> Result<()> {
        if self.current_pass.is_some() {
            return Err(Error::InvalidPrecondition(
                "A render pass is already active".to_string(),
            ));
        }
        let command = self.acquire_command_buffer()?;

        let mut render_pass_info = RenderPassInfo {
            clear: params.flags.clear,
            discard_start: params.flags.discard_start,
            discard_end: params.flags.discard_end,
            samples: target.samples(),
            subpass_mask: params.subpass_mask,
            ..Default::default()
        };
        let mut framebuffer_info = FramebufferInfo::default();
        let mut input_views = [vk::ImageView::null(); MAX_SUPPORTED_RENDER_TARGET_COUNT];
        let mut readback_images: Vec<vk::Image> = Vec::new();

        let (width, height, swap_index);
        if target.is_swapchain() {
            let Some(swapchain) = self.swapchain.as_ref() else {
                return Err(Error::InvalidPrecondition(
                    "No swap chain created".to_string(),
                ));
            };
            let color = swapchain.current_attachment();
            let depth = swapchain.depth_attachment();
            render_pass_info.color_formats[0] = color.format;
            render_pass_info.depth_format = depth.format;
            framebuffer_info.color[0] = color.view;
            framebuffer_info.depth = depth.view;
            input_views[0] = color.view;
            let extent = swapchain.extent();
            width = extent.width;
            height = extent.height;
            swap_index = swapchain.current_index() % COMMAND_BUFFER_COUNT;
        } else {
            for index in 0..MAX_SUPPORTED_RENDER_TARGET_COUNT {
                if let Some(attachment) = target.color(index) {
                    render_pass_info.color_formats[index] = attachment.format;
                    framebuffer_info.color[index] = attachment.view;
                    input_views[index] = attachment.view;
                    readback_images.push(attachment.image);
                }
                if let Some(resolve) = target.resolve(index) {
                    framebuffer_info.resolve[index] = resolve.view;
                    readback_images.push(resolve.image);
                }
            }
            render_pass_info.needs_resolve_mask = target.resolve_mask();
            if let Some(depth) = target.depth() {
                render_pass_info.depth_format = depth.format;
                framebuffer_info.depth = depth.view;
            }
            let (w, h) = target.extent();
            width = w;
            height = h;
            swap_index = 0;
        }
        framebuffer_info.width = width;
        framebuffer_info.height = height;

        // Offscreen attachments that keep their contents enter the pass
        // from GENERAL, where end_render_pass left them
        if !target.is_swapchain() {
            for index in 0..MAX_SUPPORTED_RENDER_TARGET_COUNT {
                let flag = TargetBufferFlags::color(index);
                let keeps_contents = !params.flags.clear.contains(flag)
                    && !params.flags.discard_start.contains(flag);
                if keeps_contents {
                    if let Some(attachment) = target.color(index) {
                        vulkan_utils::transition_image_layout(
                            &self.context.device,
                            command.cmdbuffer,
                            LayoutTransition {
                                image: attachment.image,
                                old_layout: vk::ImageLayout::GENERAL,
                                new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                                subresources: full_color_subresources(),
                                src_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                                src_access: vk::AccessFlags::SHADER_READ,
                                dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                                dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                                    | vk::AccessFlags::COLOR_ATTACHMENT_READ,
                            },
                        );
                    }
                }
            }
        }

        let (render_pass, framebuffer) = self.framebuffer_cache.get(
            &self.context,
            swap_index,
            &render_pass_info,
            &framebuffer_info,
        )?;

        // Clear values in attachment order: colors, resolves, depth
        let mut clear_values: Vec<vk::ClearValue> = Vec::new();
        let color_clear = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: params.clear_color,
            },
        };
        let mut color_target_count = 0u32;
        for index in 0..MAX_SUPPORTED_RENDER_TARGET_COUNT {
            if render_pass_info.color_formats[index] != vk::Format::UNDEFINED {
                clear_values.push(color_clear);
                color_target_count += 1;
            }
        }
        for index in 0..MAX_SUPPORTED_RENDER_TARGET_COUNT {
            if render_pass_info.color_formats[index] != vk::Format::UNDEFINED
                && render_pass_info.needs_resolve_mask & (1 << index) != 0
            {
                clear_values.push(color_clear);
            }
        }
        if render_pass_info.depth_format != vk::Format::UNDEFINED {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: params.clear_depth,
                    stencil: 0,
                },
            });
        }

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width, height },
            })
            .clear_values(&clear_values);
        unsafe {
            self.context.device.cmd_begin_render_pass(
                command.cmdbuffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }

        // Zero-sized viewport means the whole framebuffer
        let viewport_rect = if params.viewport.width == 0 || params.viewport.height == 0 {
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width, height },
            }
        } else {
            target_rect(width, height, &params.viewport)
        };
        let viewport = vk::Viewport {
            x: viewport_rect.offset.x as f32,
            y: viewport_rect.offset.y as f32,
            width: viewport_rect.extent.width as f32,
            height: viewport_rect.extent.height as f32,
            min_depth: params.depth_range.near,
            max_depth: params.depth_range.far,
        };
        unsafe {
            self.context
                .device
                .cmd_set_viewport(command.cmdbuffer, 0, &[viewport]);
        }
        self.pipeline_cache
            .bind_scissor(&self.context, command.cmdbuffer, viewport_rect);
        self.pipeline_cache.bind_render_pass(render_pass, 0);

        self.current_pass = Some(RenderPassState {
            render_pass,
            subpass: 0,
            samples: render_pass_info.samples,
            color_target_count: color_target_count.max(1),
            subpass_mask: params.subpass_mask,
            input_views,
            readback_images,
            viewport_rect,
        });
        Ok(())
    }

    /// Advance to the second subpass, binding the masked color
    /// attachments as input attachments. At most one extra subpass is
    /// supported.
    pub fn next_subpass(&mut self) -> Result<()> {
        let command = self.current_command_buffer()?;
        let Some(pass) = self.current_pass.as_mut() else {
            return Err(Error::InvalidPrecondition(
                "No render pass is active".to_string(),
            ));
        };
        if pass.subpass_mask == 0 {
            return Err(Error::InvalidPrecondition(
                "Render pass was not created with a second subpass".to_string(),
            ));
        }
        if pass.subpass != 0 {
            return Err(Error::InvalidPrecondition(
                "Only one extra subpass is supported".to_string(),
            ));
        }
        pass.subpass = 1;
        let render_pass = pass.render_pass;
        let subpass_mask = pass.subpass_mask;
        let input_views = pass.input_views;

        unsafe {
            self.context
                .device
                .cmd_next_subpass(command.cmdbuffer, vk::SubpassContents::INLINE);
        }
        self.pipeline_cache.bind_render_pass(render_pass, 1);
        for index in 0..MAX_SUPPORTED_RENDER_TARGET_COUNT {
            if subpass_mask & (1 << index) != 0 && input_views[index] != vk::ImageView::null() {
                self.pipeline_cache.bind_input_attachment(
                    index,
                    vk::DescriptorImageInfo::default()
                        .image_view(input_views[index])
                        .image_layout(vk::ImageLayout::GENERAL),
                )?;
            }
        }
        Ok(())
    }

    /// End the active render pass. Offscreen attachments are returned to
    /// GENERAL so they can be sampled without further transitions.
    pub fn end_render_pass(&mut self) -> Result<()> {
        let command = self.current_command_buffer()?;
        let Some(pass) = self.current_pass.take() else {
            return Err(Error::InvalidPrecondition(
                "No render pass is active".to_string(),
            ));
        };
        unsafe {
            self.context.device.cmd_end_render_pass(command.cmdbuffer);
        }
        for image in pass.readback_images {
            vulkan_utils::transition_image_layout(
                &self.context.device,
                command.cmdbuffer,
                LayoutTransition {
                    image,
                    old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    new_layout: vk::ImageLayout::GENERAL,
                    subresources: full_color_subresources(),
                    src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                    dst_access: vk::AccessFlags::SHADER_READ,
                },
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Bindings
    // ------------------------------------------------------------------------

    pub fn bind_uniform_buffer(
        &mut self,
        binding: usize,
        buffer: &VulkanUniformBuffer,
    ) -> Result<()> {
        self.pipeline_cache
            .bind_uniform_buffer(binding, buffer.handle(), 0, buffer.byte_count())
    }

    pub fn bind_uniform_buffer_range(
        &mut self,
        binding: usize,
        buffer: &VulkanUniformBuffer,
        offset: u64,
        size: u64,
    ) -> Result<()> {
        self.pipeline_cache
            .bind_uniform_buffer(binding, buffer.handle(), offset, size)
    }

    /// Bind a texture and sampler pair. A missing texture binds the
    /// placeholder so the descriptor set stays complete.
    pub fn bind_sampler(
        &mut self,
        binding: usize,
        texture: Option<&VulkanTexture>,
        params: SamplerParams,
    ) -> Result<()> {
        let sampler = self.sampler_cache.get(&self.context, params)?;
        let (view, layout) = match texture {
            Some(texture) => (texture.primary_view(), texture.settled_layout()),
            None => (
                self.placeholder_texture.primary_view(),
                self.placeholder_texture.settled_layout(),
            ),
        };
        self.pipeline_cache.bind_sampler(
            binding,
            vk::DescriptorImageInfo::default()
                .sampler(sampler)
                .image_view(view)
                .image_layout(layout),
        )
    }

    // ------------------------------------------------------------------------
    // Draw
    // ------------------------------------------------------------------------

    /// Record one indexed draw: translate the engine pipeline state,
    /// build the vertex layout from the primitive's attributes and bind
    /// everything through the pipeline cache.
    pub fn draw(
        &mut self,
        pipeline_state: &PipelineState,
        program: &VulkanProgram,
        primitive: &VulkanRenderPrimitive,
    ) -> Result<()> {
        let command = self.current_command_buffer()?;
        let Some(pass) = self.current_pass.as_ref() else {
            return Err(Error::InvalidPrecondition(
                "Draw outside of a render pass".to_string(),
            ));
        };

        let rs = &pipeline_state.raster_state;
        let blend_enable = !(rs.blend_function_src_rgb == BlendFunction::One
            && rs.blend_function_dst_rgb == BlendFunction::Zero
            && rs.blend_function_src_alpha == BlendFunction::One
            && rs.blend_function_dst_alpha == BlendFunction::Zero);
        let raster_state = VulkanRasterState {
            cull_mode: vulkan_utils::cull_mode_to_vk(rs.culling),
            front_face: vulkan_utils::front_face_to_vk(rs.inverse_front_faces),
            depth_bias_constant: pipeline_state.polygon_offset.constant,
            depth_bias_slope: pipeline_state.polygon_offset.slope,
            blend_enable,
            src_color_blend_factor: vulkan_utils::blend_factor_to_vk(rs.blend_function_src_rgb),
            dst_color_blend_factor: vulkan_utils::blend_factor_to_vk(rs.blend_function_dst_rgb),
            src_alpha_blend_factor: vulkan_utils::blend_factor_to_vk(rs.blend_function_src_alpha),
            dst_alpha_blend_factor: vulkan_utils::blend_factor_to_vk(rs.blend_function_dst_alpha),
            color_blend_op: vulkan_utils::blend_op_to_vk(rs.blend_equation_rgb),
            alpha_blend_op: vulkan_utils::blend_op_to_vk(rs.blend_equation_alpha),
            color_write_mask: if rs.color_write {
                vk::ColorComponentFlags::RGBA
            } else {
                vk::ColorComponentFlags::empty()
            },
            depth_write_enable: rs.depth_write,
            depth_compare_op: vulkan_utils::compare_op_to_vk(rs.depth_func),
            alpha_to_coverage: rs.alpha_to_coverage,
            rasterization_samples: vk::SampleCountFlags::from_raw(pass.samples as u32),
            color_target_count: pass.color_target_count,
        };

        // Compact vertex layout: one binding per enabled attribute, the
        // shader location stays the attribute's slot index
        let mut attributes: Vec<vk::VertexInputAttributeDescription> = Vec::new();
        let mut bindings: Vec<vk::VertexInputBindingDescription> = Vec::new();
        let mut buffers: Vec<vk::Buffer> = Vec::new();
        let mut offsets: Vec<vk::DeviceSize> = Vec::new();
        for (index, attribute) in primitive.attributes.iter().enumerate() {
            if !attribute.is_enabled() {
                continue;
            }
            let Some(buffer) = primitive
                .vertex_buffers
                .get(attribute.buffer as usize)
                .copied()
            else {
                return Err(Error::InvalidPrecondition(format!(
                    "Attribute {} references missing vertex buffer {}",
                    index, attribute.buffer
                )));
            };
            if buffer == vk::Buffer::null() {
                continue;
            }
            let binding = bindings.len() as u32;
            let flags = attribute.flags;
            attributes.push(vk::VertexInputAttributeDescription {
                location: index as u32,
                binding,
                format: vulkan_utils::element_type_to_vk(
                    attribute.element_type,
                    flags.contains(AttributeFlags::NORMALIZED),
                    flags.contains(AttributeFlags::INTEGER),
                ),
                offset: attribute.offset,
            });
            bindings.push(vk::VertexInputBindingDescription {
                binding,
                stride: attribute.stride as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            });
            buffers.push(buffer);
            offsets.push(0);
        }

        let viewport_rect = pass.viewport_rect;
        self.pipeline_cache.bind_program(program.shader_modules());
        self.pipeline_cache.bind_raster_state(raster_state);
        self.pipeline_cache
            .bind_topology(vulkan_utils::primitive_topology_to_vk(primitive.primitive_type));
        self.pipeline_cache.bind_vertex_array(&attributes, &bindings);

        self.pipeline_cache
            .bind_descriptor_sets(&self.context, command.cmdbuffer)?;
        self.pipeline_cache
            .bind_scissor(&self.context, command.cmdbuffer, viewport_rect);
        self.pipeline_cache
            .bind_pipeline(&self.context, command.cmdbuffer)?;

        unsafe {
            let device = &self.context.device;
            if !buffers.is_empty() {
                device.cmd_bind_vertex_buffers(command.cmdbuffer, 0, &buffers, &offsets);
            }
            device.cmd_bind_index_buffer(
                command.cmdbuffer,
                primitive.index_buffer,
                0,
                primitive.index_type,
            );
            device.cmd_draw_indexed(
                command.cmdbuffer,
                primitive.count,
                1,
                primitive.first_index(),
                0,
                0,
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Readback
    // ------------------------------------------------------------------------

    /// Synchronously read pixels from the first color attachment of
    /// `target`. Stalls: flushes the recorded work and waits for the
    /// device before reading the staging image.
    pub fn read_pixels(
        &mut self,
        target: &VulkanRenderTarget,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        let (image, image_layout, fb_width, fb_height, format) = if target.is_swapchain() {
            let Some(swapchain) = self.swapchain.as_ref() else {
                return Err(Error::InvalidPrecondition(
                    "No swap chain created".to_string(),
                ));
            };
            let attachment = swapchain.current_attachment();
            let extent = swapchain.extent();
            (
                attachment.image,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                extent.width,
                extent.height,
                attachment.format,
            )
        } else {
            let Some(attachment) = target.color(0) else {
                return Err(Error::InvalidPrecondition(
                    "Render target has no color attachment".to_string(),
                ));
            };
            let (w, h) = target.extent();
            (attachment.image, vk::ImageLayout::GENERAL, w, h, attachment.format)
        };
        if x as u64 + width as u64 > fb_width as u64 || y as u64 + height as u64 > fb_height as u64
        {
            return Err(Error::InvalidPrecondition(format!(
                "Readback rect {}x{} at ({}, {}) exceeds the {}x{} framebuffer",
                width, height, x, y, fb_width, fb_height
            )));
        }

        let command = self.acquire_command_buffer()?;
        let staging_format = vulkan_utils::linear_format(format);
        let staging = self
            .memory_pool
            .acquire_image(staging_format, width, height)?;
        let staging_image = staging.image;

        // Settle the staging image in GENERAL on first use; recycled
        // images are already there
        vulkan_utils::transition_image_layout(
            &self.context.device,
            command.cmdbuffer,
            LayoutTransition {
                image: staging_image,
                old_layout: staging.layout(),
                new_layout: vk::ImageLayout::GENERAL,
                subresources: full_color_subresources(),
                src_stage: vk::PipelineStageFlags::HOST,
                src_access: vk::AccessFlags::HOST_WRITE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
            },
        );
        staging.set_layout(vk::ImageLayout::GENERAL);

        vulkan_utils::transition_image_layout(
            &self.context.device,
            command.cmdbuffer,
            LayoutTransition {
                image,
                old_layout: image_layout,
                new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                subresources: full_color_subresources(),
                src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
                dst_access: vk::AccessFlags::TRANSFER_READ,
            },
        );

        // Flip the source rect to Vulkan's top-left origin
        let src_y = fb_height as i64 - y as i64 - height as i64;
        let subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);
        let region = vk::ImageCopy::default()
            .src_subresource(subresource)
            .src_offset(vk::Offset3D {
                x: x as i32,
                y: src_y.max(0) as i32,
                z: 0,
            })
            .dst_subresource(subresource)
            .dst_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });
        unsafe {
            self.context.device.cmd_copy_image(
                command.cmdbuffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                staging_image,
                vk::ImageLayout::GENERAL,
                &[region],
            );
        }

        vulkan_utils::transition_image_layout(
            &self.context.device,
            command.cmdbuffer,
            LayoutTransition {
                image,
                old_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                new_layout: image_layout,
                subresources: full_color_subresources(),
                src_stage: vk::PipelineStageFlags::TRANSFER,
                src_access: vk::AccessFlags::TRANSFER_READ,
                dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            },
        );
        let host_barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ);
        unsafe {
            self.context.device.cmd_pipeline_barrier(
                command.cmdbuffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[host_barrier],
                &[],
                &[],
            );
        }

        self.command_pool.flush()?;
        self.command_pool.wait()?;

        let layout = unsafe {
            self.context.device.get_image_subresource_layout(
                staging_image,
                vk::ImageSubresource::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .array_layer(0),
            )
        };
        let pixel_size = format_pixel_size(staging_format);
        let row_bytes = width as usize * pixel_size;
        let mut data = vec![0u8; row_bytes * height as usize];
        let base = staging.mapped_ptr()?.as_ptr() as *const u8;
        for row in 0..height as usize {
            // Output rows bottom-up to match the engine's origin
            let src = unsafe {
                base.add(layout.offset as usize + row * layout.row_pitch as usize)
            };
            let dst_row = height as usize - 1 - row;
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src,
                    data.as_mut_ptr().add(dst_row * row_bytes),
                    row_bytes,
                );
            }
        }
        Ok(data)
    }

    // ------------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------------

    /// Pipelines built since initialization
    pub fn pipeline_creation_count(&self) -> usize {
        self.pipeline_cache.pipeline_creation_count()
    }

    /// Descriptor sets allocated since initialization
    pub fn descriptor_set_creation_count(&self) -> usize {
        self.pipeline_cache.descriptor_set_creation_count()
    }
}

impl Drop for VulkanRuntime {
    fn drop(&mut self) {
        if let Err(e) = self.command_pool.wait() {
            engine_error!("nebula3d::vulkan", "Shutdown wait failed: {}", e);
        }
        self.pipeline_cache.destroy_cache(&self.context);
        self.sampler_cache.reset(&self.context);
        self.framebuffer_cache.reset(&self.context);
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy(&self.context);
        }
        engine_info!("nebula3d::vulkan", "Vulkan runtime terminated");
        // command_pool, memory_pool and the placeholder texture release
        // their native objects in their own Drop impls, before context
    }
}

fn full_color_subresources() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .base_array_layer(0)
        .layer_count(vk::REMAINING_ARRAY_LAYERS)
}

/// Bytes per pixel of the linear formats the staging pool deals in
fn format_pixel_size(format: vk::Format) -> usize {
    match format {
        vk::Format::R8_UNORM => 1,
        vk::Format::R8G8_UNORM => 2,
        vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        vk::Format::D32_SFLOAT => 4,
        _ => 4,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_follows_feature_flag() {
        let config = RuntimeConfig::default();
        assert_eq!(config.enable_validation, cfg!(feature = "vulkan-validation"));
        assert!(!config.panic_on_validation_error);
    }

    #[test]
    fn test_format_pixel_size() {
        assert_eq!(format_pixel_size(vk::Format::R8_UNORM), 1);
        assert_eq!(format_pixel_size(vk::Format::R8G8B8A8_UNORM), 4);
        assert_eq!(format_pixel_size(vk::Format::B8G8R8A8_UNORM), 4);
        assert_eq!(format_pixel_size(vk::Format::R16G16B16A16_SFLOAT), 8);
        assert_eq!(format_pixel_size(vk::Format::R32G32B32A32_SFLOAT), 16);
    }

    #[test]
    fn test_full_color_subresources_cover_whole_image() {
        let range = full_color_subresources();
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(range.layer_count, vk::REMAINING_ARRAY_LAYERS);
    }
}
