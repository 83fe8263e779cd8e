/// VulkanFramebufferCache - per-swap-index render pass and framebuffer cache
///
/// Render passes and framebuffers are cached per swapchain image index and
/// recreated only when the requested pass or attachment set differs from
/// the cached one. Attachment load/store ops are derived from the render
/// pass clear/discard flags and the sample count. When `subpass_mask` is
/// non-zero a second subpass is added that reads the masked color
/// attachments back as input attachments.

use ash::vk;
use nebula_3d_engine::engine_err;
use nebula_3d_engine::nebula3d::render::{
    TargetBufferFlags, COMMAND_BUFFER_COUNT, MAX_SUPPORTED_RENDER_TARGET_COUNT,
};
use nebula_3d_engine::nebula3d::Result;

use crate::vulkan_context::VulkanContext;

/// Number of gc cycles an unused cache entry survives
const TIME_BEFORE_EVICTION: u64 = COMMAND_BUFFER_COUNT as u64;

/// Value key describing a render pass
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct RenderPassInfo {
    pub color_formats: [vk::Format; MAX_SUPPORTED_RENDER_TARGET_COUNT],
    pub depth_format: vk::Format,
    pub clear: TargetBufferFlags,
    pub discard_start: TargetBufferFlags,
    pub discard_end: TargetBufferFlags,
    pub samples: u8,
    /// Bit i set when color attachment i has a resolve attachment
    pub needs_resolve_mask: u8,
    /// Bit i set when color attachment i is read back in a second subpass
    pub subpass_mask: u32,
}

impl Default for RenderPassInfo {
    fn default() -> Self {
        Self {
            color_formats: [vk::Format::UNDEFINED; MAX_SUPPORTED_RENDER_TARGET_COUNT],
            depth_format: vk::Format::UNDEFINED,
            clear: TargetBufferFlags::empty(),
            discard_start: TargetBufferFlags::empty(),
            discard_end: TargetBufferFlags::empty(),
            samples: 1,
            needs_resolve_mask: 0,
            subpass_mask: 0,
        }
    }
}

/// Value key describing a framebuffer over a cached render pass
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct FramebufferInfo {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub color: [vk::ImageView; MAX_SUPPORTED_RENDER_TARGET_COUNT],
    pub resolve: [vk::ImageView; MAX_SUPPORTED_RENDER_TARGET_COUNT],
    pub depth: vk::ImageView,
}

impl Default for FramebufferInfo {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            layers: 1,
            color: [vk::ImageView::null(); MAX_SUPPORTED_RENDER_TARGET_COUNT],
            resolve: [vk::ImageView::null(); MAX_SUPPORTED_RENDER_TARGET_COUNT],
            depth: vk::ImageView::null(),
        }
    }
}

/// Attachment load op from the clear/discard flags of one target buffer
fn load_op(clear: bool, discard: bool) -> vk::AttachmentLoadOp {
    if clear {
        vk::AttachmentLoadOp::CLEAR
    } else if discard {
        vk::AttachmentLoadOp::DONT_CARE
    } else {
        vk::AttachmentLoadOp::LOAD
    }
}

/// Multisampled color is resolved, not stored
fn color_store_op(samples: u8) -> vk::AttachmentStoreOp {
    if samples == 1 {
        vk::AttachmentStoreOp::STORE
    } else {
        vk::AttachmentStoreOp::DONT_CARE
    }
}

/// For each populated color slot, in attachment order, whether the
/// second subpass reads it back as an input attachment. The mask is
/// keyed by slot index, so sparse targets keep their bits aligned after
/// unpopulated slots are compacted away.
fn input_read_flags(
    color_formats: &[vk::Format; MAX_SUPPORTED_RENDER_TARGET_COUNT],
    subpass_mask: u32,
) -> Vec<bool> {
    color_formats
        .iter()
        .enumerate()
        .filter(|(_, format)| **format != vk::Format::UNDEFINED)
        .map(|(slot, _)| subpass_mask & (1 << slot) != 0)
        .collect()
}

struct CacheEntry {
    render_pass_info: RenderPassInfo,
    framebuffer_info: FramebufferInfo,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    last_used: u64,
}

pub struct VulkanFramebufferCache {
    entries: Vec<Option<CacheEntry>>,
    current_frame: u64,
}

impl VulkanFramebufferCache {
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(COMMAND_BUFFER_COUNT);
        entries.resize_with(COMMAND_BUFFER_COUNT, || None);
        Self {
            entries,
            current_frame: 0,
        }
    }

    /// Get the cached render pass and framebuffer for `swap_index`,
    /// creating or recreating them when the keys differ.
    pub fn get(
        &mut self,
        context: &VulkanContext,
        swap_index: usize,
        render_pass_info: &RenderPassInfo,
        framebuffer_info: &FramebufferInfo,
    ) -> Result<(vk::RenderPass, vk::Framebuffer)> {
        if swap_index >= self.entries.len() {
            return Err(engine_err!(
                "nebula3d::vulkan",
                "Swap image index {} out of range",
                swap_index
            ));
        }

        if let Some(entry) = &mut self.entries[swap_index] {
            if entry.render_pass_info == *render_pass_info
                && entry.framebuffer_info == *framebuffer_info
            {
                entry.last_used = self.current_frame;
                return Ok((entry.render_pass, entry.framebuffer));
            }
        }
        if let Some(stale) = self.entries[swap_index].take() {
            destroy_entry(context, stale);
        }

        let render_pass = create_render_pass(context, render_pass_info)?;
        let framebuffer =
            match create_framebuffer(context, render_pass, render_pass_info, framebuffer_info) {
                Ok(framebuffer) => framebuffer,
                Err(e) => {
                    unsafe { context.device.destroy_render_pass(render_pass, None) };
                    return Err(e);
                }
            };

        self.entries[swap_index] = Some(CacheEntry {
            render_pass_info: *render_pass_info,
            framebuffer_info: *framebuffer_info,
            render_pass,
            framebuffer,
            last_used: self.current_frame,
        });
        Ok((render_pass, framebuffer))
    }

    /// Destroy entries that have not been used for a full ring of frames
    pub fn gc(&mut self, context: &VulkanContext) {
        self.current_frame += 1;
        if self.current_frame <= TIME_BEFORE_EVICTION {
            return;
        }
        let evict_time = self.current_frame - TIME_BEFORE_EVICTION;
        for slot in &mut self.entries {
            if slot.as_ref().is_some_and(|e| e.last_used < evict_time) {
                destroy_entry(context, slot.take().unwrap());
            }
        }
    }

    /// Drop every cached pass, called when the swap chain is rebuilt
    pub fn reset(&mut self, context: &VulkanContext) {
        for slot in &mut self.entries {
            if let Some(entry) = slot.take() {
                destroy_entry(context, entry);
            }
        }
    }
}

fn destroy_entry(context: &VulkanContext, entry: CacheEntry) {
    unsafe {
        context.device.destroy_framebuffer(entry.framebuffer, None);
        context.device.destroy_render_pass(entry.render_pass, None);
    }
}

fn create_render_pass(
    context: &VulkanContext,
    info: &RenderPassInfo,
) -> Result<vk::RenderPass> {
    let has_subpass = info.subpass_mask != 0;
    let samples = vk::SampleCountFlags::from_raw(info.samples as u32);
    let input_flags = input_read_flags(&info.color_formats, info.subpass_mask);

    let mut attachments: Vec<vk::AttachmentDescription> = Vec::new();
    let mut color_refs: Vec<vk::AttachmentReference> = Vec::new();
    let mut resolve_refs: Vec<vk::AttachmentReference> = Vec::new();
    let mut has_resolve = false;

    for (index, format) in info.color_formats.iter().enumerate() {
        if *format == vk::Format::UNDEFINED {
            continue;
        }
        let flag = TargetBufferFlags::color(index);
        let load = load_op(
            info.clear.contains(flag),
            info.discard_start.contains(flag),
        );
        let initial_layout = if load == vk::AttachmentLoadOp::LOAD {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::UNDEFINED
        };
        color_refs.push(
            vk::AttachmentReference::default()
                .attachment(attachments.len() as u32)
                .layout(if has_subpass && input_flags[color_refs.len()] {
                    // Read back as input attachment in the second subpass
                    vk::ImageLayout::GENERAL
                } else {
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                }),
        );
        attachments.push(
            vk::AttachmentDescription::default()
                .format(*format)
                .samples(samples)
                .load_op(load)
                .store_op(color_store_op(info.samples))
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(initial_layout)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        );
    }

    // Resolve attachments mirror the color reference list; unresolved
    // slots are marked unused
    for (index, format) in info.color_formats.iter().enumerate() {
        if *format == vk::Format::UNDEFINED {
            continue;
        }
        if info.needs_resolve_mask & (1 << index) == 0 {
            resolve_refs.push(
                vk::AttachmentReference::default()
                    .attachment(vk::ATTACHMENT_UNUSED)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            );
            continue;
        }
        has_resolve = true;
        resolve_refs.push(
            vk::AttachmentReference::default()
                .attachment(attachments.len() as u32)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        );
        attachments.push(
            vk::AttachmentDescription::default()
                .format(*format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        );
    }

    let mut depth_ref = vk::AttachmentReference::default();
    let has_depth = info.depth_format != vk::Format::UNDEFINED;
    if has_depth {
        let load = load_op(
            info.clear.contains(TargetBufferFlags::DEPTH),
            info.discard_start.contains(TargetBufferFlags::DEPTH),
        );
        let initial_layout = if load == vk::AttachmentLoadOp::LOAD {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::UNDEFINED
        };
        depth_ref = vk::AttachmentReference::default()
            .attachment(attachments.len() as u32)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        attachments.push(
            vk::AttachmentDescription::default()
                .format(info.depth_format)
                .samples(samples)
                .load_op(load)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(initial_layout)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
    }

    let mut subpass0 = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if has_resolve {
        subpass0 = subpass0.resolve_attachments(&resolve_refs);
    }
    if has_depth {
        subpass0 = subpass0.depth_stencil_attachment(&depth_ref);
    }

    // Second subpass reads the masked colors back as input attachments
    // while keeping the full color attachment set writable
    let mut input_refs: Vec<vk::AttachmentReference> = Vec::new();
    let mut subpasses = vec![subpass0];
    if has_subpass {
        for (position, reference) in color_refs.iter().enumerate() {
            if input_flags[position] {
                input_refs.push(
                    vk::AttachmentReference::default()
                        .attachment(reference.attachment)
                        .layout(vk::ImageLayout::GENERAL),
                );
            }
        }
        let mut subpass1 = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .input_attachments(&input_refs)
            .color_attachments(&color_refs);
        if has_depth {
            subpass1 = subpass1.depth_stencil_attachment(&depth_ref);
        }
        subpasses.push(subpass1);
    }

    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(0)
        .dst_subpass(1)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .dst_access_mask(vk::AccessFlags::INPUT_ATTACHMENT_READ)
        .dependency_flags(vk::DependencyFlags::BY_REGION)];

    let mut create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses);
    if has_subpass {
        create_info = create_info.dependencies(&dependencies);
    }

    unsafe {
        context
            .device
            .create_render_pass(&create_info, None)
            .map_err(|e| engine_err!("nebula3d::vulkan", "Failed to create render pass: {:?}", e))
    }
}

fn create_framebuffer(
    context: &VulkanContext,
    render_pass: vk::RenderPass,
    render_pass_info: &RenderPassInfo,
    info: &FramebufferInfo,
) -> Result<vk::Framebuffer> {
    // Attachment order must match create_render_pass: colors, resolves,
    // depth
    let mut attachments: Vec<vk::ImageView> = Vec::new();
    for (index, format) in render_pass_info.color_formats.iter().enumerate() {
        if *format != vk::Format::UNDEFINED {
            attachments.push(info.color[index]);
        }
    }
    for (index, format) in render_pass_info.color_formats.iter().enumerate() {
        if *format != vk::Format::UNDEFINED
            && render_pass_info.needs_resolve_mask & (1 << index) != 0
        {
            attachments.push(info.resolve[index]);
        }
    }
    if render_pass_info.depth_format != vk::Format::UNDEFINED {
        attachments.push(info.depth);
    }

    let create_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(&attachments)
        .width(info.width)
        .height(info.height)
        .layers(info.layers);

    unsafe {
        context
            .device
            .create_framebuffer(&create_info, None)
            .map_err(|e| engine_err!("nebula3d::vulkan", "Failed to create framebuffer: {:?}", e))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "vulkan_framebuffer_cache_tests.rs"]
mod tests;
