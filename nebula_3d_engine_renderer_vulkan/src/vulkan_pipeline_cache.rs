/// VulkanPipelineCache - pipeline, layout and descriptor set management
///
/// The cache tracks the pipeline and descriptor state requested by the
/// frontend through `bind_*` setters that diff field-wise, then builds
/// or reuses the native objects lazily at draw time. Bound state is
/// remembered per command buffer slot and cleared when the slot rotates,
/// so a recycled command buffer never inherits stale bindings.
///
/// Descriptor sets are allocated from one pool with the free flag and
/// recycled through per-type free lists when their slot rotates.

use ash::vk;
use nebula_3d_engine::engine_err;
use nebula_3d_engine::nebula3d::render::{
    COMMAND_BUFFER_COUNT, DESCRIPTOR_TYPE_COUNT, SAMPLER_BINDING_COUNT, SHADER_MODULE_COUNT,
    TARGET_BINDING_COUNT, UBUFFER_BINDING_COUNT,
};
use nebula_3d_engine::nebula3d::{Error, Result};

use crate::vulkan_context::VulkanContext;

/// Descriptor sets of each type kept in the pool per type
const DESCRIPTOR_POOL_CAPACITY: u32 = 400;

const UNIFORM_SET: usize = 0;
const SAMPLER_SET: usize = 1;
const INPUT_ATTACHMENT_SET: usize = 2;

/// Rasterization, blend and depth state of a pipeline, already mapped to
/// Vulkan enums
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct VulkanRasterState {
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias_constant: f32,
    pub depth_bias_slope: f32,
    pub blend_enable: bool,
    pub src_color_blend_factor: vk::BlendFactor,
    pub dst_color_blend_factor: vk::BlendFactor,
    pub src_alpha_blend_factor: vk::BlendFactor,
    pub dst_alpha_blend_factor: vk::BlendFactor,
    pub color_blend_op: vk::BlendOp,
    pub alpha_blend_op: vk::BlendOp,
    pub color_write_mask: vk::ColorComponentFlags,
    pub depth_write_enable: bool,
    pub depth_compare_op: vk::CompareOp,
    pub alpha_to_coverage: bool,
    pub rasterization_samples: vk::SampleCountFlags,
    pub color_target_count: u32,
}

impl Default for VulkanRasterState {
    fn default() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias_constant: 0.0,
            depth_bias_slope: 0.0,
            blend_enable: false,
            src_color_blend_factor: vk::BlendFactor::ONE,
            dst_color_blend_factor: vk::BlendFactor::ZERO,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            color_blend_op: vk::BlendOp::ADD,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
            depth_write_enable: true,
            depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
            alpha_to_coverage: false,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            color_target_count: 1,
        }
    }
}

/// Requested pipeline state, diffed against the previous request
#[derive(Clone)]
struct PipelineInfo {
    shaders: [vk::ShaderModule; SHADER_MODULE_COUNT],
    raster_state: VulkanRasterState,
    render_pass: vk::RenderPass,
    subpass: u32,
    topology: vk::PrimitiveTopology,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
}

impl Default for PipelineInfo {
    fn default() -> Self {
        Self {
            shaders: [vk::ShaderModule::null(); SHADER_MODULE_COUNT],
            raster_state: VulkanRasterState::default(),
            render_pass: vk::RenderPass::null(),
            subpass: 0,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            vertex_attributes: Vec::new(),
            vertex_bindings: Vec::new(),
        }
    }
}

fn attribute_eq(
    a: &vk::VertexInputAttributeDescription,
    b: &vk::VertexInputAttributeDescription,
) -> bool {
    a.location == b.location && a.binding == b.binding && a.format == b.format && a.offset == b.offset
}

fn binding_eq(
    a: &vk::VertexInputBindingDescription,
    b: &vk::VertexInputBindingDescription,
) -> bool {
    a.binding == b.binding && a.stride == b.stride && a.input_rate == b.input_rate
}

impl PartialEq for PipelineInfo {
    fn eq(&self, other: &Self) -> bool {
        self.shaders == other.shaders
            && self.raster_state == other.raster_state
            && self.render_pass == other.render_pass
            && self.subpass == other.subpass
            && self.topology == other.topology
            && self.vertex_attributes.len() == other.vertex_attributes.len()
            && self.vertex_bindings.len() == other.vertex_bindings.len()
            && self
                .vertex_attributes
                .iter()
                .zip(&other.vertex_attributes)
                .all(|(a, b)| attribute_eq(a, b))
            && self
                .vertex_bindings
                .iter()
                .zip(&other.vertex_bindings)
                .all(|(a, b)| binding_eq(a, b))
    }
}

fn image_info_eq(a: &vk::DescriptorImageInfo, b: &vk::DescriptorImageInfo) -> bool {
    a.sampler == b.sampler && a.image_view == b.image_view && a.image_layout == b.image_layout
}

/// Requested descriptor state
#[derive(Clone, Copy)]
struct DescriptorInfo {
    uniform_buffers: [vk::Buffer; UBUFFER_BINDING_COUNT],
    uniform_offsets: [vk::DeviceSize; UBUFFER_BINDING_COUNT],
    uniform_sizes: [vk::DeviceSize; UBUFFER_BINDING_COUNT],
    samplers: [vk::DescriptorImageInfo; SAMPLER_BINDING_COUNT],
    input_attachments: [vk::DescriptorImageInfo; TARGET_BINDING_COUNT],
}

impl Default for DescriptorInfo {
    fn default() -> Self {
        Self {
            uniform_buffers: [vk::Buffer::null(); UBUFFER_BINDING_COUNT],
            uniform_offsets: [0; UBUFFER_BINDING_COUNT],
            uniform_sizes: [0; UBUFFER_BINDING_COUNT],
            samplers: [vk::DescriptorImageInfo::default(); SAMPLER_BINDING_COUNT],
            input_attachments: [vk::DescriptorImageInfo::default(); TARGET_BINDING_COUNT],
        }
    }
}

impl PartialEq for DescriptorInfo {
    fn eq(&self, other: &Self) -> bool {
        self.uniform_buffers == other.uniform_buffers
            && self.uniform_offsets == other.uniform_offsets
            && self.uniform_sizes == other.uniform_sizes
            && self
                .samplers
                .iter()
                .zip(&other.samplers)
                .all(|(a, b)| image_info_eq(a, b))
            && self
                .input_attachments
                .iter()
                .zip(&other.input_attachments)
                .all(|(a, b)| image_info_eq(a, b))
    }
}

/// Native state bound on one command buffer slot
#[derive(Default)]
struct CmdBufferState {
    bound_pipeline: Option<vk::Pipeline>,
    bound_descriptor: Option<DescriptorInfo>,
    scissor: Option<vk::Rect2D>,
    /// Descriptor sets written for this slot, recycled on rotation
    acquired_sets: Vec<[vk::DescriptorSet; DESCRIPTOR_TYPE_COUNT]>,
}

impl CmdBufferState {
    fn clear(&mut self) -> Vec<[vk::DescriptorSet; DESCRIPTOR_TYPE_COUNT]> {
        self.bound_pipeline = None;
        self.bound_descriptor = None;
        self.scissor = None;
        std::mem::take(&mut self.acquired_sets)
    }
}

struct Layouts {
    descriptor_set_layouts: [vk::DescriptorSetLayout; DESCRIPTOR_TYPE_COUNT],
    pipeline_layout: vk::PipelineLayout,
    descriptor_pool: vk::DescriptorPool,
}

pub struct VulkanPipelineCache {
    pipeline_info: PipelineInfo,
    descriptor_info: DescriptorInfo,
    current_slot: usize,
    cmd_states: Vec<CmdBufferState>,
    pipelines: Vec<(PipelineInfo, vk::Pipeline)>,
    free_sets: [Vec<vk::DescriptorSet>; DESCRIPTOR_TYPE_COUNT],
    layouts: Option<Layouts>,
    pipelines_created: usize,
    descriptor_sets_created: usize,
}

impl VulkanPipelineCache {
    pub fn new() -> Self {
        let mut cmd_states = Vec::with_capacity(COMMAND_BUFFER_COUNT);
        cmd_states.resize_with(COMMAND_BUFFER_COUNT, CmdBufferState::default);
        Self {
            pipeline_info: PipelineInfo::default(),
            descriptor_info: DescriptorInfo::default(),
            current_slot: 0,
            cmd_states,
            pipelines: Vec::new(),
            free_sets: Default::default(),
            layouts: None,
            pipelines_created: 0,
            descriptor_sets_created: 0,
        }
    }

    /// Slot rotation hook: clears the slot's cached bindings and recycles
    /// its descriptor sets
    pub fn on_command_buffer(&mut self, slot: usize) {
        self.current_slot = slot;
        for sets in self.cmd_states[slot].clear() {
            for (type_index, set) in sets.iter().enumerate() {
                self.free_sets[type_index].push(*set);
            }
        }
    }

    // ------------------------------------------------------------------------
    // State setters, all diffing
    // ------------------------------------------------------------------------

    pub fn bind_program(&mut self, shaders: [vk::ShaderModule; SHADER_MODULE_COUNT]) {
        self.pipeline_info.shaders = shaders;
    }

    pub fn bind_raster_state(&mut self, raster_state: VulkanRasterState) {
        if self.pipeline_info.raster_state != raster_state {
            self.pipeline_info.raster_state = raster_state;
        }
    }

    pub fn bind_render_pass(&mut self, render_pass: vk::RenderPass, subpass: u32) {
        self.pipeline_info.render_pass = render_pass;
        self.pipeline_info.subpass = subpass;
    }

    pub fn bind_topology(&mut self, topology: vk::PrimitiveTopology) {
        self.pipeline_info.topology = topology;
    }

    pub fn bind_vertex_array(
        &mut self,
        attributes: &[vk::VertexInputAttributeDescription],
        bindings: &[vk::VertexInputBindingDescription],
    ) {
        let changed = self.pipeline_info.vertex_attributes.len() != attributes.len()
            || self.pipeline_info.vertex_bindings.len() != bindings.len()
            || !self
                .pipeline_info
                .vertex_attributes
                .iter()
                .zip(attributes)
                .all(|(a, b)| attribute_eq(a, b))
            || !self
                .pipeline_info
                .vertex_bindings
                .iter()
                .zip(bindings)
                .all(|(a, b)| binding_eq(a, b));
        if changed {
            self.pipeline_info.vertex_attributes = attributes.to_vec();
            self.pipeline_info.vertex_bindings = bindings.to_vec();
        }
    }

    pub fn bind_uniform_buffer(
        &mut self,
        binding: usize,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<()> {
        if binding >= UBUFFER_BINDING_COUNT {
            return Err(Error::InvalidPrecondition(format!(
                "Uniform buffer binding {} out of range",
                binding
            )));
        }
        self.descriptor_info.uniform_buffers[binding] = buffer;
        self.descriptor_info.uniform_offsets[binding] = offset;
        self.descriptor_info.uniform_sizes[binding] = size;
        Ok(())
    }

    /// Scrub a destroyed buffer from the pending descriptor state
    pub fn unbind_uniform_buffer(&mut self, buffer: vk::Buffer) {
        for binding in 0..UBUFFER_BINDING_COUNT {
            if self.descriptor_info.uniform_buffers[binding] == buffer {
                self.descriptor_info.uniform_buffers[binding] = vk::Buffer::null();
                self.descriptor_info.uniform_offsets[binding] = 0;
                self.descriptor_info.uniform_sizes[binding] = 0;
            }
        }
    }

    pub fn bind_sampler(
        &mut self,
        binding: usize,
        image_info: vk::DescriptorImageInfo,
    ) -> Result<()> {
        if binding >= SAMPLER_BINDING_COUNT {
            return Err(Error::InvalidPrecondition(format!(
                "Sampler binding {} out of range",
                binding
            )));
        }
        self.descriptor_info.samplers[binding] = image_info;
        Ok(())
    }

    pub fn bind_input_attachment(
        &mut self,
        binding: usize,
        image_info: vk::DescriptorImageInfo,
    ) -> Result<()> {
        if binding >= TARGET_BINDING_COUNT {
            return Err(Error::InvalidPrecondition(format!(
                "Input attachment binding {} out of range",
                binding
            )));
        }
        self.descriptor_info.input_attachments[binding] = image_info;
        Ok(())
    }

    /// Scrub a destroyed image view from the pending descriptor state
    pub fn unbind_image_view(&mut self, view: vk::ImageView) {
        for info in self.descriptor_info.samplers.iter_mut() {
            if info.image_view == view {
                *info = vk::DescriptorImageInfo::default();
            }
        }
        for info in self.descriptor_info.input_attachments.iter_mut() {
            if info.image_view == view {
                *info = vk::DescriptorImageInfo::default();
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lazy native binding
    // ------------------------------------------------------------------------

    /// Set the scissor on the current command buffer if it changed
    pub fn bind_scissor(
        &mut self,
        context: &VulkanContext,
        cmdbuffer: vk::CommandBuffer,
        scissor: vk::Rect2D,
    ) {
        let state = &mut self.cmd_states[self.current_slot];
        if state.scissor == Some(scissor) {
            return;
        }
        state.scissor = Some(scissor);
        unsafe {
            context.device.cmd_set_scissor(cmdbuffer, 0, &[scissor]);
        }
    }

    /// Bind the pipeline matching the requested state, building it on a
    /// cache miss
    pub fn bind_pipeline(
        &mut self,
        context: &VulkanContext,
        cmdbuffer: vk::CommandBuffer,
    ) -> Result<()> {
        self.ensure_shaders_bound()?;

        let pipeline_layout = self.layouts(context)?.pipeline_layout;
        let pipeline = match self
            .pipelines
            .iter()
            .find(|(info, _)| *info == self.pipeline_info)
        {
            Some((_, pipeline)) => *pipeline,
            None => {
                let pipeline = create_pipeline(context, pipeline_layout, &self.pipeline_info)?;
                self.pipelines.push((self.pipeline_info.clone(), pipeline));
                self.pipelines_created += 1;
                pipeline
            }
        };

        let state = &mut self.cmd_states[self.current_slot];
        if state.bound_pipeline == Some(pipeline) {
            return Ok(());
        }
        state.bound_pipeline = Some(pipeline);
        unsafe {
            context
                .device
                .cmd_bind_pipeline(cmdbuffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
        Ok(())
    }

    /// Write and bind descriptor sets for the requested descriptor state,
    /// skipping the work when the slot already has them bound
    pub fn bind_descriptor_sets(
        &mut self,
        context: &VulkanContext,
        cmdbuffer: vk::CommandBuffer,
    ) -> Result<()> {
        if self.cmd_states[self.current_slot]
            .bound_descriptor
            .as_ref()
            .is_some_and(|bound| *bound == self.descriptor_info)
        {
            return Ok(());
        }

        let sets = self.acquire_descriptor_sets(context)?;
        self.write_descriptor_sets(context, &sets);

        let layouts = self.layouts.as_ref().unwrap();
        unsafe {
            context.device.cmd_bind_descriptor_sets(
                cmdbuffer,
                vk::PipelineBindPoint::GRAPHICS,
                layouts.pipeline_layout,
                0,
                &sets,
                &[],
            );
        }

        let state = &mut self.cmd_states[self.current_slot];
        state.bound_descriptor = Some(self.descriptor_info);
        state.acquired_sets.push(sets);
        Ok(())
    }

    pub fn pipeline_creation_count(&self) -> usize {
        self.pipelines_created
    }

    pub fn descriptor_set_creation_count(&self) -> usize {
        self.descriptor_sets_created
    }

    /// Terminal release of every native object owned by the cache
    pub fn destroy_cache(&mut self, context: &VulkanContext) {
        unsafe {
            for (_, pipeline) in self.pipelines.drain(..) {
                context.device.destroy_pipeline(pipeline, None);
            }
            if let Some(layouts) = self.layouts.take() {
                context
                    .device
                    .destroy_descriptor_pool(layouts.descriptor_pool, None);
                context
                    .device
                    .destroy_pipeline_layout(layouts.pipeline_layout, None);
                for layout in layouts.descriptor_set_layouts {
                    context.device.destroy_descriptor_set_layout(layout, None);
                }
            }
        }
        for free in self.free_sets.iter_mut() {
            free.clear();
        }
        for state in self.cmd_states.iter_mut() {
            state.clear();
        }
    }

    fn ensure_shaders_bound(&self) -> Result<()> {
        if self
            .pipeline_info
            .shaders
            .iter()
            .any(|s| *s == vk::ShaderModule::null())
        {
            return Err(Error::InvalidPrecondition(
                "Draw without bound vertex and fragment shaders".to_string(),
            ));
        }
        Ok(())
    }

    fn layouts(&mut self, context: &VulkanContext) -> Result<&Layouts> {
        if self.layouts.is_none() {
            self.layouts = Some(create_layouts(context)?);
        }
        Ok(self.layouts.as_ref().unwrap())
    }

    fn acquire_descriptor_sets(
        &mut self,
        context: &VulkanContext,
    ) -> Result<[vk::DescriptorSet; DESCRIPTOR_TYPE_COUNT]> {
        self.layouts(context)?;
        let layouts = self.layouts.as_ref().unwrap();

        let mut sets = [vk::DescriptorSet::null(); DESCRIPTOR_TYPE_COUNT];
        for type_index in 0..DESCRIPTOR_TYPE_COUNT {
            if let Some(set) = self.free_sets[type_index].pop() {
                sets[type_index] = set;
                continue;
            }
            let set_layouts = [layouts.descriptor_set_layouts[type_index]];
            let alloc_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(layouts.descriptor_pool)
                .set_layouts(&set_layouts);
            let allocated = unsafe {
                context.device.allocate_descriptor_sets(&alloc_info).map_err(|e| {
                    engine_err!("nebula3d::vulkan", "Failed to allocate descriptor set: {:?}", e)
                })?
            };
            sets[type_index] = allocated[0];
            self.descriptor_sets_created += 1;
        }
        Ok(sets)
    }

    fn write_descriptor_sets(
        &self,
        context: &VulkanContext,
        sets: &[vk::DescriptorSet; DESCRIPTOR_TYPE_COUNT],
    ) {
        let mut buffer_infos: Vec<vk::DescriptorBufferInfo> = Vec::new();
        let mut buffer_bindings: Vec<u32> = Vec::new();
        for binding in 0..UBUFFER_BINDING_COUNT {
            let buffer = self.descriptor_info.uniform_buffers[binding];
            if buffer == vk::Buffer::null() {
                continue;
            }
            let size = self.descriptor_info.uniform_sizes[binding];
            buffer_infos.push(
                vk::DescriptorBufferInfo::default()
                    .buffer(buffer)
                    .offset(self.descriptor_info.uniform_offsets[binding])
                    .range(if size == 0 { vk::WHOLE_SIZE } else { size }),
            );
            buffer_bindings.push(binding as u32);
        }

        let mut writes: Vec<vk::WriteDescriptorSet> = Vec::new();
        for (index, binding) in buffer_bindings.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(sets[UNIFORM_SET])
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(&buffer_infos[index])),
            );
        }
        for (binding, info) in self.descriptor_info.samplers.iter().enumerate() {
            if info.image_view == vk::ImageView::null() {
                continue;
            }
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(sets[SAMPLER_SET])
                    .dst_binding(binding as u32)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info)),
            );
        }
        for (binding, info) in self.descriptor_info.input_attachments.iter().enumerate() {
            if info.image_view == vk::ImageView::null() {
                continue;
            }
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(sets[INPUT_ATTACHMENT_SET])
                    .dst_binding(binding as u32)
                    .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
                    .image_info(std::slice::from_ref(info)),
            );
        }

        unsafe {
            context.device.update_descriptor_sets(&writes, &[]);
        }
    }
}

fn create_layouts(context: &VulkanContext) -> Result<Layouts> {
    let make_layout = |bindings: &[vk::DescriptorSetLayoutBinding]| -> Result<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        unsafe {
            context
                .device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(|e| {
                    engine_err!(
                        "nebula3d::vulkan",
                        "Failed to create descriptor set layout: {:?}",
                        e
                    )
                })
        }
    };

    let uniform_bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..UBUFFER_BINDING_COUNT)
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding as u32)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL_GRAPHICS)
        })
        .collect();
    let sampler_bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..SAMPLER_BINDING_COUNT)
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding as u32)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        })
        .collect();
    let input_attachment_bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..TARGET_BINDING_COUNT)
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding as u32)
                .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        })
        .collect();

    let descriptor_set_layouts = [
        make_layout(&uniform_bindings)?,
        make_layout(&sampler_bindings)?,
        make_layout(&input_attachment_bindings)?,
    ];

    let layout_info =
        vk::PipelineLayoutCreateInfo::default().set_layouts(&descriptor_set_layouts);
    let pipeline_layout = unsafe {
        context
            .device
            .create_pipeline_layout(&layout_info, None)
            .map_err(|e| {
                engine_err!("nebula3d::vulkan", "Failed to create pipeline layout: {:?}", e)
            })?
    };

    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: DESCRIPTOR_POOL_CAPACITY * UBUFFER_BINDING_COUNT as u32,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: DESCRIPTOR_POOL_CAPACITY * SAMPLER_BINDING_COUNT as u32,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::INPUT_ATTACHMENT,
            descriptor_count: DESCRIPTOR_POOL_CAPACITY * TARGET_BINDING_COUNT as u32,
        },
    ];
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(DESCRIPTOR_POOL_CAPACITY * DESCRIPTOR_TYPE_COUNT as u32)
        .pool_sizes(&pool_sizes);
    let descriptor_pool = unsafe {
        context
            .device
            .create_descriptor_pool(&pool_info, None)
            .map_err(|e| {
                engine_err!("nebula3d::vulkan", "Failed to create descriptor pool: {:?}", e)
            })?
    };

    Ok(Layouts {
        descriptor_set_layouts,
        pipeline_layout,
        descriptor_pool,
    })
}

fn create_pipeline(
    context: &VulkanContext,
    layout: vk::PipelineLayout,
    info: &PipelineInfo,
) -> Result<vk::Pipeline> {
    let raster = &info.raster_state;

    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(info.shaders[0])
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(info.shaders[1])
            .name(c"main"),
    ];

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&info.vertex_bindings)
        .vertex_attribute_descriptions(&info.vertex_attributes);

    let input_assembly =
        vk::PipelineInputAssemblyStateCreateInfo::default().topology(info.topology);

    // Viewport and scissor are dynamic
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let depth_bias_enable = raster.depth_bias_constant != 0.0 || raster.depth_bias_slope != 0.0;
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(raster.cull_mode)
        .front_face(raster.front_face)
        .depth_bias_enable(depth_bias_enable)
        .depth_bias_constant_factor(raster.depth_bias_constant)
        .depth_bias_slope_factor(raster.depth_bias_slope)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(raster.rasterization_samples)
        .alpha_to_coverage_enable(raster.alpha_to_coverage);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(raster.depth_write_enable)
        .depth_compare_op(raster.depth_compare_op);

    let blend_attachment = vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(raster.blend_enable)
        .src_color_blend_factor(raster.src_color_blend_factor)
        .dst_color_blend_factor(raster.dst_color_blend_factor)
        .color_blend_op(raster.color_blend_op)
        .src_alpha_blend_factor(raster.src_alpha_blend_factor)
        .dst_alpha_blend_factor(raster.dst_alpha_blend_factor)
        .alpha_blend_op(raster.alpha_blend_op)
        .color_write_mask(raster.color_write_mask);
    let blend_attachments = vec![blend_attachment; raster.color_target_count as usize];
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(info.render_pass)
        .subpass(info.subpass);

    let pipelines = unsafe {
        context
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
            .map_err(|(_, e)| {
                engine_err!("nebula3d::vulkan", "Failed to create graphics pipeline: {:?}", e)
            })?
    };
    Ok(pipelines[0])
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "vulkan_pipeline_cache_tests.rs"]
mod tests;
