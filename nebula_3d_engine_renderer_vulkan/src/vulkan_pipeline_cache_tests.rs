use super::*;
use ash::vk::Handle;

fn shader(raw: u64) -> vk::ShaderModule {
    vk::ShaderModule::from_raw(raw)
}

fn image_info(view: u64) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .sampler(vk::Sampler::from_raw(0x1000))
        .image_view(vk::ImageView::from_raw(view))
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
}

// ============================================================================
// Pipeline state
// ============================================================================

#[test]
fn test_missing_shaders_is_a_precondition_error() {
    let cache = VulkanPipelineCache::new();
    assert!(matches!(
        cache.ensure_shaders_bound(),
        Err(Error::InvalidPrecondition(_))
    ));
}

#[test]
fn test_partial_shaders_is_a_precondition_error() {
    let mut cache = VulkanPipelineCache::new();
    cache.bind_program([shader(0x10), vk::ShaderModule::null()]);
    assert!(matches!(
        cache.ensure_shaders_bound(),
        Err(Error::InvalidPrecondition(_))
    ));

    cache.bind_program([shader(0x10), shader(0x20)]);
    assert!(cache.ensure_shaders_bound().is_ok());
}

#[test]
fn test_pipeline_info_equality_covers_every_field() {
    let mut a = PipelineInfo::default();
    a.shaders = [shader(0x10), shader(0x20)];
    a.render_pass = vk::RenderPass::from_raw(0x30);

    let b = a.clone();
    assert!(a == b);

    let mut c = a.clone();
    c.subpass = 1;
    assert!(a != c);

    let mut d = a.clone();
    d.topology = vk::PrimitiveTopology::POINT_LIST;
    assert!(a != d);

    let mut e = a.clone();
    e.raster_state.blend_enable = true;
    assert!(a != e);
}

#[test]
fn test_bind_vertex_array_diffs() {
    let mut cache = VulkanPipelineCache::new();
    let attributes = [vk::VertexInputAttributeDescription {
        location: 0,
        binding: 0,
        format: vk::Format::R32G32B32_SFLOAT,
        offset: 0,
    }];
    let bindings = [vk::VertexInputBindingDescription {
        binding: 0,
        stride: 12,
        input_rate: vk::VertexInputRate::VERTEX,
    }];

    cache.bind_vertex_array(&attributes, &bindings);
    let before = cache.pipeline_info.clone();
    cache.bind_vertex_array(&attributes, &bindings);
    assert!(cache.pipeline_info == before);

    let wider = [vk::VertexInputBindingDescription {
        binding: 0,
        stride: 16,
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    cache.bind_vertex_array(&attributes, &wider);
    assert!(cache.pipeline_info != before);
}

// ============================================================================
// Descriptor state
// ============================================================================

#[test]
fn test_uniform_binding_out_of_range() {
    let mut cache = VulkanPipelineCache::new();
    let result = cache.bind_uniform_buffer(
        UBUFFER_BINDING_COUNT,
        vk::Buffer::from_raw(0x10),
        0,
        64,
    );
    assert!(matches!(result, Err(Error::InvalidPrecondition(_))));
}

#[test]
fn test_sampler_binding_out_of_range() {
    let mut cache = VulkanPipelineCache::new();
    assert!(matches!(
        cache.bind_sampler(SAMPLER_BINDING_COUNT, image_info(0x10)),
        Err(Error::InvalidPrecondition(_))
    ));
    assert!(matches!(
        cache.bind_input_attachment(TARGET_BINDING_COUNT, image_info(0x10)),
        Err(Error::InvalidPrecondition(_))
    ));
}

#[test]
fn test_descriptor_state_is_idempotent() {
    let mut cache = VulkanPipelineCache::new();
    cache
        .bind_uniform_buffer(0, vk::Buffer::from_raw(0x10), 0, 256)
        .unwrap();
    cache.bind_sampler(2, image_info(0x20)).unwrap();
    let first = cache.descriptor_info;

    cache
        .bind_uniform_buffer(0, vk::Buffer::from_raw(0x10), 0, 256)
        .unwrap();
    cache.bind_sampler(2, image_info(0x20)).unwrap();
    assert!(cache.descriptor_info == first);

    cache
        .bind_uniform_buffer(0, vk::Buffer::from_raw(0x10), 64, 256)
        .unwrap();
    assert!(cache.descriptor_info != first);
}

#[test]
fn test_unbind_uniform_buffer_scrubs_every_binding() {
    let mut cache = VulkanPipelineCache::new();
    let buffer = vk::Buffer::from_raw(0x10);
    cache.bind_uniform_buffer(0, buffer, 0, 64).unwrap();
    cache.bind_uniform_buffer(3, buffer, 64, 64).unwrap();
    cache
        .bind_uniform_buffer(1, vk::Buffer::from_raw(0x20), 0, 64)
        .unwrap();

    cache.unbind_uniform_buffer(buffer);
    assert_eq!(cache.descriptor_info.uniform_buffers[0], vk::Buffer::null());
    assert_eq!(cache.descriptor_info.uniform_buffers[3], vk::Buffer::null());
    assert_eq!(cache.descriptor_info.uniform_sizes[3], 0);
    assert_eq!(
        cache.descriptor_info.uniform_buffers[1],
        vk::Buffer::from_raw(0x20)
    );
}

#[test]
fn test_unbind_image_view_scrubs_samplers_and_inputs() {
    let mut cache = VulkanPipelineCache::new();
    cache.bind_sampler(0, image_info(0x10)).unwrap();
    cache.bind_sampler(5, image_info(0x10)).unwrap();
    cache.bind_sampler(1, image_info(0x20)).unwrap();
    cache.bind_input_attachment(0, image_info(0x10)).unwrap();

    cache.unbind_image_view(vk::ImageView::from_raw(0x10));
    assert_eq!(
        cache.descriptor_info.samplers[0].image_view,
        vk::ImageView::null()
    );
    assert_eq!(
        cache.descriptor_info.samplers[5].image_view,
        vk::ImageView::null()
    );
    assert_eq!(
        cache.descriptor_info.input_attachments[0].image_view,
        vk::ImageView::null()
    );
    assert_eq!(
        cache.descriptor_info.samplers[1].image_view,
        vk::ImageView::from_raw(0x20)
    );
}

// ============================================================================
// Slot rotation
// ============================================================================

#[test]
fn test_slot_rotation_clears_cached_bindings() {
    let mut cache = VulkanPipelineCache::new();
    cache.cmd_states[1].bound_pipeline = Some(vk::Pipeline::from_raw(0x10));
    cache.cmd_states[1].bound_descriptor = Some(DescriptorInfo::default());
    cache.cmd_states[1].scissor = Some(vk::Rect2D::default());

    cache.on_command_buffer(1);
    assert_eq!(cache.current_slot, 1);
    assert!(cache.cmd_states[1].bound_pipeline.is_none());
    assert!(cache.cmd_states[1].bound_descriptor.is_none());
    assert!(cache.cmd_states[1].scissor.is_none());
}

#[test]
fn test_slot_rotation_recycles_descriptor_sets() {
    let mut cache = VulkanPipelineCache::new();
    cache.cmd_states[2].acquired_sets.push([
        vk::DescriptorSet::from_raw(0x10),
        vk::DescriptorSet::from_raw(0x20),
        vk::DescriptorSet::from_raw(0x30),
    ]);
    cache.cmd_states[2].acquired_sets.push([
        vk::DescriptorSet::from_raw(0x40),
        vk::DescriptorSet::from_raw(0x50),
        vk::DescriptorSet::from_raw(0x60),
    ]);

    cache.on_command_buffer(2);
    assert!(cache.cmd_states[2].acquired_sets.is_empty());
    assert_eq!(cache.free_sets[UNIFORM_SET].len(), 2);
    assert_eq!(cache.free_sets[SAMPLER_SET].len(), 2);
    assert_eq!(cache.free_sets[INPUT_ATTACHMENT_SET].len(), 2);
    assert!(cache.free_sets[UNIFORM_SET].contains(&vk::DescriptorSet::from_raw(0x10)));
    assert!(cache.free_sets[SAMPLER_SET].contains(&vk::DescriptorSet::from_raw(0x50)));
}

#[test]
fn test_rotation_does_not_touch_other_slots() {
    let mut cache = VulkanPipelineCache::new();
    cache.cmd_states[0].bound_pipeline = Some(vk::Pipeline::from_raw(0x10));
    cache.on_command_buffer(1);
    assert_eq!(
        cache.cmd_states[0].bound_pipeline,
        Some(vk::Pipeline::from_raw(0x10))
    );
}

#[test]
fn test_creation_counters_start_at_zero() {
    let cache = VulkanPipelineCache::new();
    assert_eq!(cache.pipeline_creation_count(), 0);
    assert_eq!(cache.descriptor_set_creation_count(), 0);
}
