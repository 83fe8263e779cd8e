//! Integration tests for the VulkanRuntime backend
//!
//! All tests require a GPU and are marked with #[ignore].
//!
//! Run with: cargo test --test vulkan_runtime_tests -- --ignored

use nebula_3d_engine::nebula3d::render::{
    BufferDescriptor, FaceOffsets, PixelBufferDescriptor, PixelDataFormat, PixelDataType,
    RenderPassFlags, RenderPassParams, SamplerParams, SamplerType, TargetBufferFlags,
    TextureFormat, TextureUsage, MAX_SUPPORTED_RENDER_TARGET_COUNT,
};
use nebula_3d_engine_renderer_vulkan::{RuntimeConfig, VulkanAttachment, VulkanRuntime};
use winit::event_loop::EventLoop;
use winit::window::Window;

/// Helper to create a test window for Vulkan
#[allow(deprecated)]
fn create_test_window() -> (Window, EventLoop<()>) {
    let event_loop = EventLoop::new().unwrap();
    let window_attrs = Window::default_attributes()
        .with_title("Vulkan Runtime Test")
        .with_inner_size(winit::dpi::LogicalSize::new(800, 600))
        .with_visible(false); // Hidden window for tests
    let window = event_loop.create_window(window_attrs).unwrap();
    (window, event_loop)
}

fn create_test_runtime(window: &Window) -> VulkanRuntime {
    VulkanRuntime::new(window, RuntimeConfig::default()).unwrap()
}

// ============================================================================
// LIFECYCLE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_runtime_initializes() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    // Nothing drawn yet, so the caches are empty
    assert_eq!(runtime.pipeline_creation_count(), 0);
    assert_eq!(runtime.descriptor_set_creation_count(), 0);

    runtime.finish().unwrap();
}

#[test]
#[ignore] // Requires GPU
fn test_flush_without_work_is_a_noop() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    runtime.finish().unwrap();
    // No command buffer is being recorded now; flushing again does nothing
    runtime.flush().unwrap();
    runtime.flush().unwrap();
}

// ============================================================================
// TEXTURE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_create_and_upload_texture() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    let mut texture = runtime
        .create_texture(
            SamplerType::Sampler2d,
            1,
            TextureFormat::RGBA8,
            1,
            4,
            4,
            1,
            TextureUsage::SAMPLEABLE | TextureUsage::UPLOADABLE,
        )
        .unwrap();

    let data: Vec<u8> = (0..64).collect();
    let pixels = PixelBufferDescriptor::new(data, PixelDataFormat::Rgba, PixelDataType::Ubyte);
    runtime.update_2d_image(&mut texture, &pixels, 4, 4, 0).unwrap();
    runtime.finish().unwrap();

    assert_eq!(texture.size(), (4, 4));
    runtime.destroy_texture(texture);
}

#[test]
#[ignore] // Requires GPU
fn test_upload_through_blit_path() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    // Float pixels into an 8-bit texture go through the blit path
    let mut texture = runtime
        .create_texture(
            SamplerType::Sampler2d,
            1,
            TextureFormat::RGBA8,
            1,
            2,
            2,
            1,
            TextureUsage::SAMPLEABLE | TextureUsage::UPLOADABLE,
        )
        .unwrap();

    let floats: Vec<f32> = vec![1.0; 16];
    let data: Vec<u8> = floats.iter().flat_map(|f| f.to_le_bytes()).collect();
    let pixels = PixelBufferDescriptor::new(data, PixelDataFormat::Rgba, PixelDataType::Float);
    runtime.update_2d_image(&mut texture, &pixels, 2, 2, 0).unwrap();
    runtime.finish().unwrap();

    runtime.destroy_texture(texture);
}

#[test]
#[ignore] // Requires GPU
fn test_upload_3d_texture() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    let mut texture = runtime
        .create_texture(
            SamplerType::Sampler3d,
            1,
            TextureFormat::RGBA8,
            1,
            4,
            4,
            4,
            TextureUsage::SAMPLEABLE | TextureUsage::UPLOADABLE,
        )
        .unwrap();

    // 4x4x4 volume, 4 bytes per voxel
    let data: Vec<u8> = (0..=255).collect();
    let pixels = PixelBufferDescriptor::new(data, PixelDataFormat::Rgba, PixelDataType::Ubyte);
    runtime
        .update_3d_image(&mut texture, &pixels, 4, 4, 4, 0)
        .unwrap();
    runtime.finish().unwrap();

    runtime.destroy_texture(texture);
}

#[test]
#[ignore] // Requires GPU
fn test_upload_cube_image() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    let mut texture = runtime
        .create_texture(
            SamplerType::SamplerCubemap,
            1,
            TextureFormat::RGBA8,
            1,
            4,
            4,
            1,
            TextureUsage::SAMPLEABLE | TextureUsage::UPLOADABLE,
        )
        .unwrap();

    // Six contiguous 4x4 RGBA8 faces
    let face_bytes = 4 * 4 * 4;
    let data: Vec<u8> = (0..6u8)
        .flat_map(|face| std::iter::repeat(face * 40).take(face_bytes))
        .collect();
    let mut offsets = FaceOffsets::default();
    for face in 0..6 {
        offsets.offsets[face] = (face * face_bytes) as u64;
    }
    let pixels = PixelBufferDescriptor::new(data, PixelDataFormat::Rgba, PixelDataType::Ubyte);
    runtime
        .update_cube_image(&mut texture, &pixels, &offsets, 0)
        .unwrap();
    runtime.finish().unwrap();

    runtime.destroy_texture(texture);
}

#[test]
#[ignore] // Requires GPU
fn test_cube_upload_rejects_non_cubemap() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    let mut texture = runtime
        .create_texture(
            SamplerType::Sampler2d,
            1,
            TextureFormat::RGBA8,
            1,
            4,
            4,
            1,
            TextureUsage::SAMPLEABLE | TextureUsage::UPLOADABLE,
        )
        .unwrap();

    let pixels = PixelBufferDescriptor::new(
        vec![0u8; 4 * 4 * 4],
        PixelDataFormat::Rgba,
        PixelDataType::Ubyte,
    );
    let offsets = FaceOffsets::default();
    assert!(runtime
        .update_cube_image(&mut texture, &pixels, &offsets, 0)
        .is_err());

    runtime.finish().unwrap();
    runtime.destroy_texture(texture);
}

#[test]
#[ignore] // Requires GPU
fn test_set_min_max_levels_retargets_primary_view() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    let mut texture = runtime
        .create_texture(
            SamplerType::Sampler2d,
            4,
            TextureFormat::RGBA8,
            1,
            16,
            16,
            1,
            TextureUsage::SAMPLEABLE | TextureUsage::UPLOADABLE,
        )
        .unwrap();

    let full_view = texture.primary_view();
    runtime.set_min_max_levels(&mut texture, 1, 2).unwrap();
    assert_ne!(texture.primary_view(), full_view);

    // Restoring the full range hands back the cached full view
    runtime.set_min_max_levels(&mut texture, 0, 3).unwrap();
    assert_eq!(texture.primary_view(), full_view);

    runtime.finish().unwrap();
    runtime.destroy_texture(texture);
}

// ============================================================================
// BUFFER TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_buffer_object_update() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    let buffer = runtime.create_buffer_object(1024).unwrap();
    let data = BufferDescriptor::new(vec![7u8; 256]);
    runtime.update_buffer_object(&buffer, &data, 0).unwrap();
    runtime.update_buffer_object(&buffer, &data, 256).unwrap();
    runtime.finish().unwrap();

    runtime.destroy_buffer_object(buffer);
}

#[test]
#[ignore] // Requires GPU
fn test_buffer_object_round_trip() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    let buffer = runtime.create_buffer_object(64).unwrap();
    let payload: Vec<u8> = (0..64).collect();
    runtime
        .update_buffer_object(&buffer, &BufferDescriptor::new(payload.clone()), 0)
        .unwrap();

    let read_back = runtime.read_buffer_object(&buffer).unwrap();
    assert_eq!(read_back, payload);

    runtime.finish().unwrap();
    runtime.destroy_buffer_object(buffer);
}

#[test]
#[ignore] // Requires GPU
fn test_buffer_object_update_out_of_range() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    let buffer = runtime.create_buffer_object(64).unwrap();
    let data = BufferDescriptor::new(vec![0u8; 128]);
    assert!(runtime.update_buffer_object(&buffer, &data, 0).is_err());

    runtime.finish().unwrap();
    runtime.destroy_buffer_object(buffer);
}

#[test]
#[ignore] // Requires GPU
fn test_index_buffer_update() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    let buffer = runtime.create_index_buffer(2, 6).unwrap();
    let indices: Vec<u16> = vec![0, 1, 2, 2, 3, 0];
    let data = BufferDescriptor::new(indices.iter().flat_map(|i| i.to_le_bytes()).collect());
    runtime.update_index_buffer(&buffer, &data, 0).unwrap();
    runtime.finish().unwrap();

    runtime.destroy_index_buffer(buffer);
}

#[test]
#[ignore] // Requires GPU
fn test_uniform_buffer_load_and_bind() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    let buffer = runtime.create_uniform_buffer(256).unwrap();
    let data = BufferDescriptor::new(vec![0u8; 64]);
    runtime.load_uniform_buffer(&buffer, &data, 0).unwrap();
    runtime.bind_uniform_buffer(0, &buffer).unwrap();
    runtime.bind_uniform_buffer_range(1, &buffer, 64, 64).unwrap();

    runtime.finish().unwrap();
    runtime.destroy_uniform_buffer(buffer);
}

// ============================================================================
// SAMPLER TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_bind_sampler_without_texture_uses_placeholder() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    runtime.bind_sampler(0, None, SamplerParams::default()).unwrap();
    runtime.finish().unwrap();
}

// ============================================================================
// FENCE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_create_fence() {
    let (window, _event_loop) = create_test_window();
    let runtime = create_test_runtime(&window);

    let signaled = runtime.create_fence(true).unwrap();
    assert!(signaled.status().unwrap());

    let unsignaled = runtime.create_fence(false).unwrap();
    assert!(!unsignaled.status().unwrap());
}

// ============================================================================
// RENDER PASS TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_offscreen_clear_and_read_pixels() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    let texture = runtime
        .create_texture(
            SamplerType::Sampler2d,
            1,
            TextureFormat::RGBA8,
            1,
            16,
            16,
            1,
            TextureUsage::COLOR_ATTACHMENT | TextureUsage::SAMPLEABLE,
        )
        .unwrap();

    let mut color = [VulkanAttachment::default(); MAX_SUPPORTED_RENDER_TARGET_COUNT];
    color[0] = VulkanAttachment {
        image: texture.image(),
        view: texture.primary_view(),
        format: texture.format(),
        samples: texture.samples(),
    };
    let target = runtime
        .create_render_target(
            16,
            16,
            1,
            color,
            [Some(TextureFormat::RGBA8), None, None, None],
            VulkanAttachment::default(),
            None,
        )
        .unwrap();

    let params = RenderPassParams {
        flags: RenderPassFlags {
            clear: TargetBufferFlags::COLOR0,
            discard_start: TargetBufferFlags::empty(),
            discard_end: TargetBufferFlags::empty(),
        },
        clear_color: [1.0, 0.0, 0.0, 1.0],
        ..Default::default()
    };
    runtime.begin_render_pass(&target, &params).unwrap();
    runtime.end_render_pass().unwrap();

    let pixels = runtime.read_pixels(&target, 0, 0, 16, 16).unwrap();
    assert_eq!(pixels.len(), 16 * 16 * 4);
    assert_eq!(&pixels[0..4], &[255, 0, 0, 255]);

    runtime.destroy_render_target(target);
    runtime.destroy_texture(texture);
    runtime.finish().unwrap();
}

#[test]
#[ignore] // Requires GPU
fn test_nested_render_pass_is_rejected() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    let texture = runtime
        .create_texture(
            SamplerType::Sampler2d,
            1,
            TextureFormat::RGBA8,
            1,
            8,
            8,
            1,
            TextureUsage::COLOR_ATTACHMENT,
        )
        .unwrap();
    let mut color = [VulkanAttachment::default(); MAX_SUPPORTED_RENDER_TARGET_COUNT];
    color[0] = VulkanAttachment {
        image: texture.image(),
        view: texture.primary_view(),
        format: texture.format(),
        samples: texture.samples(),
    };
    let target = runtime
        .create_render_target(
            8,
            8,
            1,
            color,
            [Some(TextureFormat::RGBA8), None, None, None],
            VulkanAttachment::default(),
            None,
        )
        .unwrap();

    let params = RenderPassParams {
        flags: RenderPassFlags {
            clear: TargetBufferFlags::COLOR0,
            ..Default::default()
        },
        ..Default::default()
    };
    runtime.begin_render_pass(&target, &params).unwrap();
    assert!(runtime.begin_render_pass(&target, &params).is_err());
    runtime.end_render_pass().unwrap();
    assert!(runtime.end_render_pass().is_err());

    runtime.destroy_render_target(target);
    runtime.destroy_texture(texture);
    runtime.finish().unwrap();
}

#[test]
#[ignore] // Requires GPU
fn test_next_subpass_requires_subpass_mask() {
    let (window, _event_loop) = create_test_window();
    let mut runtime = create_test_runtime(&window);

    let texture = runtime
        .create_texture(
            SamplerType::Sampler2d,
            1,
            TextureFormat::RGBA8,
            1,
            8,
            8,
            1,
            TextureUsage::COLOR_ATTACHMENT | TextureUsage::SUBPASS_INPUT,
        )
        .unwrap();
    let mut color = [VulkanAttachment::default(); MAX_SUPPORTED_RENDER_TARGET_COUNT];
    color[0] = VulkanAttachment {
        image: texture.image(),
        view: texture.primary_view(),
        format: texture.format(),
        samples: texture.samples(),
    };
    let target = runtime
        .create_render_target(
            8,
            8,
            1,
            color,
            [Some(TextureFormat::RGBA8), None, None, None],
            VulkanAttachment::default(),
            None,
        )
        .unwrap();

    // Without a subpass mask, advancing is a precondition error
    let params = RenderPassParams {
        flags: RenderPassFlags {
            clear: TargetBufferFlags::COLOR0,
            ..Default::default()
        },
        ..Default::default()
    };
    runtime.begin_render_pass(&target, &params).unwrap();
    assert!(runtime.next_subpass().is_err());
    runtime.end_render_pass().unwrap();

    // With the mask, one extra subpass works and a second is rejected
    let params = RenderPassParams {
        subpass_mask: 0x1,
        ..params
    };
    runtime.begin_render_pass(&target, &params).unwrap();
    runtime.next_subpass().unwrap();
    assert!(runtime.next_subpass().is_err());
    runtime.end_render_pass().unwrap();

    runtime.destroy_render_target(target);
    runtime.destroy_texture(texture);
    runtime.finish().unwrap();
}

// ============================================================================
// PROGRAM TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_create_program_rejects_invalid_spirv() {
    let (window, _event_loop) = create_test_window();
    let runtime = create_test_runtime(&window);

    // Truncated blob, not a SPIR-V module
    let garbage = vec![0u8; 7];
    assert!(runtime
        .create_program("broken", &garbage, &garbage, Vec::new())
        .is_err());
}
