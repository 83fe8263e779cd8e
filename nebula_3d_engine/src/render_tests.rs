use super::*;

// ============================================================================
// Target buffer flags
// ============================================================================

#[test]
fn test_color_flag_by_index() {
    assert_eq!(TargetBufferFlags::color(0), TargetBufferFlags::COLOR0);
    assert_eq!(TargetBufferFlags::color(1), TargetBufferFlags::COLOR1);
    assert_eq!(TargetBufferFlags::color(2), TargetBufferFlags::COLOR2);
    assert_eq!(TargetBufferFlags::color(3), TargetBufferFlags::COLOR3);
}

#[test]
fn test_color_aggregate_contains_all_color_bits() {
    assert!(TargetBufferFlags::COLOR.contains(TargetBufferFlags::COLOR0));
    assert!(TargetBufferFlags::COLOR.contains(TargetBufferFlags::COLOR3));
    assert!(!TargetBufferFlags::COLOR.contains(TargetBufferFlags::DEPTH));
    assert!(TargetBufferFlags::ALL.contains(TargetBufferFlags::DEPTH_AND_STENCIL));
}

// ============================================================================
// Viewport
// ============================================================================

#[test]
fn test_viewport_edges() {
    let vp = Viewport {
        left: 10,
        bottom: 20,
        width: 100,
        height: 50,
    };
    assert_eq!(vp.right(), 110);
    assert_eq!(vp.top(), 70);
}

// ============================================================================
// Element types
// ============================================================================

#[test]
fn test_element_type_sizes() {
    assert_eq!(ElementType::Ubyte.size(), 1);
    assert_eq!(ElementType::Ushort.size(), 2);
    assert_eq!(ElementType::Uint.size(), 4);
    assert_eq!(ElementType::Float2.size(), 8);
    assert_eq!(ElementType::Float3.size(), 12);
    assert_eq!(ElementType::Float4.size(), 16);
    assert_eq!(ElementType::Half4.size(), 8);
}

#[test]
fn test_attribute_default_is_disabled() {
    let attr = Attribute::default();
    assert!(!attr.is_enabled());
    assert_eq!(attr.buffer, Attribute::BUFFER_UNUSED);
}

// ============================================================================
// Raster state
// ============================================================================

#[test]
fn test_raster_state_default_has_no_blending() {
    let state = RasterState::default();
    assert!(!state.has_blending());
}

#[test]
fn test_raster_state_alpha_blending_detected() {
    let state = RasterState {
        blend_function_src_rgb: BlendFunction::SrcAlpha,
        blend_function_dst_rgb: BlendFunction::OneMinusSrcAlpha,
        ..Default::default()
    };
    assert!(state.has_blending());
}

#[test]
fn test_raster_state_value_equality() {
    let a = RasterState::default();
    let mut b = RasterState::default();
    assert_eq!(a, b);

    b.depth_write = false;
    assert_ne!(a, b);
}

// ============================================================================
// Samplers
// ============================================================================

#[test]
fn test_sampler_params_hash_equality() {
    use std::collections::HashMap;

    let linear = SamplerParams {
        filter_mag: SamplerMagFilter::Linear,
        filter_min: SamplerMinFilter::LinearMipmapLinear,
        ..Default::default()
    };
    let same = linear;
    let nearest = SamplerParams::default();

    let mut map = HashMap::new();
    map.insert(linear, 1u32);
    map.insert(nearest, 2u32);
    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&same), Some(&1));
}

// ============================================================================
// Formats & pixel transfer
// ============================================================================

#[test]
fn test_depth_format_classification() {
    assert!(TextureFormat::DEPTH32F.is_depth());
    assert!(TextureFormat::DEPTH24_STENCIL8.is_depth());
    assert!(!TextureFormat::RGBA8.is_depth());
    assert!(!TextureFormat::BGRA8.is_depth());
}

#[test]
fn test_pixel_descriptor_bytes_per_pixel() {
    let rgba_ubyte =
        PixelBufferDescriptor::new(vec![], PixelDataFormat::Rgba, PixelDataType::Ubyte);
    assert_eq!(rgba_ubyte.bytes_per_pixel(), 4);

    let rgba_float =
        PixelBufferDescriptor::new(vec![], PixelDataFormat::Rgba, PixelDataType::Float);
    assert_eq!(rgba_float.bytes_per_pixel(), 16);

    let depth_float = PixelBufferDescriptor::new(
        vec![],
        PixelDataFormat::DepthComponent,
        PixelDataType::Float,
    );
    assert_eq!(depth_float.bytes_per_pixel(), 4);
}

#[test]
fn test_buffer_descriptor_size() {
    let desc = BufferDescriptor::new(vec![0u8; 64]);
    assert_eq!(desc.size(), 64);
}
