use super::*;

// ============================================================================
// Vertex attribute formats
// ============================================================================

#[test]
fn test_element_type_normalized() {
    assert_eq!(
        element_type_to_vk(ElementType::Ubyte4, true, false),
        vk::Format::R8G8B8A8_UNORM
    );
    assert_eq!(
        element_type_to_vk(ElementType::Byte2, true, false),
        vk::Format::R8G8_SNORM
    );
    assert_eq!(
        element_type_to_vk(ElementType::Ushort3, true, false),
        vk::Format::R16G16B16_UNORM
    );
}

#[test]
fn test_element_type_integer() {
    assert_eq!(
        element_type_to_vk(ElementType::Ubyte4, false, true),
        vk::Format::R8G8B8A8_UINT
    );
    assert_eq!(
        element_type_to_vk(ElementType::Short2, false, true),
        vk::Format::R16G16_SINT
    );
    assert_eq!(
        element_type_to_vk(ElementType::Uint, false, true),
        vk::Format::R32_UINT
    );
}

#[test]
fn test_element_type_scaled() {
    assert_eq!(
        element_type_to_vk(ElementType::Ubyte4, false, false),
        vk::Format::R8G8B8A8_USCALED
    );
    assert_eq!(
        element_type_to_vk(ElementType::Short2, false, false),
        vk::Format::R16G16_SSCALED
    );
}

#[test]
fn test_element_type_float() {
    assert_eq!(
        element_type_to_vk(ElementType::Float3, false, false),
        vk::Format::R32G32B32_SFLOAT
    );
    assert_eq!(
        element_type_to_vk(ElementType::Half4, false, false),
        vk::Format::R16G16B16A16_SFLOAT
    );
    // Float formats ignore the normalized flag
    assert_eq!(
        element_type_to_vk(ElementType::Float2, true, false),
        vk::Format::UNDEFINED
    );
}

// ============================================================================
// Texture formats
// ============================================================================

#[test]
fn test_texture_format_color() {
    assert_eq!(
        texture_format_to_vk(TextureFormat::RGBA8, vk::Format::D32_SFLOAT),
        vk::Format::R8G8B8A8_UNORM
    );
    assert_eq!(
        texture_format_to_vk(TextureFormat::SRGB8_A8, vk::Format::D32_SFLOAT),
        vk::Format::R8G8B8A8_SRGB
    );
    assert_eq!(
        texture_format_to_vk(TextureFormat::BGRA8, vk::Format::D32_SFLOAT),
        vk::Format::B8G8R8A8_UNORM
    );
    assert_eq!(
        texture_format_to_vk(TextureFormat::RGBA16F, vk::Format::D32_SFLOAT),
        vk::Format::R16G16B16A16_SFLOAT
    );
}

#[test]
fn test_texture_format_depth() {
    assert_eq!(
        texture_format_to_vk(TextureFormat::DEPTH32F, vk::Format::D24_UNORM_S8_UINT),
        vk::Format::D32_SFLOAT
    );
    assert_eq!(
        texture_format_to_vk(TextureFormat::DEPTH24_STENCIL8, vk::Format::D24_UNORM_S8_UINT),
        vk::Format::D24_UNORM_S8_UINT
    );
    // Falls back to the probed device depth format
    assert_eq!(
        texture_format_to_vk(TextureFormat::DEPTH24_STENCIL8, vk::Format::D32_SFLOAT),
        vk::Format::D32_SFLOAT
    );
}

#[test]
fn test_pixel_format() {
    assert_eq!(
        pixel_format_to_vk(PixelDataFormat::R, PixelDataType::Ubyte),
        vk::Format::R8_UNORM
    );
    assert_eq!(
        pixel_format_to_vk(PixelDataFormat::Rgba, PixelDataType::Ubyte),
        vk::Format::R8G8B8A8_UNORM
    );
    assert_eq!(
        pixel_format_to_vk(PixelDataFormat::Rgba, PixelDataType::Float),
        vk::Format::R32G32B32A32_SFLOAT
    );
    assert_eq!(
        pixel_format_to_vk(PixelDataFormat::DepthComponent, PixelDataType::Float),
        vk::Format::D32_SFLOAT
    );
    assert_eq!(
        pixel_format_to_vk(PixelDataFormat::Rgb, PixelDataType::Ubyte),
        vk::Format::UNDEFINED
    );
}

#[test]
fn test_linear_format() {
    assert_eq!(
        linear_format(vk::Format::R8G8B8A8_SRGB),
        vk::Format::R8G8B8A8_UNORM
    );
    assert_eq!(
        linear_format(vk::Format::B8G8R8A8_SRGB),
        vk::Format::B8G8R8A8_UNORM
    );
    assert_eq!(
        linear_format(vk::Format::R8G8B8A8_UNORM),
        vk::Format::R8G8B8A8_UNORM
    );
}

// ============================================================================
// Pipeline state conversions
// ============================================================================

#[test]
fn test_compare_op() {
    assert_eq!(
        compare_op_to_vk(SamplerCompareFunc::LessEqual),
        vk::CompareOp::LESS_OR_EQUAL
    );
    assert_eq!(compare_op_to_vk(SamplerCompareFunc::Never), vk::CompareOp::NEVER);
}

#[test]
fn test_blend_factor() {
    assert_eq!(
        blend_factor_to_vk(BlendFunction::OneMinusSrcAlpha),
        vk::BlendFactor::ONE_MINUS_SRC_ALPHA
    );
    assert_eq!(
        blend_factor_to_vk(BlendFunction::SrcAlphaSaturate),
        vk::BlendFactor::SRC_ALPHA_SATURATE
    );
}

#[test]
fn test_blend_op() {
    assert_eq!(blend_op_to_vk(BlendEquation::Add), vk::BlendOp::ADD);
    assert_eq!(
        blend_op_to_vk(BlendEquation::ReverseSubtract),
        vk::BlendOp::REVERSE_SUBTRACT
    );
}

#[test]
fn test_cull_mode_and_front_face() {
    assert_eq!(cull_mode_to_vk(CullingMode::Back), vk::CullModeFlags::BACK);
    assert_eq!(cull_mode_to_vk(CullingMode::None), vk::CullModeFlags::NONE);
    assert_eq!(front_face_to_vk(false), vk::FrontFace::COUNTER_CLOCKWISE);
    assert_eq!(front_face_to_vk(true), vk::FrontFace::CLOCKWISE);
}

#[test]
fn test_primitive_topology() {
    assert_eq!(
        primitive_topology_to_vk(PrimitiveType::Points),
        vk::PrimitiveTopology::POINT_LIST
    );
    assert_eq!(
        primitive_topology_to_vk(PrimitiveType::TriangleStrip),
        vk::PrimitiveTopology::TRIANGLE_STRIP
    );
}

// ============================================================================
// Texture layouts
// ============================================================================

#[test]
fn test_texture_layout_from_usage() {
    assert_eq!(
        texture_layout(TextureUsage::COLOR_ATTACHMENT | TextureUsage::SAMPLEABLE),
        vk::ImageLayout::GENERAL
    );
    assert_eq!(
        texture_layout(TextureUsage::DEPTH_ATTACHMENT),
        vk::ImageLayout::GENERAL
    );
    assert_eq!(
        texture_layout(TextureUsage::SAMPLEABLE | TextureUsage::UPLOADABLE),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
}
