/// Conversions between engine render types and Vulkan enums, plus small
/// image layout helpers shared by the staging pool, textures and the
/// runtime.

use ash::vk;
use nebula_3d_engine::nebula3d::render::{
    BlendEquation, BlendFunction, CullingMode, ElementType, PixelDataFormat, PixelDataType,
    PrimitiveType, SamplerCompareFunc, TextureFormat, TextureUsage,
};

/// Parameters of a `vkCmdPipelineBarrier` image layout transition
#[derive(Clone, Copy)]
pub struct LayoutTransition {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub subresources: vk::ImageSubresourceRange,
    pub src_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
}

/// Record an image layout transition barrier. No-op when the layouts match.
pub fn transition_image_layout(
    device: &ash::Device,
    cmdbuffer: vk::CommandBuffer,
    transition: LayoutTransition,
) {
    if transition.old_layout == transition.new_layout {
        return;
    }
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(transition.old_layout)
        .new_layout(transition.new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(transition.image)
        .subresource_range(transition.subresources)
        .src_access_mask(transition.src_access)
        .dst_access_mask(transition.dst_access);
    unsafe {
        device.cmd_pipeline_barrier(
            cmdbuffer,
            transition.src_stage,
            transition.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// Image layout a texture settles in outside of transfers, derived from
/// its usage. Attachable textures stay GENERAL so they can be sampled
/// and rendered to without per-pass transitions.
pub fn texture_layout(usage: TextureUsage) -> vk::ImageLayout {
    if usage.intersects(TextureUsage::DEPTH_ATTACHMENT | TextureUsage::COLOR_ATTACHMENT) {
        return vk::ImageLayout::GENERAL;
    }
    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
}

/// Vulkan format of a vertex attribute
pub fn element_type_to_vk(element_type: ElementType, normalized: bool, integer: bool) -> vk::Format {
    if normalized {
        return match element_type {
            ElementType::Byte => vk::Format::R8_SNORM,
            ElementType::Ubyte => vk::Format::R8_UNORM,
            ElementType::Short => vk::Format::R16_SNORM,
            ElementType::Ushort => vk::Format::R16_UNORM,
            ElementType::Byte2 => vk::Format::R8G8_SNORM,
            ElementType::Ubyte2 => vk::Format::R8G8_UNORM,
            ElementType::Short2 => vk::Format::R16G16_SNORM,
            ElementType::Ushort2 => vk::Format::R16G16_UNORM,
            ElementType::Byte3 => vk::Format::R8G8B8_SNORM,
            ElementType::Ubyte3 => vk::Format::R8G8B8_UNORM,
            ElementType::Short3 => vk::Format::R16G16B16_SNORM,
            ElementType::Ushort3 => vk::Format::R16G16B16_UNORM,
            ElementType::Byte4 => vk::Format::R8G8B8A8_SNORM,
            ElementType::Ubyte4 => vk::Format::R8G8B8A8_UNORM,
            ElementType::Short4 => vk::Format::R16G16B16A16_SNORM,
            ElementType::Ushort4 => vk::Format::R16G16B16A16_UNORM,
            _ => vk::Format::UNDEFINED,
        };
    }
    match element_type {
        ElementType::Byte => {
            if integer {
                vk::Format::R8_SINT
            } else {
                vk::Format::R8_SSCALED
            }
        }
        ElementType::Ubyte => {
            if integer {
                vk::Format::R8_UINT
            } else {
                vk::Format::R8_USCALED
            }
        }
        ElementType::Short => {
            if integer {
                vk::Format::R16_SINT
            } else {
                vk::Format::R16_SSCALED
            }
        }
        ElementType::Ushort => {
            if integer {
                vk::Format::R16_UINT
            } else {
                vk::Format::R16_USCALED
            }
        }
        ElementType::Half => vk::Format::R16_SFLOAT,
        ElementType::Int => vk::Format::R32_SINT,
        ElementType::Uint => vk::Format::R32_UINT,
        ElementType::Float => vk::Format::R32_SFLOAT,
        ElementType::Byte2 => {
            if integer {
                vk::Format::R8G8_SINT
            } else {
                vk::Format::R8G8_SSCALED
            }
        }
        ElementType::Ubyte2 => {
            if integer {
                vk::Format::R8G8_UINT
            } else {
                vk::Format::R8G8_USCALED
            }
        }
        ElementType::Short2 => {
            if integer {
                vk::Format::R16G16_SINT
            } else {
                vk::Format::R16G16_SSCALED
            }
        }
        ElementType::Ushort2 => {
            if integer {
                vk::Format::R16G16_UINT
            } else {
                vk::Format::R16G16_USCALED
            }
        }
        ElementType::Half2 => vk::Format::R16G16_SFLOAT,
        ElementType::Float2 => vk::Format::R32G32_SFLOAT,
        ElementType::Byte3 => vk::Format::R8G8B8_SINT,
        ElementType::Ubyte3 => vk::Format::R8G8B8_UINT,
        ElementType::Short3 => vk::Format::R16G16B16_SINT,
        ElementType::Ushort3 => vk::Format::R16G16B16_UINT,
        ElementType::Half3 => vk::Format::R16G16B16_SFLOAT,
        ElementType::Float3 => vk::Format::R32G32B32_SFLOAT,
        ElementType::Byte4 => {
            if integer {
                vk::Format::R8G8B8A8_SINT
            } else {
                vk::Format::R8G8B8A8_SSCALED
            }
        }
        ElementType::Ubyte4 => {
            if integer {
                vk::Format::R8G8B8A8_UINT
            } else {
                vk::Format::R8G8B8A8_USCALED
            }
        }
        ElementType::Short4 => {
            if integer {
                vk::Format::R16G16B16A16_SINT
            } else {
                vk::Format::R16G16B16A16_SSCALED
            }
        }
        ElementType::Ushort4 => {
            if integer {
                vk::Format::R16G16B16A16_UINT
            } else {
                vk::Format::R16G16B16A16_USCALED
            }
        }
        ElementType::Half4 => vk::Format::R16G16B16A16_SFLOAT,
        ElementType::Float4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

/// Vulkan format of a texture. Depth formats resolve against the format
/// probed from the device at init.
pub fn texture_format_to_vk(format: TextureFormat, device_depth_format: vk::Format) -> vk::Format {
    match format {
        TextureFormat::R8 => vk::Format::R8_UNORM,
        TextureFormat::RG8 => vk::Format::R8G8_UNORM,
        TextureFormat::RGBA8 => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::SRGB8_A8 => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::BGRA8 => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::RGBA16F => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::RGBA32F => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::DEPTH32F => vk::Format::D32_SFLOAT,
        TextureFormat::DEPTH24_STENCIL8 => match device_depth_format {
            vk::Format::D24_UNORM_S8_UINT => vk::Format::D24_UNORM_S8_UINT,
            _ => device_depth_format,
        },
    }
}

/// Vulkan format of client-side pixel data, used for blit-capable staging
/// images
pub fn pixel_format_to_vk(format: PixelDataFormat, pixel_type: PixelDataType) -> vk::Format {
    match (format, pixel_type) {
        (PixelDataFormat::R, PixelDataType::Ubyte) => vk::Format::R8_UNORM,
        (PixelDataFormat::R, PixelDataType::Ushort) => vk::Format::R16_UINT,
        (PixelDataFormat::R, PixelDataType::Half) => vk::Format::R16_SFLOAT,
        (PixelDataFormat::R, PixelDataType::Uint) => vk::Format::R32_UINT,
        (PixelDataFormat::R, PixelDataType::Float) => vk::Format::R32_SFLOAT,
        (PixelDataFormat::Rg, PixelDataType::Ubyte) => vk::Format::R8G8_UNORM,
        (PixelDataFormat::Rg, PixelDataType::Ushort) => vk::Format::R16G16_UINT,
        (PixelDataFormat::Rg, PixelDataType::Half) => vk::Format::R16G16_SFLOAT,
        (PixelDataFormat::Rg, PixelDataType::Uint) => vk::Format::R32G32_UINT,
        (PixelDataFormat::Rg, PixelDataType::Float) => vk::Format::R32G32_SFLOAT,
        (PixelDataFormat::Rgba, PixelDataType::Ubyte) => vk::Format::R8G8B8A8_UNORM,
        (PixelDataFormat::Rgba, PixelDataType::Ushort) => vk::Format::R16G16B16A16_UINT,
        (PixelDataFormat::Rgba, PixelDataType::Half) => vk::Format::R16G16B16A16_SFLOAT,
        (PixelDataFormat::Rgba, PixelDataType::Uint) => vk::Format::R32G32B32A32_UINT,
        (PixelDataFormat::Rgba, PixelDataType::Float) => vk::Format::R32G32B32A32_SFLOAT,
        (PixelDataFormat::DepthComponent, PixelDataType::Float) => vk::Format::D32_SFLOAT,
        _ => vk::Format::UNDEFINED,
    }
}

/// Map an sRGB format to its linear (UNORM) equivalent, for blit sources
pub fn linear_format(format: vk::Format) -> vk::Format {
    match format {
        vk::Format::R8_SRGB => vk::Format::R8_UNORM,
        vk::Format::R8G8_SRGB => vk::Format::R8G8_UNORM,
        vk::Format::R8G8B8_SRGB => vk::Format::R8G8B8_UNORM,
        vk::Format::B8G8R8_SRGB => vk::Format::B8G8R8_UNORM,
        vk::Format::R8G8B8A8_SRGB => vk::Format::R8G8B8A8_UNORM,
        vk::Format::B8G8R8A8_SRGB => vk::Format::B8G8R8A8_UNORM,
        other => other,
    }
}

pub fn compare_op_to_vk(func: SamplerCompareFunc) -> vk::CompareOp {
    match func {
        SamplerCompareFunc::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        SamplerCompareFunc::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        SamplerCompareFunc::Less => vk::CompareOp::LESS,
        SamplerCompareFunc::Greater => vk::CompareOp::GREATER,
        SamplerCompareFunc::Equal => vk::CompareOp::EQUAL,
        SamplerCompareFunc::NotEqual => vk::CompareOp::NOT_EQUAL,
        SamplerCompareFunc::Always => vk::CompareOp::ALWAYS,
        SamplerCompareFunc::Never => vk::CompareOp::NEVER,
    }
}

pub fn blend_factor_to_vk(function: BlendFunction) -> vk::BlendFactor {
    match function {
        BlendFunction::Zero => vk::BlendFactor::ZERO,
        BlendFunction::One => vk::BlendFactor::ONE,
        BlendFunction::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFunction::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFunction::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFunction::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFunction::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFunction::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFunction::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFunction::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        BlendFunction::SrcAlphaSaturate => vk::BlendFactor::SRC_ALPHA_SATURATE,
    }
}

pub fn blend_op_to_vk(equation: BlendEquation) -> vk::BlendOp {
    match equation {
        BlendEquation::Add => vk::BlendOp::ADD,
        BlendEquation::Subtract => vk::BlendOp::SUBTRACT,
        BlendEquation::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendEquation::Min => vk::BlendOp::MIN,
        BlendEquation::Max => vk::BlendOp::MAX,
    }
}

pub fn cull_mode_to_vk(mode: CullingMode) -> vk::CullModeFlags {
    match mode {
        CullingMode::None => vk::CullModeFlags::NONE,
        CullingMode::Front => vk::CullModeFlags::FRONT,
        CullingMode::Back => vk::CullModeFlags::BACK,
        CullingMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
    }
}

pub fn front_face_to_vk(inverse_front_faces: bool) -> vk::FrontFace {
    if inverse_front_faces {
        vk::FrontFace::CLOCKWISE
    } else {
        vk::FrontFace::COUNTER_CLOCKWISE
    }
}

pub fn primitive_topology_to_vk(primitive_type: PrimitiveType) -> vk::PrimitiveTopology {
    match primitive_type {
        PrimitiveType::Points => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveType::Lines => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveType::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveType::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveType::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "vulkan_utils_tests.rs"]
mod tests;
