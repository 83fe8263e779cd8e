//! Device-independent rendering types
//!
//! Value types exchanged between the application-facing API and the render
//! backend: capacity limits, target/pass descriptions, raster state, vertex
//! layout, sampler parameters and pixel transfer descriptors. These types
//! carry no GPU handles; backends translate them into native state.

use bitflags::bitflags;

// ===== CAPACITY LIMITS =====

/// Depth of the command buffer ring (concurrent submissions in flight).
///
/// Also the garbage-collection horizon of the transient staging memory pool:
/// a staging resource is only reclaimed once this many frames have passed,
/// when no in-flight command buffer can still reference it.
pub const COMMAND_BUFFER_COUNT: usize = 3;

/// Maximum number of simultaneously bound uniform buffers
pub const UBUFFER_BINDING_COUNT: usize = 8;

/// Maximum number of simultaneously bound samplers
pub const SAMPLER_BINDING_COUNT: usize = 16;

/// Maximum number of input attachment bindings (subpass feedback)
pub const TARGET_BINDING_COUNT: usize = 8;

/// Descriptor set layouts per pipeline layout (uniform / sampler / input attachment)
pub const DESCRIPTOR_TYPE_COUNT: usize = 3;

/// Shader modules per program (vertex + fragment)
pub const SHADER_MODULE_COUNT: usize = 2;

/// Maximum number of vertex attributes
pub const VERTEX_ATTRIBUTE_COUNT: usize = 16;

/// Maximum number of color attachments on a render target
pub const MAX_SUPPORTED_RENDER_TARGET_COUNT: usize = 4;

// ===== RENDER TARGET / PASS DESCRIPTION =====

bitflags! {
    /// Selects which attachments of a render target an operation applies to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TargetBufferFlags: u32 {
        const COLOR0 = 0x1;
        const COLOR1 = 0x2;
        const COLOR2 = 0x4;
        const COLOR3 = 0x8;
        const DEPTH = 0x10;
        const STENCIL = 0x20;
        const COLOR = Self::COLOR0.bits()
            | Self::COLOR1.bits()
            | Self::COLOR2.bits()
            | Self::COLOR3.bits();
        const DEPTH_AND_STENCIL = Self::DEPTH.bits() | Self::STENCIL.bits();
        const ALL = Self::COLOR.bits() | Self::DEPTH_AND_STENCIL.bits();
    }
}

impl TargetBufferFlags {
    /// Flag for color attachment `index`
    pub fn color(index: usize) -> Self {
        debug_assert!(index < MAX_SUPPORTED_RENDER_TARGET_COUNT);
        TargetBufferFlags::from_bits_truncate(TargetBufferFlags::COLOR0.bits() << index)
    }
}

impl Default for TargetBufferFlags {
    fn default() -> Self {
        TargetBufferFlags::empty()
    }
}

/// Viewport rectangle, in framebuffer coordinates (origin bottom-left)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub left: i32,
    pub bottom: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn right(&self) -> i32 {
        self.left + self.width as i32
    }

    pub fn top(&self) -> i32 {
        self.bottom + self.height as i32
    }
}

/// Depth range mapped by the viewport transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRange {
    pub near: f32,
    pub far: f32,
}

impl Default for DepthRange {
    fn default() -> Self {
        Self { near: 0.0, far: 1.0 }
    }
}

/// Attachment load/store policy of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderPassFlags {
    /// Attachments cleared at the start of the pass
    pub clear: TargetBufferFlags,
    /// Attachments whose prior contents may be discarded at pass start
    pub discard_start: TargetBufferFlags,
    /// Attachments whose contents may be discarded at pass end
    pub discard_end: TargetBufferFlags,
}

/// Parameters for a single render pass
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderPassParams {
    pub flags: RenderPassFlags,
    pub viewport: Viewport,
    pub depth_range: DepthRange,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    /// Bitmask of color attachments read back as input attachments in a
    /// second subpass. Zero means the pass has a single subpass.
    pub subpass_mask: u32,
}

// ===== GEOMETRY =====

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveType {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
}

/// Scalar/vector type of a vertex attribute or index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Byte,
    Byte2,
    Byte3,
    Byte4,
    Ubyte,
    Ubyte2,
    Ubyte3,
    Ubyte4,
    Short,
    Short2,
    Short3,
    Short4,
    Ushort,
    Ushort2,
    Ushort3,
    Ushort4,
    Int,
    Uint,
    Float,
    Float2,
    Float3,
    Float4,
    Half,
    Half2,
    Half3,
    Half4,
}

impl ElementType {
    /// Size in bytes of one element
    pub fn size(&self) -> usize {
        match self {
            ElementType::Byte | ElementType::Ubyte => 1,
            ElementType::Byte2 | ElementType::Ubyte2 => 2,
            ElementType::Byte3 | ElementType::Ubyte3 => 3,
            ElementType::Byte4 | ElementType::Ubyte4 => 4,
            ElementType::Short | ElementType::Ushort | ElementType::Half => 2,
            ElementType::Short2 | ElementType::Ushort2 | ElementType::Half2 => 4,
            ElementType::Short3 | ElementType::Ushort3 | ElementType::Half3 => 6,
            ElementType::Short4 | ElementType::Ushort4 | ElementType::Half4 => 8,
            ElementType::Int | ElementType::Uint | ElementType::Float => 4,
            ElementType::Float2 => 8,
            ElementType::Float3 => 12,
            ElementType::Float4 => 16,
        }
    }
}

/// Expected update frequency of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferUsage {
    #[default]
    Static,
    Dynamic,
    Stream,
}

bitflags! {
    /// Per-attribute flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AttributeFlags: u8 {
        /// Integer attribute (no normalization, integer shader input)
        const INTEGER = 0x1;
        /// Normalized fixed-point attribute
        const NORMALIZED = 0x2;
    }
}

/// One vertex attribute: where it lives and how to read it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attribute {
    /// Byte offset within the source buffer
    pub offset: u32,
    /// Byte stride between consecutive vertices
    pub stride: u8,
    /// Index of the source vertex buffer
    pub buffer: u8,
    pub element_type: ElementType,
    pub flags: AttributeFlags,
}

impl Default for Attribute {
    fn default() -> Self {
        Self {
            offset: 0,
            stride: 0,
            buffer: Attribute::BUFFER_UNUSED,
            element_type: ElementType::Float4,
            flags: AttributeFlags::empty(),
        }
    }
}

impl Attribute {
    /// Sentinel marking an attribute slot with no backing buffer
    pub const BUFFER_UNUSED: u8 = 0xFF;

    pub fn is_enabled(&self) -> bool {
        self.buffer != Attribute::BUFFER_UNUSED
    }
}

/// Fixed-size table of vertex attributes, indexed by shader location
pub type AttributeArray = [Attribute; VERTEX_ATTRIBUTE_COUNT];

// ===== RASTER STATE =====

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullingMode {
    None,
    Front,
    #[default]
    Back,
    FrontAndBack,
}

/// Depth/stencil comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerCompareFunc {
    #[default]
    LessEqual,
    GreaterEqual,
    Less,
    Greater,
    Equal,
    NotEqual,
    Always,
    Never,
}

/// Blend equation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendEquation {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFunction {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    SrcAlphaSaturate,
}

/// Fixed-function raster state of a draw call
///
/// Field-wise value equality is what the pipeline cache diffs against, so
/// every field must compare by value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterState {
    pub culling: CullingMode,
    pub blend_equation_rgb: BlendEquation,
    pub blend_equation_alpha: BlendEquation,
    pub blend_function_src_rgb: BlendFunction,
    pub blend_function_src_alpha: BlendFunction,
    pub blend_function_dst_rgb: BlendFunction,
    pub blend_function_dst_alpha: BlendFunction,
    pub depth_write: bool,
    pub depth_func: SamplerCompareFunc,
    pub color_write: bool,
    pub alpha_to_coverage: bool,
    pub inverse_front_faces: bool,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            culling: CullingMode::Back,
            blend_equation_rgb: BlendEquation::Add,
            blend_equation_alpha: BlendEquation::Add,
            blend_function_src_rgb: BlendFunction::One,
            blend_function_src_alpha: BlendFunction::One,
            blend_function_dst_rgb: BlendFunction::Zero,
            blend_function_dst_alpha: BlendFunction::Zero,
            depth_write: true,
            depth_func: SamplerCompareFunc::LessEqual,
            color_write: true,
            alpha_to_coverage: false,
            inverse_front_faces: false,
        }
    }
}

impl RasterState {
    /// Whether blending is enabled (any factor other than straight replace)
    pub fn has_blending(&self) -> bool {
        !(self.blend_function_src_rgb == BlendFunction::One
            && self.blend_function_src_alpha == BlendFunction::One
            && self.blend_function_dst_rgb == BlendFunction::Zero
            && self.blend_function_dst_alpha == BlendFunction::Zero)
    }
}

/// Depth bias applied during rasterization
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PolygonOffset {
    pub slope: f32,
    pub constant: f32,
}

/// Complete pipeline state of a draw call (everything except geometry)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PipelineState {
    pub raster_state: RasterState,
    pub polygon_offset: PolygonOffset,
}

// ===== SAMPLERS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerMagFilter {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerMinFilter {
    #[default]
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerWrapMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerCompareMode {
    #[default]
    None,
    CompareToTexture,
}

/// Sampler parameters, hashable so backends can memoize native samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerParams {
    pub filter_mag: SamplerMagFilter,
    pub filter_min: SamplerMinFilter,
    pub wrap_s: SamplerWrapMode,
    pub wrap_t: SamplerWrapMode,
    pub wrap_r: SamplerWrapMode,
    /// log2 of the max anisotropy (0 disables anisotropic filtering)
    pub anisotropy_log2: u8,
    pub compare_mode: SamplerCompareMode,
    pub compare_func: SamplerCompareFunc,
}

/// Shader-visible sampler dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplerType {
    #[default]
    Sampler2d,
    Sampler2dArray,
    SamplerCubemap,
    Sampler3d,
}

// ===== TEXTURES & PIXEL TRANSFER =====

/// Texture storage format (subset the backend supports natively)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum TextureFormat {
    R8,
    RG8,
    RGBA8,
    SRGB8_A8,
    BGRA8,
    RGBA16F,
    RGBA32F,
    DEPTH32F,
    DEPTH24_STENCIL8,
}

impl TextureFormat {
    /// Whether this is a depth or depth/stencil format
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::DEPTH32F | TextureFormat::DEPTH24_STENCIL8
        )
    }
}

bitflags! {
    /// How a texture will be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TextureUsage: u8 {
        const COLOR_ATTACHMENT = 0x1;
        const DEPTH_ATTACHMENT = 0x2;
        const STENCIL_ATTACHMENT = 0x4;
        const UPLOADABLE = 0x8;
        const SAMPLEABLE = 0x10;
        const SUBPASS_INPUT = 0x20;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        TextureUsage::SAMPLEABLE | TextureUsage::UPLOADABLE
    }
}

/// Component layout of client-side pixel data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelDataFormat {
    R,
    Rg,
    Rgb,
    Rgba,
    DepthComponent,
}

/// Component type of client-side pixel data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelDataType {
    Ubyte,
    Ushort,
    Uint,
    Float,
    Half,
}

/// Owned CPU-side payload for buffer updates
#[derive(Debug, Clone, Default)]
pub struct BufferDescriptor {
    pub data: Vec<u8>,
}

impl BufferDescriptor {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Byte offset of each cube face inside a pixel buffer, in
/// +X, -X, +Y, -Y, +Z, -Z order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaceOffsets {
    pub offsets: [u64; 6],
}

/// Owned CPU-side payload for pixel uploads/readbacks
#[derive(Debug, Clone)]
pub struct PixelBufferDescriptor {
    pub data: Vec<u8>,
    pub format: PixelDataFormat,
    pub pixel_type: PixelDataType,
}

impl PixelBufferDescriptor {
    pub fn new(data: Vec<u8>, format: PixelDataFormat, pixel_type: PixelDataType) -> Self {
        Self {
            data,
            format,
            pixel_type,
        }
    }

    /// Bytes per pixel implied by format and type
    pub fn bytes_per_pixel(&self) -> usize {
        let components = match self.format {
            PixelDataFormat::R | PixelDataFormat::DepthComponent => 1,
            PixelDataFormat::Rg => 2,
            PixelDataFormat::Rgb => 3,
            PixelDataFormat::Rgba => 4,
        };
        let component_size = match self.pixel_type {
            PixelDataType::Ubyte => 1,
            PixelDataType::Ushort | PixelDataType::Half => 2,
            PixelDataType::Uint | PixelDataType::Float => 4,
        };
        components * component_size
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "render_tests.rs"]
mod tests;
