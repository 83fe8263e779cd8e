/// VulkanRenderTarget - where a render pass draws
///
/// Two flavors: the default target renders into the swap chain's current
/// image and shared depth attachment, an offscreen target renders into
/// caller-provided texture attachments. Multisampled offscreen targets
/// over single-sampled textures get side images that are resolved into
/// the textures at the end of the pass.

use ash::vk;
use nebula_3d_engine::nebula3d::render::{
    SamplerType, TextureFormat, TextureUsage, Viewport, MAX_SUPPORTED_RENDER_TARGET_COUNT,
};
use nebula_3d_engine::nebula3d::Result;

use crate::vulkan_context::VulkanContext;
use crate::vulkan_texture::VulkanTexture;

/// One attachment as seen by the framebuffer cache
#[derive(Clone, Copy, Debug)]
pub struct VulkanAttachment {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub samples: u8,
}

impl Default for VulkanAttachment {
    fn default() -> Self {
        Self {
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            format: vk::Format::UNDEFINED,
            samples: 1,
        }
    }
}

impl VulkanAttachment {
    pub fn is_valid(&self) -> bool {
        self.format != vk::Format::UNDEFINED
    }
}

pub struct VulkanRenderTarget {
    offscreen: bool,
    width: u32,
    height: u32,
    samples: u8,
    color: [VulkanAttachment; MAX_SUPPORTED_RENDER_TARGET_COUNT],
    depth: VulkanAttachment,
    /// Multisampled side images resolved into single-sampled attachments
    msaa_color: Vec<Option<VulkanTexture>>,
    msaa_depth: Option<VulkanTexture>,
}

impl VulkanRenderTarget {
    /// The swapchain-backed default target. Attachments are filled in per
    /// frame from the swap chain's current image.
    pub fn new_default() -> Self {
        Self {
            offscreen: false,
            width: 0,
            height: 0,
            samples: 1,
            color: [VulkanAttachment::default(); MAX_SUPPORTED_RENDER_TARGET_COUNT],
            depth: VulkanAttachment::default(),
            msaa_color: Vec::new(),
            msaa_depth: None,
        }
    }

    /// An offscreen target over texture attachments. When `samples > 1`
    /// and an attachment texture is single-sampled, a multisampled side
    /// image is created; the pass renders into the side image and
    /// resolves into the texture.
    #[allow(clippy::too_many_arguments)]
    pub fn new_offscreen(
        context: &VulkanContext,
        cmdbuffer: vk::CommandBuffer,
        width: u32,
        height: u32,
        samples: u8,
        color: [VulkanAttachment; MAX_SUPPORTED_RENDER_TARGET_COUNT],
        color_formats: [Option<TextureFormat>; MAX_SUPPORTED_RENDER_TARGET_COUNT],
        depth: VulkanAttachment,
        depth_format: Option<TextureFormat>,
    ) -> Result<Self> {
        let mut msaa_color: Vec<Option<VulkanTexture>> = Vec::new();
        msaa_color.resize_with(MAX_SUPPORTED_RENDER_TARGET_COUNT, || None);
        let mut msaa_depth = None;

        if samples > 1 {
            for index in 0..MAX_SUPPORTED_RENDER_TARGET_COUNT {
                if color[index].is_valid() && color[index].samples == 1 {
                    let format = color_formats[index].unwrap_or(TextureFormat::RGBA8);
                    msaa_color[index] = Some(VulkanTexture::new(
                        context,
                        cmdbuffer,
                        SamplerType::Sampler2d,
                        1,
                        format,
                        samples,
                        width,
                        height,
                        1,
                        TextureUsage::COLOR_ATTACHMENT,
                    )?);
                }
            }
            if depth.is_valid() && depth.samples == 1 {
                let format = depth_format.unwrap_or(TextureFormat::DEPTH32F);
                msaa_depth = Some(VulkanTexture::new(
                    context,
                    cmdbuffer,
                    SamplerType::Sampler2d,
                    1,
                    format,
                    samples,
                    width,
                    height,
                    1,
                    TextureUsage::DEPTH_ATTACHMENT,
                )?);
            }
        }

        Ok(Self {
            offscreen: true,
            width,
            height,
            samples,
            color,
            depth,
            msaa_color,
            msaa_depth,
        })
    }

    pub fn is_swapchain(&self) -> bool {
        !self.offscreen
    }

    pub fn samples(&self) -> u8 {
        self.samples
    }

    /// Offscreen extent; the default target follows the swap chain
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The attachment rendered into for color slot `index`
    pub fn color(&self, index: usize) -> Option<VulkanAttachment> {
        if !self.color[index].is_valid() {
            return None;
        }
        match &self.msaa_color[index] {
            Some(side) => Some(VulkanAttachment {
                image: side.image(),
                view: side.primary_view(),
                format: side.format(),
                samples: side.samples(),
            }),
            None => Some(self.color[index]),
        }
    }

    /// The single-sampled attachment a multisampled color slot resolves
    /// into, if any
    pub fn resolve(&self, index: usize) -> Option<VulkanAttachment> {
        if self.msaa_color[index].is_some() && self.color[index].is_valid() {
            Some(self.color[index])
        } else {
            None
        }
    }

    pub fn depth(&self) -> Option<VulkanAttachment> {
        if !self.depth.is_valid() {
            return None;
        }
        match &self.msaa_depth {
            Some(side) => Some(VulkanAttachment {
                image: side.image(),
                view: side.primary_view(),
                format: side.format(),
                samples: side.samples(),
            }),
            None => Some(self.depth),
        }
    }

    /// Bitmask of color slots needing a resolve attachment
    pub fn resolve_mask(&self) -> u8 {
        let mut mask = 0u8;
        for index in 0..MAX_SUPPORTED_RENDER_TARGET_COUNT {
            if self.resolve(index).is_some() {
                mask |= 1 << index;
            }
        }
        mask
    }
}

/// Flip a bottom-left viewport rect to Vulkan's top-left convention and
/// clamp it to the framebuffer
pub fn target_rect(fb_width: u32, fb_height: u32, viewport: &Viewport) -> vk::Rect2D {
    let flipped_y = fb_height as i64 - viewport.bottom as i64 - viewport.height as i64;
    let x = viewport.left.max(0) as i64;
    let y = flipped_y.max(0);
    let width = (viewport.width as i64).min(fb_width as i64 - x).max(0);
    let height = (viewport.height as i64).min(fb_height as i64 - y).max(0);
    vk::Rect2D {
        offset: vk::Offset2D {
            x: x as i32,
            y: y as i32,
        },
        extent: vk::Extent2D {
            width: width as u32,
            height: height as u32,
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_rect_flips_vertically() {
        let viewport = Viewport {
            left: 10,
            bottom: 20,
            width: 100,
            height: 50,
        };
        let rect = target_rect(640, 480, &viewport);
        assert_eq!(rect.offset.x, 10);
        // 480 - 20 - 50
        assert_eq!(rect.offset.y, 410);
        assert_eq!(rect.extent.width, 100);
        assert_eq!(rect.extent.height, 50);
    }

    #[test]
    fn test_target_rect_clamps_to_framebuffer() {
        let viewport = Viewport {
            left: 600,
            bottom: 0,
            width: 100,
            height: 500,
        };
        let rect = target_rect(640, 480, &viewport);
        assert_eq!(rect.extent.width, 40);
        assert_eq!(rect.offset.y, 0);
        assert_eq!(rect.extent.height, 480);
    }

    #[test]
    fn test_target_rect_negative_origin() {
        let viewport = Viewport {
            left: -10,
            bottom: -10,
            width: 20,
            height: 20,
        };
        let rect = target_rect(640, 480, &viewport);
        assert_eq!(rect.offset.x, 0);
        assert_eq!(rect.offset.y, 470);
        assert_eq!(rect.extent.height, 10);
    }
}
