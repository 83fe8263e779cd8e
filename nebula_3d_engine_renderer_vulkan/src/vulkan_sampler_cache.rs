/// VulkanSamplerCache - memoizes `vk::Sampler` objects by sampler params
///
/// Samplers are tiny immutable objects, so they are created on first use
/// and kept until `reset`.

use ash::vk;
use nebula_3d_engine::engine_err;
use nebula_3d_engine::nebula3d::render::{
    SamplerCompareMode, SamplerMagFilter, SamplerMinFilter, SamplerParams, SamplerWrapMode,
};
use nebula_3d_engine::nebula3d::Result;
use rustc_hash::FxHashMap;

use crate::vulkan_context::VulkanContext;
use crate::vulkan_utils;

pub struct VulkanSamplerCache {
    samplers: FxHashMap<SamplerParams, vk::Sampler>,
}

impl VulkanSamplerCache {
    pub fn new() -> Self {
        Self {
            samplers: FxHashMap::default(),
        }
    }

    pub fn get(&mut self, context: &VulkanContext, params: SamplerParams) -> Result<vk::Sampler> {
        if let Some(sampler) = self.samplers.get(&params) {
            return Ok(*sampler);
        }

        let (min_filter, mipmap_mode, has_mips) = min_filter_to_vk(params.filter_min);
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(mag_filter_to_vk(params.filter_mag))
            .min_filter(min_filter)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(wrap_mode_to_vk(params.wrap_s))
            .address_mode_v(wrap_mode_to_vk(params.wrap_t))
            .address_mode_w(wrap_mode_to_vk(params.wrap_r))
            .anisotropy_enable(params.anisotropy_log2 != 0)
            .max_anisotropy((1u32 << params.anisotropy_log2) as f32)
            .compare_enable(params.compare_mode != SamplerCompareMode::None)
            .compare_op(vulkan_utils::compare_op_to_vk(params.compare_func))
            .min_lod(0.0)
            .max_lod(if has_mips { 12.0 } else { 0.25 })
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe {
            context
                .device
                .create_sampler(&create_info, None)
                .map_err(|e| engine_err!("nebula3d::vulkan", "Failed to create sampler: {:?}", e))?
        };
        self.samplers.insert(params, sampler);
        Ok(sampler)
    }

    pub fn reset(&mut self, context: &VulkanContext) {
        for (_, sampler) in self.samplers.drain() {
            unsafe {
                context.device.destroy_sampler(sampler, None);
            }
        }
    }
}

fn mag_filter_to_vk(filter: SamplerMagFilter) -> vk::Filter {
    match filter {
        SamplerMagFilter::Nearest => vk::Filter::NEAREST,
        SamplerMagFilter::Linear => vk::Filter::LINEAR,
    }
}

/// Returns the filter, the mipmap mode, and whether mips are sampled
fn min_filter_to_vk(filter: SamplerMinFilter) -> (vk::Filter, vk::SamplerMipmapMode, bool) {
    match filter {
        SamplerMinFilter::Nearest => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST, false),
        SamplerMinFilter::Linear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::NEAREST, false),
        SamplerMinFilter::NearestMipmapNearest => {
            (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST, true)
        }
        SamplerMinFilter::LinearMipmapNearest => {
            (vk::Filter::LINEAR, vk::SamplerMipmapMode::NEAREST, true)
        }
        SamplerMinFilter::NearestMipmapLinear => {
            (vk::Filter::NEAREST, vk::SamplerMipmapMode::LINEAR, true)
        }
        SamplerMinFilter::LinearMipmapLinear => {
            (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR, true)
        }
    }
}

fn wrap_mode_to_vk(mode: SamplerWrapMode) -> vk::SamplerAddressMode {
    match mode {
        SamplerWrapMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        SamplerWrapMode::Repeat => vk::SamplerAddressMode::REPEAT,
        SamplerWrapMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_filter_mapping() {
        assert_eq!(
            min_filter_to_vk(SamplerMinFilter::Linear),
            (vk::Filter::LINEAR, vk::SamplerMipmapMode::NEAREST, false)
        );
        assert_eq!(
            min_filter_to_vk(SamplerMinFilter::NearestMipmapLinear),
            (vk::Filter::NEAREST, vk::SamplerMipmapMode::LINEAR, true)
        );
    }

    #[test]
    fn test_wrap_mode_mapping() {
        assert_eq!(
            wrap_mode_to_vk(SamplerWrapMode::ClampToEdge),
            vk::SamplerAddressMode::CLAMP_TO_EDGE
        );
        assert_eq!(
            wrap_mode_to_vk(SamplerWrapMode::MirroredRepeat),
            vk::SamplerAddressMode::MIRRORED_REPEAT
        );
    }
}
