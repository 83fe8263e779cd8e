/// VulkanProgram - precompiled SPIR-V shader pair
///
/// Programs are created from SPIR-V blobs produced offline; no shader
/// compilation happens in the backend.

use std::io::Cursor;

use ash::vk;
use nebula_3d_engine::engine_err;
use nebula_3d_engine::nebula3d::render::SHADER_MODULE_COUNT;
use nebula_3d_engine::nebula3d::Result;

use crate::vulkan_context::VulkanContext;

pub struct VulkanProgram {
    device: ash::Device,
    name: String,
    shaders: [vk::ShaderModule; SHADER_MODULE_COUNT],
    /// Descriptor bindings of the program's sampler blocks, in the order
    /// the frontend refers to them
    sampler_bindings: Vec<u32>,
}

impl VulkanProgram {
    pub fn new(
        context: &VulkanContext,
        name: &str,
        vertex_spirv: &[u8],
        fragment_spirv: &[u8],
        sampler_bindings: Vec<u32>,
    ) -> Result<Self> {
        let device = context.device.clone();
        let vertex = create_shader_module(&device, name, vertex_spirv)?;
        let fragment = match create_shader_module(&device, name, fragment_spirv) {
            Ok(fragment) => fragment,
            Err(e) => {
                unsafe { device.destroy_shader_module(vertex, None) };
                return Err(e);
            }
        };
        Ok(Self {
            device,
            name: name.to_string(),
            shaders: [vertex, fragment],
            sampler_bindings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vertex and fragment modules, in pipeline stage order
    pub fn shader_modules(&self) -> [vk::ShaderModule; SHADER_MODULE_COUNT] {
        self.shaders
    }

    pub fn sampler_bindings(&self) -> &[u32] {
        &self.sampler_bindings
    }
}

impl Drop for VulkanProgram {
    fn drop(&mut self) {
        unsafe {
            for shader in self.shaders {
                self.device.destroy_shader_module(shader, None);
            }
        }
    }
}

fn create_shader_module(device: &ash::Device, name: &str, spirv: &[u8]) -> Result<vk::ShaderModule> {
    let code = ash::util::read_spv(&mut Cursor::new(spirv)).map_err(|e| {
        engine_err!("nebula3d::vulkan", "Invalid SPIR-V blob for program '{}': {}", name, e)
    })?;
    let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
    unsafe {
        device.create_shader_module(&create_info, None).map_err(|e| {
            engine_err!(
                "nebula3d::vulkan",
                "Failed to create shader module for program '{}': {:?}",
                name,
                e
            )
        })
    }
}
