/// VulkanSemaphore - thin wrapper over vk::Semaphore

use ash::vk;
use nebula_3d_engine::engine_err;
use nebula_3d_engine::nebula3d::Result;

pub struct VulkanSemaphore {
    device: ash::Device,
    semaphore: vk::Semaphore,
}

impl VulkanSemaphore {
    pub fn new(device: ash::Device) -> Result<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe {
            device.create_semaphore(&create_info, None).map_err(|e| {
                engine_err!("nebula3d::vulkan", "Failed to create semaphore: {:?}", e)
            })?
        };
        Ok(Self { device, semaphore })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}
