/// VulkanFence - thin wrapper over vk::Fence
///
/// Owned by its command buffer slot; the pool polls `status` during gc
/// and blocks on `wait` when the ring is exhausted.

use ash::vk;
use nebula_3d_engine::engine_err;
use nebula_3d_engine::nebula3d::Result;

pub struct VulkanFence {
    device: ash::Device,
    fence: vk::Fence,
}

impl VulkanFence {
    /// Create a fence, optionally already signaled
    pub fn new(device: ash::Device, signaled: bool) -> Result<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(|e| engine_err!("nebula3d::vulkan", "Failed to create fence: {:?}", e))?
        };
        Ok(Self { device, fence })
    }

    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Whether the fence is signaled (non-blocking)
    pub fn status(&self) -> Result<bool> {
        unsafe {
            self.device
                .get_fence_status(self.fence)
                .map_err(|e| engine_err!("nebula3d::vulkan", "Failed to query fence: {:?}", e))
        }
    }

    /// Block until the fence signals or `timeout_ns` elapses
    pub fn wait(&self, timeout_ns: u64) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout_ns)
                .map_err(|e| engine_err!("nebula3d::vulkan", "Failed to wait for fence: {:?}", e))
        }
    }

    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .map_err(|e| engine_err!("nebula3d::vulkan", "Failed to reset fence: {:?}", e))
        }
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}
