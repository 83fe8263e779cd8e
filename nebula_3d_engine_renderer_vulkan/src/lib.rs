/*!
# Nebula 3D Engine - Vulkan Render Backend

Vulkan implementation of the Nebula3D render backend, built on `ash` and
`gpu-allocator`.

The entry point is [`VulkanRuntime`]: it owns the device context, the
command buffer ring, the transient staging memory pool and the pipeline,
framebuffer and sampler caches, and exposes the frame loop
(`begin_frame` / `draw` / `commit`) plus resource creation and updates.

GPU resources handed out by the runtime ([`VulkanTexture`],
[`VulkanBuffer`], [`VulkanProgram`], ...) are owned by the caller and
passed back into runtime operations by reference.
*/

mod debug;
mod vulkan_buffer;
mod vulkan_command_pool;
mod vulkan_context;
mod vulkan_fence;
mod vulkan_framebuffer_cache;
mod vulkan_memory_pool;
mod vulkan_pipeline_cache;
mod vulkan_program;
mod vulkan_render_target;
mod vulkan_runtime;
mod vulkan_sampler_cache;
mod vulkan_semaphore;
mod vulkan_swapchain;
mod vulkan_texture;
mod vulkan_utils;

pub use debug::{get_validation_stats, print_validation_stats_report, ValidationStats};
pub use vulkan_buffer::{
    VulkanBuffer, VulkanBufferObject, VulkanIndexBuffer, VulkanRenderPrimitive,
    VulkanUniformBuffer, VulkanVertexBuffer,
};
pub use vulkan_command_pool::{VulkanCommandBuffer, VulkanCommandPool};
pub use vulkan_context::VulkanContext;
pub use vulkan_fence::VulkanFence;
pub use vulkan_program::VulkanProgram;
pub use vulkan_render_target::{VulkanAttachment, VulkanRenderTarget};
pub use vulkan_runtime::{RuntimeConfig, VulkanRuntime};
pub use vulkan_semaphore::VulkanSemaphore;
pub use vulkan_swapchain::VulkanSwapChain;
pub use vulkan_texture::VulkanTexture;
