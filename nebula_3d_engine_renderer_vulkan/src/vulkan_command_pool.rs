/// VulkanCommandPool - ring of command buffers with submission tracking
///
/// Owns `COMMAND_BUFFER_COUNT` primary command buffers, each paired with
/// a fence and a submission semaphore. `get` hands out the buffer being
/// recorded, starting a new one when needed; `flush` submits it; `gc`
/// recycles buffers whose fence has signaled.
///
/// Submissions are chained: each submit waits on the previous submit's
/// semaphore (and on the swapchain acquire semaphore when one is
/// pending) and signals its own slot semaphore, which presentation can
/// consume through `take_finished_signal`.

use ash::vk;
use nebula_3d_engine::engine_err;
use nebula_3d_engine::nebula3d::render::COMMAND_BUFFER_COUNT;
use nebula_3d_engine::nebula3d::Result;

use crate::vulkan_context::VulkanContext;
use crate::vulkan_fence::VulkanFence;
use crate::vulkan_semaphore::VulkanSemaphore;

const FENCE_TIMEOUT_NS: u64 = u64::MAX;

/// A command buffer handed out by the pool, tagged with its ring slot
#[derive(Clone, Copy)]
pub struct VulkanCommandBuffer {
    pub cmdbuffer: vk::CommandBuffer,
    pub index: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SlotState {
    Free,
    Recording,
    Submitted,
}

/// Pure ring bookkeeping, separate from the device calls
struct CommandBufferRing {
    states: [SlotState; COMMAND_BUFFER_COUNT],
    current: Option<usize>,
}

impl CommandBufferRing {
    fn new() -> Self {
        Self {
            states: [SlotState::Free; COMMAND_BUFFER_COUNT],
            current: None,
        }
    }

    fn current(&self) -> Option<usize> {
        self.current
    }

    fn free_count(&self) -> usize {
        self.states.iter().filter(|s| **s == SlotState::Free).count()
    }

    /// Mark the first free slot as recording and make it current
    fn acquire(&mut self) -> Option<usize> {
        debug_assert!(self.current.is_none());
        let slot = self.states.iter().position(|s| *s == SlotState::Free)?;
        self.states[slot] = SlotState::Recording;
        self.current = Some(slot);
        Some(slot)
    }

    /// Move the current slot to submitted, returning its index
    fn submit_current(&mut self) -> Option<usize> {
        let slot = self.current.take()?;
        debug_assert_eq!(self.states[slot], SlotState::Recording);
        self.states[slot] = SlotState::Submitted;
        Some(slot)
    }

    /// Recycle submitted slots whose fence the probe reports signaled,
    /// returning them for native cleanup
    fn collect(&mut self, mut signaled: impl FnMut(usize) -> bool) -> Vec<usize> {
        let mut recycled = Vec::new();
        for slot in 0..COMMAND_BUFFER_COUNT {
            if self.states[slot] == SlotState::Submitted && signaled(slot) {
                self.states[slot] = SlotState::Free;
                recycled.push(slot);
            }
        }
        recycled
    }

    fn submitted_slots(&self) -> Vec<usize> {
        (0..COMMAND_BUFFER_COUNT)
            .filter(|i| self.states[*i] == SlotState::Submitted)
            .collect()
    }
}

pub struct VulkanCommandPool {
    device: ash::Device,
    queue: vk::Queue,
    pool: vk::CommandPool,
    cmdbuffers: [vk::CommandBuffer; COMMAND_BUFFER_COUNT],
    fences: Vec<VulkanFence>,
    submission_signals: Vec<VulkanSemaphore>,
    ring: CommandBufferRing,
    /// Semaphore from `vkAcquireNextImageKHR`, waited on by the next submit
    acquire_next_image_signal: Option<vk::Semaphore>,
    /// Semaphore signaled by the last submit, waited on by the next submit
    /// or taken by presentation
    finished_signal: Option<vk::Semaphore>,
}

impl VulkanCommandPool {
    pub fn new(context: &VulkanContext) -> Result<Self> {
        let device = context.device.clone();

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(context.graphics_queue_family);
        let pool = unsafe {
            device.create_command_pool(&pool_info, None).map_err(|e| {
                engine_err!("nebula3d::vulkan", "Failed to create command pool: {:?}", e)
            })?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(COMMAND_BUFFER_COUNT as u32);
        let buffers = unsafe {
            device.allocate_command_buffers(&alloc_info).map_err(|e| {
                engine_err!("nebula3d::vulkan", "Failed to allocate command buffers: {:?}", e)
            })?
        };
        let mut cmdbuffers = [vk::CommandBuffer::null(); COMMAND_BUFFER_COUNT];
        cmdbuffers.copy_from_slice(&buffers);

        let mut fences = Vec::with_capacity(COMMAND_BUFFER_COUNT);
        let mut submission_signals = Vec::with_capacity(COMMAND_BUFFER_COUNT);
        for _ in 0..COMMAND_BUFFER_COUNT {
            fences.push(VulkanFence::new(device.clone(), false)?);
            submission_signals.push(VulkanSemaphore::new(device.clone())?);
        }

        Ok(Self {
            device,
            queue: context.graphics_queue,
            pool,
            cmdbuffers,
            fences,
            submission_signals,
            ring: CommandBufferRing::new(),
            acquire_next_image_signal: None,
            finished_signal: None,
        })
    }

    /// Command buffer currently being recorded, if any
    pub fn current(&self) -> Option<VulkanCommandBuffer> {
        self.ring.current().map(|index| VulkanCommandBuffer {
            cmdbuffer: self.cmdbuffers[index],
            index,
        })
    }

    /// Get the command buffer being recorded, beginning a new one if
    /// necessary. Blocks on in-flight fences when the ring is exhausted.
    ///
    /// Returns the buffer plus the slot index when a new buffer was
    /// begun, so per-buffer state caches can be invalidated.
    pub fn get(&mut self) -> Result<(VulkanCommandBuffer, Option<usize>)> {
        if let Some(current) = self.current() {
            return Ok((current, None));
        }

        while self.ring.free_count() == 0 {
            self.wait()?;
        }

        // free_count > 0, acquire cannot fail
        let index = self.ring.acquire().ok_or_else(|| {
            engine_err!("nebula3d::vulkan", "Command buffer ring exhausted")
        })?;
        let cmdbuffer = self.cmdbuffers[index];

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .begin_command_buffer(cmdbuffer, &begin_info)
                .map_err(|e| {
                    engine_err!("nebula3d::vulkan", "Failed to begin command buffer: {:?}", e)
                })?;
        }

        Ok((VulkanCommandBuffer { cmdbuffer, index }, Some(index)))
    }

    /// Submit the current command buffer. Returns false when nothing was
    /// recorded since the last flush.
    pub fn flush(&mut self) -> Result<bool> {
        let Some(index) = self.ring.current() else {
            return Ok(false);
        };
        let cmdbuffer = self.cmdbuffers[index];

        unsafe {
            self.device.end_command_buffer(cmdbuffer).map_err(|e| {
                engine_err!("nebula3d::vulkan", "Failed to end command buffer: {:?}", e)
            })?;
        }

        let mut wait_semaphores = Vec::with_capacity(2);
        if let Some(signal) = self.finished_signal.take() {
            wait_semaphores.push(signal);
        }
        if let Some(signal) = self.acquire_next_image_signal.take() {
            wait_semaphores.push(signal);
        }
        let wait_stages =
            vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];

        let signal_semaphores = [self.submission_signals[index].handle()];
        let cmdbuffers = [cmdbuffer];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&cmdbuffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], self.fences[index].handle())
                .map_err(|e| {
                    engine_err!("nebula3d::vulkan", "Failed to submit command buffer: {:?}", e)
                })?;
        }

        self.ring.submit_current();
        self.finished_signal = Some(self.submission_signals[index].handle());
        Ok(true)
    }

    /// Block until all submitted command buffers complete, then recycle them
    pub fn wait(&mut self) -> Result<()> {
        let submitted = self.ring.submitted_slots();
        if !submitted.is_empty() {
            for index in &submitted {
                self.fences[*index].wait(FENCE_TIMEOUT_NS)?;
            }
        }
        self.gc()
    }

    /// Recycle command buffers whose submission fence has signaled
    pub fn gc(&mut self) -> Result<()> {
        let fences = &self.fences;
        let mut probe_error = None;
        let recycled = self.ring.collect(|slot| {
            if probe_error.is_some() {
                return false;
            }
            match fences[slot].status() {
                Ok(signaled) => signaled,
                Err(e) => {
                    probe_error = Some(e);
                    false
                }
            }
        });
        for index in recycled {
            unsafe {
                self.device
                    .reset_command_buffer(
                        self.cmdbuffers[index],
                        vk::CommandBufferResetFlags::empty(),
                    )
                    .map_err(|e| {
                        engine_err!(
                            "nebula3d::vulkan",
                            "Failed to reset command buffer: {:?}",
                            e
                        )
                    })?;
            }
            self.fences[index].reset()?;
        }
        match probe_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Hand over the swapchain acquire semaphore. The next submit waits
    /// on it before touching the swapchain image.
    pub fn set_acquire_next_image_signal(&mut self, semaphore: vk::Semaphore) {
        self.acquire_next_image_signal = Some(semaphore);
    }

    /// Take the semaphore signaled by the most recent submit, for
    /// presentation to wait on. The next submit then no longer waits on it.
    pub fn take_finished_signal(&mut self) -> Option<vk::Semaphore> {
        self.finished_signal.take()
    }
}

impl Drop for VulkanCommandPool {
    fn drop(&mut self) {
        self.fences.clear();
        self.submission_signals.clear();
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "vulkan_command_pool_tests.rs"]
mod tests;
