/// VulkanMemoryPool - recycling pool for transient staging memory
///
/// Staging buffers are recycled best-fit by capacity; staging images are
/// recycled on an exact match of format and size. Records unused for
/// `TIME_BEFORE_EVICTION` frames are evicted: used records are first
/// demoted to the free list, free records are destroyed.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use nebula_3d_engine::nebula3d::render::COMMAND_BUFFER_COUNT;
use nebula_3d_engine::{engine_err, engine_error};
use nebula_3d_engine::nebula3d::{Error, Result};

use crate::vulkan_context::VulkanContext;

/// Number of gc cycles a record may sit unused before eviction. Matches
/// the command buffer ring depth so memory is never reclaimed while a
/// submitted command buffer may still reference it.
const TIME_BEFORE_EVICTION: u64 = COMMAND_BUFFER_COUNT as u64;

/// A host-visible staging buffer
pub struct VulkanBufferMemory {
    pub buffer: vk::Buffer,
    pub capacity: u64,
    allocation: Option<Allocation>,
}

impl VulkanBufferMemory {
    /// Copy `data` into the mapped buffer at `offset`
    pub fn write_bytes(&self, data: &[u8], offset: usize) -> Result<()> {
        if offset + data.len() > self.capacity as usize {
            return Err(engine_err!(
                "nebula3d::vulkan",
                "Staging write of {} bytes at offset {} exceeds capacity {}",
                data.len(),
                offset,
                self.capacity
            ));
        }
        let mapped = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| {
                engine_err!("nebula3d::vulkan", "Staging buffer is not host mapped")
            })?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                mapped.as_ptr().cast::<u8>().add(offset),
                data.len(),
            );
        }
        Ok(())
    }

    /// Read `data.len()` bytes from the mapped buffer at `offset`
    pub fn read_bytes(&self, data: &mut [u8], offset: usize) -> Result<()> {
        if offset + data.len() > self.capacity as usize {
            return Err(engine_err!(
                "nebula3d::vulkan",
                "Staging read of {} bytes at offset {} exceeds capacity {}",
                data.len(),
                offset,
                self.capacity
            ));
        }
        let mapped = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| {
                engine_err!("nebula3d::vulkan", "Staging buffer is not host mapped")
            })?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                mapped.as_ptr().cast::<u8>().add(offset),
                data.as_mut_ptr(),
                data.len(),
            );
        }
        Ok(())
    }
}

/// A linear-tiled host-visible staging image, used for format-converting
/// texture uploads via blit
pub struct VulkanImageMemory {
    pub image: vk::Image,
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    /// Current image layout, PREINITIALIZED until the first transition
    layout: Cell<vk::ImageLayout>,
    allocation: Option<Allocation>,
}

impl VulkanImageMemory {
    pub fn mapped_ptr(&self) -> Result<NonNull<std::ffi::c_void>> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| engine_err!("nebula3d::vulkan", "Staging image is not host mapped"))
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout.get()
    }

    pub fn set_layout(&self, layout: vk::ImageLayout) {
        self.layout.set(layout);
    }
}

/// Key identifying an exactly reusable staging image
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct ImageKey {
    format: vk::Format,
    width: u32,
    height: u32,
}

// ----------------------------------------------------------------------------
// Pure pool bookkeeping
// ----------------------------------------------------------------------------

struct FreeEntry<T> {
    last_accessed: u64,
    payload: T,
}

struct UsedEntry<T> {
    last_accessed: u64,
    capacity: u64,
    payload: T,
}

/// Best-fit pool keyed by capacity. The free list is ordered by
/// capacity, with a serial to keep equal capacities distinct.
struct BestFitPool<T> {
    current_frame: u64,
    serial: u64,
    free: BTreeMap<(u64, u64), FreeEntry<T>>,
    used: Vec<UsedEntry<T>>,
}

impl<T> BestFitPool<T> {
    fn new() -> Self {
        Self {
            current_frame: 0,
            serial: 0,
            free: BTreeMap::new(),
            used: Vec::new(),
        }
    }

    /// Reuse the smallest free record of at least `capacity` bytes.
    /// Returns an index valid until the next mutation.
    fn acquire(&mut self, capacity: u64) -> Option<usize> {
        let key = *self.free.range((capacity, 0)..).next()?.0;
        let entry = self.free.remove(&key).unwrap();
        self.used.push(UsedEntry {
            last_accessed: self.current_frame,
            capacity: key.0,
            payload: entry.payload,
        });
        Some(self.used.len() - 1)
    }

    /// Register a freshly created record as used
    fn insert_used(&mut self, capacity: u64, payload: T) -> usize {
        self.used.push(UsedEntry {
            last_accessed: self.current_frame,
            capacity,
            payload,
        });
        self.used.len() - 1
    }

    fn payload(&self, index: usize) -> &T {
        &self.used[index].payload
    }

    /// Advance the frame counter, demote stale used records to the free
    /// list and return the evicted free records.
    fn gc(&mut self) -> Vec<T> {
        self.current_frame += 1;
        if self.current_frame <= TIME_BEFORE_EVICTION {
            return Vec::new();
        }
        let evict_time = self.current_frame - TIME_BEFORE_EVICTION;

        let stale: Vec<(u64, u64)> = self
            .free
            .iter()
            .filter(|(_, entry)| entry.last_accessed < evict_time)
            .map(|(key, _)| *key)
            .collect();
        let mut evicted = Vec::with_capacity(stale.len());
        for key in stale {
            evicted.push(self.free.remove(&key).unwrap().payload);
        }

        let mut index = 0;
        while index < self.used.len() {
            if self.used[index].last_accessed < evict_time {
                let entry = self.used.swap_remove(index);
                self.serial += 1;
                self.free.insert(
                    (entry.capacity, self.serial),
                    FreeEntry {
                        last_accessed: self.current_frame,
                        payload: entry.payload,
                    },
                );
            } else {
                index += 1;
            }
        }
        evicted
    }

    fn drain(&mut self) -> Vec<T> {
        let mut all: Vec<T> = self.used.drain(..).map(|e| e.payload).collect();
        let free = std::mem::take(&mut self.free);
        all.extend(free.into_values().map(|e| e.payload));
        all
    }

    fn free_count(&self) -> usize {
        self.free.len()
    }

    fn used_count(&self) -> usize {
        self.used.len()
    }
}

/// Exact-match pool for records that cannot be partially reused
struct ExactFitPool<K, T> {
    current_frame: u64,
    free: Vec<(K, FreeEntry<T>)>,
    used: Vec<(K, UsedEntry<T>)>,
}

impl<K: PartialEq + Copy, T> ExactFitPool<K, T> {
    fn new() -> Self {
        Self {
            current_frame: 0,
            free: Vec::new(),
            used: Vec::new(),
        }
    }

    fn acquire(&mut self, key: K) -> Option<usize> {
        let position = self.free.iter().position(|(k, _)| *k == key)?;
        let (key, entry) = self.free.swap_remove(position);
        self.used.push((
            key,
            UsedEntry {
                last_accessed: self.current_frame,
                capacity: 0,
                payload: entry.payload,
            },
        ));
        Some(self.used.len() - 1)
    }

    fn insert_used(&mut self, key: K, payload: T) -> usize {
        self.used.push((
            key,
            UsedEntry {
                last_accessed: self.current_frame,
                capacity: 0,
                payload,
            },
        ));
        self.used.len() - 1
    }

    fn payload(&self, index: usize) -> &T {
        &self.used[index].1.payload
    }

    fn gc(&mut self) -> Vec<T> {
        self.current_frame += 1;
        if self.current_frame <= TIME_BEFORE_EVICTION {
            return Vec::new();
        }
        let evict_time = self.current_frame - TIME_BEFORE_EVICTION;

        let mut evicted = Vec::new();
        let mut index = 0;
        while index < self.free.len() {
            if self.free[index].1.last_accessed < evict_time {
                evicted.push(self.free.swap_remove(index).1.payload);
            } else {
                index += 1;
            }
        }

        index = 0;
        while index < self.used.len() {
            if self.used[index].1.last_accessed < evict_time {
                let (key, entry) = self.used.swap_remove(index);
                self.free.push((
                    key,
                    FreeEntry {
                        last_accessed: self.current_frame,
                        payload: entry.payload,
                    },
                ));
            } else {
                index += 1;
            }
        }
        evicted
    }

    fn drain(&mut self) -> Vec<T> {
        let mut all: Vec<T> = self.used.drain(..).map(|(_, e)| e.payload).collect();
        all.extend(self.free.drain(..).map(|(_, e)| e.payload));
        all
    }

    fn free_count(&self) -> usize {
        self.free.len()
    }

    fn used_count(&self) -> usize {
        self.used.len()
    }
}

// ----------------------------------------------------------------------------
// Device-backed pool
// ----------------------------------------------------------------------------

pub struct VulkanMemoryPool {
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    buffers: BestFitPool<VulkanBufferMemory>,
    images: ExactFitPool<ImageKey, VulkanImageMemory>,
}

impl VulkanMemoryPool {
    pub fn new(context: &VulkanContext) -> Self {
        Self {
            device: context.device.clone(),
            allocator: Arc::clone(&context.allocator),
            buffers: BestFitPool::new(),
            images: ExactFitPool::new(),
        }
    }

    /// Acquire a host-visible staging buffer of at least `num_bytes`,
    /// reusing a pooled one when possible. The buffer stays alive for at
    /// least `TIME_BEFORE_EVICTION` gc cycles after its last use.
    pub fn acquire_buffer(&mut self, num_bytes: u64) -> Result<&VulkanBufferMemory> {
        if let Some(index) = self.buffers.acquire(num_bytes) {
            return Ok(self.buffers.payload(index));
        }
        let memory = self.create_buffer(num_bytes)?;
        let index = self.buffers.insert_used(num_bytes, memory);
        Ok(self.buffers.payload(index))
    }

    /// Acquire a linear-tiled staging image matching the format and size
    /// exactly
    pub fn acquire_image(
        &mut self,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> Result<&VulkanImageMemory> {
        let key = ImageKey {
            format,
            width,
            height,
        };
        if let Some(index) = self.images.acquire(key) {
            return Ok(self.images.payload(index));
        }
        let memory = self.create_image(format, width, height)?;
        let index = self.images.insert_used(key, memory);
        Ok(self.images.payload(index))
    }

    /// Run one eviction cycle, destroying records unused long enough
    pub fn gc(&mut self) {
        for memory in self.buffers.gc() {
            self.destroy_buffer_memory(memory);
        }
        for memory in self.images.gc() {
            self.destroy_image_memory(memory);
        }
    }

    fn create_buffer(&self, num_bytes: u64) -> Result<VulkanBufferMemory> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(num_bytes)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            self.device.create_buffer(&buffer_info, None).map_err(|e| {
                engine_err!("nebula3d::vulkan", "Failed to create staging buffer: {:?}", e)
            })?
        };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = self
            .allocator
            .lock()
            .unwrap()
            .allocate(&AllocationCreateDesc {
                name: "staging buffer",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { self.device.destroy_buffer(buffer, None) };
                engine_error!("nebula3d::vulkan", "Staging buffer allocation failed: {:?}", e);
                Error::OutOfMemory
            })?;

        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| {
                    engine_err!("nebula3d::vulkan", "Failed to bind staging buffer: {:?}", e)
                })?;
        }

        Ok(VulkanBufferMemory {
            buffer,
            capacity: num_bytes,
            allocation: Some(allocation),
        })
    }

    fn create_image(
        &self,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> Result<VulkanImageMemory> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::LINEAR)
            .usage(vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::PREINITIALIZED);
        let image = unsafe {
            self.device.create_image(&image_info, None).map_err(|e| {
                engine_err!("nebula3d::vulkan", "Failed to create staging image: {:?}", e)
            })?
        };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = self
            .allocator
            .lock()
            .unwrap()
            .allocate(&AllocationCreateDesc {
                name: "staging image",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { self.device.destroy_image(image, None) };
                engine_error!("nebula3d::vulkan", "Staging image allocation failed: {:?}", e);
                Error::OutOfMemory
            })?;

        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .map_err(|e| {
                    engine_err!("nebula3d::vulkan", "Failed to bind staging image: {:?}", e)
                })?;
        }

        Ok(VulkanImageMemory {
            image,
            format,
            width,
            height,
            layout: Cell::new(vk::ImageLayout::PREINITIALIZED),
            allocation: Some(allocation),
        })
    }

    fn destroy_buffer_memory(&self, mut memory: VulkanBufferMemory) {
        if let Some(allocation) = memory.allocation.take() {
            let _ = self.allocator.lock().unwrap().free(allocation);
        }
        unsafe {
            self.device.destroy_buffer(memory.buffer, None);
        }
    }

    fn destroy_image_memory(&self, mut memory: VulkanImageMemory) {
        if let Some(allocation) = memory.allocation.take() {
            let _ = self.allocator.lock().unwrap().free(allocation);
        }
        unsafe {
            self.device.destroy_image(memory.image, None);
        }
    }
}

impl Drop for VulkanMemoryPool {
    fn drop(&mut self) {
        for memory in self.buffers.drain() {
            self.destroy_buffer_memory(memory);
        }
        for memory in self.images.drain() {
            self.destroy_image_memory(memory);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "vulkan_memory_pool_tests.rs"]
mod tests;
