/// GPU buffer resources: device-local buffers with staged upload, mapped
/// uniform buffers, and the vertex/index aggregates the frontend draws
/// with.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use nebula_3d_engine::{engine_err, engine_error};
use nebula_3d_engine::nebula3d::render::{Attribute, AttributeArray, PrimitiveType};
use nebula_3d_engine::nebula3d::{Error, Result};

use crate::vulkan_command_pool::VulkanCommandPool;
use crate::vulkan_context::VulkanContext;
use crate::vulkan_memory_pool::VulkanMemoryPool;

/// Device-local buffer. Uploads go through a pooled staging buffer and a
/// transfer on the current command buffer.
pub struct VulkanBuffer {
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    byte_count: u64,
}

impl VulkanBuffer {
    pub fn new(
        context: &VulkanContext,
        usage: vk::BufferUsageFlags,
        byte_count: u64,
    ) -> Result<Self> {
        let device = context.device.clone();
        let buffer_info = vk::BufferCreateInfo::default()
            .size(byte_count)
            .usage(usage | vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            device
                .create_buffer(&buffer_info, None)
                .map_err(|e| engine_err!("nebula3d::vulkan", "Failed to create buffer: {:?}", e))?
        };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = context
            .allocator
            .lock()
            .unwrap()
            .allocate(&AllocationCreateDesc {
                name: "buffer",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { device.destroy_buffer(buffer, None) };
                engine_error!("nebula3d::vulkan", "Buffer allocation failed: {:?}", e);
                Error::OutOfMemory
            })?;

        unsafe {
            device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| {
                    engine_err!("nebula3d::vulkan", "Failed to bind buffer memory: {:?}", e)
                })?;
        }

        Ok(Self {
            device,
            allocator: Arc::clone(&context.allocator),
            buffer,
            allocation: Some(allocation),
            byte_count,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    /// Stage `data` and record a copy into this buffer at `byte_offset`,
    /// followed by a barrier making the data visible to vertex input and
    /// later transfers.
    pub fn upload(
        &self,
        memory_pool: &mut VulkanMemoryPool,
        cmdbuffer: vk::CommandBuffer,
        data: &[u8],
        byte_offset: u64,
    ) -> Result<()> {
        if byte_offset + data.len() as u64 > self.byte_count {
            return Err(Error::InvalidPrecondition(format!(
                "Upload of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                byte_offset,
                self.byte_count
            )));
        }
        let staging = memory_pool.acquire_buffer(data.len() as u64)?;
        staging.write_bytes(data, 0)?;

        let region = vk::BufferCopy::default()
            .src_offset(0)
            .dst_offset(byte_offset)
            .size(data.len() as u64);
        let barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(
                vk::AccessFlags::VERTEX_ATTRIBUTE_READ
                    | vk::AccessFlags::INDEX_READ
                    | vk::AccessFlags::TRANSFER_WRITE,
            )
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(self.buffer)
            .offset(byte_offset)
            .size(data.len() as u64);
        unsafe {
            self.device
                .cmd_copy_buffer(cmdbuffer, staging.buffer, self.buffer, &[region]);
            self.device.cmd_pipeline_barrier(
                cmdbuffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::VERTEX_INPUT | vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }
        Ok(())
    }

    /// Synchronously read the buffer back. Stalls the device: records a
    /// copy to staging, flushes and waits, then reads the mapped staging
    /// memory.
    pub fn download(
        &self,
        command_pool: &mut VulkanCommandPool,
        memory_pool: &mut VulkanMemoryPool,
    ) -> Result<Vec<u8>> {
        let (command, _) = command_pool.get()?;
        let staging = memory_pool.acquire_buffer(self.byte_count)?;
        let staging_buffer = staging.buffer;

        let region = vk::BufferCopy::default().size(self.byte_count);
        let barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(staging_buffer)
            .size(self.byte_count);
        unsafe {
            self.device
                .cmd_copy_buffer(command.cmdbuffer, self.buffer, staging_buffer, &[region]);
            self.device.cmd_pipeline_barrier(
                command.cmdbuffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }

        command_pool.flush()?;
        command_pool.wait()?;

        let mut data = vec![0u8; self.byte_count as usize];
        staging.read_bytes(&mut data, 0)?;
        Ok(data)
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let _ = self.allocator.lock().unwrap().free(allocation);
        }
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Host-visible uniform buffer, written directly through the mapping
pub struct VulkanUniformBuffer {
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    byte_count: u64,
}

impl VulkanUniformBuffer {
    pub fn new(context: &VulkanContext, byte_count: u64) -> Result<Self> {
        let device = context.device.clone();
        let buffer_info = vk::BufferCreateInfo::default()
            .size(byte_count)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            device.create_buffer(&buffer_info, None).map_err(|e| {
                engine_err!("nebula3d::vulkan", "Failed to create uniform buffer: {:?}", e)
            })?
        };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = context
            .allocator
            .lock()
            .unwrap()
            .allocate(&AllocationCreateDesc {
                name: "uniform buffer",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { device.destroy_buffer(buffer, None) };
                engine_error!("nebula3d::vulkan", "Uniform buffer allocation failed: {:?}", e);
                Error::OutOfMemory
            })?;

        unsafe {
            device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| {
                    engine_err!("nebula3d::vulkan", "Failed to bind uniform buffer: {:?}", e)
                })?;
        }

        Ok(Self {
            device,
            allocator: Arc::clone(&context.allocator),
            buffer,
            allocation: Some(allocation),
            byte_count,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    pub fn load(&self, data: &[u8], byte_offset: u64) -> Result<()> {
        if byte_offset + data.len() as u64 > self.byte_count {
            return Err(Error::InvalidPrecondition(format!(
                "Uniform load of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                byte_offset,
                self.byte_count
            )));
        }
        let mapped = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| {
                engine_err!("nebula3d::vulkan", "Uniform buffer is not host mapped")
            })?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                mapped.as_ptr().cast::<u8>().add(byte_offset as usize),
                data.len(),
            );
        }
        Ok(())
    }
}

impl Drop for VulkanUniformBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let _ = self.allocator.lock().unwrap().free(allocation);
        }
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// A device-local buffer holding arbitrary vertex data, referenced by
/// vertex buffers through its slot index
pub struct VulkanBufferObject {
    pub buffer: VulkanBuffer,
}

impl VulkanBufferObject {
    pub fn new(context: &VulkanContext, byte_count: u64) -> Result<Self> {
        Ok(Self {
            buffer: VulkanBuffer::new(context, vk::BufferUsageFlags::VERTEX_BUFFER, byte_count)?,
        })
    }
}

/// Vertex declaration plus the buffer objects backing each slot
pub struct VulkanVertexBuffer {
    pub vertex_count: u32,
    pub attributes: AttributeArray,
    buffers: Vec<vk::Buffer>,
}

impl VulkanVertexBuffer {
    pub fn new(vertex_count: u32, buffer_count: u8, attributes: AttributeArray) -> Self {
        Self {
            vertex_count,
            attributes,
            buffers: vec![vk::Buffer::null(); buffer_count as usize],
        }
    }

    pub fn set_buffer_object_at(
        &mut self,
        index: usize,
        buffer_object: &VulkanBufferObject,
    ) -> Result<()> {
        self.set_buffer_at(index, buffer_object.buffer.handle())
    }

    fn set_buffer_at(&mut self, index: usize, buffer: vk::Buffer) -> Result<()> {
        if index >= self.buffers.len() {
            return Err(Error::InvalidPrecondition(format!(
                "Vertex buffer slot {} out of range ({} slots)",
                index,
                self.buffers.len()
            )));
        }
        self.buffers[index] = buffer;
        Ok(())
    }

    pub fn buffers(&self) -> &[vk::Buffer] {
        &self.buffers
    }
}

/// Index type from the element size declared by the frontend
fn index_type_for(element_size: u32) -> vk::IndexType {
    if element_size == 2 {
        vk::IndexType::UINT16
    } else {
        vk::IndexType::UINT32
    }
}

pub struct VulkanIndexBuffer {
    pub buffer: VulkanBuffer,
    pub index_type: vk::IndexType,
    pub element_size: u32,
    pub index_count: u32,
}

impl VulkanIndexBuffer {
    pub fn new(context: &VulkanContext, element_size: u32, index_count: u32) -> Result<Self> {
        let buffer = VulkanBuffer::new(
            context,
            vk::BufferUsageFlags::INDEX_BUFFER,
            element_size as u64 * index_count as u64,
        )?;
        Ok(Self {
            buffer,
            index_type: index_type_for(element_size),
            element_size,
            index_count,
        })
    }
}

/// A drawable primitive: the vertex declaration and buffer handles
/// captured from a vertex/index buffer pair, plus topology and range
pub struct VulkanRenderPrimitive {
    pub primitive_type: PrimitiveType,
    /// Byte offset of the first index
    pub offset: u32,
    /// Number of indices to draw
    pub count: u32,
    pub attributes: AttributeArray,
    pub vertex_buffers: Vec<vk::Buffer>,
    pub index_buffer: vk::Buffer,
    pub index_type: vk::IndexType,
    pub index_element_size: u32,
}

impl VulkanRenderPrimitive {
    pub fn new() -> Self {
        Self {
            primitive_type: PrimitiveType::Triangles,
            offset: 0,
            count: 0,
            attributes: [Attribute::default(); nebula_3d_engine::nebula3d::render::VERTEX_ATTRIBUTE_COUNT],
            vertex_buffers: Vec::new(),
            index_buffer: vk::Buffer::null(),
            index_type: vk::IndexType::UINT32,
            index_element_size: 4,
        }
    }

    /// Capture the buffer state of the given pair. Draw ranges default to
    /// the whole index buffer.
    pub fn set_buffers(&mut self, vertex: &VulkanVertexBuffer, index: &VulkanIndexBuffer) {
        self.attributes = vertex.attributes;
        self.vertex_buffers = vertex.buffers().to_vec();
        self.index_buffer = index.buffer.handle();
        self.index_type = index.index_type;
        self.index_element_size = index.element_size;
        self.offset = 0;
        self.count = index.index_count;
    }

    pub fn set_range(&mut self, offset: u32, count: u32) {
        self.offset = offset;
        self.count = count;
    }

    pub fn set_primitive_type(&mut self, primitive_type: PrimitiveType) {
        self.primitive_type = primitive_type;
    }

    /// First index for an indexed draw
    pub fn first_index(&self) -> u32 {
        self.offset / self.index_element_size
    }
}

impl Default for VulkanRenderPrimitive {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_type_by_element_size() {
        assert_eq!(index_type_for(2), vk::IndexType::UINT16);
        assert_eq!(index_type_for(4), vk::IndexType::UINT32);
    }

    #[test]
    fn test_render_primitive_first_index() {
        let mut primitive = VulkanRenderPrimitive::new();
        primitive.index_element_size = 2;
        primitive.set_range(12, 30);
        assert_eq!(primitive.first_index(), 6);
        assert_eq!(primitive.count, 30);
    }

    #[test]
    fn test_vertex_buffer_slot_out_of_range() {
        use ash::vk::Handle;

        let attributes =
            [Attribute::default(); nebula_3d_engine::nebula3d::render::VERTEX_ATTRIBUTE_COUNT];
        let mut vertex = VulkanVertexBuffer::new(100, 2, attributes);
        assert_eq!(vertex.buffers().len(), 2);

        assert!(vertex.set_buffer_at(1, vk::Buffer::from_raw(0x10)).is_ok());
        assert!(matches!(
            vertex.set_buffer_at(2, vk::Buffer::from_raw(0x10)),
            Err(Error::InvalidPrecondition(_))
        ));
    }
}
