//! Buffer management for vertex, index, uniform and staging data
//!
//! Memory management following RAII patterns with proper allocation and cleanup

use ash::{vk, Device};

use crate::render::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Byte-addressable memory the CPU can write and read back
///
/// Uniform blocks are written through this seam so their semantics can be
/// checked against plain host memory.
pub trait HostMemory {
    /// Size in bytes; fixed for the lifetime of the allocation
    fn size(&self) -> u64;

    /// Overwrite `bytes.len()` bytes starting at `offset`
    fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> VulkanResult<()>;

    /// Copy `out.len()` bytes starting at `offset` into `out`
    fn read_bytes(&self, offset: u64, out: &mut [u8]) -> VulkanResult<()>;
}

fn check_range(size: u64, offset: u64, len: usize) -> VulkanResult<()> {
    if offset + len as u64 > size {
        return Err(VulkanError::InvalidOperation {
            reason: format!("range {}..{} exceeds buffer of {} bytes", offset, offset + len as u64, size),
        });
    }
    Ok(())
}

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a new buffer with memory allocation
    pub fn new(
        ctx: &VulkanContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let device = ctx.device().clone();

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None).map_err(VulkanError::Api)? };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = match ctx.find_memory_type(mem_requirements.memory_type_bits, properties) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let buffer = Self {
            device,
            buffer,
            memory,
            size,
        };
        unsafe {
            buffer
                .device
                .bind_buffer_memory(buffer.buffer, buffer.memory, 0)
                .map_err(VulkanError::Api)?;
        }

        log::debug!("[VULKAN] Created buffer of {} bytes ({:?})", size, usage);
        Ok(buffer)
    }

    /// Host-visible, host-coherent buffer initialised with `data`
    pub fn with_data(ctx: &VulkanContext, usage: vk::BufferUsageFlags, data: &[u8]) -> VulkanResult<Self> {
        let mut buffer = Self::new(
            ctx,
            data.len() as vk::DeviceSize,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        buffer.write_bytes(0, data)?;
        Ok(buffer)
    }

    /// Device-local buffer filled through a temporary staging buffer
    pub fn device_local(ctx: &VulkanContext, usage: vk::BufferUsageFlags, data: &[u8]) -> VulkanResult<Self> {
        let staging = Self::with_data(ctx, vk::BufferUsageFlags::TRANSFER_SRC, data)?;
        let buffer = Self::new(
            ctx,
            data.len() as vk::DeviceSize,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        ctx.copy_buffer(staging.handle(), buffer.handle(), data.len() as vk::DeviceSize)?;
        Ok(buffer)
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl HostMemory for Buffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> VulkanResult<()> {
        check_range(self.size, offset, bytes.len())?;
        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, offset, bytes.len() as u64, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    fn read_bytes(&self, offset: u64, out: &mut [u8]) -> VulkanResult<()> {
        check_range(self.size, offset, out.len())?;
        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, offset, out.len() as u64, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), out.as_mut_ptr(), out.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
impl HostMemory for Vec<u8> {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> VulkanResult<()> {
        check_range(self.len() as u64, offset, bytes.len())?;
        let start = offset as usize;
        self[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read_bytes(&self, offset: u64, out: &mut [u8]) -> VulkanResult<()> {
        check_range(self.len() as u64, offset, out.len())?;
        let start = offset as usize;
        out.copy_from_slice(&self[start..start + out.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_memory_rejects_out_of_range_writes() {
        let mut memory = vec![0u8; 8];
        assert!(memory.write_bytes(4, &[1, 2, 3, 4]).is_ok());
        assert!(matches!(
            memory.write_bytes(6, &[1, 2, 3]),
            Err(VulkanError::InvalidOperation { .. })
        ));
        let mut out = [0u8; 4];
        memory.read_bytes(4, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }
}
