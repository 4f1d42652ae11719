use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use log::{error, trace};

use crate::error::RenderError;
use crate::vulkan::context::lock_allocator;
use crate::vulkan::utils::keep_or_release;
use crate::vulkan::{Context, Device};

/// A `VkBuffer` with its own allocation. Every buffer is device addressable.
pub struct Buffer {
    device: Arc<Device>,
    allocator: Arc<Mutex<Allocator>>,
    pub(crate) inner: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub memory_location: MemoryLocation,
    name: String,
}

impl Buffer {
    pub(crate) fn new(
        device: Arc<Device>,
        allocator: Arc<Mutex<Allocator>>,
        name: &str,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        size: vk::DeviceSize,
        alignment: Option<vk::DeviceSize>,
    ) -> Result<Self> {
        let usage = usage | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        let create_info = vk::BufferCreateInfo::default().size(size).usage(usage);
        let inner = unsafe { device.inner.create_buffer(&create_info, None)? };

        let mut requirements = unsafe { device.inner.get_buffer_memory_requirements(inner) };
        if let Some(alignment) = alignment {
            requirements.alignment = requirements.alignment.max(alignment);
        }

        let allocation = lock_allocator(&allocator)?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: memory_location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| RenderError::Allocation {
                name: name.to_owned(),
                size,
            });

        let (allocation, inner) = keep_or_release(allocation, inner, |buffer| unsafe {
            device.inner.destroy_buffer(buffer, None)
        })?;

        let bound = unsafe {
            device
                .inner
                .bind_buffer_memory(inner, allocation.memory(), allocation.offset())
        };
        let ((), allocation) = keep_or_release(bound, allocation, |allocation| {
            unsafe { device.inner.destroy_buffer(inner, None) };
            let freed = lock_allocator(&allocator).and_then(|mut allocator| {
                allocator.free(allocation)?;
                Ok(())
            });
            if let Err(err) = freed {
                error!("Failed to free the memory of buffer {name}: {err:#}");
            }
        })?;

        trace!("Created buffer {name} ({size} bytes, {memory_location:?})");

        Ok(Self {
            device,
            allocator,
            inner,
            allocation: Some(allocation),
            size,
            usage,
            memory_location,
            name: name.to_owned(),
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.inner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_device_address(&self) -> vk::DeviceAddress {
        let addr_info = vk::BufferDeviceAddressInfo::default().buffer(self.inner);
        unsafe { self.device.inner.get_buffer_device_address(&addr_info) }
    }

    /// CPU view of the whole buffer, `None` for device local memory.
    pub fn mapped_bytes(&self) -> Option<&[u8]> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_slice)
            .map(|bytes| &bytes[..self.size as usize])
    }

    pub fn mapped_bytes_mut(&mut self) -> Option<&mut [u8]> {
        let size = self.size as usize;
        self.allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
            .map(|bytes| &mut bytes[..size])
    }

    pub fn copy_data_to_buffer<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<()> {
        let bytes = bytemuck::cast_slice::<T, u8>(data);
        let name = self.name.clone();
        let mapped = self
            .mapped_bytes_mut()
            .with_context(|| format!("Buffer {name} is not host visible"))?;
        anyhow::ensure!(
            bytes.len() <= mapped.len(),
            "{} bytes do not fit into buffer {name}",
            bytes.len()
        );

        mapped[..bytes.len()].copy_from_slice(bytes);

        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_buffer(self.inner, None) };

        if let Some(allocation) = self.allocation.take() {
            match lock_allocator(&self.allocator) {
                Ok(mut allocator) => {
                    if let Err(err) = allocator.free(allocation) {
                        log::error!("Failed to free buffer {}: {err}", self.name);
                    }
                }
                Err(err) => log::error!("Leaking buffer {}: {err}", self.name),
            }
        }
    }
}

impl Context {
    pub fn create_buffer(
        &self,
        name: &str,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        size: vk::DeviceSize,
    ) -> Result<Buffer> {
        Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            name,
            usage,
            memory_location,
            size,
            None,
        )
    }

    pub fn create_aligned_buffer(
        &self,
        name: &str,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
    ) -> Result<Buffer> {
        Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            name,
            usage,
            memory_location,
            size,
            Some(alignment),
        )
    }
}
