use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use ash::vk;
use gpu_allocator::vulkan::AllocationScheme;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, Allocator},
    MemoryLocation,
};
use log::trace;

use crate::error::RenderError;
use crate::vulkan::context::lock_allocator;
use crate::vulkan::{Context, Device, ImageHandle, ResourceState, Tracked};

pub struct Image {
    device: Arc<Device>,
    allocator: Arc<Mutex<Allocator>>,
    pub(crate) inner: vk::Image,
    allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
}

pub struct ImageView {
    device: Arc<Device>,
    pub(crate) inner: vk::ImageView,
}

impl Image {
    pub(crate) fn new_2d(
        device: Arc<Device>,
        allocator: Arc<Mutex<Allocator>>,
        name: &str,
        usage: vk::ImageUsageFlags,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        trace!("Creating Image {name}: {width}x{height} {format:?} with usage flags {usage:?}");

        let extent = vk::Extent3D {
            width,
            height,
            depth: 1,
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let inner = unsafe { device.inner.create_image(&image_info, None)? };
        let requirements = unsafe { device.inner.get_image_memory_requirements(inner) };

        let allocation = lock_allocator(&allocator)?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| RenderError::Allocation {
                name: name.to_owned(),
                size: requirements.size,
            });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.inner.destroy_image(inner, None) };
                return Err(err);
            }
        };

        unsafe {
            device
                .inner
                .bind_image_memory(inner, allocation.memory(), allocation.offset())?
        };

        Ok(Self {
            device,
            allocator,
            inner,
            allocation: Some(allocation),
            format,
            extent,
        })
    }

    pub fn create_image_view(&self, aspect_mask: vk::ImageAspectFlags) -> Result<ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.inner)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let inner = unsafe { self.device.inner.create_image_view(&view_info, None)? };

        Ok(ImageView {
            device: self.device.clone(),
            inner,
        })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_image(self.inner, None) };

        if let Some(allocation) = self.allocation.take() {
            match lock_allocator(&self.allocator) {
                Ok(mut allocator) => {
                    if let Err(err) = allocator.free(allocation) {
                        log::error!("Failed to free image: {err}");
                    }
                }
                Err(err) => log::error!("Leaking image: {err}"),
            }
        }
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_image_view(self.inner, None) };
    }
}

/// An image the renderer draws into, with its view and tracked state.
///
/// Field order keeps the view dropped before the image.
pub struct RenderTarget {
    pub view: ImageView,
    pub image: Image,
    pub tracked: Tracked<ImageHandle>,
}

impl RenderTarget {
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.image.extent.width,
            height: self.image.extent.height,
        }
    }

    pub fn handle(&self) -> ImageHandle {
        self.tracked.handle()
    }

    pub fn state(&self) -> ResourceState {
        self.tracked.state()
    }
}

impl Context {
    pub fn create_render_target(
        &self,
        name: &str,
        usage: vk::ImageUsageFlags,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<RenderTarget> {
        let image = Image::new_2d(
            self.device.clone(),
            self.allocator.clone(),
            name,
            usage,
            format,
            extent.width,
            extent.height,
        )?;

        let aspect = if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view = image.create_image_view(aspect)?;

        let tracked = Tracked::new(
            name,
            ImageHandle {
                image: image.inner,
                view: view.inner,
                aspect,
            },
            ResourceState::Undefined,
        );

        Ok(RenderTarget {
            view,
            image,
            tracked,
        })
    }
}
