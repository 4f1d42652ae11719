use std::{cell::RefCell, rc::Rc, sync::Arc};

use anyhow::anyhow;
use ash::vk;
use index_pool::IndexPool;
use log::trace;

use crate::vulkan::{Context, DescriptorPool, DescriptorSet, DescriptorSetLayout, Device, ImageView};
use crate::PenumbraResult;

/// Bindless image heap. Shaders index it with the values of [`DescriptorHandle`]s.
pub struct DescriptorHeap {
    device: Arc<Device>,
    pub heap_types: Vec<vk::DescriptorPoolSize>,
    pub set: DescriptorSet,
    pub layout: DescriptorSetLayout,
    pub pool: DescriptorPool,
    allocator: Rc<RefCell<IndexPool>>,
}

pub type DescriptorHandleValue = u32;

#[derive(Debug)]
pub struct DescriptorHandle {
    pub value: DescriptorHandleValue,
    allocator: Rc<RefCell<IndexPool>>,
}

/// Sampled and storage view of the same image, e.g. the shadow output.
#[derive(Debug)]
pub struct ImageHandlePair {
    pub sampled: DescriptorHandle,
    pub storage: DescriptorHandle,
}

impl DescriptorHeap {
    pub(crate) fn new(
        device: Arc<Device>,
        heap_types: Vec<vk::DescriptorPoolSize>,
    ) -> PenumbraResult<Self> {
        let pool = DescriptorPool::new(
            device.clone(),
            1,
            &heap_types,
            vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND,
        )?;

        let (bindings, flags) = heap_types
            .iter()
            .enumerate()
            .map(|(i, t)| {
                (
                    vk::DescriptorSetLayoutBinding {
                        binding: i as _,
                        descriptor_count: t.descriptor_count,
                        descriptor_type: t.ty,
                        stage_flags: vk::ShaderStageFlags::ALL,
                        ..Default::default()
                    },
                    vk::DescriptorBindingFlags::PARTIALLY_BOUND
                        | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
                        | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING,
                )
            })
            .collect::<(Vec<_>, Vec<_>)>();

        let layout = DescriptorSetLayout::new(
            device.clone(),
            &bindings,
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL,
            &flags,
        )?;

        let set = pool.allocate_set(&layout)?;

        let allocator = Rc::new(RefCell::new(IndexPool::new()));

        Ok(Self {
            device,
            heap_types,
            set,
            layout,
            pool,
            allocator,
        })
    }

    fn binding_of(&self, ty: vk::DescriptorType) -> PenumbraResult<u32> {
        self.heap_types
            .iter()
            .position(|t| t.ty == ty)
            .map(|i| i as u32)
            .ok_or_else(|| anyhow!("Descriptor heap has no {ty:?} binding"))
    }

    fn write_image(
        &mut self,
        view: &ImageView,
        ty: vk::DescriptorType,
        layout: vk::ImageLayout,
    ) -> PenumbraResult<DescriptorHandle> {
        let binding = self.binding_of(ty)?;
        let handle = self.allocator.borrow_mut().new_id() as u32;

        let img_info = vk::DescriptorImageInfo::default()
            .image_view(view.inner)
            .image_layout(layout);

        let wds = vk::WriteDescriptorSet::default()
            .dst_set(self.set.inner)
            .dst_binding(binding)
            .dst_array_element(handle)
            .descriptor_type(ty)
            .image_info(std::slice::from_ref(&img_info));

        trace!("Creating {ty:?} handle {handle} in layout {layout:?}");
        unsafe { self.device.inner.update_descriptor_sets(&[wds], &[]) };

        Ok(DescriptorHandle {
            value: handle,
            allocator: self.allocator.clone(),
        })
    }

    /// Handle for reading the image in a shader resource state.
    pub fn create_sampled_handle(&mut self, view: &ImageView) -> PenumbraResult<DescriptorHandle> {
        self.write_image(
            view,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::ImageLayout::READ_ONLY_OPTIMAL,
        )
    }

    /// Handle for unordered access to the image.
    pub fn create_storage_handle(&mut self, view: &ImageView) -> PenumbraResult<DescriptorHandle> {
        self.write_image(
            view,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::ImageLayout::GENERAL,
        )
    }

    pub fn create_handle_pair(&mut self, view: &ImageView) -> PenumbraResult<ImageHandlePair> {
        Ok(ImageHandlePair {
            sampled: self.create_sampled_handle(view)?,
            storage: self.create_storage_handle(view)?,
        })
    }
}

impl Context {
    pub fn create_descriptor_heap(
        &self,
        heap_types: Vec<vk::DescriptorPoolSize>,
    ) -> PenumbraResult<DescriptorHeap> {
        DescriptorHeap::new(self.device.clone(), heap_types)
    }
}

impl Drop for DescriptorHandle {
    fn drop(&mut self) {
        if self
            .allocator
            .borrow_mut()
            .return_id(self.value as usize)
            .is_err()
        {
            log::error!("Descriptor handle {} was returned twice", self.value);
        }
    }
}
