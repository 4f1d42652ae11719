use std::sync::Arc;

use anyhow::{anyhow, Result};
use ash::vk;

use crate::vulkan::{Context, Device};

pub struct DescriptorSetLayout {
    device: Arc<Device>,
    pub(crate) inner: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub(crate) fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
        flags: vk::DescriptorSetLayoutCreateFlags,
        binding_flags: &[vk::DescriptorBindingFlags],
    ) -> Result<Self> {
        let mut binding_flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(binding_flags);

        let dsl_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(bindings)
            .flags(flags)
            .push_next(&mut binding_flags_info);
        let inner = unsafe { device.inner.create_descriptor_set_layout(&dsl_info, None)? };

        Ok(Self { device, inner })
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.inner
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .inner
                .destroy_descriptor_set_layout(self.inner, None);
        }
    }
}

pub struct DescriptorPool {
    device: Arc<Device>,
    pub(crate) inner: vk::DescriptorPool,
}

impl DescriptorPool {
    pub(crate) fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        flags: vk::DescriptorPoolCreateFlags,
    ) -> Result<Self> {
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(flags);
        let inner = unsafe { device.inner.create_descriptor_pool(&pool_info, None)? };

        Ok(Self { device, inner })
    }

    pub fn allocate_set(&self, layout: &DescriptorSetLayout) -> Result<DescriptorSet> {
        let layouts = [layout.inner];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.inner)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.inner.allocate_descriptor_sets(&allocate_info)? };
        let inner = sets
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Driver returned no descriptor set"))?;

        Ok(DescriptorSet {
            device: self.device.clone(),
            inner,
        })
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_descriptor_pool(self.inner, None) };
    }
}

/// Freed together with its pool.
pub struct DescriptorSet {
    device: Arc<Device>,
    pub(crate) inner: vk::DescriptorSet,
}

pub enum WriteDescriptorSetKind {
    AccelerationStructure {
        acceleration_structure: vk::AccelerationStructureKHR,
    },
    StorageImage {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    SampledImage {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
}

pub struct WriteDescriptorSet {
    pub binding: u32,
    pub kind: WriteDescriptorSetKind,
}

impl DescriptorSet {
    pub fn handle(&self) -> vk::DescriptorSet {
        self.inner
    }

    pub fn update(&self, writes: &[WriteDescriptorSet]) {
        for write in writes {
            match write.kind {
                WriteDescriptorSetKind::AccelerationStructure {
                    acceleration_structure,
                } => {
                    let structures = [acceleration_structure];
                    let mut write_set_as = vk::WriteDescriptorSetAccelerationStructureKHR::default()
                        .acceleration_structures(&structures);

                    let mut wds = vk::WriteDescriptorSet::default()
                        .dst_set(self.inner)
                        .dst_binding(write.binding)
                        .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                        .push_next(&mut write_set_as);
                    wds.descriptor_count = 1;

                    unsafe { self.device.inner.update_descriptor_sets(&[wds], &[]) };
                }
                WriteDescriptorSetKind::StorageImage { view, layout } => {
                    let img_info = vk::DescriptorImageInfo::default()
                        .image_view(view)
                        .image_layout(layout);
                    let wds = vk::WriteDescriptorSet::default()
                        .dst_set(self.inner)
                        .dst_binding(write.binding)
                        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                        .image_info(std::slice::from_ref(&img_info));

                    unsafe { self.device.inner.update_descriptor_sets(&[wds], &[]) };
                }
                WriteDescriptorSetKind::SampledImage { view, layout } => {
                    let img_info = vk::DescriptorImageInfo::default()
                        .image_view(view)
                        .image_layout(layout);
                    let wds = vk::WriteDescriptorSet::default()
                        .dst_set(self.inner)
                        .dst_binding(write.binding)
                        .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                        .image_info(std::slice::from_ref(&img_info));

                    unsafe { self.device.inner.update_descriptor_sets(&[wds], &[]) };
                }
            }
        }
    }
}

impl Context {
    pub fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<DescriptorPool> {
        DescriptorPool::new(
            self.device.clone(),
            max_sets,
            pool_sizes,
            vk::DescriptorPoolCreateFlags::empty(),
        )
    }

    pub fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> Result<DescriptorSetLayout> {
        let binding_flags = vec![vk::DescriptorBindingFlags::empty(); bindings.len()];
        DescriptorSetLayout::new(
            self.device.clone(),
            bindings,
            vk::DescriptorSetLayoutCreateFlags::empty(),
            &binding_flags,
        )
    }
}
