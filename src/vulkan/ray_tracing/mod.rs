mod acceleration_structure;
mod pipeline;
mod shader_binding_table;

pub use acceleration_structure::*;
pub use pipeline::*;
pub use shader_binding_table::*;

use ash::{
    khr::{acceleration_structure as ash_acceleration_structure, ray_tracing_pipeline},
    vk,
};

use crate::vulkan::device::Device;
use crate::vulkan::instance::Instance;
use crate::vulkan::physical_device::PhysicalDevice;

/// Loaded ray tracing entry points and the device limits the builders need.
pub struct RayTracingContext {
    pub pipeline_properties: RayTracingPipelineProperties,
    pub pipeline_fn: ray_tracing_pipeline::Device,
    pub acceleration_structure_properties: AccelerationStructureProperties,
    pub acceleration_structure_fn: ash_acceleration_structure::Device,
}

impl RayTracingContext {
    pub(crate) fn new(instance: &Instance, pdevice: &PhysicalDevice, device: &Device) -> Self {
        let mut pipeline_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
        let mut properties2 =
            vk::PhysicalDeviceProperties2::default().push_next(&mut pipeline_properties);
        unsafe {
            instance
                .inner
                .get_physical_device_properties2(pdevice.inner, &mut properties2)
        };
        let pipeline_properties = pipeline_properties.into();

        let mut acceleration_structure_properties =
            vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
        let mut properties2 = vk::PhysicalDeviceProperties2::default()
            .push_next(&mut acceleration_structure_properties);
        unsafe {
            instance
                .inner
                .get_physical_device_properties2(pdevice.inner, &mut properties2)
        };
        let acceleration_structure_properties = acceleration_structure_properties.into();

        Self {
            pipeline_properties,
            pipeline_fn: ray_tracing_pipeline::Device::new(&instance.inner, &device.inner),
            acceleration_structure_properties,
            acceleration_structure_fn: ash_acceleration_structure::Device::new(
                &instance.inner,
                &device.inner,
            ),
        }
    }

    pub fn shader_record_layout(&self) -> ShaderRecordLayout {
        ShaderRecordLayout::new(
            self.pipeline_properties.shader_group_handle_size,
            self.pipeline_properties.shader_group_base_alignment,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RayTracingPipelineProperties {
    pub shader_group_handle_size: u32,
    pub shader_group_handle_alignment: u32,
    pub shader_group_base_alignment: u32,
    pub max_ray_recursion_depth: u32,
    pub max_ray_dispatch_invocation_count: u32,
    pub max_ray_hit_attribute_size: u32,
}

impl From<vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'_>> for RayTracingPipelineProperties {
    fn from(p: vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'_>) -> Self {
        Self {
            shader_group_handle_size: p.shader_group_handle_size,
            shader_group_handle_alignment: p.shader_group_handle_alignment,
            shader_group_base_alignment: p.shader_group_base_alignment,
            max_ray_recursion_depth: p.max_ray_recursion_depth,
            max_ray_dispatch_invocation_count: p.max_ray_dispatch_invocation_count,
            max_ray_hit_attribute_size: p.max_ray_hit_attribute_size,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccelerationStructureProperties {
    pub max_geometry_count: u64,
    pub max_instance_count: u64,
    pub max_primitive_count: u64,
    pub min_acceleration_structure_scratch_offset_alignment: u32,
}

impl From<vk::PhysicalDeviceAccelerationStructurePropertiesKHR<'_>>
    for AccelerationStructureProperties
{
    fn from(p: vk::PhysicalDeviceAccelerationStructurePropertiesKHR<'_>) -> Self {
        Self {
            max_geometry_count: p.max_geometry_count,
            max_instance_count: p.max_instance_count,
            max_primitive_count: p.max_primitive_count,
            min_acceleration_structure_scratch_offset_alignment: p
                .min_acceleration_structure_scratch_offset_alignment,
        }
    }
}
