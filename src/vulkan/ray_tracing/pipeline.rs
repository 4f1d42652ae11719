use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use log::debug;

use crate::error::RenderError;
use crate::vulkan::utils::keep_or_release;
use crate::vulkan::{Context, Device, PipelineLayout, RayTracingContext, ShaderModule};

pub const RAYGEN_GROUP: &str = "raygen";
pub const MISS_GROUP: &str = "miss";
pub const HIT_GROUP: &str = "hit_group";

pub struct RayTracingShaderSources<'a> {
    pub raygen: &'a [u32],
    pub miss: &'a [u32],
    pub closest_hit: &'a [u32],
}

pub struct RayTracingPipelineCreateInfo<'a> {
    pub shaders: RayTracingShaderSources<'a>,
    pub descriptor_set_layouts: &'a [vk::DescriptorSetLayout],
    pub push_constant_size: u32,
}

/// Shader group identifiers fetched from a built pipeline, addressed by group name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderGroupHandles {
    names: Vec<String>,
    handle_size: usize,
    data: Vec<u8>,
}

impl ShaderGroupHandles {
    pub fn new(names: Vec<String>, handle_size: usize, data: Vec<u8>) -> Self {
        assert_eq!(names.len() * handle_size, data.len());

        Self {
            names,
            handle_size,
            data,
        }
    }

    pub fn handle_size(&self) -> usize {
        self.handle_size
    }

    pub fn get(&self, name: &str) -> Result<&[u8], RenderError> {
        let index = self
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| RenderError::MissingShaderGroup(name.to_owned()))?;

        let start = index * self.handle_size;
        Ok(&self.data[start..start + self.handle_size])
    }
}

/// Raygen, miss and one triangle hit group, max recursion depth 1.
pub struct RayTracingPipeline {
    device: Arc<Device>,
    pub(crate) inner: vk::Pipeline,
    pub layout: PipelineLayout,
    pub push_constant_stages: vk::ShaderStageFlags,
    pub handles: ShaderGroupHandles,
}

impl RayTracingPipeline {
    pub(crate) fn new(
        device: Arc<Device>,
        ray_tracing: &RayTracingContext,
        create_info: RayTracingPipelineCreateInfo,
    ) -> Result<Self> {
        let push_constant_stages = vk::ShaderStageFlags::RAYGEN_KHR
            | vk::ShaderStageFlags::MISS_KHR
            | vk::ShaderStageFlags::CLOSEST_HIT_KHR;
        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: push_constant_stages,
            offset: 0,
            size: create_info.push_constant_size,
        }];
        let layout = PipelineLayout::new(
            device.clone(),
            create_info.descriptor_set_layouts,
            &push_constant_ranges,
        )?;

        let raygen = ShaderModule::new(device.clone(), create_info.shaders.raygen)?;
        let miss = ShaderModule::new(device.clone(), create_info.shaders.miss)?;
        let closest_hit = ShaderModule::new(device.clone(), create_info.shaders.closest_hit)?;

        let stages = [
            (raygen.inner, vk::ShaderStageFlags::RAYGEN_KHR),
            (miss.inner, vk::ShaderStageFlags::MISS_KHR),
            (closest_hit.inner, vk::ShaderStageFlags::CLOSEST_HIT_KHR),
        ]
        .map(|(module, stage)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(stage)
                .module(module)
                .name(c"main")
        });

        let groups = [
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(0)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR),
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(1)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR),
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                .general_shader(vk::SHADER_UNUSED_KHR)
                .closest_hit_shader(2)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR),
        ];
        let group_names = [RAYGEN_GROUP, MISS_GROUP, HIT_GROUP];

        let pipeline_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(1)
            .layout(layout.inner);

        let inner = unsafe {
            ray_tracing.pipeline_fn.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
        }
        .map_err(|(_, result)| RenderError::PipelineCreation {
            name: "shadow ray tracing".to_owned(),
            result,
        })?[0];

        let handle_size = ray_tracing.pipeline_properties.shader_group_handle_size as usize;
        let data = unsafe {
            ray_tracing.pipeline_fn.get_ray_tracing_shader_group_handles(
                inner,
                0,
                groups.len() as u32,
                groups.len() * handle_size,
            )
        };
        let (data, inner) = keep_or_release(data, inner, |pipeline| unsafe {
            device.inner.destroy_pipeline(pipeline, None)
        })?;

        debug!("Created ray tracing pipeline with groups {group_names:?}");

        Ok(Self {
            device,
            inner,
            layout,
            push_constant_stages,
            handles: ShaderGroupHandles::new(
                group_names.map(str::to_owned).to_vec(),
                handle_size,
                data,
            ),
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.inner
    }

    pub fn shader_group_handle(&self, name: &str) -> Result<&[u8], RenderError> {
        self.handles.get(name)
    }
}

impl Drop for RayTracingPipeline {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_pipeline(self.inner, None) };
    }
}

impl Context {
    pub fn create_ray_tracing_pipeline(
        &self,
        create_info: RayTracingPipelineCreateInfo,
    ) -> Result<RayTracingPipeline> {
        RayTracingPipeline::new(self.device.clone(), &self.ray_tracing, create_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handles() -> ShaderGroupHandles {
        let data = (0..96).map(|i| i as u8).collect();
        ShaderGroupHandles::new(
            vec![RAYGEN_GROUP.into(), MISS_GROUP.into(), HIT_GROUP.into()],
            32,
            data,
        )
    }

    #[test]
    fn group_handles_are_found_by_export_name() {
        let handles = handles();

        assert_eq!(handles.get(RAYGEN_GROUP).unwrap()[0], 0);
        assert_eq!(handles.get(MISS_GROUP).unwrap()[0], 32);
        assert_eq!(handles.get(HIT_GROUP).unwrap().len(), 32);
    }

    #[test]
    fn unknown_group_name_is_an_error() {
        match handles().get("shadow_hit") {
            Err(RenderError::MissingShaderGroup(name)) => assert_eq!(name, "shadow_hit"),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
