use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use log::debug;

use crate::error::RenderError;
use crate::vulkan::{Context, Device, ShaderModule};

const ENTRY_POINT: &CStr = c"main";

pub struct PipelineLayout {
    device: Arc<Device>,
    pub(crate) inner: vk::PipelineLayout,
}

impl PipelineLayout {
    pub(crate) fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let pipe_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let inner = unsafe {
            device
                .inner
                .create_pipeline_layout(&pipe_layout_info, None)?
        };

        Ok(Self { device, inner })
    }

    pub fn handle(&self) -> vk::PipelineLayout {
        self.inner
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_pipeline_layout(self.inner, None) };
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VertexLayout {
    pub stride: u32,
    /// (format, offset) per location.
    pub attributes: &'static [(vk::Format, u32)],
}

#[derive(Debug, Clone, Copy)]
pub struct DepthMode {
    pub format: vk::Format,
    pub write: bool,
    pub compare: vk::CompareOp,
}

pub struct GraphicsShaderCreateInfo<'a> {
    pub source: &'a [u32],
    pub stage: vk::ShaderStageFlags,
}

pub struct GraphicsPipelineCreateInfo<'a> {
    pub name: &'a str,
    pub shaders: &'a [GraphicsShaderCreateInfo<'a>],
    pub vertex_layout: Option<VertexLayout>,
    pub color_attachment_format: Option<vk::Format>,
    pub depth: Option<DepthMode>,
    pub descriptor_set_layouts: &'a [vk::DescriptorSetLayout],
    pub push_constant_size: u32,
}

pub struct GraphicsPipeline {
    device: Arc<Device>,
    pub(crate) inner: vk::Pipeline,
    pub layout: PipelineLayout,
    pub push_constant_stages: vk::ShaderStageFlags,
}

impl GraphicsPipeline {
    pub(crate) fn new(device: Arc<Device>, create_info: GraphicsPipelineCreateInfo) -> Result<Self> {
        let push_constant_stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        let push_constant_ranges = if create_info.push_constant_size > 0 {
            vec![vk::PushConstantRange {
                stage_flags: push_constant_stages,
                offset: 0,
                size: create_info.push_constant_size,
            }]
        } else {
            vec![]
        };
        let layout = PipelineLayout::new(
            device.clone(),
            create_info.descriptor_set_layouts,
            &push_constant_ranges,
        )?;

        let modules = create_info
            .shaders
            .iter()
            .map(|s| ShaderModule::new(device.clone(), s.source))
            .collect::<Result<Vec<_>>>()?;
        let stages = create_info
            .shaders
            .iter()
            .zip(modules.iter())
            .map(|(s, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(s.stage)
                    .module(module.inner)
                    .name(ENTRY_POINT)
            })
            .collect::<Vec<_>>();

        let binding_descriptions = create_info
            .vertex_layout
            .map(|l| {
                vec![vk::VertexInputBindingDescription {
                    binding: 0,
                    stride: l.stride,
                    input_rate: vk::VertexInputRate::VERTEX,
                }]
            })
            .unwrap_or_default();
        let attribute_descriptions = create_info
            .vertex_layout
            .map(|l| {
                l.attributes
                    .iter()
                    .enumerate()
                    .map(|(location, (format, offset))| vk::VertexInputAttributeDescription {
                        location: location as u32,
                        binding: 0,
                        format: *format,
                        offset: *offset,
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_info = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer_info = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let multisampling_info = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = create_info
            .color_attachment_format
            .map(|_| {
                vec![vk::PipelineColorBlendAttachmentState::default()
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
                    .blend_enable(false)]
            })
            .unwrap_or_default();
        let color_blending_info =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

        let depth_stencil_info = create_info
            .depth
            .map(|depth| {
                vk::PipelineDepthStencilStateCreateInfo::default()
                    .depth_test_enable(true)
                    .depth_write_enable(depth.write)
                    .depth_compare_op(depth.compare)
            })
            .unwrap_or_default();

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_states_info =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_attachment_formats = create_info
            .color_attachment_format
            .map(|f| vec![f])
            .unwrap_or_default();
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_attachment_formats)
            .depth_attachment_format(
                create_info
                    .depth
                    .map_or(vk::Format::UNDEFINED, |depth| depth.format),
            );

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&rasterizer_info)
            .multisample_state(&multisampling_info)
            .color_blend_state(&color_blending_info)
            .depth_stencil_state(&depth_stencil_info)
            .dynamic_state(&dynamic_states_info)
            .layout(layout.inner)
            .push_next(&mut rendering_info);

        let inner = unsafe {
            device.inner.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
        }
        .map_err(|(_, result)| RenderError::PipelineCreation {
            name: create_info.name.to_owned(),
            result,
        })?[0];

        debug!("Created graphics pipeline {}", create_info.name);

        Ok(Self {
            device,
            inner,
            layout,
            push_constant_stages,
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.inner
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_pipeline(self.inner, None) };
    }
}

/// Graphics pipelines by name.
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: HashMap<String, GraphicsPipeline>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, pipeline: GraphicsPipeline) {
        self.pipelines.insert(name.to_owned(), pipeline);
    }

    pub fn get(&self, name: &str) -> Result<&GraphicsPipeline, RenderError> {
        self.pipelines
            .get(name)
            .ok_or_else(|| RenderError::MissingPipeline(name.to_owned()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }
}

impl Context {
    pub fn create_graphics_pipeline(
        &self,
        create_info: GraphicsPipelineCreateInfo,
    ) -> Result<GraphicsPipeline> {
        GraphicsPipeline::new(self.device.clone(), create_info)
    }
}
