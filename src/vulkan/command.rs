use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::vulkan::{
    AccelerationStructureBuild, CommandRecorder, Device, ImageHandle, QueueFamily,
    RayTracingContext, RenderingPass, ShaderTableRegions, Transition,
};

pub struct CommandPool {
    device: Arc<Device>,
    ray_tracing: Arc<RayTracingContext>,
    pub inner: vk::CommandPool,
}

impl CommandPool {
    pub(crate) fn new(
        device: Arc<Device>,
        ray_tracing: Arc<RayTracingContext>,
        queue_family: QueueFamily,
        flags: Option<vk::CommandPoolCreateFlags>,
    ) -> Result<Self> {
        let flags = flags.unwrap_or_else(vk::CommandPoolCreateFlags::empty);

        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family.index)
            .flags(flags);
        let inner = unsafe {
            device
                .inner
                .create_command_pool(&command_pool_info, None)?
        };

        Ok(Self {
            device,
            ray_tracing,
            inner,
        })
    }

    pub fn allocate_command_buffers(
        &self,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.inner)
            .level(level)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.inner.allocate_command_buffers(&allocate_info)? };
        let buffers = buffers
            .into_iter()
            .map(|inner| CommandBuffer {
                device: self.device.clone(),
                ray_tracing: self.ray_tracing.clone(),
                inner,
            })
            .collect();

        Ok(buffers)
    }

    pub fn allocate_command_buffer(&self, level: vk::CommandBufferLevel) -> Result<CommandBuffer> {
        let buffers = self.allocate_command_buffers(level, 1)?;
        let buffer = buffers
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Driver returned no command buffer"))?;

        Ok(buffer)
    }

    pub fn free_command_buffers(&self, buffer: &[CommandBuffer]) {
        let buffs = buffer.iter().map(|b| b.inner).collect::<Vec<_>>();
        unsafe { self.device.inner.free_command_buffers(self.inner, &buffs) };
    }

    pub fn free_command_buffer(&self, buffer: &CommandBuffer) -> Result<()> {
        let buffs = [buffer.inner];
        unsafe { self.device.inner.free_command_buffers(self.inner, &buffs) };

        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_command_pool(self.inner, None) };
    }
}

pub struct CommandBuffer {
    device: Arc<Device>,
    ray_tracing: Arc<RayTracingContext>,
    pub inner: vk::CommandBuffer,
}

impl CommandBuffer {
    pub fn begin(&self, flags: Option<vk::CommandBufferUsageFlags>) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags.unwrap_or_default());
        unsafe {
            self.device
                .inner
                .begin_command_buffer(self.inner, &begin_info)?
        };
        Ok(())
    }

    pub fn end(&self) -> Result<()> {
        unsafe { self.device.inner.end_command_buffer(self.inner)? };

        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .inner
                .reset_command_buffer(self.inner, vk::CommandBufferResetFlags::empty())?
        };

        Ok(())
    }
}

impl CommandRecorder for CommandBuffer {
    fn buffer_barriers(&self, transitions: &[Transition<vk::Buffer>]) {
        let barriers = transitions.iter().map(|t| t.to_vk()).collect::<Vec<_>>();
        let dependency_info = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);

        unsafe {
            self.device
                .inner
                .cmd_pipeline_barrier2(self.inner, &dependency_info)
        };
    }

    fn image_barriers(&self, transitions: &[Transition<ImageHandle>]) {
        let barriers = transitions.iter().map(|t| t.to_vk()).collect::<Vec<_>>();
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);

        unsafe {
            self.device
                .inner
                .cmd_pipeline_barrier2(self.inner, &dependency_info)
        };
    }

    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy::default().size(size);

        unsafe {
            self.device
                .inner
                .cmd_copy_buffer(self.inner, src, dst, std::slice::from_ref(&region))
        };
    }

    fn build_acceleration_structure(&self, build: &AccelerationStructureBuild) {
        let (geometries, ranges) = build.geometry.to_vk();

        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(build.level.ty())
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries)
            .dst_acceleration_structure(build.destination)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: build.scratch_address,
            });

        unsafe {
            self.ray_tracing
                .acceleration_structure_fn
                .cmd_build_acceleration_structures(
                    self.inner,
                    std::slice::from_ref(&build_info),
                    &[&ranges],
                )
        };
    }

    fn begin_rendering(&self, pass: &RenderingPass) {
        let color_attachment = pass.color.map(|color| {
            vk::RenderingAttachmentInfo::default()
                .image_view(color.image.view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(match color.clear {
                    Some(_) => vk::AttachmentLoadOp::CLEAR,
                    None => vk::AttachmentLoadOp::LOAD,
                })
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: color.clear.unwrap_or_default(),
                    },
                })
        });

        let depth_attachment = pass.depth.map(|depth| {
            vk::RenderingAttachmentInfo::default()
                .image_view(depth.image.view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(match depth.clear {
                    Some(_) => vk::AttachmentLoadOp::CLEAR,
                    None => vk::AttachmentLoadOp::LOAD,
                })
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: depth.clear.unwrap_or(1.0),
                        stencil: 0,
                    },
                })
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: pass.extent,
            })
            .layer_count(1);

        if let Some(color) = color_attachment.as_ref() {
            rendering_info = rendering_info.color_attachments(std::slice::from_ref(color));
        }
        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        unsafe {
            self.device
                .inner
                .cmd_begin_rendering(self.inner, &rendering_info)
        };
    }

    fn end_rendering(&self) {
        unsafe { self.device.inner.cmd_end_rendering(self.inner) };
    }

    fn set_viewport_and_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            self.device.inner.cmd_set_viewport(self.inner, 0, &[viewport]);
            self.device.inner.cmd_set_scissor(self.inner, 0, &[scissor]);
        }
    }

    fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .inner
                .cmd_bind_pipeline(self.inner, bind_point, pipeline)
        };
    }

    fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.inner.cmd_bind_descriptor_sets(
                self.inner,
                bind_point,
                layout,
                first_set,
                sets,
                &[],
            )
        };
    }

    fn push_constants(&self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, bytes: &[u8]) {
        unsafe {
            self.device
                .inner
                .cmd_push_constants(self.inner, layout, stages, 0, bytes)
        };
    }

    fn bind_vertex_buffer(&self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .inner
                .cmd_bind_vertex_buffers(self.inner, 0, &[buffer], &[0])
        };
    }

    fn bind_index_buffer(&self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .inner
                .cmd_bind_index_buffer(self.inner, buffer, 0, vk::IndexType::UINT32)
        };
    }

    fn draw(&self, vertex_count: u32) {
        unsafe { self.device.inner.cmd_draw(self.inner, vertex_count, 1, 0, 0) };
    }

    fn draw_indexed(&self, index_count: u32) {
        unsafe {
            self.device
                .inner
                .cmd_draw_indexed(self.inner, index_count, 1, 0, 0, 0)
        };
    }

    fn trace_rays(&self, regions: &ShaderTableRegions, extent: vk::Extent2D) {
        let callable_region = vk::StridedDeviceAddressRegionKHR::default();

        unsafe {
            self.ray_tracing.pipeline_fn.cmd_trace_rays(
                self.inner,
                &regions.raygen,
                &regions.miss,
                &regions.hit,
                &callable_region,
                extent.width,
                extent.height,
                1,
            )
        };
    }
}
