use ash::vk;

use crate::vulkan::{AccelerationStructureBuild, ImageHandle, ShaderTableRegions, Transition};

/// The command stream every recording routine of the renderer writes into.
///
/// [`crate::vulkan::CommandBuffer`] records into a real Vulkan command buffer.
/// Anything else implementing this trait can replay or validate the same
/// sequence without a device.
pub trait CommandRecorder {
    fn buffer_barriers(&self, transitions: &[Transition<vk::Buffer>]);

    fn image_barriers(&self, transitions: &[Transition<ImageHandle>]);

    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize);

    fn build_acceleration_structure(&self, build: &AccelerationStructureBuild);

    fn begin_rendering(&self, pass: &RenderingPass);

    fn end_rendering(&self);

    fn set_viewport_and_scissor(&self, extent: vk::Extent2D);

    fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);

    fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );

    fn push_constants(&self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, bytes: &[u8]);

    fn bind_vertex_buffer(&self, buffer: vk::Buffer);

    fn bind_index_buffer(&self, buffer: vk::Buffer);

    fn draw(&self, vertex_count: u32);

    fn draw_indexed(&self, index_count: u32);

    fn trace_rays(&self, regions: &ShaderTableRegions, extent: vk::Extent2D);
}

/// Records all `Some` transitions as one barrier batch.
pub fn record_buffer_transitions<R, I>(recorder: &R, transitions: I)
where
    R: CommandRecorder + ?Sized,
    I: IntoIterator<Item = Option<Transition<vk::Buffer>>>,
{
    let transitions = transitions.into_iter().flatten().collect::<Vec<_>>();
    if !transitions.is_empty() {
        recorder.buffer_barriers(&transitions);
    }
}

pub fn record_image_transitions<R, I>(recorder: &R, transitions: I)
where
    R: CommandRecorder + ?Sized,
    I: IntoIterator<Item = Option<Transition<ImageHandle>>>,
{
    let transitions = transitions.into_iter().flatten().collect::<Vec<_>>();
    if !transitions.is_empty() {
        recorder.image_barriers(&transitions);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    pub image: ImageHandle,
    pub clear: Option<[f32; 4]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    pub image: ImageHandle,
    pub clear: Option<f32>,
}

/// One dynamic rendering scope. Attachments are expected in their attachment states.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderingPass {
    pub extent: vk::Extent2D,
    pub color: Option<ColorAttachment>,
    pub depth: Option<DepthAttachment>,
}
