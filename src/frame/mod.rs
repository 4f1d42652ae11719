mod constants;
mod orchestrator;

pub use constants::*;
pub use orchestrator::*;

use ash::vk;
use glam::{Mat4, Vec3};

use crate::error::RenderError;
use crate::scene::MeshDraw;
use crate::vulkan::{
    record_image_transitions, ColorAttachment, CommandRecorder, DepthAttachment, GraphicsPipeline,
    ImageHandle, RayTracingPipeline, RenderingPass, ResourceState, ShaderTableRegions, Tracked,
};

/// Switches for the parts of the scene that can be left out of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameToggles {
    pub draw_meshes: bool,
    pub draw_floor: bool,
}

impl Default for FrameToggles {
    fn default() -> Self {
        Self {
            draw_meshes: true,
            draw_floor: true,
        }
    }
}

/// Per frame input from the application: camera, lights and toggles.
#[derive(Debug, Clone)]
pub struct FrameInputs {
    pub view_projection: Mat4,
    pub camera_position: Vec3,
    pub lights: Vec<Light>,
    pub toggles: FrameToggles,
}

impl Default for FrameInputs {
    fn default() -> Self {
        Self {
            view_projection: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            lights: vec![Light::default()],
            toggles: FrameToggles::default(),
        }
    }
}

/// A bound graphics pipeline as the recording sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsPass {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub push_constant_stages: vk::ShaderStageFlags,
}

impl From<&GraphicsPipeline> for GraphicsPass {
    fn from(pipeline: &GraphicsPipeline) -> Self {
        Self {
            pipeline: pipeline.handle(),
            layout: pipeline.layout.handle(),
            push_constant_stages: pipeline.push_constant_stages,
        }
    }
}

/// Everything the shadow ray dispatch binds.
#[derive(Debug, Clone, Copy)]
pub struct ShadowDispatch<'a> {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub push_constant_stages: vk::ShaderStageFlags,
    pub scene_set: vk::DescriptorSet,
    pub regions: ShaderTableRegions,
    pub top_level: &'a Tracked<vk::Buffer>,
    pub constants_address: vk::DeviceAddress,
    /// Bindless storage index of the shadow image.
    pub output_index: u32,
    /// Bindless sampled index of the depth image.
    pub depth_index: u32,
}

impl<'a> ShadowDispatch<'a> {
    pub fn new(
        pipeline: &RayTracingPipeline,
        scene_set: vk::DescriptorSet,
        regions: ShaderTableRegions,
        top_level: &'a Tracked<vk::Buffer>,
        constants_address: vk::DeviceAddress,
        output_index: u32,
        depth_index: u32,
    ) -> Self {
        Self {
            pipeline: pipeline.handle(),
            layout: pipeline.layout.handle(),
            push_constant_stages: pipeline.push_constant_stages,
            scene_set,
            regions,
            top_level,
            constants_address,
            output_index,
            depth_index,
        }
    }
}

/// The images one frame writes, with their tracked states.
pub struct FrameTargets<'a> {
    pub extent: vk::Extent2D,
    pub back_buffer: &'a mut Tracked<ImageHandle>,
    pub hdr: &'a mut Tracked<ImageHandle>,
    pub depth: &'a mut Tracked<ImageHandle>,
    pub shadow: &'a mut Tracked<ImageHandle>,
}

/// Pipelines, bindings and draws for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameRecording<'a> {
    pub depth_prepass: GraphicsPass,
    pub forward: GraphicsPass,
    pub floor: GraphicsPass,
    pub tonemap: GraphicsPass,
    pub bindless_set: vk::DescriptorSet,
    pub shadow: ShadowDispatch<'a>,
    pub meshes: &'a [MeshDraw],
    pub floor_mesh: MeshDraw,
    pub camera_address: vk::DeviceAddress,
    pub lights_address: vk::DeviceAddress,
    /// Bindless sampled index of the shadow image.
    pub shadow_index: u32,
    pub hdr_index: u32,
    pub toggles: FrameToggles,
}

impl FrameRecording<'_> {
    fn draws(&self) -> impl Iterator<Item = (GraphicsPass, &MeshDraw)> {
        let meshes = self
            .meshes
            .iter()
            .filter(|_| self.toggles.draw_meshes)
            .map(|draw| (self.forward, draw));
        let floor = std::iter::once((self.floor, &self.floor_mesh)).filter(|_| self.toggles.draw_floor);

        meshes.chain(floor)
    }

    fn push_constants(&self, draw: &MeshDraw) -> DrawPushConstants {
        DrawPushConstants {
            camera: self.camera_address,
            object: draw.object_address,
            material: draw.material_address,
            lights: self.lights_address,
            shadow_index: self.shadow_index,
            _pad: 0,
        }
    }
}

/// Records one frame:
/// back buffer to render target, depth prepass, shadow rays, forward pass,
/// tonemap, back buffer to present.
///
/// The shadow image has to be in `PixelShaderResource` and the top level
/// acceleration structure built when this is called. Every image is left
/// in the state the next frame expects.
pub fn record_frame<R: CommandRecorder + ?Sized>(
    recorder: &R,
    targets: &mut FrameTargets<'_>,
    frame: &FrameRecording<'_>,
) -> Result<(), RenderError> {
    targets.shadow.expect(ResourceState::PixelShaderResource)?;
    frame.shadow.top_level.expect(ResourceState::AccelerationStructure)?;

    // The depth clear waits for the previous frame's depth tests and reads.
    let depth = match targets.depth.transition(ResourceState::DepthWrite)? {
        Some(transition) => transition,
        None => targets.depth.write_barrier()?,
    };
    record_image_transitions(
        recorder,
        [
            targets.back_buffer.transition(ResourceState::RenderTarget)?,
            Some(depth),
        ],
    );
    recorder.set_viewport_and_scissor(targets.extent);

    record_depth_prepass(recorder, targets, frame);
    record_shadow_rays(recorder, targets, frame)?;
    record_forward_pass(recorder, targets, frame)?;
    record_tonemap(recorder, targets, frame)?;

    record_image_transitions(
        recorder,
        [targets.back_buffer.transition(ResourceState::Present)?],
    );

    Ok(())
}

fn record_draws<R: CommandRecorder + ?Sized>(
    recorder: &R,
    frame: &FrameRecording<'_>,
    pass_override: Option<GraphicsPass>,
) {
    let mut bound = None;
    for (pass, draw) in frame.draws() {
        let pass = pass_override.unwrap_or(pass);
        if bound != Some(pass.pipeline) {
            recorder.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pass.pipeline);
            recorder.bind_descriptor_sets(
                vk::PipelineBindPoint::GRAPHICS,
                pass.layout,
                0,
                &[frame.bindless_set],
            );
            bound = Some(pass.pipeline);
        }

        recorder.push_constants(
            pass.layout,
            pass.push_constant_stages,
            bytemuck::bytes_of(&frame.push_constants(draw)),
        );
        recorder.bind_vertex_buffer(draw.vertex_buffer);
        recorder.bind_index_buffer(draw.index_buffer);
        recorder.draw_indexed(draw.index_count);
    }
}

fn record_depth_prepass<R: CommandRecorder + ?Sized>(
    recorder: &R,
    targets: &FrameTargets<'_>,
    frame: &FrameRecording<'_>,
) {
    recorder.begin_rendering(&RenderingPass {
        extent: targets.extent,
        color: None,
        depth: Some(DepthAttachment {
            image: targets.depth.handle(),
            clear: Some(1.0),
        }),
    });
    record_draws(recorder, frame, Some(frame.depth_prepass));
    recorder.end_rendering();
}

fn record_shadow_rays<R: CommandRecorder + ?Sized>(
    recorder: &R,
    targets: &mut FrameTargets<'_>,
    frame: &FrameRecording<'_>,
) -> Result<(), RenderError> {
    record_image_transitions(
        recorder,
        [
            targets.shadow.transition(ResourceState::UnorderedAccess)?,
            targets.depth.transition(ResourceState::NonPixelShaderResource)?,
        ],
    );

    let shadow = &frame.shadow;
    recorder.bind_pipeline(vk::PipelineBindPoint::RAY_TRACING_KHR, shadow.pipeline);
    recorder.bind_descriptor_sets(
        vk::PipelineBindPoint::RAY_TRACING_KHR,
        shadow.layout,
        0,
        &[frame.bindless_set, shadow.scene_set],
    );
    recorder.push_constants(
        shadow.layout,
        shadow.push_constant_stages,
        bytemuck::bytes_of(&RaytracePushConstants {
            constants: shadow.constants_address,
            shadow_index: shadow.output_index,
            depth_index: shadow.depth_index,
        }),
    );
    recorder.trace_rays(&shadow.regions, targets.extent);

    record_image_transitions(
        recorder,
        [
            targets.shadow.transition(ResourceState::PixelShaderResource)?,
            targets.depth.transition(ResourceState::DepthWrite)?,
        ],
    );

    Ok(())
}

fn record_forward_pass<R: CommandRecorder + ?Sized>(
    recorder: &R,
    targets: &mut FrameTargets<'_>,
    frame: &FrameRecording<'_>,
) -> Result<(), RenderError> {
    record_image_transitions(
        recorder,
        [targets.hdr.transition(ResourceState::RenderTarget)?],
    );

    recorder.begin_rendering(&RenderingPass {
        extent: targets.extent,
        color: Some(ColorAttachment {
            image: targets.hdr.handle(),
            clear: Some([0.0, 0.0, 0.0, 1.0]),
        }),
        depth: Some(DepthAttachment {
            image: targets.depth.handle(),
            clear: None,
        }),
    });
    record_draws(recorder, frame, None);
    recorder.end_rendering();

    record_image_transitions(
        recorder,
        [targets.hdr.transition(ResourceState::PixelShaderResource)?],
    );

    Ok(())
}

fn record_tonemap<R: CommandRecorder + ?Sized>(
    recorder: &R,
    targets: &mut FrameTargets<'_>,
    frame: &FrameRecording<'_>,
) -> Result<(), RenderError> {
    targets.back_buffer.expect(ResourceState::RenderTarget)?;

    recorder.begin_rendering(&RenderingPass {
        extent: targets.extent,
        color: Some(ColorAttachment {
            image: targets.back_buffer.handle(),
            clear: None,
        }),
        depth: None,
    });
    recorder.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, frame.tonemap.pipeline);
    recorder.bind_descriptor_sets(
        vk::PipelineBindPoint::GRAPHICS,
        frame.tonemap.layout,
        0,
        &[frame.bindless_set],
    );
    recorder.push_constants(
        frame.tonemap.layout,
        frame.tonemap.push_constant_stages,
        bytemuck::bytes_of(&TonemapPushConstants {
            hdr_index: frame.hdr_index,
        }),
    );
    // Fullscreen triangle generated in the vertex shader.
    recorder.draw(3);
    recorder.end_rendering();

    Ok(())
}
