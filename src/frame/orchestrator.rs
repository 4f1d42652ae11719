use anyhow::{ensure, Result};
use ash::vk;
use log::{debug, info};

use crate::frame::{
    record_frame, CameraConstants, DrawPushConstants, FrameInputs, FrameRecording, FrameTargets,
    LightConstants, RaytraceConstants, RaytracePushConstants, ShadowDispatch,
    TonemapPushConstants, Vertex,
};
use crate::scene::ShadowScene;
use crate::vulkan::descriptor_heap::{DescriptorHandle, DescriptorHeap, ImageHandlePair};
use crate::vulkan::{
    load_spirv, record_image_transitions, CommandRecorder, Context, DepthMode, DescriptorPool,
    DescriptorSet, DescriptorSetLayout, FrameRingBuffer, GraphicsPipelineCreateInfo,
    GraphicsShaderCreateInfo, ImageHandle, PipelineRegistry, RayTracingPipeline,
    RayTracingPipelineCreateInfo, RayTracingShaderSources, RenderTarget, ResourceState,
    ShaderBindingTable, Tracked, VertexLayout, ViewKind, WriteDescriptorSet,
    WriteDescriptorSetKind,
};
use crate::RendererConfig;

pub const DEPTH_PREPASS_PIPELINE: &str = "depth_prepass";
pub const FORWARD_PIPELINE: &str = "forward";
pub const FLOOR_PIPELINE: &str = "floor";
pub const TONEMAP_PIPELINE: &str = "tonemap";

/// Capacity of each binding of the bindless image heap.
const HEAP_CAPACITY: u32 = 16;

const VERTEX_ATTRIBUTES: [(vk::Format, u32); 3] = [
    (vk::Format::R32G32B32_SFLOAT, 0),
    (vk::Format::R32G32B32_SFLOAT, 12),
    (vk::Format::R32G32_SFLOAT, 24),
];

/// Owns the per frame GPU state and records frames against a [`ShadowScene`].
///
/// Field order is drop order: descriptor handles go before their heap, sets
/// before their pool.
pub struct FrameOrchestrator {
    shader_binding_table: ShaderBindingTable,
    shadow_pipeline: RayTracingPipeline,
    pipelines: PipelineRegistry,

    scene_set: DescriptorSet,
    _scene_pool: DescriptorPool,
    _scene_layout: DescriptorSetLayout,

    shadow_handles: ImageHandlePair,
    depth_handle: DescriptorHandle,
    hdr_handle: DescriptorHandle,
    descriptor_heap: DescriptorHeap,

    camera: FrameRingBuffer,
    raytrace: FrameRingBuffer,
    lights: FrameRingBuffer,

    shadow: RenderTarget,
    depth: RenderTarget,
    hdr: RenderTarget,
    extent: vk::Extent2D,
}

impl FrameOrchestrator {
    /// Creates targets, pipelines and bindings. Initial image transitions go into `recorder`.
    pub fn new<R: CommandRecorder + ?Sized>(
        context: &Context,
        config: &RendererConfig,
        scene: &ShadowScene,
        recorder: &R,
    ) -> Result<Self> {
        let extent = vk::Extent2D {
            width: config.output_size.x,
            height: config.output_size.y,
        };
        ensure!(
            extent.width > 0 && extent.height > 0,
            "Output size {}x{} is empty",
            extent.width,
            extent.height
        );

        let mut shadow = context.create_render_target(
            "shadow",
            vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED,
            config.shadow_format,
            extent,
        )?;
        let mut depth = context.create_render_target(
            "depth",
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            config.depth_format,
            extent,
        )?;
        let mut hdr = context.create_render_target(
            "hdr",
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            config.hdr_format,
            extent,
        )?;

        record_image_transitions(
            recorder,
            [
                shadow.tracked.transition(ResourceState::PixelShaderResource)?,
                depth.tracked.transition(ResourceState::DepthWrite)?,
                hdr.tracked.transition(ResourceState::PixelShaderResource)?,
            ],
        );

        let frames = config.frames_in_flight;
        let camera = constant_ring(context, "camera constants", size_of::<CameraConstants>(), frames)?;
        let raytrace =
            constant_ring(context, "raytrace constants", size_of::<RaytraceConstants>(), frames)?;
        let lights = constant_ring(context, "light constants", size_of::<LightConstants>(), frames)?;

        let mut descriptor_heap = context.create_descriptor_heap(vec![
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: HEAP_CAPACITY,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: HEAP_CAPACITY,
            },
        ])?;
        let shadow_handles = descriptor_heap.create_handle_pair(&shadow.view)?;
        let depth_handle = descriptor_heap.create_sampled_handle(&depth.view)?;
        let hdr_handle = descriptor_heap.create_sampled_handle(&hdr.view)?;

        let scene_layout = context.create_descriptor_set_layout(&[vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::RAYGEN_KHR,
            ..Default::default()
        }])?;
        let scene_pool = context.create_descriptor_pool(
            1,
            &[vk::DescriptorPoolSize {
                ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                descriptor_count: 1,
            }],
        )?;
        let scene_set = scene_pool.allocate_set(&scene_layout)?;

        let pipelines =
            create_graphics_pipelines(context, config, descriptor_heap.layout.handle())?;

        let shader_dir = config.shader_dir.as_path();
        let raygen = load_spirv(&shader_dir.join("shadow.rgen.spv"))?;
        let miss = load_spirv(&shader_dir.join("shadow.rmiss.spv"))?;
        let closest_hit = load_spirv(&shader_dir.join("shadow.rchit.spv"))?;
        let shadow_pipeline = context.create_ray_tracing_pipeline(RayTracingPipelineCreateInfo {
            shaders: RayTracingShaderSources {
                raygen: &raygen,
                miss: &miss,
                closest_hit: &closest_hit,
            },
            descriptor_set_layouts: &[descriptor_heap.layout.handle(), scene_layout.handle()],
            push_constant_size: size_of::<RaytracePushConstants>() as u32,
        })?;
        let shader_binding_table = ShaderBindingTable::new(context, &shadow_pipeline)?;

        let orchestrator = Self {
            shader_binding_table,
            shadow_pipeline,
            pipelines,
            scene_set,
            _scene_pool: scene_pool,
            _scene_layout: scene_layout,
            shadow_handles,
            depth_handle,
            hdr_handle,
            descriptor_heap,
            camera,
            raytrace,
            lights,
            shadow,
            depth,
            hdr,
            extent,
        };
        orchestrator.bind_scene(scene);

        info!(
            "Frame orchestrator ready at {}x{} with pipelines {:?}",
            extent.width,
            extent.height,
            orchestrator.pipelines.names().collect::<Vec<_>>()
        );

        Ok(orchestrator)
    }

    /// Points the dispatch at the scene's current top level structure.
    ///
    /// Only valid while no frame using the previous binding is in flight.
    pub fn bind_scene(&self, scene: &ShadowScene) {
        self.scene_set.update(&[WriteDescriptorSet {
            binding: 0,
            kind: WriteDescriptorSetKind::AccelerationStructure {
                acceleration_structure: scene.top_level(),
            },
        }]);
        debug!("Bound top level acceleration structure {:?}", scene.top_level());
    }

    /// Fills this frame's slots of the camera, raytrace and light constants.
    pub fn write_constants(&mut self, frame_index: usize, inputs: &FrameInputs) {
        self.camera.write_pod(
            frame_index,
            &CameraConstants {
                view_projection: inputs.view_projection,
                position: inputs.camera_position.extend(1.0),
            },
        );
        self.raytrace.write_pod(
            frame_index,
            &RaytraceConstants::new(inputs.view_projection, inputs.camera_position),
        );
        self.lights
            .write_pod(frame_index, &LightConstants::new(&inputs.lights));
    }

    pub fn record<R: CommandRecorder + ?Sized>(
        &mut self,
        recorder: &R,
        frame_index: usize,
        inputs: &FrameInputs,
        scene: &ShadowScene,
        back_buffer: &mut Tracked<ImageHandle>,
    ) -> Result<()> {
        let meshes = scene.mesh_draws(frame_index);

        let frame = FrameRecording {
            depth_prepass: self.pipelines.get(DEPTH_PREPASS_PIPELINE)?.into(),
            forward: self.pipelines.get(FORWARD_PIPELINE)?.into(),
            floor: self.pipelines.get(FLOOR_PIPELINE)?.into(),
            tonemap: self.pipelines.get(TONEMAP_PIPELINE)?.into(),
            bindless_set: self.descriptor_heap.set.handle(),
            shadow: ShadowDispatch::new(
                &self.shadow_pipeline,
                self.scene_set.handle(),
                self.shader_binding_table.regions,
                scene.acceleration_structures.top.buffer.tracked(),
                self.raytrace.gpu_address(frame_index),
                self.shadow_handles.storage.value,
                self.depth_handle.value,
            ),
            meshes: &meshes,
            floor_mesh: scene.floor_draw(frame_index),
            camera_address: self.camera.gpu_address(frame_index),
            lights_address: self.lights.gpu_address(frame_index),
            shadow_index: self.shadow_handles.sampled.value,
            hdr_index: self.hdr_handle.value,
            toggles: inputs.toggles,
        };

        let mut targets = FrameTargets {
            extent: self.extent,
            back_buffer,
            hdr: &mut self.hdr.tracked,
            depth: &mut self.depth.tracked,
            shadow: &mut self.shadow.tracked,
        };

        record_frame(recorder, &mut targets, &frame)?;

        Ok(())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

fn constant_ring(
    context: &Context,
    name: &str,
    size: usize,
    frames: usize,
) -> Result<FrameRingBuffer> {
    FrameRingBuffer::new(context, name, size as u64, frames, ViewKind::Constant).ensure_valid()
}

fn create_graphics_pipelines(
    context: &Context,
    config: &RendererConfig,
    heap_layout: vk::DescriptorSetLayout,
) -> Result<PipelineRegistry> {
    let shader = |name: &str| load_spirv(&config.shader_dir.join(name));

    let mesh_vertex = shader("mesh.vert.spv")?;
    let forward_fragment = shader("forward.frag.spv")?;
    let floor_fragment = shader("floor.frag.spv")?;
    let fullscreen_vertex = shader("fullscreen.vert.spv")?;
    let tonemap_fragment = shader("tonemap.frag.spv")?;

    let vertex_layout = VertexLayout {
        stride: size_of::<Vertex>() as u32,
        attributes: &VERTEX_ATTRIBUTES,
    };
    let draw_push_size = size_of::<DrawPushConstants>() as u32;
    let set_layouts = [heap_layout];

    let mut registry = PipelineRegistry::new();

    registry.insert(
        DEPTH_PREPASS_PIPELINE,
        context.create_graphics_pipeline(GraphicsPipelineCreateInfo {
            name: DEPTH_PREPASS_PIPELINE,
            shaders: &[GraphicsShaderCreateInfo {
                source: &mesh_vertex,
                stage: vk::ShaderStageFlags::VERTEX,
            }],
            vertex_layout: Some(vertex_layout),
            color_attachment_format: None,
            depth: Some(DepthMode {
                format: config.depth_format,
                write: true,
                compare: vk::CompareOp::LESS,
            }),
            descriptor_set_layouts: &set_layouts,
            push_constant_size: draw_push_size,
        })?,
    );

    // Depth is already resolved by the prepass.
    let forward_depth = DepthMode {
        format: config.depth_format,
        write: false,
        compare: vk::CompareOp::EQUAL,
    };
    for (name, fragment) in [
        (FORWARD_PIPELINE, &forward_fragment),
        (FLOOR_PIPELINE, &floor_fragment),
    ] {
        registry.insert(
            name,
            context.create_graphics_pipeline(GraphicsPipelineCreateInfo {
                name,
                shaders: &[
                    GraphicsShaderCreateInfo {
                        source: &mesh_vertex,
                        stage: vk::ShaderStageFlags::VERTEX,
                    },
                    GraphicsShaderCreateInfo {
                        source: fragment,
                        stage: vk::ShaderStageFlags::FRAGMENT,
                    },
                ],
                vertex_layout: Some(vertex_layout),
                color_attachment_format: Some(config.hdr_format),
                depth: Some(forward_depth),
                descriptor_set_layouts: &set_layouts,
                push_constant_size: draw_push_size,
            })?,
        );
    }

    registry.insert(
        TONEMAP_PIPELINE,
        context.create_graphics_pipeline(GraphicsPipelineCreateInfo {
            name: TONEMAP_PIPELINE,
            shaders: &[
                GraphicsShaderCreateInfo {
                    source: &fullscreen_vertex,
                    stage: vk::ShaderStageFlags::VERTEX,
                },
                GraphicsShaderCreateInfo {
                    source: &tonemap_fragment,
                    stage: vk::ShaderStageFlags::FRAGMENT,
                },
            ],
            vertex_layout: None,
            color_attachment_format: Some(config.back_buffer_format),
            depth: None,
            descriptor_set_layouts: &set_layouts,
            push_constant_size: size_of::<TonemapPushConstants>() as u32,
        })?,
    );

    Ok(registry)
}
