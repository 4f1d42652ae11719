mod common;

use ash::vk::{self, Handle};
use common::{buffer, image, Command, SimulatedDevice};
use penumbra::error::RenderError;
use penumbra::frame::{
    record_frame, FrameRecording, FrameTargets, FrameToggles, GraphicsPass,
    RaytracePushConstants, ShadowDispatch,
};
use penumbra::scene::MeshDraw;
use penumbra::vulkan::{
    record_builds, AccelerationStructureBuild, AccelerationStructureLevel, BuildGeometry,
    BuildPlan, BuildSizes, ImageHandle, MeshBuildInput, ResourceState, ShaderTableRegions,
    Tracked, TriangleGeometry,
};

const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 1,
    height: 1,
};
const RAYTRACE_CONSTANTS: vk::DeviceAddress = 0xC0_0000;
const SHADOW_STORAGE_INDEX: u32 = 1;
const DEPTH_INDEX: u32 = 2;

struct Frame {
    device: SimulatedDevice,
    top_storage: Tracked<vk::Buffer>,
    back_buffer: Tracked<ImageHandle>,
    hdr: Tracked<ImageHandle>,
    depth: Tracked<ImageHandle>,
    shadow: Tracked<ImageHandle>,
}

fn pass(raw: u64) -> GraphicsPass {
    GraphicsPass {
        pipeline: vk::Pipeline::from_raw(raw),
        layout: vk::PipelineLayout::from_raw(raw + 100),
        push_constant_stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
    }
}

fn one_triangle() -> TriangleGeometry {
    TriangleGeometry {
        vertex_buffer: buffer(1),
        vertex_address: 0x1_0000,
        vertex_stride: 32,
        vertex_count: 3,
        index_buffer: buffer(2),
        index_address: 0x2_0000,
        index_count: 3,
    }
}

const MESH: MeshDraw = MeshDraw {
    vertex_buffer: vk::Buffer::null(),
    index_buffer: vk::Buffer::null(),
    index_count: 3,
    object_address: 0xA0_0000,
    material_address: 0xB0_0000,
};

fn mesh_draw() -> MeshDraw {
    MeshDraw {
        vertex_buffer: buffer(1),
        index_buffer: buffer(2),
        ..MESH
    }
}

fn floor_draw() -> MeshDraw {
    MeshDraw {
        vertex_buffer: buffer(5),
        index_buffer: buffer(6),
        index_count: 6,
        ..MESH
    }
}

impl Frame {
    fn new() -> Self {
        let device = SimulatedDevice::new(
            BuildSizes {
                result_size: 2048,
                scratch_size: 256,
            },
            BuildSizes {
                result_size: 512,
                scratch_size: 128,
            },
        );

        let back_buffer = Tracked::new(
            "back buffer",
            image(100, vk::ImageAspectFlags::COLOR),
            ResourceState::Present,
        );
        let hdr = Tracked::new(
            "hdr",
            image(101, vk::ImageAspectFlags::COLOR),
            ResourceState::PixelShaderResource,
        );
        let depth = Tracked::new(
            "depth",
            image(102, vk::ImageAspectFlags::DEPTH),
            ResourceState::DepthWrite,
        );
        let shadow = Tracked::new(
            "shadow",
            image(103, vk::ImageAspectFlags::COLOR),
            ResourceState::PixelShaderResource,
        );
        for tracked in [&back_buffer, &hdr, &depth, &shadow] {
            device.register_image(tracked);
        }
        device.expect_storage_output(shadow.handle().image);

        let floor_vertices = Tracked::new("floor vertices", buffer(5), ResourceState::VertexBuffer);
        let floor_indices = Tracked::new("floor indices", buffer(6), ResourceState::IndexBuffer);
        device.register_buffer(&floor_vertices);
        device.register_buffer(&floor_indices);

        let top_storage = Tracked::new("top", buffer(12), ResourceState::AccelerationStructure);
        device.register_buffer(&top_storage);

        Self {
            device,
            top_storage,
            back_buffer,
            hdr,
            depth,
            shadow,
        }
    }

    /// Records the bottom and top level builds for one triangle.
    fn build_scene(&self) {
        let mut vertices = Tracked::new("vertices", buffer(1), ResourceState::VertexBuffer);
        let mut indices = Tracked::new("indices", buffer(2), ResourceState::IndexBuffer);
        let scratch = Tracked::new("scratch", buffer(10), ResourceState::UnorderedAccess);
        let bottom_storage = Tracked::new("bottom", buffer(11), ResourceState::AccelerationStructure);
        for tracked in [&vertices, &indices, &scratch, &bottom_storage] {
            self.device.register_buffer(tracked);
        }

        let instances = BuildGeometry::Instances {
            buffer: buffer(3),
            address: 0x3_0000,
            count: 1,
        };
        let plan = BuildPlan::new(
            &self.device,
            &BuildGeometry::Triangles(vec![one_triangle()]),
            &instances,
            256,
        )
        .unwrap();

        let build = |level, destination_buffer, size, geometry| AccelerationStructureBuild {
            level,
            destination: vk::AccelerationStructureKHR::from_raw(20),
            destination_buffer,
            destination_size: size,
            scratch_buffer: buffer(10),
            scratch_address: 0x10_0000,
            geometry,
        };
        let bottom = build(
            AccelerationStructureLevel::Bottom,
            buffer(11),
            plan.bottom.result_size,
            BuildGeometry::Triangles(vec![one_triangle()]),
        );
        let top = build(
            AccelerationStructureLevel::Top,
            self.top_storage.handle(),
            plan.top.result_size,
            instances,
        );

        let mut meshes = [MeshBuildInput {
            geometry: one_triangle(),
            vertices: &mut vertices,
            indices: &mut indices,
        }];
        record_builds(
            &self.device,
            &plan,
            &mut meshes,
            &scratch,
            &bottom,
            &bottom_storage,
            &top,
        )
        .unwrap();
    }

    fn record(&mut self, toggles: FrameToggles) -> Result<(), RenderError> {
        let meshes = [mesh_draw()];
        let frame = FrameRecording {
            depth_prepass: pass(1),
            forward: pass(2),
            floor: pass(3),
            tonemap: pass(4),
            bindless_set: vk::DescriptorSet::from_raw(50),
            shadow: ShadowDispatch {
                pipeline: vk::Pipeline::from_raw(5),
                layout: vk::PipelineLayout::from_raw(105),
                push_constant_stages: vk::ShaderStageFlags::RAYGEN_KHR,
                scene_set: vk::DescriptorSet::from_raw(51),
                regions: ShaderTableRegions::default(),
                top_level: &self.top_storage,
                constants_address: RAYTRACE_CONSTANTS,
                output_index: SHADOW_STORAGE_INDEX,
                depth_index: DEPTH_INDEX,
            },
            meshes: &meshes,
            floor_mesh: floor_draw(),
            camera_address: 0xD0_0000,
            lights_address: 0xE0_0000,
            shadow_index: 0,
            hdr_index: 3,
            toggles,
        };

        let mut targets = FrameTargets {
            extent: EXTENT,
            back_buffer: &mut self.back_buffer,
            hdr: &mut self.hdr,
            depth: &mut self.depth,
            shadow: &mut self.shadow,
        };

        record_frame(&self.device, &mut targets, &frame)
    }
}

#[test]
fn one_triangle_frame_records_without_hazards() {
    let mut frame = Frame::new();
    frame.build_scene();

    frame.record(FrameToggles::default()).unwrap();

    assert_eq!(frame.device.faults(), Vec::<String>::new());
    assert_eq!(frame.shadow.state(), ResourceState::PixelShaderResource);
    assert_eq!(frame.back_buffer.state(), ResourceState::Present);
    assert_eq!(frame.depth.state(), ResourceState::DepthWrite);
    assert_eq!(frame.hdr.state(), ResourceState::PixelShaderResource);
    assert_eq!(
        frame.device.image_state(frame.shadow.handle().image),
        Some(ResourceState::PixelShaderResource)
    );
    assert_eq!(
        frame.device.image_state(frame.back_buffer.handle().image),
        Some(ResourceState::Present)
    );
}

#[test]
fn passes_run_in_order() {
    let mut frame = Frame::new();
    frame.build_scene();
    let builds = frame.device.commands().len();

    frame.record(FrameToggles::default()).unwrap();

    let commands = frame.device.commands()[builds..].to_vec();
    let begins = commands
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, Command::BeginRendering(_)))
        .map(|(i, _)| i)
        .collect::<Vec<_>>();
    let trace = commands
        .iter()
        .position(|c| *c == Command::TraceRays(EXTENT))
        .unwrap();

    // Depth prepass, forward pass, tonemap.
    assert_eq!(begins.len(), 3);
    assert!(begins[0] < trace && trace < begins[1]);
    assert!(matches!(
        commands.last(),
        Some(Command::ImageBarriers(t)) if t.len() == 1 && t[0].to == ResourceState::Present
    ));

    // Mesh and floor in both the prepass and the forward pass, then the fullscreen triangle.
    assert_eq!(frame.device.count(|c| matches!(c, Command::DrawIndexed(_))), 4);
    assert_eq!(frame.device.count(|c| *c == Command::Draw(3)), 1);
}

#[test]
fn dispatch_pushes_the_raytrace_constants_address() {
    let mut frame = Frame::new();
    frame.build_scene();

    frame.record(FrameToggles::default()).unwrap();

    let expected = RaytracePushConstants {
        constants: RAYTRACE_CONSTANTS,
        shadow_index: SHADOW_STORAGE_INDEX,
        depth_index: DEPTH_INDEX,
    };
    let commands = frame.device.commands();
    let bind = commands
        .iter()
        .position(|c| *c == Command::BindPipeline(vk::PipelineBindPoint::RAY_TRACING_KHR))
        .unwrap();

    assert_eq!(commands[bind + 1], Command::BindDescriptorSets(2));
    assert_eq!(
        commands[bind + 2],
        Command::PushConstants(bytemuck::bytes_of(&expected).to_vec())
    );
}

#[test]
fn consecutive_frames_start_from_the_states_the_previous_frame_left() {
    let mut frame = Frame::new();
    frame.build_scene();

    for _ in 0..3 {
        frame.record(FrameToggles::default()).unwrap();
    }

    assert_eq!(frame.device.faults(), Vec::<String>::new());
    assert_eq!(frame.device.count(|c| matches!(c, Command::TraceRays(_))), 3);
}

#[test]
fn next_frame_orders_its_depth_clear_after_the_previous_frame() {
    let mut frame = Frame::new();
    frame.build_scene();

    frame.record(FrameToggles::default()).unwrap();
    let first_frame = frame.device.commands().len();
    frame.record(FrameToggles::default()).unwrap();

    let second = frame.device.commands()[first_frame..].to_vec();
    let prepass = second
        .iter()
        .position(|c| matches!(c, Command::BeginRendering(_)))
        .unwrap();
    let depth = frame.depth.handle().image;
    let depth_barriers = second[..prepass]
        .iter()
        .filter_map(|c| match c {
            Command::ImageBarriers(transitions) => Some(transitions),
            _ => None,
        })
        .flatten()
        .filter(|t| t.handle.image == depth)
        .collect::<Vec<_>>();

    assert_eq!(depth_barriers.len(), 1);
    assert_eq!(depth_barriers[0].from, ResourceState::DepthWrite);
    assert_eq!(depth_barriers[0].to, ResourceState::DepthWrite);
    assert_eq!(frame.device.faults(), Vec::<String>::new());
}

#[test]
fn toggles_skip_mesh_and_floor_draws_but_not_the_dispatch() {
    let mut frame = Frame::new();
    frame.build_scene();

    frame
        .record(FrameToggles {
            draw_meshes: false,
            draw_floor: true,
        })
        .unwrap();
    assert_eq!(frame.device.count(|c| matches!(c, Command::DrawIndexed(6))), 2);
    assert_eq!(frame.device.count(|c| matches!(c, Command::DrawIndexed(_))), 2);

    frame
        .record(FrameToggles {
            draw_meshes: false,
            draw_floor: false,
        })
        .unwrap();
    assert_eq!(frame.device.count(|c| matches!(c, Command::DrawIndexed(_))), 2);
    assert_eq!(frame.device.count(|c| matches!(c, Command::TraceRays(_))), 2);
    assert_eq!(frame.device.faults(), Vec::<String>::new());
}

#[test]
fn shadow_output_left_in_unordered_access_fails_the_frame() {
    let mut frame = Frame::new();
    frame.build_scene();
    let builds = frame.device.commands().len();
    frame.shadow = Tracked::new(
        "shadow",
        image(103, vk::ImageAspectFlags::COLOR),
        ResourceState::UnorderedAccess,
    );

    let result = frame.record(FrameToggles::default());

    assert!(matches!(
        result,
        Err(RenderError::StateMismatch {
            expected: ResourceState::PixelShaderResource,
            actual: ResourceState::UnorderedAccess,
            ..
        })
    ));
    assert_eq!(frame.device.commands().len(), builds);
}

#[test]
fn dispatch_before_any_build_is_a_device_fault() {
    let mut frame = Frame::new();

    frame.record(FrameToggles::default()).unwrap();

    assert!(frame
        .device
        .faults()
        .iter()
        .any(|f| f.contains("without a top level")));
}
