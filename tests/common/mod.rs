#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use ash::vk::{self, Handle};
use penumbra::vulkan::{
    AccelerationStructureBuild, AccelerationStructureLevel, BuildGeometry, BuildSizeQuery,
    BuildSizes, CommandRecorder, ImageHandle, RenderingPass, ResourceState, ShaderTableRegions,
    Tracked, Transition,
};

/// What the simulated device saw, in recording order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BufferBarriers(Vec<Transition<vk::Buffer>>),
    ImageBarriers(Vec<Transition<ImageHandle>>),
    Copy { size: vk::DeviceSize },
    Build(AccelerationStructureLevel),
    BeginRendering(RenderingPass),
    EndRendering,
    Viewport(vk::Extent2D),
    BindPipeline(vk::PipelineBindPoint),
    BindDescriptorSets(usize),
    PushConstants(Vec<u8>),
    DrawIndexed(u32),
    Draw(u32),
    TraceRays(vk::Extent2D),
}

/// A device that executes recorded commands against tracked resource states
/// and byte contents, and writes down every hazard instead of corrupting memory.
#[derive(Default)]
pub struct SimulatedDevice {
    pub bottom_sizes: BuildSizes,
    pub top_sizes: BuildSizes,

    buffer_states: RefCell<HashMap<vk::Buffer, ResourceState>>,
    image_states: RefCell<HashMap<vk::Image, ResourceState>>,
    contents: RefCell<HashMap<vk::Buffer, Vec<u8>>>,
    unordered_writes: RefCell<HashSet<vk::Buffer>>,
    storage_outputs: RefCell<Vec<vk::Image>>,
    built: RefCell<Vec<AccelerationStructureLevel>>,
    attachment_writes: RefCell<HashSet<vk::Image>>,
    rendering: Cell<bool>,
    vertex_buffer: Cell<Option<vk::Buffer>>,
    index_buffer: Cell<Option<vk::Buffer>>,

    faults: RefCell<Vec<String>>,
    commands: RefCell<Vec<Command>>,
}

pub fn buffer(raw: u64) -> vk::Buffer {
    vk::Buffer::from_raw(raw)
}

pub fn image(raw: u64, aspect: vk::ImageAspectFlags) -> ImageHandle {
    ImageHandle {
        image: vk::Image::from_raw(raw),
        view: vk::ImageView::from_raw(raw + 0x1000),
        aspect,
    }
}

impl SimulatedDevice {
    pub fn new(bottom_sizes: BuildSizes, top_sizes: BuildSizes) -> Self {
        Self {
            bottom_sizes,
            top_sizes,
            ..Default::default()
        }
    }

    pub fn register_buffer(&self, tracked: &Tracked<vk::Buffer>) {
        self.buffer_states
            .borrow_mut()
            .insert(tracked.handle(), tracked.state());
    }

    pub fn register_image(&self, tracked: &Tracked<ImageHandle>) {
        self.image_states
            .borrow_mut()
            .insert(tracked.handle().image, tracked.state());
    }

    pub fn fill(&self, buffer: vk::Buffer, bytes: &[u8]) {
        self.contents.borrow_mut().insert(buffer, bytes.to_vec());
    }

    /// Images a dispatch writes through storage views.
    pub fn expect_storage_output(&self, image: vk::Image) {
        self.storage_outputs.borrow_mut().push(image);
    }

    pub fn contents(&self, buffer: vk::Buffer) -> Vec<u8> {
        self.contents.borrow().get(&buffer).cloned().unwrap_or_default()
    }

    pub fn buffer_state(&self, buffer: vk::Buffer) -> Option<ResourceState> {
        self.buffer_states.borrow().get(&buffer).copied()
    }

    pub fn image_state(&self, image: vk::Image) -> Option<ResourceState> {
        self.image_states.borrow().get(&image).copied()
    }

    pub fn faults(&self) -> Vec<String> {
        self.faults.borrow().clone()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.borrow().clone()
    }

    pub fn count(&self, matches: impl Fn(&Command) -> bool) -> usize {
        self.commands.borrow().iter().filter(|c| matches(c)).count()
    }

    fn fault(&self, message: String) {
        self.faults.borrow_mut().push(message);
    }

    fn push(&self, command: Command) {
        self.commands.borrow_mut().push(command);
    }

    fn expect_buffer(&self, buffer: vk::Buffer, expected: ResourceState, what: &str) {
        match self.buffer_state(buffer) {
            Some(state) if state == expected => {}
            actual => self.fault(format!("{what}: {buffer:?} is in {actual:?}, expected {expected:?}")),
        }
    }

    fn expect_image(&self, image: vk::Image, expected: ResourceState, what: &str) {
        match self.image_state(image) {
            Some(state) if state == expected => {}
            actual => self.fault(format!("{what}: {image:?} is in {actual:?}, expected {expected:?}")),
        }
    }
}

impl SimulatedDevice {
    /// Two rendering scopes touching the same attachment need a barrier in between.
    fn attachment_write(&self, image: vk::Image, what: &str) {
        if !self.attachment_writes.borrow_mut().insert(image) {
            self.fault(format!("{what}: {image:?} reused without a barrier"));
        }
    }
}

impl BuildSizeQuery for SimulatedDevice {
    fn build_sizes(&self, level: AccelerationStructureLevel, _geometry: &BuildGeometry) -> BuildSizes {
        match level {
            AccelerationStructureLevel::Bottom => self.bottom_sizes,
            AccelerationStructureLevel::Top => self.top_sizes,
        }
    }
}

impl CommandRecorder for SimulatedDevice {
    fn buffer_barriers(&self, transitions: &[Transition<vk::Buffer>]) {
        for transition in transitions {
            self.expect_buffer(transition.handle, transition.from, "buffer barrier");
            self.buffer_states
                .borrow_mut()
                .insert(transition.handle, transition.to);
            self.unordered_writes.borrow_mut().remove(&transition.handle);
        }
        self.push(Command::BufferBarriers(transitions.to_vec()));
    }

    fn image_barriers(&self, transitions: &[Transition<ImageHandle>]) {
        for transition in transitions {
            let image = transition.handle.image;
            if transition.from != ResourceState::Undefined {
                self.expect_image(image, transition.from, "image barrier");
            }
            self.image_states.borrow_mut().insert(image, transition.to);
            self.attachment_writes.borrow_mut().remove(&image);
        }
        self.push(Command::ImageBarriers(transitions.to_vec()));
    }

    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        self.expect_buffer(dst, ResourceState::CopyDestination, "copy");
        // Upload heap buffers are not tracked.
        if self.buffer_state(src).is_some() {
            self.expect_buffer(src, ResourceState::CopySource, "copy source");
        }

        let mut data = self.contents(src);
        data.resize(size as usize, 0);
        self.contents.borrow_mut().insert(dst, data);
        self.push(Command::Copy { size });
    }

    fn build_acceleration_structure(&self, build: &AccelerationStructureBuild) {
        let required = self.build_sizes(build.level, &build.geometry).result_size;
        if build.destination_size < required {
            self.fault(format!(
                "{:?} build into {} bytes, {} required",
                build.level, build.destination_size, required
            ));
        }

        self.expect_buffer(build.scratch_buffer, ResourceState::UnorderedAccess, "scratch");
        self.expect_buffer(
            build.destination_buffer,
            ResourceState::AccelerationStructure,
            "build destination",
        );

        if self.unordered_writes.borrow().contains(&build.scratch_buffer) {
            self.fault(format!("{:?} build reuses scratch without a barrier", build.level));
        }

        match &build.geometry {
            BuildGeometry::Triangles(triangles) => {
                for triangle in triangles {
                    self.expect_buffer(
                        triangle.vertex_buffer,
                        ResourceState::NonPixelShaderResource,
                        "build vertices",
                    );
                    self.expect_buffer(
                        triangle.index_buffer,
                        ResourceState::NonPixelShaderResource,
                        "build indices",
                    );
                }
            }
            BuildGeometry::Instances { .. } => {
                if !self.built.borrow().contains(&AccelerationStructureLevel::Bottom) {
                    self.fault("top level build before any bottom level build".to_owned());
                }
                if !self.unordered_writes.borrow().is_empty() {
                    self.fault("top level build reads an unflushed bottom level".to_owned());
                }
            }
        }

        let mut writes = self.unordered_writes.borrow_mut();
        writes.insert(build.destination_buffer);
        writes.insert(build.scratch_buffer);
        self.built.borrow_mut().push(build.level);
        self.push(Command::Build(build.level));
    }

    fn begin_rendering(&self, pass: &RenderingPass) {
        if self.rendering.replace(true) {
            self.fault("nested rendering".to_owned());
        }
        if let Some(color) = pass.color {
            self.expect_image(color.image.image, ResourceState::RenderTarget, "color attachment");
            self.attachment_write(color.image.image, "color attachment");
        }
        if let Some(depth) = pass.depth {
            self.expect_image(depth.image.image, ResourceState::DepthWrite, "depth attachment");
            self.attachment_write(depth.image.image, "depth attachment");
        }
        self.push(Command::BeginRendering(*pass));
    }

    fn end_rendering(&self) {
        if !self.rendering.replace(false) {
            self.fault("end rendering outside of rendering".to_owned());
        }
        self.push(Command::EndRendering);
    }

    fn set_viewport_and_scissor(&self, extent: vk::Extent2D) {
        self.push(Command::Viewport(extent));
    }

    fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, _pipeline: vk::Pipeline) {
        self.push(Command::BindPipeline(bind_point));
    }

    fn bind_descriptor_sets(
        &self,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        _first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.push(Command::BindDescriptorSets(sets.len()));
    }

    fn push_constants(&self, _layout: vk::PipelineLayout, _stages: vk::ShaderStageFlags, bytes: &[u8]) {
        self.push(Command::PushConstants(bytes.to_vec()));
    }

    fn bind_vertex_buffer(&self, buffer: vk::Buffer) {
        self.vertex_buffer.set(Some(buffer));
    }

    fn bind_index_buffer(&self, buffer: vk::Buffer) {
        self.index_buffer.set(Some(buffer));
    }

    fn draw(&self, vertex_count: u32) {
        if !self.rendering.get() {
            self.fault("draw outside of rendering".to_owned());
        }
        self.push(Command::Draw(vertex_count));
    }

    fn draw_indexed(&self, index_count: u32) {
        if !self.rendering.get() {
            self.fault("indexed draw outside of rendering".to_owned());
        }
        match (self.vertex_buffer.get(), self.index_buffer.get()) {
            (Some(vertices), Some(indices)) => {
                self.expect_buffer(vertices, ResourceState::VertexBuffer, "draw vertices");
                self.expect_buffer(indices, ResourceState::IndexBuffer, "draw indices");
            }
            _ => self.fault("indexed draw without bound buffers".to_owned()),
        }
        self.push(Command::DrawIndexed(index_count));
    }

    fn trace_rays(&self, _regions: &ShaderTableRegions, extent: vk::Extent2D) {
        if self.rendering.get() {
            self.fault("trace rays inside rendering".to_owned());
        }
        if !self.built.borrow().contains(&AccelerationStructureLevel::Top) {
            self.fault("trace rays without a top level acceleration structure".to_owned());
        }
        for image in self.storage_outputs.borrow().iter() {
            self.expect_image(*image, ResourceState::UnorderedAccess, "dispatch output");
        }
        self.push(Command::TraceRays(extent));
    }
}
