use ash::vk;

use crate::error::RenderError;

/// Hardware access state of a buffer or image.
///
/// Every resource the renderer owns carries one of these next to its handle.
/// The state decides which pipeline stages may touch the memory, with which
/// access, and (for images) in which layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Undefined,
    CopySource,
    CopyDestination,
    UnorderedAccess,
    PixelShaderResource,
    NonPixelShaderResource,
    AccelerationStructure,
    VertexBuffer,
    IndexBuffer,
    RenderTarget,
    DepthWrite,
    Present,
    HostRead,
}

impl ResourceState {
    pub fn stage_mask(&self) -> vk::PipelineStageFlags2 {
        match self {
            ResourceState::Undefined => vk::PipelineStageFlags2::NONE,
            ResourceState::CopySource | ResourceState::CopyDestination => {
                vk::PipelineStageFlags2::COPY
            }
            ResourceState::UnorderedAccess => {
                vk::PipelineStageFlags2::COMPUTE_SHADER
                    | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR
                    | vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
            }
            ResourceState::PixelShaderResource => vk::PipelineStageFlags2::FRAGMENT_SHADER,
            ResourceState::NonPixelShaderResource => {
                vk::PipelineStageFlags2::VERTEX_SHADER
                    | vk::PipelineStageFlags2::COMPUTE_SHADER
                    | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR
                    | vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
            }
            ResourceState::AccelerationStructure => {
                vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
                    | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR
            }
            ResourceState::VertexBuffer => vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
            ResourceState::IndexBuffer => vk::PipelineStageFlags2::INDEX_INPUT,
            ResourceState::RenderTarget => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            ResourceState::DepthWrite => {
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
            }
            // Chains with the acquire semaphore wait stage.
            ResourceState::Present => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            ResourceState::HostRead => vk::PipelineStageFlags2::HOST,
        }
    }

    pub fn access_mask(&self) -> vk::AccessFlags2 {
        match self {
            ResourceState::Undefined | ResourceState::Present => vk::AccessFlags2::NONE,
            ResourceState::CopySource => vk::AccessFlags2::TRANSFER_READ,
            ResourceState::CopyDestination => vk::AccessFlags2::TRANSFER_WRITE,
            // Build scratch lives in this state too.
            ResourceState::UnorderedAccess => {
                vk::AccessFlags2::SHADER_STORAGE_READ
                    | vk::AccessFlags2::SHADER_STORAGE_WRITE
                    | vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                    | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR
            }
            ResourceState::PixelShaderResource | ResourceState::NonPixelShaderResource => {
                vk::AccessFlags2::SHADER_READ
            }
            ResourceState::AccelerationStructure => {
                vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                    | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR
            }
            ResourceState::VertexBuffer => vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
            ResourceState::IndexBuffer => vk::AccessFlags2::INDEX_READ,
            ResourceState::RenderTarget => {
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
            }
            ResourceState::DepthWrite => {
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            ResourceState::HostRead => vk::AccessFlags2::HOST_READ,
        }
    }

    pub fn image_layout(&self) -> vk::ImageLayout {
        match self {
            ResourceState::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ResourceState::CopyDestination => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ResourceState::UnorderedAccess => vk::ImageLayout::GENERAL,
            ResourceState::PixelShaderResource | ResourceState::NonPixelShaderResource => {
                vk::ImageLayout::READ_ONLY_OPTIMAL
            }
            ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ResourceState::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
            ResourceState::Undefined
            | ResourceState::AccelerationStructure
            | ResourceState::VertexBuffer
            | ResourceState::IndexBuffer
            | ResourceState::HostRead => vk::ImageLayout::UNDEFINED,
        }
    }

    /// States in which the GPU may write the memory through shaders, builds
    /// or depth tests, so a barrier to the same state is still meaningful.
    pub fn is_write_ordered(&self) -> bool {
        matches!(
            self,
            ResourceState::UnorderedAccess
                | ResourceState::AccelerationStructure
                | ResourceState::DepthWrite
        )
    }

    pub fn is_shader_readable(&self) -> bool {
        matches!(
            self,
            ResourceState::PixelShaderResource | ResourceState::NonPixelShaderResource
        )
    }

    /// Acceleration structure memory is opaque: once a buffer holds one it
    /// never leaves that state, and nothing but creation enters it.
    fn allows(&self, to: ResourceState) -> bool {
        match (*self, to) {
            (ResourceState::AccelerationStructure, to) => to == ResourceState::AccelerationStructure,
            (ResourceState::Undefined, _) => true,
            (_, ResourceState::AccelerationStructure) => false,
            (_, ResourceState::Undefined) => false,
            _ => true,
        }
    }
}

/// A pending state change of one resource, ready to be recorded as a barrier.
///
/// `from == to` orders two unordered accesses in the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<H> {
    pub handle: H,
    pub from: ResourceState,
    pub to: ResourceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub aspect: vk::ImageAspectFlags,
}

/// A resource handle together with the state the owner last left it in.
#[derive(Debug, Clone)]
pub struct Tracked<H> {
    name: String,
    handle: H,
    state: ResourceState,
}

impl<H: Copy> Tracked<H> {
    pub fn new(name: impl Into<String>, handle: H, state: ResourceState) -> Self {
        Self {
            name: name.into(),
            handle,
            state,
        }
    }

    pub fn handle(&self) -> H {
        self.handle
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expect(&self, expected: ResourceState) -> Result<(), RenderError> {
        if self.state != expected {
            return Err(RenderError::StateMismatch {
                name: self.name.clone(),
                expected,
                actual: self.state,
            });
        }

        Ok(())
    }

    /// Fails exactly when [`Self::transition`] to `to` would.
    pub fn check_transition(&self, to: ResourceState) -> Result<(), RenderError> {
        if self.state != to && !self.state.allows(to) {
            return Err(RenderError::InvalidTransition {
                name: self.name.clone(),
                from: self.state,
                to,
            });
        }

        Ok(())
    }

    /// Moves the resource into `to`. Returns `None` when it is already there.
    pub fn transition(&mut self, to: ResourceState) -> Result<Option<Transition<H>>, RenderError> {
        self.check_transition(to)?;
        if self.state == to {
            return Ok(None);
        }

        let transition = Transition {
            handle: self.handle,
            from: self.state,
            to,
        };
        self.state = to;

        Ok(Some(transition))
    }

    /// Orders a previous GPU write against the next access in the same state.
    pub fn write_barrier(&self) -> Result<Transition<H>, RenderError> {
        if !self.state.is_write_ordered() {
            return Err(RenderError::InvalidTransition {
                name: self.name.clone(),
                from: self.state,
                to: self.state,
            });
        }

        Ok(Transition {
            handle: self.handle,
            from: self.state,
            to: self.state,
        })
    }
}

impl Transition<vk::Buffer> {
    pub fn to_vk(&self) -> vk::BufferMemoryBarrier2<'static> {
        vk::BufferMemoryBarrier2::default()
            .buffer(self.handle)
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .src_stage_mask(self.from.stage_mask())
            .src_access_mask(self.from.access_mask())
            .dst_stage_mask(self.to.stage_mask())
            .dst_access_mask(self.to.access_mask())
    }
}

impl Transition<ImageHandle> {
    pub fn to_vk(&self) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .image(self.handle.image)
            .old_layout(self.from.image_layout())
            .new_layout(self.to.image_layout())
            .src_stage_mask(self.from.stage_mask())
            .src_access_mask(self.from.access_mask())
            .dst_stage_mask(self.to.stage_mask())
            .dst_access_mask(self.to.access_mask())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.handle.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
    }
}
