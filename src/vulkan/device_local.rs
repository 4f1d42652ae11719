use anyhow::Result;
use ash::vk;
use gpu_allocator::MemoryLocation;
use log::trace;

use crate::error::RenderError;
use crate::vulkan::{
    record_buffer_transitions, Buffer, CommandRecorder, Context, ResourceState, Tracked, Transition,
};

const WRITE_TARGET_ALIGNMENT: u64 = 256;

/// What a device local buffer was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLocalKind {
    WriteTarget,
    Seeded,
    Staging,
    AccelerationStructure,
}

impl DeviceLocalKind {
    /// The state a freshly created buffer of this kind is in.
    pub fn initial_state(&self) -> ResourceState {
        match self {
            DeviceLocalKind::WriteTarget | DeviceLocalKind::Staging => {
                ResourceState::UnorderedAccess
            }
            DeviceLocalKind::Seeded => ResourceState::CopyDestination,
            DeviceLocalKind::AccelerationStructure => ResourceState::AccelerationStructure,
        }
    }

    pub fn memory_location(&self) -> MemoryLocation {
        match self {
            DeviceLocalKind::Staging => MemoryLocation::GpuToCpu,
            _ => MemoryLocation::GpuOnly,
        }
    }

    pub fn is_host_readable(&self) -> bool {
        *self == DeviceLocalKind::Staging
    }
}

/// GPU resident memory together with the state it was last left in.
pub struct DeviceLocalBuffer {
    buffer: Buffer,
    tracked: Tracked<vk::Buffer>,
    address: vk::DeviceAddress,
    kind: DeviceLocalKind,
}

/// The upload heap copy of a seeded buffer's contents.
///
/// Must stay alive until the submission that copies out of it has finished,
/// see [`crate::deferred::DeferredReleaseQueue`].
pub struct PendingUpload {
    buffer: Buffer,
}

impl PendingUpload {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size
    }
}

impl DeviceLocalBuffer {
    fn new(
        context: &Context,
        name: &str,
        size: vk::DeviceSize,
        kind: DeviceLocalKind,
    ) -> Result<Self> {
        let (usage, alignment) = match kind {
            DeviceLocalKind::WriteTarget => (general_usage(), scratch_alignment(context)),
            DeviceLocalKind::Seeded | DeviceLocalKind::Staging => {
                (general_usage(), WRITE_TARGET_ALIGNMENT)
            }
            DeviceLocalKind::AccelerationStructure => (
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
                WRITE_TARGET_ALIGNMENT,
            ),
        };
        let location = kind.memory_location();
        let state = kind.initial_state();

        let buffer = context.create_aligned_buffer(name, usage, location, size, alignment)?;
        let address = buffer.get_device_address();
        let tracked = Tracked::new(name, buffer.handle(), state);

        trace!("Device local buffer {name}: {kind:?} in {state:?}");

        Ok(Self {
            buffer,
            tracked,
            address,
            kind,
        })
    }

    /// GPU writable buffer, starts in `UnorderedAccess`.
    pub fn write_target(context: &Context, name: &str, size: vk::DeviceSize) -> Result<Self> {
        Self::new(context, name, size, DeviceLocalKind::WriteTarget)
    }

    /// Buffer initialized from `data` through an upload heap copy recorded into `recorder`.
    ///
    /// Ends in `UnorderedAccess`. The returned upload must outlive the submission.
    pub fn seeded<R: CommandRecorder + ?Sized>(
        context: &Context,
        recorder: &R,
        name: &str,
        data: &[u8],
    ) -> Result<(Self, PendingUpload)> {
        let size = data.len() as vk::DeviceSize;

        let mut upload = context.create_buffer(
            &format!("{name} upload"),
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            size,
        )?;
        upload.copy_data_to_buffer(data)?;

        let mut buffer = Self::new(context, name, size, DeviceLocalKind::Seeded)?;
        record_seed_copy(recorder, upload.handle(), &mut buffer.tracked, size)?;

        Ok((buffer, PendingUpload { buffer: upload }))
    }

    /// Unordered access buffer that stays mapped so the CPU can read results back.
    pub fn staging(context: &Context, name: &str, size: vk::DeviceSize) -> Result<Self> {
        Self::new(context, name, size, DeviceLocalKind::Staging)
    }

    /// Storage for an acceleration structure. Never leaves the `AccelerationStructure` state.
    pub fn acceleration_structure(
        context: &Context,
        name: &str,
        size: vk::DeviceSize,
    ) -> Result<Self> {
        Self::new(context, name, size, DeviceLocalKind::AccelerationStructure)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    pub fn gpu_address(&self) -> vk::DeviceAddress {
        self.address
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size
    }

    pub fn kind(&self) -> DeviceLocalKind {
        self.kind
    }

    pub fn state(&self) -> ResourceState {
        self.tracked.state()
    }

    pub fn tracked(&self) -> &Tracked<vk::Buffer> {
        &self.tracked
    }

    pub fn tracked_mut(&mut self) -> &mut Tracked<vk::Buffer> {
        &mut self.tracked
    }

    pub fn transition(
        &mut self,
        to: ResourceState,
    ) -> Result<Option<Transition<vk::Buffer>>, RenderError> {
        self.tracked.transition(to)
    }

    pub fn write_barrier(&self) -> Result<Transition<vk::Buffer>, RenderError> {
        self.tracked.write_barrier()
    }

    /// Records a copy of `source` into this staging buffer, ending in `HostRead`.
    ///
    /// `source` is returned to the state it was in.
    pub fn record_read_back<R: CommandRecorder + ?Sized>(
        &mut self,
        recorder: &R,
        source: &mut Tracked<vk::Buffer>,
    ) -> Result<()> {
        anyhow::ensure!(
            self.kind.is_host_readable(),
            "{} is a {:?} buffer, not a staging buffer",
            self.tracked.name(),
            self.kind
        );
        let size = self.size();
        record_read_back(recorder, source, &mut self.tracked, size)?;

        Ok(())
    }

    /// Mapped contents of a staging buffer after a finished read back, `None` otherwise.
    pub fn read_back(&self) -> Option<&[u8]> {
        if !self.kind.is_host_readable() || self.tracked.state() != ResourceState::HostRead {
            return None;
        }

        self.buffer.mapped_bytes()
    }
}

/// Copies `size` bytes of `source` into `staging` and makes them visible to the host.
///
/// Both states are checked before anything is recorded.
pub fn record_read_back<R: CommandRecorder + ?Sized>(
    recorder: &R,
    source: &mut Tracked<vk::Buffer>,
    staging: &mut Tracked<vk::Buffer>,
    size: vk::DeviceSize,
) -> Result<(), RenderError> {
    source.check_transition(ResourceState::CopySource)?;
    staging.check_transition(ResourceState::CopyDestination)?;
    let source_state = source.state();

    record_buffer_transitions(
        recorder,
        [
            source.transition(ResourceState::CopySource)?,
            staging.transition(ResourceState::CopyDestination)?,
        ],
    );
    recorder.copy_buffer(source.handle(), staging.handle(), size);
    record_buffer_transitions(
        recorder,
        [
            source.transition(source_state)?,
            staging.transition(ResourceState::HostRead)?,
        ],
    );

    Ok(())
}

/// Copies `size` bytes from `upload` into `target` and makes them visible to unordered access.
///
/// `target` must be in `CopyDestination`.
pub fn record_seed_copy<R: CommandRecorder + ?Sized>(
    recorder: &R,
    upload: vk::Buffer,
    target: &mut Tracked<vk::Buffer>,
    size: vk::DeviceSize,
) -> Result<(), RenderError> {
    target.expect(ResourceState::CopyDestination)?;

    recorder.copy_buffer(upload, target.handle(), size);
    record_buffer_transitions(recorder, [target.transition(ResourceState::UnorderedAccess)?]);

    Ok(())
}

fn general_usage() -> vk::BufferUsageFlags {
    vk::BufferUsageFlags::STORAGE_BUFFER
        | vk::BufferUsageFlags::TRANSFER_SRC
        | vk::BufferUsageFlags::TRANSFER_DST
        | vk::BufferUsageFlags::VERTEX_BUFFER
        | vk::BufferUsageFlags::INDEX_BUFFER
        | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
}

fn scratch_alignment(context: &Context) -> u64 {
    let alignment = context
        .ray_tracing
        .acceleration_structure_properties
        .min_acceleration_structure_scratch_offset_alignment as u64;

    alignment.max(WRITE_TARGET_ALIGNMENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_staging_buffers_are_read_by_the_host() {
        assert!(DeviceLocalKind::Staging.is_host_readable());
        assert_eq!(DeviceLocalKind::Staging.memory_location(), MemoryLocation::GpuToCpu);
        assert_eq!(DeviceLocalKind::Staging.initial_state(), ResourceState::UnorderedAccess);

        for kind in [
            DeviceLocalKind::WriteTarget,
            DeviceLocalKind::Seeded,
            DeviceLocalKind::AccelerationStructure,
        ] {
            assert!(!kind.is_host_readable());
            assert_eq!(kind.memory_location(), MemoryLocation::GpuOnly);
        }
    }

    #[test]
    fn seeded_buffers_start_as_copy_destinations() {
        assert_eq!(DeviceLocalKind::Seeded.initial_state(), ResourceState::CopyDestination);
        assert_eq!(
            DeviceLocalKind::AccelerationStructure.initial_state(),
            ResourceState::AccelerationStructure
        );
    }
}
