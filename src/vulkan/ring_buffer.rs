use std::ops::Range;

use anyhow::ensure;
use ash::vk;
use gpu_allocator::MemoryLocation;
use log::{error, trace};

use crate::vulkan::utils::compute_aligned_size;
use crate::vulkan::{Buffer, Context};
use crate::PenumbraResult;

/// Slot alignment constant buffer views need.
pub const CONSTANT_VIEW_ALIGNMENT: u64 = 256;

/// Base alignment of any ring buffer allocation, enough for instance arrays.
const MIN_BASE_ALIGNMENT: u64 = 16;

/// How the shaders read a ring buffer, which decides the slot alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Constant,
    Structured,
    ShaderRecord { alignment: u64 },
}

impl ViewKind {
    pub fn slot_alignment(&self) -> Option<u64> {
        match self {
            ViewKind::Constant => Some(CONSTANT_VIEW_ALIGNMENT),
            ViewKind::Structured => None,
            ViewKind::ShaderRecord { alignment } => Some(*alignment),
        }
    }
}

/// Slot arithmetic of a ring buffer: `frames_count` slots of `slot_size` bytes,
/// each holding `element_size` meaningful bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    pub element_size: u64,
    pub slot_size: u64,
    pub frames_count: usize,
}

impl RingLayout {
    pub fn new(raw_element_size: u64, frames_count: usize, kind: ViewKind) -> Self {
        let slot_size = match kind.slot_alignment() {
            Some(alignment) => compute_aligned_size(raw_element_size, alignment),
            None => raw_element_size,
        };

        Self {
            element_size: raw_element_size,
            slot_size,
            frames_count,
        }
    }

    pub fn buffer_size(&self) -> u64 {
        self.slot_size * self.frames_count as u64
    }

    pub fn slot_offset(&self, frame_index: usize) -> u64 {
        assert!(
            frame_index < self.frames_count,
            "frame index {frame_index} out of range for {} slots",
            self.frames_count
        );
        self.slot_size * frame_index as u64
    }

    /// Byte range of the element in slot `frame_index`.
    pub fn slot_range(&self, frame_index: usize) -> Range<usize> {
        let start = self.slot_offset(frame_index) as usize;
        start..start + self.element_size as usize
    }

    /// Copies `data` into the slot, zero filling the rest of the element.
    pub fn write_into(&self, memory: &mut [u8], frame_index: usize, data: &[u8]) {
        assert!(
            data.len() as u64 <= self.element_size,
            "{} bytes do not fit a {} byte element",
            data.len(),
            self.element_size
        );

        let slot = &mut memory[self.slot_range(frame_index)];
        slot[..data.len()].copy_from_slice(data);
        slot[data.len()..].fill(0);
    }

    pub fn slot<'a>(&self, memory: &'a [u8], frame_index: usize) -> &'a [u8] {
        &memory[self.slot_range(frame_index)]
    }
}

/// CPU written, GPU read memory with one slot per frame in flight.
///
/// The allocation stays mapped for the lifetime of the object. When the
/// allocation fails the ring buffer is null: it logs the failure, reports
/// `is_valid() == false` and panics on any write.
pub struct FrameRingBuffer {
    buffer: Option<Buffer>,
    layout: RingLayout,
    base_address: vk::DeviceAddress,
    name: String,
}

impl FrameRingBuffer {
    pub fn new(
        context: &Context,
        name: &str,
        raw_element_size: u64,
        frames_count: usize,
        kind: ViewKind,
    ) -> Self {
        let layout = RingLayout::new(raw_element_size, frames_count, kind);
        let alignment = kind
            .slot_alignment()
            .unwrap_or(MIN_BASE_ALIGNMENT)
            .max(MIN_BASE_ALIGNMENT);

        let buffer = context.create_aligned_buffer(
            name,
            vk::BufferUsageFlags::UNIFORM_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            MemoryLocation::CpuToGpu,
            layout.buffer_size(),
            alignment,
        );

        let buffer = match buffer {
            Ok(buffer) if buffer.mapped_bytes().is_some() => Some(buffer),
            Ok(_) => {
                error!("Ring buffer {name} is not host visible");
                None
            }
            Err(err) => {
                error!("Failed to create ring buffer {name}: {err:#}");
                None
            }
        };

        let base_address = buffer.as_ref().map_or(0, Buffer::get_device_address);

        trace!(
            "Ring buffer {name}: {frames_count} slots of {} bytes ({raw_element_size} used)",
            layout.slot_size
        );

        Self {
            buffer,
            layout,
            base_address,
            name: name.to_owned(),
        }
    }

    /// What a failed allocation leaves behind.
    #[cfg(test)]
    pub(crate) fn null(name: &str, raw_element_size: u64, frames_count: usize, kind: ViewKind) -> Self {
        Self {
            buffer: None,
            layout: RingLayout::new(raw_element_size, frames_count, kind),
            base_address: 0,
            name: name.to_owned(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.buffer.is_some()
    }

    /// For callers that cannot run on a null ring buffer.
    pub fn ensure_valid(self) -> PenumbraResult<Self> {
        ensure!(self.is_valid(), "Failed to allocate ring buffer {}", self.name);

        Ok(self)
    }

    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer.as_ref().map_or(vk::Buffer::null(), Buffer::handle)
    }

    pub fn write(&mut self, frame_index: usize, data: &[u8]) {
        let layout = self.layout;
        let memory = self
            .buffer
            .as_mut()
            .and_then(Buffer::mapped_bytes_mut);
        let Some(memory) = memory else {
            panic!("write to null ring buffer {}", self.name);
        };

        layout.write_into(memory, frame_index, data);
    }

    pub fn write_pod<T: bytemuck::Pod>(&mut self, frame_index: usize, value: &T) {
        self.write(frame_index, bytemuck::bytes_of(value));
    }

    pub fn write_pod_slice<T: bytemuck::Pod>(&mut self, frame_index: usize, values: &[T]) {
        self.write(frame_index, bytemuck::cast_slice(values));
    }

    /// The element currently stored in slot `frame_index`.
    pub fn read(&self, frame_index: usize) -> &[u8] {
        let Some(memory) = self.buffer.as_ref().and_then(Buffer::mapped_bytes) else {
            panic!("read from null ring buffer {}", self.name);
        };

        self.layout.slot(memory, frame_index)
    }

    pub fn gpu_address(&self, frame_index: usize) -> vk::DeviceAddress {
        self.base_address + self.layout.slot_offset(frame_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_slots_are_multiples_of_256_and_hold_the_element() {
        for raw in [1, 64, 255, 256, 257, 1000] {
            let layout = RingLayout::new(raw, 3, ViewKind::Constant);
            assert_eq!(layout.slot_size % 256, 0);
            assert!(layout.slot_size >= raw);
            assert!(layout.slot_size < raw + 256);
        }
    }

    #[test]
    fn structured_slots_are_exactly_the_element_size() {
        let layout = RingLayout::new(76, 2, ViewKind::Structured);
        assert_eq!(layout.slot_size, 76);
        assert_eq!(layout.buffer_size(), 152);
    }

    #[test]
    fn shader_record_slots_use_the_record_alignment() {
        let layout = RingLayout::new(32, 1, ViewKind::ShaderRecord { alignment: 64 });
        assert_eq!(layout.slot_size, 64);
    }

    #[test]
    fn written_slot_reads_back_and_leaves_other_slots_alone() {
        let layout = RingLayout::new(12, 3, ViewKind::Constant);
        let mut memory = vec![0xAA; layout.buffer_size() as usize];

        layout.write_into(&mut memory, 1, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);

        assert_eq!(layout.slot(&memory, 1), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert!(layout.slot(&memory, 0).iter().all(|b| *b == 0xAA));
        assert!(layout.slot(&memory, 2).iter().all(|b| *b == 0xAA));
    }

    #[test]
    fn slots_do_not_overlap() {
        let layout = RingLayout::new(300, 4, ViewKind::Constant);
        for frame in 1..4 {
            assert!(layout.slot_range(frame - 1).end as u64 <= layout.slot_offset(frame));
        }
        assert!(layout.slot_range(3).end as u64 <= layout.buffer_size());
    }

    #[test]
    fn short_writes_are_zero_padded() {
        let layout = RingLayout::new(4, 1, ViewKind::Structured);
        let mut memory = vec![0xFF; 4];

        layout.write_into(&mut memory, 0, &[7]);

        assert_eq!(memory, [7, 0, 0, 0]);
    }

    #[test]
    fn null_ring_buffer_is_reported_as_an_error() {
        let ring = FrameRingBuffer::null("camera", 128, 2, ViewKind::Constant);

        assert!(!ring.is_valid());
        let err = ring.ensure_valid().err().unwrap();
        assert!(err.to_string().contains("camera"));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn frame_index_past_the_last_slot_panics() {
        let layout = RingLayout::new(16, 2, ViewKind::Constant);
        layout.slot_offset(2);
    }

    #[test]
    #[should_panic(expected = "do not fit")]
    fn oversized_write_panics() {
        let layout = RingLayout::new(4, 1, ViewKind::Structured);
        let mut memory = vec![0; 4];
        layout.write_into(&mut memory, 0, &[0; 5]);
    }
}
