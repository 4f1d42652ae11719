use anyhow::Result;
use ash::vk;

use crate::error::RenderError;
use crate::vulkan::utils::compute_aligned_size;
use crate::vulkan::{
    Context, FrameRingBuffer, RayTracingPipeline, ViewKind, HIT_GROUP, MISS_GROUP, RAYGEN_GROUP,
};

/// Size rules for one shader record: the group identifier padded to the record alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderRecordLayout {
    pub identifier_size: u32,
    pub alignment: u32,
}

impl ShaderRecordLayout {
    pub fn new(identifier_size: u32, alignment: u32) -> Self {
        Self {
            identifier_size,
            alignment,
        }
    }

    pub fn record_size(&self) -> u64 {
        compute_aligned_size(self.identifier_size as u64, self.alignment as u64)
    }

    pub fn view_kind(&self) -> ViewKind {
        ViewKind::ShaderRecord {
            alignment: self.alignment as u64,
        }
    }
}

/// The three device address regions a dispatch reads its shader records from.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShaderTableRegions {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
}

impl ShaderTableRegions {
    /// One record per table. The raygen region's size has to equal its stride.
    pub fn new(
        layout: &ShaderRecordLayout,
        raygen_address: vk::DeviceAddress,
        miss_address: vk::DeviceAddress,
        hit_address: vk::DeviceAddress,
    ) -> Self {
        let record_size = layout.record_size();
        let region = |device_address| vk::StridedDeviceAddressRegionKHR {
            device_address,
            stride: record_size,
            size: record_size,
        };

        Self {
            raygen: region(raygen_address),
            miss: region(miss_address),
            hit: region(hit_address),
        }
    }
}

/// Raygen, miss and hit group tables, each a single slot ring buffer.
pub struct ShaderBindingTable {
    pub raygen: FrameRingBuffer,
    pub miss: FrameRingBuffer,
    pub hit: FrameRingBuffer,
    pub layout: ShaderRecordLayout,
    pub regions: ShaderTableRegions,
}

impl ShaderBindingTable {
    pub fn new(context: &Context, pipeline: &RayTracingPipeline) -> Result<Self> {
        let layout = context.ray_tracing.shader_record_layout();

        let raygen = create_table(context, "raygen shader table", &layout, pipeline, RAYGEN_GROUP)?;
        let miss = create_table(context, "miss shader table", &layout, pipeline, MISS_GROUP)?;
        let hit = create_table(context, "hit group shader table", &layout, pipeline, HIT_GROUP)?;

        let regions = ShaderTableRegions::new(
            &layout,
            raygen.gpu_address(0),
            miss.gpu_address(0),
            hit.gpu_address(0),
        );

        Ok(Self {
            raygen,
            miss,
            hit,
            layout,
            regions,
        })
    }
}

fn create_table(
    context: &Context,
    name: &str,
    layout: &ShaderRecordLayout,
    pipeline: &RayTracingPipeline,
    group: &str,
) -> Result<FrameRingBuffer> {
    let identifier = pipeline.shader_group_handle(group)?;

    let mut table = FrameRingBuffer::new(
        context,
        name,
        layout.identifier_size as u64,
        1,
        layout.view_kind(),
    );
    if !table.is_valid() {
        return Err(RenderError::Allocation {
            name: name.to_owned(),
            size: layout.record_size(),
        }
        .into());
    }
    table.write(0, identifier);

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::RingLayout;

    #[test]
    fn identifier_of_32_bytes_at_64_byte_alignment_takes_64_bytes() {
        assert_eq!(ShaderRecordLayout::new(32, 64).record_size(), 64);
    }

    #[test]
    fn record_size_matches_the_ring_slot() {
        let layout = ShaderRecordLayout::new(32, 64);
        let ring = RingLayout::new(32, 1, layout.view_kind());

        assert_eq!(ring.slot_size, layout.record_size());
    }

    #[test]
    fn regions_use_the_record_size_as_stride_and_size() {
        let layout = ShaderRecordLayout::new(32, 64);
        let regions = ShaderTableRegions::new(&layout, 0x1000, 0x2000, 0x3000);

        assert_eq!(regions.raygen.size, regions.raygen.stride);
        assert_eq!(regions.miss.stride, 64);
        assert_eq!(regions.hit.device_address, 0x3000);
    }
}
