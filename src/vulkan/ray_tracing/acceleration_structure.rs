use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use log::debug;

use crate::error::RenderError;
use crate::vulkan::utils::compute_aligned_size;
use crate::vulkan::{
    record_buffer_transitions, CommandRecorder, Context, DeviceLocalBuffer, FrameRingBuffer,
    RayTracingContext, ResourceState, Tracked, ViewKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelerationStructureLevel {
    Bottom,
    Top,
}

impl AccelerationStructureLevel {
    pub fn ty(&self) -> vk::AccelerationStructureTypeKHR {
        match self {
            AccelerationStructureLevel::Bottom => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            AccelerationStructureLevel::Top => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        }
    }
}

/// One opaque indexed triangle mesh: `R32G32B32_SFLOAT` positions, `u32` indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleGeometry {
    pub vertex_buffer: vk::Buffer,
    pub vertex_address: vk::DeviceAddress,
    pub vertex_stride: vk::DeviceSize,
    pub vertex_count: u32,
    pub index_buffer: vk::Buffer,
    pub index_address: vk::DeviceAddress,
    pub index_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildGeometry {
    Triangles(Vec<TriangleGeometry>),
    Instances {
        buffer: vk::Buffer,
        address: vk::DeviceAddress,
        count: u32,
    },
}

impl BuildGeometry {
    pub fn primitive_counts(&self) -> Vec<u32> {
        match self {
            BuildGeometry::Triangles(triangles) => {
                triangles.iter().map(|t| t.index_count / 3).collect()
            }
            BuildGeometry::Instances { count, .. } => vec![*count],
        }
    }

    pub fn to_vk(
        &self,
    ) -> (
        Vec<vk::AccelerationStructureGeometryKHR<'static>>,
        Vec<vk::AccelerationStructureBuildRangeInfoKHR>,
    ) {
        let geometries = match self {
            BuildGeometry::Triangles(triangles) => triangles
                .iter()
                .map(|t| {
                    let data = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                        .vertex_format(vk::Format::R32G32B32_SFLOAT)
                        .vertex_data(vk::DeviceOrHostAddressConstKHR {
                            device_address: t.vertex_address,
                        })
                        .vertex_stride(t.vertex_stride)
                        .max_vertex(t.vertex_count.saturating_sub(1))
                        .index_type(vk::IndexType::UINT32)
                        .index_data(vk::DeviceOrHostAddressConstKHR {
                            device_address: t.index_address,
                        });

                    vk::AccelerationStructureGeometryKHR::default()
                        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles: data })
                        .flags(vk::GeometryFlagsKHR::OPAQUE)
                })
                .collect(),
            BuildGeometry::Instances { address, .. } => {
                let data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: *address,
                    });

                vec![vk::AccelerationStructureGeometryKHR::default()
                    .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                    .geometry(vk::AccelerationStructureGeometryDataKHR { instances: data })]
            }
        };

        let ranges = self
            .primitive_counts()
            .into_iter()
            .map(|primitive_count| vk::AccelerationStructureBuildRangeInfoKHR {
                primitive_count,
                primitive_offset: 0,
                first_vertex: 0,
                transform_offset: 0,
            })
            .collect();

        (geometries, ranges)
    }
}

/// Everything needed to record one acceleration structure build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccelerationStructureBuild {
    pub level: AccelerationStructureLevel,
    pub destination: vk::AccelerationStructureKHR,
    pub destination_buffer: vk::Buffer,
    pub destination_size: vk::DeviceSize,
    pub scratch_buffer: vk::Buffer,
    pub scratch_address: vk::DeviceAddress,
    pub geometry: BuildGeometry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildSizes {
    pub result_size: vk::DeviceSize,
    pub scratch_size: vk::DeviceSize,
}

/// Asks the device how much memory a build needs.
pub trait BuildSizeQuery {
    fn build_sizes(&self, level: AccelerationStructureLevel, geometry: &BuildGeometry) -> BuildSizes;
}

impl BuildSizeQuery for RayTracingContext {
    fn build_sizes(&self, level: AccelerationStructureLevel, geometry: &BuildGeometry) -> BuildSizes {
        let (geometries, _) = geometry.to_vk();
        let counts = geometry.primitive_counts();

        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(level.ty())
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);

        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            self.acceleration_structure_fn
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &counts,
                    &mut sizes,
                )
        };

        BuildSizes {
            result_size: sizes.acceleration_structure_size,
            scratch_size: sizes.build_scratch_size,
        }
    }
}

/// Queried sizes of both levels and the one scratch buffer they share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildPlan {
    pub bottom: BuildSizes,
    pub top: BuildSizes,
    pub scratch_size: vk::DeviceSize,
}

impl BuildPlan {
    pub fn new<Q: BuildSizeQuery + ?Sized>(
        query: &Q,
        bottom_geometry: &BuildGeometry,
        top_geometry: &BuildGeometry,
        scratch_alignment: u64,
    ) -> Result<Self, RenderError> {
        let bottom = query.build_sizes(AccelerationStructureLevel::Bottom, bottom_geometry);
        if bottom.result_size == 0 {
            return Err(RenderError::EmptyPrebuild {
                level: AccelerationStructureLevel::Bottom,
            });
        }

        let top = query.build_sizes(AccelerationStructureLevel::Top, top_geometry);
        if top.result_size == 0 {
            return Err(RenderError::EmptyPrebuild {
                level: AccelerationStructureLevel::Top,
            });
        }

        let scratch_size = compute_aligned_size(
            bottom.scratch_size.max(top.scratch_size),
            scratch_alignment.max(1),
        );

        debug!("Acceleration structure sizes: bottom {bottom:?}, top {top:?}, scratch {scratch_size}");

        Ok(Self {
            bottom,
            top,
            scratch_size,
        })
    }

    pub fn sizes(&self, level: AccelerationStructureLevel) -> BuildSizes {
        match level {
            AccelerationStructureLevel::Bottom => self.bottom,
            AccelerationStructureLevel::Top => self.top,
        }
    }

    pub fn validate(&self, build: &AccelerationStructureBuild) -> Result<(), RenderError> {
        let required = self.sizes(build.level).result_size;
        if build.destination_size < required {
            return Err(RenderError::UndersizedAccelerationStructure {
                level: build.level,
                required,
                available: build.destination_size,
            });
        }

        Ok(())
    }
}

/// Per instance entry of a top level build, laid out like `VkAccelerationStructureInstanceKHR`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceDescriptor {
    /// Row major 3x4 object to world transform.
    pub transform: [f32; 12],
    pub custom_index_and_mask: u32,
    pub hit_group_offset_and_flags: u32,
    pub blas_address: u64,
}

impl InstanceDescriptor {
    pub fn new(transform: Mat4, mask: u8, blas_address: vk::DeviceAddress) -> Self {
        let rows = transform.transpose().to_cols_array();
        let mut row_major = [0.0; 12];
        row_major.copy_from_slice(&rows[..12]);

        Self {
            transform: row_major,
            custom_index_and_mask: (mask as u32) << 24,
            hit_group_offset_and_flags: 0,
            blas_address,
        }
    }

    pub fn from_translation(translation: Vec3, mask: u8, blas_address: vk::DeviceAddress) -> Self {
        Self::new(Mat4::from_translation(translation), mask, blas_address)
    }

    pub fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }

    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.transform[3], self.transform[7], self.transform[11])
    }
}

/// Mesh buffers feeding a bottom level build, in their rasterization states.
pub struct MeshBuildInput<'a> {
    pub geometry: TriangleGeometry,
    pub vertices: &'a mut Tracked<vk::Buffer>,
    pub indices: &'a mut Tracked<vk::Buffer>,
}

/// Records the bottom level build, the barrier ordering it before the top
/// level build, and the top level build itself.
///
/// Mesh buffers must be in `VertexBuffer` / `IndexBuffer`. They are moved to
/// `NonPixelShaderResource` for the builds and returned afterwards. Every
/// state is checked before anything is recorded or any tracked state changes.
pub fn record_builds<R: CommandRecorder + ?Sized>(
    recorder: &R,
    plan: &BuildPlan,
    meshes: &mut [MeshBuildInput<'_>],
    scratch: &Tracked<vk::Buffer>,
    bottom: &AccelerationStructureBuild,
    bottom_storage: &Tracked<vk::Buffer>,
    top: &AccelerationStructureBuild,
) -> Result<(), RenderError> {
    plan.validate(bottom)?;
    plan.validate(top)?;
    bottom_storage.expect(ResourceState::AccelerationStructure)?;
    scratch.expect(ResourceState::UnorderedAccess)?;
    for mesh in meshes.iter() {
        mesh.vertices.expect(ResourceState::VertexBuffer)?;
        mesh.indices.expect(ResourceState::IndexBuffer)?;
    }

    let mut to_build_input = vec![];
    for mesh in meshes.iter_mut() {
        to_build_input.push(mesh.vertices.transition(ResourceState::NonPixelShaderResource)?);
        to_build_input.push(mesh.indices.transition(ResourceState::NonPixelShaderResource)?);
    }
    record_buffer_transitions(recorder, to_build_input);

    recorder.build_acceleration_structure(bottom);

    // The top level build reads the bottom level result and reuses the scratch memory.
    recorder.buffer_barriers(&[bottom_storage.write_barrier()?, scratch.write_barrier()?]);

    recorder.build_acceleration_structure(top);

    let mut to_raster = vec![];
    for mesh in meshes.iter_mut() {
        to_raster.push(mesh.vertices.transition(ResourceState::VertexBuffer)?);
        to_raster.push(mesh.indices.transition(ResourceState::IndexBuffer)?);
    }
    record_buffer_transitions(recorder, to_raster);

    Ok(())
}

pub struct AccelerationStructure {
    ray_tracing: Arc<RayTracingContext>,
    pub level: AccelerationStructureLevel,
    pub inner: vk::AccelerationStructureKHR,
    pub buffer: DeviceLocalBuffer,
    pub address: vk::DeviceAddress,
}

impl AccelerationStructure {
    pub(crate) fn new(
        context: &Context,
        level: AccelerationStructureLevel,
        size: vk::DeviceSize,
    ) -> Result<Self> {
        let name = match level {
            AccelerationStructureLevel::Bottom => "bottom level acceleration structure",
            AccelerationStructureLevel::Top => "top level acceleration structure",
        };
        let buffer = DeviceLocalBuffer::acceleration_structure(context, name, size)?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(buffer.handle())
            .size(size)
            .ty(level.ty());

        let inner = unsafe {
            context
                .ray_tracing
                .acceleration_structure_fn
                .create_acceleration_structure(&create_info, None)
        }
        .map_err(|result| RenderError::AccelerationStructureCreation { level, result })?;

        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(inner);
        let address = unsafe {
            context
                .ray_tracing
                .acceleration_structure_fn
                .get_acceleration_structure_device_address(&address_info)
        };

        Ok(Self {
            ray_tracing: context.ray_tracing.clone(),
            level,
            inner,
            buffer,
            address,
        })
    }

    pub(crate) fn build_description(
        &self,
        scratch: &DeviceLocalBuffer,
        geometry: BuildGeometry,
    ) -> AccelerationStructureBuild {
        AccelerationStructureBuild {
            level: self.level,
            destination: self.inner,
            destination_buffer: self.buffer.handle(),
            destination_size: self.buffer.size(),
            scratch_buffer: scratch.handle(),
            scratch_address: scratch.gpu_address(),
            geometry,
        }
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.ray_tracing
                .acceleration_structure_fn
                .destroy_acceleration_structure(self.inner, None);
        }
    }
}

/// The scene's bottom and top level structures plus the memory they were built with.
pub struct AccelerationStructures {
    pub top: AccelerationStructure,
    pub bottom: AccelerationStructure,
    pub instances: FrameRingBuffer,
    pub scratch: DeviceLocalBuffer,
    pub plan: BuildPlan,
}

impl AccelerationStructures {
    /// Sizes, allocates and records the builds of both levels for `meshes`.
    pub fn build<R: CommandRecorder + ?Sized>(
        context: &Context,
        recorder: &R,
        meshes: &mut [MeshBuildInput<'_>],
        instance_transform: Mat4,
    ) -> Result<Self> {
        let bottom_geometry =
            BuildGeometry::Triangles(meshes.iter().map(|m| m.geometry).collect());
        let sizing_top_geometry = BuildGeometry::Instances {
            buffer: vk::Buffer::null(),
            address: 0,
            count: 1,
        };

        let scratch_alignment = context
            .ray_tracing
            .acceleration_structure_properties
            .min_acceleration_structure_scratch_offset_alignment as u64;
        let plan = BuildPlan::new(
            context.ray_tracing.as_ref(),
            &bottom_geometry,
            &sizing_top_geometry,
            scratch_alignment,
        )?;

        let scratch = DeviceLocalBuffer::write_target(
            context,
            "acceleration structure scratch",
            plan.scratch_size,
        )?;
        let bottom =
            AccelerationStructure::new(context, AccelerationStructureLevel::Bottom, plan.bottom.result_size)?;

        let instance = InstanceDescriptor::new(instance_transform, 0xFF, bottom.address);
        let mut instances = FrameRingBuffer::new(
            context,
            "acceleration structure instances",
            size_of::<InstanceDescriptor>() as u64,
            1,
            ViewKind::Structured,
        );
        if !instances.is_valid() {
            return Err(RenderError::Allocation {
                name: instances.name().to_owned(),
                size: size_of::<InstanceDescriptor>() as u64,
            }
            .into());
        }
        instances.write_pod(0, &instance);

        let top =
            AccelerationStructure::new(context, AccelerationStructureLevel::Top, plan.top.result_size)?;

        let bottom_build = bottom.build_description(&scratch, bottom_geometry);
        let top_build = top.build_description(
            &scratch,
            BuildGeometry::Instances {
                buffer: instances.handle(),
                address: instances.gpu_address(0),
                count: 1,
            },
        );

        record_builds(
            recorder,
            &plan,
            meshes,
            scratch.tracked(),
            &bottom_build,
            bottom.buffer.tracked(),
            &top_build,
        )?;

        Ok(Self {
            top,
            bottom,
            instances,
            scratch,
            plan,
        })
    }

    /// Replaces both levels with structures built from `meshes`.
    ///
    /// The previous structures are dropped right away, so the GPU must be idle.
    pub fn rebuild<R: CommandRecorder + ?Sized>(
        &mut self,
        context: &Context,
        recorder: &R,
        meshes: &mut [MeshBuildInput<'_>],
        instance_transform: Mat4,
    ) -> Result<()> {
        *self = Self::build(context, recorder, meshes, instance_transform)?;

        Ok(())
    }

    pub fn top_level(&self) -> vk::AccelerationStructureKHR {
        self.top.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_descriptor_matches_the_vulkan_layout() {
        assert_eq!(
            size_of::<InstanceDescriptor>(),
            size_of::<vk::AccelerationStructureInstanceKHR>()
        );
    }

    #[test]
    fn instance_descriptor_stores_translation_in_the_last_column() {
        let instance = InstanceDescriptor::from_translation(Vec3::new(0.0, 0.0, 3.0), 0xFF, 42);

        assert_eq!(instance.translation(), Vec3::new(0.0, 0.0, 3.0));
        assert_eq!(instance.mask(), 0xFF);
        assert_eq!(instance.transform[0], 1.0);
        assert_eq!(instance.transform[5], 1.0);
        assert_eq!(instance.transform[10], 1.0);
        assert_eq!(instance.blas_address, 42);
    }

    #[test]
    fn triangle_primitive_count_is_a_third_of_the_indices() {
        let geometry = BuildGeometry::Triangles(vec![TriangleGeometry {
            vertex_buffer: vk::Buffer::null(),
            vertex_address: 0,
            vertex_stride: 12,
            vertex_count: 4,
            index_buffer: vk::Buffer::null(),
            index_address: 0,
            index_count: 6,
        }]);

        assert_eq!(geometry.primitive_counts(), vec![2]);
        assert_eq!(geometry.to_vk().1[0].primitive_count, 2);
    }
}
