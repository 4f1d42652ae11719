use anyhow::ensure;
use ash::vk;
use glam::{Mat4, Vec2, Vec3};
use log::{debug, trace};

use crate::frame::{Material, ObjectConstants, Vertex};
use crate::vulkan::{
    record_buffer_transitions, AccelerationStructures, CommandRecorder, Context,
    DeviceLocalBuffer, FrameRingBuffer, MeshBuildInput, PendingUpload, ResourceState,
    TriangleGeometry, ViewKind,
};
use crate::{PenumbraResult, RendererConfig};

/// Half extent of the ground plane.
const FLOOR_EXTENT: f32 = 100.0;

/// CPU side mesh as handed over by the model loader.
#[derive(Debug, Clone)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material: Material,
}

impl MeshData {
    /// The ground plane the shadows fall on.
    pub fn floor() -> Self {
        let corner = |x: f32, z: f32, u: f32, v: f32| {
            Vertex::new(Vec3::new(x, 0.0, z), Vec3::Y, Vec2::new(u, v))
        };

        Self {
            name: "floor".to_owned(),
            vertices: vec![
                corner(-FLOOR_EXTENT, -FLOOR_EXTENT, 0.0, 1.0),
                corner(-FLOOR_EXTENT, FLOOR_EXTENT, 0.0, 0.0),
                corner(FLOOR_EXTENT, FLOOR_EXTENT, 1.0, 0.0),
                corner(FLOOR_EXTENT, -FLOOR_EXTENT, 1.0, 1.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
            material: Material::floor(),
        }
    }
}

/// Everything the frame needs to issue one indexed draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshDraw {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub object_address: vk::DeviceAddress,
    pub material_address: vk::DeviceAddress,
}

pub struct GpuMesh {
    pub name: String,
    pub vertices: DeviceLocalBuffer,
    pub indices: DeviceLocalBuffer,
    pub vertex_count: u32,
    pub index_count: u32,
    pub material: FrameRingBuffer,
}

impl GpuMesh {
    /// Records the seeding copies and leaves the buffers in their rasterization states.
    pub fn upload<R: CommandRecorder + ?Sized>(
        context: &Context,
        recorder: &R,
        mesh: &MeshData,
        frames_count: usize,
    ) -> PenumbraResult<(Self, Vec<PendingUpload>)> {
        ensure!(
            !mesh.vertices.is_empty() && !mesh.indices.is_empty(),
            "Mesh {} has no geometry",
            mesh.name
        );

        let (mut vertices, vertex_upload) = DeviceLocalBuffer::seeded(
            context,
            recorder,
            &format!("{} vertices", mesh.name),
            bytemuck::cast_slice(&mesh.vertices),
        )?;
        let (mut indices, index_upload) = DeviceLocalBuffer::seeded(
            context,
            recorder,
            &format!("{} indices", mesh.name),
            bytemuck::cast_slice(&mesh.indices),
        )?;

        record_buffer_transitions(
            recorder,
            [
                vertices.transition(ResourceState::VertexBuffer)?,
                indices.transition(ResourceState::IndexBuffer)?,
            ],
        );

        let material = fill_slots(
            FrameRingBuffer::new(
                context,
                &format!("{} material", mesh.name),
                size_of::<Material>() as u64,
                frames_count,
                ViewKind::Constant,
            ),
            &mesh.material,
        )?;

        trace!(
            "Uploaded mesh {}: {} vertices, {} indices",
            mesh.name,
            mesh.vertices.len(),
            mesh.indices.len()
        );

        Ok((
            Self {
                name: mesh.name.clone(),
                vertices,
                indices,
                vertex_count: mesh.vertices.len() as u32,
                index_count: mesh.indices.len() as u32,
                material,
            },
            vec![vertex_upload, index_upload],
        ))
    }

    pub fn geometry(&self) -> TriangleGeometry {
        TriangleGeometry {
            vertex_buffer: self.vertices.handle(),
            vertex_address: self.vertices.gpu_address(),
            vertex_stride: size_of::<Vertex>() as vk::DeviceSize,
            vertex_count: self.vertex_count,
            index_buffer: self.indices.handle(),
            index_address: self.indices.gpu_address(),
            index_count: self.index_count,
        }
    }

    pub fn build_input(&mut self) -> MeshBuildInput<'_> {
        MeshBuildInput {
            geometry: self.geometry(),
            vertices: self.vertices.tracked_mut(),
            indices: self.indices.tracked_mut(),
        }
    }

    pub fn draw(&self, frame_index: usize, object_address: vk::DeviceAddress) -> MeshDraw {
        MeshDraw {
            vertex_buffer: self.vertices.handle(),
            index_buffer: self.indices.handle(),
            index_count: self.index_count,
            object_address,
            material_address: self.material.gpu_address(frame_index),
        }
    }
}

/// The scene's GPU resources: meshes, ground plane, transforms and acceleration structures.
///
/// Field order is drop order. The acceleration structures go first.
pub struct ShadowScene {
    pub acceleration_structures: AccelerationStructures,
    pub meshes: Vec<GpuMesh>,
    pub floor: GpuMesh,
    object_constants: FrameRingBuffer,
    floor_constants: FrameRingBuffer,
    instance_transform: Mat4,
    frames_count: usize,
}

impl ShadowScene {
    pub fn new<R: CommandRecorder + ?Sized>(
        context: &Context,
        config: &RendererConfig,
        meshes: &[MeshData],
        recorder: &R,
    ) -> PenumbraResult<(Self, Vec<PendingUpload>)> {
        let frames_count = config.frames_in_flight;
        let instance_transform = Mat4::from_translation(config.instance_translation);

        let mut pending = vec![];
        let mut gpu_meshes = upload_meshes(context, recorder, meshes, frames_count, &mut pending)?;
        let (floor, floor_uploads) =
            GpuMesh::upload(context, recorder, &MeshData::floor(), frames_count)?;
        pending.extend(floor_uploads);

        // The rasterized meshes sit where the top level instance puts them.
        let object_constants = constants_ring(context, "object constants", instance_transform)?;
        let floor_constants = constants_ring(context, "floor constants", Mat4::IDENTITY)?;

        let acceleration_structures = {
            let mut inputs = gpu_meshes.iter_mut().map(GpuMesh::build_input).collect::<Vec<_>>();
            AccelerationStructures::build(context, recorder, &mut inputs, instance_transform)?
        };

        debug!("Scene created with {} meshes", gpu_meshes.len());

        Ok((
            Self {
                acceleration_structures,
                meshes: gpu_meshes,
                floor,
                object_constants,
                floor_constants,
                instance_transform,
                frames_count,
            },
            pending,
        ))
    }

    /// Uploads `meshes` and rebuilds both acceleration structure levels from them.
    ///
    /// The GPU must be idle: the previous buffers are released immediately.
    pub fn replace_meshes<R: CommandRecorder + ?Sized>(
        &mut self,
        context: &Context,
        meshes: &[MeshData],
        recorder: &R,
    ) -> PenumbraResult<Vec<PendingUpload>> {
        let mut pending = vec![];
        let mut gpu_meshes =
            upload_meshes(context, recorder, meshes, self.frames_count, &mut pending)?;

        {
            let mut inputs = gpu_meshes.iter_mut().map(GpuMesh::build_input).collect::<Vec<_>>();
            self.acceleration_structures
                .rebuild(context, recorder, &mut inputs, self.instance_transform)?;
        }
        self.meshes = gpu_meshes;

        Ok(pending)
    }

    pub fn mesh_draws(&self, frame_index: usize) -> Vec<MeshDraw> {
        let object_address = self.object_constants.gpu_address(0);
        self.meshes
            .iter()
            .map(|mesh| mesh.draw(frame_index, object_address))
            .collect()
    }

    pub fn floor_draw(&self, frame_index: usize) -> MeshDraw {
        self.floor
            .draw(frame_index, self.floor_constants.gpu_address(0))
    }

    pub fn top_level(&self) -> vk::AccelerationStructureKHR {
        self.acceleration_structures.top_level()
    }
}

fn upload_meshes<R: CommandRecorder + ?Sized>(
    context: &Context,
    recorder: &R,
    meshes: &[MeshData],
    frames_count: usize,
    pending: &mut Vec<PendingUpload>,
) -> PenumbraResult<Vec<GpuMesh>> {
    meshes
        .iter()
        .map(|mesh| {
            let (gpu_mesh, uploads) = GpuMesh::upload(context, recorder, mesh, frames_count)?;
            pending.extend(uploads);
            Ok(gpu_mesh)
        })
        .collect()
}

fn constants_ring(
    context: &Context,
    name: &str,
    to_world: Mat4,
) -> PenumbraResult<FrameRingBuffer> {
    fill_slots(
        FrameRingBuffer::new(
            context,
            name,
            size_of::<ObjectConstants>() as u64,
            1,
            ViewKind::Constant,
        ),
        &ObjectConstants { to_world },
    )
}

/// Writes `value` into every slot of a freshly created ring buffer.
fn fill_slots<T: bytemuck::Pod>(
    ring: FrameRingBuffer,
    value: &T,
) -> PenumbraResult<FrameRingBuffer> {
    let mut ring = ring.ensure_valid()?;
    for frame in 0..ring.layout().frames_count {
        ring.write_pod(frame, value);
    }

    Ok(ring)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unallocated_material_ring_fails_the_upload() {
        let ring = FrameRingBuffer::null("floor material", 32, 2, ViewKind::Constant);

        assert!(fill_slots(ring, &Material::floor()).is_err());
    }

    #[test]
    fn floor_is_a_two_triangle_quad_facing_up() {
        let floor = MeshData::floor();

        assert_eq!(floor.indices, vec![0, 1, 2, 0, 2, 3]);
        assert!(floor.vertices.iter().all(|v| v.position.y == 0.0 && v.normal == Vec3::Y));
        assert!(floor
            .vertices
            .iter()
            .all(|v| v.position.x.abs() == FLOOR_EXTENT && v.position.z.abs() == FLOOR_EXTENT));
    }
}
