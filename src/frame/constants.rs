use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

pub const MAX_LIGHTS: usize = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    pub const fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraConstants {
    pub view_projection: Mat4,
    pub position: Vec4,
}

/// What the ray generation shader needs to turn pixels back into world space rays.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RaytraceConstants {
    pub inverse_view_projection: Mat4,
    pub camera_position: Vec4,
}

impl RaytraceConstants {
    pub fn new(view_projection: Mat4, camera_position: Vec3) -> Self {
        Self {
            inverse_view_projection: view_projection.inverse(),
            camera_position: camera_position.extend(1.0),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectConstants {
    pub to_world: Mat4,
}

/// Untextured PBR parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Material {
    pub albedo: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub ao: f32,
    pub _pad: f32,
}

impl Material {
    pub fn new(albedo: Vec4, metallic: f32, roughness: f32, ao: f32) -> Self {
        Self {
            albedo,
            metallic,
            roughness,
            ao,
            _pad: 0.0,
        }
    }

    pub fn floor() -> Self {
        Self::new(Vec4::new(0.8, 0.8, 0.8, 1.0), 0.0, 1.0, 1.0)
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::new(Vec4::ONE, 0.0, 0.5, 1.0)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Light {
    pub color: Vec4,
    pub position: Vec4,
}

impl Light {
    pub fn new(color: Vec3, position: Vec3) -> Self {
        Self {
            color: color.extend(1.0),
            position: position.extend(1.0),
        }
    }
}

impl Default for Light {
    fn default() -> Self {
        Self::new(Vec3::splat(300.0), Vec3::new(0.0, 5.707_106_8, 0.0))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightConstants {
    pub lights: [Light; MAX_LIGHTS],
    pub count: u32,
    pub _pad: [u32; 3],
}

impl LightConstants {
    /// Lights past [`MAX_LIGHTS`] are dropped.
    pub fn new(lights: &[Light]) -> Self {
        let mut constants = Self::zeroed();
        let count = lights.len().min(MAX_LIGHTS);
        constants.lights[..count].copy_from_slice(&lights[..count]);
        constants.count = count as u32;

        constants
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub camera: u64,
    pub object: u64,
    pub material: u64,
    pub lights: u64,
    pub shadow_index: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RaytracePushConstants {
    pub constants: u64,
    pub shadow_index: u32,
    pub depth_index: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TonemapPushConstants {
    pub hdr_index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raytrace_constants_invert_the_view_projection() {
        let view_projection = Mat4::perspective_rh(1.0472, 16.0 / 9.0, 0.001, 1000.0)
            * Mat4::look_at_rh(Vec3::new(0.0, 1.0, -2.0), Vec3::ZERO, Vec3::Y);
        let constants = RaytraceConstants::new(view_projection, Vec3::new(0.0, 1.0, -2.0));

        let identity = constants.inverse_view_projection * view_projection;
        assert!(identity.abs_diff_eq(Mat4::IDENTITY, 1e-3));
        assert_eq!(constants.camera_position.w, 1.0);
    }

    #[test]
    fn extra_lights_are_dropped() {
        let lights = [Light::default(); MAX_LIGHTS + 2];
        assert_eq!(LightConstants::new(&lights).count, MAX_LIGHTS as u32);
    }

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 32);
    }
}
