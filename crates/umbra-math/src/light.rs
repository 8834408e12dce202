// SPDX-License-Identifier: CEPL-1.0
use crate::cube::CubeFace;
use glam::{Mat3, Mat4, Vec3};

/// Projection and per-face views of a point light rendering into a cubemap.
#[derive(Clone, Debug, PartialEq)]
pub struct LightMatrices {
    position: Vec3,
    near: f32,
    far: f32,
    projection: Mat4,
    views: [Mat4; CubeFace::COUNT],
}

impl LightMatrices {
    pub fn new(position: Vec3, near: f32, far: f32) -> Self {
        // 90 degrees, square: each face covers exactly one sixth of the sphere.
        let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, near, far);
        let translate = Mat4::from_translation(-position);
        let views = CubeFace::ALL.map(|face| face_rotation(face) * translate);
        Self {
            position,
            near,
            far,
            projection,
            views,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self, face: CubeFace) -> Mat4 {
        self.views[face as usize]
    }

    /// `projection * view[face] * model`, the value pushed for one face draw.
    pub fn face_transform(&self, face: CubeFace, model: Mat4) -> Mat4 {
        self.projection * self.views[face as usize] * model
    }

    pub fn face_transforms(&self, model: Mat4) -> [Mat4; CubeFace::COUNT] {
        CubeFace::ALL.map(|face| self.face_transform(face, model))
    }
}

// Rows are the face's (s, t, -major) axes, taken through the x mirror that
// maps light-to-fragment directions onto cubemap coordinates. Every face view
// is therefore a reflection; the shadow pipeline must not cull.
fn face_rotation(face: CubeFace) -> Mat4 {
    let (s, t, major) = face.basis();
    let rows = Mat3::from_cols(mirror_x(s), mirror_x(t), -mirror_x(major)).transpose();
    Mat4::from_mat3(rows)
}

fn mirror_x(v: Vec3) -> Vec3 {
    Vec3::new(-v.x, v.y, v.z)
}

/// Depth the shadow pass stores for a fragment, reconstructed from the
/// fragment-to-light vector. Uses the major axis, not the euclidean length,
/// since that is what the face projection divides by.
pub fn shadow_depth(to_light: Vec3, near: f32, far: f32) -> f32 {
    let major = to_light.abs().max_element();
    far * (major - near) / ((far - near) * major)
}

/// Acne bias. Grows toward the far plane and toward cube-face edges.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowBias {
    pub base: f32,
    pub depth_scale: f32,
    pub edge_scale: f32,
}

impl Default for ShadowBias {
    fn default() -> Self {
        Self {
            base: 0.000_02,
            depth_scale: 0.000_08,
            edge_scale: 0.000_05,
        }
    }
}

impl ShadowBias {
    /// `0` at a face centre, `1` on a face edge.
    pub fn edge_factor(to_light: Vec3) -> f32 {
        let a = to_light.abs();
        let major = a.max_element();
        if major == 0.0 {
            return 0.0;
        }
        let middle = a.x + a.y + a.z - major - a.min_element();
        middle / major
    }

    pub fn bias(&self, depth: f32, edge: f32) -> f32 {
        self.base + self.depth_scale * depth * depth + self.edge_scale * edge * edge
    }

    pub fn is_lit(&self, stored: f32, to_light: Vec3, near: f32, far: f32) -> bool {
        let depth = shadow_depth(to_light, near, far);
        stored >= depth - self.bias(depth, Self::edge_factor(to_light))
    }
}
