// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use glam::{Vec2, Vec3};

/// One face of a cubemap, in array-layer order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX = 0,
    NegativeX = 1,
    PositiveY = 2,
    NegativeY = 3,
    PositiveZ = 4,
    NegativeZ = 5,
}

bitflags! {
    /// A set of cube faces, used to track which layers have been written.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct CubeFaces: u8 {
        const POSITIVE_X = 1 << 0;
        const NEGATIVE_X = 1 << 1;
        const POSITIVE_Y = 1 << 2;
        const NEGATIVE_Y = 1 << 3;
        const POSITIVE_Z = 1 << 4;
        const NEGATIVE_Z = 1 << 5;
    }
}

impl CubeFace {
    pub const COUNT: usize = 6;

    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// Array layer of this face inside a cube-compatible image.
    pub fn layer(self) -> u32 {
        self as u32
    }

    pub fn flag(self) -> CubeFaces {
        CubeFaces::from_bits_truncate(1 << self as u8)
    }

    /// Face basis in cubemap coordinates: (s axis, t axis, major axis).
    ///
    /// `s = dot(s_axis, r) / dot(major, r)` and likewise for `t`, matching the
    /// cube-face selection table Vulkan uses for cube sampling.
    pub(crate) fn basis(self) -> (Vec3, Vec3, Vec3) {
        match self {
            CubeFace::PositiveX => (Vec3::NEG_Z, Vec3::NEG_Y, Vec3::X),
            CubeFace::NegativeX => (Vec3::Z, Vec3::NEG_Y, Vec3::NEG_X),
            CubeFace::PositiveY => (Vec3::X, Vec3::Z, Vec3::Y),
            CubeFace::NegativeY => (Vec3::X, Vec3::NEG_Z, Vec3::NEG_Y),
            CubeFace::PositiveZ => (Vec3::X, Vec3::NEG_Y, Vec3::Z),
            CubeFace::NegativeZ => (Vec3::NEG_X, Vec3::NEG_Y, Vec3::NEG_Z),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CubeFace::PositiveX => "+X",
            CubeFace::NegativeX => "-X",
            CubeFace::PositiveY => "+Y",
            CubeFace::NegativeY => "-Y",
            CubeFace::PositiveZ => "+Z",
            CubeFace::NegativeZ => "-Z",
        }
    }
}

/// Result of addressing a cubemap with a direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CubeLookup {
    pub face: CubeFace,
    /// Normalized texel coordinates in `[0, 1]`, origin at the top-left texel.
    pub uv: Vec2,
    /// Absolute value of the major-axis component.
    pub major: f32,
}

/// Direction used to sample the shadow cubemap for a fragment.
///
/// `to_light` points from the fragment to the light. The cubemap is addressed
/// with the opposite direction, mirrored in x, since cube sampling coordinates
/// are left-handed while world space is right-handed.
pub fn sample_direction(to_light: Vec3) -> Vec3 {
    Vec3::new(to_light.x, -to_light.y, -to_light.z)
}

/// CPU mirror of the hardware cube-face selection for direction `r`.
///
/// Returns `None` for the zero vector.
pub fn cube_lookup(r: Vec3) -> Option<CubeLookup> {
    let a = r.abs();
    let (face, sc, tc, ma) = if a.x >= a.y && a.x >= a.z {
        if r.x >= 0.0 {
            (CubeFace::PositiveX, -r.z, -r.y, a.x)
        } else {
            (CubeFace::NegativeX, r.z, -r.y, a.x)
        }
    } else if a.y >= a.z {
        if r.y >= 0.0 {
            (CubeFace::PositiveY, r.x, r.z, a.y)
        } else {
            (CubeFace::NegativeY, r.x, -r.z, a.y)
        }
    } else if r.z >= 0.0 {
        (CubeFace::PositiveZ, r.x, -r.y, a.z)
    } else {
        (CubeFace::NegativeZ, -r.x, -r.y, a.z)
    };

    if ma == 0.0 {
        return None;
    }

    Some(CubeLookup {
        face,
        uv: Vec2::new(0.5 * (sc / ma + 1.0), 0.5 * (tc / ma + 1.0)),
        major: ma,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn layers_follow_array_order() {
        for (i, face) in CubeFace::ALL.iter().enumerate() {
            assert_eq!(face.layer() as usize, i);
        }
    }

    #[test]
    fn flags_cover_all_faces() {
        let all = CubeFace::ALL
            .iter()
            .fold(CubeFaces::empty(), |acc, f| acc | f.flag());
        assert_eq!(all, CubeFaces::all());
    }

    #[test]
    fn axis_directions_hit_face_centres() {
        let cases = [
            (Vec3::X, CubeFace::PositiveX),
            (Vec3::NEG_X, CubeFace::NegativeX),
            (Vec3::Y, CubeFace::PositiveY),
            (Vec3::NEG_Y, CubeFace::NegativeY),
            (Vec3::Z, CubeFace::PositiveZ),
            (Vec3::NEG_Z, CubeFace::NegativeZ),
        ];
        for (dir, face) in cases {
            let hit = cube_lookup(dir * 3.0).unwrap();
            assert_eq!(hit.face, face);
            assert_abs_diff_eq!(hit.uv.x, 0.5, epsilon = 1e-6);
            assert_abs_diff_eq!(hit.uv.y, 0.5, epsilon = 1e-6);
            assert_abs_diff_eq!(hit.major, 3.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn basis_agrees_with_lookup() {
        for face in CubeFace::ALL {
            let (s, t, major) = face.basis();
            let r = major + s * 0.25 - t * 0.5;
            let hit = cube_lookup(r).unwrap();
            assert_eq!(hit.face, face, "face {}", face.name());
            assert_abs_diff_eq!(hit.uv.x, 0.5 * (0.25 + 1.0), epsilon = 1e-6);
            assert_abs_diff_eq!(hit.uv.y, 0.5 * (-0.5 + 1.0), epsilon = 1e-6);
        }
    }

    #[test]
    fn zero_direction_has_no_face() {
        assert!(cube_lookup(Vec3::ZERO).is_none());
    }

    #[test]
    fn sample_direction_mirrors_x_of_light_to_fragment() {
        let to_light = Vec3::new(1.0, 2.0, 3.0);
        let from_light = -to_light;
        assert_eq!(
            sample_direction(to_light),
            Vec3::new(-from_light.x, from_light.y, from_light.z)
        );
    }
}
