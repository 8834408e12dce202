// SPDX-License-Identifier: CEPL-1.0
//! Wavefront OBJ/MTL loading into flat, de-indexed triangle lists.
use glam::Vec3;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Slots in the fragment material uniform array.
pub const MAX_MATERIALS: usize = 20;

const MAX_VERTICES: usize = u16::MAX as usize + 1;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to load {}: {source}", path.display())]
    Obj {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    #[error("failed to load the material library of {}: {source}", path.display())]
    MaterialLibrary {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    #[error("model uses {count} materials, at most {max} fit the material uniform")]
    TooManyMaterials { count: usize, max: usize },

    #[error("model expands to {count} vertices, more than 16-bit indices can address")]
    TooManyVertices { count: usize },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub ambient: Vec3,
    pub diffuse: Vec3,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ambient: Vec3::splat(0.1),
            diffuse: Vec3::splat(0.7),
        }
    }
}

impl From<&tobj::Material> for Material {
    fn from(m: &tobj::Material) -> Self {
        Self {
            ambient: m.ambient.map_or(Vec3::ZERO, Vec3::from_array),
            diffuse: m.diffuse.map_or(Vec3::ZERO, Vec3::from_array),
        }
    }
}

/// Immutable triangle soup: three vertices per triangle, flat normals,
/// one material index per vertex.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub material_indices: Vec<u32>,
    pub indices: Vec<u16>,
    pub materials: Vec<Material>,
}

impl Model {
    /// Loads an OBJ file and the `mtllib` it names, resolved next to it.
    pub fn load(path: impl AsRef<Path>) -> Result<Model, ModelError> {
        let path = path.as_ref();
        let options = tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ignore_points: true,
            ignore_lines: true,
            ..Default::default()
        };
        let (meshes, materials) = tobj::load_obj(path, &options).map_err(|e| match e {
            tobj::LoadError::OpenFileFailed => ModelError::NotFound(path.to_path_buf()),
            source => ModelError::Obj {
                path: path.to_path_buf(),
                source,
            },
        })?;
        let materials = materials.map_err(|source| ModelError::MaterialLibrary {
            path: path.to_path_buf(),
            source,
        })?;

        let model = Self::from_meshes(&meshes, &materials)?;
        if materials.is_empty() {
            warn!(path = %path.display(), "model has no materials, using a neutral default");
        }
        debug!(
            path = %path.display(),
            vertices = model.positions.len(),
            materials = model.materials.len(),
            "model loaded"
        );
        Ok(model)
    }

    /// De-indexes triangulated meshes. Faces without a known material use
    /// material 0.
    pub fn from_meshes(
        meshes: &[tobj::Model],
        materials: &[tobj::Material],
    ) -> Result<Model, ModelError> {
        if materials.len() > MAX_MATERIALS {
            return Err(ModelError::TooManyMaterials {
                count: materials.len(),
                max: MAX_MATERIALS,
            });
        }
        let mut model = Model {
            materials: materials.iter().map(Material::from).collect(),
            ..Default::default()
        };
        if model.materials.is_empty() {
            model.materials.push(Material::default());
        }

        for m in meshes {
            let mesh = &m.mesh;
            let material = mesh.material_id.unwrap_or(0) as u32;
            let position = |i: u32| {
                let i = 3 * i as usize;
                Vec3::new(mesh.positions[i], mesh.positions[i + 1], mesh.positions[i + 2])
            };
            for tri in mesh.indices.chunks_exact(3) {
                push_triangle(
                    &mut model,
                    [position(tri[0]), position(tri[1]), position(tri[2])],
                    material,
                );
            }
        }

        if model.positions.len() > MAX_VERTICES {
            return Err(ModelError::TooManyVertices {
                count: model.positions.len(),
            });
        }
        model.indices = (0..model.positions.len()).map(|i| i as u16).collect();
        Ok(model)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

fn push_triangle(model: &mut Model, p: [Vec3; 3], material: u32) {
    let normal = (p[1] - p[0]).cross(p[2] - p[0]).normalize_or_zero();
    for v in p {
        model.positions.push(v);
        model.normals.push(normal);
        model.material_indices.push(material);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::fs;

    fn write_model(obj: &str, mtl: Option<&str>) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let obj_path = dir.path().join("scene.obj");
        fs::write(&obj_path, obj).unwrap();
        if let Some(mtl) = mtl {
            fs::write(dir.path().join("scene.mtl"), mtl).unwrap();
        }
        (dir, obj_path)
    }

    const MTL: &str = "\
newmtl white
Ka 0.1 0.1 0.1
Kd 0.8 0.8 0.8
newmtl red
Kd 0.9 0.1 0.1
";

    #[test]
    fn loads_triangles_and_quads_with_materials() {
        let obj = "\
# two faces
mtllib scene.mtl
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
usemtl red
f 1 2 3
usemtl white
f 1 2 3 4
";
        let (_dir, path) = write_model(obj, Some(MTL));
        let model = Model::load(&path).unwrap();

        assert_eq!(model.vertex_count(), 9);
        assert_eq!(model.indices, (0..9).collect::<Vec<u16>>());
        assert_eq!(model.material_indices[..3], [1, 1, 1]);
        assert_eq!(model.material_indices[3..], [0; 6]);
        assert_eq!(model.materials.len(), 2);
        assert_abs_diff_eq!(model.materials[0].ambient.x, 0.1);
        assert_abs_diff_eq!(model.materials[1].diffuse.x, 0.9);
        // red has no Ka
        assert_eq!(model.materials[1].ambient, Vec3::ZERO);
        // quad split (0,1,2),(0,2,3)
        assert_eq!(model.positions[6], Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(model.positions[7], Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(model.positions[8], Vec3::new(0.0, 1.0, 0.0));
        for n in &model.normals {
            assert_abs_diff_eq!(n.z, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn negative_and_slashed_references_resolve() {
        let obj = "\
v 0 0 0
v 0 0 1
v 0 1 0
vn 1 0 0
f -3//1 -2//1 -1//1
";
        let (_dir, path) = write_model(obj, None);
        let model = Model::load(&path).unwrap();
        assert_eq!(model.positions[1], Vec3::new(0.0, 0.0, 1.0));
        // file normals are ignored in favour of the winding
        assert_abs_diff_eq!(model.normals[0].x, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn faces_without_materials_get_default() {
        let (_dir, path) = write_model("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n", None);
        let model = Model::load(&path).unwrap();
        assert_eq!(model.materials, vec![Material::default()]);
        assert_eq!(model.material_indices, vec![0, 0, 0]);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = Model::load(dir.path().join("absent.obj")).unwrap_err();
        assert!(matches!(err, ModelError::NotFound(p) if p.ends_with("absent.obj")));
    }

    #[test]
    fn missing_material_library_is_reported() {
        let obj = "mtllib scene.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let (_dir, path) = write_model(obj, None);
        let err = Model::load(&path).unwrap_err();
        assert!(matches!(err, ModelError::MaterialLibrary { .. }));
    }

    #[test]
    fn polygons_are_fan_triangulated() {
        let obj = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nv -1 1 0\nf 1 2 3 4 5\n";
        let (_dir, path) = write_model(obj, None);
        let model = Model::load(&path).unwrap();
        assert_eq!(model.vertex_count(), 9);
        assert_eq!(model.positions[8], Vec3::new(-1.0, 1.0, 0.0));
    }

    #[test]
    fn out_of_range_reference_is_rejected() {
        let (_dir, path) = write_model("v 0 0 0\nf 1 2 3\n", None);
        let err = Model::load(&path).unwrap_err();
        assert!(matches!(err, ModelError::Obj { .. }));
    }

    #[test]
    fn malformed_vertex_is_rejected() {
        let (_dir, path) = write_model("v 0 zero 0\n", None);
        let err = Model::load(&path).unwrap_err();
        assert!(matches!(err, ModelError::Obj { .. }));
    }

    #[test]
    fn more_materials_than_slots_fail_to_load() {
        let mtl: String = (0..=MAX_MATERIALS)
            .map(|i| format!("newmtl m{i}\nKd 1 1 1\n"))
            .collect();
        let (_dir, path) = write_model("mtllib scene.mtl\n", Some(&mtl));
        let err = Model::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ModelError::TooManyMaterials { count: 21, max: MAX_MATERIALS }
        ));
    }

    #[test]
    fn exactly_max_materials_is_fine() {
        let mtl: String = (0..MAX_MATERIALS)
            .map(|i| format!("newmtl m{i}\nKa 0 0 0\n"))
            .collect();
        let obj = "mtllib scene.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl m19\nf 1 2 3\n";
        let (_dir, path) = write_model(obj, Some(&mtl));
        let model = Model::load(&path).unwrap();
        assert_eq!(model.materials.len(), MAX_MATERIALS);
        assert_eq!(model.material_indices, vec![19; 3]);
    }

    #[test]
    fn vertex_count_is_bounded_by_u16_indices() {
        let triangles = MAX_VERTICES / 3 + 1;
        let mesh = tobj::Mesh {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            indices: [0, 1, 2].repeat(triangles),
            ..Default::default()
        };
        let meshes = [tobj::Model::new(mesh, "big".to_string())];
        let err = Model::from_meshes(&meshes, &[]).unwrap_err();
        assert!(matches!(err, ModelError::TooManyVertices { count } if count == 3 * triangles));
    }
}
