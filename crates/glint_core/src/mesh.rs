//! Mesh geometry for the path tracer.
//!
//! Positions, UVs and normals are independent arrays, each addressed by its
//! own per-corner index stream (`triangles`, `triangle_uvs`,
//! `triangle_normals`). All three streams share topology: corner `k` of
//! triangle `i` lives at `3 * i + k` in each of them. This mirrors how OBJ
//! stores face-varying data and how the tracer's data buffers are laid out.

use std::path::Path;

use glam::{Mat4, Vec2, Vec3};
use glint_math::{Aabb, Mat4Ext};
use thiserror::Error;

/// Errors that can occur during mesh loading.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Failed to load OBJ {path}: {source}")]
    Obj {
        path: String,
        #[source]
        source: tobj::LoadError,
    },

    #[error("Index {index} out of range for {stream} ({len} entries)")]
    IndexOutOfRange {
        stream: &'static str,
        index: u32,
        len: usize,
    },

    #[error("Index stream {0} does not match the triangle count")]
    TopologyMismatch(&'static str),
}

pub type MeshResult<T> = Result<T, MeshError>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub normals: Vec<Vec3>,

    /// Position index per triangle corner
    pub triangles: Vec<u32>,
    /// UV index per triangle corner (empty when the mesh has no UVs)
    pub triangle_uvs: Vec<u32>,
    /// Normal index per triangle corner (empty when the mesh has no normals)
    pub triangle_normals: Vec<u32>,
}

impl Mesh {
    pub fn new(positions: Vec<Vec3>, triangles: Vec<u32>) -> Self {
        Self {
            positions,
            triangles,
            ..Default::default()
        }
    }

    /// Load a Wavefront OBJ, merging all of its models into one mesh.
    ///
    /// Polygons are fan-triangulated. Index streams stay separate so
    /// face-varying UVs and normals survive.
    pub fn load_obj(path: impl AsRef<Path>) -> MeshResult<Mesh> {
        let path = path.as_ref();
        let (models, _materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                single_index: false,
                triangulate: true,
                ..Default::default()
            },
        )
        .map_err(|source| MeshError::Obj {
            path: path.display().to_string(),
            source,
        })?;

        let mut mesh = Mesh::default();
        for model in &models {
            let m = &model.mesh;
            let p_base = mesh.positions.len() as u32;
            let uv_base = mesh.uvs.len() as u32;
            let n_base = mesh.normals.len() as u32;

            mesh.positions
                .extend(m.positions.chunks_exact(3).map(|p| Vec3::new(p[0], p[1], p[2])));
            mesh.uvs
                .extend(m.texcoords.chunks_exact(2).map(|t| Vec2::new(t[0], t[1])));
            mesh.normals
                .extend(m.normals.chunks_exact(3).map(|n| Vec3::new(n[0], n[1], n[2])));

            mesh.triangles.extend(m.indices.iter().map(|i| i + p_base));
            if m.texcoord_indices.len() == m.indices.len() {
                mesh.triangle_uvs
                    .extend(m.texcoord_indices.iter().map(|i| i + uv_base));
            }
            if m.normal_indices.len() == m.indices.len() {
                mesh.triangle_normals
                    .extend(m.normal_indices.iter().map(|i| i + n_base));
            }
        }

        // A stream missing from any model cannot be used for the whole mesh
        if mesh.triangle_uvs.len() != mesh.triangles.len() {
            mesh.uvs.clear();
            mesh.triangle_uvs.clear();
        }
        if mesh.triangle_normals.len() != mesh.triangles.len() {
            mesh.normals.clear();
            mesh.triangle_normals.clear();
        }

        mesh.validate()?;
        log::info!(
            "Loaded OBJ {}: {} vertices, {} triangles",
            path.display(),
            mesh.vertex_count(),
            mesh.triangle_count()
        );
        Ok(mesh)
    }

    /// Like [`Mesh::load_obj`], but an unreadable file yields an empty mesh.
    pub fn load_obj_or_placeholder(path: impl AsRef<Path>) -> Mesh {
        match Self::load_obj(path) {
            Ok(mesh) => mesh,
            Err(e) => {
                log::warn!("{e}; using an empty mesh");
                Mesh::default()
            }
        }
    }

    /// Check that every index stream matches the topology and stays in range.
    pub fn validate(&self) -> MeshResult<()> {
        if self.triangles.len() % 3 != 0 {
            return Err(MeshError::TopologyMismatch("triangles"));
        }
        check_stream("triangles", &self.triangles, self.positions.len())?;
        for (name, stream, len) in [
            ("triangle_uvs", &self.triangle_uvs, self.uvs.len()),
            ("triangle_normals", &self.triangle_normals, self.normals.len()),
        ] {
            if !stream.is_empty() && stream.len() != self.triangles.len() {
                return Err(MeshError::TopologyMismatch(name));
            }
            check_stream(name, stream, len)?;
        }
        Ok(())
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len() / 3
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn has_uvs(&self) -> bool {
        !self.triangle_uvs.is_empty()
    }

    pub fn has_normals(&self) -> bool {
        !self.triangle_normals.is_empty()
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::enclosing(self.positions.iter().copied())
    }

    /// The three corner positions of triangle `i`.
    pub fn triangle(&self, i: usize) -> [Vec3; 3] {
        let t = &self.triangles[i * 3..i * 3 + 3];
        [
            self.positions[t[0] as usize],
            self.positions[t[1] as usize],
            self.positions[t[2] as usize],
        ]
    }

    /// Replace UVs with a spherical projection around the origin.
    pub fn calculate_spherical_uvs(&mut self) {
        self.uvs = self
            .positions
            .iter()
            .map(|p| {
                let r = p.length().max(f32::MIN_POSITIVE);
                Vec2::new(
                    0.5 + (p.z / r).atan2(p.x / r) / std::f32::consts::TAU,
                    0.5 - (p.y / r).clamp(-1.0, 1.0).asin() / std::f32::consts::PI,
                )
            })
            .collect();
        self.triangle_uvs = self.triangles.clone();
    }

    /// Replace normals with generated ones.
    ///
    /// `smooth` averages face normals at shared vertices; otherwise every
    /// triangle gets its own flat normal.
    pub fn calculate_vertex_normals(&mut self, smooth: bool) {
        let face_normals: Vec<Vec3> = (0..self.triangle_count())
            .map(|i| {
                let [p0, p1, p2] = self.triangle(i);
                (p0 - p1).cross(p0 - p2).normalize_or_zero()
            })
            .collect();

        if smooth {
            let mut normals = vec![Vec3::ZERO; self.positions.len()];
            for (corner, &v) in self.triangles.iter().enumerate() {
                normals[v as usize] += face_normals[corner / 3];
            }
            self.normals = normals
                .into_iter()
                .map(|n| n.try_normalize().unwrap_or(Vec3::Y))
                .collect();
            self.triangle_normals = self.triangles.clone();
        } else {
            self.normals = face_normals;
            self.triangle_normals = (0..self.triangles.len() as u32).map(|i| i / 3).collect();
        }
    }

    /// Move the bounding-box center to the origin and return the old center.
    pub fn recenter(&mut self) -> Vec3 {
        let bounds = self.bounds();
        if bounds.is_empty() {
            return Vec3::ZERO;
        }
        let center = bounds.centroid();
        for p in &mut self.positions {
            *p -= center;
        }
        center
    }

    /// Recenter and rescale positions so the farthest vertex sits at radius 127.
    ///
    /// Returns the object transform that restores a unit-radius mesh
    /// (`keep_scale == false`) or the original size (`keep_scale == true`),
    /// optionally translated back to the original center.
    pub fn renormalize(&mut self, keep_center: bool, keep_scale: bool) -> Mat4 {
        let center = self.recenter();
        let radius = self
            .positions
            .iter()
            .map(|p| p.length())
            .fold(0.0_f32, f32::max);
        if radius <= 0.0 {
            return Mat4::IDENTITY;
        }
        let scalar = 127.0 / radius;
        for p in &mut self.positions {
            *p *= scalar;
        }

        let scale = if keep_scale { radius / 127.0 } else { 1.0 / 127.0 };
        let translation = if keep_center { center } else { Vec3::ZERO };
        Mat4::from_translation(translation) * Mat4::from_scale(Vec3::splat(scale))
    }

    /// Apply a transform to the vertex data itself.
    pub fn bake_transform(&mut self, transform: Mat4) {
        for p in &mut self.positions {
            *p = transform.transform_point3(*p);
        }
        for n in &mut self.normals {
            *n = transform.transform_normal(*n);
        }
    }

    /// Subdivided icosahedron on the unit sphere, with spherical UVs and
    /// smooth normals.
    pub fn icosphere(subdivisions: u32) -> Mesh {
        let t = (1.0 + 5.0_f32.sqrt()) / 2.0;
        let mut positions: Vec<Vec3> = [
            (-1.0, t, 0.0),
            (1.0, t, 0.0),
            (-1.0, -t, 0.0),
            (1.0, -t, 0.0),
            (0.0, -1.0, t),
            (0.0, 1.0, t),
            (0.0, -1.0, -t),
            (0.0, 1.0, -t),
            (t, 0.0, -1.0),
            (t, 0.0, 1.0),
            (-t, 0.0, -1.0),
            (-t, 0.0, 1.0),
        ]
        .iter()
        .map(|&(x, y, z)| Vec3::new(x, y, z).normalize())
        .collect();

        let mut triangles: Vec<u32> = vec![
            0, 11, 5, 0, 5, 1, 0, 1, 7, 0, 7, 10, 0, 10, 11, 1, 5, 9, 5, 11, 4, 11, 10, 2, 10, 7,
            6, 7, 1, 8, 3, 9, 4, 3, 4, 2, 3, 2, 6, 3, 6, 8, 3, 8, 9, 4, 9, 5, 2, 4, 11, 6, 2, 10,
            8, 6, 7, 9, 8, 1,
        ];

        for _ in 0..subdivisions {
            let mut midpoints = std::collections::HashMap::new();
            let mut midpoint = |a: u32, b: u32, positions: &mut Vec<Vec3>| -> u32 {
                let key = (a.min(b), a.max(b));
                *midpoints.entry(key).or_insert_with(|| {
                    let p = (positions[a as usize] + positions[b as usize]).normalize();
                    positions.push(p);
                    (positions.len() - 1) as u32
                })
            };
            let mut next = Vec::with_capacity(triangles.len() * 4);
            for tri in triangles.chunks_exact(3) {
                let (a, b, c) = (tri[0], tri[1], tri[2]);
                let ab = midpoint(a, b, &mut positions);
                let bc = midpoint(b, c, &mut positions);
                let ca = midpoint(c, a, &mut positions);
                next.extend_from_slice(&[a, ab, ca, b, bc, ab, c, ca, bc, ab, bc, ca]);
            }
            triangles = next;
        }

        let mut mesh = Mesh::new(positions, triangles);
        mesh.calculate_spherical_uvs();
        mesh.calculate_vertex_normals(true);
        mesh
    }
}

fn check_stream(stream: &'static str, indices: &[u32], len: usize) -> MeshResult<()> {
    match indices.iter().find(|&&i| i as usize >= len) {
        Some(&index) => Err(MeshError::IndexOutOfRange { stream, index, len }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Mesh {
        Mesh::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(2.0, 0.0, 0.0),
                Vec3::new(2.0, 2.0, 0.0),
                Vec3::new(0.0, 2.0, 0.0),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    #[test]
    fn test_smooth_normals_share_vertices() {
        let mut mesh = quad();
        mesh.calculate_vertex_normals(true);

        assert_eq!(mesh.normals.len(), 4);
        assert_eq!(mesh.triangle_normals, mesh.triangles);
        // (p0 - p1) x (p0 - p2) for a CCW quad in the xy plane
        for n in &mesh.normals {
            assert!((n.z.abs() - 1.0).abs() < 0.001);
        }
    }

    #[test]
    fn test_flat_normals_per_triangle() {
        let mut mesh = quad();
        mesh.calculate_vertex_normals(false);

        assert_eq!(mesh.normals.len(), 2);
        assert_eq!(mesh.triangle_normals, vec![0, 0, 0, 1, 1, 1]);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_recenter() {
        let mut mesh = quad();
        let center = mesh.recenter();

        assert!((center - Vec3::new(1.0, 1.0, 0.0)).length() < 0.001);
        assert!((mesh.bounds().centroid()).length() < 0.001);
    }

    #[test]
    fn test_renormalize_compensates() {
        let mut mesh = quad();
        let original = mesh.positions.clone();
        let transform = mesh.renormalize(true, true);

        let max_radius = mesh.positions.iter().map(|p| p.length()).fold(0.0, f32::max);
        assert!((max_radius - 127.0).abs() < 0.01);

        // Normalized data pushed through the compensating transform is the input
        for (p, o) in mesh.positions.iter().zip(&original) {
            assert!((transform.transform_point3(*p) - *o).length() < 0.001);
        }
    }

    #[test]
    fn test_bake_transform_moves_positions() {
        let mut mesh = quad();
        mesh.calculate_vertex_normals(true);
        mesh.bake_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)));

        assert!((mesh.positions[0].z - 5.0).abs() < 0.001);
        // Translation leaves normals alone
        assert!((mesh.normals[0].z.abs() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_spherical_uvs_in_range() {
        let mesh = Mesh::icosphere(1);
        assert_eq!(mesh.triangle_uvs.len(), mesh.triangles.len());
        for uv in &mesh.uvs {
            assert!(uv.x >= 0.0 && uv.x <= 1.0);
            assert!(uv.y >= 0.0 && uv.y <= 1.0);
        }
    }

    #[test]
    fn test_icosphere_counts() {
        let mesh = Mesh::icosphere(2);
        assert_eq!(mesh.triangle_count(), 20 * 16);
        assert_eq!(mesh.vertex_count(), 162);
        assert!(mesh.validate().is_ok());
        for p in &mesh.positions {
            assert!((p.length() - 1.0).abs() < 0.001);
        }
    }

    #[test]
    fn test_validate_catches_bad_index() {
        let mut mesh = quad();
        mesh.triangles[4] = 9;
        assert!(matches!(
            mesh.validate(),
            Err(MeshError::IndexOutOfRange { index: 9, .. })
        ));
    }

    #[test]
    fn test_missing_obj_is_placeholder() {
        let mesh = Mesh::load_obj_or_placeholder("/nonexistent/model.obj");
        assert!(mesh.is_empty());
    }
}
