use glam::{Mat4, Vec3};
use glint_core::Mesh;
use glint_math::Aabb;

use super::LocalShape;
use crate::bvh::{MeshBuffers, MeshBvh};
use crate::emit::{IdAllocator, Namespace};
use crate::library::SurfaceHit;
use crate::traversal;

/// A triangle mesh traced through its BVH.
///
/// Vertex data is renormalized to radius 127 on construction so it fits the
/// fixed-point range of the float buffers; `object_transformation` restores
/// the original placement and size.
#[derive(Debug, Clone)]
pub struct MeshShape {
    mesh: Mesh,
    pub object_transformation: Mat4,
    /// Interpolate vertex normals instead of using face normals
    pub smooth: bool,
    /// Reject back faces unless the material needs them
    pub cull: bool,
    bvh: Option<MeshBvh>,
    dirty: bool,
}

impl MeshShape {
    pub fn new(mut mesh: Mesh, smooth: bool, cull: bool) -> Self {
        if let Err(e) = mesh.validate() {
            log::warn!("{e}; using an empty mesh");
            mesh = Mesh::default();
        }
        if smooth && !mesh.has_normals() {
            mesh.calculate_vertex_normals(true);
        }
        let object_transformation = mesh.renormalize(true, true);
        Self {
            mesh,
            object_transformation,
            smooth,
            cull,
            bvh: None,
            dirty: true,
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Edit the vertex data; the hierarchy is rebuilt on next use.
    pub fn mesh_mut(&mut self) -> &mut Mesh {
        self.dirty = true;
        &mut self.mesh
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Build the hierarchy if the geometry changed since the last build.
    pub fn prepare(&mut self, ids: &mut IdAllocator, cap: bool) {
        if self.dirty || self.bvh.is_none() {
            self.bvh = Some(MeshBvh::build(&self.mesh, ids, cap));
            self.dirty = false;
        }
    }

    pub fn bvh(&self) -> Option<&MeshBvh> {
        self.bvh.as_ref()
    }

    pub fn buffers(&self) -> Option<&MeshBuffers> {
        self.bvh.as_ref().map(|b| &b.buffers)
    }
}

impl LocalShape for MeshShape {
    fn tag(&self) -> &'static str {
        "Mesh"
    }

    fn canonical_bounds(&self) -> Aabb {
        let bounds = self.mesh.bounds();
        if bounds.is_empty() {
            Aabb::new(Vec3::ZERO, Vec3::ZERO)
        } else {
            bounds
        }
    }

    fn wgsl_hit(&self, ns: &Namespace, ro: &str, rd: &str) -> String {
        format!("intersectModel{}({ro}, {rd})", ns.id)
    }

    fn wgsl_global(&self, ns: &Namespace, two_sided: bool) -> String {
        match &self.bvh {
            Some(bvh) => traversal::emit_wgsl(ns.id, bvh, self.smooth, two_sided),
            None => format!(
                "fn intersectModel{}(origin: vec3<f32>, ray: vec3<f32>) -> SurfaceHit {{\n    return missHit();\n}}\n",
                ns.id
            ),
        }
    }

    fn hit_local(&self, ro: Vec3, rd: Vec3, two_sided: bool) -> Option<SurfaceHit> {
        let bvh = self.bvh.as_ref()?;
        let hit = traversal::traverse(bvh, ro, rd, two_sided)?;
        Some(traversal::surface(bvh, &hit, self.smooth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_math::Mat4Ext;

    #[test]
    fn test_renormalized_with_restoring_transform() {
        let mut mesh = Mesh::icosphere(1);
        mesh.bake_transform(Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(3.0)));
        let shape = MeshShape::new(mesh, false, true);
        let bounds = shape.object_transformation.transform_aabb(&shape.canonical_bounds());
        assert!((bounds.centroid() - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-3);
        assert!((bounds.max.y - 3.0).abs() < 1e-2);
        assert!(shape.mesh().bounds().max.y <= 127.0 + 1e-3);
    }

    #[test]
    fn test_prepare_builds_once() {
        let mut shape = MeshShape::new(Mesh::icosphere(1), true, true);
        assert!(shape.hit_local(Vec3::new(0.0, 0.0, 300.0), Vec3::NEG_Z, false).is_none());
        let mut ids = IdAllocator::new();
        shape.prepare(&mut ids, false);
        assert!(!shape.is_dirty());
        let first = shape.buffers().map(|b| b.positions.id());
        shape.prepare(&mut ids, false);
        assert_eq!(shape.buffers().map(|b| b.positions.id()), first);
        shape.mesh_mut();
        shape.prepare(&mut ids, false);
        assert_ne!(shape.buffers().map(|b| b.positions.id()), first);

        let hit = shape.hit_local(Vec3::new(1.0, 2.0, 300.0), Vec3::NEG_Z, false).unwrap();
        assert!(hit.t > 170.0 && hit.t < 175.0);
    }

    #[test]
    fn test_invalid_mesh_degrades_to_empty() {
        let broken = Mesh::new(vec![Vec3::ZERO], vec![0, 1, 2]);
        let shape = MeshShape::new(broken, false, true);
        assert!(shape.mesh().is_empty());
    }
}
