//! Triangle meshes extracted from a volume.

use glam::Vec3;

/// A single triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub v0: Vec3,
    pub v1: Vec3,
    pub v2: Vec3,
}

impl Triangle {
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        Self { v0, v1, v2 }
    }

    /// Compute the center (centroid) of the triangle.
    pub fn center(&self) -> Vec3 {
        (self.v0 + self.v1 + self.v2) / 3.0
    }

    /// Compute the normal of the triangle (not normalized).
    pub fn normal(&self) -> Vec3 {
        let e1 = self.v1 - self.v0;
        let e2 = self.v2 - self.v0;
        e1.cross(e2)
    }

    /// Compute the normalized normal of the triangle.
    pub fn unit_normal(&self) -> Vec3 {
        self.normal().normalize_or_zero()
    }

    /// Compute the area of the triangle.
    pub fn area(&self) -> f32 {
        self.normal().length() * 0.5
    }
}

/// An unindexed triangle soup with a trivial index list.
///
/// A mesh is a point-in-time snapshot; it holds no reference to the volume
/// it came from. Vertices are not deduplicated: triangle `i` is made of
/// vertices `3i`, `3i + 1`, `3i + 2`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mesh from a flat list of triangle corners.
    pub fn from_triangle_soup(vertices: Vec<Vec3>) -> Self {
        debug_assert_eq!(vertices.len() % 3, 0);
        let indices = (0..vertices.len() as u32).collect();
        Self { vertices, indices }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Iterate over triangles.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.indices.chunks_exact(3).map(|tri| {
            Triangle::new(
                self.vertices[tri[0] as usize],
                self.vertices[tri[1] as usize],
                self.vertices[tri[2] as usize],
            )
        })
    }

    /// Axis-aligned bounds of all vertices.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.vertices.first()?;
        Some(
            self.vertices
                .iter()
                .fold((first, first), |(min, max), &v| (min.min(v), max.max(v))),
        )
    }

    /// Total surface area.
    pub fn area(&self) -> f32 {
        self.triangles().map(|t| t.area()).sum()
    }

    /// Raw vertex bytes (tightly packed `f32` triples).
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Raw index bytes (`u32`).
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_normal() {
        let t = Triangle::new(Vec3::ZERO, Vec3::X, Vec3::Y);
        assert!((t.unit_normal() - Vec3::Z).length() < 0.001);
        assert!((t.area() - 0.5).abs() < 1e-6);
        assert_eq!(t.center(), Vec3::new(1.0 / 3.0, 1.0 / 3.0, 0.0));
    }

    #[test]
    fn test_mesh_from_soup() {
        let mesh = Mesh::from_triangle_soup(vec![
            Vec3::ZERO,
            Vec3::X,
            Vec3::Y,
            Vec3::ZERO,
            Vec3::Y,
            Vec3::Z,
        ]);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(mesh.bounds(), Some((Vec3::ZERO, Vec3::ONE)));
        assert_eq!(mesh.vertex_bytes().len(), 6 * 12);
        assert_eq!(mesh.index_bytes().len(), 6 * 4);
        assert_eq!(&mesh.index_bytes()[4..8], &1u32.to_ne_bytes());
        assert!((mesh.area() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_mesh() {
        let mesh = Mesh::new();
        assert!(mesh.is_empty());
        assert_eq!(mesh.bounds(), None);
        assert_eq!(mesh.triangles().count(), 0);
    }
}
