// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;

pub struct Box;

impl Box {
    pub fn build(center: Vec3, size: Vec3) -> Result<HalfEdgeMesh> {
        let hsize = size * 0.5;

        let v1 = center + Vec3::new(-hsize.x, -hsize.y, -hsize.z);
        let v2 = center + Vec3::new(hsize.x, -hsize.y, -hsize.z);
        let v3 = center + Vec3::new(hsize.x, -hsize.y, hsize.z);
        let v4 = center + Vec3::new(-hsize.x, -hsize.y, hsize.z);

        let v5 = center + Vec3::new(-hsize.x, hsize.y, -hsize.z);
        let v6 = center + Vec3::new(-hsize.x, hsize.y, hsize.z);
        let v7 = center + Vec3::new(hsize.x, hsize.y, hsize.z);
        let v8 = center + Vec3::new(hsize.x, hsize.y, -hsize.z);

        HalfEdgeMesh::build_from_polygons(
            &[v1, v2, v3, v4, v5, v6, v7, v8],
            &[
                &[0, 1, 2, 3],
                &[4, 5, 6, 7],
                &[4, 7, 1, 0],
                &[3, 2, 6, 5],
                &[5, 4, 0, 3],
                &[6, 2, 1, 7],
            ],
        )
    }
}

pub struct Quad;
impl Quad {
    pub fn build(center: Vec3, normal: Vec3, right: Vec3, size: Vec2) -> Result<HalfEdgeMesh> {
        let normal = normal.normalize();
        let right = right.normalize();
        let forward = normal.cross(right);

        let hsize = size * 0.5;

        let v1 = center + hsize.x * right + hsize.y * forward;
        let v2 = center - hsize.x * right + hsize.y * forward;
        let v3 = center - hsize.x * right - hsize.y * forward;
        let v4 = center + hsize.x * right - hsize.y * forward;

        HalfEdgeMesh::build_from_polygons(&[v1, v2, v3, v4], &[&[0, 1, 2, 3]])
    }
}

pub struct Polygon;
impl Polygon {
    pub fn build_from_points(points: Vec<Vec3>) -> Result<HalfEdgeMesh> {
        let indices = points
            .iter()
            .enumerate()
            .map(|(i, _)| i as u32)
            .collect_vec();
        HalfEdgeMesh::build_from_polygons(&points, &[&indices])
    }
}

/// The simplest closed triangle mesh. Useful to exercise degenerate edge
/// cases of the editing operators.
pub struct Tetrahedron;
impl Tetrahedron {
    pub fn build(center: Vec3, radius: f32) -> Result<HalfEdgeMesh> {
        let verts = [
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(-1.0, -1.0, 1.0),
        ]
        .iter()
        .map(|v| center + *v * (radius / 3.0f32.sqrt()))
        .collect_vec();

        HalfEdgeMesh::build_from_polygons(
            &verts,
            &[[0, 1, 2], [0, 2, 3], [0, 3, 1], [1, 3, 2]],
        )
    }
}

/// A regular octahedron. All its vertices have degree four, which makes it a
/// good fixture for operations that care about vertex degrees.
pub struct Octahedron;
impl Octahedron {
    pub fn build(center: Vec3, radius: f32) -> Result<HalfEdgeMesh> {
        let verts = [
            Vec3::X,
            Vec3::NEG_X,
            Vec3::Y,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::NEG_Z,
        ]
        .iter()
        .map(|v| center + *v * radius)
        .collect_vec();

        HalfEdgeMesh::build_from_polygons(
            &verts,
            &[
                [0, 2, 4],
                [2, 1, 4],
                [1, 3, 4],
                [3, 0, 4],
                [2, 0, 5],
                [1, 2, 5],
                [3, 1, 5],
                [0, 3, 5],
            ],
        )
    }
}

/// A flat grid of `n` by `n` cells on the XY plane, each cell split into two
/// triangles. The grid has an open boundary.
pub struct TriGrid;
impl TriGrid {
    pub fn build(n: u32, spacing: f32) -> Result<HalfEdgeMesh> {
        let mut verts = Vec::new();
        let mut polygons = Vec::new();

        for j in 0..=n {
            for i in 0..=n {
                verts.push(Vec3::new(i as f32 * spacing, j as f32 * spacing, 0.0));
            }
        }

        for j in 0..n {
            for i in 0..n {
                let v00 = j * (n + 1) + i;
                let v10 = j * (n + 1) + i + 1;
                let v01 = (j + 1) * (n + 1) + i;
                let v11 = (j + 1) * (n + 1) + i + 1;

                polygons.push([v00, v10, v11]);
                polygons.push([v00, v11, v01]);
            }
        }

        HalfEdgeMesh::build_from_polygons(&verts, &polygons)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_box() {
        let mesh = Box::build(Vec3::ZERO, Vec3::ONE).unwrap();
        let conn = &mesh.connectivity;
        assert_eq!(conn.num_vertices(), 8);
        assert_eq!(conn.num_edges(), 12);
        assert_eq!(conn.num_faces(), 6);
        assert_eq!(conn.num_halfedges(), 24);
        conn.check_integrity().unwrap();
    }

    #[test]
    fn test_tetrahedron() {
        let mesh = Tetrahedron::build(Vec3::ZERO, 1.0).unwrap();
        let conn = &mesh.connectivity;
        assert_eq!(conn.num_vertices(), 4);
        assert_eq!(conn.num_edges(), 6);
        assert_eq!(conn.num_faces(), 4);
        conn.check_integrity().unwrap();

        // A closed mesh has no boundary
        for (e, _) in conn.iter_edges() {
            assert!(!conn.is_boundary_edge(e));
        }
    }

    #[test]
    fn test_octahedron() {
        let mesh = Octahedron::build(Vec3::ZERO, 1.0).unwrap();
        let conn = &mesh.connectivity;
        assert_eq!(conn.num_vertices(), 6);
        assert_eq!(conn.num_edges(), 12);
        assert_eq!(conn.num_faces(), 8);
        for (v, _) in conn.iter_vertices() {
            assert_eq!(conn.vertex_degree(v), 4);
        }
        conn.check_integrity().unwrap();
    }

    #[test]
    fn test_grid_has_boundary() {
        let mesh = TriGrid::build(3, 1.0).unwrap();
        let conn = &mesh.connectivity;
        assert_eq!(conn.num_vertices(), 16);
        assert_eq!(conn.num_faces(), 18);
        conn.check_integrity().unwrap();

        let boundary_edges = conn
            .iter_edges()
            .filter(|(e, _)| conn.is_boundary_edge(*e))
            .count();
        assert_eq!(boundary_edges, 12);
    }

    #[test]
    fn test_quad() {
        let mesh = Quad::build(Vec3::ZERO, Vec3::Y, Vec3::X, Vec2::ONE).unwrap();
        assert_eq!(mesh.connectivity.num_faces(), 1);
        assert_eq!(mesh.connectivity.num_edges(), 4);
        mesh.connectivity.check_integrity().unwrap();
    }
}
