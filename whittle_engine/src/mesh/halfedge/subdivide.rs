// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slotmap::SecondaryMap;

use crate::prelude::*;

/// Splits every face with more than three sides into triangles, by fanning
/// out from the origin vertex of the face's canonical halfedge. An n-gon
/// turns into `n-2` triangles connected by `n-3` diagonals; the original
/// face is reused for the last triangle of the fan.
pub fn triangulate(mesh: &mut MeshConnectivity) {
    let faces = mesh.iter_faces().map(|(f, _)| f).collect_vec();

    for f in faces {
        let og_halfedges = mesh.face_edges(f);
        let n = og_halfedges.len();
        if n <= 3 {
            continue;
        }
        let apex = mesh.at_halfedge(og_halfedges[0]).vertex().end();

        // One new face per fan triangle except the last, which reuses `f`.
        // `from_apex[i]` is the halfedge leaving the apex into triangle `i`;
        // the first one is the face's own canonical halfedge.
        let mut new_faces = Vec::with_capacity(n - 2);
        let mut from_apex = vec![og_halfedges[0]];
        for _ in 1..=(n - 3) {
            new_faces.push(mesh.alloc_face(None));
            from_apex.push(mesh.alloc_halfedge(HalfEdge::default()));
        }
        new_faces.push(f);

        for i in 1..=(n - 3) {
            let diagonal = mesh.alloc_edge(None);
            let from_v = from_apex[i];
            let to_v = mesh.alloc_halfedge(HalfEdge::default());
            let diag_dst = mesh.at_halfedge(og_halfedges[i + 1]).vertex().end();

            //                 next,             twin,   vertex,   edge,     face
            mesh.set_neighbors(
                to_v,
                from_apex[i - 1],
                from_v,
                diag_dst,
                diagonal,
                Some(new_faces[i - 1]),
            );
            mesh.set_neighbors(
                from_v,
                og_halfedges[i + 1],
                to_v,
                apex,
                diagonal,
                Some(new_faces[i]),
            );

            mesh[og_halfedges[i]].next = Some(to_v);
            mesh[og_halfedges[i]].face = Some(new_faces[i - 1]);

            mesh[new_faces[i - 1]].halfedge = Some(to_v);
            mesh[diagonal].halfedge = Some(from_v);
        }

        // The first and last fan triangle reuse two of the original sides
        mesh[og_halfedges[0]].face = Some(new_faces[0]);
        mesh[f].halfedge = Some(og_halfedges[n - 1]);
        mesh[og_halfedges[n - 1]].next = Some(*from_apex.last().expect("at least one"));
    }
}

/// Scratch output of the subdivision position kernels: one position for
/// every vertex, edge and face of the original mesh. The subdivision driver
/// turns each of them into a vertex of the refined mesh.
#[derive(Debug, Clone, Default)]
pub struct SubdividePositions {
    pub vertices: SecondaryMap<VertexId, Vec3>,
    pub edges: SecondaryMap<EdgeId, Vec3>,
    pub faces: SecondaryMap<FaceId, Vec3>,
}

/// Piecewise-linear subdivision positions: vertices stay put, edge points
/// land on edge midpoints and face points on the face vertex average.
pub fn linear_subdivide_positions(
    mesh: &MeshConnectivity,
    positions: &Positions,
) -> SubdividePositions {
    let mut sub = SubdividePositions::default();

    for (v, _) in mesh.iter_vertices() {
        sub.vertices.insert(v, positions[v]);
    }
    for (e, _) in mesh.iter_edges() {
        sub.edges.insert(e, mesh.edge_midpoint(positions, e));
    }
    for (f, _) in mesh.iter_faces() {
        sub.faces.insert(f, mesh.face_vertex_average(positions, f));
    }

    sub
}

/// Catmull-Clark subdivision positions. Face points first, then edge points
/// from the endpoints and the two neighboring face points, then vertex
/// points from the `(Q + 2R + (n-3)p) / n` stencil, where `Q` averages the
/// surrounding face points and `R` the *original* edge midpoints.
///
/// Meant for closed meshes. Edge points of boundary edges fall back to the
/// plain midpoint.
pub fn catmullclark_subdivide_positions(
    mesh: &MeshConnectivity,
    positions: &Positions,
) -> SubdividePositions {
    let mut sub = SubdividePositions::default();

    for (f, _) in mesh.iter_faces() {
        sub.faces.insert(f, mesh.face_vertex_average(positions, f));
    }

    for (e, _) in mesh.iter_edges() {
        let h = mesh.at_edge(e).halfedge().end();
        let f_l = mesh.at_halfedge(h).face_or_boundary().expect("valid halfedge");
        let f_r = mesh.at_halfedge(h).twin().face_or_boundary().expect("valid halfedge");
        let (a, b) = mesh.edge_endpoints(e);
        let point = match (f_l, f_r) {
            (Some(f_l), Some(f_r)) => {
                (sub.faces[f_l] + sub.faces[f_r] + positions[a] + positions[b]) / 4.0
            }
            _ => (positions[a] + positions[b]) / 2.0,
        };
        sub.edges.insert(e, point);
    }

    for (v, _) in mesh.iter_vertices() {
        let outgoing = mesh
            .at_vertex(v)
            .outgoing_halfedges()
            .expect("valid vertex");
        let n = outgoing.len() as f32;

        let mut face_point_avg = Vec3::ZERO;
        let mut edge_mid_avg = Vec3::ZERO;
        for h in outgoing.iter_cpy() {
            if let Some(f) = mesh.at_halfedge(h).face_or_boundary().expect("valid") {
                face_point_avg += sub.faces[f];
            }
            let e = mesh.at_halfedge(h).edge().end();
            edge_mid_avg += mesh.edge_midpoint(positions, e);
        }
        face_point_avg /= n;
        edge_mid_avg /= n;

        sub.vertices.insert(
            v,
            (face_point_avg + 2.0 * edge_mid_avg + (n - 3.0) * positions[v]) / n,
        );
    }

    sub
}

/// Builds the refined mesh described by a [`SubdividePositions`]: every
/// original vertex, edge and face becomes a vertex, and every corner of
/// every face contributes one quad connecting its vertex point, the two
/// neighboring edge points and the face point.
pub fn subdivide(mesh: &HalfEdgeMesh, sub: &SubdividePositions) -> Result<HalfEdgeMesh> {
    let conn = &mesh.connectivity;

    let mut new_positions = Vec::<Vec3>::new();
    let mut vertex_index = SecondaryMap::<VertexId, u32>::new();
    let mut edge_index = SecondaryMap::<EdgeId, u32>::new();
    let mut face_index = SecondaryMap::<FaceId, u32>::new();

    for (v, _) in conn.iter_vertices() {
        vertex_index.insert(v, new_positions.len() as u32);
        new_positions.push(sub.vertices[v]);
    }
    for (e, _) in conn.iter_edges() {
        edge_index.insert(e, new_positions.len() as u32);
        new_positions.push(sub.edges[e]);
    }
    for (f, _) in conn.iter_faces() {
        face_index.insert(f, new_positions.len() as u32);
        new_positions.push(sub.faces[f]);
    }

    let mut quads = Vec::<[u32; 4]>::new();
    for (f, _) in conn.iter_faces() {
        for h in conn.face_edges(f) {
            let v = conn.at_halfedge(h).vertex().try_end()?;
            let e = conn.at_halfedge(h).edge().try_end()?;
            let e_prev = conn.at_halfedge(h).previous().edge().try_end()?;
            quads.push([
                vertex_index[v],
                edge_index[e],
                face_index[f],
                edge_index[e_prev],
            ]);
        }
    }

    HalfEdgeMesh::build_from_polygons(&new_positions, &quads)
}

/// Runs the linear position kernel and rebuilds the mesh as quads.
pub fn linear_subdivide(mesh: &mut HalfEdgeMesh) -> Result<()> {
    let sub = linear_subdivide_positions(&mesh.connectivity, &mesh.positions);
    *mesh = subdivide(mesh, &sub)?;
    Ok(())
}

/// Runs the Catmull-Clark position kernel and rebuilds the mesh as quads.
pub fn catmullclark_subdivide(mesh: &mut HalfEdgeMesh) -> Result<()> {
    let sub = catmullclark_subdivide_positions(&mesh.connectivity, &mesh.positions);
    *mesh = subdivide(mesh, &sub)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::halfedge::primitives;

    #[test]
    fn test_triangulate_cube() {
        let mut mesh = primitives::Box::build(Vec3::ZERO, Vec3::ONE).unwrap();
        triangulate(&mut mesh.connectivity);
        mesh.connectivity.check_integrity().unwrap();

        assert_eq!(mesh.connectivity.num_vertices(), 8);
        assert_eq!(mesh.connectivity.num_edges(), 18);
        assert_eq!(mesh.connectivity.num_faces(), 12);
        for (f, _) in mesh.connectivity.iter_faces() {
            assert_eq!(mesh.connectivity.num_face_edges(f), 3);
        }
    }

    #[test]
    fn test_triangulate_is_idempotent_on_triangle_meshes() {
        let mut mesh = primitives::Octahedron::build(Vec3::ZERO, 1.0).unwrap();
        triangulate(&mut mesh.connectivity);
        assert_eq!(mesh.connectivity.num_faces(), 8);
        triangulate(&mut mesh.connectivity);
        assert_eq!(mesh.connectivity.num_faces(), 8);
        assert_eq!(mesh.connectivity.num_edges(), 12);
        mesh.connectivity.check_integrity().unwrap();
    }

    #[test]
    fn test_triangulate_pentagon() {
        let points = (0..5)
            .map(|i| {
                let a = std::f32::consts::TAU * i as f32 / 5.0;
                Vec3::new(a.cos(), 0.0, a.sin())
            })
            .collect_vec();
        let mut mesh = primitives::Polygon::build_from_points(points).unwrap();
        triangulate(&mut mesh.connectivity);
        mesh.connectivity.check_integrity().unwrap();

        assert_eq!(mesh.connectivity.num_vertices(), 5);
        assert_eq!(mesh.connectivity.num_edges(), 7);
        assert_eq!(mesh.connectivity.num_faces(), 3);
    }

    #[test]
    fn test_linear_subdivide_positions() {
        let mesh = primitives::Quad::build(Vec3::ZERO, Vec3::Y, Vec3::X, Vec2::splat(2.0)).unwrap();
        let sub = linear_subdivide_positions(&mesh.connectivity, &mesh.positions);

        let (f, _) = mesh.connectivity.iter_faces().next().unwrap();
        assert!(sub.faces[f].abs_diff_eq(Vec3::ZERO, 1e-6));

        for (e, _) in mesh.connectivity.iter_edges() {
            let (a, b) = mesh.connectivity.edge_endpoints(e);
            let expected = (mesh.positions[a] + mesh.positions[b]) * 0.5;
            assert!(sub.edges[e].abs_diff_eq(expected, 1e-6));
        }
        for (v, _) in mesh.connectivity.iter_vertices() {
            assert!(sub.vertices[v].abs_diff_eq(mesh.positions[v], 1e-6));
        }
    }

    #[test]
    fn test_linear_subdivide_preserves_flat_configurations() {
        let mut mesh =
            primitives::Quad::build(Vec3::ZERO, Vec3::Y, Vec3::X, Vec2::splat(2.0)).unwrap();
        linear_subdivide(&mut mesh).unwrap();
        mesh.connectivity.check_integrity().unwrap();

        assert_eq!(mesh.connectivity.num_vertices(), 9);
        assert_eq!(mesh.connectivity.num_faces(), 4);
        for (_, p) in mesh.positions.iter() {
            assert!(p.y.abs() < 1e-6, "linear subdivision must not leave the plane");
        }
    }

    #[test]
    fn test_catmullclark_positions_on_cube() {
        // A cube spanning [-1, 1]^3
        let mesh = primitives::Box::build(Vec3::ZERO, Vec3::splat(2.0)).unwrap();
        let conn = &mesh.connectivity;
        let sub = catmullclark_subdivide_positions(conn, &mesh.positions);

        // Face points are the face centroids, at the center of each side
        for (f, _) in conn.iter_faces() {
            let p = sub.faces[f];
            assert!((p.length() - 1.0).abs() < 1e-5);
            let max = p.abs().max_element();
            assert!((max - 1.0).abs() < 1e-5);
        }

        // Edge points follow the four-point average rule. For the cube,
        // that's two coordinates at 3/4 and one at zero.
        for (e, _) in conn.iter_edges() {
            let sorted = {
                let p = sub.edges[e].abs();
                let mut c = [p.x, p.y, p.z];
                c.sort_by(f32::total_cmp);
                c
            };
            assert!(sorted[0].abs() < 1e-5);
            assert!((sorted[1] - 0.75).abs() < 1e-5);
            assert!((sorted[2] - 0.75).abs() < 1e-5);
        }

        // Cube corners have degree three: new position is (Q + 2R) / 3,
        // which lands at 5/9 of the corner coordinates.
        for (v, _) in conn.iter_vertices() {
            let expected = mesh.positions[v] * (5.0 / 9.0);
            assert!(sub.vertices[v].abs_diff_eq(expected, 1e-5));
        }
    }

    #[test]
    fn test_catmullclark_subdivide_cube_counts() {
        let mut mesh = primitives::Box::build(Vec3::ZERO, Vec3::splat(2.0)).unwrap();
        catmullclark_subdivide(&mut mesh).unwrap();
        mesh.connectivity.check_integrity().unwrap();

        // V + E + F vertices, one quad per original face corner
        assert_eq!(mesh.connectivity.num_vertices(), 8 + 12 + 6);
        assert_eq!(mesh.connectivity.num_faces(), 24);
        assert_eq!(mesh.connectivity.num_edges(), 48);
        for (f, _) in mesh.connectivity.iter_faces() {
            assert_eq!(mesh.connectivity.num_face_edges(f), 4);
        }
    }

    #[test]
    fn test_subdivide_driver_on_open_mesh() {
        let mut mesh = primitives::TriGrid::build(2, 1.0).unwrap();
        linear_subdivide(&mut mesh).unwrap();
        mesh.connectivity.check_integrity().unwrap();

        // 9 + 16 + 8 element vertices, three quads per triangle
        assert_eq!(mesh.connectivity.num_vertices(), 9 + 16 + 8);
        assert_eq!(mesh.connectivity.num_faces(), 24);
    }
}
