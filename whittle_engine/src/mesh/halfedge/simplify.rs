// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;

use float_ord::FloatOrd;
use slotmap::SecondaryMap;

use crate::mesh::halfedge::edit_ops;
use crate::prelude::*;

/// Below this determinant magnitude the quadric system is considered
/// singular and the optimal point falls back to the edge midpoint.
const DET_EPSILON: f32 = 1e-4;

/// The outer product `a bᵀ` as a 4x4 matrix.
fn outer_product(a: Vec4, b: Vec4) -> Mat4 {
    Mat4::from_cols(a * b.x, a * b.y, a * b.z, a * b.w)
}

/// The quadric of a face: for the supporting plane `n·p + d = 0`, the
/// matrix `K = (n,d)(n,d)ᵀ`, so that `xᵀKx` is the squared distance of a
/// homogeneous point `x` to the plane. None for degenerate faces.
fn face_quadric(mesh: &MeshConnectivity, positions: &Positions, f: FaceId) -> Option<Mat4> {
    let normal = mesh.face_normal(positions, f)?;
    let p = positions[mesh.face_vertices(f)[0]];
    let plane = normal.extend(-normal.dot(p));
    Some(outer_product(plane, plane))
}

/// A candidate edge collapse: the position minimizing the combined quadric
/// error of the edge endpoints, and the error at that position.
#[derive(Debug, Clone, Copy)]
pub struct EdgeRecord {
    pub edge: EdgeId,
    pub optimal: Vec3,
    pub cost: f32,
}

impl EdgeRecord {
    pub fn new(
        mesh: &MeshConnectivity,
        positions: &Positions,
        vertex_quadrics: &SecondaryMap<VertexId, Mat4>,
        e: EdgeId,
    ) -> Self {
        let (va, vb) = mesh.edge_endpoints(e);
        let k = vertex_quadrics[va] + vertex_quadrics[vb];

        // Minimizing xᵀKx over positions means solving A x = b with A the
        // upper-left 3x3 block of K and b the negated fourth column.
        let a = Mat4::from_cols(
            Vec4::new(k.x_axis.x, k.x_axis.y, k.x_axis.z, 0.0),
            Vec4::new(k.y_axis.x, k.y_axis.y, k.y_axis.z, 0.0),
            Vec4::new(k.z_axis.x, k.z_axis.y, k.z_axis.z, 0.0),
            Vec4::new(0.0, 0.0, 0.0, 1.0),
        );
        let b = -k.w_axis.truncate();

        let optimal = if a.determinant().abs() > DET_EPSILON {
            (a.inverse() * b.extend(1.0)).truncate()
        } else {
            // Singular quadric: the minimum is a line or plane, not a
            // point. The midpoint is always on it for flat neighborhoods.
            mesh.edge_midpoint(positions, e)
        };

        let x = optimal.extend(1.0);
        let cost = x.dot(k * x);

        Self {
            edge: e,
            optimal,
            cost,
        }
    }
}

// Records are ordered by cost, with the edge id as a tie-breaker so that
// the order is total and deterministic.
impl PartialEq for EdgeRecord {
    fn eq(&self, other: &Self) -> bool {
        FloatOrd(self.cost) == FloatOrd(other.cost) && self.edge == other.edge
    }
}
impl Eq for EdgeRecord {}
impl PartialOrd for EdgeRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for EdgeRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        FloatOrd(self.cost)
            .cmp(&FloatOrd(other.cost))
            .then_with(|| self.edge.cmp(&other.edge))
    }
}

/// A minimum-priority queue that also supports removing an arbitrary item,
/// not just the top. Backed by an ordered set, so items double as their own
/// priorities and must order totally.
#[derive(Debug)]
pub struct PQueue<T: Ord> {
    items: BTreeSet<T>,
}

impl<T: Ord> Default for PQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord> PQueue<T> {
    pub fn new() -> Self {
        Self {
            items: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, item: T) {
        self.items.insert(item);
    }

    /// Removes a specific item, which may or may not be the top. Returns
    /// whether it was present.
    pub fn remove(&mut self, item: &T) -> bool {
        self.items.remove(item)
    }

    pub fn top(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_first()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Greedy quadric-error simplification. Repeatedly collapses the edge with
/// the lowest quadric cost, placing the surviving vertex at the optimal
/// position, until the face count drops to a quarter of the original (but
/// no lower than four) or nothing can be collapsed anymore.
///
/// Returns false without touching the mesh when it is not a triangle mesh.
pub fn simplify(mesh: &mut MeshConnectivity, positions: &mut Positions) -> bool {
    if mesh.iter_faces().any(|(f, _)| mesh.num_face_edges(f) != 3) {
        return false;
    }

    let initial_faces = mesh.num_faces();
    let target_faces = (initial_faces / 4).max(4);

    // Face quadrics, then vertex quadrics as the sum over incident faces
    let mut face_quadrics = SecondaryMap::<FaceId, Mat4>::new();
    for (f, _) in mesh.iter_faces() {
        face_quadrics.insert(f, face_quadric(mesh, positions, f).unwrap_or(Mat4::ZERO));
    }
    let mut vertex_quadrics = SecondaryMap::<VertexId, Mat4>::new();
    for (v, _) in mesh.iter_vertices() {
        let mut sum = Mat4::ZERO;
        for f in mesh
            .at_vertex(v)
            .adjacent_faces()
            .unwrap_or_default()
            .iter_cpy()
        {
            sum += face_quadrics[f];
        }
        vertex_quadrics.insert(v, sum);
    }

    // One record per edge, in both the queue and a by-edge map
    let mut records = SecondaryMap::<EdgeId, EdgeRecord>::new();
    let mut queue = PQueue::<EdgeRecord>::new();
    for (e, _) in mesh.iter_edges() {
        let record = EdgeRecord::new(mesh, positions, &vertex_quadrics, e);
        queue.insert(record);
        records.insert(e, record);
    }

    while mesh.num_faces() > target_faces && !queue.is_empty() {
        // Walk down the queue until a collapsible record shows up. The ones
        // stepped over go back in unchanged: their cost only changes when a
        // neighboring collapse rebuilds them.
        let mut skipped = Vec::new();
        let chosen = loop {
            match queue.top().copied() {
                Some(record) if edit_ops::can_collapse_edge(mesh, record.edge) => {
                    break Some(record)
                }
                Some(record) => {
                    queue.pop();
                    skipped.push(record);
                }
                None => break None,
            }
        };
        for record in skipped {
            queue.insert(record);
        }
        let Some(chosen) = chosen else {
            // Nothing in the queue can be collapsed anymore
            break;
        };

        queue.remove(&chosen);
        records.remove(chosen.edge);

        let (va, vb) = mesh.edge_endpoints(chosen.edge);
        let combined_quadric = vertex_quadrics[va] + vertex_quadrics[vb];

        // Drop every record touching either endpoint; they will be rebuilt
        // around the collapsed vertex.
        for v in [va, vb] {
            for h in mesh
                .at_vertex(v)
                .outgoing_halfedges()
                .unwrap_or_default()
                .iter_cpy()
            {
                let e = mesh.at_halfedge(h).edge().end();
                if let Some(record) = records.remove(e) {
                    queue.remove(&record);
                }
            }
        }

        let m = match edit_ops::collapse_edge_erase(mesh, positions, chosen.edge) {
            Ok(m) => m,
            Err(_) => continue,
        };
        positions.insert(m, chosen.optimal);
        vertex_quadrics.insert(m, combined_quadric);

        // Fresh records for every edge around the new vertex
        for h in mesh
            .at_vertex(m)
            .outgoing_halfedges()
            .unwrap_or_default()
            .iter_cpy()
        {
            let e = mesh.at_halfedge(h).edge().end();
            let record = EdgeRecord::new(mesh, positions, &vertex_quadrics, e);
            queue.insert(record);
            records.insert(e, record);
        }
    }

    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::halfedge::primitives;

    #[test]
    fn test_pqueue_orders_and_removes() {
        let mut queue = PQueue::new();
        queue.insert(3);
        queue.insert(1);
        queue.insert(2);
        assert_eq!(queue.top(), Some(&1));
        assert!(queue.remove(&2));
        assert!(!queue.remove(&2));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flat_edge_record_has_zero_cost() {
        let mesh = primitives::TriGrid::build(2, 1.0).unwrap();
        let conn = &mesh.connectivity;

        let mut face_quadrics = SecondaryMap::new();
        for (f, _) in conn.iter_faces() {
            face_quadrics.insert(f, face_quadric(conn, &mesh.positions, f).unwrap());
        }
        let mut vertex_quadrics = SecondaryMap::new();
        for (v, _) in conn.iter_vertices() {
            let mut sum = Mat4::ZERO;
            for f in conn.at_vertex(v).adjacent_faces().unwrap().iter_cpy() {
                sum += face_quadrics[f];
            }
            vertex_quadrics.insert(v, sum);
        }

        for (e, _) in conn.iter_edges() {
            let record = EdgeRecord::new(conn, &mesh.positions, &vertex_quadrics, e);
            // All faces are coplanar: any point of the plane is optimal and
            // costs nothing.
            assert!(record.cost.abs() < 1e-5);
            assert!(record.optimal.z.abs() < 1e-5);
        }
    }

    #[test]
    fn test_quadric_measures_plane_distance() {
        // The quadric of the z = 0 plane
        let plane = Vec4::new(0.0, 0.0, 1.0, 0.0);
        let k = outer_product(plane, plane);
        let x = Vec3::new(5.0, 3.0, 2.0).extend(1.0);
        assert!((x.dot(k * x) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_simplify_octahedron_reaches_target() {
        let mut mesh = primitives::Octahedron::build(Vec3::ZERO, 1.0).unwrap();
        assert!(simplify(&mut mesh.connectivity, &mut mesh.positions));
        mesh.connectivity.check_integrity().unwrap();

        // Target is max(8 / 4, 4) = 4 faces
        assert_eq!(mesh.connectivity.num_faces(), 4);
        let euler = mesh.connectivity.num_vertices() as i64
            - mesh.connectivity.num_edges() as i64
            + mesh.connectivity.num_faces() as i64;
        assert_eq!(euler, 2);
    }

    #[test]
    fn test_simplify_subdivided_mesh() {
        let mut mesh = primitives::Octahedron::build(Vec3::ZERO, 1.0).unwrap();
        crate::mesh::halfedge::remesh::loop_subdivide(&mut mesh.connectivity, &mut mesh.positions);
        let before = mesh.connectivity.num_faces();

        assert!(simplify(&mut mesh.connectivity, &mut mesh.positions));
        mesh.connectivity.check_integrity().unwrap();

        assert!(mesh.connectivity.num_faces() <= before / 4);
        assert!(mesh.connectivity.num_faces() >= 4);
    }

    #[test]
    fn test_simplify_flat_grid_stays_planar() {
        let mut mesh = primitives::TriGrid::build(4, 1.0).unwrap();
        let before = mesh.connectivity.num_faces();

        assert!(simplify(&mut mesh.connectivity, &mut mesh.positions));
        mesh.connectivity.check_integrity().unwrap();

        // Interior collapses cost nothing and optimal placement keeps every
        // surviving vertex on the grid plane.
        assert!(mesh.connectivity.num_faces() < before);
        for (v, _) in mesh.connectivity.iter_vertices() {
            assert!(mesh.positions[v].z.abs() < 1e-4);
        }
    }

    #[test]
    fn test_simplify_refuses_quads() {
        let mut mesh = primitives::Box::build(Vec3::ZERO, Vec3::ONE).unwrap();
        assert!(!simplify(&mut mesh.connectivity, &mut mesh.positions));
        assert_eq!(mesh.connectivity.num_faces(), 6);
    }
}
