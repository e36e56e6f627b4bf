// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slotmap::SecondaryMap;

use crate::mesh::halfedge::edit_ops;
use crate::prelude::*;

/// How much of the tangential pull towards the neighbor centroid is applied
/// per smoothing step.
const SMOOTHING_LAMBDA: f32 = 0.5;

/// One level of Loop subdivision. Every triangle becomes four, with vertex
/// positions taken from the Loop even/odd stencils.
///
/// Only defined for closed triangle meshes; any other input is left
/// untouched.
pub fn loop_subdivide(mesh: &mut MeshConnectivity, positions: &mut Positions) {
    let is_closed_triangle_mesh = mesh
        .iter_faces()
        .all(|(f, _)| mesh.num_face_edges(f) == 3)
        && mesh.iter_edges().all(|(e, _)| !mesh.is_boundary_edge(e));
    if !is_closed_triangle_mesh {
        return;
    }

    // Updated positions for the original vertices, using the Loop stencil
    // for even vertices. Everything is computed on the coarse mesh, before
    // any connectivity changes.
    let mut vertex_new_pos = SecondaryMap::<VertexId, Vec3>::new();
    let mut vertex_is_new = SecondaryMap::<VertexId, bool>::new();
    for (v, _) in mesh.iter_vertices() {
        let neighbors = mesh.vertex_neighbors(v);
        let n = neighbors.len() as f32;
        let u = if neighbors.len() == 3 {
            3.0 / 16.0
        } else {
            3.0 / (8.0 * n)
        };
        let neighbor_sum = neighbors
            .iter()
            .fold(Vec3::ZERO, |acc, w| acc + positions[*w]);
        vertex_new_pos.insert(v, positions[v] * (1.0 - n * u) + neighbor_sum * u);
        vertex_is_new.insert(v, false);
    }

    // Positions of the odd (edge) vertices: 3/8 of the endpoints plus 1/8 of
    // the two opposite vertices.
    let mut edge_new_pos = SecondaryMap::<EdgeId, Vec3>::new();
    let mut edge_is_new = SecondaryMap::<EdgeId, bool>::new();
    let original_edges = mesh.iter_edges().map(|(e, _)| e).collect_vec();
    for &e in &original_edges {
        let (a, b) = mesh.edge_endpoints(e);
        let h = mesh.at_edge(e).halfedge().end();
        let c = mesh.at_halfedge(h).next().next().vertex().end();
        let d = mesh.at_halfedge(h).twin().next().next().vertex().end();
        edge_new_pos.insert(
            e,
            (positions[a] + positions[b]) * (3.0 / 8.0) + (positions[c] + positions[d]) * (1.0 / 8.0),
        );
        edge_is_new.insert(e, false);
    }

    // Split every edge of the coarse mesh. The two collinear halves keep
    // their is_new = false mark, the two perpendicular edges are new.
    for &e in &original_edges {
        let (a, b) = mesh.edge_endpoints(e);
        let point = edge_new_pos[e];
        let m = match edit_ops::split_edge(mesh, positions, e) {
            Ok(m) => m,
            Err(_) => continue,
        };
        vertex_is_new.insert(m, true);
        vertex_new_pos.insert(m, point);

        for h in mesh
            .at_vertex(m)
            .outgoing_halfedges()
            .expect("split vertex has a fan")
        {
            let split_e = mesh.at_halfedge(h).edge().end();
            let dst = mesh.at_halfedge(h).twin().vertex().end();
            let collinear = dst == a || dst == b;
            edge_is_new.insert(split_e, !collinear);
        }
    }

    // Flip every new edge that connects an old and a new vertex
    let flip_candidates = mesh
        .iter_edges()
        .map(|(e, _)| e)
        .filter(|e| edge_is_new.get(*e).copied().unwrap_or(false))
        .collect_vec();
    for e in flip_candidates {
        let (a, b) = mesh.edge_endpoints(e);
        let a_is_new = vertex_is_new.get(a).copied().unwrap_or(false);
        let b_is_new = vertex_is_new.get(b).copied().unwrap_or(false);
        if a_is_new != b_is_new {
            let _ = edit_ops::flip_edge(mesh, e);
        }
    }

    // Move everything to its subdivided position
    let vertices = mesh.iter_vertices().map(|(v, _)| v).collect_vec();
    for v in vertices {
        if let Some(p) = vertex_new_pos.get(v) {
            positions.insert(v, *p);
        }
    }
}

/// Incremental isotropic remeshing: five rounds of edge splits, collapses,
/// degree-equalizing flips and tangential smoothing, pulling all edge
/// lengths towards the mesh's mean edge length.
///
/// Returns false without touching the mesh when it is not a triangle mesh.
pub fn isotropic_remesh(mesh: &mut MeshConnectivity, positions: &mut Positions) -> bool {
    if mesh.iter_faces().any(|(f, _)| mesh.num_face_edges(f) != 3) {
        return false;
    }
    let target = mesh.mean_edge_length(positions);
    if target <= 0.0 {
        return false;
    }
    let high = target * 4.0 / 3.0;
    let low = target * 4.0 / 5.0;

    for _ in 0..5 {
        split_long_edges(mesh, positions, high);
        collapse_short_edges(mesh, positions, low, high);
        flip_edges_to_improve_degrees(mesh);
        tangential_smooth(mesh, positions, SMOOTHING_LAMBDA);
    }

    true
}

/// Splits every interior edge longer than `high` at its midpoint. A single
/// pass over a snapshot of the edge list; the halves it creates are left
/// alone. Boundary edges are preserved, since splitting them would leave a
/// non-triangular face behind.
fn split_long_edges(mesh: &mut MeshConnectivity, positions: &mut Positions, high: f32) {
    let edges = mesh.iter_edges().map(|(e, _)| e).collect_vec();
    for e in edges {
        if !mesh.is_boundary_edge(e) && mesh.edge_length(positions, e) > high {
            let _ = edit_ops::split_edge(mesh, positions, e);
        }
    }
}

/// Collapses every edge shorter than `low`, unless doing so would create an
/// edge longer than `high`. Collapses erase edges for real, so the snapshot
/// is checked for liveness as it is consumed.
fn collapse_short_edges(
    mesh: &mut MeshConnectivity,
    positions: &mut Positions,
    low: f32,
    high: f32,
) {
    let edges = mesh.iter_edges().map(|(e, _)| e).collect_vec();
    for e in edges {
        if !mesh.edge_exists(e) || mesh.edge_length(positions, e) >= low {
            continue;
        }

        // Collapsing very short edges next to long ones would immediately
        // recreate work for the split pass. Skip those.
        let (v0, v1) = mesh.edge_endpoints(e);
        let mid = mesh.edge_midpoint(positions, e);
        let would_stretch = mesh
            .vertex_neighbors(v0)
            .iter()
            .chain(mesh.vertex_neighbors(v1).iter())
            .any(|w| positions[*w].distance(mid) > high);
        if would_stretch {
            continue;
        }

        let _ = edit_ops::collapse_edge_erase(mesh, positions, e);
    }
}

/// Flips any edge where flipping lowers the total squared deviation of the
/// four surrounding vertex degrees from the regular degree six.
fn flip_edges_to_improve_degrees(mesh: &mut MeshConnectivity) {
    let edges = mesh.iter_edges().map(|(e, _)| e).collect_vec();
    for e in edges {
        if mesh.is_boundary_edge(e) {
            continue;
        }
        let h = mesh.at_edge(e).halfedge().end();
        let t = mesh.at_halfedge(h).twin().end();

        let a = mesh.at_halfedge(h).vertex().end();
        let b = mesh.at_halfedge(t).vertex().end();
        let c = mesh.at_halfedge(h).next().next().vertex().end();
        let d = mesh.at_halfedge(t).next().next().vertex().end();

        let deviation = |v: VertexId, delta: i64| -> i64 {
            let deg = mesh.vertex_degree(v) as i64 + delta - 6;
            deg * deg
        };
        // The flip takes one edge away from the endpoints and gives it to
        // the opposite vertices
        let before = deviation(a, 0) + deviation(b, 0) + deviation(c, 0) + deviation(d, 0);
        let after = deviation(a, -1) + deviation(b, -1) + deviation(c, 1) + deviation(d, 1);

        if after < before {
            let _ = edit_ops::flip_edge(mesh, e);
        }
    }
}

/// One step of tangential Laplacian smoothing: every interior vertex moves
/// towards the centroid of its neighbors, with the movement projected onto
/// the plane orthogonal to the vertex normal so the surface shape is
/// mostly preserved.
fn tangential_smooth(mesh: &MeshConnectivity, positions: &mut Positions, lambda: f32) {
    let mut moved = Vec::new();
    for (v, _) in mesh.iter_vertices() {
        if mesh.is_boundary_vertex(v) {
            continue;
        }
        let neighbors = mesh.vertex_neighbors(v);
        if neighbors.is_empty() {
            continue;
        }
        let centroid = neighbors
            .iter()
            .fold(Vec3::ZERO, |acc, w| acc + positions[*w])
            / neighbors.len() as f32;
        let Some(normal) = mesh.vertex_normal(positions, v) else {
            continue;
        };
        let delta = centroid - positions[v];
        let tangential = delta - normal * delta.dot(normal);
        moved.push((v, positions[v] + tangential * lambda));
    }
    for (v, p) in moved {
        positions.insert(v, p);
    }
}
