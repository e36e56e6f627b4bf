// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, bail};
use smallvec::SmallVec;

use crate::prelude::*;

/* Note on refusals:

   Every local operator checks its preconditions up front and bails before
   touching the mesh. A returned error therefore always means the mesh is
   bit-identical to what the caller passed in. */

/// Rotates the edge `e` shared by two triangles, so that it connects the two
/// vertices opposite to it. No elements are created or destroyed; the ten
/// halfedges around the two triangles get rewired in place.
///
/// Refuses boundary edges and edges whose incident faces aren't triangles.
pub fn flip_edge(mesh: &mut MeshConnectivity, e: EdgeId) -> Result<EdgeId> {
    // --- Collect handles ---
    let h0 = mesh.at_edge(e).halfedge().try_end()?;
    let h3 = mesh.at_halfedge(h0).twin().try_end()?;

    if mesh.at_halfedge(h0).is_boundary()? || mesh.at_halfedge(h3).is_boundary()? {
        bail!("Cannot flip an edge on the mesh boundary");
    }

    let f0 = mesh.at_halfedge(h0).face().try_end()?;
    let f1 = mesh.at_halfedge(h3).face().try_end()?;
    if mesh.num_face_edges(f0) != 3 || mesh.num_face_edges(f1) != 3 {
        bail!("Edge flips rotate an edge between two triangles");
    }

    let h1 = mesh.at_halfedge(h0).next().try_end()?;
    let h2 = mesh.at_halfedge(h1).next().try_end()?;
    let h4 = mesh.at_halfedge(h3).next().try_end()?;
    let h5 = mesh.at_halfedge(h4).next().try_end()?;
    let h6 = mesh.at_halfedge(h1).twin().try_end()?;
    let h7 = mesh.at_halfedge(h2).twin().try_end()?;
    let h8 = mesh.at_halfedge(h4).twin().try_end()?;
    let h9 = mesh.at_halfedge(h5).twin().try_end()?;

    let v0 = mesh.at_halfedge(h0).vertex().try_end()?;
    let v1 = mesh.at_halfedge(h3).vertex().try_end()?;
    let v2 = mesh.at_halfedge(h5).vertex().try_end()?;
    let v3 = mesh.at_halfedge(h2).vertex().try_end()?;

    if v2 == v3 {
        bail!("Flipping this edge would produce a degenerate edge");
    }

    let e1 = mesh.at_halfedge(h5).edge().try_end()?;
    let e2 = mesh.at_halfedge(h4).edge().try_end()?;
    let e3 = mesh.at_halfedge(h2).edge().try_end()?;
    let e4 = mesh.at_halfedge(h1).edge().try_end()?;

    // --- Fix connectivity ---
    //                 next, twin, vertex, edge, face
    mesh.set_neighbors(h0, h1, h3, v2, e, Some(f0));
    mesh.set_neighbors(h1, h2, h7, v3, e3, Some(f0));
    mesh.set_neighbors(h2, h0, h8, v0, e2, Some(f0));
    mesh.set_neighbors(h3, h4, h0, v3, e, Some(f1));
    mesh.set_neighbors(h4, h5, h9, v2, e1, Some(f1));
    mesh.set_neighbors(h5, h3, h6, v1, e4, Some(f1));
    mesh[h6].twin = Some(h5);
    mesh[h7].twin = Some(h1);
    mesh[h8].twin = Some(h2);
    mesh[h9].twin = Some(h4);

    mesh[v0].halfedge = Some(h2);
    mesh[v1].halfedge = Some(h5);
    mesh[v2].halfedge = Some(h4);
    mesh[v3].halfedge = Some(h3);

    mesh[e].halfedge = Some(h0);
    mesh[e1].halfedge = Some(h4);
    mesh[e2].halfedge = Some(h2);
    mesh[e3].halfedge = Some(h1);
    mesh[e4].halfedge = Some(h5);

    mesh[f0].halfedge = Some(h0);
    mesh[f1].halfedge = Some(h3);

    Ok(e)
}

/// Splits the edge `e` shared by two triangles, inserting a new vertex at its
/// midpoint and replacing the two triangles by four. The canonical halfedge
/// of the returned vertex points along the original edge, not along any of
/// the newly created edges.
///
/// When one side of `e` is a boundary, the edge is only bisected: the new
/// vertex is inserted into the edge and the interior face gains a side, but
/// no face is cut.
pub fn split_edge(
    mesh: &mut MeshConnectivity,
    positions: &mut Positions,
    e: EdgeId,
) -> Result<VertexId> {
    // --- Collect handles ---
    let h0 = mesh.at_edge(e).halfedge().try_end()?;
    let h3 = mesh.at_halfedge(h0).twin().try_end()?;
    let h0_boundary = mesh.at_halfedge(h0).is_boundary()?;
    let h3_boundary = mesh.at_halfedge(h3).is_boundary()?;

    if h0_boundary && h3_boundary {
        bail!("Cannot split an edge that has no face on either side");
    }
    if h0_boundary || h3_boundary {
        // Keep the interior halfedge on the left side.
        let h_l = if h0_boundary { h3 } else { h0 };
        return bisect_edge(mesh, positions, h_l);
    }

    let f0 = mesh.at_halfedge(h0).face().try_end()?;
    let f1 = mesh.at_halfedge(h3).face().try_end()?;
    if mesh.num_face_edges(f0) != 3 || mesh.num_face_edges(f1) != 3 {
        bail!("Edge splits only work on edges between two triangles");
    }

    let h1 = mesh.at_halfedge(h0).next().try_end()?;
    let h2 = mesh.at_halfedge(h1).next().try_end()?;
    let h4 = mesh.at_halfedge(h3).next().try_end()?;
    let h5 = mesh.at_halfedge(h4).next().try_end()?;
    let h6 = mesh.at_halfedge(h1).twin().try_end()?;
    let h7 = mesh.at_halfedge(h2).twin().try_end()?;
    let h8 = mesh.at_halfedge(h4).twin().try_end()?;
    let h9 = mesh.at_halfedge(h5).twin().try_end()?;

    let v0 = mesh.at_halfedge(h0).vertex().try_end()?;
    let v1 = mesh.at_halfedge(h3).vertex().try_end()?;
    let v2 = mesh.at_halfedge(h5).vertex().try_end()?;
    let v3 = mesh.at_halfedge(h2).vertex().try_end()?;

    let e1 = mesh.at_halfedge(h5).edge().try_end()?;
    let e2 = mesh.at_halfedge(h4).edge().try_end()?;
    let e3 = mesh.at_halfedge(h2).edge().try_end()?;
    let e4 = mesh.at_halfedge(h1).edge().try_end()?;

    // --- Allocate ---
    let mid = (positions[v0] + positions[v1]) * 0.5;
    let v4 = mesh.alloc_vertex(positions, mid, None);

    let h10 = mesh.alloc_halfedge(HalfEdge::default());
    let h11 = mesh.alloc_halfedge(HalfEdge::default());
    let h12 = mesh.alloc_halfedge(HalfEdge::default());
    let h13 = mesh.alloc_halfedge(HalfEdge::default());
    let h14 = mesh.alloc_halfedge(HalfEdge::default());
    let h15 = mesh.alloc_halfedge(HalfEdge::default());

    let e5 = mesh.alloc_edge(None);
    let e6 = mesh.alloc_edge(None);
    let e7 = mesh.alloc_edge(None);

    let f2 = mesh.alloc_face(None);
    let f3 = mesh.alloc_face(None);

    // --- Fix connectivity ---
    // The old edge keeps the v0 half. e5 continues it towards v1, e6 and e7
    // are the two perpendicular edges towards v3 and v2.
    //                 next, twin, vertex, edge, face
    mesh.set_neighbors(h0, h13, h3, v0, e, Some(f0));
    mesh.set_neighbors(h1, h12, h6, v1, e4, Some(f3));
    mesh.set_neighbors(h2, h0, h7, v3, e3, Some(f0));
    mesh.set_neighbors(h3, h4, h0, v4, e, Some(f1));
    mesh.set_neighbors(h4, h14, h8, v0, e2, Some(f1));
    mesh.set_neighbors(h5, h10, h9, v2, e1, Some(f2));
    mesh.set_neighbors(h10, h15, h11, v1, e5, Some(f2));
    mesh.set_neighbors(h11, h1, h10, v4, e5, Some(f3));
    mesh.set_neighbors(h12, h11, h13, v3, e6, Some(f3));
    mesh.set_neighbors(h13, h2, h12, v4, e6, Some(f0));
    mesh.set_neighbors(h14, h3, h15, v2, e7, Some(f1));
    mesh.set_neighbors(h15, h5, h14, v4, e7, Some(f2));

    mesh[v1].halfedge = Some(h1);
    mesh[v4].halfedge = Some(h3);

    mesh[e].halfedge = Some(h0);
    mesh[e5].halfedge = Some(h10);
    mesh[e6].halfedge = Some(h12);
    mesh[e7].halfedge = Some(h14);

    mesh[f0].halfedge = Some(h0);
    mesh[f1].halfedge = Some(h3);
    mesh[f2].halfedge = Some(h5);
    mesh[f3].halfedge = Some(h1);

    Ok(v4)
}

/// Divides an edge in two, inserting a vertex at the midpoint. The halfedge
/// `h_l` must be on a face; its twin may be a boundary halfedge. No faces are
/// cut. The canonical halfedge of the returned vertex is the second half of
/// the original edge, pointing in the same direction.
fn bisect_edge(
    mesh: &mut MeshConnectivity,
    positions: &mut Positions,
    h_l: HalfEdgeId,
) -> Result<VertexId> {
    // --- Collect handles ---
    let h_r = mesh.at_halfedge(h_l).twin().try_end()?;
    let h_l_prev = mesh.at_halfedge(h_l).previous().try_end()?;
    let h_r_next = mesh.at_halfedge(h_r).next().try_end()?;
    let f_l = mesh.at_halfedge(h_l).face_or_boundary()?;
    let f_r = mesh.at_halfedge(h_r).face_or_boundary()?;
    let e = mesh.at_halfedge(h_l).edge().try_end()?;
    let (v, w) = mesh.at_halfedge(h_l).src_dst_pair()?;

    // --- Allocate ---
    let mid = (positions[v] + positions[w]) * 0.5;
    let x = mesh.alloc_vertex(positions, mid, None);
    let h_l_2 = mesh.alloc_halfedge(HalfEdge::default());
    let h_r_2 = mesh.alloc_halfedge(HalfEdge::default());
    let e_2 = mesh.alloc_edge(None);

    // --- Fix connectivity ---
    // The original halfedge pair stays on the second half, from x to w. The
    // new pair covers the first half, from v to x.
    mesh.set_neighbors(h_l_2, h_l, h_r_2, v, e_2, f_l);
    mesh.set_neighbors(h_r_2, h_r_next, h_l_2, x, e_2, f_r);
    mesh[h_l_prev].next = Some(h_l_2);
    mesh[h_l].vertex = Some(x);
    mesh[h_r].next = Some(h_r_2);

    mesh[e].halfedge = Some(h_l);
    mesh[e_2].halfedge = Some(h_l_2);

    mesh[x].halfedge = Some(h_l);
    mesh[v].halfedge = Some(h_l_2);

    Ok(x)
}

/// The combinatorial test that decides whether collapsing `e` keeps the mesh
/// manifold. Rejects boundary edges, coincident endpoints, triangle pairs
/// that already share a side edge, and endpoints that share a number of
/// neighbor vertices other than two (the standard link condition).
pub fn can_collapse_edge(mesh: &MeshConnectivity, e: EdgeId) -> bool {
    if !mesh.edge_exists(e) || mesh.is_boundary_edge(e) {
        return false;
    }

    let h0 = mesh.at_edge(e).halfedge().end();
    let h1 = mesh.at_halfedge(h0).twin().end();
    let v0 = mesh.at_halfedge(h0).vertex().end();
    let v1 = mesh.at_halfedge(h1).vertex().end();
    if v0 == v1 {
        return false;
    }

    // Two triangles stacked on top of each other, sharing a side edge with
    // the pair being collapsed, would fold into nothing.
    let h2 = mesh.at_halfedge(h0).next().end();
    let h4 = mesh.at_halfedge(h2).next().end();
    let h3 = mesh.at_halfedge(h1).next().end();
    let h5 = mesh.at_halfedge(h3).next().end();
    let e2 = mesh.at_halfedge(h2).edge().end();
    let e4 = mesh.at_halfedge(h4).edge().end();
    let e3 = mesh.at_halfedge(h3).edge().end();
    let e1 = mesh.at_halfedge(h5).edge().end();
    if e3 == e4 || e1 == e2 {
        return false;
    }

    // The endpoints must share exactly two neighbor vertices, the ones
    // opposite the edge. Any other count means the collapse would pinch the
    // surface into a non-manifold configuration.
    let n0: HashSet<VertexId> = mesh.vertex_neighbors(v0).into_iter().collect();
    let n1: HashSet<VertexId> = mesh.vertex_neighbors(v1).into_iter().collect();
    n0.intersection(&n1).count() == 2
}

/// Merges the endpoints of `e` into a new vertex placed at the edge
/// midpoint, removing the edge and degenerating its two incident faces.
/// Callers are free to overwrite the position of the returned vertex.
///
/// Refuses when [`can_collapse_edge`] does.
pub fn collapse_edge(
    mesh: &mut MeshConnectivity,
    positions: &mut Positions,
    e: EdgeId,
) -> Result<VertexId> {
    if !can_collapse_edge(mesh, e) {
        bail!("Collapsing edge {e:?} would break the mesh");
    }

    // --- Collect handles ---
    let h0 = mesh.at_edge(e).halfedge().try_end()?;
    let h1 = mesh.at_halfedge(h0).twin().try_end()?;
    let f0 = mesh.at_halfedge(h0).face().try_end()?;
    let f1 = mesh.at_halfedge(h1).face().try_end()?;
    let v0 = mesh.at_halfedge(h0).vertex().try_end()?;
    let v1 = mesh.at_halfedge(h1).vertex().try_end()?;

    let double_triangle = mesh.num_face_edges(f0) == 3 && mesh.num_face_edges(f1) == 3;

    let h0_next = mesh.at_halfedge(h0).next().try_end()?;
    let h1_next = mesh.at_halfedge(h1).next().try_end()?;
    let h0_prev = mesh.at_halfedge(h0).previous().try_end()?;
    let h1_prev = mesh.at_halfedge(h1).previous().try_end()?;

    let outgoing_v0 = mesh.at_vertex(v0).outgoing_halfedges()?;
    let outgoing_v1 = mesh.at_vertex(v1).outgoing_halfedges()?;

    // --- Fix connectivity ---
    let mid = (positions[v0] + positions[v1]) * 0.5;
    let m = mesh.alloc_vertex(positions, mid, None);

    // Re-home every halfedge that used to leave either endpoint
    for h in outgoing_v0.iter_cpy().chain(outgoing_v1.iter_cpy()) {
        mesh[h].vertex = Some(m);
    }

    if double_triangle {
        // Each triangle collapses to a single edge
        collapse_triangle_side(mesh, h0, m);
        collapse_triangle_side(mesh, h1, m);
    } else {
        // Splice `e` out of both face cycles
        mesh[f0].halfedge = Some(h0_next);
        mesh[f1].halfedge = Some(h1_next);
        mesh[h0_prev].next = Some(h0_next);
        mesh[h1_prev].next = Some(h1_next);
        mesh[m].halfedge = Some(h1_next);
    }

    // --- Remove elements ---
    // The per-side helper already erased the degenerated faces and merged
    // edges; only the collapsed edge itself and its endpoints remain.
    mesh.remove_edge(e);
    mesh.remove_halfedge(h0);
    mesh.remove_halfedge(h1);
    mesh.remove_vertex(v0);
    mesh.remove_vertex(v1);

    Ok(m)
}

/// Degenerates one triangle of a collapsing edge: the two sides that are not
/// part of the collapse merge into a single edge and the face disappears.
/// `h0` is the halfedge of the collapsing edge inside the triangle, `new_v`
/// the vertex that survives the collapse.
fn collapse_triangle_side(mesh: &mut MeshConnectivity, h0: HalfEdgeId, new_v: VertexId) {
    let face = mesh.at_halfedge(h0).face().end();
    let h1 = mesh.at_halfedge(h0).next().end();
    let h2 = mesh.at_halfedge(h1).next().end();
    let h3 = mesh.at_halfedge(h2).twin().end();
    let h4 = mesh.at_halfedge(h1).twin().end();
    let v = mesh.at_halfedge(h2).vertex().end();
    let e1 = mesh.at_halfedge(h1).edge().end();
    let e2 = mesh.at_halfedge(h2).edge().end();

    mesh[h3].twin = Some(h4);
    mesh[h4].twin = Some(h3);
    mesh[h4].edge = Some(e2);
    mesh[e2].halfedge = Some(h4);
    if mesh[v].halfedge == Some(h2) {
        mesh[v].halfedge = Some(h4);
    }
    mesh[new_v].halfedge = Some(h3);

    mesh.remove_face(face);
    mesh.remove_halfedge(h1);
    mesh.remove_halfedge(h2);
    mesh.remove_edge(e1);
}

/// Same as [`collapse_edge`], but compacts the element arenas before
/// returning, so that live element counts are exact. Remeshing and
/// simplification loops depend on this variant.
pub fn collapse_edge_erase(
    mesh: &mut MeshConnectivity,
    positions: &mut Positions,
    e: EdgeId,
) -> Result<VertexId> {
    let v = collapse_edge(mesh, positions, e)?;
    mesh.validate();
    Ok(v)
}

/// Removes `v` together with all its incident edges and faces, leaving a
/// single face whose boundary is the outer ring of `v`'s one-ring
/// neighborhood. Returns the new face.
///
/// Refuses boundary vertices and the last vertex of a mesh.
pub fn erase_vertex(mesh: &mut MeshConnectivity, v: VertexId) -> Result<FaceId> {
    if mesh.num_vertices() <= 1 {
        bail!("Cannot erase the only vertex of a mesh");
    }
    if mesh.is_boundary_vertex(v) {
        bail!("Cannot erase a vertex on the mesh boundary");
    }
    let outgoing = mesh.at_vertex(v).outgoing_halfedges()?;
    if outgoing.is_empty() {
        bail!("Vertex {v:?} is not in a face. Cannot erase");
    }

    // --- Collect handles ---
    // For every incident face, the chain of halfedges strictly between the
    // two halfedges touching `v`. These chains survive and become the cycle
    // of the new face.
    let mut chains = Vec::<SVec<HalfEdgeId>>::new();
    let mut to_delete = SmallVec::<[_; 16]>::new();
    for &h in &outgoing {
        let incoming = mesh.at_halfedge(h).previous().try_end()?;
        let mut chain = SVec::new();
        let mut hh = mesh.at_halfedge(h).next().try_end()?;
        while hh != incoming {
            chain.push(hh);
            hh = mesh.at_halfedge(hh).next().try_end()?;
        }
        chains.push(chain);

        let tw = mesh.at_halfedge(h).twin().try_end()?;
        let e = mesh.at_halfedge(h).edge().try_end()?;
        let f = mesh.at_halfedge(h).face().try_end()?;
        to_delete.push((h, tw, e, f));
    }

    // --- Fix connectivity ---
    // The fan was walked in twin-next order, which runs against the face
    // orientation. Visiting the chains in reverse restores it; the chains
    // themselves are already oriented.
    let ring = chains
        .iter()
        .rev()
        .flat_map(|chain| chain.iter_cpy())
        .collect_vec();

    let new_face = mesh.alloc_face(Some(ring[0]));
    for (&a, &b) in ring.iter().circular_tuple_windows() {
        mesh[a].next = Some(b);
    }
    for &h in &ring {
        mesh[h].face = Some(new_face);
        // Ring vertices may have been anchored to a halfedge we are about to
        // remove. Re-anchor them to the ring.
        let origin = mesh.at_halfedge(h).vertex().try_end()?;
        mesh[origin].halfedge = Some(h);
    }

    // --- Remove elements ---
    for (h, tw, e, f) in to_delete {
        mesh.remove_halfedge(h);
        mesh.remove_halfedge(tw);
        mesh.remove_edge(e);
        mesh.remove_face(f);
    }
    mesh.remove_vertex(v);

    Ok(new_face)
}

/// Removes `e` and its twin, merging their two incident faces. The face on
/// the side of `e`'s canonical halfedge is kept, the other one removed.
/// Returns the merged face.
///
/// Refuses boundary edges and edges with the same face on both sides.
pub fn erase_edge(mesh: &mut MeshConnectivity, e: EdgeId) -> Result<FaceId> {
    // --- Collect handles ---
    let h_l = mesh.at_edge(e).halfedge().try_end()?;
    let h_r = mesh.at_halfedge(h_l).twin().try_end()?;
    // If the face cannot be retrieved, a HalfEdgeHasNoFace is returned
    let f_l = mesh.at_halfedge(h_l).face().try_end()?;
    let f_r = mesh.at_halfedge(h_r).face().try_end()?;
    if f_l == f_r {
        bail!("Cannot erase an edge with the same face on both sides");
    }
    let (v, w) = mesh.at_halfedge(h_l).src_dst_pair()?;

    let h_l_nxt = mesh.at_halfedge(h_l).next().try_end()?;
    let h_l_prv = mesh.at_halfedge(h_l).previous().try_end()?;
    let h_r_nxt = mesh.at_halfedge(h_r).next().try_end()?;
    let h_r_prv = mesh.at_halfedge(h_r).previous().try_end()?;

    let halfedges_r = mesh.halfedge_loop(h_r);

    // --- Fix connectivity ---
    mesh[h_r_prv].next = Some(h_l_nxt);
    mesh[h_l_prv].next = Some(h_r_nxt);
    for h_r in halfedges_r {
        mesh[h_r].face = Some(f_l);
    }
    // Faces or vertices may point to the halfedge we're about to remove. In
    // that case we need to rotate them. We only do it in that case, to avoid
    // modifying the mesh more than necessary.
    if mesh[f_l].halfedge == Some(h_l) {
        mesh[f_l].halfedge = Some(h_l_prv);
    }
    if mesh[v].halfedge == Some(h_l) {
        mesh[v].halfedge = Some(h_r_nxt);
    }
    if mesh[w].halfedge == Some(h_r) {
        mesh[w].halfedge = Some(h_l_nxt);
    }

    // --- Remove elements ---
    mesh.remove_halfedge(h_l);
    mesh.remove_halfedge(h_r);
    mesh.remove_face(f_r);
    mesh.remove_edge(e);

    Ok(f_l)
}

/// Collapsing a whole face into a vertex is declared for API completeness
/// but not currently implemented; it always refuses.
pub fn collapse_face(_mesh: &mut MeshConnectivity, f: FaceId) -> Result<VertexId> {
    bail!("Collapsing face {f:?} is not supported")
}

/// Replaces the face `f` by a smaller inset copy of itself, connected to the
/// original boundary by a ring of quads, one per side of `f`. The inset
/// vertices start at the exact positions of the original ones; use
/// [`bevel_face_positions`] to push them inward or along the face normal as
/// the interaction progresses. Returns the inset face.
pub fn bevel_face(
    mesh: &mut MeshConnectivity,
    positions: &mut Positions,
    f: FaceId,
) -> Result<FaceId> {
    // --- Collect handles ---
    let og_halfedges = mesh.at_face(f).halfedges()?;
    let og_vertices = mesh.at_face(f).vertices()?;
    let n = og_halfedges.len();

    // --- Allocate ---
    // For every original vertex: an inset vertex, an edge connecting the
    // two, an edge to the next inset vertex, the four halfedges of those two
    // edges, and the side quad.
    let center_face = mesh.alloc_face(None);
    let mut side_faces = SVecN::<FaceId, 8>::new();
    let mut new_vertices = SVecN::<VertexId, 8>::new();
    let mut edges_to_old = SVecN::<EdgeId, 8>::new();
    let mut edges_to_next = SVecN::<EdgeId, 8>::new();
    let mut h_to_old = SVecN::<HalfEdgeId, 8>::new();
    let mut h_from_old = SVecN::<HalfEdgeId, 8>::new();
    let mut h_to_next = SVecN::<HalfEdgeId, 8>::new();
    let mut h_from_next = SVecN::<HalfEdgeId, 8>::new();
    for &og in &og_vertices {
        side_faces.push(mesh.alloc_face(None));
        new_vertices.push(mesh.alloc_vertex(positions, positions[og], None));
        edges_to_old.push(mesh.alloc_edge(None));
        edges_to_next.push(mesh.alloc_edge(None));
        h_to_old.push(mesh.alloc_halfedge(HalfEdge::default()));
        h_from_old.push(mesh.alloc_halfedge(HalfEdge::default()));
        h_to_next.push(mesh.alloc_halfedge(HalfEdge::default()));
        h_from_next.push(mesh.alloc_halfedge(HalfEdge::default()));
    }

    // --- Fix connectivity ---
    for i in 0..n {
        let next_i = (i + 1) % n;
        let prev_i = (i + n - 1) % n;

        //                 next,                 twin,           vertex,               edge,             face
        mesh.set_neighbors(
            h_to_old[i],
            og_halfedges[i],
            h_from_old[i],
            new_vertices[i],
            edges_to_old[i],
            Some(side_faces[i]),
        );
        mesh.set_neighbors(
            h_from_old[i],
            h_from_next[prev_i],
            h_to_old[i],
            og_vertices[i],
            edges_to_old[i],
            Some(side_faces[prev_i]),
        );
        mesh.set_neighbors(
            h_to_next[i],
            h_to_next[next_i],
            h_from_next[i],
            new_vertices[i],
            edges_to_next[i],
            Some(center_face),
        );
        mesh.set_neighbors(
            h_from_next[i],
            h_to_old[i],
            h_to_next[i],
            new_vertices[next_i],
            edges_to_next[i],
            Some(side_faces[i]),
        );

        // The original boundary halfedges keep their outer twins, but now
        // belong to their side quad.
        mesh[og_halfedges[i]].next = Some(h_from_old[next_i]);
        mesh[og_halfedges[i]].face = Some(side_faces[i]);

        mesh[edges_to_old[i]].halfedge = Some(h_to_old[i]);
        mesh[edges_to_next[i]].halfedge = Some(h_to_next[i]);
        mesh[new_vertices[i]].halfedge = Some(h_to_old[i]);
        mesh[side_faces[i]].halfedge = Some(og_halfedges[i]);
    }
    mesh[center_face].halfedge = Some(h_to_next[0]);

    // --- Remove elements ---
    mesh.remove_face(f);

    Ok(center_face)
}

/// Beveling a single vertex is declared for API completeness but not
/// currently implemented; it always refuses.
pub fn bevel_vertex(
    _mesh: &mut MeshConnectivity,
    _positions: &mut Positions,
    v: VertexId,
) -> Result<FaceId> {
    bail!("Beveling vertex {v:?} is not supported")
}

/// Beveling a single edge is declared for API completeness but not
/// currently implemented; it always refuses.
pub fn bevel_edge(
    _mesh: &mut MeshConnectivity,
    _positions: &mut Positions,
    e: EdgeId,
) -> Result<FaceId> {
    bail!("Beveling edge {e:?} is not supported")
}

/// Repositions the ring of a beveled face, typically once per frame while
/// the user drags. `face` is the inset face returned by [`bevel_face`] and
/// `start_positions` the ring positions at the time of the bevel, in the
/// order of the face's halfedges. Offsets are absolute distances from the
/// start positions, not deltas from the previous call.
pub fn bevel_face_positions(
    mesh: &MeshConnectivity,
    positions: &mut Positions,
    start_positions: &[Vec3],
    face: FaceId,
    tangent_offset: f32,
    normal_offset: f32,
    flip_orientation: bool,
) -> Result<()> {
    let new_halfedges = mesh.face_edges(face);
    let n = new_halfedges.len();
    if start_positions.len() != n {
        bail!(
            "Expected {} start positions for the beveled face, got {}",
            n,
            start_positions.len()
        );
    }
    let normal_offset = if flip_orientation {
        -normal_offset
    } else {
        normal_offset
    };
    let normal = polygon_normal(start_positions)
        .ok_or_else(|| anyhow!("The beveled face has a degenerate normal"))?;

    for (i, h) in new_halfedges.iter().enumerate() {
        let pi = start_positions[i];
        let prev_position = start_positions[(i + n - 1) % n];
        let next_position = start_positions[(i + 1) % n];
        let i_to_prev = (prev_position - pi).normalize_or_zero();
        let i_to_next = (next_position - pi).normalize_or_zero();
        let tangent = (i_to_prev + i_to_next) / (2.0_f32.sqrt() / 2.0);

        let v = mesh.at_halfedge(*h).vertex().try_end()?;
        positions[v] = pi + normal_offset * normal + tangent_offset * tangent;
    }
    Ok(())
}

/// Position follow-up for [`bevel_vertex`]. Since the core does not produce
/// vertex bevels, this leaves all positions unchanged.
pub fn bevel_vertex_positions(
    _mesh: &MeshConnectivity,
    _positions: &mut Positions,
    _start_positions: &[Vec3],
    _face: FaceId,
    _tangent_offset: f32,
) -> Result<()> {
    Ok(())
}

/// Position follow-up for [`bevel_edge`]. Since the core does not produce
/// edge bevels, this leaves all positions unchanged.
pub fn bevel_edge_positions(
    _mesh: &MeshConnectivity,
    _positions: &mut Positions,
    _start_positions: &[Vec3],
    _face: FaceId,
    _tangent_offset: f32,
) -> Result<()> {
    Ok(())
}

/// The unnormalized Newell normal of a polygon, normalized before returning.
/// None when the polygon is degenerate.
fn polygon_normal(points: &[Vec3]) -> Option<Vec3> {
    let mut normal = Vec3::ZERO;
    for (a, b) in points.iter().circular_tuple_windows() {
        normal += a.cross(*b);
    }
    (normal.length_squared() > 0.0).then(|| normal.normalize())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::halfedge::primitives;

    fn euler_counts(conn: &MeshConnectivity) -> (usize, usize, usize) {
        (conn.num_vertices(), conn.num_edges(), conn.num_faces())
    }

    #[test]
    fn test_flip_octahedron_edge() {
        let mut mesh = primitives::Octahedron::build(Vec3::ZERO, 1.0).unwrap();
        let conn = &mut mesh.connectivity;

        let (e, _) = conn.iter_edges().next().unwrap();
        let (old_a, old_b) = conn.edge_endpoints(e);
        let h = conn.at_edge(e).halfedge().end();
        let opp_0 = conn.at_halfedge(h).next().next().vertex().end();
        let opp_1 = conn.at_halfedge(h).twin().next().next().vertex().end();

        let flipped = flip_edge(conn, e).unwrap();
        assert_eq!(flipped, e);
        conn.check_integrity().unwrap();

        // No elements created or destroyed
        assert_eq!(euler_counts(conn), (6, 12, 8));
        // Both faces are still triangles and the edge now connects the
        // opposite vertices
        let (a, b) = conn.edge_endpoints(e);
        assert_eq!(
            HashSet::from([a, b]),
            HashSet::from([opp_0, opp_1]),
            "flipped edge should connect the two opposite vertices"
        );
        for (f, _) in conn.iter_faces() {
            assert_eq!(conn.num_face_edges(f), 3);
        }
        // The total degree (twice the edge count) is preserved
        let total_degree: usize = conn.iter_vertices().map(|(v, _)| conn.vertex_degree(v)).sum();
        assert_eq!(total_degree, 24);

        // Flipping again restores the original connectivity
        flip_edge(conn, e).unwrap();
        conn.check_integrity().unwrap();
        let (a, b) = conn.edge_endpoints(e);
        assert_eq!(HashSet::from([a, b]), HashSet::from([old_a, old_b]));
    }

    #[test]
    fn test_flip_refuses_boundary() {
        let mesh = primitives::TriGrid::build(2, 1.0).unwrap();
        let mut conn = mesh.connectivity;
        let boundary_edge = conn
            .iter_edges()
            .map(|(e, _)| e)
            .find(|e| conn.is_boundary_edge(*e))
            .unwrap();
        let before = euler_counts(&conn);
        assert!(flip_edge(&mut conn, boundary_edge).is_err());
        assert_eq!(euler_counts(&conn), before);
        conn.check_integrity().unwrap();
    }

    #[test]
    fn test_split_tetrahedron_edge() {
        let mut mesh = primitives::Tetrahedron::build(Vec3::ZERO, 1.0).unwrap();
        let conn = &mut mesh.connectivity;
        let positions = &mut mesh.positions;

        let (e, _) = conn.iter_edges().next().unwrap();
        let (v0, v1) = conn.edge_endpoints(e);
        let expected_mid = (positions[v0] + positions[v1]) * 0.5;

        let m = split_edge(conn, positions, e).unwrap();
        conn.check_integrity().unwrap();

        assert_eq!(euler_counts(conn), (5, 9, 6));
        assert!(positions[m].abs_diff_eq(expected_mid, 1e-6));

        // The canonical halfedge of the new vertex runs along the original
        // edge direction
        let dst = conn.at_vertex(m).halfedge().dst_vertex().end();
        assert!(dst == v0 || dst == v1);

        for (f, _) in conn.iter_faces() {
            assert_eq!(conn.num_face_edges(f), 3);
        }
    }

    #[test]
    fn test_split_then_collapse_roundtrip() {
        let mut mesh = primitives::Tetrahedron::build(Vec3::ZERO, 1.0).unwrap();
        let conn = &mut mesh.connectivity;
        let positions = &mut mesh.positions;

        let (e, _) = conn.iter_edges().next().unwrap();
        let m = split_edge(conn, positions, e).unwrap();

        // Collapse the half of the split edge that remains attached to the
        // new vertex. This undoes the split up to handle renaming.
        let along = conn.at_vertex(m).halfedge().edge().end();
        let v = collapse_edge_erase(conn, positions, along).unwrap();
        conn.check_integrity().unwrap();

        assert_eq!(euler_counts(conn), (4, 6, 4));
        assert!(conn.vertex_exists(v));
    }

    #[test]
    fn test_split_boundary_edge_bisects() {
        let mut mesh = primitives::TriGrid::build(1, 1.0).unwrap();
        let conn = &mut mesh.connectivity;
        let positions = &mut mesh.positions;

        let boundary_edge = conn
            .iter_edges()
            .map(|(e, _)| e)
            .find(|e| conn.is_boundary_edge(*e))
            .unwrap();
        let before = euler_counts(conn);

        let m = split_edge(conn, positions, boundary_edge).unwrap();
        conn.check_integrity().unwrap();

        // One vertex, one edge and two halfedges; no new face
        assert_eq!(conn.num_vertices(), before.0 + 1);
        assert_eq!(conn.num_edges(), before.1 + 1);
        assert_eq!(conn.num_faces(), before.2);
        assert!(conn.is_boundary_vertex(m));
    }

    #[test]
    fn test_collapse_tetrahedron_edge_then_refuse() {
        let mut mesh = primitives::Tetrahedron::build(Vec3::ZERO, 1.0).unwrap();
        let conn = &mut mesh.connectivity;
        let positions = &mut mesh.positions;

        let (e, _) = conn.iter_edges().next().unwrap();
        assert!(can_collapse_edge(conn, e));
        collapse_edge_erase(conn, positions, e).unwrap();
        conn.check_integrity().unwrap();

        // A collapsed tetrahedron is a two-faced pillow
        assert_eq!(euler_counts(conn), (3, 3, 2));

        // No edge of the pillow passes the link condition; the mesh must be
        // left untouched by the refused collapse.
        let edges = conn.iter_edges().map(|(e, _)| e).collect_vec();
        for e in edges {
            assert!(!can_collapse_edge(conn, e));
            assert!(collapse_edge(conn, positions, e).is_err());
            assert_eq!(euler_counts(conn), (3, 3, 2));
            conn.check_integrity().unwrap();
        }
    }

    #[test]
    fn test_collapse_octahedron_edge() {
        let mut mesh = primitives::Octahedron::build(Vec3::ZERO, 1.0).unwrap();
        let conn = &mut mesh.connectivity;
        let positions = &mut mesh.positions;

        let (e, _) = conn.iter_edges().next().unwrap();
        let (v0, v1) = conn.edge_endpoints(e);
        let mid = (positions[v0] + positions[v1]) * 0.5;

        let m = collapse_edge_erase(conn, positions, e).unwrap();
        conn.check_integrity().unwrap();

        // On a closed surface, a collapse removes one vertex, three edges
        // and two faces
        assert_eq!(euler_counts(conn), (5, 9, 6));
        assert!(positions[m].abs_diff_eq(mid, 1e-6));
    }

    #[test]
    fn test_erase_vertex_on_tetrahedron() {
        let mut mesh = primitives::Tetrahedron::build(Vec3::ZERO, 1.0).unwrap();
        let conn = &mut mesh.connectivity;

        let (v, _) = conn.iter_vertices().next().unwrap();
        let f = erase_vertex(conn, v).unwrap();
        conn.check_integrity().unwrap();

        assert_eq!(euler_counts(conn), (3, 3, 2));
        assert_eq!(conn.num_face_edges(f), 3);
    }

    #[test]
    fn test_erase_vertex_refuses_boundary() {
        let mesh = primitives::TriGrid::build(2, 1.0).unwrap();
        let mut conn = mesh.connectivity;
        let boundary_vertex = conn
            .iter_vertices()
            .map(|(v, _)| v)
            .find(|v| conn.is_boundary_vertex(*v))
            .unwrap();
        let before = euler_counts(&conn);
        assert!(erase_vertex(&mut conn, boundary_vertex).is_err());
        assert_eq!(euler_counts(&conn), before);
    }

    #[test]
    fn test_erase_vertex_interior_of_grid() {
        let mesh = primitives::TriGrid::build(2, 1.0).unwrap();
        let mut conn = mesh.connectivity;
        let interior = conn
            .iter_vertices()
            .map(|(v, _)| v)
            .find(|v| !conn.is_boundary_vertex(*v))
            .unwrap();
        let degree = conn.vertex_degree(interior);
        let (v, e, f) = euler_counts(&conn);

        let new_face = erase_vertex(&mut conn, interior).unwrap();
        conn.check_integrity().unwrap();

        assert_eq!(conn.num_vertices(), v - 1);
        assert_eq!(conn.num_edges(), e - degree);
        assert_eq!(conn.num_faces(), f - degree + 1);
        assert_eq!(conn.num_face_edges(new_face), degree);
    }

    #[test]
    fn test_erase_edge_merges_cube_faces() {
        let mesh = primitives::Box::build(Vec3::ZERO, Vec3::ONE).unwrap();
        let mut conn = mesh.connectivity;

        let (e, _) = conn.iter_edges().next().unwrap();
        let merged = erase_edge(&mut conn, e).unwrap();
        conn.check_integrity().unwrap();

        assert_eq!(euler_counts(&conn), (8, 11, 5));
        assert_eq!(conn.num_face_edges(merged), 6);
    }

    #[test]
    fn test_bevel_cube_face() {
        let mut mesh = primitives::Box::build(Vec3::ZERO, Vec3::ONE).unwrap();
        let conn = &mut mesh.connectivity;
        let positions = &mut mesh.positions;

        let (f, _) = conn.iter_faces().next().unwrap();
        let og_positions: HashSet<Vec3Ord> = conn
            .face_vertices(f)
            .iter()
            .map(|v| positions[*v].to_ord())
            .collect();

        let inset = bevel_face(conn, positions, f).unwrap();
        conn.check_integrity().unwrap();

        assert_eq!(euler_counts(conn), (12, 20, 10));
        assert_eq!(conn.num_face_edges(inset), 4);

        // Before any position update, the inset vertices sit exactly on the
        // original corners
        let inset_positions: HashSet<Vec3Ord> = conn
            .face_vertices(inset)
            .iter()
            .map(|v| positions[*v].to_ord())
            .collect();
        assert_eq!(og_positions, inset_positions);

        // Every side face is a quad
        for (face, _) in conn.iter_faces() {
            if face != inset {
                assert_eq!(conn.num_face_edges(face), 4);
            }
        }
    }

    #[test]
    fn test_bevel_face_positions_moves_ring() {
        let mut mesh = primitives::Box::build(Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0)).unwrap();
        let conn = &mut mesh.connectivity;
        let positions = &mut mesh.positions;

        let (f, _) = conn.iter_faces().next().unwrap();
        let inset = bevel_face(conn, positions, f).unwrap();

        let ring = conn.face_edges(inset);
        let start_positions = ring
            .iter()
            .map(|h| positions[conn.at_halfedge(*h).vertex().end()])
            .collect_vec();
        let centroid_before = conn.face_vertex_average(positions, inset);

        bevel_face_positions(conn, positions, &start_positions, inset, 0.25, 0.5, false)
            .unwrap();

        // The ring moved along the face normal...
        let centroid_after = conn.face_vertex_average(positions, inset);
        let offset = centroid_after - centroid_before;
        assert!((offset.length() - 0.5).abs() < 1e-5);

        // ...and shrank towards its center.
        let shrunk: f32 = conn
            .face_vertices(inset)
            .iter()
            .map(|v| (positions[*v] - centroid_after).length())
            .sum::<f32>()
            / 4.0;
        let original: f32 = start_positions
            .iter()
            .map(|p| (*p - centroid_before).length())
            .sum::<f32>()
            / 4.0;
        assert!(shrunk < original);

        // Flipping the orientation negates the normal offset
        bevel_face_positions(conn, positions, &start_positions, inset, 0.0, 0.5, true)
            .unwrap();
        let centroid_flipped = conn.face_vertex_average(positions, inset);
        assert!((centroid_flipped - centroid_before + offset).length() < 1e-5);
    }

    #[test]
    fn test_stub_operators_refuse() {
        let mut mesh = primitives::Box::build(Vec3::ZERO, Vec3::ONE).unwrap();
        let conn = &mut mesh.connectivity;
        let positions = &mut mesh.positions;

        let (v, _) = conn.iter_vertices().next().unwrap();
        let (e, _) = conn.iter_edges().next().unwrap();
        let (f, _) = conn.iter_faces().next().unwrap();

        assert!(collapse_face(conn, f).is_err());
        assert!(bevel_vertex(conn, positions, v).is_err());
        assert!(bevel_edge(conn, positions, e).is_err());
        conn.check_integrity().unwrap();
        assert_eq!(euler_counts(conn), (8, 12, 6));
    }
}
