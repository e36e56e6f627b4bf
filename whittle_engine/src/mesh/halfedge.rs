// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::prelude::*;

use glam::*;
use itertools::Itertools;
use slotmap::{SecondaryMap, SlotMap};
use smallvec::SmallVec;

/// Type-safe wrappers over the internal allocator indices used as pointers
pub mod id_types;
pub use id_types::*;

/// Implements indexing traits so the mesh data structure can be used to access
/// vertex, edge, face or halfedge information using ids as indices.
pub mod mesh_index_impls;

/// An API to represent type-safe and error-handled graph traversals over a mesh
pub mod traversals;
pub use traversals::*;

/// Primitive shapes, like boxes or polygons
pub mod primitives;

/// Local polygon edit operations on a HalfEdge mesh, like flip, split or bevel
pub mod edit_ops;

/// Triangulation and quad subdivision (linear and Catmull-Clark)
pub mod subdivide;

/// Loop subdivision and isotropic remeshing for triangle meshes
pub mod remesh;

/// Quadric-error mesh simplification
pub mod simplify;

/// HalfEdge meshes are a type of linked list. This means it is sometimes
/// impossible to ensure some algorithms will terminate when the mesh is
/// malformed. To ensure the code never goes into an infinite loop, this max
/// number of iterations will be performed before giving an error. This error
/// should be large enough, as faces with a very large number of vertices may
/// trigger it.
pub const MAX_LOOP_ITERATIONS: usize = 8196;

#[derive(Debug, Default, Clone)]
pub struct HalfEdge {
    twin: Option<HalfEdgeId>,
    next: Option<HalfEdgeId>,
    vertex: Option<VertexId>,
    edge: Option<EdgeId>,
    face: Option<FaceId>,
}

#[derive(Debug, Default, Clone)]
pub struct Vertex {
    halfedge: Option<HalfEdgeId>,
}

#[derive(Debug, Default, Clone)]
pub struct Edge {
    halfedge: Option<HalfEdgeId>,
}

#[derive(Debug, Default, Clone)]
pub struct Face {
    halfedge: Option<HalfEdgeId>,
}

pub type Positions = SecondaryMap<VertexId, Vec3>;

/// The connectivity of a manifold polygon mesh, stored as four slotmap arenas
/// of vertices, edges, faces and halfedges that point at each other.
///
/// Element removal is two-phased: the `remove_*` methods only mark an element
/// as dead, and a later call to [`MeshConnectivity::validate`] frees the
/// marked elements for real. Dead elements no longer show up in iteration or
/// counts, but they can still be dereferenced, which lets operators keep
/// navigating a half-dismantled neighborhood while they rewire it.
#[derive(Debug, Clone, Default)]
pub struct MeshConnectivity {
    vertices: SlotMap<VertexId, Vertex>,
    edges: SlotMap<EdgeId, Edge>,
    faces: SlotMap<FaceId, Face>,
    halfedges: SlotMap<HalfEdgeId, HalfEdge>,

    dead_vertices: HashSet<VertexId>,
    dead_edges: HashSet<EdgeId>,
    dead_faces: HashSet<FaceId>,
    dead_halfedges: HashSet<HalfEdgeId>,
}

impl MeshConnectivity {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Allocation ---

    /// Adds a new vertex to the mesh, disconnected from everything else. Returns its handle.
    pub fn alloc_vertex(
        &mut self,
        positions: &mut Positions,
        position: Vec3,
        halfedge: Option<HalfEdgeId>,
    ) -> VertexId {
        let v = self.vertices.insert(Vertex { halfedge });
        positions.insert(v, position);
        v
    }

    /// Adds a new edge to the mesh, disconnected from everything else. Returns its handle.
    pub fn alloc_edge(&mut self, halfedge: Option<HalfEdgeId>) -> EdgeId {
        self.edges.insert(Edge { halfedge })
    }

    /// Adds a new face to the mesh, disconnected from everything else. Returns its handle.
    pub fn alloc_face(&mut self, halfedge: Option<HalfEdgeId>) -> FaceId {
        self.faces.insert(Face { halfedge })
    }

    /// Adds a new halfedge to the mesh, disconnected from everything else. Returns its handle.
    pub fn alloc_halfedge(&mut self, halfedge: HalfEdge) -> HalfEdgeId {
        self.halfedges.insert(halfedge)
    }

    // --- Removal ---
    //
    // Removal is logical. The element stays dereferenceable until `validate`
    // frees it, so operators may keep reading through handles they already
    // collected. Marking the same element twice is a no-op.

    /// Marks a vertex as removed. This does not attempt to preserve mesh
    /// connectivity and should only be used as part of internal operations.
    pub fn remove_vertex(&mut self, vertex: VertexId) {
        debug_assert!(self.vertices.contains_key(vertex));
        self.dead_vertices.insert(vertex);
    }

    /// Marks an edge as removed. This does not attempt to preserve mesh
    /// connectivity and should only be used as part of internal operations.
    pub fn remove_edge(&mut self, edge: EdgeId) {
        debug_assert!(self.edges.contains_key(edge));
        self.dead_edges.insert(edge);
    }

    /// Marks a face as removed. This does not attempt to preserve mesh
    /// connectivity and should only be used as part of internal operations.
    pub fn remove_face(&mut self, face: FaceId) {
        debug_assert!(self.faces.contains_key(face));
        self.dead_faces.insert(face);
    }

    /// Marks a halfedge as removed. This does not attempt to preserve mesh
    /// connectivity and should only be used as part of internal operations.
    pub fn remove_halfedge(&mut self, halfedge: HalfEdgeId) {
        debug_assert!(self.halfedges.contains_key(halfedge));
        self.dead_halfedges.insert(halfedge);
    }

    /// Frees every element marked as removed since the last call. Handles to
    /// freed elements become invalid and indexing with them will panic.
    pub fn validate(&mut self) {
        for v in self.dead_vertices.drain() {
            self.vertices.remove(v);
        }
        for e in self.dead_edges.drain() {
            self.edges.remove(e);
        }
        for f in self.dead_faces.drain() {
            self.faces.remove(f);
        }
        for h in self.dead_halfedges.drain() {
            self.halfedges.remove(h);
        }
    }

    // --- Liveness ---

    pub fn vertex_exists(&self, vertex: VertexId) -> bool {
        self.vertices.contains_key(vertex) && !self.dead_vertices.contains(&vertex)
    }

    pub fn edge_exists(&self, edge: EdgeId) -> bool {
        self.edges.contains_key(edge) && !self.dead_edges.contains(&edge)
    }

    pub fn face_exists(&self, face: FaceId) -> bool {
        self.faces.contains_key(face) && !self.dead_faces.contains(&face)
    }

    pub fn halfedge_exists(&self, halfedge: HalfEdgeId) -> bool {
        self.halfedges.contains_key(halfedge) && !self.dead_halfedges.contains(&halfedge)
    }

    // --- Iteration and counts (live elements only) ---

    pub fn iter_vertices(&self) -> impl Iterator<Item = (VertexId, &Vertex)> {
        self.vertices
            .iter()
            .filter(|(id, _)| !self.dead_vertices.contains(id))
    }

    pub fn iter_edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges
            .iter()
            .filter(|(id, _)| !self.dead_edges.contains(id))
    }

    pub fn iter_faces(&self) -> impl Iterator<Item = (FaceId, &Face)> {
        self.faces
            .iter()
            .filter(|(id, _)| !self.dead_faces.contains(id))
    }

    pub fn iter_halfedges(&self) -> impl Iterator<Item = (HalfEdgeId, &HalfEdge)> {
        self.halfedges
            .iter()
            .filter(|(id, _)| !self.dead_halfedges.contains(id))
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len() - self.dead_vertices.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len() - self.dead_edges.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len() - self.dead_faces.len()
    }

    pub fn num_halfedges(&self) -> usize {
        self.halfedges.len() - self.dead_halfedges.len()
    }

    // --- Wiring ---

    /// Sets the five pointers of halfedge `h` in a single call.
    pub fn set_neighbors(
        &mut self,
        h: HalfEdgeId,
        next: HalfEdgeId,
        twin: HalfEdgeId,
        vertex: VertexId,
        edge: EdgeId,
        face: Option<FaceId>,
    ) {
        let halfedge = &mut self[h];
        halfedge.next = Some(next);
        halfedge.twin = Some(twin);
        halfedge.vertex = Some(vertex);
        halfedge.edge = Some(edge);
        halfedge.face = face;
    }

    // --- Topology queries ---

    /// Returns the halfedges of a given face
    pub fn face_edges(&self, face_id: FaceId) -> SVec<HalfEdgeId> {
        let mut edges = SmallVec::new();
        let h0 = self[face_id].halfedge.expect("Face should have a halfedge");
        let mut h = h0;

        edges.push(h);

        let mut counter = 0;

        loop {
            if counter > MAX_LOOP_ITERATIONS {
                panic!("Max number of iterations reached. Is the mesh malformed?");
            }
            counter += 1;

            h = self[h]
                .next
                .unwrap_or_else(|| panic!("Halfedge {h:?} has no next"));
            if h == h0 {
                break;
            }
            edges.push(h);
        }

        edges
    }

    pub fn face_vertices(&self, face_id: FaceId) -> SVec<VertexId> {
        self.face_edges(face_id)
            .iter()
            .map(|e| self.at_halfedge(*e).vertex().end())
            .collect()
    }

    /// Returns the number of sides of a face, also known as its arity.
    pub fn num_face_edges(&self, face_id: FaceId) -> usize {
        self.face_edges(face_id).len()
    }

    /// Returns the (src, dst) endpoint vertices of an edge, in the direction
    /// of its canonical halfedge.
    pub fn edge_endpoints(&self, edge: EdgeId) -> (VertexId, VertexId) {
        let h = self[edge].halfedge.expect("Edge should have a halfedge");
        let a = self.at_halfedge(h).vertex().end();
        let b = self.at_halfedge(h).twin().vertex().end();
        (a, b)
    }

    /// An edge is on the boundary when either of its halfedges is not part of
    /// any face.
    pub fn is_boundary_edge(&self, edge: EdgeId) -> bool {
        let h = self[edge].halfedge.expect("Edge should have a halfedge");
        self.at_halfedge(h).is_boundary().unwrap_or(true)
            || self.at_halfedge(h).twin().is_boundary().unwrap_or(true)
    }

    /// A vertex is on the boundary when any of its outgoing halfedges is not
    /// part of any face.
    pub fn is_boundary_vertex(&self, vertex: VertexId) -> bool {
        self.at_vertex(vertex)
            .outgoing_halfedges()
            .map(|hs| {
                hs.iter()
                    .any(|h| self.at_halfedge(*h).is_boundary().unwrap_or(true))
            })
            .unwrap_or(true)
    }

    /// Returns the number of edges incident to a vertex, also known as its
    /// degree or valence.
    pub fn vertex_degree(&self, vertex: VertexId) -> usize {
        self.at_vertex(vertex)
            .outgoing_halfedges()
            .map(|hs| hs.len())
            .unwrap_or(0)
    }

    /// Returns the vertices connected to `vertex` by an edge, in fan order.
    pub fn vertex_neighbors(&self, vertex: VertexId) -> SVec<VertexId> {
        self.at_vertex(vertex)
            .outgoing_halfedges()
            .map(|hs| {
                hs.iter()
                    .map(|h| self.at_halfedge(*h).twin().vertex().end())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn halfedge_loop(&self, h0: HalfEdgeId) -> SVec<HalfEdgeId> {
        let mut ret = smallvec::smallvec![h0];
        let mut h = h0;

        let mut count = 0;

        loop {
            if count > MAX_LOOP_ITERATIONS {
                panic!("Max number of iterations reached. Is the mesh malformed?");
            }
            count += 1;

            h = self[h].next.expect("Halfedges should form a loop");
            if h == h0 {
                break;
            } else {
                ret.push(h);
            }
        }
        ret
    }

    // --- Geometry queries ---

    /// Returns the average of a face's vertices. Note that this is different
    /// from the centroid. See:
    /// https://en.wikipedia.org/wiki/Centroid#Of_a_polygon
    pub fn face_vertex_average(&self, positions: &Positions, face_id: FaceId) -> Vec3 {
        let face_vertices = self
            .face_vertices(face_id)
            .iter()
            .map(|v| positions[*v])
            .collect::<SVec<_>>();
        face_vertices.iter().fold(Vec3::ZERO, |v1, v2| v1 + *v2) / face_vertices.len() as f32
    }

    // Returns the normal of the face. The first three vertices are used to
    // compute the normal. If the vertices of the face are not coplanar,
    // the result will not be correct.
    pub fn face_normal(&self, positions: &Positions, face: FaceId) -> Option<Vec3> {
        let verts = self.face_vertices(face);
        if verts.len() >= 3 {
            let v01 = positions[verts[0]] - positions[verts[1]];
            let v12 = positions[verts[1]] - positions[verts[2]];
            let normal = v01.cross(v12);
            (normal.length_squared() > 0.0).then(|| normal.normalize())
        } else {
            None
        }
    }

    /// Returns the area-weighted normal at a vertex, the normalized sum of
    /// the cross products of its incident faces.
    pub fn vertex_normal(&self, positions: &Positions, vertex: VertexId) -> Option<Vec3> {
        let faces = self.at_vertex(vertex).adjacent_faces().ok()?;
        let mut normal = Vec3::ZERO;
        for face in faces.iter_cpy() {
            let verts = self.face_vertices(face);
            if verts.len() >= 3 {
                let v01 = positions[verts[0]] - positions[verts[1]];
                let v12 = positions[verts[1]] - positions[verts[2]];
                normal += v01.cross(v12);
            }
        }
        (normal.length_squared() > 0.0).then(|| normal.normalize())
    }

    pub fn edge_length(&self, positions: &Positions, edge: EdgeId) -> f32 {
        let (a, b) = self.edge_endpoints(edge);
        positions[a].distance(positions[b])
    }

    pub fn edge_midpoint(&self, positions: &Positions, edge: EdgeId) -> Vec3 {
        let (a, b) = self.edge_endpoints(edge);
        (positions[a] + positions[b]) * 0.5
    }

    pub fn mean_edge_length(&self, positions: &Positions) -> f32 {
        let mut total = 0.0;
        let mut count = 0;
        for (e, _) in self.iter_edges() {
            total += self.edge_length(positions, e);
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            total / count as f32
        }
    }

    // --- Construction ---

    /// Given a `self` in an inconsistent state, where some halfedges have no
    /// `twin` (because it's in the boundary), this method adds twin halfedges
    /// forming a loop across the boundaries of the mesh. The new halfedges will
    /// be marked as boundary with a None face.
    fn add_boundary_halfedges(&mut self) {
        // Clone to avoid double-borrow issues
        let halfedges: Vec<HalfEdgeId> = self.iter_halfedges().map(|(h, _)| h).collect();

        for &h0 in halfedges.iter() {
            let mut boundary_halfedges = Vec::<HalfEdgeId>::new();
            if self[h0].twin.is_none() {
                let mut h_it = h0;
                loop {
                    let t = self.alloc_halfedge(HalfEdge::default());
                    boundary_halfedges.push(t);
                    self[h_it].twin = Some(t);
                    self[t].twin = Some(h_it);
                    self[t].vertex = Some(self.at_halfedge(h_it).next().vertex().end());

                    // Look for the next outgoing halfedge for this vertex
                    // that's in the boundary
                    h_it = self.at_halfedge(h_it).next().end();
                    while h_it != h0 && self[h_it].twin.is_some() {
                        // Twin-next cycles around the outgoing halfedges of a vertex
                        h_it = self.at_halfedge(h_it).twin().next().end();
                    }

                    if h_it == h0 {
                        break;
                    }
                }
            }

            for (&b_h, &b_h_next) in boundary_halfedges.iter().rev().circular_tuple_windows() {
                self[b_h].next = Some(b_h_next);
            }
        }
    }

    /// Allocates an edge record for every twin pair that doesn't have one yet.
    /// Called once at construction, after twin pointers have been linked.
    fn add_edge_records(&mut self) {
        let halfedges: Vec<HalfEdgeId> = self.iter_halfedges().map(|(h, _)| h).collect();
        for h in halfedges {
            if self[h].edge.is_none() {
                let t = self[h].twin.expect("Twins should be linked at this point");
                let e = self.alloc_edge(Some(h));
                self[h].edge = Some(e);
                self[t].edge = Some(e);
            }
        }
    }

    /// Checks the structural invariants of the halfedge graph: twin
    /// involution, shared edge records, closed face cycles with consistent
    /// face pointers, closed vertex fans with consistent origins, and
    /// canonical halfedges that are alive and point back at their element.
    /// Meant for tests and debugging, this is O(n) but not cheap.
    pub fn check_integrity(&self) -> Result<()> {
        for (h, halfedge) in self.iter_halfedges() {
            let t = halfedge
                .twin
                .ok_or_else(|| anyhow!("Halfedge {h:?} has no twin"))?;
            if !self.halfedge_exists(t) {
                bail!("Halfedge {h:?} has a dead twin");
            }
            if t == h {
                bail!("Halfedge {h:?} is its own twin");
            }
            if self[t].twin != Some(h) {
                bail!("Twin involution broken at {h:?}");
            }
            let e = halfedge
                .edge
                .ok_or_else(|| anyhow!("Halfedge {h:?} has no edge"))?;
            if !self.edge_exists(e) || self[t].edge != Some(e) {
                bail!("Halfedge {h:?} and its twin disagree on their edge");
            }
            let n = halfedge
                .next
                .ok_or_else(|| anyhow!("Halfedge {h:?} has no next"))?;
            if !self.halfedge_exists(n) {
                bail!("Halfedge {h:?} has a dead next");
            }
            if self[n].vertex != self[t].vertex {
                bail!("Next-origin / twin-origin mismatch at {h:?}");
            }
            let v = halfedge
                .vertex
                .ok_or_else(|| anyhow!("Halfedge {h:?} has no vertex"))?;
            if !self.vertex_exists(v) {
                bail!("Halfedge {h:?} originates at a dead vertex");
            }
            if let Some(f) = halfedge.face {
                if !self.face_exists(f) {
                    bail!("Halfedge {h:?} belongs to a dead face");
                }
            }
        }

        for (f, face) in self.iter_faces() {
            let h0 = face
                .halfedge
                .ok_or_else(|| anyhow!("Face {f:?} has no halfedge"))?;
            if !self.halfedge_exists(h0) {
                bail!("Face {f:?} points at a dead halfedge");
            }
            for h in self.halfedge_loop(h0) {
                if self[h].face != Some(f) {
                    bail!("Face cycle of {f:?} contains a halfedge of another face");
                }
            }
        }

        for (v, vertex) in self.iter_vertices() {
            let h0 = vertex
                .halfedge
                .ok_or_else(|| anyhow!("Vertex {v:?} has no halfedge"))?;
            if !self.halfedge_exists(h0) {
                bail!("Vertex {v:?} points at a dead halfedge");
            }
            for h in self.at_vertex(v).outgoing_halfedges()? {
                if self[h].vertex != Some(v) {
                    bail!("Vertex fan of {v:?} contains a halfedge with another origin");
                }
            }
        }

        for (e, edge) in self.iter_edges() {
            let h = edge
                .halfedge
                .ok_or_else(|| anyhow!("Edge {e:?} has no halfedge"))?;
            if !self.halfedge_exists(h) {
                bail!("Edge {e:?} points at a dead halfedge");
            }
            if self[h].edge != Some(e) {
                bail!("Edge {e:?} points at a halfedge of another edge");
            }
        }

        Ok(())
    }
}

/// A manifold polygon mesh: halfedge connectivity plus per-vertex positions.
#[derive(Debug, Clone, Default)]
pub struct HalfEdgeMesh {
    pub connectivity: MeshConnectivity,
    pub positions: Positions,
}

impl HalfEdgeMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds this mesh from a list of vertex positions, and a list of
    /// polygons, containing indices that reference those positions.
    ///
    /// All polygons must be consistently oriented (counter-clockwise seen
    /// from the outside) and the surface must be manifold.
    pub fn build_from_polygons<Polygon>(positions: &[Vec3], polygons: &[Polygon]) -> Result<Self>
    where
        Polygon: AsRef<[u32]>,
    {
        let mut mesh = Self::new();
        let conn = &mut mesh.connectivity;
        let positions_ch = &mut mesh.positions;

        // Maps indices from the `polygons` array to the allocated vertices in
        // the newly created halfedge mesh.
        let mut index_to_vertex = HashMap::<u32, VertexId>::new();

        // Used to compute the degree of a vertex. Useful to do some sanity
        // checks.
        let mut vertex_degree = HashMap::<VertexId, u32>::new();

        // First pass over polygon data to determine some initial properties
        for polygon in polygons.iter().map(|p| p.as_ref()) {
            // Some sanity checks
            if polygon.len() < 3 {
                bail!("Cannot build meshes where polygons have less than three vertices.")
            }
            if polygon.iter().duplicates().next().is_some() {
                bail!("Cannot not build meshes where a polygon has duplicate vertices")
            }

            // Compute correspondence between vertices and indices. Also fill in vertex degree data.
            for index in polygon {
                // Create the vertex if it doesn't exist
                let position = positions.get(*index as usize).ok_or_else(|| {
                    anyhow!("Out-of-bounds index in the polygon array {}", index)
                })?;
                let v_id = index_to_vertex
                    .entry(*index)
                    .or_insert_with(|| conn.alloc_vertex(positions_ch, *position, None));

                // Increment the vertex degree counter for that vertex.
                *vertex_degree.entry(*v_id).or_insert(0) += 1;
            }
        }

        // Maps pairs of indices to mesh halfedges
        let mut pair_to_halfedge = HashMap::<(u32, u32), HalfEdgeId>::new();

        // We can now start building connectivity information by doing a second
        // pass over the polygon list
        for polygon in polygons.iter().map(|p| p.as_ref()) {
            // Cyclically ordered list of the half edge ids of this face.
            let mut half_edges_in_face = SVec::new();

            let face = conn.alloc_face(None);

            for (&a, &b) in polygon.iter().circular_tuple_windows() {
                if pair_to_halfedge.get(&(a, b)).is_some() {
                    bail!(
                        "Found multiple oriented edges with the same indices.\
                         This means either (i) surface is non-manifold or (ii) faces \
                         are not oriented in the same direction"
                    )
                }

                let h = conn.alloc_halfedge(HalfEdge::default());
                // Link halfedge to face
                conn[h].face = Some(face);
                conn[face].halfedge = Some(h);

                // Link halfedge to source vertex
                let v_a = index_to_vertex[&a];
                conn[h].vertex = Some(v_a);
                conn[v_a].halfedge = Some(h);

                half_edges_in_face.push(h);

                pair_to_halfedge.insert((a, b), h);

                if let Some(&other) = pair_to_halfedge.get(&(b, a)) {
                    conn[h].twin = Some(other);
                    conn[other].twin = Some(h);
                }
            }

            for (&h1, &h2) in half_edges_in_face.iter().circular_tuple_windows() {
                conn[h1].next = Some(h2);
            }
        }

        // Construct the boundary halfedges. Right now, the boundary consists of
        // incomplete edges, i.e. half edges that do not have a twin. Leaving it
        // like this would complicate some kinds of traversal because we can't
        // rely on halfedges always having a twin. We will instead create
        // boundary half edges: That is, twin halfedges that do not point to any
        // face. The boundary halfedges are linked following a circle around the
        // closed boundary.
        conn.add_boundary_halfedges();

        // Every twin pair forms one undirected edge. Allocate the edge records
        // now that all pairs exist, including the boundary ones.
        conn.add_edge_records();

        // Do some final manifoldness checks
        for (v, vertex) in conn.iter_vertices() {
            if vertex.halfedge.is_none() {
                bail!("There is at least a single vertex that's disconnected from any polygon");
            }

            // Check that the number of halfedges emanating from this vertex
            // equal the number of polygons containing this vertex. If this
            // doesn't check out, it means our vertex is not a polygon "fan",
            // but some other (thus, non-manifold) structure
            let h0 = conn.at_vertex(v).halfedge().end();
            let mut h = h0;
            let mut count = 0;
            loop {
                if !conn.at_halfedge(h).is_boundary().unwrap() {
                    count += 1;
                }
                h = conn.at_halfedge(h).twin().next().end();

                if h == h0 {
                    break;
                }
            }

            if count != vertex_degree[&v] {
                bail!("At least one of the vertices is not a polygon fan, but some other nonmanifold structure instead.")
            }
        }

        Ok(mesh)
    }
}
