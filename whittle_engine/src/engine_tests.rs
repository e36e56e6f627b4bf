use crate::mesh::halfedge::{edit_ops, primitives, remesh, simplify, subdivide};
use crate::prelude::*;

fn euler_characteristic(conn: &MeshConnectivity) -> i64 {
    conn.num_vertices() as i64 - conn.num_edges() as i64 + conn.num_faces() as i64
}

/// Chains the global operators on a closed surface and checks that every
/// intermediate mesh is structurally sound and still a sphere.
#[test]
pub fn test_global_operator_pipeline() {
    let mut mesh = primitives::Box::build(Vec3::ZERO, Vec3::splat(2.0)).unwrap();

    subdivide::catmullclark_subdivide(&mut mesh).unwrap();
    mesh.connectivity.check_integrity().unwrap();
    assert_eq!(euler_characteristic(&mesh.connectivity), 2);

    subdivide::triangulate(&mut mesh.connectivity);
    mesh.connectivity.check_integrity().unwrap();
    assert_eq!(euler_characteristic(&mesh.connectivity), 2);

    remesh::loop_subdivide(&mut mesh.connectivity, &mut mesh.positions);
    mesh.connectivity.check_integrity().unwrap();
    assert_eq!(euler_characteristic(&mesh.connectivity), 2);

    assert!(remesh::isotropic_remesh(
        &mut mesh.connectivity,
        &mut mesh.positions
    ));
    mesh.connectivity.check_integrity().unwrap();
    assert_eq!(euler_characteristic(&mesh.connectivity), 2);

    let before = mesh.connectivity.num_faces();
    assert!(simplify::simplify(&mut mesh.connectivity, &mut mesh.positions));
    mesh.connectivity.check_integrity().unwrap();
    assert_eq!(euler_characteristic(&mesh.connectivity), 2);
    assert!(mesh.connectivity.num_faces() < before);
}

/// Runs a batch of local operators back to back on the same mesh, making
/// sure deferred erasure and reallocation interact correctly.
#[test]
pub fn test_local_operator_pipeline() {
    let mut mesh = primitives::Octahedron::build(Vec3::ZERO, 1.0).unwrap();
    let conn = &mut mesh.connectivity;
    let positions = &mut mesh.positions;

    let (e, _) = conn.iter_edges().next().unwrap();
    let m = edit_ops::split_edge(conn, positions, e).unwrap();
    conn.check_integrity().unwrap();

    let flip_target = conn
        .iter_edges()
        .map(|(e, _)| e)
        .find(|e| {
            let (a, b) = conn.edge_endpoints(*e);
            a != m && b != m && !conn.is_boundary_edge(*e)
        })
        .unwrap();
    edit_ops::flip_edge(conn, flip_target).unwrap();
    conn.check_integrity().unwrap();

    let collapse_target = conn
        .iter_edges()
        .map(|(e, _)| e)
        .find(|e| edit_ops::can_collapse_edge(conn, *e))
        .unwrap();
    edit_ops::collapse_edge_erase(conn, positions, collapse_target).unwrap();
    conn.check_integrity().unwrap();

    let interior = conn
        .iter_vertices()
        .map(|(v, _)| v)
        .find(|v| !conn.is_boundary_vertex(*v))
        .unwrap();
    let face = edit_ops::erase_vertex(conn, interior).unwrap();
    conn.check_integrity().unwrap();

    // The mesh closed up around the erased vertex
    assert!(conn.face_exists(face));
    assert_eq!(euler_characteristic(conn), 2);
}

/// Deferred removal keeps elements dereferenceable until validate runs.
#[test]
pub fn test_deferred_erasure_compaction() {
    let mut mesh = primitives::Tetrahedron::build(Vec3::ZERO, 1.0).unwrap();
    let conn = &mut mesh.connectivity;
    let positions = &mut mesh.positions;

    let live_edges = conn.num_edges();
    let (e, _) = conn.iter_edges().next().unwrap();
    edit_ops::collapse_edge(conn, positions, e).unwrap();

    // Logically removed, but the handles still dereference
    assert_eq!(conn.num_edges(), live_edges - 3);
    assert!(!conn.edge_exists(e));

    conn.validate();
    assert_eq!(conn.num_edges(), live_edges - 3);
    conn.check_integrity().unwrap();
}
