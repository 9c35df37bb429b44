//! Decimation bounds on realistic mesh sizes.

mod common;

use bimingest::decimate;
use bimingest::geometry::{check_decimation, validate_mesh};

use common::grid_mesh;

#[test]
fn test_mesh_within_target_is_unchanged() {
    let mesh = grid_mesh(10, 10);

    let (vertices, faces) = decimate(&mesh.vertices, &mesh.faces, 200);

    assert_eq!(vertices, mesh.vertices);
    assert_eq!(faces, mesh.faces);
}

#[test]
fn test_million_face_mesh_is_bounded() {
    let mesh = grid_mesh(1000, 500);
    assert_eq!(mesh.faces.len(), 1_000_000);

    let (vertices, faces) = decimate(&mesh.vertices, &mesh.faces, 2000);

    assert!(faces.len() <= 2000, "kept {} faces", faces.len());
    assert!(!faces.is_empty());
    check_decimation(mesh.faces.len(), &vertices, &faces).unwrap();
    validate_mesh(&vertices, &faces).unwrap();
}

#[test]
fn test_decimation_never_adds_faces() {
    for (w, h, target) in [(4, 4, 31), (20, 10, 100), (30, 30, 1), (8, 2, 32)] {
        let mesh = grid_mesh(w, h);
        let (vertices, faces) = decimate(&mesh.vertices, &mesh.faces, target);

        assert!(faces.len() <= mesh.faces.len());
        check_decimation(mesh.faces.len(), &vertices, &faces).unwrap();
    }
}
