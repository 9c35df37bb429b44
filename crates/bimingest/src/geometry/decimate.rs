use thiserror::Error;

use super::quadric::QuadricSimplifier;

pub type Vertex = [f64; 3];
pub type Face = [u32; 3];

/// Reduces a triangle mesh towards a requested face count.
///
/// Implementations must be pure and must never return more faces than
/// they were given.
pub trait Simplifier: Send + Sync {
    fn simplify(
        &self,
        vertices: &[Vertex],
        faces: &[Face],
        target_faces: usize,
    ) -> (Vec<Vertex>, Vec<Face>);
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    #[error("Face {face} references vertex {index} but the mesh has {vertex_count} vertices")]
    IndexOutOfRange {
        face: usize,
        index: u32,
        vertex_count: usize,
    },

    #[error("Vertex {index} has a non-finite coordinate")]
    NonFiniteVertex { index: usize },

    #[error("Decimation increased triangle count from {before} to {after}")]
    TriangleCountIncreased { before: usize, after: usize },
}

/// Decimates a mesh with the default quadric-error simplifier.
pub fn decimate(vertices: &[Vertex], faces: &[Face], target: usize) -> (Vec<Vertex>, Vec<Face>) {
    decimate_with(&QuadricSimplifier::default(), vertices, faces, target)
}

/// Decimates a mesh with an explicit simplifier.
///
/// Meshes already within `target` come back unchanged.
pub fn decimate_with<S: Simplifier + ?Sized>(
    simplifier: &S,
    vertices: &[Vertex],
    faces: &[Face],
    target: usize,
) -> (Vec<Vertex>, Vec<Face>) {
    if faces.len() <= target {
        return (vertices.to_vec(), faces.to_vec());
    }

    let ratio = target as f64 / faces.len() as f64;
    let requested = (faces.len() as f64 * ratio).round() as usize;

    log::trace!(
        "Decimating {} faces to {} (ratio {:.4})",
        faces.len(),
        requested,
        ratio
    );

    simplifier.simplify(vertices, faces, requested)
}

/// Rejects meshes with dangling indices or non-finite coordinates.
pub fn validate_mesh(vertices: &[Vertex], faces: &[Face]) -> Result<(), MeshError> {
    if let Some(index) = vertices
        .iter()
        .position(|v| v.iter().any(|c| !c.is_finite()))
    {
        return Err(MeshError::NonFiniteVertex { index });
    }

    check_indices(vertices.len(), faces)
}

/// Verifies a simplifier result against the mesh it was produced from.
pub fn check_decimation(
    input_faces: usize,
    vertices: &[Vertex],
    faces: &[Face],
) -> Result<(), MeshError> {
    if faces.len() > input_faces {
        return Err(MeshError::TriangleCountIncreased {
            before: input_faces,
            after: faces.len(),
        });
    }

    check_indices(vertices.len(), faces)
}

fn check_indices(vertex_count: usize, faces: &[Face]) -> Result<(), MeshError> {
    for (face, indices) in faces.iter().enumerate() {
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(MeshError::IndexOutOfRange {
                face,
                index,
                vertex_count,
            });
        }
    }
    Ok(())
}
