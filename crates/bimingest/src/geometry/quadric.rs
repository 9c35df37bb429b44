//! Garland-Heckbert quadric error edge collapse.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use nalgebra::{Matrix4, Vector3, Vector4};

use super::decimate::{Face, Simplifier, Vertex};

const SINGULAR_EPSILON: f64 = 1e-12;
const DEGENERATE_AREA: f64 = 1e-20;

/// Quadric-error simplifier over indexed triangle meshes.
///
/// Faces with zero area are discarded up front; the output only contains
/// vertices still referenced by a surviving face.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadricSimplifier;

impl QuadricSimplifier {
    pub fn new() -> Self {
        Self
    }
}

impl Simplifier for QuadricSimplifier {
    fn simplify(
        &self,
        vertices: &[Vertex],
        faces: &[Face],
        target_faces: usize,
    ) -> (Vec<Vertex>, Vec<Face>) {
        let mut mesh = CollapseMesh::new(vertices, faces);
        mesh.collapse_to(target_faces);
        mesh.into_output(target_faces)
    }
}

#[derive(Debug)]
struct Candidate {
    cost: f64,
    a: usize,
    b: usize,
    version_a: u32,
    version_b: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Reversed so the max-heap pops the cheapest collapse first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.a.cmp(&self.a))
            .then_with(|| other.b.cmp(&self.b))
    }
}

struct CollapseMesh {
    positions: Vec<Vector3<f64>>,
    quadrics: Vec<Matrix4<f64>>,
    faces: Vec<[usize; 3]>,
    face_alive: Vec<bool>,
    alive_faces: usize,
    removed: Vec<bool>,
    versions: Vec<u32>,
    vertex_faces: Vec<Vec<usize>>,
    heap: BinaryHeap<Candidate>,
}

impl CollapseMesh {
    fn new(vertices: &[Vertex], faces: &[Face]) -> Self {
        let positions: Vec<Vector3<f64>> = vertices
            .iter()
            .map(|v| Vector3::new(v[0], v[1], v[2]))
            .collect();
        let n = positions.len();

        let mut mesh = Self {
            quadrics: vec![Matrix4::zeros(); n],
            faces: Vec::with_capacity(faces.len()),
            face_alive: Vec::with_capacity(faces.len()),
            alive_faces: 0,
            removed: vec![false; n],
            versions: vec![0; n],
            vertex_faces: vec![Vec::new(); n],
            heap: BinaryHeap::new(),
            positions,
        };

        for face in faces {
            let [i, j, k] = face.map(|i| i as usize);
            if i >= n || j >= n || k >= n || i == j || j == k || i == k {
                continue;
            }
            let Some(quadric) = face_quadric(&mesh.positions[i], &mesh.positions[j], &mesh.positions[k])
            else {
                continue;
            };

            let id = mesh.faces.len();
            mesh.faces.push([i, j, k]);
            mesh.face_alive.push(true);
            mesh.alive_faces += 1;
            for v in [i, j, k] {
                mesh.quadrics[v] += quadric;
                mesh.vertex_faces[v].push(id);
            }
        }

        let mut edges: Vec<u64> = Vec::with_capacity(mesh.faces.len() * 3);
        for &[i, j, k] in &mesh.faces {
            for (a, b) in [(i, j), (j, k), (k, i)] {
                let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                edges.push(((lo as u64) << 32) | hi as u64);
            }
        }
        edges.sort_unstable();
        edges.dedup();

        for key in edges {
            let a = (key >> 32) as usize;
            let b = (key & 0xffff_ffff) as usize;
            mesh.push_candidate(a, b);
        }

        mesh
    }

    fn push_candidate(&mut self, a: usize, b: usize) {
        let quadric = self.quadrics[a] + self.quadrics[b];
        let (_, cost) = optimal_position(&quadric, &self.positions[a], &self.positions[b]);
        self.heap.push(Candidate {
            cost,
            a,
            b,
            version_a: self.versions[a],
            version_b: self.versions[b],
        });
    }

    fn collapse_to(&mut self, target_faces: usize) {
        while self.alive_faces > target_faces {
            let Some(candidate) = self.heap.pop() else {
                break;
            };
            let Candidate { a, b, .. } = candidate;
            if self.removed[a]
                || self.removed[b]
                || self.versions[a] != candidate.version_a
                || self.versions[b] != candidate.version_b
            {
                continue;
            }
            self.collapse(a, b);
        }
    }

    /// Merges `b` into `a`.
    fn collapse(&mut self, a: usize, b: usize) {
        let quadric = self.quadrics[a] + self.quadrics[b];
        let (position, _) = optimal_position(&quadric, &self.positions[a], &self.positions[b]);

        self.positions[a] = position;
        self.quadrics[a] = quadric;
        self.removed[b] = true;
        self.versions[a] = self.versions[a].wrapping_add(1);
        self.versions[b] = self.versions[b].wrapping_add(1);

        let moved = std::mem::take(&mut self.vertex_faces[b]);
        for face_id in moved {
            if !self.face_alive[face_id] {
                continue;
            }
            let face = &mut self.faces[face_id];
            for v in face.iter_mut() {
                if *v == b {
                    *v = a;
                }
            }
            let [i, j, k] = *face;
            if i == j || j == k || i == k {
                self.face_alive[face_id] = false;
                self.alive_faces -= 1;
            } else {
                self.vertex_faces[a].push(face_id);
            }
        }

        let face_alive = &self.face_alive;
        self.vertex_faces[a].retain(|&f| face_alive[f]);

        let mut neighbors: Vec<usize> = self.vertex_faces[a]
            .iter()
            .flat_map(|&f| self.faces[f])
            .filter(|&v| v != a)
            .collect();
        neighbors.sort_unstable();
        neighbors.dedup();

        for neighbor in neighbors {
            self.push_candidate(a, neighbor);
        }
    }

    fn into_output(self, target_faces: usize) -> (Vec<Vertex>, Vec<Face>) {
        let mut alive: Vec<usize> = (0..self.faces.len())
            .filter(|&f| self.face_alive[f])
            .collect();

        // Disconnected pieces can exhaust the candidate heap early; the
        // smallest faces go first so the budget still holds.
        if alive.len() > target_faces {
            alive.sort_by(|&x, &y| {
                let ax = face_area(&self.positions, &self.faces[x]);
                let ay = face_area(&self.positions, &self.faces[y]);
                ay.total_cmp(&ax)
            });
            alive.truncate(target_faces);
            alive.sort_unstable();
        }

        let mut referenced = vec![false; self.positions.len()];
        for &f in &alive {
            for v in self.faces[f] {
                referenced[v] = true;
            }
        }

        let mut remap = vec![u32::MAX; self.positions.len()];
        let mut vertices = Vec::new();
        for (index, used) in referenced.iter().enumerate() {
            if *used {
                remap[index] = vertices.len() as u32;
                let p = self.positions[index];
                vertices.push([p.x, p.y, p.z]);
            }
        }

        let faces = alive
            .iter()
            .map(|&f| self.faces[f].map(|v| remap[v]))
            .collect();

        (vertices, faces)
    }
}

fn face_area(positions: &[Vector3<f64>], face: &[usize; 3]) -> f64 {
    let [i, j, k] = *face;
    (positions[j] - positions[i])
        .cross(&(positions[k] - positions[i]))
        .norm()
        * 0.5
}

/// Area-weighted plane quadric, or `None` for a degenerate triangle.
fn face_quadric(p0: &Vector3<f64>, p1: &Vector3<f64>, p2: &Vector3<f64>) -> Option<Matrix4<f64>> {
    let normal = (p1 - p0).cross(&(p2 - p0));
    let double_area = normal.norm();
    if !double_area.is_finite() || double_area <= DEGENERATE_AREA {
        return None;
    }
    let n = normal / double_area;
    let plane = Vector4::new(n.x, n.y, n.z, -n.dot(p0));
    Some(plane * plane.transpose() * (double_area * 0.5))
}

fn quadric_error(q: &Matrix4<f64>, p: &Vector3<f64>) -> f64 {
    let v = Vector4::new(p.x, p.y, p.z, 1.0);
    v.dot(&(q * v)).max(0.0)
}

fn optimal_position(
    q: &Matrix4<f64>,
    a: &Vector3<f64>,
    b: &Vector3<f64>,
) -> (Vector3<f64>, f64) {
    let mut system = *q;
    system[(3, 0)] = 0.0;
    system[(3, 1)] = 0.0;
    system[(3, 2)] = 0.0;
    system[(3, 3)] = 1.0;

    if system.determinant().abs() > SINGULAR_EPSILON {
        if let Some(inverse) = system.try_inverse() {
            let solved = inverse * Vector4::new(0.0, 0.0, 0.0, 1.0);
            let p = Vector3::new(solved.x, solved.y, solved.z);
            if p.iter().all(|c| c.is_finite()) {
                return (p, quadric_error(q, &p));
            }
        }
    }

    let midpoint = (a + b) * 0.5;
    [midpoint, *a, *b]
        .into_iter()
        .map(|p| (p, quadric_error(q, &p)))
        .min_by(|x, y| x.1.total_cmp(&y.1))
        .unwrap_or((midpoint, 0.0))
}
