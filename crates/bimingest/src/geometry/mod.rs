//! Mesh complexity bounding for extracted element geometry.
//!
//! `decimate` is the entry point used by the geometry stage; the quadric
//! simplifier behind it is swappable through the [`Simplifier`] trait.

pub mod decimate;
pub mod lod;
pub mod quadric;

pub use decimate::{
    check_decimation, decimate, decimate_with, validate_mesh, Face, MeshError, Simplifier, Vertex,
};
pub use lod::{LodLevel, LodPolicy};
pub use quadric::QuadricSimplifier;
