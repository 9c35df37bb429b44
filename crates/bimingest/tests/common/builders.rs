//! Builders for test models, meshes and configurations.

#![allow(dead_code)]

use serde_json::{json, Value};

use bimingest::config::{Config, RetryConfig};
use bimingest::parser::{
    ElementRecord, EntityError, InMemoryModel, MaterialRecord, RawGeometry, SpatialNode,
    TypeRecord,
};
use bimingest::{LodPolicy, StageName};

pub const STOREY_ID: &str = "storey-1";
pub const WALL_TYPE_ID: &str = "type-wall";
pub const CONCRETE_ID: &str = "mat-concrete";

/// Element id for the 1-based position `n`.
pub fn element_id(n: usize) -> String {
    format!("element-{:03}", n)
}

/// A flat grid of `width` x `height` quads, two triangles each.
pub fn grid_mesh(width: usize, height: usize) -> RawGeometry {
    let mut vertices = Vec::with_capacity((width + 1) * (height + 1));
    for y in 0..=height {
        for x in 0..=width {
            vertices.push([x as f64, y as f64, 0.0]);
        }
    }

    let stride = width + 1;
    let mut faces = Vec::with_capacity(width * height * 2);
    for y in 0..height {
        for x in 0..width {
            let a = (y * stride + x) as u32;
            let b = a + 1;
            let c = a + stride as u32;
            let d = c + 1;
            faces.push([a, b, d]);
            faces.push([a, d, c]);
        }
    }

    RawGeometry { vertices, faces }
}

/// Builds the same small building as an in-memory model or a JSON document:
/// a site and storey, one material, one wall type and `n` walls.
pub struct ModelBuilder {
    elements: usize,
    corrupt: Vec<usize>,
    mesh: Option<RawGeometry>,
    types: bool,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            elements: 0,
            corrupt: Vec::new(),
            mesh: None,
            types: true,
        }
    }

    pub fn elements(mut self, count: usize) -> Self {
        self.elements = count;
        self
    }

    /// Makes the element at 1-based position `n` undecodable.
    pub fn corrupt_at(mut self, n: usize) -> Self {
        self.corrupt.push(n);
        self
    }

    pub fn mesh(mut self, mesh: RawGeometry) -> Self {
        self.mesh = Some(mesh);
        self
    }

    /// Replaces the wall type with an undecodable record.
    pub fn corrupt_types(mut self) -> Self {
        self.types = false;
        self
    }

    fn element(&self, n: usize) -> ElementRecord {
        let mut element = ElementRecord::new(element_id(n), "IfcWall");
        element.name = Some(format!("Wall {}", n));
        element.container = Some(STOREY_ID.to_string());
        element.type_ref = Some(WALL_TYPE_ID.to_string());
        element.materials = vec![CONCRETE_ID.to_string()];
        element.geometry = self.mesh.clone();
        element
    }

    pub fn build(&self) -> InMemoryModel {
        let mut model = InMemoryModel::new()
            .with_spatial(SpatialNode {
                global_id: "site".to_string(),
                entity_type: "IfcSite".to_string(),
                name: Some("Site".to_string()),
                parent: None,
            })
            .with_spatial(SpatialNode {
                global_id: STOREY_ID.to_string(),
                entity_type: "IfcBuildingStorey".to_string(),
                name: Some("Ground floor".to_string()),
                parent: Some("site".to_string()),
            })
            .with_material(MaterialRecord {
                global_id: CONCRETE_ID.to_string(),
                name: "Concrete".to_string(),
                category: Some("structural".to_string()),
            });
        model = if self.types {
            model.with_type(TypeRecord {
                global_id: WALL_TYPE_ID.to_string(),
                entity_type: "IfcWallType".to_string(),
                name: Some("Basic wall".to_string()),
                material: Some(CONCRETE_ID.to_string()),
            })
        } else {
            model.with_corrupt_type(
                EntityError::corrupt("type record could not be decoded").with_id(WALL_TYPE_ID),
            )
        };

        for n in 1..=self.elements {
            model = if self.corrupt.contains(&n) {
                model.with_corrupt_element(
                    EntityError::corrupt("element record could not be decoded")
                        .with_id(element_id(n))
                        .with_type("IfcWall"),
                )
            } else {
                model.with_element(self.element(n))
            };
        }
        model
    }

    pub fn to_json(&self) -> Value {
        let elements: Vec<Value> = (1..=self.elements)
            .map(|n| {
                if self.corrupt.contains(&n) {
                    json!({ "global_id": element_id(n), "type": "IfcWall", "materials": 7 })
                } else {
                    json!(self.element(n))
                }
            })
            .collect();

        json!({
            "spatial": [
                { "global_id": "site", "type": "IfcSite", "name": "Site" },
                { "global_id": STOREY_ID, "type": "IfcBuildingStorey", "parent": "site" }
            ],
            "materials": [
                { "global_id": CONCRETE_ID, "name": "Concrete", "category": "structural" }
            ],
            "types": [
                { "global_id": WALL_TYPE_ID, "type": "IfcWallType", "material": CONCRETE_ID }
            ],
            "systems": [],
            "elements": elements
        })
    }
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `Config` instances tuned for fast tests.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// One worker, quick polling and no retry delay.
    pub fn new() -> Self {
        let mut config = Config::default();
        config.worker_count = 1;
        config.poll_interval_ms = 10;
        config.retry = RetryConfig {
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
        };
        Self { config }
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn job_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.job_timeout_ms = timeout;
        self
    }

    pub fn cancel_check_interval(mut self, interval: usize) -> Self {
        self.config.cancel_check_interval = interval;
        self
    }

    pub fn lod(mut self, lod: LodPolicy) -> Self {
        self.config.lod = lod;
        self
    }

    pub fn required_stages(mut self, stages: &[StageName]) -> Self {
        self.config.required_stages = stages.to_vec();
        self
    }

    pub fn database_path(mut self, path: &str) -> Self {
        self.config.database_path = Some(path.to_string());
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
