use serde::{Deserialize, Serialize};

use crate::model::PropertySet;

/// Common identity of every parsed record.
pub trait Entity {
    fn global_id(&self) -> &str;
    fn entity_type(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialNode {
    pub global_id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Containing node, `None` for the project root.
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub global_id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRecord {
    pub global_id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub material: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemRecord {
    pub global_id: String,
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Triangulated element geometry as stored in the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGeometry {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<[u32; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub global_id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Spatial node containing the element.
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub type_ref: Option<String>,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default)]
    pub geometry: Option<RawGeometry>,
    #[serde(default)]
    pub property_sets: Vec<PropertySet>,
}

impl ElementRecord {
    pub fn new(global_id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            global_id: global_id.into(),
            entity_type: entity_type.into(),
            name: None,
            container: None,
            type_ref: None,
            materials: Vec::new(),
            geometry: None,
            property_sets: Vec::new(),
        }
    }
}

macro_rules! impl_entity {
    ($ty:ty, $field:ident) => {
        impl Entity for $ty {
            fn global_id(&self) -> &str {
                &self.global_id
            }

            fn entity_type(&self) -> &str {
                &self.$field
            }
        }
    };
    ($ty:ty, $fixed:literal) => {
        impl Entity for $ty {
            fn global_id(&self) -> &str {
                &self.global_id
            }

            fn entity_type(&self) -> &str {
                $fixed
            }
        }
    };
}

impl_entity!(SpatialNode, entity_type);
impl_entity!(TypeRecord, entity_type);
impl_entity!(ElementRecord, entity_type);
impl_entity!(MaterialRecord, "Material");
impl_entity!(SystemRecord, "System");
