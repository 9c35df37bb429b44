use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LodLevel {
    /// Decimate every element down to the target triangle count.
    #[default]
    Low,
    /// Keep full detail; decimation is skipped.
    High,
}

impl LodLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LodLevel::Low => "low",
            LodLevel::High => "high",
        }
    }
}

impl fmt::Display for LodLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LodLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(LodLevel::Low),
            "high" => Ok(LodLevel::High),
            other => Err(format!("unknown LOD level '{}'", other)),
        }
    }
}

/// Job-level LOD policy, applied uniformly to every element's geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LodPolicy {
    #[serde(default)]
    pub level: LodLevel,
    #[serde(default = "default_target_triangles")]
    pub target_triangles: usize,
}

fn default_target_triangles() -> usize {
    LodPolicy::DEFAULT_TARGET_TRIANGLES
}

impl LodPolicy {
    pub const DEFAULT_TARGET_TRIANGLES: usize = 2000;

    pub fn low() -> Self {
        Self {
            level: LodLevel::Low,
            target_triangles: Self::DEFAULT_TARGET_TRIANGLES,
        }
    }

    pub fn high() -> Self {
        Self {
            level: LodLevel::High,
            target_triangles: Self::DEFAULT_TARGET_TRIANGLES,
        }
    }

    pub fn with_target(mut self, target_triangles: usize) -> Self {
        self.target_triangles = target_triangles;
        self
    }

    /// Per-element triangle budget, or `None` when decimation is skipped.
    pub fn triangle_budget(&self) -> Option<usize> {
        match self.level {
            LodLevel::Low => Some(self.target_triangles),
            LodLevel::High => None,
        }
    }
}

impl Default for LodPolicy {
    fn default() -> Self {
        Self::low()
    }
}
