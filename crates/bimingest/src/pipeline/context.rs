use std::collections::{HashMap, HashSet};

use crate::geometry::LodPolicy;
use crate::parser::{MaterialRecord, ParseContext, SpatialNode, SystemRecord, TypeRecord};

use super::cancel::CancelToken;

/// Identity of the job attempt driving the pipeline.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub target_id: String,
    pub attempt: u32,
    pub lod: LodPolicy,
}

/// State threaded through every stage of one job attempt.
///
/// Lookups are `None` until the stage that builds them has completed, so a
/// downstream stage can tell "empty" from "never built".
pub struct PipelineContext {
    pub job: JobContext,
    pub source: Box<dyn ParseContext>,
    pub cancel: CancelToken,
    /// Elements processed between cancellation checks.
    pub cancel_check_interval: usize,

    // spatial-hierarchy
    pub spatial: Option<HashMap<String, SpatialNode>>,
    // materials
    pub materials: Option<HashMap<String, MaterialRecord>>,
    // types
    pub types: Option<HashMap<String, TypeRecord>>,
    // systems, plus element id -> system ids
    pub systems: Option<HashMap<String, SystemRecord>>,
    pub system_membership: HashMap<String, Vec<String>>,
    // elements-and-geometry: ids of elements that were extracted
    pub elements: Option<HashSet<String>>,
}

impl PipelineContext {
    pub fn new(job: JobContext, source: Box<dyn ParseContext>, cancel: CancelToken) -> Self {
        Self {
            job,
            source,
            cancel,
            cancel_check_interval: 64,
            spatial: None,
            materials: None,
            types: None,
            systems: None,
            system_membership: HashMap::new(),
            elements: None,
        }
    }

    pub fn with_cancel_check_interval(mut self, interval: usize) -> Self {
        self.cancel_check_interval = interval.max(1);
        self
    }
}
