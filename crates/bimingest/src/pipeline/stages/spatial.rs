use std::collections::HashMap;

use serde_json::json;

use super::{for_each_entity, persist, unreadable, OnEntityError, Stage, StageTally};
use crate::model::StageName;
use crate::pipeline::{PipelineContext, PipelineError};
use crate::storage::ExtractionSink;

/// Builds the spatial lookup (project, sites, buildings, storeys, spaces).
pub struct SpatialHierarchyStage;

impl Stage for SpatialHierarchyStage {
    fn name(&self) -> StageName {
        StageName::SpatialHierarchy
    }

    fn run(
        &self,
        ctx: &mut PipelineContext,
        tally: &mut StageTally,
        sink: &dyn ExtractionSink,
    ) -> Result<(), PipelineError> {
        let stage = self.name();
        let mut nodes = HashMap::new();

        {
            let ctx = &*ctx;
            let entities = ctx.source.spatial_hierarchy().map_err(unreadable(stage))?;
            for_each_entity(
                stage,
                &ctx.cancel,
                ctx.cancel_check_interval,
                entities,
                tally,
                OnEntityError::Report,
                |node, tally| {
                    persist(
                        sink,
                        ctx,
                        stage,
                        &node.global_id,
                        &node.entity_type,
                        json!({
                            "global_id": node.global_id,
                            "type": node.entity_type,
                            "name": node.name,
                            "parent": node.parent,
                        }),
                    )?;
                    nodes.insert(node.global_id.clone(), node);
                    tally.processed();
                    Ok(())
                },
            )?;
        }

        // Parents may appear after their children, so resolve once complete.
        let mut orphans: Vec<_> = nodes
            .values()
            .filter_map(|node| {
                let parent = node.parent.as_deref()?;
                (!nodes.contains_key(parent)).then_some((node, parent))
            })
            .collect();
        orphans.sort_by(|a, b| a.0.global_id.cmp(&b.0.global_id));
        for (node, parent) in orphans {
            tally.warn(
                Some(&node.global_id),
                Some(&node.entity_type),
                format!("parent '{}' is not part of the spatial hierarchy", parent),
            );
        }

        ctx.spatial = Some(nodes);
        Ok(())
    }
}
