use serde_json::json;

use super::{for_each_entity, persist, unreadable, OnEntityError, Stage, StageTally};
use crate::model::StageName;
use crate::parser::ElementRecord;
use crate::pipeline::{PipelineContext, PipelineError};
use crate::storage::ExtractionSink;

/// Extracts property sets of the elements the geometry stage accepted.
///
/// Elements that failed earlier are skipped without a second diagnostic.
pub struct PropertiesStage;

impl Stage for PropertiesStage {
    fn name(&self) -> StageName {
        StageName::Properties
    }

    fn run(
        &self,
        ctx: &mut PipelineContext,
        tally: &mut StageTally,
        sink: &dyn ExtractionSink,
    ) -> Result<(), PipelineError> {
        let stage = self.name();
        let ctx = &*ctx;
        let extracted = ctx.elements.as_ref().ok_or(PipelineError::MissingLookup {
            stage,
            lookup: "elements",
        })?;

        let entities = ctx.source.elements().map_err(unreadable(stage))?;
        for_each_entity(
            stage,
            &ctx.cancel,
            ctx.cancel_check_interval,
            entities,
            tally,
            OnEntityError::Skip,
            |element: ElementRecord, tally| {
                if !extracted.contains(&element.global_id) {
                    tally.skip_silently();
                    return Ok(());
                }
                if element.property_sets.is_empty() {
                    tally.skip_silently();
                    return Ok(());
                }

                for set in &element.property_sets {
                    for (name, value) in &set.properties {
                        if value.is_unknown() {
                            tally.warn(
                                Some(&element.global_id),
                                Some(&element.entity_type),
                                format!("property '{}.{}' has an unrecognized value", set.name, name),
                            );
                        }
                    }
                }

                persist(
                    sink,
                    ctx,
                    stage,
                    &element.global_id,
                    &element.entity_type,
                    json!({
                        "global_id": element.global_id,
                        "property_sets": element.property_sets,
                    }),
                )?;
                tally.processed();
                Ok(())
            },
        )
    }
}
