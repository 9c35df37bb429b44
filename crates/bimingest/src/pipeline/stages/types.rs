use std::collections::HashMap;

use serde_json::json;

use super::{for_each_entity, persist, unreadable, OnEntityError, Stage, StageTally};
use crate::model::StageName;
use crate::pipeline::{PipelineContext, PipelineError};
use crate::storage::ExtractionSink;

/// Builds the element type lookup. Material references are checked only
/// when the materials stage produced a lookup.
pub struct TypesStage;

impl Stage for TypesStage {
    fn name(&self) -> StageName {
        StageName::Types
    }

    fn run(
        &self,
        ctx: &mut PipelineContext,
        tally: &mut StageTally,
        sink: &dyn ExtractionSink,
    ) -> Result<(), PipelineError> {
        let stage = self.name();
        let mut types = HashMap::new();

        {
            let ctx = &*ctx;
            let entities = ctx.source.types().map_err(unreadable(stage))?;
            for_each_entity(
                stage,
                &ctx.cancel,
                ctx.cancel_check_interval,
                entities,
                tally,
                OnEntityError::Report,
                |type_record, tally| {
                    if let (Some(material), Some(known)) = (&type_record.material, &ctx.materials) {
                        if !known.contains_key(material) {
                            tally.warn(
                                Some(&type_record.global_id),
                                Some(&type_record.entity_type),
                                format!("unknown material '{}'", material),
                            );
                        }
                    }
                    persist(
                        sink,
                        ctx,
                        stage,
                        &type_record.global_id,
                        &type_record.entity_type,
                        json!({
                            "global_id": type_record.global_id,
                            "type": type_record.entity_type,
                            "name": type_record.name,
                            "material": type_record.material,
                        }),
                    )?;
                    types.insert(type_record.global_id.clone(), type_record);
                    tally.processed();
                    Ok(())
                },
            )?;
        }

        ctx.types = Some(types);
        Ok(())
    }
}
