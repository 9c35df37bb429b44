use std::collections::HashMap;

use serde_json::json;

use super::{for_each_entity, persist, unreadable, OnEntityError, Stage, StageTally};
use crate::model::StageName;
use crate::pipeline::{PipelineContext, PipelineError};
use crate::storage::ExtractionSink;

pub struct MaterialsStage;

impl Stage for MaterialsStage {
    fn name(&self) -> StageName {
        StageName::Materials
    }

    fn run(
        &self,
        ctx: &mut PipelineContext,
        tally: &mut StageTally,
        sink: &dyn ExtractionSink,
    ) -> Result<(), PipelineError> {
        let stage = self.name();
        let mut materials = HashMap::new();

        {
            let ctx = &*ctx;
            let entities = ctx.source.materials().map_err(unreadable(stage))?;
            for_each_entity(
                stage,
                &ctx.cancel,
                ctx.cancel_check_interval,
                entities,
                tally,
                OnEntityError::Report,
                |material, tally| {
                    if material.name.trim().is_empty() {
                        tally.warn(Some(&material.global_id), Some("Material"), "material has no name");
                    }
                    persist(
                        sink,
                        ctx,
                        stage,
                        &material.global_id,
                        "Material",
                        json!({
                            "global_id": material.global_id,
                            "name": material.name,
                            "category": material.category,
                        }),
                    )?;
                    materials.insert(material.global_id.clone(), material);
                    tally.processed();
                    Ok(())
                },
            )?;
        }

        ctx.materials = Some(materials);
        Ok(())
    }
}
