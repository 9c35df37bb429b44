use std::collections::HashMap;

use serde_json::json;

use super::{for_each_entity, persist, unreadable, OnEntityError, Stage, StageTally};
use crate::model::StageName;
use crate::pipeline::{PipelineContext, PipelineError};
use crate::storage::ExtractionSink;

/// Builds the system lookup and the element-to-system membership index.
pub struct SystemsStage;

impl Stage for SystemsStage {
    fn name(&self) -> StageName {
        StageName::Systems
    }

    fn run(
        &self,
        ctx: &mut PipelineContext,
        tally: &mut StageTally,
        sink: &dyn ExtractionSink,
    ) -> Result<(), PipelineError> {
        let stage = self.name();
        let mut systems = HashMap::new();
        let mut membership: HashMap<String, Vec<String>> = HashMap::new();

        {
            let ctx = &*ctx;
            let entities = ctx.source.systems().map_err(unreadable(stage))?;
            for_each_entity(
                stage,
                &ctx.cancel,
                ctx.cancel_check_interval,
                entities,
                tally,
                OnEntityError::Report,
                |system, tally| {
                    if system.members.is_empty() {
                        tally.warn(Some(&system.global_id), Some("System"), "system has no members");
                    }
                    for member in &system.members {
                        membership
                            .entry(member.clone())
                            .or_default()
                            .push(system.global_id.clone());
                    }
                    persist(
                        sink,
                        ctx,
                        stage,
                        &system.global_id,
                        "System",
                        json!({
                            "global_id": system.global_id,
                            "name": system.name,
                            "members": system.members,
                        }),
                    )?;
                    systems.insert(system.global_id.clone(), system);
                    tally.processed();
                    Ok(())
                },
            )?;
        }

        ctx.systems = Some(systems);
        ctx.system_membership = membership;
        Ok(())
    }
}
