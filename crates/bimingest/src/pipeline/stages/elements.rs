use std::collections::HashSet;

use serde_json::json;

use super::{for_each_entity, persist, unreadable, OnEntityError, Stage, StageTally};
use crate::geometry::{check_decimation, decimate, validate_mesh};
use crate::model::StageName;
use crate::parser::{ElementRecord, RawGeometry};
use crate::pipeline::{ElementFailure, PipelineContext, PipelineError};
use crate::storage::ExtractionSink;

/// Extracts building elements and their geometry.
///
/// Needs the spatial and type lookups. Meshes are validated, then bounded
/// by the job's LOD policy; an element whose mesh is rejected fails on its
/// own and is left out of the extracted set.
pub struct ElementsAndGeometryStage;

struct Mesh {
    vertices: Vec<[f64; 3]>,
    faces: Vec<[u32; 3]>,
    source_triangles: usize,
}

fn bound_geometry(geometry: &RawGeometry, budget: Option<usize>) -> Result<Mesh, ElementFailure> {
    validate_mesh(&geometry.vertices, &geometry.faces).map_err(ElementFailure::Geometry)?;

    let source_triangles = geometry.faces.len();
    let Some(target) = budget else {
        return Ok(Mesh {
            vertices: geometry.vertices.clone(),
            faces: geometry.faces.clone(),
            source_triangles,
        });
    };

    let (vertices, faces) = decimate(&geometry.vertices, &geometry.faces, target);
    check_decimation(source_triangles, &vertices, &faces).map_err(ElementFailure::Decimation)?;

    Ok(Mesh {
        vertices,
        faces,
        source_triangles,
    })
}

impl Stage for ElementsAndGeometryStage {
    fn name(&self) -> StageName {
        StageName::ElementsAndGeometry
    }

    fn run(
        &self,
        ctx: &mut PipelineContext,
        tally: &mut StageTally,
        sink: &dyn ExtractionSink,
    ) -> Result<(), PipelineError> {
        let stage = self.name();
        let mut extracted = HashSet::new();

        {
            let ctx = &*ctx;
            let spatial = ctx.spatial.as_ref().ok_or(PipelineError::MissingLookup {
                stage,
                lookup: "spatial",
            })?;
            let types = ctx.types.as_ref().ok_or(PipelineError::MissingLookup {
                stage,
                lookup: "types",
            })?;
            let budget = ctx.job.lod.triangle_budget();

            let entities = ctx.source.elements().map_err(unreadable(stage))?;
            for_each_entity(
                stage,
                &ctx.cancel,
                ctx.cancel_check_interval,
                entities,
                tally,
                OnEntityError::Report,
                |element: ElementRecord, tally| {
                    let id = element.global_id.as_str();
                    let ty = element.entity_type.as_str();

                    if let Some(container) = element.container.as_deref() {
                        if !spatial.contains_key(container) {
                            tally.warn(Some(id), Some(ty), format!("unknown container '{}'", container));
                        }
                    }
                    if let Some(type_ref) = element.type_ref.as_deref() {
                        if !types.contains_key(type_ref) {
                            tally.warn(Some(id), Some(ty), format!("unknown type '{}'", type_ref));
                        }
                    }
                    if let Some(materials) = &ctx.materials {
                        for material in element.materials.iter().filter(|m| !materials.contains_key(*m)) {
                            tally.warn(Some(id), Some(ty), format!("unknown material '{}'", material));
                        }
                    }

                    let mesh = match element.geometry.as_ref().map(|g| bound_geometry(g, budget)) {
                        Some(Ok(mesh)) => Some(mesh),
                        Some(Err(failure)) => {
                            tally.fail(Some(id), Some(ty), failure);
                            return Ok(());
                        }
                        None => None,
                    };

                    let geometry = mesh.map(|m| {
                        json!({
                            "vertices": m.vertices,
                            "faces": m.faces,
                            "source_triangles": m.source_triangles,
                            "triangles": m.faces.len(),
                            "lod": ctx.job.lod.level,
                        })
                    });

                    persist(
                        sink,
                        ctx,
                        stage,
                        id,
                        ty,
                        json!({
                            "global_id": id,
                            "type": ty,
                            "name": element.name,
                            "container": element.container,
                            "type_ref": element.type_ref,
                            "materials": element.materials,
                            "systems": ctx.system_membership.get(id).cloned().unwrap_or_default(),
                            "geometry": geometry,
                        }),
                    )?;

                    extracted.insert(element.global_id.clone());
                    tally.processed();
                    Ok(())
                },
            )?;
        }

        ctx.elements = Some(extracted);
        Ok(())
    }
}
