//! Plan export: pretty JSON and a flat CSV worklist with one row per
//! well-to-well movement.

use crate::error::PlanError;
use pcr_protocol::{TransferPlan, WellRef};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorklistRow {
    pub step: usize,
    pub kind: String,
    pub reagent: String,
    pub pipette: String,
    pub source_vessel: String,
    pub source_well: String,
    pub destination_vessel: String,
    pub destination_well: String,
    pub volume_ul: f64,
    pub tip_policy: String,
}

pub fn worklist_rows(plan: &TransferPlan) -> Vec<WorklistRow> {
    let mut rows = vec![];
    for step in &plan.steps {
        for (source, destination) in step.pairs() {
            let (source_vessel, source_well) = source
                .map(|s: &WellRef| (s.vessel.clone(), s.well.clone()))
                .unwrap_or_default();
            rows.push(WorklistRow {
                step: step.index,
                kind: step.kind.as_str().to_string(),
                reagent: step
                    .reagent
                    .map(|r| r.as_str().to_string())
                    .unwrap_or_default(),
                pipette: step.pipette.clone(),
                source_vessel,
                source_well,
                destination_vessel: destination.vessel.clone(),
                destination_well: destination.well.clone(),
                volume_ul: step.volume,
                tip_policy: step.flags.tip_policy.as_str().to_string(),
            });
        }
    }
    rows
}

pub fn write_worklist<W: Write>(plan: &TransferPlan, writer: W) -> Result<(), PlanError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in worklist_rows(plan) {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn worklist_to_string(plan: &TransferPlan) -> Result<String, PlanError> {
    let mut buffer = vec![];
    write_worklist(plan, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| PlanError::new(crate::error::ErrorCode::Internal, e.to_string()))
}

pub fn save_worklist(plan: &TransferPlan, path: &Path) -> Result<(), PlanError> {
    let file = std::fs::File::create(path).map_err(|e| {
        PlanError::new(
            crate::error::ErrorCode::Io,
            format!("Could not create worklist '{}': {e}", path.display()),
        )
    })?;
    write_worklist(plan, file)
}

pub fn save_plan_json(plan: &TransferPlan, path: &Path) -> Result<(), PlanError> {
    let text = plan.to_json()?;
    std::fs::write(path, text).map_err(|e| {
        PlanError::new(
            crate::error::ErrorCode::Io,
            format!("Could not write plan '{}': {e}", path.display()),
        )
    })
}
