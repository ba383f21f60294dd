//! Boundary to the liquid-handling driver, plus a dry-run driver that tracks
//! well volumes and tip usage without touching hardware.

use crate::config::ProtocolConfig;
use crate::error::{ErrorCode, PlanError};
use crate::labware::LabwareCatalog;
use pcr_protocol::{TipPolicy, TransferPlan, TransferStep, WellRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};

const VOLUME_EPSILON: f64 = 1e-6;

/// Executes one step at a time. Implementations perform the physical
/// aspirate/dispense/mix actions; the plan itself is never altered.
pub trait LiquidHandler {
    fn execute(&mut self, step: &TransferStep) -> Result<(), PlanError>;
}

/// Feeds every step to `handler` in order and stops at the first failure.
pub fn run_plan<H: LiquidHandler + ?Sized>(
    plan: &TransferPlan,
    handler: &mut H,
) -> Result<usize, PlanError> {
    for step in &plan.steps {
        debug!(
            index = step.index,
            kind = step.kind.as_str(),
            volume = step.volume,
            wells = step.destination.len(),
            "executing step"
        );
        handler.execute(step).map_err(|e| {
            PlanError::new(e.code, format!("Step {} ({}): {}", step.index, step.kind.as_str(), e.message))
        })?;
    }
    Ok(plan.steps.len())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellVolume {
    pub well: WellRef,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DryRunReport {
    pub steps_executed: usize,
    pub tips_used: BTreeMap<String, usize>,
    /// Liquid drawn from wells that were never filled by the plan, i.e. the
    /// reagent trough and template tubes.
    pub supply_draws: Vec<WellVolume>,
    pub final_volumes: Vec<WellVolume>,
}

#[derive(Debug, Clone)]
struct TipSupply {
    channels: usize,
    capacity: usize,
}

#[derive(Debug, Clone)]
pub struct DryRun {
    capacities: HashMap<String, f64>,
    tip_supply: HashMap<String, TipSupply>,
    volumes: BTreeMap<WellRef, f64>,
    supply_draws: BTreeMap<WellRef, f64>,
    tips_used: BTreeMap<String, usize>,
    holding_tip: BTreeSet<String>,
    steps_executed: usize,
}

impl DryRun {
    pub fn new(config: &ProtocolConfig, catalog: &LabwareCatalog) -> Result<Self, PlanError> {
        let slots = &config.labware;
        let mut capacities = HashMap::new();
        for slot in slots.slots() {
            let labware = catalog.require(&slot.labware)?;
            capacities.insert(slot.label.clone(), labware.well_capacity);
        }
        let mut tip_supply = HashMap::new();
        for (pipette, rack) in [
            (&config.pipettes.single_channel, &slots.single_channel_tips),
            (&config.pipettes.multi_channel, &slots.multi_channel_tips),
        ] {
            tip_supply.insert(
                pipette.name.clone(),
                TipSupply {
                    channels: pipette.channels,
                    capacity: catalog.require(&rack.labware)?.well_count(),
                },
            );
        }
        Ok(Self {
            capacities,
            tip_supply,
            volumes: BTreeMap::new(),
            supply_draws: BTreeMap::new(),
            tips_used: BTreeMap::new(),
            holding_tip: BTreeSet::new(),
            steps_executed: 0,
        })
    }

    pub fn volume(&self, well: &WellRef) -> f64 {
        self.volumes.get(well).copied().unwrap_or_default()
    }

    pub fn tips_used(&self, pipette: &str) -> usize {
        self.tips_used.get(pipette).copied().unwrap_or_default()
    }

    pub fn report(&self) -> DryRunReport {
        let to_list = |map: &BTreeMap<WellRef, f64>| {
            map.iter()
                .map(|(well, volume)| WellVolume {
                    well: well.clone(),
                    volume: *volume,
                })
                .collect::<Vec<_>>()
        };
        DryRunReport {
            steps_executed: self.steps_executed,
            tips_used: self.tips_used.clone(),
            supply_draws: to_list(&self.supply_draws),
            final_volumes: to_list(&self.volumes),
        }
    }

    fn pick_up_tip(&mut self, pipette: &str) -> Result<(), PlanError> {
        let supply = self.tip_supply.get(pipette).ok_or_else(|| {
            PlanError::invalid_input(format!("Unknown pipette '{pipette}'"))
        })?;
        let used = self.tips_used.entry(pipette.to_string()).or_default();
        *used += supply.channels;
        if *used > supply.capacity {
            return Err(PlanError::grid_overflow(format!(
                "Tip rack for '{pipette}' is exhausted after {} of {} tips",
                *used - supply.channels,
                supply.capacity
            )));
        }
        self.holding_tip.insert(pipette.to_string());
        trace!(pipette, used = *used, "picked up tip");
        Ok(())
    }

    fn draw(&mut self, well: &WellRef, volume: f64, reserve: f64) -> Result<(), PlanError> {
        match self.volumes.get_mut(well) {
            Some(balance) => {
                if *balance + VOLUME_EPSILON < volume + reserve {
                    return Err(PlanError::volume_out_of_range(format!(
                        "Well {} of '{}' holds {} µL; cannot aspirate {volume} µL plus {reserve} µL disposal",
                        well.well, well.vessel, *balance
                    )));
                }
                *balance -= volume;
            }
            None => *self.supply_draws.entry(well.clone()).or_default() += volume,
        }
        Ok(())
    }

    fn dispense(&mut self, well: &WellRef, volume: f64) -> Result<(), PlanError> {
        let capacity = self.capacities.get(&well.vessel).copied().unwrap_or(f64::INFINITY);
        let balance = self.volumes.entry(well.clone()).or_default();
        *balance += volume;
        if *balance > capacity + VOLUME_EPSILON {
            return Err(PlanError::volume_out_of_range(format!(
                "Well {} of '{}' would hold {} µL, above its {capacity} µL capacity",
                well.well, well.vessel, *balance
            )));
        }
        Ok(())
    }
}

impl LiquidHandler for DryRun {
    fn execute(&mut self, step: &TransferStep) -> Result<(), PlanError> {
        let pairs = step.pairs();
        match step.flags.tip_policy {
            TipPolicy::Once | TipPolicy::Keep => self.pick_up_tip(&step.pipette)?,
            TipPolicy::Always => {
                for _ in 0..pairs.len() {
                    self.pick_up_tip(&step.pipette)?;
                }
            }
            TipPolicy::Never => {
                if !self.holding_tip.contains(&step.pipette) {
                    return Err(PlanError::new(
                        ErrorCode::InvalidInput,
                        format!("Pipette '{}' has no tip to reuse", step.pipette),
                    ));
                }
            }
        }

        let reserve = step.flags.disposal_volume.unwrap_or_default();
        for (source, destination) in pairs {
            match source {
                Some(source) => {
                    self.draw(source, step.volume, reserve)?;
                    self.dispense(destination, step.volume)?;
                }
                None => {
                    if self.volume(destination) <= 0.0 {
                        return Err(PlanError::invalid_input(format!(
                            "Cannot mix empty well {} of '{}'",
                            destination.well, destination.vessel
                        )));
                    }
                }
            }
        }

        if matches!(step.flags.tip_policy, TipPolicy::Once | TipPolicy::Always) {
            self.holding_tip.remove(&step.pipette);
        }
        self.steps_executed += 1;
        Ok(())
    }
}
