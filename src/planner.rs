//! Transfer plan builder.
//!
//! Turns a validated [`ProtocolConfig`] into the ordered list of
//! [`TransferStep`]s a driver executes. Every volume is checked against the
//! pipette that will move it before the plan is returned, so a misconfigured
//! recipe fails here and never reaches the robot.

use crate::allocation::WellAllocation;
use crate::config::ProtocolConfig;
use crate::error::PlanError;
use crate::labware::LabwareCatalog;
use crate::pipette::PipetteSpec;
use crate::recipe::Recipe;
use crate::LABWARE;
use pcr_protocol::{
    MixSpec, ReagentKind, ReagentTotal, StepFlags, StepKind, TipPolicy, TransferPlan,
    TransferStep, WellGroup, TRANSFER_PLAN_SCHEMA,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub plan_schema: String,
    pub step_kinds: Vec<String>,
    pub reagents: Vec<String>,
    pub tip_policies: Vec<String>,
    pub export_formats: Vec<String>,
    pub deterministic_plan: bool,
}

/// Plans with the bundled labware catalog.
pub fn plan_protocol(config: &ProtocolConfig) -> Result<TransferPlan, PlanError> {
    ProtocolPlanner::new(config, &LABWARE).plan()
}

pub struct ProtocolPlanner<'a> {
    config: &'a ProtocolConfig,
    catalog: &'a LabwareCatalog,
}

impl<'a> ProtocolPlanner<'a> {
    pub fn new(config: &'a ProtocolConfig, catalog: &'a LabwareCatalog) -> Self {
        Self { config, catalog }
    }

    pub fn capabilities() -> Capabilities {
        Capabilities {
            plan_schema: TRANSFER_PLAN_SCHEMA.to_string(),
            step_kinds: [
                StepKind::Reagent,
                StepKind::Template,
                StepKind::Homogenize,
                StepKind::Distribute,
            ]
            .iter()
            .map(|k| k.as_str().to_string())
            .collect(),
            reagents: ReagentKind::SHARED
                .iter()
                .chain([ReagentKind::Template].iter())
                .map(|r| r.as_str().to_string())
                .collect(),
            tip_policies: [
                TipPolicy::Once,
                TipPolicy::Always,
                TipPolicy::Keep,
                TipPolicy::Never,
            ]
            .iter()
            .map(|t| t.as_str().to_string())
            .collect(),
            export_formats: vec!["json".to_string(), "csv".to_string()],
            deterministic_plan: true,
        }
    }

    pub fn plan(&self) -> Result<TransferPlan, PlanError> {
        let config = self.config;
        config.validate()?;
        let recipe = Recipe::from_config(config)?;
        let allocation = WellAllocation::allocate(config, self.catalog)?;
        self.check_capacities(&recipe, &allocation)?;

        let mut steps: Vec<TransferStep> = vec![];
        let mut reagent_totals: Vec<ReagentTotal> = vec![];

        for reagent in ReagentKind::SHARED {
            let volume = recipe.scaled_volume(reagent);
            if volume == 0.0 {
                debug!("skipping {} step: nothing to dispense", reagent.as_str());
                continue;
            }
            let source = self.reagent_source(reagent)?;
            let step = self.reagent_step(steps.len(), reagent, source, &allocation, volume)?;
            reagent_totals.push(ReagentTotal {
                reagent,
                sources: step.source.clone().unwrap_or_default(),
                volume: step.total_volume(),
            });
            steps.push(step);
        }

        let template = self.template_step(steps.len(), &recipe, &allocation)?;
        reagent_totals.push(ReagentTotal {
            reagent: ReagentKind::Template,
            sources: allocation.template_sources.clone(),
            volume: template.total_volume(),
        });
        steps.push(template);

        steps.push(self.homogenize_step(steps.len(), &recipe, &allocation)?);

        for group in &allocation.destination_groups {
            let step = self.distribute_step(steps.len(), &allocation, group)?;
            steps.push(step);
        }

        info!(
            steps = steps.len(),
            samples = allocation.sample_count,
            aligned = allocation.aligned_count,
            replicates = allocation.destination_groups.len(),
            "transfer plan built"
        );

        Ok(TransferPlan {
            schema: TRANSFER_PLAN_SCHEMA.to_string(),
            recipe: recipe.scaled(),
            allocation: allocation.summary(),
            padding_wells: allocation.padding_wells.clone(),
            reagent_totals,
            steps,
        })
    }

    /// Volume assembled in the emptiest intermediate well: padding wells get
    /// no template.
    fn smallest_well_volume(&self, recipe: &Recipe, allocation: &WellAllocation) -> f64 {
        if allocation.padding_wells.is_empty() {
            recipe.scaled_total()
        } else {
            recipe.scaled_total() - recipe.scaled_volume(ReagentKind::Template)
        }
    }

    fn check_capacities(
        &self,
        recipe: &Recipe,
        allocation: &WellAllocation,
    ) -> Result<(), PlanError> {
        let slots = &self.config.labware;
        let mix_vessel = self.catalog.require(&slots.mix_vessel.labware)?;
        let scaled_total = recipe.scaled_total();
        if scaled_total > mix_vessel.well_capacity {
            return Err(PlanError::volume_out_of_range(format!(
                "Each well of '{}' would hold {scaled_total} µL but holds at most {} µL",
                slots.mix_vessel.label, mix_vessel.well_capacity
            )));
        }
        let plate = self.catalog.require(&slots.output_plate.labware)?;
        if self.config.total_reaction_volume > plate.well_capacity {
            return Err(PlanError::volume_out_of_range(format!(
                "Reaction volume {} µL exceeds the {} µL wells of '{}'",
                self.config.total_reaction_volume, plate.well_capacity, slots.output_plate.label
            )));
        }
        // every well feeds each replicate; the last sweep still reserves the disposal volume
        let total = self.config.total_reaction_volume;
        let disposal = self.config.disposal_volume;
        let earlier_sweeps = self.config.replicate_count.saturating_sub(1) as f64 * total;
        let left_for_last = self.smallest_well_volume(recipe, allocation) - earlier_sweeps;
        if left_for_last + 1e-9 < total + disposal {
            let which = if allocation.padding_wells.is_empty() {
                "each intermediate well"
            } else {
                "each padding well"
            };
            return Err(PlanError::volume_out_of_range(format!(
                "The last replicate needs {total} µL plus {disposal} µL disposal, but {which} has only {left_for_last} µL left"
            )));
        }
        Ok(())
    }

    fn reagent_source(&self, reagent: ReagentKind) -> Result<WellGroup, PlanError> {
        let slots = &self.config.labware;
        let well = match reagent {
            ReagentKind::Water => &slots.water_well,
            ReagentKind::PcrMix => &slots.pcr_mix_well,
            ReagentKind::ForwardPrimer => &slots.forward_primer_well,
            ReagentKind::ReversePrimer => &slots.reverse_primer_well,
            ReagentKind::Template => {
                return Err(PlanError::new(
                    crate::error::ErrorCode::Internal,
                    "Templates are drawn from the template rack, not the trough",
                ));
            }
        };
        let trough = self.catalog.require(&slots.source_trough.labware)?;
        trough.well_addresses(&slots.source_trough.label, well, 1)
    }

    fn check_mix(
        &self,
        pipette: &PipetteSpec,
        mix: &MixSpec,
        what: &str,
    ) -> Result<(), PlanError> {
        pipette.check_volume(mix.volume, &format!("{what} mix"))
    }

    fn reagent_step(
        &self,
        index: usize,
        reagent: ReagentKind,
        source: WellGroup,
        allocation: &WellAllocation,
        volume: f64,
    ) -> Result<TransferStep, PlanError> {
        let pipette = &self.config.pipettes.multi_channel;
        pipette.check_volume(volume, reagent.display_name())?;
        let flags = match reagent {
            ReagentKind::Water => StepFlags {
                blow_out: true,
                touch_tip: self.config.water_touch_tip_offset,
                ..StepFlags::default()
            },
            _ => {
                self.check_mix(pipette, &self.config.reagent_mix, reagent.display_name())?;
                StepFlags {
                    post_mix: Some(self.config.reagent_mix),
                    blow_out: true,
                    ..StepFlags::default()
                }
            }
        };
        Ok(TransferStep {
            index,
            kind: StepKind::Reagent,
            reagent: Some(reagent),
            pipette: pipette.name.clone(),
            source: Some(source),
            destination: allocation.aligned_wells.clone(),
            volume,
            flags,
        })
    }

    fn template_step(
        &self,
        index: usize,
        recipe: &Recipe,
        allocation: &WellAllocation,
    ) -> Result<TransferStep, PlanError> {
        let pipette = &self.config.pipettes.single_channel;
        let volume = recipe.scaled_volume(ReagentKind::Template);
        pipette.check_volume(volume, ReagentKind::Template.display_name())?;
        self.check_mix(pipette, &self.config.reagent_mix, "Template")?;
        let destination = allocation.intermediate_wells.clone();
        if destination.max_index().unwrap_or(0) >= allocation.sample_count {
            return Err(PlanError::new(
                crate::error::ErrorCode::Internal,
                "Template step would address a padding well",
            ));
        }
        Ok(TransferStep {
            index,
            kind: StepKind::Template,
            reagent: Some(ReagentKind::Template),
            pipette: pipette.name.clone(),
            source: Some(allocation.template_sources.clone()),
            destination,
            volume,
            flags: StepFlags {
                post_mix: Some(self.config.reagent_mix),
                blow_out: true,
                tip_policy: TipPolicy::Always,
                ..StepFlags::default()
            },
        })
    }

    fn homogenize_step(
        &self,
        index: usize,
        recipe: &Recipe,
        allocation: &WellAllocation,
    ) -> Result<TransferStep, PlanError> {
        let pipette = &self.config.pipettes.multi_channel;
        let mix = MixSpec::new(
            self.config.homogenize_mix.repetitions,
            self.config
                .homogenize_mix
                .volume
                .min(self.smallest_well_volume(recipe, allocation)),
        );
        pipette.check_volume(mix.volume, "Homogenization mix")?;
        Ok(TransferStep {
            index,
            kind: StepKind::Homogenize,
            reagent: None,
            pipette: pipette.name.clone(),
            source: None,
            destination: allocation.aligned_wells.clone(),
            volume: mix.volume,
            flags: StepFlags {
                post_mix: Some(mix),
                tip_policy: TipPolicy::Keep,
                ..StepFlags::default()
            },
        })
    }

    fn distribute_step(
        &self,
        index: usize,
        allocation: &WellAllocation,
        group: &WellGroup,
    ) -> Result<TransferStep, PlanError> {
        let pipette = &self.config.pipettes.multi_channel;
        let volume = self.config.total_reaction_volume;
        let disposal = self.config.disposal_volume;
        pipette.check_volume(volume, "Distribution")?;
        pipette.check_volume(volume + disposal, "Distribution with disposal volume")?;
        Ok(TransferStep {
            index,
            kind: StepKind::Distribute,
            reagent: None,
            pipette: pipette.name.clone(),
            source: Some(allocation.aligned_wells.clone()),
            destination: group.clone(),
            volume,
            flags: StepFlags {
                blow_out: true,
                tip_policy: TipPolicy::Never,
                disposal_volume: Some(disposal),
                dispense_speed: self.config.dispense_speed,
                ..StepFlags::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn config(replicate_count: usize, template_count: usize) -> ProtocolConfig {
        ProtocolConfig {
            replicate_count,
            template_count,
            ..ProtocolConfig::default()
        }
    }

    #[test]
    fn test_reference_scenario() {
        let plan = plan_protocol(&config(10, 8)).unwrap();
        let kinds = plan.steps.iter().map(|s| s.kind).collect::<Vec<_>>();
        assert_eq!(kinds[..6], [
            StepKind::Reagent,
            StepKind::Reagent,
            StepKind::Reagent,
            StepKind::Reagent,
            StepKind::Template,
            StepKind::Homogenize,
        ]);
        assert_eq!(plan.steps.len(), 6 + 10);
        let volumes = plan.steps[..5].iter().map(|s| s.volume).collect::<Vec<_>>();
        assert_eq!(volumes, vec![253.0, 220.0, 27.5, 27.5, 22.0]);
        assert_eq!(
            plan.steps[..4]
                .iter()
                .map(|s| s.reagent.unwrap())
                .collect::<Vec<_>>(),
            ReagentKind::SHARED.to_vec()
        );
        assert_eq!(plan.allocation.aligned_count, 8);
        assert_eq!(plan.allocation.padding_count, 0);

        let distributions = plan.steps_of_kind(StepKind::Distribute).collect::<Vec<_>>();
        assert_eq!(distributions.len(), 10);
        for (i, step) in distributions.iter().enumerate() {
            assert_eq!(step.volume, 50.0);
            assert_eq!(step.flags.disposal_volume, Some(10.0));
            assert_eq!(step.flags.tip_policy, TipPolicy::Never);
            assert_eq!(step.destination.len(), 8);
            assert_eq!(
                step.destination.first().unwrap().well,
                format!("A{}", i + 1)
            );
        }
        assert!(plan.steps.iter().enumerate().all(|(i, s)| s.index == i));
    }

    #[test]
    fn test_step_flags() {
        let plan = plan_protocol(&ProtocolConfig::default()).unwrap();
        let water = &plan.steps[0];
        assert_eq!(water.flags.touch_tip, Some(-20.0));
        assert!(water.flags.post_mix.is_none());
        assert!(water.flags.blow_out);
        let mix = &plan.steps[1];
        assert_eq!(mix.flags.post_mix, Some(MixSpec::new(2, 50.0)));
        let template = &plan.steps[4];
        assert_eq!(template.flags.tip_policy, TipPolicy::Always);
        assert_eq!(template.pipette, "p200");
        let homogenize = &plan.steps[5];
        assert_eq!(homogenize.flags.post_mix, Some(MixSpec::new(5, 300.0)));
        assert_eq!(homogenize.flags.tip_policy, TipPolicy::Keep);
        assert!(homogenize.source.is_none());
    }

    #[test]
    fn test_padding_scenario() {
        let plan = plan_protocol(&config(5, 10)).unwrap();
        assert_eq!(plan.allocation.aligned_count, 16);
        assert_eq!(plan.allocation.row_count, 2);
        assert_eq!(plan.allocation.padding_count, 6);
        assert_eq!(plan.steps[0].volume, 138.0);
        for step in plan.steps_of_kind(StepKind::Reagent) {
            assert_eq!(step.destination.len(), 16);
        }
        let template = plan.steps_of_kind(StepKind::Template).next().unwrap();
        assert_eq!(template.destination.len(), 10);
        assert!(template.destination.iter().all(|w| w.index < 10));
        assert!(template
            .destination
            .iter()
            .all(|w| !plan.padding_wells.contains(w)));
        assert_eq!(plan.steps_of_kind(StepKind::Distribute).count(), 5);
    }

    #[test]
    fn test_template_never_reaches_padding() {
        for n in 1..=18usize {
            let plan = plan_protocol(&config(3, n)).unwrap();
            let template = plan.steps_of_kind(StepKind::Template).next().unwrap();
            assert_eq!(template.destination.len(), n);
            assert!(template.destination.max_index().unwrap() < n);
            assert_eq!(plan.allocation.padding_count, n.div_ceil(8) * 8 - n);
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        let cfg = config(5, 10);
        let a = serde_json::to_string(&plan_protocol(&cfg).unwrap()).unwrap();
        let b = serde_json::to_string(&plan_protocol(&cfg).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_negative_water_fails_before_any_step() {
        // 50 - 40 - 2 x 5 - 2 = -2 µL of water
        let cfg = ProtocolConfig {
            master_mix_volume: 40.0,
            primer_volume: 5.0,
            ..ProtocolConfig::default()
        };
        let err = plan_protocol(&cfg).unwrap_err();
        assert_eq!(err.code, ErrorCode::Configuration);
        assert!(err.message.contains("water"));
    }

    #[test]
    fn test_zero_water_step_omitted() {
        let cfg = ProtocolConfig {
            total_reaction_volume: 27.0,
            disposal_volume: 5.0,
            ..ProtocolConfig::default()
        };
        let plan = plan_protocol(&cfg).unwrap();
        assert_ne!(plan.steps[0].reagent, Some(ReagentKind::Water));
        assert_eq!(plan.steps_of_kind(StepKind::Reagent).count(), 3);
        assert_eq!(plan.reagent_totals.len(), 4);
    }

    #[test]
    fn test_historical_pipette_minimums_reject_primer_step() {
        let mut cfg = ProtocolConfig::default();
        cfg.pipettes.multi_channel = PipetteSpec::new("p300_multi", 8, 50.0, 300.0);
        let err = plan_protocol(&cfg).unwrap_err();
        assert_eq!(err.code, ErrorCode::VolumeOutOfRange);
        assert!(err.message.contains("Forward primer"));
    }

    #[test]
    fn test_scaled_volume_above_pipette_maximum() {
        // 33 µL water x 11 = 363 µL, beyond a 300 µL pipette
        let cfg = ProtocolConfig {
            total_reaction_volume: 60.0,
            ..config(10, 4)
        };
        let err = plan_protocol(&cfg).unwrap_err();
        assert_eq!(err.code, ErrorCode::VolumeOutOfRange);
        assert!(err.message.contains("Water"));
    }

    #[test]
    fn test_template_below_single_channel_minimum() {
        let mut cfg = config(5, 10);
        cfg.pipettes.single_channel = PipetteSpec::new("p200", 1, 20.0, 200.0);
        let err = plan_protocol(&cfg).unwrap_err();
        assert_eq!(err.code, ErrorCode::VolumeOutOfRange);
        assert!(err.message.contains("Template"));
    }

    #[test]
    fn test_disposal_must_fit_pipette_and_overage() {
        let cfg = ProtocolConfig {
            disposal_volume: 60.0,
            ..ProtocolConfig::default()
        };
        assert_eq!(
            plan_protocol(&cfg).unwrap_err().code,
            ErrorCode::VolumeOutOfRange
        );
        let mut cfg = ProtocolConfig::default();
        cfg.pipettes.multi_channel.max_volume = 55.0;
        cfg.homogenize_mix.volume = 50.0;
        cfg.replicate_count = 1;
        cfg.primer_volume = 10.0;
        cfg.template_volume = 10.0;
        let err = plan_protocol(&cfg).unwrap_err();
        assert!(err.message.contains("disposal"));
    }

    #[test]
    fn test_reagent_totals() {
        let plan = plan_protocol(&config(5, 10)).unwrap();
        let water = &plan.reagent_totals[0];
        assert_eq!(water.reagent, ReagentKind::Water);
        assert_eq!(water.volume, 138.0 * 16.0);
        assert_eq!(water.sources.names(), vec!["A1"]);
        let template = plan.reagent_totals.last().unwrap();
        assert_eq!(template.reagent, ReagentKind::Template);
        // 12 µL into each of the ten live wells
        assert_eq!(template.volume, 120.0);
        assert_eq!(template.sources.len(), 10);
    }

    #[test]
    fn test_padding_wells_must_cover_every_replicate() {
        // padding wells hold 45 x 11 = 495 µL; nine sweeps leave 45 µL for 50 + 10
        let cfg = ProtocolConfig {
            template_volume: 5.0,
            ..config(10, 4)
        };
        let err = plan_protocol(&cfg).unwrap_err();
        assert_eq!(err.code, ErrorCode::VolumeOutOfRange);
        assert!(err.message.contains("padding well"));

        // without padding the same recipe fits
        let cfg = ProtocolConfig {
            template_volume: 5.0,
            ..config(10, 8)
        };
        assert!(plan_protocol(&cfg).is_ok());
    }

    #[test]
    fn test_homogenize_mix_fits_padding_wells() {
        // one replicate needs bigger primer aliquots to clear the multichannel minimum
        let cfg = ProtocolConfig {
            primer_volume: 5.0,
            ..config(1, 10)
        };
        let plan = plan_protocol(&cfg).unwrap();
        let homogenize = plan.steps_of_kind(StepKind::Homogenize).next().unwrap();
        // live wells hold 100 µL, padding wells 96 µL
        assert_eq!(homogenize.volume, 96.0);
        assert_eq!(homogenize.flags.post_mix, Some(MixSpec::new(5, 96.0)));

        let plan = plan_protocol(&ProtocolConfig {
            template_count: 8,
            ..cfg
        })
        .unwrap();
        let homogenize = plan.steps_of_kind(StepKind::Homogenize).next().unwrap();
        assert_eq!(homogenize.volume, 100.0);
    }

    #[test]
    fn test_capabilities() {
        let caps = ProtocolPlanner::capabilities();
        assert_eq!(caps.step_kinds.len(), 4);
        assert!(caps.reagents.contains(&"template".to_string()));
        assert!(caps.deterministic_plan);
    }
}
