//! Master-mix scaling.
//!
//! Each intermediate well holds the reagents for `replicate_count + 1`
//! reactions; the extra reaction is dead volume for pipetting losses.

use crate::config::ProtocolConfig;
use crate::error::PlanError;
use pcr_protocol::{ReagentKind, ScaledReagent};
use tracing::debug;

/// `per_reaction * (replicate_count + 1)`. The overage is unconditional,
/// so zero replicates still scale by one.
pub fn scale(per_reaction: f64, replicate_count: usize) -> f64 {
    per_reaction * (replicate_count + 1) as f64
}

fn volumes_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Recipe {
    replicate_count: usize,
    total_reaction_volume: f64,
    per_reaction: Vec<(ReagentKind, f64)>,
}

impl Recipe {
    pub fn from_config(config: &ProtocolConfig) -> Result<Self, PlanError> {
        let water = config.water_volume();
        if water < 0.0 {
            return Err(PlanError::configuration(format!(
                "Recipe leaves a negative water volume ({water} µL per reaction)"
            )));
        }
        let recipe = Self {
            replicate_count: config.replicate_count,
            total_reaction_volume: config.total_reaction_volume,
            per_reaction: vec![
                (ReagentKind::Water, water),
                (ReagentKind::PcrMix, config.master_mix_volume),
                (ReagentKind::ForwardPrimer, config.primer_volume),
                (ReagentKind::ReversePrimer, config.primer_volume),
                (ReagentKind::Template, config.template_volume),
            ],
        };
        recipe.check_conservation()?;
        debug!(
            replicate_count = recipe.replicate_count,
            scaled_total = recipe.scaled_total(),
            "scaled master-mix recipe"
        );
        Ok(recipe)
    }

    pub fn replicate_count(&self) -> usize {
        self.replicate_count
    }

    pub fn total_reaction_volume(&self) -> f64 {
        self.total_reaction_volume
    }

    pub fn per_reaction(&self, reagent: ReagentKind) -> f64 {
        self.per_reaction
            .iter()
            .find(|(kind, _)| *kind == reagent)
            .map(|(_, v)| *v)
            .unwrap_or_default()
    }

    pub fn scaled_volume(&self, reagent: ReagentKind) -> f64 {
        scale(self.per_reaction(reagent), self.replicate_count)
    }

    pub fn scaled(&self) -> Vec<ScaledReagent> {
        self.per_reaction
            .iter()
            .map(|(reagent, v)| ScaledReagent {
                reagent: *reagent,
                per_reaction: *v,
                scaled: scale(*v, self.replicate_count),
            })
            .collect()
    }

    /// Volume one intermediate well ends up holding.
    pub fn scaled_total(&self) -> f64 {
        scale(self.total_reaction_volume, self.replicate_count)
    }

    pub fn check_conservation(&self) -> Result<(), PlanError> {
        let sum: f64 = self.scaled().iter().map(|r| r.scaled).sum();
        let expected = self.scaled_total();
        if !volumes_match(sum, expected) {
            return Err(PlanError::configuration(format!(
                "Scaled reagents add up to {sum} µL per well, expected {expected} µL"
            )));
        }
        Ok(())
    }
}
