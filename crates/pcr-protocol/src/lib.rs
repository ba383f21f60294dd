//! Shared machine-readable contracts between the planner and a liquid-handling
//! driver.
//!
//! Everything here is plain data: a [`TransferPlan`] is computed once, then
//! handed verbatim to whatever executes it.

use serde::{Deserialize, Serialize};

pub const TRANSFER_PLAN_SCHEMA: &str = "pcr_gradient.transfer_plan.v1";

/// One well of one labelled vessel on the deck.
///
/// `index` is the position of the well in the vessel's fill order, so two
/// wells of the same vessel compare in the order a pipette visits them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WellRef {
    pub vessel: String,
    pub index: usize,
    pub well: String,
}

impl WellRef {
    pub fn new(vessel: &str, index: usize, well: &str) -> Self {
        Self {
            vessel: vessel.to_string(),
            index,
            well: well.to_string(),
        }
    }
}

/// Ordered wells addressed together by one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellGroup {
    pub wells: Vec<WellRef>,
}

impl WellGroup {
    pub fn new(wells: Vec<WellRef>) -> Self {
        Self { wells }
    }

    pub fn len(&self) -> usize {
        self.wells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WellRef> {
        self.wells.iter()
    }

    pub fn first(&self) -> Option<&WellRef> {
        self.wells.first()
    }

    pub fn max_index(&self) -> Option<usize> {
        self.wells.iter().map(|w| w.index).max()
    }

    pub fn contains(&self, well: &WellRef) -> bool {
        self.wells.contains(well)
    }

    pub fn take(&self, count: usize) -> WellGroup {
        WellGroup::new(self.wells.iter().take(count).cloned().collect())
    }

    pub fn skip(&self, count: usize) -> WellGroup {
        WellGroup::new(self.wells.iter().skip(count).cloned().collect())
    }

    pub fn names(&self) -> Vec<String> {
        self.wells.iter().map(|w| w.well.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReagentKind {
    Water,
    PcrMix,
    ForwardPrimer,
    ReversePrimer,
    Template,
}

impl ReagentKind {
    /// Reagents identical across all wells, in dispensing order.
    pub const SHARED: [ReagentKind; 4] = [
        ReagentKind::Water,
        ReagentKind::PcrMix,
        ReagentKind::ForwardPrimer,
        ReagentKind::ReversePrimer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Water => "water",
            Self::PcrMix => "pcr_mix",
            Self::ForwardPrimer => "forward_primer",
            Self::ReversePrimer => "reverse_primer",
            Self::Template => "template",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Water => "Water",
            Self::PcrMix => "PCR master mix",
            Self::ForwardPrimer => "Forward primer",
            Self::ReversePrimer => "Reverse primer",
            Self::Template => "Template DNA",
        }
    }

    pub fn is_shared(self) -> bool {
        !matches!(self, Self::Template)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Reagent,
    Template,
    Homogenize,
    Distribute,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reagent => "reagent",
            Self::Template => "template",
            Self::Homogenize => "homogenize",
            Self::Distribute => "distribute",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipPolicy {
    /// Fresh tip for the step, discarded when the step ends.
    Once,
    /// Fresh tip for every destination well.
    Always,
    /// Fresh tip for the step, left on the pipette for the next step.
    Keep,
    /// Reuse the tip already on the pipette.
    Never,
}

impl TipPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Always => "always",
            Self::Keep => "keep",
            Self::Never => "never",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixSpec {
    pub repetitions: u32,
    pub volume: f64,
}

impl MixSpec {
    pub fn new(repetitions: u32, volume: f64) -> Self {
        Self {
            repetitions,
            volume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFlags {
    pub post_mix: Option<MixSpec>,
    pub blow_out: bool,
    pub touch_tip: Option<f64>,
    pub tip_policy: TipPolicy,
    pub disposal_volume: Option<f64>,
    pub dispense_speed: Option<f64>,
}

impl Default for StepFlags {
    fn default() -> Self {
        Self {
            post_mix: None,
            blow_out: false,
            touch_tip: None,
            tip_policy: TipPolicy::Once,
            disposal_volume: None,
            dispense_speed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferStep {
    pub index: usize,
    pub kind: StepKind,
    pub reagent: Option<ReagentKind>,
    pub pipette: String,
    pub source: Option<WellGroup>,
    pub destination: WellGroup,
    /// Volume dispensed into (or mixed in) each destination well, in µL.
    pub volume: f64,
    pub flags: StepFlags,
}

impl TransferStep {
    /// Source/destination pairs in dispensing order.
    ///
    /// A single-well source feeds every destination; a multi-well source is
    /// paired slot for slot. Mixing steps have no source.
    pub fn pairs(&self) -> Vec<(Option<&WellRef>, &WellRef)> {
        match &self.source {
            None => self.destination.iter().map(|d| (None, d)).collect(),
            Some(src) if src.len() == 1 => self
                .destination
                .iter()
                .map(|d| (src.first(), d))
                .collect(),
            Some(src) => src
                .iter()
                .zip(self.destination.iter())
                .map(|(s, d)| (Some(s), d))
                .collect(),
        }
    }

    /// Total volume leaving the source for this step, in µL.
    pub fn total_volume(&self) -> f64 {
        match self.source {
            Some(_) => self.volume * self.destination.len() as f64,
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaledReagent {
    pub reagent: ReagentKind,
    pub per_reaction: f64,
    pub scaled: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub sample_count: usize,
    pub channel_width: usize,
    pub aligned_count: usize,
    pub row_count: usize,
    pub padding_count: usize,
    pub replicate_groups: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReagentTotal {
    pub reagent: ReagentKind,
    pub sources: WellGroup,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferPlan {
    pub schema: String,
    pub recipe: Vec<ScaledReagent>,
    pub allocation: AllocationSummary,
    pub padding_wells: WellGroup,
    pub reagent_totals: Vec<ReagentTotal>,
    pub steps: Vec<TransferStep>,
}

impl TransferPlan {
    pub fn steps_of_kind(&self, kind: StepKind) -> impl Iterator<Item = &TransferStep> {
        self.steps.iter().filter(move |s| s.kind == kind)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
