//! Protocol parameters.
//!
//! A [`ProtocolConfig`] is the only input of a planning run. Every derived
//! quantity is a pure function of it.

use crate::error::PlanError;
use crate::pipette::PipetteSettings;
use pcr_protocol::MixSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A piece of labware placed on the deck under a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselSlot {
    pub labware: String,
    pub label: String,
}

impl VesselSlot {
    pub fn new(labware: &str, label: &str) -> Self {
        Self {
            labware: labware.to_string(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabwareSettings {
    pub mix_vessel: VesselSlot,
    pub source_trough: VesselSlot,
    pub output_plate: VesselSlot,
    pub template_rack: VesselSlot,
    pub single_channel_tips: VesselSlot,
    pub multi_channel_tips: VesselSlot,
    pub water_well: String,
    pub pcr_mix_well: String,
    pub forward_primer_well: String,
    pub reverse_primer_well: String,
    pub template_start_well: String,
}

impl Default for LabwareSettings {
    fn default() -> Self {
        Self {
            mix_vessel: VesselSlot::new("96-deep-well", "mix-trough"),
            source_trough: VesselSlot::new("trough-12row", "source-trough"),
            output_plate: VesselSlot::new("PCR-plate", "output"),
            template_rack: VesselSlot::new("3x6-tube-rack-2ml", "template-rack"),
            single_channel_tips: VesselSlot::new("tiprack-200ul", "p200-rack"),
            multi_channel_tips: VesselSlot::new("tiprack-200ul", "mc-p300-rack"),
            water_well: "A1".to_string(),
            pcr_mix_well: "A2".to_string(),
            forward_primer_well: "A3".to_string(),
            reverse_primer_well: "A4".to_string(),
            template_start_well: "A1".to_string(),
        }
    }
}

impl LabwareSettings {
    pub fn slots(&self) -> [&VesselSlot; 6] {
        [
            &self.mix_vessel,
            &self.source_trough,
            &self.output_plate,
            &self.template_rack,
            &self.single_channel_tips,
            &self.multi_channel_tips,
        ]
    }

    fn validate(&self) -> Result<(), PlanError> {
        let mut labels = HashSet::new();
        for slot in self.slots() {
            if slot.labware.trim().is_empty() || slot.label.trim().is_empty() {
                return Err(PlanError::configuration(
                    "Every vessel needs a labware name and a deck label",
                ));
            }
            if !labels.insert(slot.label.as_str()) {
                return Err(PlanError::configuration(format!(
                    "Deck label '{}' is used by more than one vessel",
                    slot.label
                )));
            }
        }
        let reagent_wells = [
            ("water", &self.water_well),
            ("PCR mix", &self.pcr_mix_well),
            ("forward primer", &self.forward_primer_well),
            ("reverse primer", &self.reverse_primer_well),
        ];
        let mut seen: HashSet<String> = HashSet::new();
        for (what, well) in reagent_wells {
            if !seen.insert(well.trim().to_ascii_uppercase()) {
                return Err(PlanError::configuration(format!(
                    "Trough well '{well}' for {what} is already used by another reagent"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub replicate_count: usize,
    pub template_count: usize,
    pub total_reaction_volume: f64,
    pub master_mix_volume: f64,
    pub template_volume: f64,
    pub primer_volume: f64,
    pub channel_width: usize,
    pub disposal_volume: f64,
    pub reagent_mix: MixSpec,
    pub homogenize_mix: MixSpec,
    pub water_touch_tip_offset: Option<f64>,
    pub dispense_speed: Option<f64>,
    pub pipettes: PipetteSettings,
    pub labware: LabwareSettings,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            replicate_count: 10,
            template_count: 8,
            total_reaction_volume: 50.0,
            master_mix_volume: 20.0,
            template_volume: 2.0,
            primer_volume: 2.5,
            channel_width: 8,
            disposal_volume: 10.0,
            reagent_mix: MixSpec::new(2, 50.0),
            homogenize_mix: MixSpec::new(5, 300.0),
            water_touch_tip_offset: Some(-20.0),
            dispense_speed: Some(300.0),
            pipettes: PipetteSettings::default(),
            labware: LabwareSettings::default(),
        }
    }
}

impl ProtocolConfig {
    pub fn from_json_str(text: &str) -> Result<Self, PlanError> {
        serde_json::from_str(text)
            .map_err(|e| PlanError::invalid_input(format!("Could not parse protocol JSON: {e}")))
    }

    pub fn load_from_path(path: &str) -> Result<Self, PlanError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PlanError::new(
                crate::error::ErrorCode::Io,
                format!("Could not read protocol file '{path}': {e}"),
            )
        })?;
        Self::from_json_str(&text)
            .map_err(|e| PlanError::new(e.code, format!("{} (file '{path}')", e.message)))
    }

    pub fn to_json(&self) -> Result<String, PlanError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Per-reaction water: whatever the other reagents leave of the total.
    pub fn water_volume(&self) -> f64 {
        self.total_reaction_volume
            - self.master_mix_volume
            - 2.0 * self.primer_volume
            - self.template_volume
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        if self.template_count == 0 {
            return Err(PlanError::invalid_sample_count(
                "template_count must be at least 1",
            ));
        }
        if self.replicate_count == 0 {
            return Err(PlanError::configuration(
                "replicate_count must be at least 1",
            ));
        }
        if self.channel_width == 0 {
            return Err(PlanError::configuration("channel_width must be at least 1"));
        }
        let positive = [
            ("total_reaction_volume", self.total_reaction_volume),
            ("master_mix_volume", self.master_mix_volume),
            ("template_volume", self.template_volume),
            ("primer_volume", self.primer_volume),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(PlanError::configuration(format!(
                    "{name} must be a positive volume, got {value}"
                )));
            }
        }
        if !self.disposal_volume.is_finite() || self.disposal_volume < 0.0 {
            return Err(PlanError::configuration(format!(
                "disposal_volume must not be negative, got {}",
                self.disposal_volume
            )));
        }
        let water = self.water_volume();
        if water < 0.0 {
            return Err(PlanError::configuration(format!(
                "total_reaction_volume {} is smaller than master mix {} + 2 x primer {} + template {}; water would be {water}",
                self.total_reaction_volume,
                self.master_mix_volume,
                self.primer_volume,
                self.template_volume
            )));
        }
        for (name, mix) in [
            ("reagent_mix", &self.reagent_mix),
            ("homogenize_mix", &self.homogenize_mix),
        ] {
            if mix.repetitions == 0 || !mix.volume.is_finite() || mix.volume <= 0.0 {
                return Err(PlanError::configuration(format!(
                    "{name} needs at least one repetition and a positive volume"
                )));
            }
        }
        if let Some(speed) = self.dispense_speed {
            if !speed.is_finite() || speed <= 0.0 {
                return Err(PlanError::configuration(format!(
                    "dispense_speed must be positive, got {speed}"
                )));
            }
        }
        self.pipettes.validate(self.channel_width)?;
        self.labware.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProtocolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.water_volume(), 23.0);
    }

    #[test]
    fn test_negative_water_is_configuration_error() {
        let config = ProtocolConfig {
            master_mix_volume: 40.0,
            primer_volume: 5.0,
            ..ProtocolConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::Configuration);
        assert!(err.message.contains("water"));
    }

    #[test]
    fn test_zero_templates_is_invalid_sample_count() {
        let config = ProtocolConfig {
            template_count: 0,
            ..ProtocolConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err().code,
            ErrorCode::InvalidSampleCount
        );
    }

    #[test]
    fn test_zero_replicates_rejected() {
        let config = ProtocolConfig {
            replicate_count: 0,
            ..ProtocolConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().code, ErrorCode::Configuration);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            ProtocolConfig::from_json_str(r#"{"replicate_count": 5, "template_count": 10}"#)
                .unwrap();
        assert_eq!(config.replicate_count, 5);
        assert_eq!(config.template_count, 10);
        assert_eq!(config.primer_volume, 2.5);
        assert_eq!(config.labware.water_well, "A1");
    }

    #[test]
    fn test_non_integer_sample_count_is_invalid_input() {
        let err = ProtocolConfig::from_json_str(r#"{"template_count": 2.5}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        let err = ProtocolConfig::from_json_str(r#"{"template_count": -3}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_shared_trough_well_rejected() {
        let mut config = ProtocolConfig::default();
        config.labware.reverse_primer_well = "a3".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.message.contains("reverse primer"));
    }

    #[test]
    fn test_duplicate_deck_label_rejected() {
        let mut config = ProtocolConfig::default();
        config.labware.output_plate.label = "mix-trough".to_string();
        assert_eq!(config.validate().unwrap_err().code, ErrorCode::Configuration);
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("protocol.json");
        let config = ProtocolConfig {
            replicate_count: 3,
            ..ProtocolConfig::default()
        };
        std::fs::write(&path, config.to_json().unwrap()).unwrap();
        let loaded = ProtocolConfig::load_from_path(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded, config);

        let err = ProtocolConfig::load_from_path("/nonexistent/protocol.json").unwrap_err();
        assert_eq!(err.code, ErrorCode::Io);
    }
}
