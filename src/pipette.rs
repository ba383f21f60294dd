use crate::error::PlanError;
use serde::{Deserialize, Serialize};

/// Capability descriptor of one pipette mounted on the robot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipetteSpec {
    pub name: String,
    pub channels: usize,
    pub min_volume: f64,
    pub max_volume: f64,
}

impl PipetteSpec {
    pub fn new(name: &str, channels: usize, min_volume: f64, max_volume: f64) -> Self {
        Self {
            name: name.to_string(),
            channels,
            min_volume,
            max_volume,
        }
    }

    pub fn is_multichannel(&self) -> bool {
        self.channels > 1
    }

    pub fn accepts(&self, volume: f64) -> bool {
        volume.is_finite() && volume >= self.min_volume && volume <= self.max_volume
    }

    /// Fails when `volume` cannot be moved by this pipette in one aspiration.
    /// `what` names the quantity for the error message.
    pub fn check_volume(&self, volume: f64, what: &str) -> Result<(), PlanError> {
        if self.accepts(volume) {
            return Ok(());
        }
        Err(PlanError::volume_out_of_range(format!(
            "{what}: {volume} µL is outside the {min}-{max} µL range of pipette '{name}'",
            min = self.min_volume,
            max = self.max_volume,
            name = self.name
        )))
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        if self.name.trim().is_empty() {
            return Err(PlanError::configuration("Pipette has an empty name"));
        }
        if self.channels == 0 {
            return Err(PlanError::configuration(format!(
                "Pipette '{}' has no channels",
                self.name
            )));
        }
        if !self.min_volume.is_finite()
            || !self.max_volume.is_finite()
            || self.min_volume < 0.0
            || self.min_volume > self.max_volume
        {
            return Err(PlanError::configuration(format!(
                "Pipette '{}' has an invalid volume range {}-{} µL",
                self.name, self.min_volume, self.max_volume
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipetteSettings {
    pub single_channel: PipetteSpec,
    pub multi_channel: PipetteSpec,
}

impl Default for PipetteSettings {
    fn default() -> Self {
        Self {
            single_channel: PipetteSpec::new("p200", 1, 2.0, 200.0),
            multi_channel: PipetteSpec::new("p300_multi", 8, 10.0, 300.0),
        }
    }
}

impl PipetteSettings {
    pub fn validate(&self, channel_width: usize) -> Result<(), PlanError> {
        self.single_channel.validate()?;
        self.multi_channel.validate()?;
        if self.single_channel.is_multichannel() {
            return Err(PlanError::configuration(format!(
                "Template pipette '{}' must have a single channel, not {}",
                self.single_channel.name, self.single_channel.channels
            )));
        }
        if self.multi_channel.channels != channel_width {
            return Err(PlanError::configuration(format!(
                "Multichannel pipette '{}' has {} channels but the channel width is {channel_width}",
                self.multi_channel.name, self.multi_channel.channels
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_bounds_are_inclusive() {
        let p = PipetteSpec::new("p200", 1, 20.0, 200.0);
        assert!(p.accepts(20.0));
        assert!(p.accepts(200.0));
        assert!(!p.accepts(19.9));
        assert!(!p.accepts(f64::NAN));
        let err = p.check_volume(220.0, "template").unwrap_err();
        assert_eq!(err.code, ErrorCode::VolumeOutOfRange);
        assert!(err.message.contains("template"));
        assert!(err.message.contains("p200"));
    }

    #[test]
    fn test_settings_validation() {
        let settings = PipetteSettings::default();
        assert!(settings.validate(8).is_ok());
        assert_eq!(
            settings.validate(12).unwrap_err().code,
            ErrorCode::Configuration
        );

        let mut settings = PipetteSettings::default();
        settings.single_channel.channels = 8;
        assert!(settings.validate(8).is_err());

        let mut settings = PipetteSettings::default();
        settings.multi_channel.min_volume = 400.0;
        assert!(settings.validate(8).is_err());
    }
}
