//! Mapping samples onto intermediate wells and replicate groups onto the
//! output plate.

use crate::config::ProtocolConfig;
use crate::error::PlanError;
use crate::labware::{LabwareCatalog, LabwareDefinition};
use itertools::Itertools;
use pcr_protocol::{AllocationSummary, WellGroup};
use tracing::{debug, warn};

/// Wells touched by a multichannel operation over `sample_count` samples.
pub fn aligned_count(sample_count: usize, channel_width: usize) -> usize {
    sample_count.div_ceil(channel_width) * channel_width
}

/// Number of channel-width strides covering `aligned_count` wells.
pub fn row_count(aligned_count: usize, channel_width: usize) -> usize {
    aligned_count / channel_width
}

fn require_stride_fit(
    vessel: &LabwareDefinition,
    label: &str,
    channel_width: usize,
) -> Result<(), PlanError> {
    if vessel.stride_len() != channel_width {
        return Err(PlanError::configuration(format!(
            "'{label}' ({}) has strides of {} wells; a {channel_width}-channel pipette cannot address it",
            vessel.name,
            vessel.stride_len()
        )));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
pub struct WellAllocation {
    pub sample_count: usize,
    pub channel_width: usize,
    pub aligned_count: usize,
    pub row_count: usize,
    /// Every mix-vessel well a multichannel step addresses.
    pub aligned_wells: WellGroup,
    /// The first `sample_count` aligned wells: the ones holding a template.
    pub intermediate_wells: WellGroup,
    pub padding_wells: WellGroup,
    pub template_sources: WellGroup,
    /// One group per replicate, slot-aligned with `aligned_wells`.
    pub destination_groups: Vec<WellGroup>,
}

impl WellAllocation {
    pub fn allocate(
        config: &ProtocolConfig,
        catalog: &LabwareCatalog,
    ) -> Result<Self, PlanError> {
        let sample_count = config.template_count;
        let channel_width = config.channel_width;
        if sample_count == 0 {
            return Err(PlanError::invalid_sample_count(
                "Cannot allocate wells for zero samples",
            ));
        }
        if channel_width == 0 {
            return Err(PlanError::configuration("channel_width must be at least 1"));
        }
        let slots = &config.labware;
        let mix_vessel = catalog.require(&slots.mix_vessel.labware)?;
        let plate = catalog.require(&slots.output_plate.labware)?;
        let rack = catalog.require(&slots.template_rack.labware)?;
        require_stride_fit(mix_vessel, &slots.mix_vessel.label, channel_width)?;
        require_stride_fit(plate, &slots.output_plate.label, channel_width)?;

        let aligned = aligned_count(sample_count, channel_width);
        let rows = row_count(aligned, channel_width);
        if aligned > mix_vessel.well_count() {
            return Err(PlanError::grid_overflow(format!(
                "{sample_count} samples need {aligned} channel-aligned wells but '{}' has only {}",
                slots.mix_vessel.label,
                mix_vessel.well_count()
            )));
        }
        let aligned_wells = mix_vessel.wells_from_index(&slots.mix_vessel.label, 0, aligned)?;
        let intermediate_wells = aligned_wells.take(sample_count);
        let padding_wells = aligned_wells.skip(sample_count);

        if sample_count > rack.well_count() {
            return Err(PlanError::grid_overflow(format!(
                "{sample_count} templates do not fit into '{}' ({} positions)",
                slots.template_rack.label,
                rack.well_count()
            )));
        }
        let template_sources = rack.well_addresses(
            &slots.template_rack.label,
            &slots.template_start_well,
            sample_count,
        )?;

        let strides_needed = config.replicate_count * rows;
        if strides_needed > plate.stride_count() {
            return Err(PlanError::grid_overflow(format!(
                "{} replicates of {rows} stride(s) each need {strides_needed} strides on '{}', which has {}",
                config.replicate_count,
                slots.output_plate.label,
                plate.stride_count()
            )));
        }
        let destination_groups = (0..config.replicate_count)
            .map(|r| {
                (r * rows..(r + 1) * rows)
                    .map(|c| plate.column(&slots.output_plate.label, c))
                    .collect::<Result<Vec<_>, _>>()
                    .map(|columns| {
                        WellGroup::new(columns.into_iter().flat_map(|g| g.wells).collect_vec())
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            sample_count,
            aligned_count = aligned,
            row_count = rows,
            replicate_groups = destination_groups.len(),
            "allocated wells"
        );
        if !padding_wells.is_empty() {
            warn!(
                "{} padding well(s) ({}) receive shared reagents but no template",
                padding_wells.len(),
                padding_wells.names().join(", ")
            );
        }

        Ok(Self {
            sample_count,
            channel_width,
            aligned_count: aligned,
            row_count: rows,
            aligned_wells,
            intermediate_wells,
            padding_wells,
            template_sources,
            destination_groups,
        })
    }

    pub fn summary(&self) -> AllocationSummary {
        AllocationSummary {
            sample_count: self.sample_count,
            channel_width: self.channel_width,
            aligned_count: self.aligned_count,
            row_count: self.row_count,
            padding_count: self.padding_wells.len(),
            replicate_groups: self.destination_groups.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn allocate(replicate_count: usize, template_count: usize) -> Result<WellAllocation, PlanError> {
        let config = ProtocolConfig {
            replicate_count,
            template_count,
            ..ProtocolConfig::default()
        };
        WellAllocation::allocate(&config, &LabwareCatalog::default())
    }

    #[test]
    fn test_aligned_count() {
        for n in 1..200usize {
            let a = aligned_count(n, 8);
            assert_eq!(a, n.div_ceil(8) * 8);
            assert!(a >= n);
            assert!(a - n < 8);
            assert_eq!(a % 8, 0);
        }
        assert_eq!(aligned_count(8, 8), 8);
        assert_eq!(aligned_count(1, 8), 8);
        assert_eq!(row_count(16, 8), 2);
    }

    #[test]
    fn test_exact_multiple_has_no_padding() {
        let a = allocate(10, 8).unwrap();
        assert_eq!(a.aligned_count, 8);
        assert!(a.padding_wells.is_empty());
        assert_eq!(a.destination_groups.len(), 10);
        assert_eq!(a.destination_groups[9].first().unwrap().well, "A10");
    }

    #[test]
    fn test_single_sample_pads_seven() {
        let a = allocate(1, 1).unwrap();
        assert_eq!(a.aligned_count, 8);
        assert_eq!(a.intermediate_wells.names(), vec!["A1"]);
        assert_eq!(a.padding_wells.len(), 7);
        assert!(a.padding_wells.contains(a.aligned_wells.wells.last().unwrap()));
        assert!(!a.padding_wells.contains(a.intermediate_wells.first().unwrap()));
    }

    #[test]
    fn test_ten_samples_five_replicates() {
        let a = allocate(5, 10).unwrap();
        assert_eq!(a.aligned_count, 16);
        assert_eq!(a.row_count, 2);
        assert_eq!(a.padding_wells.len(), 6);
        assert_eq!(a.intermediate_wells.len(), 10);
        assert_eq!(a.destination_groups.len(), 5);
        assert!(a.destination_groups.iter().all(|g| g.len() == 16));
        // replicate 1 starts on the third plate column
        assert_eq!(a.destination_groups[1].first().unwrap().well, "A3");
        assert_eq!(a.destination_groups[1].wells[8].well, "A4");
        assert_eq!(a.aligned_wells.wells[8].well, "A2");
        assert_eq!(a.template_sources.names()[3], "A2");
        let summary = a.summary();
        assert_eq!(summary.padding_count, 6);
        assert_eq!(summary.replicate_groups, 5);
    }

    #[test]
    fn test_zero_samples() {
        assert_eq!(
            allocate(10, 0).unwrap_err().code,
            ErrorCode::InvalidSampleCount
        );
    }

    #[test]
    fn test_too_many_replicates_overflow_plate() {
        assert!(allocate(12, 8).is_ok());
        let err = allocate(13, 8).unwrap_err();
        assert_eq!(err.code, ErrorCode::GridOverflow);
        assert!(err.message.contains("13 replicates"));
        assert_eq!(allocate(7, 10).unwrap_err().code, ErrorCode::GridOverflow);
    }

    #[test]
    fn test_template_rack_overflow() {
        assert!(allocate(1, 18).is_ok());
        assert_eq!(allocate(1, 19).unwrap_err().code, ErrorCode::GridOverflow);
    }

    #[test]
    fn test_channel_width_must_match_vessel() {
        let config = ProtocolConfig {
            channel_width: 12,
            ..ProtocolConfig::default()
        };
        let err = WellAllocation::allocate(&config, &LabwareCatalog::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::Configuration);
    }
}
