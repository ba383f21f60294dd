//! Vessel geometry and well addressing.

use crate::error::PlanError;
use anyhow::{Result, anyhow};
use csv::ReaderBuilder;
use pcr_protocol::{WellGroup, WellRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillOrder {
    /// A1, B1, C1, ... then A2: one column is one multichannel stride.
    ColumnMajor,
    /// A1, A2, A3, ... then B1.
    RowMajor,
}

impl FillOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ColumnMajor => "column_major",
            Self::RowMajor => "row_major",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        let norm = text.trim().to_ascii_lowercase();
        match norm.as_str() {
            "column_major" | "column" => Some(Self::ColumnMajor),
            "row_major" | "row" => Some(Self::RowMajor),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabwareDefinition {
    pub name: String,
    pub rows: usize,
    pub columns: usize,
    pub well_capacity: f64,
    pub fill_order: FillOrder,
}

impl LabwareDefinition {
    pub fn well_count(&self) -> usize {
        self.rows * self.columns
    }

    /// Number of wells visited before the fill order wraps to the next
    /// column (or row).
    pub fn stride_len(&self) -> usize {
        match self.fill_order {
            FillOrder::ColumnMajor => self.rows,
            FillOrder::RowMajor => self.columns,
        }
    }

    pub fn stride_count(&self) -> usize {
        match self.fill_order {
            FillOrder::ColumnMajor => self.columns,
            FillOrder::RowMajor => self.rows,
        }
    }

    pub fn well_name(row: usize, column: usize) -> String {
        format!("{}{}", (b'A' + row as u8) as char, column + 1)
    }

    /// Zero-based (row, column) of a well name such as `H12`.
    pub fn parse_well(&self, name: &str) -> Option<(usize, usize)> {
        let name = name.trim();
        let mut chars = name.chars();
        let letter = chars.next()?.to_ascii_uppercase();
        if !letter.is_ascii_uppercase() {
            return None;
        }
        let row = (letter as u8 - b'A') as usize;
        let column: usize = chars.as_str().parse().ok()?;
        if row >= self.rows || column == 0 || column > self.columns {
            return None;
        }
        Some((row, column - 1))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        let (row, column) = self.parse_well(name)?;
        Some(match self.fill_order {
            FillOrder::ColumnMajor => column * self.rows + row,
            FillOrder::RowMajor => row * self.columns + column,
        })
    }

    pub fn position_at(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.well_count() {
            return None;
        }
        Some(match self.fill_order {
            FillOrder::ColumnMajor => (index % self.rows, index / self.rows),
            FillOrder::RowMajor => (index / self.columns, index % self.columns),
        })
    }

    pub fn well_at(&self, label: &str, index: usize) -> Option<WellRef> {
        let (row, column) = self.position_at(index)?;
        Some(WellRef::new(label, index, &Self::well_name(row, column)))
    }

    /// `count` wells of the vessel labelled `label`, starting at fill-order
    /// position `start`.
    pub fn wells_from_index(
        &self,
        label: &str,
        start: usize,
        count: usize,
    ) -> Result<WellGroup, PlanError> {
        let end = start.saturating_add(count);
        if end > self.well_count() {
            return Err(PlanError::grid_overflow(format!(
                "'{label}' ({}) has {} wells; {count} wells from position {start} do not fit",
                self.name,
                self.well_count()
            )));
        }
        let wells = (start..end)
            .filter_map(|i| self.well_at(label, i))
            .collect::<Vec<_>>();
        Ok(WellGroup::new(wells))
    }

    /// Ordered addressing starting at a named well, e.g. `("A1", 8)`.
    pub fn well_addresses(
        &self,
        label: &str,
        start: &str,
        count: usize,
    ) -> Result<WellGroup, PlanError> {
        let start_index = self.index_of(start).ok_or_else(|| {
            PlanError::configuration(format!(
                "Well '{start}' does not exist on '{label}' ({}, {}x{})",
                self.name, self.rows, self.columns
            ))
        })?;
        self.wells_from_index(label, start_index, count)
    }

    /// One full column of a column-major vessel (one row for row-major
    /// vessels), in fill order.
    pub fn column(&self, label: &str, index: usize) -> Result<WellGroup, PlanError> {
        let len = self.stride_len();
        self.wells_from_index(label, index * len, len)
    }
}

#[derive(Clone, Debug)]
pub struct LabwareCatalog {
    definitions: HashMap<String, LabwareDefinition>,
}

impl LabwareCatalog {
    pub fn from_csv_str(csv_text: &str) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(csv_text.as_bytes());

        let mut definitions = HashMap::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let field = |i: usize| {
                record
                    .get(i)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| anyhow!("Labware row {} is missing column {i}", line + 1))
            };
            let name = field(0)?.to_string();
            let rows: usize = field(1)?.parse()?;
            let columns: usize = field(2)?.parse()?;
            let well_capacity: f64 = field(3)?.parse()?;
            let fill_order = FillOrder::parse(field(4)?)
                .ok_or_else(|| anyhow!("Unknown fill order for labware '{name}'"))?;
            if rows == 0 || rows > 26 || columns == 0 {
                return Err(anyhow!(
                    "Labware '{name}' has an unusable grid {rows}x{columns}"
                ));
            }
            if !well_capacity.is_finite() || well_capacity <= 0.0 {
                return Err(anyhow!("Labware '{name}' has no usable well capacity"));
            }
            definitions.insert(
                name.clone(),
                LabwareDefinition {
                    name,
                    rows,
                    columns,
                    well_capacity,
                    fill_order,
                },
            );
        }
        Ok(Self { definitions })
    }

    pub fn get(&self, name: &str) -> Option<&LabwareDefinition> {
        self.definitions.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&LabwareDefinition, PlanError> {
        self.get(name).ok_or_else(|| {
            PlanError::configuration(format!(
                "Unknown labware '{name}'; known labware: {}",
                self.names_sorted().join(", ")
            ))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabwareDefinition> {
        self.definitions.values()
    }

    pub fn names_sorted(&self) -> Vec<String> {
        let mut names = self.definitions.keys().cloned().collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}

impl Default for LabwareCatalog {
    fn default() -> Self {
        Self::from_csv_str(include_str!("../assets/labware.csv"))
            .expect("Bundled labware catalog is malformed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plate() -> LabwareDefinition {
        LabwareCatalog::default().get("PCR-plate").unwrap().clone()
    }

    #[test]
    fn test_default_catalog() {
        let catalog = LabwareCatalog::default();
        assert_eq!(catalog.names_sorted().len(), 5);
        let trough = catalog.get("trough-12row").unwrap();
        assert_eq!(trough.well_count(), 12);
        assert_eq!(trough.stride_len(), 1);
        assert!(catalog.require("no-such-plate").is_err());
    }

    #[test]
    fn test_column_major_addressing() {
        let p = plate();
        let wells = p.well_addresses("output", "A1", 10).unwrap();
        assert_eq!(
            wells.names(),
            vec!["A1", "B1", "C1", "D1", "E1", "F1", "G1", "H1", "A2", "B2"]
        );
        assert_eq!(wells.max_index(), Some(9));
        assert_eq!(p.index_of("H12"), Some(95));
        assert_eq!(p.index_of("A2"), Some(8));
    }

    #[test]
    fn test_row_major_addressing() {
        let mut p = plate();
        p.fill_order = FillOrder::RowMajor;
        let wells = p.well_addresses("output", "A11", 3).unwrap();
        assert_eq!(wells.names(), vec!["A11", "A12", "B1"]);
        assert_eq!(p.stride_len(), 12);
    }

    #[test]
    fn test_bad_start_well() {
        let p = plate();
        assert!(p.parse_well("I1").is_none());
        assert!(p.parse_well("A13").is_none());
        assert!(p.parse_well("A0").is_none());
        let err = p.well_addresses("output", "Z9", 1).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Configuration);
    }

    #[test]
    fn test_overrun_is_grid_overflow() {
        let p = plate();
        let err = p.well_addresses("output", "H12", 2).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::GridOverflow);
        assert!(p.wells_from_index("output", 88, 8).is_ok());
    }

    #[test]
    fn test_column() {
        let p = plate();
        let col = p.column("output", 2).unwrap();
        assert_eq!(col.first().unwrap().well, "A3");
        assert_eq!(col.names().last().unwrap(), "H3");
        assert_eq!(col.len(), 8);
        assert_eq!(p.column("output", 12).unwrap_err().code, crate::error::ErrorCode::GridOverflow);
    }

    #[test]
    fn test_malformed_catalog() {
        let text = "name,rows,columns,well_capacity_ul,fill_order\nbad,0,12,10,column_major\n";
        assert!(LabwareCatalog::from_csv_str(text).is_err());
        let text = "name,rows,columns,well_capacity_ul,fill_order\nbad,8,12,10,diagonal\n";
        assert!(LabwareCatalog::from_csv_str(text).is_err());
    }
}
