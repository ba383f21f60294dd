use labware::LabwareCatalog;
use lazy_static::lazy_static;

pub mod about;
pub mod allocation;
pub mod config;
pub mod driver;
pub mod error;
pub mod export;
pub mod labware;
pub mod pipette;
pub mod planner;
pub mod protocol_examples;
pub mod recipe;

pub use pcr_protocol;

lazy_static! {
    // Bundled vessel geometry
    pub static ref LABWARE: LabwareCatalog = LabwareCatalog::default();
}
