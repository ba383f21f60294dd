//! Curated protocol parameter sets.

use crate::config::ProtocolConfig;
use crate::planner::plan_protocol;
use pcr_protocol::TransferPlan;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

pub const PROTOCOL_EXAMPLE_SCHEMA: &str = "pcr_gradient.protocol_example.v1";
pub const DEFAULT_PROTOCOL_EXAMPLE_DIR: &str = "docs/examples/protocols";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolExample {
    #[serde(default = "default_example_schema")]
    pub schema: String,
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub protocol: ProtocolConfig,
}

fn default_example_schema() -> String {
    PROTOCOL_EXAMPLE_SCHEMA.to_string()
}

#[derive(Debug, Clone)]
pub struct LoadedProtocolExample {
    pub path: PathBuf,
    pub example: ProtocolExample,
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn parse_example(path: &Path) -> Result<ProtocolExample, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Could not read example '{}': {e}", display_path(path)))?;
    serde_json::from_str::<ProtocolExample>(&raw)
        .map_err(|e| format!("Could not parse example '{}': {e}", display_path(path)))
}

fn validate_example(path: &Path, example: &ProtocolExample) -> Result<(), String> {
    if example.schema != PROTOCOL_EXAMPLE_SCHEMA {
        return Err(format!(
            "Example '{}' uses unsupported schema '{}'; expected '{}'",
            display_path(path),
            example.schema,
            PROTOCOL_EXAMPLE_SCHEMA
        ));
    }
    if example.id.trim().is_empty() {
        return Err(format!("Example '{}' has empty id", display_path(path)));
    }
    if example.title.trim().is_empty() {
        return Err(format!("Example '{}' has empty title", display_path(path)));
    }
    example
        .protocol
        .validate()
        .map_err(|e| format!("Example '{}' is not a valid protocol: {e}", display_path(path)))
}

pub fn load_protocol_examples(source_dir: &Path) -> Result<Vec<LoadedProtocolExample>, String> {
    let mut paths = vec![];
    for entry in fs::read_dir(source_dir)
        .map_err(|e| format!("Could not read '{}': {e}", display_path(source_dir)))?
    {
        let entry = entry.map_err(|e| format!("Could not read directory entry: {e}"))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
        {
            paths.push(path);
        }
    }
    paths.sort();
    if paths.is_empty() {
        return Err(format!(
            "No example JSON files found in '{}'",
            display_path(source_dir)
        ));
    }
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut loaded = vec![];
    for path in paths {
        let example = parse_example(&path)?;
        validate_example(&path, &example)?;
        if !seen_ids.insert(example.id.clone()) {
            return Err(format!(
                "Duplicate example id '{}' (found in '{}')",
                example.id,
                display_path(&path)
            ));
        }
        loaded.push(LoadedProtocolExample { path, example });
    }
    Ok(loaded)
}

pub fn plan_example(example: &ProtocolExample) -> Result<TransferPlan, String> {
    plan_protocol(&example.protocol)
        .map_err(|e| format!("Protocol example '{}' failed: {e}", example.id))
}
