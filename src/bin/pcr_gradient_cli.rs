use pcr_gradient::{
    LABWARE, about,
    config::ProtocolConfig,
    driver::{DryRun, run_plan},
    export::{save_plan_json, save_worklist, worklist_to_string},
    planner::{ProtocolPlanner, plan_protocol},
    protocol_examples::{DEFAULT_PROTOCOL_EXAMPLE_DIR, load_protocol_examples, plan_example},
};
use serde::Serialize;
use std::{env, fs, path::Path};
use tracing::{debug, trace};
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct LabwareSummary {
    name: String,
    rows: usize,
    columns: usize,
    well_capacity: f64,
    fill_order: String,
}

#[derive(Serialize)]
struct ExampleSummary {
    id: String,
    path: String,
    steps: usize,
    aligned_count: usize,
    padding_count: usize,
}

fn usage() {
    eprintln!(
        "Usage:\n  \
  pcr_gradient_cli --version\n  \
  pcr_gradient_cli [-v|-vv|-vvv] capabilities\n  \
  pcr_gradient_cli [-v|-vv|-vvv] defaults\n  \
  pcr_gradient_cli [-v|-vv|-vvv] labware\n  \
  pcr_gradient_cli [-v|-vv|-vvv] validate '<protocol-json>'\n  \
  pcr_gradient_cli [-v|-vv|-vvv] plan '<protocol-json>' [OUTPUT.json]\n  \
  pcr_gradient_cli [-v|-vv|-vvv] worklist '<protocol-json>' [OUTPUT.csv]\n  \
  pcr_gradient_cli [-v|-vv|-vvv] simulate '<protocol-json>'\n  \
  pcr_gradient_cli [-v|-vv|-vvv] examples [DIR]\n\n  \
  Tip: pass @file.json instead of inline JSON"
    );
}

fn load_json_arg(value: &str) -> Result<String, String> {
    if let Some(path) = value.strip_prefix('@') {
        fs::read_to_string(path).map_err(|e| format!("Could not read JSON file '{path}': {e}"))
    } else {
        Ok(value.to_string())
    }
}

fn load_config(value: &str) -> Result<ProtocolConfig, String> {
    let json = load_json_arg(value)?;
    ProtocolConfig::from_json_str(&json).map_err(|e| e.to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Could not serialize JSON output: {e}"))?;
    println!("{text}");
    Ok(())
}

/// Strips leading `-v` flags and returns the verbosity they add up to.
fn parse_verbosity(args: &[String]) -> (u8, usize) {
    let mut verbose = 0u8;
    let mut idx = 1usize;
    while idx < args.len() {
        let arg = args[idx].as_str();
        if arg.len() > 1 && arg.starts_with('-') && arg[1..].chars().all(|c| c == 'v') {
            verbose = verbose.saturating_add((arg.len() - 1) as u8);
            idx += 1;
        } else {
            break;
        }
    }
    (verbose, idx)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .with_line_number(verbose >= 3)
        .init();
}

fn required_arg<'a>(args: &'a [String], idx: usize, what: &str) -> Result<&'a str, String> {
    match args.get(idx) {
        Some(value) => Ok(value.as_str()),
        None => {
            usage();
            Err(format!("Missing {what}"))
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        return Err("Missing command".to_string());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", about::version_cli_text());
        return Ok(());
    }

    let (verbose, cmd_idx) = parse_verbosity(&args);
    init_logging(verbose);
    trace!("Full CLI args: {:?}", args);
    if args.len() <= cmd_idx {
        usage();
        return Err("Missing command".to_string());
    }

    let command = &args[cmd_idx];
    debug!(command = command.as_str(), verbose, "running command");

    match command.as_str() {
        "capabilities" => print_json(&ProtocolPlanner::capabilities()),
        "defaults" => print_json(&ProtocolConfig::default()),
        "labware" => {
            let mut summaries = LABWARE
                .iter()
                .map(|l| LabwareSummary {
                    name: l.name.clone(),
                    rows: l.rows,
                    columns: l.columns,
                    well_capacity: l.well_capacity,
                    fill_order: l.fill_order.as_str().to_string(),
                })
                .collect::<Vec<_>>();
            summaries.sort_by(|a, b| a.name.cmp(&b.name));
            print_json(&summaries)
        }
        "validate" => {
            let config = load_config(required_arg(&args, cmd_idx + 1, "protocol JSON")?)?;
            let plan = plan_protocol(&config).map_err(|e| e.to_string())?;
            println!(
                "Protocol is valid: {} steps, {} samples in {} aligned wells, {} replicate groups",
                plan.steps.len(),
                plan.allocation.sample_count,
                plan.allocation.aligned_count,
                plan.allocation.replicate_groups
            );
            Ok(())
        }
        "plan" => {
            let config = load_config(required_arg(&args, cmd_idx + 1, "protocol JSON")?)?;
            let plan = plan_protocol(&config).map_err(|e| e.to_string())?;
            match args.get(cmd_idx + 2) {
                Some(output) => {
                    save_plan_json(&plan, Path::new(output)).map_err(|e| e.to_string())?;
                    println!("Wrote {} steps to '{output}'", plan.steps.len());
                    Ok(())
                }
                None => print_json(&plan),
            }
        }
        "worklist" => {
            let config = load_config(required_arg(&args, cmd_idx + 1, "protocol JSON")?)?;
            let plan = plan_protocol(&config).map_err(|e| e.to_string())?;
            match args.get(cmd_idx + 2) {
                Some(output) => {
                    save_worklist(&plan, Path::new(output)).map_err(|e| e.to_string())?;
                    println!("Wrote worklist for {} steps to '{output}'", plan.steps.len());
                }
                None => print!("{}", worklist_to_string(&plan).map_err(|e| e.to_string())?),
            }
            Ok(())
        }
        "simulate" => {
            let config = load_config(required_arg(&args, cmd_idx + 1, "protocol JSON")?)?;
            let plan = plan_protocol(&config).map_err(|e| e.to_string())?;
            let mut dry_run = DryRun::new(&config, &LABWARE).map_err(|e| e.to_string())?;
            run_plan(&plan, &mut dry_run).map_err(|e| e.to_string())?;
            print_json(&dry_run.report())
        }
        "examples" => {
            let dir = args
                .get(cmd_idx + 1)
                .map(|s| s.as_str())
                .unwrap_or(DEFAULT_PROTOCOL_EXAMPLE_DIR);
            let examples = load_protocol_examples(Path::new(dir))?;
            let mut summaries = vec![];
            for loaded in &examples {
                let plan = plan_example(&loaded.example)?;
                summaries.push(ExampleSummary {
                    id: loaded.example.id.clone(),
                    path: loaded.path.to_string_lossy().to_string(),
                    steps: plan.steps.len(),
                    aligned_count: plan.allocation.aligned_count,
                    padding_count: plan.allocation.padding_count,
                });
            }
            print_json(&summaries)
        }
        _ => {
            usage();
            Err(format!("Unknown command '{command}'"))
        }
    }
}
