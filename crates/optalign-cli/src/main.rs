//! `optalign` – run a hill-climbing alignment scan from the command line.
//!
//! The binary:
//!
//! 1. Loads `~/.optalign/config.toml` (or `--config`), applying `OPTALIGN_*`
//!    environment overrides.
//! 2. Runs a scan against the simulated stage described by the config.
//! 3. Prints a summary and optionally writes the JSON report.
//!
//! Ctrl-C sets the stage's cancellation flag; the scan then winds down and
//! the best reading found so far is still reported.

mod config;

use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

use optalign_engine::{ScanConfig, ScanEngine, ScanReport, init_tracing};
use optalign_hal::sim::SimStage;
use optalign_types::ScanStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Preset {
    Adaptive,
    Phased,
}

impl Preset {
    fn config(self) -> ScanConfig {
        match self {
            Preset::Adaptive => ScanConfig::adaptive(),
            Preset::Phased => ScanConfig::phased(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "optalign", version, about = "Hill-climbing alignment of a 3-axis stage")]
struct Cli {
    /// Config file to use instead of ~/.optalign/config.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replace the configured scan settings with a preset.
    #[arg(long, value_enum)]
    preset: Option<Preset>,

    /// Write the JSON report to this path.
    #[arg(long)]
    export: Option<PathBuf>,

    /// Device id recorded in the report.
    #[arg(long)]
    device_id: Option<String>,

    /// Print the JSON schema of the report and exit.
    #[arg(long)]
    schema: bool,

    /// Write the effective configuration back to the config file and exit.
    #[arg(long)]
    save_config: bool,

    /// Suppress per-step progress lines.
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Schema only ───────────────────────────────────────────────────────
    if cli.schema {
        return match serde_json::to_string_pretty(&ScanReport::json_schema()) {
            Ok(schema) => {
                println!("{schema}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", "Schema error".red(), e);
                ExitCode::FAILURE
            }
        };
    }

    // ── Structured logging ────────────────────────────────────────────────
    let telemetry = init_tracing("optalign");
    if telemetry.is_exporting() {
        info!("exporting spans over OTLP");
    }

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let path = cli.config.clone().unwrap_or_else(config::config_path);
    let mut cfg = match config::load_from(&path) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Ok(None) => {
            println!(
                "  No config at {}; using defaults.",
                path.display().to_string().dimmed()
            );
            let mut cfg = config::AppConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            error!(error = %e, "config load failed");
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(preset) = cli.preset {
        cfg.scan = preset.config();
    }
    if let Some(id) = cli.device_id.clone() {
        cfg.device_id = id;
    }
    if let Some(export) = cli.export.clone() {
        cfg.export_path = Some(export);
    }

    if cli.save_config {
        return match config::save_to(&cfg, &path) {
            Ok(()) => {
                println!(
                    "  {} Config saved to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", "Error saving config".red(), e);
                ExitCode::FAILURE
            }
        };
    }

    // ── Ctrl-C → cooperative cancel ───────────────────────────────────────
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_handler = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping scan …".yellow().bold());
        cancel_handler.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; scans cannot be interrupted");
    }

    // ── Scan ──────────────────────────────────────────────────────────────
    let mut stage = SimStage::new(cfg.simulator.field()).with_cancel_flag(cancel.clone());
    if let Some(settle) = cfg.simulator.settle() {
        stage = stage.with_settle(settle);
    }

    println!(
        "  Scanning from {} in {} mode …\n",
        cfg.simulator.start.to_string().bold(),
        cfg.scan.mode.to_string().cyan()
    );
    let quiet = cli.quiet;
    let mut engine = ScanEngine::new(cfg.scan.clone())
        .with_port(stage)
        .with_observer(move |step: &ScanStep| {
            if !quiet {
                print_progress(step);
            }
        });

    let result = match engine.scan_from(cfg.simulator.start) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "scan failed");
            eprintln!("{}: {}", "Scan failed".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    if cancel.load(Ordering::SeqCst) {
        println!("{}", "  Scan interrupted; reporting best so far.".yellow());
    }

    // ── Report ────────────────────────────────────────────────────────────
    let report = ScanReport::from_result(&result, &cfg.scan, cfg.device_id.clone());
    println!();
    for (i, line) in report.summary_lines().iter().enumerate() {
        if i == 0 {
            println!("  {}", line.bold());
        } else {
            println!("  {line}");
        }
    }

    if let Some(export) = &cfg.export_path {
        if let Err(e) = write_report(&report, export) {
            error!(error = %e, path = %export.display(), "report export failed");
            eprintln!("{}: {}", "Export failed".red(), e);
            return ExitCode::FAILURE;
        }
        info!(path = %export.display(), "report written");
        println!(
            "\n  {} Report written to {}",
            "✓".green().bold(),
            export.display().to_string().bold()
        );
    }
    println!();
    ExitCode::SUCCESS
}

fn write_report(report: &ScanReport, path: &Path) -> Result<(), String> {
    let json = report.to_json().map_err(|e| e.to_string())?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    }
    std::fs::write(path, json).map_err(|e| format!("Failed to write {}: {}", path.display(), e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_progress(step: &ScanStep) {
    let (Some(axis), Some(direction)) = (step.axis, step.direction) else {
        println!("  #{:<4} baseline {:.4e}", step.measurement_index, step.value);
        return;
    };
    let line = format!(
        "  #{:<4} {axis}{direction} {:.4} mm  {:.4e}  {:+.2}%",
        step.measurement_index,
        step.step_size,
        step.value,
        step.relative_improvement * 100.0
    );
    if step.is_peak {
        println!("{}", line.green());
    } else {
        println!("{}", line.dimmed());
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   ____        __  ___    ___           "#.bold().cyan());
    println!("{}", r#"  / __ \____  / /_/   |  / (_)___ _____ "#.bold().cyan());
    println!("{}", r#" / / / / __ \/ __/ /| | / / / __ `/ __ \"#.bold().cyan());
    println!("{}", r#"/ /_/ / /_/ / /_/ ___ |/ / / /_/ / / / /"#.bold().cyan());
    println!("{}", r#"\____/ .___/\__/_/  |_/_/_/\__, /_/ /_/ "#.bold().cyan());
    println!("{}", r#"    /_/                   /____/        "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "OptAlign".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Hill-climbing stage alignment");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use optalign_engine::ScanMode;

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "optalign",
            "--preset",
            "adaptive",
            "--export",
            "out/report.json",
            "--device-id",
            "rig-2",
            "-q",
        ])
        .unwrap();
        assert_eq!(cli.preset, Some(Preset::Adaptive));
        assert_eq!(cli.export, Some(PathBuf::from("out/report.json")));
        assert_eq!(cli.device_id.as_deref(), Some("rig-2"));
        assert!(cli.quiet);
        assert!(!cli.schema);
    }

    #[test]
    fn cli_rejects_unknown_preset() {
        assert!(Cli::try_parse_from(["optalign", "--preset", "spiral"]).is_err());
    }

    #[test]
    fn presets_select_matching_mode() {
        assert_eq!(Preset::Adaptive.config().mode, ScanMode::Adaptive);
        assert_eq!(Preset::Phased.config().mode, ScanMode::Phased);
    }

    #[test]
    fn report_is_written_to_nested_path() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("reports").join("scan.json");

        let sim = config::SimulatorConfig::default();
        let mut engine = ScanEngine::new(ScanConfig::phased()).with_port(SimStage::new(sim.field()));
        let result = engine.scan_from(sim.start).unwrap();
        let report = ScanReport::from_result(&result, &ScanConfig::phased(), "test");

        write_report(&report, &path).unwrap();
        let back = ScanReport::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.scan_id, report.scan_id);
    }
}
