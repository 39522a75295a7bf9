use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::info;
use serde::Serialize;
use std::path::PathBuf;

use open_metabolics::estimator::CalibrationSummary;
use open_metabolics::session::SessionStats;
use open_metabolics::sources::{load_profile, load_recording, MemorySource};
use open_metabolics::{process_session, ModelSet, Outcome, PipelineConfig, SessionContext};

#[derive(Parser, Debug)]
#[command(name = "open_metabolics")]
#[command(about = "Estimate walking energy expenditure from a pocket IMU recording", long_about = None)]
struct Args {
    /// Recording as .json or .csv, optionally .gz
    #[arg(long)]
    recording: PathBuf,

    /// Subject profile JSON (height_m, weight_kg, age_years, gender)
    #[arg(long)]
    profile: PathBuf,

    /// Pocket-motion correction model (31 -> 90)
    #[arg(long)]
    correction_model: PathBuf,

    /// Energy model (108 -> 1)
    #[arg(long)]
    energy_model: PathBuf,

    /// Pipeline configuration JSON; missing fields take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the discrete-bout preset instead of streaming defaults
    #[arg(long, default_value_t = false, conflicts_with = "config")]
    bout: bool,

    /// Override: gait needs more peaks than this per window
    #[arg(long)]
    min_peak_count: Option<usize>,

    /// Override: minimum peak |gyro| (rad/s) for a moving window
    #[arg(long)]
    gyro_norm_threshold: Option<f64>,

    /// Override: longest admissible stride, in samples
    #[arg(long)]
    stride_window_samples: Option<usize>,

    /// Samples per fetched page
    #[arg(long, default_value = "500")]
    page_size: usize,

    /// Session identifier used in logs and the report
    #[arg(long, default_value = "local")]
    session_id: String,

    /// Report path (default: open_metabolics_sessions/estimates_<time>.json)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct WindowEntry {
    window_index: u64,
    calibration: Option<CalibrationSummary>,
    fallback: Option<String>,
    outcomes: Vec<Outcome>,
}

#[derive(Serialize)]
struct Summary {
    basal_watts: f64,
    mean_model_watts: Option<f64>,
    stats: SessionStats,
}

#[derive(Serialize)]
struct Report {
    session_id: String,
    generated_at: String,
    config: PipelineConfig,
    summary: Summary,
    windows: Vec<WindowEntry>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = pipeline_config(&args)?;
    let profile = load_profile(&args.profile)?;
    let models = ModelSet::load(&args.correction_model, &args.energy_model)?;
    let ctx = SessionContext::new(profile, config, models)?;

    let samples = load_recording(&args.recording)
        .with_context(|| format!("reading {}", args.recording.display()))?;
    println!("[{}] Open Metabolics starting", ts_now());
    println!("  Recording: {} ({} samples)", args.recording.display(), samples.len());
    println!("  Basal rate: {:.1} W", ctx.basal_watts());

    let mut source = MemorySource::new(args.page_size);
    source.insert(&args.session_id, samples);

    let mut run = process_session(&ctx, &args.session_id, source)
        .on_progress(|p| info!("Progress {:.0}%", p * 100.0));
    let mut windows = Vec::new();
    while let Some(report) = run.next_report() {
        let report = report?;
        windows.push(WindowEntry {
            window_index: report.window_index,
            calibration: report.calibration,
            fallback: report.fallback.map(|r| r.to_string()),
            outcomes: report.outcomes,
        });
    }
    let stats = run.stats().clone();
    drop(run);

    let model_values: Vec<f64> = windows
        .iter()
        .flat_map(|w| &w.outcomes)
        .filter(|o| matches!(o, Outcome::Ok(_)))
        .filter_map(|o| o.energy_watts())
        .collect();
    let mean_model_watts = (!model_values.is_empty())
        .then(|| model_values.iter().sum::<f64>() / model_values.len() as f64);

    let report = Report {
        session_id: args.session_id.clone(),
        generated_at: Utc::now().to_rfc3339(),
        config: ctx.config().clone(),
        summary: Summary {
            basal_watts: ctx.basal_watts(),
            mean_model_watts,
            stats,
        },
        windows,
    };

    let output = match args.output {
        Some(path) => path,
        None => {
            std::fs::create_dir_all("open_metabolics_sessions")?;
            PathBuf::from(format!("open_metabolics_sessions/estimates_{}.json", ts_now_clean()))
        }
    };
    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&output, json)?;

    let stats = &report.summary.stats;
    println!("\n=== Session {} ===", report.session_id);
    println!("Windows: {} ({} samples discarded)", stats.windows, stats.discarded_samples);
    println!(
        "Estimates: {} model, {} basal fallback, {} flagged",
        stats.estimates, stats.fallbacks, stats.flagged
    );
    if let Some(mean) = report.summary.mean_model_watts {
        println!("Mean walking expenditure: {:.1} W", mean);
    }
    println!("[{}] Report written to {}", ts_now(), output.display());

    Ok(())
}

/// Preset or config file, then any command-line overrides.
fn pipeline_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match (&args.config, args.bout) {
        (Some(path), _) => PipelineConfig::load(path)?,
        (None, true) => PipelineConfig::discrete_bout(),
        (None, false) => PipelineConfig::streaming(),
    };
    if let Some(count) = args.min_peak_count {
        config.min_peak_count = count;
    }
    if let Some(threshold) = args.gyro_norm_threshold {
        config.gyro_norm_threshold = threshold;
    }
    if let Some(samples) = args.stride_window_samples {
        config.stride_window_samples = samples;
    }
    config.validate()?;
    Ok(config)
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let base = [
            "open_metabolics",
            "--recording",
            "walk.csv",
            "--profile",
            "me.json",
            "--correction-model",
            "c.json",
            "--energy-model",
            "e.json",
        ];
        Args::parse_from(base.iter().chain(extra).copied())
    }

    #[test]
    fn test_overrides_apply_on_top_of_preset() {
        let config = pipeline_config(&args(&["--bout", "--min-peak-count", "2"])).unwrap();
        assert_eq!(config.min_peak_count, 2);
        assert_eq!(config.gyro_norm_threshold, 0.5);
        assert_eq!(config.stride_window_samples, 100);

        let config = pipeline_config(&args(&[
            "--gyro-norm-threshold",
            "0.25",
            "--stride-window-samples",
            "150",
        ]))
        .unwrap();
        assert_eq!(config.min_peak_count, 1);
        assert_eq!(config.gyro_norm_threshold, 0.25);
        assert_eq!(config.stride_window_samples, 150);
    }

    #[test]
    fn test_overrides_apply_on_top_of_config_file() {
        let path = std::env::temp_dir().join(format!("{}_cli_config.json", std::process::id()));
        std::fs::write(&path, r#"{"min_peak_count": 4, "gyro_norm_threshold": 1.0}"#).unwrap();
        let path_arg = path.to_string_lossy().to_string();
        let config =
            pipeline_config(&args(&["--config", &path_arg, "--gyro-norm-threshold", "0.1"]));
        std::fs::remove_file(&path).ok();

        let config = config.unwrap();
        assert_eq!(config.min_peak_count, 4);
        assert_eq!(config.gyro_norm_threshold, 0.1);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        // Stride window must stay above min_stride_samples (35)
        assert!(pipeline_config(&args(&["--stride-window-samples", "20"])).is_err());
    }
}
