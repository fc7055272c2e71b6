use std::{error::Error, path::PathBuf};

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use climate_core::{
    CollectRequest, Config, ConfigOverrides, ExportPolicy, Frequency, OutputFormat, OutputLayout,
    Source, SourceManager, SourceMode, collect,
    config::ProviderSettings,
    export::{export_daily, export_frame, export_monthly},
    ml::{prepare_daily_for_ml, prepare_monthly_for_ml},
    pipeline::LocationFailure,
};
use inquire::{Password, PasswordDisplayMode, Text};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "climate", version, about = "Collects and normalises climate data")]
pub struct Cli {
    /// More log output (-v debug, -vv trace). `RUST_LOG` is used when absent.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch, aggregate and export data for every configured location.
    Collect(CollectArgs),

    /// Write a starter configuration file.
    InitConfig {
        /// Destination; defaults to the platform config file.
        path: Option<PathBuf>,

        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "inmet".
        provider: String,
    },
}

#[derive(Debug, Args)]
pub struct CollectArgs {
    /// Configuration file; defaults to the platform config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// primary, secondary or combined.
    #[arg(long, value_parser = parse_mode)]
    mode: Option<SourceMode>,

    /// csv, json or parquet.
    #[arg(long)]
    format: Option<OutputFormat>,

    /// per_location or concatenated.
    #[arg(long)]
    layout: Option<OutputLayout>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// daily or monthly.
    #[arg(long, value_parser = parse_frequency)]
    frequency: Option<Frequency>,

    /// Also backfill history.
    #[arg(long, conflicts_with = "no_history")]
    history: bool,

    #[arg(long)]
    no_history: bool,

    #[arg(long)]
    history_years: Option<u32>,

    /// Also write feature tables for model training.
    #[arg(long)]
    ml: bool,
}

impl CollectArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            source_mode: self.mode,
            output_format: self.format,
            output_layout: self.layout,
            output_dir: self.output_dir.clone(),
            frequency: self.frequency,
            history_active: match (self.history, self.no_history) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            history_years: self.history_years,
        }
    }
}

fn parse_mode(value: &str) -> Result<SourceMode, String> {
    SourceMode::try_from(value).map_err(|e| e.to_string())
}

fn parse_frequency(value: &str) -> Result<Frequency, String> {
    match value.to_lowercase().as_str() {
        "daily" => Ok(Frequency::Daily),
        "monthly" => Ok(Frequency::Monthly),
        _ => Err(format!("Unknown frequency '{value}'. Expected daily or monthly.")),
    }
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Collect(args) => run_collect(args).await,
            Command::InitConfig { path, force } => init_config(path, force),
            Command::Configure { provider } => configure(&provider),
        }
    }
}

async fn run_collect(args: CollectArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_overrides(&args.overrides());
    config.validate().context("Invalid configuration")?;

    let manager = SourceManager::from_config(&config)?;
    let policy = ExportPolicy::new(
        config.general.output_format,
        config.general.output_layout,
        config.general.output_dir.clone(),
    );

    let today = Utc::now().date_naive();
    let regular = CollectRequest::scheduled(&config.frequency, today);
    let mut collected = run_batch(
        &manager,
        &config,
        regular,
        config.frequency.kind.as_str(),
        &policy,
        args.ml,
    )
    .await?;

    if config.frequency.history.active {
        let history = CollectRequest::History { years: config.frequency.history.years };
        collected |= run_batch(&manager, &config, history, "history", &policy, args.ml).await?;
    }

    if !collected {
        bail!("No location produced any data");
    }
    Ok(())
}

/// One collect, aggregate and export cycle. Returns whether any location produced records.
async fn run_batch(
    manager: &SourceManager,
    config: &Config,
    request: CollectRequest,
    kind: &str,
    policy: &ExportPolicy,
    ml: bool,
) -> anyhow::Result<bool> {
    let report = collect(manager, &config.locations, request).await?;

    let (files, records, failures) = match config.frequency.kind {
        Frequency::Daily => {
            let processed = report.into_daily();
            let mut files = export_daily(policy, kind, &processed.records)?;
            if ml && processed.record_count() > 0 {
                let all: Vec<_> = processed.records.values().flatten().cloned().collect();
                let mut table = prepare_daily_for_ml(&all)?;
                files.push(export_frame(policy, "ml", kind, &mut table.frame)?);
            }
            (files, processed.record_count(), processed.failures)
        }
        Frequency::Monthly => {
            let processed = report.into_monthly();
            let mut files = export_monthly(policy, kind, &processed.records)?;
            if ml && processed.record_count() > 0 {
                let all: Vec<_> = processed.records.values().flatten().cloned().collect();
                let mut table = prepare_monthly_for_ml(&all)?;
                files.push(export_frame(policy, "ml", kind, &mut table.frame)?);
            }
            (files, processed.record_count(), processed.failures)
        }
    };

    report_failures(&failures);
    tracing::info!(kind, records, failed = failures.len(), files = files.len(), "batch complete");
    for file in &files {
        println!("{}", file.display());
    }

    Ok(records > 0)
}

fn report_failures(failures: &[LocationFailure]) {
    for failure in failures {
        let mut message = failure.error.to_string();
        let mut cause = failure.error.source();
        while let Some(err) = cause {
            message.push_str(": ");
            message.push_str(&err.to_string());
            cause = err.source();
        }
        tracing::error!(location = %failure.location, "{message}");
    }
}

fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => Config::config_file_path()?,
    };
    if path.exists() && !force {
        bail!("{} already exists; pass --force to replace it", path.display());
    }

    Config::default_template().save(&path)?;
    println!("Wrote starter configuration to {}", path.display());
    Ok(())
}

fn configure(provider: &str) -> anyhow::Result<()> {
    let source = Source::try_from(provider)?;
    let path = Config::config_file_path()?;
    let mut config = Config::load_default()?;

    let api_key = Password::new(&format!("{} API key:", source.provider_key()))
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()?;
    let api_key = api_key.trim();
    if api_key.is_empty() {
        bail!("API key must not be empty");
    }

    let current_url = config
        .provider_config(source)
        .and_then(|p| p.base_url.clone())
        .unwrap_or_else(|| ProviderSettings::default_base_url(source).to_string());
    let base_url = Text::new("Base URL:").with_default(&current_url).prompt()?;

    config.upsert_provider_api_key(source, api_key.to_string());
    if let Some(provider) = config.providers.get_mut(source.provider_key()) {
        provider.base_url = Some(base_url.trim().to_string());
    }
    config.save(&path)?;

    println!("Saved {} credentials to {}", source.provider_key(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "climate",
            "collect",
            "--mode",
            "combined",
            "--format",
            "parquet",
            "--layout",
            "concatenated",
            "--frequency",
            "monthly",
            "--no-history",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        let Command::Collect(args) = cli.command else { panic!("expected collect") };
        let overrides = args.overrides();
        assert_eq!(overrides.source_mode, Some(SourceMode::Combined));
        assert_eq!(overrides.output_format, Some(OutputFormat::Parquet));
        assert_eq!(overrides.output_layout, Some(OutputLayout::Concatenated));
        assert_eq!(overrides.frequency, Some(Frequency::Monthly));
        assert_eq!(overrides.history_active, Some(false));
        assert_eq!(overrides.output_dir, None);
    }

    #[test]
    fn history_flags_conflict() {
        assert!(Cli::try_parse_from(["climate", "collect", "--history", "--no-history"]).is_err());
        assert!(Cli::try_parse_from(["climate", "collect", "--mode", "everything"]).is_err());
    }

    #[test]
    fn init_config_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        init_config(Some(path.clone()), false).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.locations.len(), 1);

        assert!(init_config(Some(path.clone()), false).is_err());
        init_config(Some(path), true).unwrap();
    }
}
