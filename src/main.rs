use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tls_converge::configs::AppConfig;
use tls_converge::convergence::{ConvergenceEngine, RunSummary};
use tls_converge::kv_store::TomlStore;
use tls_converge::manifest::Manifest;
use tls_converge::storage::PosixFs;
use tls_converge::trust_store::TrustOutcome;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "tls-converge.toml";

/// tls-converge - converge X.509 certificates and private keys on disk
#[derive(Parser, Debug)]
#[command(name = "tls-converge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (default: tls-converge.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to resource manifest, overrides `manifest` from the config file
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Root CA bundle used to verify intermediate chains
    #[arg(long, conflicts_with = "no_root_bundle")]
    root_bundle: Option<PathBuf>,

    /// Verify without any root bundle
    #[arg(long)]
    no_root_bundle: bool,

    /// Report what would change without writing anything
    #[arg(long)]
    noop: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output format
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    format: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = load_config(&cli)?;
    let manifest_path = config.manifest.clone().ok_or_else(|| {
        anyhow!("No manifest given: use --manifest or set `manifest` in the config file")
    })?;

    let store = match &config.store.path {
        Some(path) => TomlStore::from_file(path)
            .context(format!("Failed to load key/value store: {}", path.display()))?,
        None => TomlStore::default(),
    };
    let catalog = Manifest::from_file(&manifest_path)?
        .into_catalog(&store, &config.engine)
        .context(format!("Invalid manifest: {}", manifest_path.display()))?;
    if catalog.is_empty() {
        warn!(manifest = %manifest_path.display(), "manifest declares no resources");
    }

    let text = cli.format == "text";
    if text {
        println!("=== tls-converge{} ===\n", if cli.noop { " (noop)" } else { "" });
    }

    let summary = ConvergenceEngine::new(&catalog, PosixFs, config.engine.clone())
        .noop(cli.noop)
        .converge_all();

    if text {
        print_summary(&summary);
    } else {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if !summary.is_success() {
        return Err(anyhow!(
            "{} of {} resources failed",
            summary.failures.len(),
            summary.failures.len() + summary.reports.len()
        ));
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => AppConfig::load()?,
        None => AppConfig::default(),
    };

    if let Some(manifest) = &cli.manifest {
        config.manifest = Some(manifest.clone());
    }
    if let Some(bundle) = &cli.root_bundle {
        config.engine.root_bundle = Some(bundle.clone());
    }
    if cli.no_root_bundle {
        config.engine.root_bundle = None;
        config.engine.probe_root_bundle = false;
    }
    Ok(config)
}

fn print_summary(summary: &RunSummary) {
    for report in &summary.reports {
        let ownership = if report.ownership_changed {
            ", ownership updated"
        } else {
            ""
        };
        println!(
            "✓ {}[{}]: {}{}",
            report.kind,
            report.path.display(),
            report.change,
            ownership
        );
        match &report.trust {
            Some(TrustOutcome::Warning(reason)) => println!("  ⚠ {}", reason),
            Some(TrustOutcome::Failed { message, .. }) => {
                println!("  ⚠ chain not verified: {}", message)
            }
            _ => {}
        }
    }
    for failure in &summary.failures {
        println!(
            "✗ {}[{}]: {}",
            failure.kind,
            failure.path.display(),
            failure.message
        );
    }
    println!(
        "\n{} resource(s), {} changed, {} failed",
        summary.reports.len() + summary.failures.len(),
        summary.changed(),
        summary.failures.len()
    );
}
