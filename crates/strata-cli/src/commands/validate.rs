use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use strata_apply::{validate, Config, Discoverer, LogSink, Manifest};

use super::Outcome;

#[derive(Debug, clap::Args)]
pub struct ValidateArgs {
    /// Directory containing migration files
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Build manifest the directory must match
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Only check names, ordering and the manifest; do not execute SQL
    #[arg(long)]
    pub offline: bool,

    /// Write a manifest for the validated files to this path
    #[arg(long, requires = "build_id")]
    pub write_manifest: Option<PathBuf>,

    /// Build identifier recorded in the written manifest
    #[arg(long)]
    pub build_id: Option<String>,
}

pub fn run_validate(config: &Config, args: ValidateArgs) -> Result<Outcome> {
    let migrations_dir = args.dir.unwrap_or_else(|| config.migrations_dir.clone());
    let manifest = match args.manifest.as_ref().or(config.manifest_path.as_ref()) {
        Some(path) => Some(
            Manifest::load(path)
                .with_context(|| format!("Failed to read manifest {}", path.display()))?,
        ),
        None => None,
    };

    let discoverer = Discoverer::new(&migrations_dir);
    let report = match validate(&discoverer, manifest.as_ref(), !args.offline, LogSink) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("✗ Invalid: {}: {}", e.kind(), e);
            return Ok(Outcome::Halted);
        }
    };

    println!("✓ {} migrations in {}", report.set.len(), migrations_dir.display());
    if let Some(build_id) = &report.build_id {
        println!("✓ Matches manifest {}", build_id);
    }

    if let Some(dry_run) = &report.dry_run {
        match dry_run.error() {
            None => println!("✓ Dry run applied {} migrations", dry_run.applied.len()),
            Some(e) => {
                match e.version() {
                    Some(version) => {
                        eprintln!("✗ Dry run failed at version {}: {}: {}", version, e.kind(), e);
                    }
                    None => eprintln!("✗ Dry run failed: {}: {}", e.kind(), e),
                }
                return Ok(Outcome::Halted);
            }
        }
    } else {
        println!("  Dry run skipped (--offline)");
    }

    if let Some(path) = args.write_manifest {
        let Some(build_id) = args.build_id else {
            bail!("--write-manifest requires --build-id");
        };
        Manifest::for_set(build_id, &report.set)
            .write(&path)
            .with_context(|| format!("Failed to write manifest {}", path.display()))?;
        println!("✓ Wrote manifest {}", path.display());
    }

    Ok(Outcome::Done)
}
