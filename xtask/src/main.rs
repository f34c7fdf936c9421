use anyhow::Context;
use clap::{Parser, Subcommand};
use schemars::schema_for;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "xtask", about = "Repo automation for abgate")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// (Re)generate JSON Schemas for reports, experiments and config.
    Schema {
        /// Output directory
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },

    /// Check every experiment fixture against the experiment schema.
    CheckFixtures {
        #[arg(long, default_value = "crates/abgate-cli/tests/fixtures")]
        dir: PathBuf,
    },

    /// Run the "usual" repo checks (fmt, clippy, test, schema, fixtures).
    Ci,

    /// Run mutation testing via cargo-mutants (must be installed).
    Mutants {
        /// Extra args forwarded to cargo-mutants
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Schema { out_dir } => cmd_schema(&out_dir),
        Command::CheckFixtures { dir } => cmd_check_fixtures(&dir),
        Command::Ci => cmd_ci(),
        Command::Mutants { args } => cmd_mutants(args),
    }
}

fn cmd_ci() -> anyhow::Result<()> {
    run("cargo", ["fmt", "--all", "--", "--check"])?;
    run(
        "cargo",
        ["clippy", "--all-targets", "--all-features", "--", "-D", "warnings"],
    )?;
    run("cargo", ["test", "--all"])?;
    run("cargo", ["run", "-p", "xtask", "--", "schema"])?;
    run("cargo", ["run", "-p", "xtask", "--", "check-fixtures"])?;
    Ok(())
}

fn cmd_mutants(args: Vec<String>) -> anyhow::Result<()> {
    // Mostly aimed at abgate-stats: `cargo run -p xtask -- mutants -p abgate-stats`.
    let status = std::process::Command::new("cargo")
        .arg("mutants")
        .args(args)
        .status()
        .context("running cargo mutants")?;
    if !status.success() {
        anyhow::bail!("cargo mutants failed: {status}");
    }
    Ok(())
}

fn run<const N: usize>(bin: &str, args: [&str; N]) -> anyhow::Result<()> {
    let status = std::process::Command::new(bin)
        .args(args)
        .status()
        .with_context(|| format!("running {bin}"))?;
    if !status.success() {
        anyhow::bail!("{bin} failed: {status}");
    }
    Ok(())
}

fn cmd_schema(out_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("create dir {}", out_dir.display()))?;

    write_schema(
        out_dir,
        "abgate.report.v1.schema.json",
        schema_for!(abgate_types::ExperimentReport),
    )?;

    write_schema(
        out_dir,
        "abgate.experiment.v1.schema.json",
        schema_for!(abgate_types::Experiment),
    )?;

    write_schema(
        out_dir,
        "abgate.config.v1.schema.json",
        schema_for!(abgate_types::ConfigFile),
    )?;

    Ok(())
}

fn write_schema<T: serde::Serialize>(out_dir: &Path, name: &str, schema: T) -> anyhow::Result<()> {
    let path = out_dir.join(name);
    let json = serde_json::to_vec_pretty(&schema)?;
    fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Fixtures named `experiment_*.json` must match the schema the CLI reads.
fn cmd_check_fixtures(dir: &Path) -> anyhow::Result<()> {
    let schema = serde_json::to_value(schema_for!(abgate_types::Experiment))?;
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| anyhow::anyhow!("experiment schema is invalid: {e}"))?;

    let mut checked = 0usize;
    let mut failures = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry?.path();
        let is_fixture = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("experiment_") && n.ends_with(".json"));
        if !is_fixture {
            continue;
        }

        let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let instance: serde_json::Value =
            serde_json::from_str(&text).with_context(|| format!("parse json {}", path.display()))?;
        for err in validator.iter_errors(&instance) {
            failures.push(format!("{}: {} at {}", path.display(), err, err.instance_path));
        }
        checked += 1;
    }

    if !failures.is_empty() {
        anyhow::bail!("schema violations:\n{}", failures.join("\n"));
    }
    println!("{checked} fixture(s) match the experiment schema");
    Ok(())
}
