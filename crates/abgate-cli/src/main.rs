use abgate_adapters::{ChangeEvent, ChangeNotifier, FileChangeNotifier};
use abgate_app::{EvaluateRequest, EvaluateUseCase, SystemClock, render_markdown, summary_line};
use abgate_config::{
    ConfigRepository, DEFAULT_CONFIG_FILE, PolicyOverrides, TomlConfigRepository,
    atomic_write, default_config_file, resolve_policy,
};
use abgate_types::{
    Confidence, ConfidenceInterval, EvaluationPolicy, Experiment, ExperimentReport,
    Recommendation, ToolInfo, VariantSample,
};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, mpsc};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "abgate",
    version,
    about = "Conversion statistics and winner recommendations for A/B experiments"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Args)]
struct PolicyArgs {
    /// Config file (missing file means built-in defaults)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Confidence level for per-arm intervals, in percent
    #[arg(long)]
    confidence_level: Option<f64>,

    /// Visitors the smallest arm needs before any winner is called
    #[arg(long)]
    min_sample_size: Option<u64>,

    /// Significance (percent) for a high-confidence verdict
    #[arg(long)]
    high_significance: Option<f64>,

    /// Significance (percent) for a medium-confidence verdict
    #[arg(long)]
    medium_significance: Option<f64>,
}

impl PolicyArgs {
    fn overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            confidence_level: self.confidence_level,
            min_sample_size: self.min_sample_size,
            high_significance_pct: self.high_significance,
            medium_significance_pct: self.medium_significance,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate an experiment (JSON) and emit a report (JSON).
    Evaluate {
        /// Experiment file exported from the metrics source
        #[arg(long)]
        input: PathBuf,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Output report path (default: <out_dir>/report.json from config, else abgate-report.json)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Pretty-print JSON
        #[arg(long, default_value_t = false)]
        pretty: bool,

        /// Exit 3 unless the overall verdict has high confidence
        #[arg(long, default_value_t = false)]
        fail_on_inconclusive: bool,
    },

    /// Compare two arms given as CONVERSIONS/VISITORS.
    Stats {
        #[arg(long, value_parser = parse_sample)]
        control: VariantSample,

        #[arg(long, value_parser = parse_sample)]
        variant: VariantSample,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Print JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Render a Markdown summary from a report.
    Md {
        #[arg(long)]
        report: PathBuf,

        /// Output markdown path (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Re-evaluate an experiment every time its file changes.
    Watch {
        #[arg(long)]
        input: PathBuf,

        #[command(flatten)]
        policy: PolicyArgs,

        #[arg(long, default_value = "abgate-report.json")]
        out: PathBuf,

        /// Quiet period before re-evaluating (e.g. "250ms")
        #[arg(long, default_value = "250ms")]
        debounce: String,

        /// Pretty-print JSON
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },

    /// Manage the config file.
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Write a config file with every key at its default.
    Init {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Print the effective evaluation policy.
    Show {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    init_tracing();
    if let Err(err) = real_main() {
        eprintln!("{err:#}");
        return ExitCode::from(1);
    }
    ExitCode::from(0)
}

/// Diagnostics go to stderr; `ABGATE_LOG` takes `EnvFilter` directives.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("ABGATE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn real_main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Evaluate {
            input,
            policy,
            out,
            pretty,
            fail_on_inconclusive,
        } => {
            let repo = TomlConfigRepository::new(&policy.config);
            let config = repo
                .load()
                .with_context(|| format!("load config {}", policy.config.display()))?;
            let eval_policy = resolve_policy(&config, &policy.overrides())?;

            let out = out.unwrap_or_else(|| match &config.defaults.out_dir {
                Some(dir) => PathBuf::from(dir).join("report.json"),
                None => PathBuf::from("abgate-report.json"),
            });

            let report = evaluate_file(&input, eval_policy)?;
            write_json(&out, &report, pretty)?;
            println!("{}", summary_line(&report));

            if fail_on_inconclusive && report.verdict.recommendation.confidence != Confidence::High
            {
                std::process::exit(3);
            }
            Ok(())
        }

        Command::Stats {
            control,
            variant,
            policy,
            json,
        } => {
            let config = TomlConfigRepository::new(&policy.config)
                .load()
                .with_context(|| format!("load config {}", policy.config.display()))?;
            let eval_policy = resolve_policy(&config, &policy.overrides())?;
            let stats = StatsOutput::compute(control, variant, &eval_policy);

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print!("{}", stats.render_text());
            }
            Ok(())
        }

        Command::Md { report, out } => {
            let report: ExperimentReport = read_json(&report)?;
            let md = render_markdown(&report);

            match out {
                Some(path) => {
                    fs::write(&path, md).with_context(|| format!("write {}", path.display()))?;
                }
                None => {
                    print!("{md}");
                }
            }

            Ok(())
        }

        Command::Watch {
            input,
            policy,
            out,
            debounce,
            pretty,
        } => {
            let debounce = parse_duration(&debounce)?;
            watch(&input, &policy, &out, debounce, pretty)
        }

        Command::Config { cmd } => match cmd {
            ConfigCommand::Init { path, force } => {
                if path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists (use --force to overwrite)",
                        path.display()
                    );
                }
                TomlConfigRepository::new(&path).save(&default_config_file())?;
                println!("wrote {}", path.display());
                Ok(())
            }
            ConfigCommand::Show { path } => {
                let config = TomlConfigRepository::new(&path).load()?;
                let policy = resolve_policy(&config, &PolicyOverrides::default())?;
                print!("{}", toml::to_string_pretty(&policy)?);
                Ok(())
            }
        },
    }
}

fn tool_info() -> ToolInfo {
    ToolInfo {
        name: "abgate".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

fn evaluate_file(input: &Path, policy: EvaluationPolicy) -> anyhow::Result<ExperimentReport> {
    let experiment: Experiment = read_json(input)?;
    EvaluateUseCase::new(SystemClock).execute(EvaluateRequest {
        experiment,
        policy,
        source: Some(input.display().to_string()),
        tool: tool_info(),
    })
}

enum WatchMsg {
    Changed,
    Stop,
}

fn watch(
    input: &Path,
    policy: &PolicyArgs,
    out: &Path,
    debounce: Duration,
    pretty: bool,
) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel::<WatchMsg>();

    let stop_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(WatchMsg::Stop);
    })
    .context("install Ctrl-C handler")?;

    let change_tx = tx;
    let _subscription = FileChangeNotifier.subscribe(
        &input.to_string_lossy(),
        Arc::new(move |event: &ChangeEvent| {
            tracing::debug!(resource = %event.resource_key, kind = ?event.kind, "change");
            let _ = change_tx.send(WatchMsg::Changed);
        }),
    )?;

    eprintln!("watching {} (Ctrl-C to stop)", input.display());
    evaluate_and_report(input, policy, out, pretty);

    loop {
        match rx.recv() {
            Ok(WatchMsg::Changed) => {}
            Ok(WatchMsg::Stop) | Err(_) => return Ok(()),
        }

        // Exports often arrive as several writes; wait for a quiet period.
        loop {
            match rx.recv_timeout(debounce) {
                Ok(WatchMsg::Changed) => continue,
                Ok(WatchMsg::Stop) => return Ok(()),
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }

        evaluate_and_report(input, policy, out, pretty);
    }
}

/// One watch iteration. Failures are reported and the watch keeps going.
fn evaluate_and_report(input: &Path, policy: &PolicyArgs, out: &Path, pretty: bool) {
    match evaluate_to_file(input, policy, out, pretty) {
        Ok(report) => println!("{}", summary_line(&report)),
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "evaluation failed");
            eprintln!("{err:#}");
        }
    }
}

fn evaluate_to_file(
    input: &Path,
    policy: &PolicyArgs,
    out: &Path,
    pretty: bool,
) -> anyhow::Result<ExperimentReport> {
    // Reloaded every time so config edits apply on the next change.
    let config = TomlConfigRepository::new(&policy.config).load()?;
    let eval_policy = resolve_policy(&config, &policy.overrides())?;
    let report = evaluate_file(input, eval_policy)?;
    write_json(out, &report, pretty)?;
    Ok(report)
}

#[derive(Debug, Serialize)]
struct ArmStats {
    conversions: u64,
    visitors: u64,
    conversion_rate: f64,
    confidence_interval: ConfidenceInterval,
}

#[derive(Debug, Serialize)]
struct StatsOutput {
    confidence_level_pct: f64,
    control: ArmStats,
    variant: ArmStats,
    improvement_pct: f64,
    z_score: f64,
    significance_pct: f64,
    min_sample_size: u64,
    recommendation: Recommendation,
}

impl StatsOutput {
    fn compute(control: VariantSample, variant: VariantSample, policy: &EvaluationPolicy) -> Self {
        let arm = |s: VariantSample| ArmStats {
            conversions: s.conversions,
            visitors: s.visitors,
            conversion_rate: abgate_stats::conversion_rate(s.conversions, s.visitors),
            confidence_interval: abgate_stats::confidence_interval(
                s.conversions,
                s.visitors,
                policy.confidence_level_pct,
            ),
        };
        let control_arm = arm(control);
        let variant_arm = arm(variant);

        let improvement_pct = abgate_stats::improvement_pct(
            control_arm.conversion_rate,
            variant_arm.conversion_rate,
        );
        let sig = abgate_stats::significance(control, variant);
        let min_sample_size = control.visitors.min(variant.visitors);

        Self {
            confidence_level_pct: policy.confidence_level_pct,
            recommendation: abgate_stats::recommend_with(
                &policy.recommendation,
                sig.significance_pct,
                abgate_stats::recommendation_lift(
                    control_arm.conversion_rate,
                    variant_arm.conversion_rate,
                ),
                min_sample_size,
            ),
            control: control_arm,
            variant: variant_arm,
            improvement_pct,
            z_score: sig.z_score,
            significance_pct: sig.significance_pct,
            min_sample_size,
        }
    }

    fn render_text(&self) -> String {
        let arm_line = |label: &str, a: &ArmStats| {
            format!(
                "{label:<14}{rate:.2}% ({conv}/{vis}, {level}% CI {lo:.2}-{hi:.2}%)\n",
                rate = a.conversion_rate,
                conv = a.conversions,
                vis = a.visitors,
                level = self.confidence_level_pct,
                lo = a.confidence_interval.lower,
                hi = a.confidence_interval.upper,
            )
        };

        let mut out = String::new();
        out.push_str(&arm_line("control", &self.control));
        out.push_str(&arm_line("variant", &self.variant));
        if self.control.conversion_rate <= 0.0 && self.variant.conversion_rate > 0.0 {
            out.push_str(&format!("{:<14}n/a (control has no conversions)\n", "lift"));
        } else {
            let sign = if self.improvement_pct > 0.0 { "+" } else { "" };
            out.push_str(&format!("{:<14}{sign}{:.2}%\n", "lift", self.improvement_pct));
        }
        out.push_str(&format!("{:<14}{:.3}\n", "z-score", self.z_score));
        out.push_str(&format!(
            "{:<14}{:.1}%\n",
            "significance", self.significance_pct
        ));
        out.push_str(&format!(
            "{:<14}{} ({}): {}\n",
            "verdict",
            self.recommendation.label.as_str(),
            self.recommendation.confidence.as_str(),
            self.recommendation.label.headline()
        ));
        out
    }
}

fn parse_sample(s: &str) -> Result<VariantSample, String> {
    let (c, v) = s
        .split_once('/')
        .ok_or_else(|| "expected CONVERSIONS/VISITORS".to_string())?;
    let conversions: u64 = c
        .trim()
        .parse()
        .map_err(|_| format!("invalid conversions: {c}"))?;
    let visitors: u64 = v
        .trim()
        .parse()
        .map_err(|_| format!("invalid visitors: {v}"))?;
    if conversions > visitors {
        return Err(format!(
            "conversions ({conversions}) exceed visitors ({visitors})"
        ));
    }
    Ok(VariantSample::new(conversions, visitors))
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let d = humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))?;
    Ok(d)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let v =
        serde_json::from_slice(&bytes).with_context(|| format!("parse json {}", path.display()))?;
    Ok(v)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T, pretty: bool) -> anyhow::Result<()> {
    let bytes = if pretty {
        serde_json::to_vec_pretty(value)?
    } else {
        serde_json::to_vec(value)?
    };

    atomic_write(path, &bytes).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
