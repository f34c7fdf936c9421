//! Application layer for abgate.
//!
//! The app layer coordinates domain logic and produces reports.
//! It does not parse CLI flags and it does not do filesystem I/O.

use abgate_domain::{Evaluation, evaluate_experiment};
use abgate_types::{
    ArmSummary, Confidence, EvaluationPolicy, Experiment, ExperimentMeta, ExperimentReport,
    RecommendationLabel, ToolInfo, VariantComparison,
};
use anyhow::Context;

pub trait Clock: Send + Sync {
    fn now_rfc3339(&self) -> String;
}

#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_rfc3339(&self) -> String {
        use time::format_description::well_known::Rfc3339;
        time::OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
    }
}

#[derive(Debug, Clone)]
pub struct EvaluateRequest {
    pub experiment: Experiment,
    pub policy: EvaluationPolicy,

    /// Where the experiment was read from (recorded in the report).
    pub source: Option<String>,

    pub tool: ToolInfo,
}

pub struct EvaluateUseCase<C: Clock> {
    clock: C,
}

impl<C: Clock> EvaluateUseCase<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    pub fn execute(&self, req: EvaluateRequest) -> anyhow::Result<ExperimentReport> {
        let Evaluation {
            control,
            comparisons,
            verdict,
        } = evaluate_experiment(&req.experiment, &req.policy)
            .with_context(|| format!("evaluate experiment {:?}", req.experiment.id))?;

        for c in &comparisons {
            tracing::debug!(
                experiment = %req.experiment.id,
                variant = %c.arm.variant_id,
                rate = c.arm.conversion_rate,
                z = c.z_score,
                significance = c.significance_pct,
                label = c.recommendation.label.as_str(),
                "compared variant against control"
            );
        }

        tracing::info!(
            experiment = %req.experiment.id,
            leader = %verdict.leader_id,
            label = verdict.recommendation.label.as_str(),
            confidence = verdict.recommendation.confidence.as_str(),
            "experiment evaluated"
        );

        let experiment = req.experiment;
        Ok(ExperimentReport {
            schema: abgate_types::REPORT_SCHEMA_V1.to_string(),
            tool: req.tool,
            generated_at: self.clock.now_rfc3339(),
            experiment: ExperimentMeta {
                id: experiment.id,
                name: experiment.name,
                status: experiment.status,
                hypothesis: experiment.hypothesis,
                started_at: experiment.started_at,
                source: req.source,
            },
            policy: req.policy,
            control,
            comparisons,
            verdict,
        })
    }
}

// ----------------------------
// Rendering helpers
// ----------------------------

pub fn render_markdown(report: &ExperimentReport) -> String {
    let mut out = String::new();
    let rec = report.verdict.recommendation;

    out.push_str(&format!(
        "{icon} abgate: {headline}\n\n",
        icon = confidence_icon(rec.confidence),
        headline = rec.label.headline().to_lowercase(),
    ));

    out.push_str(&format!(
        "**Experiment:** {} (`{}`, {})\n\n",
        report.experiment.name,
        report.experiment.id,
        report.experiment.status.as_str()
    ));

    if let Some(h) = &report.experiment.hypothesis {
        out.push_str(&format!("**Hypothesis:** {h}\n\n"));
    }

    out.push_str(&format!(
        "**Recommendation:** {} (confidence: {}, leader: `{}`)\n\n",
        recommendation_text(rec.label),
        rec.confidence.as_str(),
        report.verdict.leader_id
    ));

    out.push_str(&format!(
        "| variant | visitors | conversions | rate | {} CI | lift | z | significance | status |\n",
        format_level(report.policy.confidence_level_pct)
    ));
    out.push_str("|---|---:|---:|---:|---:|---:|---:|---:|---|\n");

    out.push_str(&control_row(&report.control));
    for c in &report.comparisons {
        out.push_str(&comparison_row(c));
    }

    if !report.verdict.reasons.is_empty() {
        out.push_str("\n**Notes:**\n");
        for r in &report.verdict.reasons {
            out.push_str(&format!("- {}\n", r));
        }
    }

    let p = &report.policy.recommendation;
    out.push_str(&format!(
        "\n_Policy: min sample {}, high ≥ {}%, medium ≥ {}%_\n",
        p.min_sample_size, p.high_significance_pct, p.medium_significance_pct
    ));

    out
}

/// One-line summary, for logs and `watch` output.
pub fn summary_line(report: &ExperimentReport) -> String {
    let rec = report.verdict.recommendation;
    let leader = report
        .comparisons
        .iter()
        .find(|c| c.arm.variant_id == report.verdict.leader_id);

    match leader {
        Some(c) => format!(
            "{id}: {label} ({conf}) leader={leader} lift={lift} significance={sig:.1}% min_n={n}",
            id = report.experiment.id,
            label = rec.label.as_str(),
            conf = rec.confidence.as_str(),
            leader = report.verdict.leader_id,
            lift = format_pct(c.improvement_pct),
            sig = c.significance_pct,
            n = report.verdict.min_sample_size,
        ),
        None => format!(
            "{id}: {label} ({conf}) min_n={n}",
            id = report.experiment.id,
            label = rec.label.as_str(),
            conf = rec.confidence.as_str(),
            n = report.verdict.min_sample_size,
        ),
    }
}

fn control_row(arm: &ArmSummary) -> String {
    format!(
        "| `{id}` (control) | {v} | {c} | {rate} | {ci} | baseline | | | |\n",
        id = arm.variant_id,
        v = arm.visitors,
        c = arm.conversions,
        rate = format_rate(arm.conversion_rate),
        ci = format_ci(arm),
    )
}

fn comparison_row(c: &VariantComparison) -> String {
    format!(
        "| `{id}` | {v} | {conv} | {rate} | {ci} | {lift} | {z:.2} | {sig:.1}% | {status} {label} |\n",
        id = c.arm.variant_id,
        v = c.arm.visitors,
        conv = c.arm.conversions,
        rate = format_rate(c.arm.conversion_rate),
        ci = format_ci(&c.arm),
        lift = format_pct(c.improvement_pct),
        z = c.z_score,
        sig = c.significance_pct,
        status = confidence_icon(c.recommendation.confidence),
        label = c.recommendation.label.as_str(),
    )
}

fn confidence_icon(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::High => "✅",
        Confidence::Medium => "⚠️",
        Confidence::Low => "⏳",
    }
}

fn recommendation_text(label: RecommendationLabel) -> &'static str {
    match label {
        RecommendationLabel::ShipVariant => "ship the winning variant",
        RecommendationLabel::KeepControl => "keep the control",
        RecommendationLabel::Trending => "trending but not conclusive",
        RecommendationLabel::NoDifference => "no detectable difference yet",
        RecommendationLabel::KeepRunning => "keep running; sample too small",
    }
}

fn format_rate(rate: f64) -> String {
    format!("{:.2}%", rate)
}

fn format_ci(arm: &ArmSummary) -> String {
    format!(
        "{:.2}-{:.2}%",
        arm.confidence_interval.lower, arm.confidence_interval.upper
    )
}

fn format_level(level: f64) -> String {
    if level.fract() == 0.0 {
        format!("{:.0}%", level)
    } else {
        format!("{:.1}%", level)
    }
}

fn format_pct(pct: f64) -> String {
    let sign = if pct > 0.0 { "+" } else { "" };
    format!("{}{:.2}%", sign, pct)
}
