//! Shared types for abgate.
//!
//! Design goal: versioned, explicit, boring.
//! Experiments come in as JSON from the metrics source; reports go out as JSON
//! and Markdown. Optional fields are spelled out rather than carried as loose rows.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const REPORT_SCHEMA_V1: &str = "abgate.report.v1";

pub const DEFAULT_CONFIDENCE_LEVEL_PCT: f64 = 95.0;
pub const DEFAULT_MIN_SAMPLE_SIZE: u64 = 1000;
pub const DEFAULT_HIGH_SIGNIFICANCE_PCT: f64 = 95.0;
pub const DEFAULT_MEDIUM_SIGNIFICANCE_PCT: f64 = 90.0;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

/// One experiment arm's observed outcomes at evaluation time.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct VariantSample {
    pub visitors: u64,
    pub conversions: u64,
}

impl VariantSample {
    pub fn new(conversions: u64, visitors: u64) -> Self {
        Self {
            visitors,
            conversions,
        }
    }
}

/// Interval around an observed conversion rate, in percent.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
pub struct SignificanceResult {
    pub z_score: f64,

    /// Two-tailed significance, in percent.
    pub significance_pct: f64,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationLabel {
    /// Significant lift in favour of the variant.
    ShipVariant,
    /// Significant difference, but the control converts better.
    KeepControl,
    Trending,
    NoDifference,
    /// Not enough visitors in the smallest arm to decide anything.
    KeepRunning,
}

impl RecommendationLabel {
    /// Human-facing label, as shown on experiment cards.
    pub fn headline(self) -> &'static str {
        match self {
            RecommendationLabel::ShipVariant | RecommendationLabel::KeepControl => "Winner found",
            RecommendationLabel::Trending => "Trending but not conclusive",
            RecommendationLabel::NoDifference => "No clear winner",
            RecommendationLabel::KeepRunning => "Keep running",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecommendationLabel::ShipVariant => "ship_variant",
            RecommendationLabel::KeepControl => "keep_control",
            RecommendationLabel::Trending => "trending",
            RecommendationLabel::NoDifference => "no_difference",
            RecommendationLabel::KeepRunning => "keep_running",
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct Recommendation {
    pub label: RecommendationLabel,
    pub confidence: Confidence,
}

/// Thresholds for turning significance into a recommendation.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RecommendationPolicy {
    /// Smallest arm must have at least this many visitors before any verdict.
    pub min_sample_size: u64,
    pub high_significance_pct: f64,
    pub medium_significance_pct: f64,
}

impl Default for RecommendationPolicy {
    fn default() -> Self {
        Self {
            min_sample_size: DEFAULT_MIN_SAMPLE_SIZE,
            high_significance_pct: DEFAULT_HIGH_SIGNIFICANCE_PCT,
            medium_significance_pct: DEFAULT_MEDIUM_SIGNIFICANCE_PCT,
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EvaluationPolicy {
    /// Confidence level for per-arm intervals, in percent.
    pub confidence_level_pct: f64,
    pub recommendation: RecommendationPolicy,
}

impl Default for EvaluationPolicy {
    fn default() -> Self {
        Self {
            confidence_level_pct: DEFAULT_CONFIDENCE_LEVEL_PCT,
            recommendation: RecommendationPolicy::default(),
        }
    }
}

// ----------------------------
// Experiment records
// ----------------------------

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    #[default]
    Running,
    Paused,
    Completed,
}

impl ExperimentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Paused => "paused",
            ExperimentStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct Variant {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub is_control: bool,

    pub visitors: u64,
    pub conversions: u64,

    /// Share of traffic routed to this arm, in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_pct: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Variant {
    pub fn sample(&self) -> VariantSample {
        VariantSample::new(self.conversions, self.visitors)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct Experiment {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub status: ExperimentStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,

    /// RFC 3339 timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,

    pub variants: Vec<Variant>,
}

impl Experiment {
    /// Every arm flagged as control, in input order.
    pub fn controls(&self) -> impl Iterator<Item = &Variant> {
        self.variants.iter().filter(|v| v.is_control)
    }

    /// Every arm that is not a control, in input order.
    pub fn challengers(&self) -> impl Iterator<Item = &Variant> {
        self.variants.iter().filter(|v| !v.is_control)
    }
}

// ----------------------------
// Report
// ----------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ArmSummary {
    pub variant_id: String,
    pub name: String,
    pub visitors: u64,
    pub conversions: u64,

    /// Percent.
    pub conversion_rate: f64,
    pub confidence_interval: ConfidenceInterval,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct VariantComparison {
    pub arm: ArmSummary,

    /// Relative lift over the control rate, in percent.
    pub improvement_pct: f64,

    pub z_score: f64,
    pub significance_pct: f64,

    /// Smaller of the two arms' visitor counts.
    pub min_sample_size: u64,

    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ExperimentMeta {
    pub id: String,
    pub name: String,
    pub status: ExperimentStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,

    /// Where the experiment data was read from, if anywhere.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ExperimentVerdict {
    /// Challenger the overall recommendation is based on.
    pub leader_id: String,
    pub recommendation: Recommendation,

    /// Smallest visitor count across all arms.
    pub min_sample_size: u64,

    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ExperimentReport {
    pub schema: String,
    pub tool: ToolInfo,

    /// RFC 3339 timestamp.
    pub generated_at: String,

    pub experiment: ExperimentMeta,
    pub policy: EvaluationPolicy,
    pub control: ArmSummary,
    pub comparisons: Vec<VariantComparison>,
    pub verdict: ExperimentVerdict,
}

// ----------------------------
// Optional config file schema
// ----------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
pub struct DefaultsConfig {
    /// Confidence level for intervals, in percent (e.g. 95).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_level: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
pub struct PolicyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_sample_size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_significance_pct: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium_significance_pct: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_serialize_as_snake_case() {
        let rec = Recommendation {
            label: RecommendationLabel::ShipVariant,
            confidence: Confidence::High,
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(json, r#"{"label":"ship_variant","confidence":"high"}"#);

        let status = serde_json::to_string(&ExperimentStatus::Completed).unwrap();
        assert_eq!(status, "\"completed\"");
    }

    #[test]
    fn as_str_matches_serde_names() {
        for label in [
            RecommendationLabel::ShipVariant,
            RecommendationLabel::KeepControl,
            RecommendationLabel::Trending,
            RecommendationLabel::NoDifference,
            RecommendationLabel::KeepRunning,
        ] {
            let json = serde_json::to_string(&label).unwrap();
            assert_eq!(json, format!("\"{}\"", label.as_str()));
        }
    }

    #[test]
    fn both_winner_labels_share_a_headline() {
        assert_eq!(RecommendationLabel::ShipVariant.headline(), "Winner found");
        assert_eq!(RecommendationLabel::KeepControl.headline(), "Winner found");
        assert_eq!(RecommendationLabel::KeepRunning.headline(), "Keep running");
    }

    #[test]
    fn variant_optional_fields_default() {
        let v: Variant = serde_json::from_str(
            r#"{"id":"b","name":"Variant B","visitors":100,"conversions":7}"#,
        )
        .unwrap();
        assert!(!v.is_control);
        assert_eq!(v.traffic_pct, None);
        assert_eq!(v.sample(), VariantSample::new(7, 100));

        let json = serde_json::to_string(&v).unwrap();
        assert!(!json.contains("traffic_pct"));
        assert!(!json.contains("description"));
    }

    #[test]
    fn experiment_status_defaults_to_running() {
        let e: Experiment =
            serde_json::from_str(r#"{"id":"e","name":"E","variants":[]}"#).unwrap();
        assert_eq!(e.status, ExperimentStatus::Running);
    }

    #[test]
    fn controls_and_challengers_split_in_order() {
        let arm = |id: &str, is_control: bool| Variant {
            id: id.to_string(),
            name: id.to_string(),
            is_control,
            visitors: 0,
            conversions: 0,
            traffic_pct: None,
            description: None,
        };
        let e = Experiment {
            id: "e".into(),
            name: "E".into(),
            status: ExperimentStatus::Running,
            hypothesis: None,
            started_at: None,
            variants: vec![arm("b", false), arm("a", true), arm("c", false)],
        };
        let controls: Vec<_> = e.controls().map(|v| v.id.as_str()).collect();
        let challengers: Vec<_> = e.challengers().map(|v| v.id.as_str()).collect();
        assert_eq!(controls, ["a"]);
        assert_eq!(challengers, ["b", "c"]);
    }

    #[test]
    fn config_file_parses_partial_toml() {
        let cfg: ConfigFile = toml::from_str(
            r#"
[policy]
min_sample_size = 500
"#,
        )
        .unwrap();
        assert_eq!(cfg.policy.min_sample_size, Some(500));
        assert_eq!(cfg.policy.high_significance_pct, None);
        assert_eq!(cfg.defaults, DefaultsConfig::default());
    }

    #[test]
    fn policy_defaults_match_constants() {
        let p = EvaluationPolicy::default();
        assert_eq!(p.confidence_level_pct, 95.0);
        assert_eq!(p.recommendation.min_sample_size, 1000);
        assert_eq!(p.recommendation.high_significance_pct, 95.0);
        assert_eq!(p.recommendation.medium_significance_pct, 90.0);
    }
}
