//! Fuzz target for experiment evaluation and report rendering.
//!
//! Arbitrary experiments either fail validation or produce a report that
//! renders to Markdown without panicking.

#![no_main]

use abgate_app::{Clock, EvaluateRequest, EvaluateUseCase, render_markdown, summary_line};
use abgate_types::{EvaluationPolicy, Experiment, ToolInfo};
use libfuzzer_sys::fuzz_target;

struct FixedClock;

impl Clock for FixedClock {
    fn now_rfc3339(&self) -> String {
        "2026-01-01T00:00:00Z".to_string()
    }
}

fuzz_target!(|experiment: Experiment| {
    if abgate_domain::evaluate_experiment(&experiment, &EvaluationPolicy::default()).is_err() {
        return;
    }

    let report = EvaluateUseCase::new(FixedClock)
        .execute(EvaluateRequest {
            experiment,
            policy: EvaluationPolicy::default(),
            source: None,
            tool: ToolInfo {
                name: "abgate".to_string(),
                version: "fuzz".to_string(),
            },
        })
        .expect("validated experiment evaluates");

    for c in &report.comparisons {
        assert!(c.z_score.is_finite());
        assert!((0.0..=100.0).contains(&c.significance_pct));
    }

    let md = render_markdown(&report);
    assert!(md.contains("abgate:"));
    let _ = summary_line(&report);
});
