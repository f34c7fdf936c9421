//! Domain logic for abgate.
//!
//! This crate is intentionally I/O-free: it validates experiment records,
//! compares every challenger against the control, and picks an overall verdict.

use abgate_stats::{
    confidence_interval, conversion_rate, improvement_pct, recommend_with, recommendation_lift,
    significance,
};
use abgate_types::{
    ArmSummary, EvaluationPolicy, Experiment, ExperimentVerdict, RecommendationLabel, Variant,
    VariantComparison,
};
use abgate_validation::{ValidationError, validate_counts, validate_id};
use std::collections::BTreeSet;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DomainError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("experiment {0:?} has no control variant")]
    NoControl(String),

    #[error("experiment {experiment:?} has {count} control variants; expected exactly one")]
    MultipleControls { experiment: String, count: usize },

    #[error("experiment {0:?} has no challenger variants")]
    NoChallengers(String),

    #[error("duplicate variant id {0:?}")]
    DuplicateVariant(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub control: ArmSummary,
    pub comparisons: Vec<VariantComparison>,
    pub verdict: ExperimentVerdict,
}

/// Check the record invariants the statistics functions assume.
pub fn validate_experiment(experiment: &Experiment) -> Result<(), DomainError> {
    validate_id("experiment", &experiment.id)?;

    let mut seen = BTreeSet::new();
    for v in &experiment.variants {
        validate_id("variant", &v.id)?;
        validate_counts(&v.id, v.conversions, v.visitors)?;
        if !seen.insert(v.id.as_str()) {
            return Err(DomainError::DuplicateVariant(v.id.clone()));
        }
    }

    match experiment.controls().count() {
        0 => return Err(DomainError::NoControl(experiment.id.clone())),
        1 => {}
        count => {
            return Err(DomainError::MultipleControls {
                experiment: experiment.id.clone(),
                count,
            });
        }
    }

    if experiment.challengers().next().is_none() {
        return Err(DomainError::NoChallengers(experiment.id.clone()));
    }

    Ok(())
}

pub fn summarize_arm(variant: &Variant, confidence_level_pct: f64) -> ArmSummary {
    ArmSummary {
        variant_id: variant.id.clone(),
        name: variant.name.clone(),
        visitors: variant.visitors,
        conversions: variant.conversions,
        conversion_rate: conversion_rate(variant.conversions, variant.visitors),
        confidence_interval: confidence_interval(
            variant.conversions,
            variant.visitors,
            confidence_level_pct,
        ),
    }
}

/// Compare one challenger against the control.
pub fn compare_arms(
    control: &Variant,
    challenger: &Variant,
    policy: &EvaluationPolicy,
) -> VariantComparison {
    let arm = summarize_arm(challenger, policy.confidence_level_pct);
    let control_rate = conversion_rate(control.conversions, control.visitors);
    let improvement = improvement_pct(control_rate, arm.conversion_rate);
    let sig = significance(control.sample(), challenger.sample());
    let min_sample_size = control.visitors.min(challenger.visitors);
    let recommendation = recommend_with(
        &policy.recommendation,
        sig.significance_pct,
        recommendation_lift(control_rate, arm.conversion_rate),
        min_sample_size,
    );

    VariantComparison {
        arm,
        improvement_pct: improvement,
        z_score: sig.z_score,
        significance_pct: sig.significance_pct,
        min_sample_size,
        recommendation,
    }
}

/// Evaluate every challenger against the control and derive an overall verdict.
pub fn evaluate_experiment(
    experiment: &Experiment,
    policy: &EvaluationPolicy,
) -> Result<Evaluation, DomainError> {
    validate_experiment(experiment)?;

    let control = experiment
        .controls()
        .next()
        .ok_or_else(|| DomainError::NoControl(experiment.id.clone()))?;

    let comparisons: Vec<VariantComparison> = experiment
        .challengers()
        .map(|challenger| compare_arms(control, challenger, policy))
        .collect();

    let leader = pick_leader(&comparisons)
        .ok_or_else(|| DomainError::NoChallengers(experiment.id.clone()))?;

    let min_sample_size = experiment
        .variants
        .iter()
        .map(|v| v.visitors)
        .min()
        .unwrap_or(0);

    let control_summary = summarize_arm(control, policy.confidence_level_pct);
    let recommendation = recommend_with(
        &policy.recommendation,
        leader.significance_pct,
        recommendation_lift(control_summary.conversion_rate, leader.arm.conversion_rate),
        min_sample_size,
    );

    let reasons = verdict_reasons(
        experiment,
        &control_summary,
        leader,
        recommendation.label,
        min_sample_size,
        policy,
    );

    Ok(Evaluation {
        control: control_summary,
        verdict: ExperimentVerdict {
            leader_id: leader.arm.variant_id.clone(),
            recommendation,
            min_sample_size,
            reasons,
        },
        comparisons,
    })
}

/// The most significant challenger that beats the control; failing that, the
/// most significant challenger. Ties keep input order.
fn pick_leader(comparisons: &[VariantComparison]) -> Option<&VariantComparison> {
    fn most_significant<'a>(
        it: impl Iterator<Item = &'a VariantComparison>,
    ) -> Option<&'a VariantComparison> {
        let mut best: Option<&VariantComparison> = None;
        for c in it {
            match best {
                Some(b) if c.significance_pct <= b.significance_pct => {}
                _ => best = Some(c),
            }
        }
        best
    }

    // A control with no conversions has no relative lift; z still carries the direction.
    most_significant(
        comparisons
            .iter()
            .filter(|c| c.improvement_pct > 0.0 || c.z_score > 0.0),
    )
        .or_else(|| most_significant(comparisons.iter()))
}

fn verdict_reasons(
    experiment: &Experiment,
    control: &ArmSummary,
    leader: &VariantComparison,
    label: RecommendationLabel,
    min_sample_size: u64,
    policy: &EvaluationPolicy,
) -> Vec<String> {
    let mut reasons = Vec::new();

    for v in experiment.variants.iter().filter(|v| v.visitors == 0) {
        reasons.push(format!("{} has no visitors yet", v.id));
    }

    let rp = &policy.recommendation;
    let name = &leader.arm.name;
    let lift = leader.improvement_pct;
    let sig = leader.significance_pct;
    let zero_control = control.conversion_rate <= 0.0;
    let rate = leader.arm.conversion_rate;

    match label {
        RecommendationLabel::KeepRunning => reasons.push(format!(
            "smallest arm has {min_sample_size} visitors; need {} before calling a winner",
            rp.min_sample_size
        )),
        RecommendationLabel::ShipVariant if zero_control => reasons.push(format!(
            "{name} converts {rate:.2}% against a control with no conversions at {sig:.1}% significance"
        )),
        RecommendationLabel::ShipVariant => reasons.push(format!(
            "{name} converts {lift:+.2}% vs control at {sig:.1}% significance"
        )),
        RecommendationLabel::KeepControl => reasons.push(format!(
            "control outperforms {name} ({lift:+.2}%) at {sig:.1}% significance"
        )),
        RecommendationLabel::Trending if zero_control => reasons.push(format!(
            "{name} trending at {rate:.2}% against a control with no conversions, {sig:.1}% significance (below the {:.0}% bar)",
            rp.high_significance_pct
        )),
        RecommendationLabel::Trending => reasons.push(format!(
            "{name} trending {lift:+.2}% at {sig:.1}% significance (below the {:.0}% bar)",
            rp.high_significance_pct
        )),
        RecommendationLabel::NoDifference => reasons.push(format!(
            "no challenger differs from control at {:.0}% significance",
            rp.medium_significance_pct
        )),
    }

    reasons
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use abgate_types::ExperimentStatus;
    use proptest::prelude::*;

    fn counts() -> impl Strategy<Value = (u64, u64)> {
        (0u64..100_000).prop_flat_map(|v| (0u64..=v, Just(v)))
    }

    proptest! {
        #[test]
        fn prop_valid_experiments_always_evaluate(
            control in counts(),
            challengers in proptest::collection::vec(counts(), 1..5),
        ) {
            let mut variants = vec![Variant {
                id: "control".into(),
                name: "Control".into(),
                is_control: true,
                visitors: control.1,
                conversions: control.0,
                traffic_pct: None,
                description: None,
            }];
            for (i, (c, v)) in challengers.iter().enumerate() {
                variants.push(Variant {
                    id: format!("v{i}"),
                    name: format!("Variant {i}"),
                    is_control: false,
                    visitors: *v,
                    conversions: *c,
                    traffic_pct: None,
                    description: None,
                });
            }
            let exp = Experiment {
                id: "exp".into(),
                name: "Exp".into(),
                status: ExperimentStatus::Running,
                hypothesis: None,
                started_at: None,
                variants,
            };

            let eval = evaluate_experiment(&exp, &EvaluationPolicy::default())
                .expect("valid experiment should evaluate");
            prop_assert_eq!(eval.comparisons.len(), challengers.len());
            prop_assert!(!eval.verdict.reasons.is_empty());
            for c in &eval.comparisons {
                prop_assert!(c.z_score.is_finite());
                prop_assert!((0.0..=100.0).contains(&c.significance_pct));
                prop_assert!(c.improvement_pct.is_finite());
            }
            let smallest = exp.variants.iter().map(|v| v.visitors).min().unwrap();
            prop_assert_eq!(eval.verdict.min_sample_size, smallest);
        }
    }
}
