//! Statistics for two-arm conversion experiments.
//!
//! Every function here is total: degenerate input (no visitors, identical
//! proportions, zero pooled variance) yields a neutral value instead of NaN,
//! infinity or a panic. Conversions above visitors are clamped to visitors.

use abgate_types::{
    Confidence, ConfidenceInterval, DEFAULT_CONFIDENCE_LEVEL_PCT, Recommendation,
    RecommendationLabel, RecommendationPolicy, SignificanceResult, VariantSample,
};
use statrs::function::erf::{erf, erf_inv};
use std::f64::consts::SQRT_2;

/// Observed conversion rate in percent; 0 when there are no visitors.
pub fn conversion_rate(conversions: u64, visitors: u64) -> f64 {
    if visitors == 0 {
        return 0.0;
    }
    proportion(conversions, visitors) * 100.0
}

/// Caller guarantees `visitors > 0`.
fn proportion(conversions: u64, visitors: u64) -> f64 {
    conversions.min(visitors) as f64 / visitors as f64
}

/// Two-sided standard normal critical value for a confidence level in percent.
///
/// Levels outside `(0, 100)` fall back to 95%.
pub fn critical_value(level_pct: f64) -> f64 {
    let level = if level_pct.is_finite() && level_pct > 0.0 && level_pct < 100.0 {
        level_pct
    } else {
        DEFAULT_CONFIDENCE_LEVEL_PCT
    };
    SQRT_2 * erf_inv(level / 100.0)
}

/// Wilson score interval around the observed rate, in percent.
///
/// Returns `(0, 0)` when there are no visitors. Both bounds are clamped to `[0, 100]`.
pub fn confidence_interval(conversions: u64, visitors: u64, level_pct: f64) -> ConfidenceInterval {
    if visitors == 0 {
        return ConfidenceInterval::default();
    }

    let n = visitors as f64;
    let p = proportion(conversions, visitors);
    let z = critical_value(level_pct);
    let z2 = z * z;

    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let margin = z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt() / denom;

    let lower = clamp_pct((center - margin) * 100.0);
    let upper = clamp_pct((center + margin) * 100.0);
    ConfidenceInterval {
        lower,
        upper: upper.max(lower),
    }
}

fn clamp_pct(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 100.0) }
}

/// Pooled two-proportion z statistic, positive when the variant converts better.
///
/// Returns 0 when either arm has no visitors, when the proportions are equal,
/// or when the pooled standard error is zero.
pub fn z_score(
    control_conversions: u64,
    control_visitors: u64,
    variant_conversions: u64,
    variant_visitors: u64,
) -> f64 {
    if control_visitors == 0 || variant_visitors == 0 {
        return 0.0;
    }

    let c_conv = control_conversions.min(control_visitors) as f64;
    let v_conv = variant_conversions.min(variant_visitors) as f64;
    let n_c = control_visitors as f64;
    let n_v = variant_visitors as f64;

    let diff = v_conv / n_v - c_conv / n_c;
    if diff == 0.0 {
        return 0.0;
    }

    let pooled = (c_conv + v_conv) / (n_c + n_v);
    let se = (pooled * (1.0 - pooled) * (1.0 / n_c + 1.0 / n_v)).sqrt();
    if !se.is_finite() || se <= 0.0 {
        return 0.0;
    }

    let z = diff / se;
    if z.is_finite() { z } else { 0.0 }
}

/// Two-tailed significance in percent for a z statistic: `(2 * Phi(|z|) - 1) * 100`.
pub fn significance_from_z(z: f64) -> f64 {
    if !z.is_finite() {
        return if z.is_nan() { 0.0 } else { 100.0 };
    }
    clamp_pct(erf(z.abs() / SQRT_2) * 100.0)
}

/// Two-tailed significance of the difference between the arms, in percent.
pub fn significance_pct(
    control_conversions: u64,
    control_visitors: u64,
    variant_conversions: u64,
    variant_visitors: u64,
) -> f64 {
    significance_from_z(z_score(
        control_conversions,
        control_visitors,
        variant_conversions,
        variant_visitors,
    ))
}

pub fn significance(control: VariantSample, variant: VariantSample) -> SignificanceResult {
    let z = z_score(
        control.conversions,
        control.visitors,
        variant.conversions,
        variant.visitors,
    );
    SignificanceResult {
        z_score: z,
        significance_pct: significance_from_z(z),
    }
}

/// Relative lift of the variant rate over the control rate, in percent.
///
/// 0 when the control rate is 0: lift over nothing is undefined.
pub fn improvement_pct(control_rate: f64, variant_rate: f64) -> f64 {
    if !control_rate.is_finite() || !variant_rate.is_finite() || control_rate <= 0.0 {
        return 0.0;
    }
    (variant_rate - control_rate) / control_rate * 100.0
}

/// Lift that orients a recommendation: the relative lift, or the difference in
/// percentage points when the control rate is 0 and relative lift is undefined.
///
/// Its sign always matches `variant_rate - control_rate`.
pub fn recommendation_lift(control_rate: f64, variant_rate: f64) -> f64 {
    if !control_rate.is_finite() || !variant_rate.is_finite() {
        return 0.0;
    }
    if control_rate <= 0.0 {
        return variant_rate - control_rate;
    }
    improvement_pct(control_rate, variant_rate)
}

/// Recommendation under the default thresholds (1000 visitors, 95% / 90%).
pub fn recommend(significance_pct: f64, improvement_pct: f64, min_sample_size: u64) -> Recommendation {
    recommend_with(
        &RecommendationPolicy::default(),
        significance_pct,
        improvement_pct,
        min_sample_size,
    )
}

/// Turn significance, lift and the smallest arm size into a recommendation.
///
/// The sample-size floor wins over significance: thin data never yields a winner.
pub fn recommend_with(
    policy: &RecommendationPolicy,
    significance_pct: f64,
    improvement_pct: f64,
    min_sample_size: u64,
) -> Recommendation {
    let significance = if significance_pct.is_nan() {
        0.0
    } else {
        significance_pct
    };

    let (label, confidence) = if min_sample_size < policy.min_sample_size {
        (RecommendationLabel::KeepRunning, Confidence::Low)
    } else if significance >= policy.high_significance_pct {
        let label = if improvement_pct > 0.0 {
            RecommendationLabel::ShipVariant
        } else {
            RecommendationLabel::KeepControl
        };
        (label, Confidence::High)
    } else if significance >= policy.medium_significance_pct {
        (RecommendationLabel::Trending, Confidence::Medium)
    } else {
        (RecommendationLabel::NoDifference, Confidence::Low)
    };

    Recommendation { label, confidence }
}
