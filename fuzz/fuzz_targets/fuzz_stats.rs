//! Structure-aware fuzzing of the evaluator functions in abgate-stats.
//!
//! Any counts and any confidence level must give finite, in-range results.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct StatsInput {
    control_conversions: u64,
    control_visitors: u64,
    variant_conversions: u64,
    variant_visitors: u64,
    level_pct: f64,
}

fuzz_target!(|input: StatsInput| {
    let rate = abgate_stats::conversion_rate(input.control_conversions, input.control_visitors);
    assert!((0.0..=100.0).contains(&rate), "rate {rate}");

    let ci = abgate_stats::confidence_interval(
        input.control_conversions,
        input.control_visitors,
        input.level_pct,
    );
    assert!(ci.lower.is_finite() && ci.upper.is_finite(), "{ci:?}");
    assert!(0.0 <= ci.lower && ci.lower <= ci.upper && ci.upper <= 100.0, "{ci:?}");

    let z = abgate_stats::z_score(
        input.control_conversions,
        input.control_visitors,
        input.variant_conversions,
        input.variant_visitors,
    );
    assert!(z.is_finite(), "z {z}");

    let sig = abgate_stats::significance_from_z(z);
    assert!((0.0..=100.0).contains(&sig), "significance {sig}");

    let variant_rate =
        abgate_stats::conversion_rate(input.variant_conversions, input.variant_visitors);
    let lift = abgate_stats::improvement_pct(rate, variant_rate);
    let _ = abgate_stats::recommend(
        sig,
        lift,
        input.control_visitors.min(input.variant_visitors),
    );
});
