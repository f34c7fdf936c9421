//! Fuzz target for experiment JSON parsing followed by evaluation.

#![no_main]

use abgate_types::{EvaluationPolicy, Experiment};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(experiment) = serde_json::from_slice::<Experiment>(data) {
        let _ = abgate_domain::evaluate_experiment(&experiment, &EvaluationPolicy::default());
    }
});
