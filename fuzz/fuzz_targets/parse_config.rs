//! Fuzz target for config TOML parsing and policy resolution.

#![no_main]

use abgate_config::{PolicyOverrides, resolve_policy};
use abgate_types::ConfigFile;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(config) = toml::from_str::<ConfigFile>(data) {
        if let Ok(policy) = resolve_policy(&config, &PolicyOverrides::default()) {
            assert!(policy.confidence_level_pct > 0.0 && policy.confidence_level_pct < 100.0);
            assert!(
                policy.recommendation.medium_significance_pct
                    <= policy.recommendation.high_significance_pct
            );
        }
    }
});
