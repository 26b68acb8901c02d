//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text to `AppConfig::parse()` and, for configs that parse,
//! overlays an environment map built from the same input before validating
//! again.

#![no_main]

use std::collections::HashMap;

use libfuzzer_sys::fuzz_target;
use sonarbridge_config::{AppConfig, env};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(mut config) = AppConfig::parse(s) else {
        return;
    };

    let mut vars = HashMap::new();
    for (name, value) in [env::SONARQUBE_URL, env::SONARQUBE_ORG, env::SONARQUBE_TOKEN]
        .into_iter()
        .zip(s.lines())
    {
        vars.insert(name.to_string(), value.to_string());
    }
    config.apply_env(&vars);
    let _ = config.validate();
});
