//! Fuzz target for the API error classifier.
//!
//! Run with: cargo +nightly fuzz run fuzz_api_classifier
//!
//! The first two bytes pick the status code; the rest is the response body.
//! Classification must never panic, whatever the server sends back.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sonarbridge_core::HttpResponse;
use sonarbridge_core::api::helper::classify;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let code = 400 + u16::from_be_bytes([data[0], data[1]]) % 200;
    let response = HttpResponse::new(code, "https://sonar.example.com/api/x", data[2..].to_vec());
    let _ = classify(response).to_string();
});
