//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that turn environment
//! values into subscriber settings.

use dronefleet::observability::logging::{build_filter, init_logging, parse_level, LogFormat};
use tracing::Level;

#[test]
fn test_log_format_parse_is_case_insensitive() {
    for (input, expected) in [
        ("json", LogFormat::Json),
        ("JSON", LogFormat::Json),
        ("Pretty", LogFormat::Pretty),
        ("COMPACT", LogFormat::Compact),
    ] {
        assert_eq!(LogFormat::parse(input), expected, "input: {input}");
    }
}

#[test]
fn test_log_format_parse_whitespace() {
    assert_eq!(LogFormat::parse("  json  "), LogFormat::Json);
    assert_eq!(LogFormat::parse("compact\n"), LogFormat::Compact);
    assert_eq!(LogFormat::parse("\tpretty"), LogFormat::Pretty);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // Unknown formats fall back to JSON, the production default
    for input in ["invalid", "", "xml", "yaml", "123"] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input: {input}");
    }
}

#[test]
fn test_unknown_level_defaults_to_info() {
    assert_eq!(parse_level("verbose"), Level::INFO);
    assert_eq!(parse_level(""), Level::INFO);
    assert_eq!(parse_level("warn"), Level::WARN);
}

#[test]
fn test_filter_quietens_dependencies() {
    if std::env::var("RUST_LOG").is_ok() {
        return;
    }
    let filter = build_filter(Level::DEBUG).to_string();
    assert!(filter.contains("debug"), "filter: {filter}");
    assert!(filter.contains("rumqttc=warn"), "filter: {filter}");
    assert!(filter.contains("warp=warn"), "filter: {filter}");
}

#[test]
fn test_init_logging_twice_is_harmless() {
    init_logging(Level::INFO, LogFormat::Compact, false);
    init_logging(Level::DEBUG, LogFormat::Json, true);
    tracing::info!("still logging");
}
