//! Environment overrides. Kept in their own test binary because they
//! mutate process-wide variables.

mod common;

use bcvm::{EngineConfig, ParseOptions};

#[test]
fn test_environment_overrides() {
    common::init();
    std::env::set_var("BCVM_MAX_CALL_DEPTH", " 64 ");
    std::env::set_var("BCVM_BRANCH_PROFILING", "off");
    std::env::set_var("BCVM_ENTRY", "start");
    std::env::set_var("BCVM_STRICT_RECORDS", "yes");
    let cfg = EngineConfig::from_env();
    assert_eq!(cfg.max_call_depth, 64);
    assert!(!cfg.branch_profiling);
    assert_eq!(cfg.entry_point, "start");
    assert!(ParseOptions::from_env().strict_records);

    // Unparsable values are ignored (with a warning) and keep the default.
    std::env::set_var("BCVM_MAX_CALL_DEPTH", "lots");
    std::env::set_var("BCVM_BRANCH_PROFILING", "maybe");
    let cfg = EngineConfig::from_env();
    assert_eq!(cfg.max_call_depth, EngineConfig::default().max_call_depth);
    assert!(cfg.branch_profiling);

    for var in [
        "BCVM_MAX_CALL_DEPTH",
        "BCVM_BRANCH_PROFILING",
        "BCVM_ENTRY",
        "BCVM_STRICT_RECORDS",
    ] {
        std::env::remove_var(var);
    }
    assert_eq!(EngineConfig::from_env(), EngineConfig::default());
}
