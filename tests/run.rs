//! Integration tests for the `run` command.
use bess_dispatch::cli::{RunOpts, handle_run_command};
use bess_dispatch::output::{
    BIDS_FILE_NAME, DEBUG_BIDS_FILE_NAME, DISPATCH_FILE_NAME, SUMMARY_FILE_NAME,
};
use bess_dispatch::settings::Settings;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// Get the path to the example scenario.
fn get_scenario_dir() -> PathBuf {
    PathBuf::from("demos/simple")
}

fn run_opts(output_dir: &Path) -> RunOpts {
    RunOpts {
        output_dir: Some(output_dir.to_path_buf()),
        debug_model: true,
        ..RunOpts::default()
    }
}

/// An integration test for the `run` command.
#[test]
fn test_handle_run_command() {
    unsafe { std::env::set_var("BESS_DISPATCH_LOG_LEVEL", "off") };

    {
        // Save results to non-existent directory to check that directory creation works
        let tempdir = tempdir().unwrap();
        let output_dir = tempdir.path().join("results");
        handle_run_command(
            &get_scenario_dir(),
            &run_opts(&output_dir),
            Some(Settings::default()),
        )
        .unwrap();

        for file_name in [
            DISPATCH_FILE_NAME,
            BIDS_FILE_NAME,
            DEBUG_BIDS_FILE_NAME,
            SUMMARY_FILE_NAME,
            "metadata.toml",
        ] {
            assert!(output_dir.join(file_name).is_file(), "{file_name} missing");
        }

        // Header plus one row per time point
        let dispatch = fs::read_to_string(output_dir.join(DISPATCH_FILE_NAME)).unwrap();
        assert_eq!(dispatch.lines().count(), 1 + 25);
    }

    // Second time will fail because the logging is already initialised
    let tempdir = tempdir().unwrap();
    assert_eq!(
        handle_run_command(
            &get_scenario_dir(),
            &run_opts(tempdir.path()),
            Some(Settings::default())
        )
        .unwrap_err()
        .chain()
        .next()
        .unwrap()
        .to_string(),
        "Failed to initialise logging."
    );
}
