//! Integration tests for the `week` command.
use bess_dispatch::cli::handle_week_command;
use bess_dispatch::settings::Settings;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// An integration test for the `week` command.
#[test]
fn test_handle_week_command() {
    unsafe { std::env::set_var("BESS_DISPATCH_LOG_LEVEL", "off") };

    let input = Path::new("demos/reserve_blocks/PRL_filled_2024.csv");
    let dir = tempdir().unwrap();
    let output = dir.path().join("week.csv");
    handle_week_command(
        input,
        2024,
        10,
        Some(output.as_path()),
        Some(Settings::default()),
    )
    .unwrap();

    let selected = fs::read_to_string(&output).unwrap();
    let input_rows = fs::read_to_string(input).unwrap().lines().count();
    assert_eq!(selected.lines().count(), input_rows);
    assert!(selected.starts_with("block_id,timestamp,price"));
}
