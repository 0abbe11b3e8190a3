//! Integration tests for the `block-volumes` command.
use bess_dispatch::cli::{BlockVolumesOpts, handle_block_volumes_command};
use bess_dispatch::settings::Settings;
use std::fs;
use tempfile::tempdir;

/// An integration test for the `block-volumes` command, writing to the default file name.
#[test]
fn test_handle_block_volumes_command() {
    unsafe { std::env::set_var("BESS_DISPATCH_LOG_LEVEL", "off") };

    let dir = tempdir().unwrap();
    let input = dir.path().join("2024-PRL-SRL-TRL-Ergebnis.csv");
    fs::write(
        &input,
        "Ausschreibung;Beschreibung;Land;Preis;Zugesprochenes Volumen\n\
        PRL_24_03_04;Primary control 1;CH;12,4;20\n\
        PRL_24_03_04;Primary control 1;CH;12,9;15,5\n\
        PRL_24_03_04;Primary control 2;CH;9,8;30\n",
    )
    .unwrap();

    let opts = BlockVolumesOpts {
        year: 2024,
        output: None,
        product: "Primary control".into(),
        country: "CH".into(),
        prefix: "PRL".into(),
    };
    handle_block_volumes_command(&input, opts, Some(Settings::default())).unwrap();

    let output = fs::read_to_string(dir.path().join("CH_PRL_totalMW_per_block_2024.csv")).unwrap();
    assert_eq!(
        output,
        "Ausschreibung,Beschreibung,Total_MW\n\
        PRL_24_03_04,Primary control 1,35.5\n\
        PRL_24_03_04,Primary control 2,30.0\n"
    );
}
