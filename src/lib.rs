//! Day-ahead market dispatch optimisation for a grid-connected battery.
#![warn(missing_docs)]
use std::path::PathBuf;

pub mod battery;
pub mod cleaning;
pub mod cli;
pub mod dispatch;
pub mod error;
pub mod horizon;
pub mod input;
pub mod log;
pub mod market;
pub mod optimisation;
pub mod output;
pub mod parameters;
pub mod prices;
pub mod settings;
pub mod units;
pub mod week;

#[cfg(test)]
mod fixture;

/// Get the directory the program's settings file lives in
pub fn get_config_dir() -> PathBuf {
    let Some(mut config_dir) = dirs::config_dir() else {
        panic!("Could not get path to config dir");
    };
    config_dir.push("bess-dispatch");
    config_dir
}
